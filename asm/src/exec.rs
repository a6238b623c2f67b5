//! Executable code buffers.

use core::fmt;
use core::marker::PhantomData;
use core::mem::transmute;

use dynasmrt::{AssemblyOffset, DynasmApi, ExecutableBuffer};
use tracing::debug;

use crate::error::{AsmError, AsmResult};

/// Entry point of a generated function taking a pointer to its argument record.
///
/// The System V convention is used on every host so the register contract (argument in `rdi`,
/// `rbx rbp r12-r15` preserved) does not depend on the operating system.
pub type EntryPoint<A> = unsafe extern "sysv64" fn(*const A);

/// An immutable, executable copy of encoded machine code.
///
/// `A` is the argument record the code expects behind its single pointer argument.
pub struct ExecutableCode<A> {
    buffer: ExecutableBuffer,
    entry: AssemblyOffset,
    _args: PhantomData<fn(*const A)>,
}

impl<A> ExecutableCode<A> {
    /// Copies `code` into a fresh mapping and makes it executable.
    pub fn new(code: &[u8]) -> AsmResult<Self> {
        let mut ops = dynasmrt::x64::Assembler::new()?;
        let entry = ops.offset();
        ops.extend(code.iter().copied());
        let buffer = ops.finalize().map_err(|_| AsmError::Finalize)?;
        debug!(bytes = code.len(), "mapped executable code");
        Ok(Self {
            buffer,
            entry,
            _args: PhantomData,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// The machine code as mapped.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Typed entry point.
    ///
    /// The returned pointer is only valid while `self` is alive.
    #[must_use]
    pub fn entry(&self) -> EntryPoint<A> {
        let ptr = self.buffer.ptr(self.entry);
        unsafe {
            // Safety: `ptr` points to the start of code emitted for this signature, and the
            // buffer is mapped read+execute.
            transmute::<*const u8, EntryPoint<A>>(ptr)
        }
    }

    /// Runs the code with `args`.
    ///
    /// # Safety
    /// The code must have been generated for `A`, the host must support every instruction in it,
    /// and every pointer reachable from `args` must be valid for the accesses the code performs.
    #[inline]
    pub unsafe fn call(&self, args: &A) {
        unsafe { (self.entry())(args) }
    }
}

impl<A> fmt::Debug for ExecutableCode<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutableCode")
            .field("len", &self.len())
            .finish()
    }
}
