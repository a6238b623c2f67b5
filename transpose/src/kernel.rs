use core::fmt;
use core::ptr;

use tj_asm::{Machine, Program, encode};
use tj_util::LANES;
use tracing::{debug, trace};

use crate::args::TransposeArgs;
use crate::config::{ConvAlgorithm, MAX_STRIDED_ITERS, TransposeConfig};
use crate::error::{TransposeError, TransposeResult};
use crate::strided::StridedTranspose;
use crate::tile::{TileShape, TileTranspose};

/// The two relayouts a kernel can implement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Variant {
    /// 16x16 tile transpose with left and right zero padding.
    Tile,
    /// 4-wide strided transpose over a row range, between two barrier rendezvous.
    Strided,
}

impl Variant {
    /// Picks the relayout serving `conf`.
    pub fn select(conf: &TransposeConfig) -> TransposeResult<Self> {
        match (conf.ver, conf.is_1stconv) {
            (ConvAlgorithm::FourFma, false) => Ok(Self::Tile),
            (ConvAlgorithm::FourFma, true) => Ok(Self::Strided),
            (ver, is_1stconv) => Err(TransposeError::UnsupportedConfig { ver, is_1stconv }),
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tile => f.write_str("tile"),
            Self::Strided => f.write_str("strided"),
        }
    }
}

/// How a kernel is executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Encoded machine code, called directly.
    Native,
    /// The instruction stream run by the software emulator.
    Emulated,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BackendPreference {
    /// Native when the host supports it, emulated otherwise.
    #[default]
    Auto,
    Native,
    Emulated,
}

impl BackendPreference {
    pub fn resolve(self) -> TransposeResult<Backend> {
        match self {
            Self::Auto if native_supported() => Ok(Backend::Native),
            Self::Auto | Self::Emulated => Ok(Backend::Emulated),
            Self::Native if native_supported() => Ok(Backend::Native),
            Self::Native => Err(TransposeError::UnsupportedHost),
        }
    }
}

/// Whether generated code can run natively on this host.
#[must_use]
pub fn native_supported() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        std::arch::is_x86_feature_detected!("avx512f")
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

enum Engine {
    #[cfg(target_arch = "x86_64")]
    Native(tj_asm::ExecutableCode<TransposeArgs>),
    Emulated,
}

/// A generated relayout kernel.
///
/// Immutable after construction and safe to call from many threads at once.
pub struct TransposeKernel {
    variant: Variant,
    backend: Backend,
    program: Program,
    code_size: usize,
    engine: Engine,
}

impl TransposeKernel {
    /// Generates the kernel serving `conf`, executed natively when the host allows it.
    pub fn new(conf: &TransposeConfig) -> TransposeResult<Self> {
        Self::with_backend(conf, BackendPreference::Auto)
    }

    pub fn with_backend(conf: &TransposeConfig, pref: BackendPreference) -> TransposeResult<Self> {
        if conf.ic_block != LANES {
            return Err(TransposeError::UnsupportedBlock {
                ic_block: conf.ic_block,
            });
        }
        let variant = Variant::select(conf)?;
        let program = match variant {
            Variant::Tile => {
                debug_assert!(conf.l_pad <= LANES && conf.right_pad() <= LANES);
                TileTranspose::generate(conf)?
            }
            Variant::Strided => {
                if conf.strided_iters() > MAX_STRIDED_ITERS {
                    return Err(TransposeError::TooManyIterations { tr_ld: conf.tr_ld });
                }
                StridedTranspose::generate(conf)?
            }
        };
        Self::from_program(variant, program, pref)
    }

    /// Wraps a single-tile program, see [`TileTranspose::single_tile`].
    pub fn single_tile(
        shape: TileShape,
        tr_stride: usize,
        pref: BackendPreference,
    ) -> TransposeResult<Self> {
        let program = TileTranspose::single_tile(shape, tr_stride)?;
        Self::from_program(Variant::Tile, program, pref)
    }

    fn from_program(
        variant: Variant,
        program: Program,
        pref: BackendPreference,
    ) -> TransposeResult<Self> {
        let backend = pref.resolve()?;
        let code = encode(&program)?;
        let code_size = code.len();

        let engine = match backend {
            #[cfg(target_arch = "x86_64")]
            Backend::Native => Engine::Native(tj_asm::ExecutableCode::new(&code)?),
            #[cfg(not(target_arch = "x86_64"))]
            Backend::Native => return Err(TransposeError::UnsupportedHost),
            Backend::Emulated => Engine::Emulated,
        };

        debug!(
            %variant,
            ?backend,
            insts = program.len(),
            code_size,
            "generated transpose kernel"
        );
        trace!("listing:\n{program}");

        Ok(Self {
            variant,
            backend,
            program,
            code_size,
            engine,
        })
    }

    #[must_use]
    pub const fn variant(&self) -> Variant {
        self.variant
    }

    #[must_use]
    pub const fn backend(&self) -> Backend {
        self.backend
    }

    /// The instruction stream both backends execute.
    #[must_use]
    pub const fn program(&self) -> &Program {
        &self.program
    }

    /// Size in bytes of the encoded machine code.
    #[must_use]
    pub const fn code_size(&self) -> usize {
        self.code_size
    }

    /// Runs the kernel on `args`.
    ///
    /// # Safety
    /// - `args.src` must be readable and `args.tr_src` writable for every element the kernel's
    ///   configuration touches, and the two must not overlap.
    /// - For the strided relayout, `args.bctx` must point to a live [`BarrierContext`] shared with
    ///   exactly `args.nthr` concurrent callers using the same `nthr`, and `ih_start <= ih_end`.
    ///
    /// [`BarrierContext`]: crate::BarrierContext
    pub unsafe fn call(&self, args: &TransposeArgs) {
        match &self.engine {
            #[cfg(target_arch = "x86_64")]
            Engine::Native(code) => unsafe { code.call(args) },
            Engine::Emulated => {
                let mut machine = Machine::new();
                unsafe { machine.call(&self.program, ptr::from_ref(args) as u64) };
            }
        }
    }
}

impl fmt::Debug for TransposeKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransposeKernel")
            .field("variant", &self.variant)
            .field("backend", &self.backend)
            .field("insts", &self.program.len())
            .field("code_size", &self.code_size)
            .finish()
    }
}
