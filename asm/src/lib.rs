//! A small x86-64 code generator for AVX-512 data movement kernels.
//!
//! Kernels are first built as a [`Program`], a flat list of [`Inst`]s with labels. A program can
//! then be encoded to machine code and mapped executable ([`encode`], [`ExecutableCode`]), or run
//! directly by the software [`Machine`] on hosts that lack AVX-512.

mod builder;
mod emu;
mod encode;
mod error;
#[cfg(target_arch = "x86_64")]
mod exec;
mod inst;
mod reg;

pub use builder::*;
pub use emu::*;
pub use encode::*;
pub use error::*;
#[cfg(target_arch = "x86_64")]
pub use exec::*;
pub use inst::*;
pub use reg::*;
