use thiserror::Error;
use tj_asm::AsmError;

use crate::config::ConvAlgorithm;

#[derive(Debug, Error)]
pub enum TransposeError {
    /// The configuration names neither relayout variant.
    #[error("unsupported configuration: ver = {ver:?}, is_1stconv = {is_1stconv}")]
    UnsupportedConfig {
        ver: ConvAlgorithm,
        is_1stconv: bool,
    },

    /// The channel block does not match the 16-lane vector width.
    #[error("channel block {ic_block} does not match the vector width")]
    UnsupportedBlock { ic_block: usize },

    /// The strided relayout keeps at most four groups of four registers live.
    #[error("tr_ld = {tr_ld} needs more than four 16-element groups per plane")]
    TooManyIterations { tr_ld: usize },

    /// Native execution was requested on a host without AVX-512F.
    #[error("the host cannot execute AVX-512F code")]
    UnsupportedHost,

    #[error(transparent)]
    Asm(#[from] AsmError),
}

/// Result type alias for kernel construction.
pub type TransposeResult<T> = core::result::Result<T, TransposeError>;
