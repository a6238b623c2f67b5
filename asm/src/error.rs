//! Error types for code construction and loading.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AsmError {
    /// A jump refers to a label that was never bound.
    #[error("label .L{0} is referenced but never bound")]
    UnboundLabel(usize),

    /// A label was bound at two positions.
    #[error("label .L{0} is bound more than once")]
    LabelRebound(usize),

    /// A jump target is more than 2 GiB away.
    #[error("jump to label .L{0} does not fit a 32-bit displacement")]
    JumpOutOfRange(usize),

    /// The operating system refused to hand out memory for the code buffer.
    #[error("failed to allocate executable memory: {0}")]
    ExecutableMemory(#[from] io::Error),

    /// The code buffer could not be switched to read+execute.
    #[error("failed to make the code buffer executable")]
    Finalize,
}

/// Result type alias for code construction.
pub type AsmResult<T> = core::result::Result<T, AsmError>;
