use crate::config::TransposeConfig;
use crate::kernel::TransposeKernel;

/// Builds the relayout kernel for `conf`.
///
/// This is the entry point for convolution setup code, which only asks for configurations it has
/// already matched to one of the two relayouts.
///
/// # Panics
/// Panics with a diagnostic naming the configuration if no relayout serves it, or if the code
/// buffer cannot be mapped.
#[must_use]
pub fn create_transpose_kernel(conf: &TransposeConfig) -> TransposeKernel {
    TransposeKernel::new(conf)
        .unwrap_or_else(|err| panic!("cannot create transpose kernel for {conf:?}: {err}"))
}
