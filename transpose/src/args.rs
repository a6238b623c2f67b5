use core::mem::offset_of;
use core::ptr;

use crate::barrier::BarrierContext;

/// Per-call context read by a generated kernel.
///
/// The layout is the binary contract with the generated code: field offsets are baked into every
/// kernel as the `*_OFFSET` constants below. The tile relayout reads the four pointers, the
/// strided relayout reads `src`, `tr_src` and the remaining fields.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct TransposeArgs {
    pub src: *const f32,
    pub tr_src: *mut f32,
    /// Where the next call will read from. Only used for prefetch hints, may be null.
    pub src_prf: *const f32,
    /// Where the next call will write to. Only used for prefetch hints, may be null.
    pub tr_src_prf: *const f32,
    pub nthr: i32,
    pub ih_start: i32,
    pub ih_end: i32,
    pub bctx: *const BarrierContext,
}

pub(crate) const SRC_OFFSET: i32 = offset_of!(TransposeArgs, src) as i32;
pub(crate) const TR_SRC_OFFSET: i32 = offset_of!(TransposeArgs, tr_src) as i32;
pub(crate) const SRC_PRF_OFFSET: i32 = offset_of!(TransposeArgs, src_prf) as i32;
pub(crate) const TR_SRC_PRF_OFFSET: i32 = offset_of!(TransposeArgs, tr_src_prf) as i32;
pub(crate) const NTHR_OFFSET: i32 = offset_of!(TransposeArgs, nthr) as i32;
pub(crate) const IH_START_OFFSET: i32 = offset_of!(TransposeArgs, ih_start) as i32;
pub(crate) const IH_END_OFFSET: i32 = offset_of!(TransposeArgs, ih_end) as i32;
pub(crate) const BCTX_OFFSET: i32 = offset_of!(TransposeArgs, bctx) as i32;

impl TransposeArgs {
    /// Context for one tile relayout call without prefetch targets.
    #[must_use]
    pub const fn tile(src: *const f32, tr_src: *mut f32) -> Self {
        Self {
            src,
            tr_src,
            src_prf: ptr::null(),
            tr_src_prf: ptr::null(),
            nthr: 0,
            ih_start: 0,
            ih_end: 0,
            bctx: ptr::null(),
        }
    }

    #[must_use]
    pub const fn with_prefetch(mut self, src_prf: *const f32, tr_src_prf: *const f32) -> Self {
        self.src_prf = src_prf;
        self.tr_src_prf = tr_src_prf;
        self
    }

    /// Context for one worker of a strided relayout over rows `ih_start..ih_end`.
    #[must_use]
    pub fn strided(
        src: *const f32,
        tr_src: *mut f32,
        ih_start: usize,
        ih_end: usize,
        nthr: usize,
        bctx: &BarrierContext,
    ) -> Self {
        debug_assert!(ih_start <= ih_end);
        debug_assert!(i32::try_from(ih_end).is_ok() && i32::try_from(nthr).is_ok());
        Self {
            src,
            tr_src,
            src_prf: ptr::null(),
            tr_src_prf: ptr::null(),
            nthr: nthr as i32,
            ih_start: ih_start as i32,
            ih_end: ih_end as i32,
            bctx,
        }
    }
}
