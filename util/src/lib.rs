//! Various simple utilities.

#![no_std]

extern crate alloc;

use core::ops::{Deref, DerefMut};

pub mod transpose;

/// Number of 32-bit lanes in a 512-bit vector register.
pub const LANES: usize = 16;

/// Returns a 16-bit lane mask with the low `n` lanes selected.
///
/// # Panics
/// Panics in debug builds if `n > LANES`.
#[must_use]
#[inline]
pub const fn lane_mask(n: usize) -> u16 {
    debug_assert!(n <= LANES);
    if n >= LANES {
        u16::MAX
    } else {
        ((1u32 << n) - 1) as u16
    }
}

/// Returns whether lane `lane` is selected by `mask`.
#[must_use]
#[inline]
pub const fn lane_selected(mask: u16, lane: usize) -> bool {
    (mask >> lane) & 1 == 1
}

/// Forces the alignment of `T` to a cache line.
///
/// Used for constant tables read by generated code and for state shared between threads, where
/// false sharing would otherwise hurt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C, align(64))]
pub struct CacheAligned<T>(pub T);

impl<T> Deref for CacheAligned<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for CacheAligned<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}
