//! Runtime-generated AVX-512 kernels relayouting convolution sources for backward-by-weights
//! passes.
//!
//! Two relayouts are supported, selected by [`create_transpose_kernel`] from a
//! [`TransposeConfig`]:
//!
//! - [`Variant::Tile`] turns `[iw][16]` channel-minor rows into `[16][tr_iw]` rows with zero
//!   padding, 16 positions at a time.
//! - [`Variant::Strided`] de-interleaves `[iw / 4][4]` rows into four planes, over a range of rows
//!   split between cooperating workers that rendezvous on a [`BarrierContext`].

mod args;
mod barrier;
mod config;
mod error;
mod factory;
mod kernel;
pub mod reference;
mod strided;
mod tables;
mod tile;

pub use args::*;
pub use barrier::*;
pub use config::*;
pub use error::*;
pub use factory::*;
pub use kernel::*;
pub use strided::*;
pub use tables::*;
pub use tile::*;
