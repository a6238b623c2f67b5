//! Constant data baked into, or loaded by, the generated kernels.

use tj_asm::Opmask;
use tj_util::{CacheAligned, LANES};

// Interleave masks for the tile transpose. Bit i selects lane i, so 0x5555 picks the even lanes,
// 0x3333 the low two of every four, 0x0f0f the low four of every eight.
pub const K3333: u16 = 0x3333;
pub const K5555: u16 = 0x5555;
pub const KAAAA: u16 = 0xaaaa;
pub const KCCCC: u16 = 0xcccc;
pub const K0F0F: u16 = 0x0f0f;
pub const KF0F0: u16 = 0xf0f0;

/// Opmask register assignment of the interleave masks.
pub const INTERLEAVE_MASKS: [(Opmask, u16); 6] = [
    (Opmask::K1, K3333),
    (Opmask::K2, K5555),
    (Opmask::K3, KAAAA),
    (Opmask::K4, KCCCC),
    (Opmask::K5, K0F0F),
    (Opmask::K6, KF0F0),
];

/// Lane permutation gathering component `j` of four 4-element groups into block `j`.
///
/// Applied with `vpermps` to `[a0 a1 a2 a3 b0 b1 b2 b3 c0 ... d3]` it yields
/// `[a0 b0 c0 d0 a1 b1 c1 d1 a2 ... d3]`.
pub static GROUP_PERMUTATION: CacheAligned<[u32; LANES]> =
    CacheAligned([0, 4, 8, 12, 1, 5, 9, 13, 2, 6, 10, 14, 3, 7, 11, 15]);
