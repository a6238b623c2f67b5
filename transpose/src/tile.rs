//! Tile relayout: rows of `[iw][16]` channel-minor data become `[16][tr_iw]` rows, one output row
//! per channel, with zero padding on either side.
//!
//! Each tile is 16 source rows of 16 channels. The tile is transposed in registers by three
//! interleave rounds over each half of 8 registers followed by a 128-bit lane exchange between the
//! halves:
//!
//! ```text
//!   swap 1:  valignd by 1/15, merge under 0xaaaa/0x5555   exchanges single lanes in row pairs
//!   swap 2:  valignd by 2/14, merge under 0x3333/0xcccc   exchanges lane pairs in row quads
//!   swap 4:  vshuff32x4 0xb1, merge under 0xf0f0/0x0f0f   exchanges 4-lane blocks in row octets
//!   swap 8:  vshuff64x2 0x44/0xee between rows i, 8+i     exchanges 8-lane halves, then stores
//! ```

use tj_asm::{
    ABI_PARAM1, AsmResult, CodeBuilder, Cond, Gpr, Mem, Opmask, PrefetchHint, Program, Zmm,
};
use tj_util::{LANES, lane_mask};
use tracing::instrument;

use crate::args::{SRC_OFFSET, SRC_PRF_OFFSET, TR_SRC_OFFSET, TR_SRC_PRF_OFFSET};
use crate::config::{TYPESIZE, TransposeConfig};
use crate::tables::INTERLEAVE_MASKS;

const TRANSPOSE_SIZE: usize = LANES;

// Must agree with `INTERLEAVE_MASKS`.
const K3333: Opmask = Opmask::K1;
const K5555: Opmask = Opmask::K2;
const KAAAA: Opmask = Opmask::K3;
const KCCCC: Opmask = Opmask::K4;
const K0F0F: Opmask = Opmask::K5;
const KF0F0: Opmask = Opmask::K6;
const KTAIL: Opmask = Opmask::K7;

const REG_SRC: Gpr = Gpr::R8;
const REG_TR_SRC: Gpr = Gpr::R9;
const REG_SRC_PRF: Gpr = Gpr::R10;
const REG_TR_SRC_PRF: Gpr = Gpr::R11;
const REG_LOOP: Gpr = Gpr::R12;
const REG_TR_SRC_TMP: Gpr = Gpr::R13;
const REG_TMP: Gpr = Gpr::R14;

/// Bytes between consecutive source tiles.
const SRC_STEP: i32 = (TRANSPOSE_SIZE * LANES * TYPESIZE) as i32;
/// Bytes between consecutive destination tiles.
const TR_SRC_STEP: i32 = (LANES * TYPESIZE) as i32;

/// What one tile relayout writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileShape {
    /// Valid source rows, `0..=16`. Only the first `nrows` lanes of each output row are written.
    pub nrows: usize,
    /// Zeros written before the tile in every output row, `0..=16`.
    pub l_pad: usize,
    /// Zeros written after the tile in every output row, `0..=16`.
    pub r_pad: usize,
    /// Use non-temporal stores for full tiles. Requires 64-byte aligned output rows.
    pub nontemporal: bool,
}

impl TileShape {
    #[must_use]
    pub const fn new(nrows: usize) -> Self {
        Self {
            nrows,
            l_pad: 0,
            r_pad: 0,
            nontemporal: false,
        }
    }

    #[must_use]
    pub const fn full() -> Self {
        Self::new(TRANSPOSE_SIZE)
    }

    #[must_use]
    pub const fn with_pads(mut self, l_pad: usize, r_pad: usize) -> Self {
        self.l_pad = l_pad;
        self.r_pad = r_pad;
        self
    }

    #[must_use]
    pub const fn with_nontemporal(mut self, nontemporal: bool) -> Self {
        self.nontemporal = nontemporal;
        self
    }

    #[must_use]
    pub const fn is_partial(&self) -> bool {
        self.nrows < TRANSPOSE_SIZE
    }
}

/// Generator for the tile relayout.
#[derive(Debug)]
pub struct TileTranspose {
    b: CodeBuilder,
    src_stride: i32,
    tr_src_stride: i32,
    enable_prefetch: bool,
}

impl TileTranspose {
    fn new(tr_stride: usize, enable_prefetch: bool) -> Self {
        Self {
            b: CodeBuilder::new(),
            src_stride: (LANES * TYPESIZE) as i32,
            tr_src_stride: (tr_stride * TYPESIZE) as i32,
            enable_prefetch,
        }
    }

    /// Builds the kernel relayouting one full input row of `conf.iw` positions.
    #[instrument(level = "debug", skip_all, fields(iw = conf.iw, tr_iw = conf.tr_iw, l_pad = conf.l_pad))]
    pub fn generate(conf: &TransposeConfig) -> AsmResult<Program> {
        debug_assert_eq!(conf.ic_block, TRANSPOSE_SIZE);
        debug_assert!(conf.iw + conf.l_pad <= conf.tr_iw);

        let transposes = conf.tile_count();
        let mut loop_iters = transposes.saturating_sub(1);
        let tail = conf.iw - loop_iters * TRANSPOSE_SIZE;
        let l_pad = conf.l_pad;
        let r_pad = conf.right_pad();
        let l_pad_bytes = (l_pad * TYPESIZE) as i32;

        let mut g = Self::new(conf.tr_iw, conf.enable_prefetch());
        g.b.preamble();
        g.load_args();
        g.set_interleave_masks();

        if l_pad > 0 && loop_iters > 0 {
            loop_iters -= 1;
            g.transpose(TileShape::full().with_pads(l_pad, 0));
            g.advance(SRC_STEP, TR_SRC_STEP + l_pad_bytes);
        }

        if loop_iters > 0 {
            let top = g.b.new_label();
            g.b.mov_imm(REG_LOOP, loop_iters as u64);
            g.b.bind(top);
            g.transpose(TileShape::full());
            g.advance(SRC_STEP, TR_SRC_STEP);
            g.b.sub_imm(REG_LOOP, 1);
            g.b.jcc(Cond::Ne, top);
        }

        let first_pad = if transposes > 1 { 0 } else { l_pad };
        g.transpose(TileShape::new(tail).with_pads(first_pad, r_pad));

        g.b.postamble();
        g.b.finish()
    }

    /// Builds a kernel relayouting a single tile into rows `tr_stride` elements apart.
    ///
    /// Reads `src` and `tr_src` from the call context; no prefetch hints are emitted.
    #[instrument(level = "debug", skip_all, fields(shape = ?shape, tr_stride = tr_stride))]
    pub fn single_tile(shape: TileShape, tr_stride: usize) -> AsmResult<Program> {
        debug_assert!(shape.l_pad + shape.nrows + shape.r_pad <= tr_stride);
        let mut g = Self::new(tr_stride, false);
        g.b.preamble();
        g.load_args();
        g.set_interleave_masks();
        g.transpose(shape);
        g.b.postamble();
        g.b.finish()
    }

    fn load_args(&mut self) {
        let b = &mut self.b;
        b.load_q(REG_SRC, Mem::new(ABI_PARAM1, SRC_OFFSET));
        b.load_q(REG_TR_SRC, Mem::new(ABI_PARAM1, TR_SRC_OFFSET));
        b.load_q(REG_SRC_PRF, Mem::new(ABI_PARAM1, SRC_PRF_OFFSET));
        b.load_q(REG_TR_SRC_PRF, Mem::new(ABI_PARAM1, TR_SRC_PRF_OFFSET));
    }

    fn set_interleave_masks(&mut self) {
        for (k, bits) in INTERLEAVE_MASKS {
            self.b.kmovw_imm(k, REG_TMP, bits);
        }
    }

    fn advance(&mut self, src_step: i32, tr_src_step: i32) {
        self.b.add_imm(REG_SRC, src_step);
        self.b.add_imm(REG_TR_SRC, tr_src_step);
        self.b.add_imm(REG_SRC_PRF, src_step);
        self.b.add_imm(REG_TR_SRC_PRF, tr_src_step);
    }

    fn src_zmm(i: usize) -> Zmm {
        debug_assert!(i < TRANSPOSE_SIZE);
        Zmm::new(i)
    }

    fn tmp_zmm(i: usize) -> Zmm {
        debug_assert!(i < TRANSPOSE_SIZE);
        Zmm::new(TRANSPOSE_SIZE + i)
    }

    fn pf_src_t0(&mut self, i: usize) {
        if self.enable_prefetch {
            let disp = (TRANSPOSE_SIZE + i) as i32 * self.src_stride;
            self.b.prefetch(PrefetchHint::T0, Mem::new(REG_SRC, disp));
        }
    }

    fn pf_src_t1(&mut self, i: usize) {
        if self.enable_prefetch {
            let disp = i as i32 * self.src_stride;
            self.b.prefetch(PrefetchHint::T1, Mem::new(REG_SRC_PRF, disp));
        }
    }

    fn pf_tr_src_t0(&mut self, i: usize) {
        if self.enable_prefetch {
            let disp = (TRANSPOSE_SIZE * TYPESIZE) as i32 + i as i32 * self.tr_src_stride;
            self.b.prefetch(PrefetchHint::T0, Mem::new(REG_TR_SRC, disp));
            self.b.prefetch(PrefetchHint::T0, Mem::new(REG_TR_SRC, disp + 64));
        }
    }

    fn pf_tr_src_t1(&mut self, i: usize) {
        if self.enable_prefetch {
            let disp = i as i32 * self.tr_src_stride;
            self.b.prefetch(PrefetchHint::Wt1, Mem::new(REG_TR_SRC_PRF, disp));
        }
    }

    /// Loads source row `i` if the tile has it.
    fn load(&mut self, i: usize, nrows: usize) {
        if i < nrows {
            let mem = Mem::new(REG_SRC, i as i32 * self.src_stride);
            self.b.vmovups_load(Self::src_zmm(i), mem, None);
        }
    }

    /// Zeroes `r` and writes its first `pad` lanes to row `i` at `base`.
    fn padding(&mut self, r: Zmm, base: Gpr, i: usize, pad: usize) {
        self.b.kmovw_imm(KTAIL, REG_TMP, lane_mask(pad));
        self.b.vpxord(r, r, r);
        let mem = Mem::new(base, i as i32 * self.tr_src_stride);
        self.b.vmovups_store(mem, r, Some(KTAIL));
    }

    /// Writes output row `i`, held in `r`, plus its padding. Clobbers `r`.
    fn store(&mut self, r: Zmm, i: usize, shape: TileShape) {
        let partial = shape.is_partial();

        self.b.mov(REG_TR_SRC_TMP, REG_TR_SRC);
        self.b.add_imm(REG_TR_SRC_TMP, (shape.l_pad * TYPESIZE) as i32);
        if partial {
            self.b.kmovw_imm(KTAIL, REG_TMP, lane_mask(shape.nrows));
        }

        let mem = Mem::new(REG_TR_SRC_TMP, i as i32 * self.tr_src_stride);
        if shape.nontemporal && !partial {
            self.b.vmovntps(mem, r);
        } else {
            self.b.vmovups_store(mem, r, partial.then_some(KTAIL));
        }

        if shape.r_pad > 0 {
            self.b
                .add_imm(REG_TR_SRC_TMP, (shape.nrows * TYPESIZE) as i32);
            self.padding(r, REG_TR_SRC_TMP, i, shape.r_pad);
        }
        if shape.l_pad > 0 {
            self.padding(r, REG_TR_SRC, i, shape.l_pad);
        }
    }

    /// The three interleave rounds over rows `base..base + 8`.
    ///
    /// Loads of the later rows are spread over the first round so that they overlap with the
    /// shuffles.
    fn transpose16x8(&mut self, base: usize, nrows: usize) {
        debug_assert!(base == 0 || base == 8);

        // swap 1
        for i in 0..4 {
            let idx0 = base + i * 2;
            let idx1 = idx0 + 1;
            let load_next = base == 0 || i < 3;

            if base == 0 && i == 0 {
                self.load(idx0, nrows);
                self.load(idx1, nrows);
            }

            let (tmp0, tmp1) = (Self::tmp_zmm(idx0), Self::tmp_zmm(idx1));
            let (src0, src1) = (Self::src_zmm(idx0), Self::src_zmm(idx1));

            if load_next {
                self.load(idx0 + 2, nrows);
            }
            self.b.valignd(tmp0, src0, src0, 0x1);
            self.pf_src_t1(base + i);

            if load_next {
                self.load(idx1 + 2, nrows);
            }
            self.b.valignd(tmp1, src1, src1, 0xf);
            self.pf_src_t0(base + i);

            self.b.vmovaps(src0, tmp1, Some(KAAAA));
            self.b.vmovaps(src1, tmp0, Some(K5555));
        }

        // swap 2
        for i in 0..4 {
            let select_half = if i < 2 { 0 } else { 2 };
            let idx0 = base + i + select_half;
            let idx2 = idx0 + 2;

            let (tmp0, tmp1) = (Self::tmp_zmm(idx0), Self::tmp_zmm(idx2));
            let (src0, src2) = (Self::src_zmm(idx0), Self::src_zmm(idx2));

            self.b.valignd(tmp0, src0, src0, 0x2);
            self.pf_src_t1(base + 4 + i);
            self.b.valignd(tmp1, src2, src2, 0xe);
            self.pf_src_t0(base + 4 + i);
            self.b.vmovaps(src2, tmp0, Some(K3333));
            self.b.vmovaps(src0, tmp1, Some(KCCCC));
        }

        // swap 4
        for i in 0..4 {
            let idx0 = base + i;
            let idx4 = idx0 + 4;

            let tmp0 = Self::tmp_zmm(idx0);
            let (src0, src4) = (Self::src_zmm(idx0), Self::src_zmm(idx4));

            self.b.vmovaps(tmp0, src0, None);
            self.b.vshuff32x4(src0, Some(KF0F0), src4, src4, 0xb1);
            self.pf_tr_src_t1(base / 2 + i);
            self.b.vshuff32x4(src4, Some(K0F0F), tmp0, tmp0, 0xb1);
            self.pf_tr_src_t0(base / 2 + i);
        }
    }

    /// Exchanges 256-bit halves between rows `i` and `8 + i` and stores all 16 output rows.
    fn fixup16x16(&mut self, shape: TileShape) {
        for i in 0..8 {
            let tmp = Self::tmp_zmm(i);
            self.b
                .vshuff64x2(tmp, Self::src_zmm(i), Self::src_zmm(8 + i), 0x44);
            self.store(tmp, i, shape);
            if i % 2 == 0 {
                self.pf_tr_src_t1(8 + i / 2);
                self.pf_tr_src_t0(8 + i / 2);
            }
        }

        for i in 0..8 {
            let tmp = Self::tmp_zmm(8 + i);
            self.b
                .vshuff64x2(tmp, Self::src_zmm(i), Self::src_zmm(8 + i), 0xee);
            self.store(tmp, 8 + i, shape);
            if i % 2 == 0 {
                self.pf_tr_src_t1(12 + i / 2);
                self.pf_tr_src_t0(12 + i / 2);
            }
        }
    }

    /// Emits one tile. A tile without rows emits nothing, padding included.
    fn transpose(&mut self, shape: TileShape) {
        debug_assert!(shape.nrows <= TRANSPOSE_SIZE);
        debug_assert!(shape.l_pad <= LANES && shape.r_pad <= LANES);
        if shape.nrows == 0 {
            return;
        }

        self.transpose16x8(0, shape.nrows);
        self.transpose16x8(8, shape.nrows);
        self.fixup16x16(shape);
    }
}
