//! Strided relayout for first-layer convolutions: every source row `[iw / 4][4]` becomes four
//! planes `[4][tr_ld]`, plane `j` collecting component `j` of every 4-element group.
//!
//! Each group of four registers covers 64 consecutive source elements. A `vpermps` moves component
//! `j` of the four groups in a register into 128-bit block `j`, then two `vshuff32x4` rounds
//! transpose the 4x4 matrix of blocks across the registers:
//!
//! ```text
//!   after vpermps     v_r = [ c0(r) | c1(r) | c2(r) | c3(r) ]
//!   0x88 / 0xdd       t0 = [c0(0) c2(0) c0(1) c2(1)]   t1 = [c1(0) c3(0) c1(1) c3(1)]
//!                     t2 = [c0(2) c2(2) c0(3) c2(3)]   t3 = [c1(2) c3(2) c1(3) c3(3)]
//!   0x88 / 0xdd       v0 = c0(0..4)  v2 = c2(0..4)  v1 = c1(0..4)  v3 = c3(0..4)
//! ```
//!
//! The kernel processes the row range of its call context between two barrier rendezvous.

use tj_asm::{ABI_PARAM1, AsmResult, CodeBuilder, Cond, Gpr, Mem, Opmask, Program, Zmm};
use tj_util::LANES;
use tracing::instrument;

use crate::args::{
    BCTX_OFFSET, IH_END_OFFSET, IH_START_OFFSET, NTHR_OFFSET, SRC_OFFSET, TR_SRC_OFFSET,
};
use crate::barrier::emit_barrier;
use crate::config::{MAX_STRIDED_ITERS, TYPESIZE, TransposeConfig};
use crate::tables::GROUP_PERMUTATION;

const REG_SRC: Gpr = Gpr::R8;
const REG_TR_SRC: Gpr = Gpr::R9;
const REG_IH: Gpr = Gpr::Rax;
const REG_IH_END: Gpr = Gpr::Rbx;
const REG_NTHR: Gpr = Gpr::Rsi;
const REG_BCTX: Gpr = Gpr::Rcx;
const REG_TMP: Gpr = Gpr::Rdx;
const REG_BARRIER_TMP: Gpr = Gpr::R15;

const VPERM: Zmm = Zmm::new(31);
const KMSK: Opmask = Opmask::K7;

/// Generator for the strided relayout.
#[derive(Debug)]
pub struct StridedTranspose<'a> {
    b: CodeBuilder,
    conf: &'a TransposeConfig,
    niters: usize,
}

impl<'a> StridedTranspose<'a> {
    #[instrument(level = "debug", skip_all, fields(iw = conf.iw, tr_ld = conf.tr_ld, stride_w = conf.stride_w))]
    pub fn generate(conf: &'a TransposeConfig) -> AsmResult<Program> {
        let niters = conf.strided_iters();
        debug_assert!(niters <= MAX_STRIDED_ITERS);

        let mut g = Self {
            b: CodeBuilder::new(),
            conf,
            niters,
        };
        g.emit();
        g.b.finish()
    }

    fn vreg(iter: usize, i: usize) -> Zmm {
        debug_assert!(4 * iter + i < 24);
        Zmm::new(4 * iter + i)
    }

    fn vtmp(i: usize) -> Zmm {
        Zmm::new(24 + i)
    }

    fn emit_load(&mut self, iter: usize) {
        let iw = self.conf.iw;
        for i in 0..4 {
            let v = Self::vreg(iter, i);
            let off = (iter * 4 + i) * LANES;
            let mem = Mem::new(REG_SRC, (off * TYPESIZE) as i32);

            if off + LANES <= iw {
                self.b.vmovups_load(v, mem, None);
            } else if off < iw {
                self.b.vmovups_load(v, mem, Some(KMSK));
            } else {
                self.b.vpxord(v, v, v);
            }
        }
    }

    fn emit_tr(&mut self, iter: usize) {
        let v = |i| Self::vreg(iter, i);
        for i in 0..4 {
            self.b.vpermps(v(i), VPERM, v(i));
        }

        let b = &mut self.b;
        b.vshuff32x4(Self::vtmp(0), None, v(0), v(1), 0x88);
        b.vshuff32x4(Self::vtmp(1), None, v(0), v(1), 0xdd);
        b.vshuff32x4(Self::vtmp(2), None, v(2), v(3), 0x88);
        b.vshuff32x4(Self::vtmp(3), None, v(2), v(3), 0xdd);

        b.vshuff32x4(v(0), None, Self::vtmp(0), Self::vtmp(2), 0x88);
        b.vshuff32x4(v(2), None, Self::vtmp(0), Self::vtmp(2), 0xdd);
        b.vshuff32x4(v(1), None, Self::vtmp(1), Self::vtmp(3), 0x88);
        b.vshuff32x4(v(3), None, Self::vtmp(1), Self::vtmp(3), 0xdd);
    }

    fn emit_store(&mut self) {
        for i in 0..4 {
            for iter in 0..self.niters {
                let off = i * self.conf.tr_ld + iter * LANES;
                let mem = Mem::new(REG_TR_SRC, (off * TYPESIZE) as i32);
                self.b.vmovups_store(mem, Self::vreg(iter, i), None);
            }
        }
    }

    /// One source row.
    fn emit_tr_iw(&mut self) {
        for iter in 0..self.niters {
            self.emit_load(iter);
        }
        for iter in 0..self.niters {
            self.emit_tr(iter);
        }
        self.emit_store();
    }

    fn emit_tr_sync(&mut self) {
        emit_barrier(&mut self.b, REG_BCTX, REG_NTHR, REG_BARRIER_TMP);
    }

    fn emit(&mut self) {
        let conf = self.conf;
        let src_row_bytes = (conf.iw * TYPESIZE) as i32;
        let tr_src_row_bytes = (conf.strided_dst_step() * TYPESIZE) as i32;

        self.b.preamble();

        self.b.load_q(REG_SRC, Mem::new(ABI_PARAM1, SRC_OFFSET));
        self.b.load_q(REG_TR_SRC, Mem::new(ABI_PARAM1, TR_SRC_OFFSET));
        self.b.load_d(REG_NTHR, Mem::new(ABI_PARAM1, NTHR_OFFSET));
        self.b.load_d(REG_IH, Mem::new(ABI_PARAM1, IH_START_OFFSET));
        self.b.load_d(REG_IH_END, Mem::new(ABI_PARAM1, IH_END_OFFSET));
        self.b.load_q(REG_BCTX, Mem::new(ABI_PARAM1, BCTX_OFFSET));

        self.emit_tr_sync();

        let ih_loop = self.b.new_label();
        let tr_done = self.b.new_label();
        self.b.cmp(REG_IH, REG_IH_END);
        self.b.jcc(Cond::Eq, tr_done);

        self.b
            .mov_imm(REG_TMP, GROUP_PERMUTATION.as_ptr() as u64);
        self.b.vmovups_load(VPERM, Mem::new(REG_TMP, 0), None);

        if let Some(mask) = conf.tail_mask() {
            self.b.kmovw_imm(KMSK, REG_TMP, mask);
        }

        // src += ih_start * iw, tr_src += ih_start * stride_w * tr_ld
        self.b.imul_imm(REG_TMP, REG_IH, src_row_bytes);
        self.b.add(REG_SRC, REG_TMP);
        self.b.imul_imm(REG_TMP, REG_IH, tr_src_row_bytes);
        self.b.add(REG_TR_SRC, REG_TMP);

        self.b.bind(ih_loop);
        self.emit_tr_iw();
        self.b.add_imm(REG_SRC, src_row_bytes);
        self.b.add_imm(REG_TR_SRC, tr_src_row_bytes);
        self.b.inc(REG_IH);
        self.b.cmp(REG_IH, REG_IH_END);
        self.b.jcc(Cond::Lt, ih_loop);

        self.b.bind(tr_done);
        self.emit_tr_sync();

        self.b.postamble();
    }
}
