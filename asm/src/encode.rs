//! Lowering of a [`Program`] to x86-64 machine code.
//!
//! Vector instructions use the EVEX encoding:
//!
//! ```text
//!     62 | R X B R' 0 0 m m | W v v v v 1 p p | z L' L b V' a a a | opcode | modrm [sib] [disp] [imm]
//! ```
//!
//! where `R X B R' vvvv V'` are stored inverted. Memory operands of full-width vector accesses use
//! the compressed `disp8 * 64` form whenever the displacement is a multiple of the vector size.
//! Every jump is emitted with a 32-bit displacement and patched once all labels are placed.

use tracing::trace;

use crate::builder::Program;
use crate::error::{AsmError, AsmResult};
use crate::inst::{Cond, Inst, Label, Mem, PrefetchHint};
use crate::reg::{Gpr, Opmask};

/// Bytes per 512-bit vector; the EVEX `N` for full-vector memory operands.
const VECTOR_BYTES: i32 = 64;

#[derive(Clone, Copy)]
enum Map {
    M0F = 0b01,
    M0F38 = 0b10,
    M0F3A = 0b11,
}

#[derive(Clone, Copy)]
enum Pp {
    None = 0b00,
    P66 = 0b01,
}

#[derive(Clone, Copy)]
enum Rm {
    Reg(u8),
    Mem(Mem),
}

/// Encodes `program` into position-independent machine code.
pub fn encode(program: &Program) -> AsmResult<Vec<u8>> {
    let mut enc = Encoder::default();
    let mut label_offsets = vec![0usize; program.len()];
    let mut fixups: Vec<(usize, Label)> = Vec::new();

    for (pos, inst) in program.insts().iter().enumerate() {
        label_offsets[pos] = enc.code.len();
        match *inst {
            Inst::Jcc { cond, target } => {
                enc.code.extend_from_slice(&[0x0f, 0x80 | cond_code(cond)]);
                fixups.push((enc.code.len(), target));
                enc.code.extend_from_slice(&[0; 4]);
            }
            Inst::Jmp(target) => {
                enc.code.push(0xe9);
                fixups.push((enc.code.len(), target));
                enc.code.extend_from_slice(&[0; 4]);
            }
            ref other => enc.inst(other),
        }
    }

    for (at, label) in fixups {
        let target = label_offsets[program.label_position(label)];
        let rel = target as i64 - (at as i64 + 4);
        let rel = i32::try_from(rel).map_err(|_| AsmError::JumpOutOfRange(label.id()))?;
        enc.code[at..at + 4].copy_from_slice(&rel.to_le_bytes());
    }

    trace!(bytes = enc.code.len(), "encoded program");
    Ok(enc.code)
}

const fn cond_code(cond: Cond) -> u8 {
    match cond {
        Cond::Eq => 0x4,
        Cond::Ne => 0x5,
        Cond::Lt => 0xc,
        Cond::Be => 0x6,
    }
}

#[derive(Default)]
struct Encoder {
    code: Vec<u8>,
}

impl Encoder {
    fn inst(&mut self, inst: &Inst) {
        match *inst {
            Inst::MovRR { dst, src } => self.op_rr(true, &[0x89], src.index(), dst),
            Inst::MovRI { dst, imm } => {
                if let Ok(imm32) = u32::try_from(imm) {
                    // mov r32, imm32 zero-extends into the full register.
                    self.rex(false, 0, dst.index(), false);
                    self.code.push(0xb8 + dst.low3());
                    self.code.extend_from_slice(&imm32.to_le_bytes());
                } else {
                    self.rex(true, 0, dst.index(), true);
                    self.code.push(0xb8 + dst.low3());
                    self.code.extend_from_slice(&imm.to_le_bytes());
                }
            }
            Inst::Load64 { dst, mem } => self.op_rm(true, &[0x8b], dst.index(), mem),
            Inst::Load32 { dst, mem } => self.op_rm(false, &[0x8b], dst.index(), mem),
            Inst::Store64 { mem, src } => self.op_rm(true, &[0x89], src.index(), mem),
            Inst::Store64Imm { mem, imm } => {
                self.op_rm(true, &[0xc7], 0, mem);
                self.code.extend_from_slice(&imm.to_le_bytes());
            }
            Inst::AddRI { dst, imm } => self.alu_imm(0, dst, imm),
            Inst::SubRI { dst, imm } => self.alu_imm(5, dst, imm),
            Inst::CmpRI { lhs, imm } => self.alu_imm(7, lhs, imm),
            Inst::AddRR { dst, src } => self.op_rr(true, &[0x01], src.index(), dst),
            Inst::CmpRR { lhs, rhs } => self.op_rr(true, &[0x39], rhs.index(), lhs),
            Inst::CmpRM { lhs, mem } => self.op_rm(true, &[0x3b], lhs.index(), mem),
            Inst::ImulRRI { dst, src, imm } => {
                if let Ok(imm8) = i8::try_from(imm) {
                    self.op_rr(true, &[0x6b], dst.index(), src);
                    self.code.push(imm8 as u8);
                } else {
                    self.op_rr(true, &[0x69], dst.index(), src);
                    self.code.extend_from_slice(&imm.to_le_bytes());
                }
            }
            Inst::Inc(reg) => self.op_rr(true, &[0xff], 0, reg),
            Inst::LockXadd { mem, src } => {
                self.code.push(0xf0);
                self.op_rm(true, &[0x0f, 0xc1], src.index(), mem);
            }
            Inst::Push(reg) => {
                self.rex(false, 0, reg.index(), false);
                self.code.push(0x50 + reg.low3());
            }
            Inst::Pop(reg) => {
                self.rex(false, 0, reg.index(), false);
                self.code.push(0x58 + reg.low3());
            }
            Inst::Pause => self.code.extend_from_slice(&[0xf3, 0x90]),
            Inst::Bind(_) => {}
            Inst::Ret => self.code.push(0xc3),
            Inst::Vzeroupper => self.code.extend_from_slice(&[0xc5, 0xf8, 0x77]),
            Inst::Kmovw { dst, src } => {
                // VEX.L0.0F.W0 92 /r
                if src.is_extended() {
                    self.code.extend_from_slice(&[0xc4, 0b1100_0001, 0x78]);
                } else {
                    self.code.extend_from_slice(&[0xc5, 0xf8]);
                }
                self.code.push(0x92);
                self.code.push(0xc0 | (dst.index() << 3) | src.low3());
            }
            Inst::VLoad { dst, mem, mask } => {
                self.evex(Map::M0F, Pp::None, false, dst.index(), 0, Rm::Mem(mem), mask, true);
                self.code.push(0x10);
                self.modrm_evex(dst.index(), Rm::Mem(mem));
            }
            Inst::VStore { mem, src, mask } => {
                self.evex(Map::M0F, Pp::None, false, src.index(), 0, Rm::Mem(mem), mask, false);
                self.code.push(0x11);
                self.modrm_evex(src.index(), Rm::Mem(mem));
            }
            Inst::VStoreNt { mem, src } => {
                self.evex(Map::M0F, Pp::None, false, src.index(), 0, Rm::Mem(mem), None, false);
                self.code.push(0x2b);
                self.modrm_evex(src.index(), Rm::Mem(mem));
            }
            Inst::VMovaps { dst, src, mask } => {
                let rm = Rm::Reg(src.index());
                self.evex(Map::M0F, Pp::None, false, dst.index(), 0, rm, mask, false);
                self.code.push(0x28);
                self.modrm_evex(dst.index(), rm);
            }
            Inst::Valignd { dst, a, b, imm } => {
                let rm = Rm::Reg(b.index());
                self.evex(Map::M0F3A, Pp::P66, false, dst.index(), a.index(), rm, None, false);
                self.code.push(0x03);
                self.modrm_evex(dst.index(), rm);
                self.code.push(imm);
            }
            Inst::Vshuff32x4 {
                dst,
                a,
                b,
                imm,
                mask,
            } => {
                let rm = Rm::Reg(b.index());
                self.evex(Map::M0F3A, Pp::P66, false, dst.index(), a.index(), rm, mask, false);
                self.code.push(0x23);
                self.modrm_evex(dst.index(), rm);
                self.code.push(imm);
            }
            Inst::Vshuff64x2 { dst, a, b, imm } => {
                let rm = Rm::Reg(b.index());
                self.evex(Map::M0F3A, Pp::P66, true, dst.index(), a.index(), rm, None, false);
                self.code.push(0x23);
                self.modrm_evex(dst.index(), rm);
                self.code.push(imm);
            }
            Inst::Vpxord { dst, a, b } => {
                let rm = Rm::Reg(b.index());
                self.evex(Map::M0F, Pp::P66, false, dst.index(), a.index(), rm, None, false);
                self.code.push(0xef);
                self.modrm_evex(dst.index(), rm);
            }
            Inst::Vpermps { dst, idx, src } => {
                let rm = Rm::Reg(src.index());
                self.evex(Map::M0F38, Pp::P66, false, dst.index(), idx.index(), rm, None, false);
                self.code.push(0x16);
                self.modrm_evex(dst.index(), rm);
            }
            Inst::Prefetch { hint, mem } => {
                let (opcode, digit) = match hint {
                    PrefetchHint::T0 => (0x18, 1),
                    PrefetchHint::T1 => (0x18, 2),
                    PrefetchHint::Wt1 => (0x0d, 2),
                };
                self.op_rm(false, &[0x0f, opcode], digit, mem);
            }
            Inst::Jcc { .. } | Inst::Jmp(_) => unreachable!("jumps are encoded by the caller"),
        }
    }

    /// Emits a REX prefix when one is needed (or `force`d).
    fn rex(&mut self, w: bool, reg: u8, rm: u8, force: bool) {
        let bits = (u8::from(w) << 3) | (((reg >> 3) & 1) << 2) | ((rm >> 3) & 1);
        if bits != 0 || force {
            self.code.push(0x40 | bits);
        }
    }

    /// `opcode /r` with a register-direct `rm` operand.
    fn op_rr(&mut self, w: bool, opcode: &[u8], reg: u8, rm: Gpr) {
        self.rex(w, reg, rm.index(), false);
        self.code.extend_from_slice(opcode);
        self.code.push(0xc0 | ((reg & 7) << 3) | rm.low3());
    }

    /// `opcode /r` with a memory `rm` operand.
    fn op_rm(&mut self, w: bool, opcode: &[u8], reg: u8, mem: Mem) {
        self.rex(w, reg, mem.base.index(), false);
        self.code.extend_from_slice(opcode);
        self.modrm_mem(reg & 7, mem, 1);
    }

    /// Group-1 ALU op (`add`, `sub`, `cmp`, ...) against an immediate.
    fn alu_imm(&mut self, digit: u8, reg: Gpr, imm: i32) {
        if let Ok(imm8) = i8::try_from(imm) {
            self.op_rr(true, &[0x83], digit, reg);
            self.code.push(imm8 as u8);
        } else {
            self.op_rr(true, &[0x81], digit, reg);
            self.code.extend_from_slice(&imm.to_le_bytes());
        }
    }

    /// ModRM (+SIB, +displacement) for `[base + disp]`. `scale` is the disp8 compression factor.
    fn modrm_mem(&mut self, reg: u8, mem: Mem, scale: i32) {
        let base = mem.base.low3();
        let disp8 = (mem.disp % scale == 0)
            .then(|| i8::try_from(mem.disp / scale).ok())
            .flatten();

        // rbp/r13 as a base cannot use the displacement-free form.
        let mode = if mem.disp == 0 && base != 5 {
            0b00
        } else if disp8.is_some() {
            0b01
        } else {
            0b10
        };

        self.code.push((mode << 6) | (reg << 3) | base);
        // rsp/r12 as a base need a SIB byte with no index.
        if base == 4 {
            self.code.push(0x24);
        }
        match mode {
            0b01 => self.code.push(disp8.unwrap_or_default() as u8),
            0b10 => self.code.extend_from_slice(&mem.disp.to_le_bytes()),
            _ => {}
        }
    }

    fn modrm_evex(&mut self, reg: u8, rm: Rm) {
        match rm {
            Rm::Reg(idx) => self.code.push(0xc0 | ((reg & 7) << 3) | (idx & 7)),
            Rm::Mem(mem) => self.modrm_mem(reg & 7, mem, VECTOR_BYTES),
        }
    }

    /// The four-byte EVEX prefix for a 512-bit operation.
    #[allow(clippy::too_many_arguments)]
    fn evex(
        &mut self,
        map: Map,
        pp: Pp,
        w: bool,
        reg: u8,
        vvvv: u8,
        rm: Rm,
        mask: Option<Opmask>,
        zeroing: bool,
    ) {
        let (b, x) = match rm {
            Rm::Reg(idx) => ((idx >> 3) & 1, (idx >> 4) & 1),
            Rm::Mem(mem) => ((mem.base.index() >> 3) & 1, 0),
        };
        let not = |bit: u8| !bit & 1;

        let p0 = (not(reg >> 3) << 7) | (not(x) << 6) | (not(b) << 5) | (not(reg >> 4) << 4) | map as u8;
        let p1 = (u8::from(w) << 7) | ((!vvvv & 0xf) << 3) | 0b100 | pp as u8;
        let aaa = mask.map_or(0, Opmask::index);
        let z = u8::from(zeroing && mask.is_some());
        let p2 = (z << 7) | (0b10 << 5) | (not(vvvv >> 4) << 3) | aaa;

        self.code.extend_from_slice(&[0x62, p0, p1, p2]);
    }
}
