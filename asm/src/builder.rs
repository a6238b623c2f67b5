//! Instruction-stream construction.

use core::fmt;

use tracing::trace;

use crate::error::{AsmError, AsmResult};
use crate::inst::{Cond, Inst, Label, Mem, PrefetchHint};
use crate::reg::{CALLEE_SAVED, Gpr, Opmask, Zmm};

/// Collects instructions in emission order.
///
/// Method names follow the mnemonics. Operand order is Intel order: destination first, and for
/// three-operand vector instructions `(dst, vvvv, rm)`.
#[derive(Debug, Default)]
pub struct CodeBuilder {
    insts: Vec<Inst>,
    num_labels: usize,
}

impl CodeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instructions emitted so far, label bindings included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.insts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    #[inline]
    pub fn emit(&mut self, inst: Inst) {
        self.insts.push(inst);
    }

    #[must_use]
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.num_labels);
        self.num_labels += 1;
        label
    }

    pub fn bind(&mut self, label: Label) {
        self.emit(Inst::Bind(label));
    }

    /// Saves every callee-saved register so generators may use them freely.
    pub fn preamble(&mut self) {
        for reg in CALLEE_SAVED {
            self.push(reg);
        }
    }

    /// Undoes [`Self::preamble`] and returns.
    pub fn postamble(&mut self) {
        self.emit(Inst::Vzeroupper);
        for reg in CALLEE_SAVED.into_iter().rev() {
            self.pop(reg);
        }
        self.emit(Inst::Ret);
    }

    pub fn mov(&mut self, dst: Gpr, src: Gpr) {
        self.emit(Inst::MovRR { dst, src });
    }

    pub fn mov_imm(&mut self, dst: Gpr, imm: u64) {
        self.emit(Inst::MovRI { dst, imm });
    }

    pub fn load_q(&mut self, dst: Gpr, mem: Mem) {
        self.emit(Inst::Load64 { dst, mem });
    }

    pub fn load_d(&mut self, dst: Gpr, mem: Mem) {
        self.emit(Inst::Load32 { dst, mem });
    }

    pub fn store_q(&mut self, mem: Mem, src: Gpr) {
        self.emit(Inst::Store64 { mem, src });
    }

    pub fn store_q_imm(&mut self, mem: Mem, imm: i32) {
        self.emit(Inst::Store64Imm { mem, imm });
    }

    /// `add dst, imm`. A zero immediate emits nothing.
    pub fn add_imm(&mut self, dst: Gpr, imm: i32) {
        if imm != 0 {
            self.emit(Inst::AddRI { dst, imm });
        }
    }

    pub fn sub_imm(&mut self, dst: Gpr, imm: i32) {
        self.emit(Inst::SubRI { dst, imm });
    }

    pub fn cmp_imm(&mut self, lhs: Gpr, imm: i32) {
        self.emit(Inst::CmpRI { lhs, imm });
    }

    pub fn add(&mut self, dst: Gpr, src: Gpr) {
        self.emit(Inst::AddRR { dst, src });
    }

    pub fn cmp(&mut self, lhs: Gpr, rhs: Gpr) {
        self.emit(Inst::CmpRR { lhs, rhs });
    }

    pub fn cmp_mem(&mut self, lhs: Gpr, mem: Mem) {
        self.emit(Inst::CmpRM { lhs, mem });
    }

    pub fn imul_imm(&mut self, dst: Gpr, src: Gpr, imm: i32) {
        self.emit(Inst::ImulRRI { dst, src, imm });
    }

    pub fn inc(&mut self, reg: Gpr) {
        self.emit(Inst::Inc(reg));
    }

    pub fn lock_xadd(&mut self, mem: Mem, src: Gpr) {
        self.emit(Inst::LockXadd { mem, src });
    }

    pub fn push(&mut self, reg: Gpr) {
        self.emit(Inst::Push(reg));
    }

    pub fn pop(&mut self, reg: Gpr) {
        self.emit(Inst::Pop(reg));
    }

    pub fn pause(&mut self) {
        self.emit(Inst::Pause);
    }

    pub fn jcc(&mut self, cond: Cond, target: Label) {
        self.emit(Inst::Jcc { cond, target });
    }

    pub fn jmp(&mut self, target: Label) {
        self.emit(Inst::Jmp(target));
    }

    pub fn kmovw(&mut self, dst: Opmask, src: Gpr) {
        self.emit(Inst::Kmovw { dst, src });
    }

    /// Loads the constant `bits` into `dst`, going through the scratch register `tmp`.
    pub fn kmovw_imm(&mut self, dst: Opmask, tmp: Gpr, bits: u16) {
        self.mov_imm(tmp, u64::from(bits));
        self.kmovw(dst, tmp);
    }

    /// `vmovups dst{mask}{z}, [mem]`
    pub fn vmovups_load(&mut self, dst: Zmm, mem: Mem, mask: Option<Opmask>) {
        debug_assert_ne!(mask, Some(Opmask::K0));
        self.emit(Inst::VLoad { dst, mem, mask });
    }

    /// `vmovups [mem]{mask}, src`
    pub fn vmovups_store(&mut self, mem: Mem, src: Zmm, mask: Option<Opmask>) {
        debug_assert_ne!(mask, Some(Opmask::K0));
        self.emit(Inst::VStore { mem, src, mask });
    }

    pub fn vmovntps(&mut self, mem: Mem, src: Zmm) {
        self.emit(Inst::VStoreNt { mem, src });
    }

    pub fn vmovaps(&mut self, dst: Zmm, src: Zmm, mask: Option<Opmask>) {
        debug_assert_ne!(mask, Some(Opmask::K0));
        self.emit(Inst::VMovaps { dst, src, mask });
    }

    pub fn valignd(&mut self, dst: Zmm, a: Zmm, b: Zmm, imm: u8) {
        self.emit(Inst::Valignd { dst, a, b, imm });
    }

    pub fn vshuff32x4(&mut self, dst: Zmm, mask: Option<Opmask>, a: Zmm, b: Zmm, imm: u8) {
        debug_assert_ne!(mask, Some(Opmask::K0));
        self.emit(Inst::Vshuff32x4 {
            dst,
            a,
            b,
            imm,
            mask,
        });
    }

    pub fn vshuff64x2(&mut self, dst: Zmm, a: Zmm, b: Zmm, imm: u8) {
        self.emit(Inst::Vshuff64x2 { dst, a, b, imm });
    }

    pub fn vpxord(&mut self, dst: Zmm, a: Zmm, b: Zmm) {
        self.emit(Inst::Vpxord { dst, a, b });
    }

    pub fn vpermps(&mut self, dst: Zmm, idx: Zmm, src: Zmm) {
        self.emit(Inst::Vpermps { dst, idx, src });
    }

    pub fn prefetch(&mut self, hint: PrefetchHint, mem: Mem) {
        self.emit(Inst::Prefetch { hint, mem });
    }

    /// Resolves labels and freezes the instruction stream.
    pub fn finish(self) -> AsmResult<Program> {
        let mut labels = vec![None; self.num_labels];
        for (pos, inst) in self.insts.iter().enumerate() {
            if let Inst::Bind(label) = inst {
                let slot = &mut labels[label.0];
                if slot.is_some() {
                    return Err(AsmError::LabelRebound(label.0));
                }
                *slot = Some(pos);
            }
        }

        for inst in &self.insts {
            let target = match inst {
                Inst::Jcc { target, .. } | Inst::Jmp(target) => target,
                _ => continue,
            };
            if labels[target.0].is_none() {
                return Err(AsmError::UnboundLabel(target.0));
            }
        }

        // Labels that are allocated but never bound nor referenced are harmless; park them at 0.
        let labels = labels.into_iter().map(|pos| pos.unwrap_or(0)).collect();
        trace!(insts = self.insts.len(), "program finished");
        Ok(Program {
            insts: self.insts,
            labels,
        })
    }
}

/// A finished instruction stream with every referenced label bound.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Program {
    insts: Vec<Inst>,
    labels: Vec<usize>,
}

impl Program {
    #[must_use]
    pub fn insts(&self) -> &[Inst] {
        &self.insts
    }

    /// Index in [`Self::insts`] of the `Bind` for `label`.
    #[must_use]
    #[inline]
    pub fn label_position(&self, label: Label) -> usize {
        self.labels[label.0]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.insts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    /// Number of instructions of the given kind, for statistics and tests.
    #[must_use]
    pub fn count(&self, pred: impl Fn(&Inst) -> bool) -> usize {
        self.insts.iter().filter(|inst| pred(inst)).count()
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for inst in &self.insts {
            match inst {
                Inst::Bind(_) => writeln!(f, "{inst}")?,
                _ => writeln!(f, "    {inst}")?,
            }
        }
        Ok(())
    }
}
