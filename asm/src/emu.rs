//! A software model of the instruction set.
//!
//! The emulator runs a [`Program`] against real memory: loads and stores go through the pointers
//! held in the emulated registers, exactly like the machine code would. 64-bit general purpose
//! memory accesses and `lock xadd` go through atomics, so several emulated workers on separate
//! threads can rendezvous on the same barrier state as native code would.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::builder::Program;
use crate::inst::{Cond, Inst, Mem};
use crate::reg::{ABI_PARAM1, Gpr, Opmask, Zmm};

const LANES: usize = 16;

type Vector = [u32; LANES];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Flags {
    zf: bool,
    sf: bool,
    cf: bool,
    of: bool,
}

impl Flags {
    fn sub(a: u64, b: u64) -> (u64, Self) {
        let res = a.wrapping_sub(b);
        let flags = Self {
            zf: res == 0,
            sf: (res as i64) < 0,
            cf: a < b,
            of: ((a ^ b) & (a ^ res)) >> 63 == 1,
        };
        (res, flags)
    }

    fn add(a: u64, b: u64) -> (u64, Self) {
        let (res, cf) = a.overflowing_add(b);
        let flags = Self {
            zf: res == 0,
            sf: (res as i64) < 0,
            cf,
            of: ((a ^ res) & (b ^ res)) >> 63 == 1,
        };
        (res, flags)
    }

    fn holds(self, cond: Cond) -> bool {
        match cond {
            Cond::Eq => self.zf,
            Cond::Ne => !self.zf,
            Cond::Lt => self.sf != self.of,
            Cond::Be => self.cf || self.zf,
        }
    }
}

/// Architectural state of one emulated hardware thread.
#[derive(Clone, Debug)]
pub struct Machine {
    gpr: [u64; 16],
    zmm: [Vector; Zmm::COUNT],
    k: [u16; 8],
    flags: Flags,
    stack: Vec<u64>,
    retired: u64,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            gpr: [0; 16],
            zmm: [[0; LANES]; Zmm::COUNT],
            k: [0; 8],
            flags: Flags::default(),
            stack: Vec::new(),
            retired: 0,
        }
    }

    #[must_use]
    pub fn gpr(&self, reg: Gpr) -> u64 {
        self.gpr[reg.index() as usize]
    }

    pub fn set_gpr(&mut self, reg: Gpr, value: u64) {
        self.gpr[reg.index() as usize] = value;
    }

    #[must_use]
    pub fn zmm(&self, reg: Zmm) -> [u32; LANES] {
        self.zmm[reg.index() as usize]
    }

    pub fn set_zmm(&mut self, reg: Zmm, value: [u32; LANES]) {
        self.zmm[reg.index() as usize] = value;
    }

    #[must_use]
    pub fn opmask(&self, k: Opmask) -> u16 {
        self.k[k.index() as usize]
    }

    /// Instructions retired since construction, label bindings excluded.
    #[must_use]
    pub fn retired(&self) -> u64 {
        self.retired
    }

    /// Calls `program` as a function with `arg` in the first argument register.
    ///
    /// Returns when the outermost `ret` executes or the program runs off its end.
    ///
    /// # Safety
    /// Every memory access the program performs must be valid, exactly as if the program were
    /// executed natively.
    ///
    /// # Panics
    /// Panics if the program pops more than it pushed, or returns with pushes outstanding.
    pub unsafe fn call(&mut self, program: &Program, arg: u64) {
        self.set_gpr(ABI_PARAM1, arg);
        let depth = self.stack.len();
        let insts = program.insts();
        let mut pc = 0;

        while let Some(inst) = insts.get(pc) {
            pc += 1;
            match *inst {
                Inst::Jcc { cond, target } => {
                    if self.flags.holds(cond) {
                        pc = program.label_position(target);
                    }
                }
                Inst::Jmp(target) => pc = program.label_position(target),
                Inst::Ret => {
                    self.retired += 1;
                    if self.stack.len() == depth {
                        return;
                    }
                    // Nested returns never occur in generated code.
                    unreachable!("ret with {} unbalanced pushes", self.stack.len() - depth);
                }
                Inst::Bind(_) => continue,
                ref other => unsafe { self.step(other) },
            }
            self.retired += 1;
        }
    }

    fn addr(&self, mem: Mem) -> u64 {
        self.gpr(mem.base).wrapping_add(mem.disp as i64 as u64)
    }

    /// Executes one straight-line instruction.
    unsafe fn step(&mut self, inst: &Inst) {
        match *inst {
            Inst::MovRR { dst, src } => self.set_gpr(dst, self.gpr(src)),
            Inst::MovRI { dst, imm } => self.set_gpr(dst, imm),
            Inst::Load64 { dst, mem } => {
                let value = unsafe { atomic_at(self.addr(mem)) }.load(Ordering::SeqCst);
                self.set_gpr(dst, value);
            }
            Inst::Load32 { dst, mem } => {
                let value = unsafe { (self.addr(mem) as *const u32).read_unaligned() };
                self.set_gpr(dst, u64::from(value));
            }
            Inst::Store64 { mem, src } => {
                unsafe { atomic_at(self.addr(mem)) }.store(self.gpr(src), Ordering::SeqCst);
            }
            Inst::Store64Imm { mem, imm } => {
                unsafe { atomic_at(self.addr(mem)) }.store(imm as i64 as u64, Ordering::SeqCst);
            }
            Inst::AddRI { dst, imm } => {
                let (res, flags) = Flags::add(self.gpr(dst), imm as i64 as u64);
                self.set_gpr(dst, res);
                self.flags = flags;
            }
            Inst::SubRI { dst, imm } => {
                let (res, flags) = Flags::sub(self.gpr(dst), imm as i64 as u64);
                self.set_gpr(dst, res);
                self.flags = flags;
            }
            Inst::CmpRI { lhs, imm } => {
                self.flags = Flags::sub(self.gpr(lhs), imm as i64 as u64).1;
            }
            Inst::AddRR { dst, src } => {
                let (res, flags) = Flags::add(self.gpr(dst), self.gpr(src));
                self.set_gpr(dst, res);
                self.flags = flags;
            }
            Inst::CmpRR { lhs, rhs } => {
                self.flags = Flags::sub(self.gpr(lhs), self.gpr(rhs)).1;
            }
            Inst::CmpRM { lhs, mem } => {
                let rhs = unsafe { atomic_at(self.addr(mem)) }.load(Ordering::SeqCst);
                self.flags = Flags::sub(self.gpr(lhs), rhs).1;
            }
            Inst::ImulRRI { dst, src, imm } => {
                let res = (self.gpr(src) as i64).wrapping_mul(i64::from(imm));
                self.set_gpr(dst, res as u64);
            }
            Inst::Inc(reg) => {
                let cf = self.flags.cf;
                let (res, flags) = Flags::add(self.gpr(reg), 1);
                self.set_gpr(reg, res);
                self.flags = Flags { cf, ..flags };
            }
            Inst::LockXadd { mem, src } => {
                let addend = self.gpr(src);
                let old = unsafe { atomic_at(self.addr(mem)) }.fetch_add(addend, Ordering::SeqCst);
                self.flags = Flags::add(old, addend).1;
                self.set_gpr(src, old);
            }
            Inst::Push(reg) => self.stack.push(self.gpr(reg)),
            Inst::Pop(reg) => {
                let Some(value) = self.stack.pop() else {
                    unreachable!("pop from an empty emulated stack")
                };
                self.set_gpr(reg, value);
            }
            Inst::Pause => {
                core::hint::spin_loop();
                // Emulated waiters are far slower than native ones; let the arriving workers run.
                std::thread::yield_now();
            }
            Inst::Vzeroupper | Inst::Prefetch { .. } => {}
            Inst::Kmovw { dst, src } => self.k[dst.index() as usize] = self.gpr(src) as u16,
            Inst::VLoad { dst, mem, mask } => {
                let base = self.addr(mem);
                let mask = self.mask_bits(mask);
                let value = core::array::from_fn(|lane| {
                    if (mask >> lane) & 1 == 1 {
                        unsafe { lane_ptr(base, lane).read_unaligned() }
                    } else {
                        0
                    }
                });
                self.set_zmm(dst, value);
            }
            Inst::VStore { mem, src, mask } => {
                let base = self.addr(mem);
                let mask = self.mask_bits(mask);
                let value = self.zmm(src);
                for (lane, &elem) in value.iter().enumerate() {
                    if (mask >> lane) & 1 == 1 {
                        unsafe { lane_ptr(base, lane).cast_mut().write_unaligned(elem) };
                    }
                }
            }
            Inst::VStoreNt { mem, src } => {
                let base = self.addr(mem);
                debug_assert_eq!(base % 64, 0, "vmovntps requires a 64-byte aligned address");
                let value = self.zmm(src);
                for (lane, &elem) in value.iter().enumerate() {
                    unsafe { lane_ptr(base, lane).cast_mut().write_unaligned(elem) };
                }
            }
            Inst::VMovaps { dst, src, mask } => {
                let value = self.zmm(src);
                self.merge_dwords(dst, value, mask);
            }
            Inst::Valignd { dst, a, b, imm } => {
                let (a, b) = (self.zmm(a), self.zmm(b));
                let shift = (imm as usize) % LANES;
                let value = core::array::from_fn(|lane| {
                    let src = lane + shift;
                    if src < LANES { b[src] } else { a[src - LANES] }
                });
                self.set_zmm(dst, value);
            }
            Inst::Vshuff32x4 {
                dst,
                a,
                b,
                imm,
                mask,
            } => {
                let value = shuffle_blocks(self.zmm(a), self.zmm(b), imm);
                self.merge_dwords(dst, value, mask);
            }
            Inst::Vshuff64x2 { dst, a, b, imm } => {
                // Same 128-bit block selection; the two differ only in write-mask granularity.
                let value = shuffle_blocks(self.zmm(a), self.zmm(b), imm);
                self.set_zmm(dst, value);
            }
            Inst::Vpxord { dst, a, b } => {
                let (a, b) = (self.zmm(a), self.zmm(b));
                self.set_zmm(dst, core::array::from_fn(|lane| a[lane] ^ b[lane]));
            }
            Inst::Vpermps { dst, idx, src } => {
                let (idx, src) = (self.zmm(idx), self.zmm(src));
                self.set_zmm(
                    dst,
                    core::array::from_fn(|lane| src[idx[lane] as usize % LANES]),
                );
            }
            Inst::Jcc { .. } | Inst::Jmp(_) | Inst::Bind(_) | Inst::Ret => {
                unreachable!("control flow is handled by the caller")
            }
        }
    }

    fn mask_bits(&self, mask: Option<Opmask>) -> u16 {
        mask.map_or(u16::MAX, |k| self.opmask(k))
    }

    fn merge_dwords(&mut self, dst: Zmm, value: Vector, mask: Option<Opmask>) {
        let mask = self.mask_bits(mask);
        let mut out = self.zmm(dst);
        for (lane, slot) in out.iter_mut().enumerate() {
            if (mask >> lane) & 1 == 1 {
                *slot = value[lane];
            }
        }
        self.set_zmm(dst, out);
    }
}

/// `vshuff32x4`/`vshuff64x2` block selection: the two low destination blocks come from `a`, the
/// two high ones from `b`, each chosen by a two-bit field of `imm`.
fn shuffle_blocks(a: Vector, b: Vector, imm: u8) -> Vector {
    core::array::from_fn(|lane| {
        let block = lane / 4;
        let sel = ((imm >> (2 * block)) & 3) as usize;
        let src = if block < 2 { &a } else { &b };
        src[sel * 4 + lane % 4]
    })
}

#[inline]
fn lane_ptr(base: u64, lane: usize) -> *const u32 {
    base.wrapping_add(4 * lane as u64) as *const u32
}

/// # Safety
/// `addr` must be valid, 8-byte aligned and live for the duration of the access.
#[inline]
unsafe fn atomic_at<'a>(addr: u64) -> &'a AtomicU64 {
    debug_assert_eq!(addr % 8, 0, "unaligned 64-bit access at {addr:#x}");
    unsafe { &*(addr as *const AtomicU64) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CodeBuilder;

    fn run(b: CodeBuilder, machine: &mut Machine, arg: u64) {
        let program = b.finish().unwrap();
        unsafe { machine.call(&program, arg) };
    }

    fn iota(start: u32) -> [u32; 16] {
        core::array::from_fn(|i| start + i as u32)
    }

    #[test]
    #[should_panic(expected = "pop from an empty emulated stack")]
    fn test_unbalanced_pop_panics() {
        let mut b = CodeBuilder::new();
        b.pop(Gpr::Rax);
        run(b, &mut Machine::new(), 0);
    }

    #[test]
    fn test_valignd_rotates() {
        let mut m = Machine::new();
        m.set_zmm(Zmm::new(0), iota(0));
        let mut b = CodeBuilder::new();
        b.valignd(Zmm::new(1), Zmm::new(0), Zmm::new(0), 1);
        b.valignd(Zmm::new(2), Zmm::new(0), Zmm::new(0), 0xf);
        run(b, &mut m, 0);
        assert_eq!(m.zmm(Zmm::new(1))[0], 1);
        assert_eq!(m.zmm(Zmm::new(1))[15], 0);
        assert_eq!(m.zmm(Zmm::new(2))[0], 15);
        assert_eq!(m.zmm(Zmm::new(2))[1], 0);
    }

    #[test]
    fn test_shuffles() {
        let mut m = Machine::new();
        m.set_zmm(Zmm::new(0), iota(0));
        m.set_zmm(Zmm::new(1), iota(100));
        let mut b = CodeBuilder::new();
        b.vshuff64x2(Zmm::new(2), Zmm::new(0), Zmm::new(1), 0x44);
        b.vshuff64x2(Zmm::new(3), Zmm::new(0), Zmm::new(1), 0xee);
        b.vshuff32x4(Zmm::new(4), None, Zmm::new(0), Zmm::new(0), 0xb1);
        run(b, &mut m, 0);

        let lo: Vec<u32> = (0..8).chain(100..108).collect();
        let hi: Vec<u32> = (8..16).chain(108..116).collect();
        assert_eq!(m.zmm(Zmm::new(2)).to_vec(), lo);
        assert_eq!(m.zmm(Zmm::new(3)).to_vec(), hi);
        assert_eq!(
            m.zmm(Zmm::new(4)),
            [4, 5, 6, 7, 0, 1, 2, 3, 12, 13, 14, 15, 8, 9, 10, 11]
        );
    }

    #[test]
    fn test_masked_merge_and_zeroing() {
        let src: [u32; 16] = iota(1);
        let mut m = Machine::new();
        m.set_zmm(Zmm::new(0), [0xdead; 16]);
        m.set_zmm(Zmm::new(1), iota(50));

        let mut b = CodeBuilder::new();
        b.kmovw_imm(Opmask::K1, Gpr::Rax, 0x00ff);
        b.vmovups_load(Zmm::new(0), Mem::new(Gpr::Rdi, 0), Some(Opmask::K1));
        b.kmovw_imm(Opmask::K2, Gpr::Rax, 0xaaaa);
        b.vmovaps(Zmm::new(1), Zmm::new(0), Some(Opmask::K2));
        run(b, &mut m, src.as_ptr() as u64);

        let loaded = m.zmm(Zmm::new(0));
        assert_eq!(&loaded[..8], &src[..8]);
        assert!(loaded[8..].iter().all(|&x| x == 0));

        let merged = m.zmm(Zmm::new(1));
        for (lane, &x) in merged.iter().enumerate() {
            let expected = if lane % 2 == 1 { loaded[lane] } else { 50 + lane as u32 };
            assert_eq!(x, expected);
        }
    }

    #[test]
    fn test_masked_store_leaves_other_lanes() {
        let mut dst = [7u32; 16];
        let mut m = Machine::new();
        m.set_zmm(Zmm::new(5), iota(0));
        let mut b = CodeBuilder::new();
        b.kmovw_imm(Opmask::K7, Gpr::R14, 0x000f);
        b.vmovups_store(Mem::new(Gpr::Rdi, 0), Zmm::new(5), Some(Opmask::K7));
        run(b, &mut m, dst.as_mut_ptr() as u64);
        assert_eq!(&dst[..4], &[0, 1, 2, 3]);
        assert!(dst[4..].iter().all(|&x| x == 7));
    }

    #[test]
    fn test_vpermps() {
        let mut m = Machine::new();
        m.set_zmm(Zmm::new(0), iota(10));
        m.set_zmm(Zmm::new(31), core::array::from_fn(|i| (15 - i) as u32));
        let mut b = CodeBuilder::new();
        b.vpermps(Zmm::new(1), Zmm::new(31), Zmm::new(0));
        run(b, &mut m, 0);
        assert_eq!(m.zmm(Zmm::new(1)), core::array::from_fn(|i| 25 - i as u32));
    }

    #[test]
    fn test_counted_loop() {
        let mut m = Machine::new();
        let mut b = CodeBuilder::new();
        let top = b.new_label();
        b.mov_imm(Gpr::R12, 5);
        b.mov_imm(Gpr::Rax, 0);
        b.bind(top);
        b.add_imm(Gpr::Rax, 3);
        b.sub_imm(Gpr::R12, 1);
        b.jcc(Cond::Ne, top);
        run(b, &mut m, 0);
        assert_eq!(m.gpr(Gpr::Rax), 15);
        assert_eq!(m.gpr(Gpr::R12), 0);
    }

    #[test]
    fn test_signed_and_unsigned_conditions() {
        assert!(Flags::sub(3, 5).1.holds(Cond::Lt));
        assert!(!Flags::sub(5, 3).1.holds(Cond::Lt));
        assert!(Flags::sub(1, 1).1.holds(Cond::Be));
        assert!(Flags::sub(0, 1).1.holds(Cond::Be));
        assert!(!Flags::sub(2, 1).1.holds(Cond::Be));
        assert!(Flags::sub((-1i64) as u64, 0).1.holds(Cond::Lt));
    }

    #[test]
    fn test_preamble_restores_registers() {
        let mut m = Machine::new();
        m.set_gpr(Gpr::Rbx, 11);
        m.set_gpr(Gpr::R12, 12);
        let mut b = CodeBuilder::new();
        b.preamble();
        b.mov_imm(Gpr::Rbx, 0);
        b.mov_imm(Gpr::R12, 0);
        b.postamble();
        run(b, &mut m, 0);
        assert_eq!(m.gpr(Gpr::Rbx), 11);
        assert_eq!(m.gpr(Gpr::R12), 12);
    }

    #[test]
    fn test_lock_xadd_returns_old_value() {
        let counter = AtomicU64::new(4);
        let mut m = Machine::new();
        let mut b = CodeBuilder::new();
        b.mov_imm(Gpr::Rdx, 1);
        b.lock_xadd(Mem::new(Gpr::Rdi, 0), Gpr::Rdx);
        run(b, &mut m, &counter as *const AtomicU64 as u64);
        assert_eq!(m.gpr(Gpr::Rdx), 4);
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }
}
