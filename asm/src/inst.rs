//! The instruction set understood by the encoder and the emulator.
//!
//! This is not a general x86 model. It holds exactly the operations the relayout kernels are built
//! from, each variant mapping to a single machine instruction (or to nothing, for [`Inst::Bind`]).

use core::fmt;

use crate::reg::{Gpr, Opmask, Zmm};

/// A jump target. Created by [`CodeBuilder::new_label`](crate::CodeBuilder::new_label).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Label(pub(crate) usize);

impl Label {
    #[must_use]
    pub const fn id(self) -> usize {
        self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ".L{}", self.0)
    }
}

/// A `[base + disp]` memory operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Mem {
    pub base: Gpr,
    pub disp: i32,
}

impl Mem {
    #[must_use]
    #[inline]
    pub const fn new(base: Gpr, disp: i32) -> Self {
        Self { base, disp }
    }

    #[must_use]
    #[inline]
    pub const fn offset(self, delta: i32) -> Self {
        Self {
            base: self.base,
            disp: self.disp + delta,
        }
    }
}

impl fmt::Display for Mem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.disp {
            0 => write!(f, "[{}]", self.base),
            d if d < 0 => write!(f, "[{} - {:#x}]", self.base, -(d as i64)),
            d => write!(f, "[{} + {:#x}]", self.base, d),
        }
    }
}

/// Branch conditions. Signedness follows the mnemonic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Cond {
    /// `je`
    Eq,
    /// `jne`
    Ne,
    /// `jl`, signed less.
    Lt,
    /// `jbe`, unsigned below-or-equal.
    Be,
}

impl Cond {
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Eq => "je",
            Self::Ne => "jne",
            Self::Lt => "jl",
            Self::Be => "jbe",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrefetchHint {
    /// `prefetcht0`: all cache levels.
    T0,
    /// `prefetcht1`: L2 and outward.
    T1,
    /// `prefetchwt1`: L2 and outward, with intent to write.
    Wt1,
}

impl PrefetchHint {
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::T0 => "prefetcht0",
            Self::T1 => "prefetcht1",
            Self::Wt1 => "prefetchwt1",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Inst {
    /// `mov dst, src`
    MovRR { dst: Gpr, src: Gpr },
    /// `mov dst, imm`
    MovRI { dst: Gpr, imm: u64 },
    /// `mov dst, qword [mem]`
    Load64 { dst: Gpr, mem: Mem },
    /// `mov dst32, dword [mem]`, zero-extending into the full register.
    Load32 { dst: Gpr, mem: Mem },
    /// `mov qword [mem], src`
    Store64 { mem: Mem, src: Gpr },
    /// `mov qword [mem], imm` with a sign-extended 32-bit immediate.
    Store64Imm { mem: Mem, imm: i32 },
    /// `add dst, imm`
    AddRI { dst: Gpr, imm: i32 },
    /// `sub dst, imm`
    SubRI { dst: Gpr, imm: i32 },
    /// `cmp lhs, imm`
    CmpRI { lhs: Gpr, imm: i32 },
    /// `add dst, src`
    AddRR { dst: Gpr, src: Gpr },
    /// `cmp lhs, rhs`
    CmpRR { lhs: Gpr, rhs: Gpr },
    /// `cmp lhs, qword [mem]`
    CmpRM { lhs: Gpr, mem: Mem },
    /// `imul dst, src, imm`
    ImulRRI { dst: Gpr, src: Gpr, imm: i32 },
    /// `inc reg`
    Inc(Gpr),
    /// `lock xadd qword [mem], src`
    LockXadd { mem: Mem, src: Gpr },
    /// `push reg`
    Push(Gpr),
    /// `pop reg`
    Pop(Gpr),
    /// `pause`
    Pause,
    /// `jcc target`
    Jcc { cond: Cond, target: Label },
    /// `jmp target`
    Jmp(Label),
    /// Binds a label to the current position. Emits no code.
    Bind(Label),
    /// `ret`
    Ret,
    /// `vzeroupper`
    Vzeroupper,
    /// `kmovw dst, src32`
    Kmovw { dst: Opmask, src: Gpr },
    /// `vmovups dst{mask}{z}, zmmword [mem]`. Masked-off lanes are zeroed and never read.
    VLoad {
        dst: Zmm,
        mem: Mem,
        mask: Option<Opmask>,
    },
    /// `vmovups zmmword [mem]{mask}, src`. Masked-off lanes are not written.
    VStore {
        mem: Mem,
        src: Zmm,
        mask: Option<Opmask>,
    },
    /// `vmovntps zmmword [mem], src`
    VStoreNt { mem: Mem, src: Zmm },
    /// `vmovaps dst{mask}, src`. Masked-off lanes keep their value.
    VMovaps {
        dst: Zmm,
        src: Zmm,
        mask: Option<Opmask>,
    },
    /// `valignd dst, a, b, imm`: the low 16 lanes of `(a:b) >> (32 * imm)`.
    Valignd { dst: Zmm, a: Zmm, b: Zmm, imm: u8 },
    /// `vshuff32x4 dst{mask}, a, b, imm`. Masked-off lanes keep their value.
    Vshuff32x4 {
        dst: Zmm,
        a: Zmm,
        b: Zmm,
        imm: u8,
        mask: Option<Opmask>,
    },
    /// `vshuff64x2 dst, a, b, imm`
    Vshuff64x2 { dst: Zmm, a: Zmm, b: Zmm, imm: u8 },
    /// `vpxord dst, a, b`
    Vpxord { dst: Zmm, a: Zmm, b: Zmm },
    /// `vpermps dst, idx, src`: `dst[i] = src[idx[i] % 16]`.
    Vpermps { dst: Zmm, idx: Zmm, src: Zmm },
    /// Software prefetch. Has no architectural effect.
    Prefetch { hint: PrefetchHint, mem: Mem },
}

struct MaskSuffix(Option<Opmask>, bool);

impl fmt::Display for MaskSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(k) = self.0 {
            write!(f, "{{{k}}}")?;
            if self.1 {
                f.write_str("{z}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::MovRR { dst, src } => write!(f, "mov {dst}, {src}"),
            Self::MovRI { dst, imm } => write!(f, "mov {dst}, {imm:#x}"),
            Self::Load64 { dst, mem } => write!(f, "mov {dst}, qword {mem}"),
            Self::Load32 { dst, mem } => write!(f, "mov {}, dword {mem}", dst.name32()),
            Self::Store64 { mem, src } => write!(f, "mov qword {mem}, {src}"),
            Self::Store64Imm { mem, imm } => write!(f, "mov qword {mem}, {imm}"),
            Self::AddRI { dst, imm } => write!(f, "add {dst}, {imm:#x}"),
            Self::SubRI { dst, imm } => write!(f, "sub {dst}, {imm:#x}"),
            Self::CmpRI { lhs, imm } => write!(f, "cmp {lhs}, {imm:#x}"),
            Self::AddRR { dst, src } => write!(f, "add {dst}, {src}"),
            Self::CmpRR { lhs, rhs } => write!(f, "cmp {lhs}, {rhs}"),
            Self::CmpRM { lhs, mem } => write!(f, "cmp {lhs}, qword {mem}"),
            Self::ImulRRI { dst, src, imm } => write!(f, "imul {dst}, {src}, {imm:#x}"),
            Self::Inc(reg) => write!(f, "inc {reg}"),
            Self::LockXadd { mem, src } => write!(f, "lock xadd qword {mem}, {src}"),
            Self::Push(reg) => write!(f, "push {reg}"),
            Self::Pop(reg) => write!(f, "pop {reg}"),
            Self::Pause => f.write_str("pause"),
            Self::Jcc { cond, target } => write!(f, "{} {target}", cond.mnemonic()),
            Self::Jmp(target) => write!(f, "jmp {target}"),
            Self::Bind(label) => write!(f, "{label}:"),
            Self::Ret => f.write_str("ret"),
            Self::Vzeroupper => f.write_str("vzeroupper"),
            Self::Kmovw { dst, src } => write!(f, "kmovw {dst}, {}", src.name32()),
            Self::VLoad { dst, mem, mask } => {
                write!(f, "vmovups {dst}{}, zmmword {mem}", MaskSuffix(mask, true))
            }
            Self::VStore { mem, src, mask } => {
                write!(f, "vmovups zmmword {mem}{}, {src}", MaskSuffix(mask, false))
            }
            Self::VStoreNt { mem, src } => write!(f, "vmovntps zmmword {mem}, {src}"),
            Self::VMovaps { dst, src, mask } => {
                write!(f, "vmovaps {dst}{}, {src}", MaskSuffix(mask, false))
            }
            Self::Valignd { dst, a, b, imm } => write!(f, "valignd {dst}, {a}, {b}, {imm:#x}"),
            Self::Vshuff32x4 {
                dst,
                a,
                b,
                imm,
                mask,
            } => write!(
                f,
                "vshuff32x4 {dst}{}, {a}, {b}, {imm:#x}",
                MaskSuffix(mask, false)
            ),
            Self::Vshuff64x2 { dst, a, b, imm } => {
                write!(f, "vshuff64x2 {dst}, {a}, {b}, {imm:#x}")
            }
            Self::Vpxord { dst, a, b } => write!(f, "vpxord {dst}, {a}, {b}"),
            Self::Vpermps { dst, idx, src } => write!(f, "vpermps {dst}, {idx}, {src}"),
            Self::Prefetch { hint, mem } => write!(f, "{} byte {mem}", hint.mnemonic()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let mem = Mem::new(Gpr::R9, 0x40);
        assert_eq!(mem.to_string(), "[r9 + 0x40]");
        assert_eq!(mem.offset(-0x80).to_string(), "[r9 - 0x40]");

        let load = Inst::VLoad {
            dst: Zmm::new(3),
            mem: Mem::new(Gpr::R8, 0),
            mask: Some(Opmask::K7),
        };
        assert_eq!(load.to_string(), "vmovups zmm3{k7}{z}, zmmword [r8]");

        let store = Inst::VStore {
            mem: Mem::new(Gpr::R13, 0x100),
            src: Zmm::new(16),
            mask: Some(Opmask::K7),
        };
        assert_eq!(store.to_string(), "vmovups zmmword [r13 + 0x100]{k7}, zmm16");

        let kmov = Inst::Kmovw {
            dst: Opmask::K1,
            src: Gpr::R14,
        };
        assert_eq!(kmov.to_string(), "kmovw k1, r14d");
    }
}
