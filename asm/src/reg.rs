//! Register names.

use core::fmt;

/// A 64-bit general purpose register, numbered as in the x86-64 encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Gpr {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

/// First integer argument register of the System V calling convention.
pub const ABI_PARAM1: Gpr = Gpr::Rdi;

/// Registers a System V callee must preserve. `rsp` is handled by the push/pop discipline.
pub const CALLEE_SAVED: [Gpr; 6] = [Gpr::Rbx, Gpr::Rbp, Gpr::R12, Gpr::R13, Gpr::R14, Gpr::R15];

impl Gpr {
    pub const ALL: [Self; 16] = [
        Self::Rax,
        Self::Rcx,
        Self::Rdx,
        Self::Rbx,
        Self::Rsp,
        Self::Rbp,
        Self::Rsi,
        Self::Rdi,
        Self::R8,
        Self::R9,
        Self::R10,
        Self::R11,
        Self::R12,
        Self::R13,
        Self::R14,
        Self::R15,
    ];

    #[must_use]
    #[inline]
    pub const fn index(self) -> u8 {
        self as u8
    }

    /// The three bits stored in ModRM/SIB; the fourth goes to REX/VEX/EVEX.
    #[must_use]
    #[inline]
    pub const fn low3(self) -> u8 {
        self.index() & 7
    }

    #[must_use]
    #[inline]
    pub const fn is_extended(self) -> bool {
        self.index() >= 8
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        const NAMES: [&str; 16] = [
            "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11",
            "r12", "r13", "r14", "r15",
        ];
        NAMES[self.index() as usize]
    }

    #[must_use]
    pub const fn name32(self) -> &'static str {
        const NAMES: [&str; 16] = [
            "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "r8d", "r9d", "r10d", "r11d",
            "r12d", "r13d", "r14d", "r15d",
        ];
        NAMES[self.index() as usize]
    }
}

impl fmt::Display for Gpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A 512-bit vector register, `zmm0..zmm31`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Zmm(u8);

impl Zmm {
    pub const COUNT: usize = 32;

    /// # Panics
    /// Panics if `index >= 32`.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        assert!(index < Self::COUNT, "zmm register out of range");
        Self(index as u8)
    }

    #[must_use]
    #[inline]
    pub const fn index(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Zmm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zmm{}", self.0)
    }
}

/// An opmask register, `k0..k7`.
///
/// `k0` cannot be used as a write mask: the encoding reserves it for "no masking".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Opmask(u8);

impl Opmask {
    pub const K0: Self = Self(0);
    pub const K1: Self = Self(1);
    pub const K2: Self = Self(2);
    pub const K3: Self = Self(3);
    pub const K4: Self = Self(4);
    pub const K5: Self = Self(5);
    pub const K6: Self = Self(6);
    pub const K7: Self = Self(7);

    #[must_use]
    #[inline]
    pub const fn index(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Opmask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "k{}", self.0)
    }
}
