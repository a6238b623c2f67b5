//! Runs the same program natively and on the emulator and compares every byte it writes.

use proptest::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tj_asm::{CodeBuilder, Cond, Gpr, Machine, Mem, Opmask, PrefetchHint, Program, Zmm};

const OUT_WORDS: usize = 320;

#[repr(C, align(64))]
struct Input([u32; 48]);

#[repr(C, align(64))]
struct Output([u32; OUT_WORDS]);

#[repr(C)]
struct Args {
    src: *const u32,
    dst: *mut u32,
}

/// Touches every instruction form with both low and extended registers.
fn kitchen_sink() -> Program {
    use Gpr::*;

    let (src, dst, alt) = (R8, R13, R12);
    let mut b = CodeBuilder::new();
    b.preamble();
    b.load_q(src, Mem::new(Rdi, 0));
    b.load_q(dst, Mem::new(Rdi, 8));
    b.mov(alt, src);
    b.kmovw_imm(Opmask::K1, R14, 0x00ff);
    b.kmovw_imm(Opmask::K6, R14, 0xa5a5);

    let (a, z17, z9, idx) = (Zmm::new(0), Zmm::new(17), Zmm::new(9), Zmm::new(30));
    b.vmovups_load(a, Mem::new(src, 0), None);
    b.vmovups_load(z17, Mem::new(alt, 64), None);
    b.vmovups_load(z9, Mem::new(src, 64), Some(Opmask::K1));
    b.vmovups_load(idx, Mem::new(alt, 128), None);
    b.vmovups_store(Mem::new(dst, 0), z9, None);

    b.valignd(Zmm::new(2), a, z17, 3);
    b.vpxord(Zmm::new(3), Zmm::new(3), Zmm::new(3));
    b.vshuff32x4(Zmm::new(3), Some(Opmask::K6), a, z17, 0x4e);
    b.vshuff64x2(Zmm::new(20), z17, a, 0xb1);
    b.vpermps(Zmm::new(21), idx, a);
    b.vmovaps(z9, z17, Some(Opmask::K6));
    b.vmovaps(Zmm::new(22), Zmm::new(2), None);

    for (i, reg) in [2, 3, 20, 21, 9, 22].into_iter().enumerate() {
        b.vmovups_store(Mem::new(dst, 64 * (i as i32 + 1)), Zmm::new(reg), None);
    }
    b.vmovups_store(Mem::new(dst, 448), Zmm::new(20), Some(Opmask::K1));
    b.vmovntps(Mem::new(dst, 512), Zmm::new(21));
    b.vmovups_store(Mem::new(dst, 580), Zmm::new(3), None);

    b.prefetch(PrefetchHint::T0, Mem::new(src, 0));
    b.prefetch(PrefetchHint::T1, Mem::new(alt, 64));
    b.prefetch(PrefetchHint::Wt1, Mem::new(dst, 1024));

    b.mov_imm(Rax, 0);
    b.mov_imm(R15, 5);
    let top = b.new_label();
    b.bind(top);
    b.add_imm(Rax, 7);
    b.sub_imm(R15, 1);
    b.jcc(Cond::Ne, top);
    b.imul_imm(Rdx, Rax, 3);
    b.inc(Rdx);
    b.store_q(Mem::new(dst, 1024), Rdx);

    b.store_q_imm(Mem::new(dst, 1032), -2);
    b.mov_imm(Rcx, 10);
    b.lock_xadd(Mem::new(dst, 1032), Rcx);
    b.store_q(Mem::new(dst, 1040), Rcx);

    b.load_d(Rbx, Mem::new(src, 4));
    b.store_q(Mem::new(dst, 1048), Rbx);
    let skip = b.new_label();
    b.cmp_mem(Rbx, Mem::new(dst, 1048));
    b.jcc(Cond::Eq, skip);
    b.store_q_imm(Mem::new(dst, 1056), 99);
    b.bind(skip);

    b.mov_imm(Rsi, 0x1_0000_0000);
    b.add(Rsi, Rax);
    b.store_q(Mem::new(dst, 1064), Rsi);

    let done = b.new_label();
    b.cmp_imm(Rax, 10);
    b.jcc(Cond::Lt, done);
    b.store_q_imm(Mem::new(dst, 1056), 77);
    b.cmp_imm(Rax, 35);
    b.jcc(Cond::Be, done);
    b.store_q_imm(Mem::new(dst, 1056), 55);
    b.bind(done);
    b.postamble();
    b.finish().unwrap()
}

fn input(seed: u64) -> Input {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut words = [0u32; 48];
    for w in &mut words[..32] {
        *w = rng.random();
    }
    for (i, w) in words[32..].iter_mut().enumerate() {
        *w = ((i * 7 + 3) % 16) as u32;
    }
    Input(words)
}

fn run_emulated(program: &Program, input: &Input) -> Output {
    let mut out = Output([0xdead_beef; OUT_WORDS]);
    let args = Args {
        src: input.0.as_ptr(),
        dst: out.0.as_mut_ptr(),
    };
    let mut machine = Machine::new();
    unsafe { machine.call(program, &args as *const Args as u64) };
    out
}

#[test]
fn test_emulated_kitchen_sink() {
    let input = input(1);
    let out = run_emulated(&kitchen_sink(), &input);
    let word = |i: usize| out.0[i];
    let qword = |byte: usize| u64::from(word(byte / 4)) | (u64::from(word(byte / 4 + 1)) << 32);

    // Zeroing masked load: low eight lanes of `b`.
    assert_eq!(&out.0[..8], &input.0[16..24]);
    assert!(out.0[8..16].iter().all(|&x| x == 0));
    // valignd by 3 of a:b.
    assert_eq!(&out.0[16..29], &input.0[19..32]);
    assert_eq!(&out.0[29..32], &input.0[..3]);
    // vpermps.
    for i in 0..16 {
        assert_eq!(word(64 + i), input.0[input.0[32 + i] as usize]);
    }
    assert_eq!(qword(1024), 35 * 3 + 1);
    assert_eq!(qword(1032), 8);
    assert_eq!(qword(1040), -2_i64 as u64);
    assert_eq!(qword(1048), u64::from(input.0[1]));
    assert_eq!(qword(1056), 77);
    assert_eq!(qword(1064), 0x1_0000_0000 + 35);
}

#[cfg(target_arch = "x86_64")]
#[test]
fn test_native_matches_emulated() {
    use tj_asm::{ExecutableCode, encode};

    if !std::arch::is_x86_feature_detected!("avx512f") {
        return;
    }
    let program = kitchen_sink();
    let code = ExecutableCode::<Args>::new(&encode(&program).unwrap()).unwrap();
    for seed in 0..8 {
        let input = input(seed);
        let expected = run_emulated(&program, &input);

        let mut out = Output([0xdead_beef; OUT_WORDS]);
        let args = Args {
            src: input.0.as_ptr(),
            dst: out.0.as_mut_ptr(),
        };
        unsafe { code.call(&args) };
        assert_eq!(out.0, expected.0, "seed {seed}");
    }
}

const BUF_WORDS: usize = 1024;

#[repr(C, align(64))]
struct Buffer([u32; BUF_WORDS]);

/// Copies one vector and one dword from `[base + load]` to `[r8 + store]`.
fn copy_at(base: Gpr, load: i32, store: i32) -> Program {
    let mut b = CodeBuilder::new();
    b.preamble();
    b.load_q(base, Mem::new(Gpr::Rdi, 0));
    b.load_q(Gpr::R8, Mem::new(Gpr::Rdi, 8));
    b.vmovups_load(Zmm::new(5), Mem::new(base, load), None);
    b.vmovups_store(Mem::new(Gpr::R8, store), Zmm::new(5), None);
    b.load_d(Gpr::Rax, Mem::new(base, load));
    b.store_q(Mem::new(Gpr::R8, store + 64), Gpr::Rax);
    b.postamble();
    b.finish().unwrap()
}

fn run_copy(program: &Program, src: &Buffer, native: bool) -> Buffer {
    let mut out = Buffer([0xdead_beef; BUF_WORDS]);
    let args = Args {
        src: src.0.as_ptr(),
        dst: out.0.as_mut_ptr(),
    };
    if native {
        #[cfg(target_arch = "x86_64")]
        {
            let code = tj_asm::ExecutableCode::<Args>::new(&tj_asm::encode(program).unwrap()).unwrap();
            unsafe { code.call(&args) };
        }
    } else {
        let mut machine = Machine::new();
        unsafe { machine.call(program, &args as *const Args as u64) };
    }
    out
}

fn native_available() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        std::arch::is_x86_feature_detected!("avx512f")
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // Covers the short, compressed and 32-bit displacement forms on bases with special encodings.
    #[test]
    fn proptest_displacements(
        base in prop::sample::select(vec![Gpr::Rbx, Gpr::Rbp, Gpr::R12, Gpr::R13]),
        load in 0..BUF_WORDS - 16,
        store in 0..BUF_WORDS - 18,
        seed in any::<u64>(),
    ) {
        let mut rng = SmallRng::seed_from_u64(seed);
        let src = Buffer(core::array::from_fn(|_| rng.random()));
        let program = copy_at(base, 4 * load as i32, 4 * store as i32);

        let out = run_copy(&program, &src, false);
        prop_assert_eq!(&out.0[store..store + 16], &src.0[load..load + 16]);
        prop_assert_eq!(out.0[store + 16], src.0[load]);
        prop_assert_eq!(out.0[store + 17], 0);
        prop_assert!(out.0[..store].iter().all(|&w| w == 0xdead_beef));
        prop_assert!(out.0[store + 18..].iter().all(|&w| w == 0xdead_beef));

        if native_available() {
            prop_assert_eq!(run_copy(&program, &src, true).0, out.0);
        }
    }
}
