//! A reusable spin barrier shared by generated code and host threads.
//!
//! Every participant reads the generation, then bumps the arrival counter. The last arrival resets
//! the counter and publishes the next generation; everyone else spins until the generation moves.
//! The counter is back at zero before any waiter is released, so the context can be reused for the
//! next rendezvous straight away.

use core::mem::offset_of;
use core::sync::atomic::{AtomicU64, Ordering};

use tj_asm::{CodeBuilder, Cond, Gpr, Mem};

#[derive(Debug, Default)]
#[repr(C, align(64))]
pub struct BarrierContext {
    ctr: AtomicU64,
    generation: AtomicU64,
}

const CTR_OFFSET: i32 = offset_of!(BarrierContext, ctr) as i32;
const GENERATION_OFFSET: i32 = offset_of!(BarrierContext, generation) as i32;

impl BarrierContext {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ctr: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        }
    }

    /// Number of completed rendezvous, wrapping.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Rendezvous with `nthr - 1` other participants. Returns immediately if `nthr <= 1`.
    ///
    /// Host threads and generated kernels may share one context; every participant must pass the
    /// same `nthr`.
    pub fn wait(&self, nthr: usize) {
        if nthr <= 1 {
            return;
        }
        let generation = self.generation.load(Ordering::SeqCst);
        if self.ctr.fetch_add(1, Ordering::SeqCst) + 1 == nthr as u64 {
            self.ctr.store(0, Ordering::SeqCst);
            self.generation
                .store(generation.wrapping_add(1), Ordering::SeqCst);
        } else {
            while self.generation.load(Ordering::SeqCst) == generation {
                core::hint::spin_loop();
                std::thread::yield_now();
            }
        }
    }
}

/// Emits a rendezvous on the context at `[ctx]` for a group of `nthr` workers.
///
/// `tmp` is saved and restored on the stack; `ctx` and `nthr` are left unchanged. Flags are
/// clobbered.
pub fn emit_barrier(b: &mut CodeBuilder, ctx: Gpr, nthr: Gpr, tmp: Gpr) {
    let ctr = Mem::new(ctx, CTR_OFFSET);
    let generation = Mem::new(ctx, GENERATION_OFFSET);
    let spin = b.new_label();
    let restore = b.new_label();
    let exit = b.new_label();

    b.cmp_imm(nthr, 1);
    b.jcc(Cond::Be, exit);

    b.push(tmp);
    b.load_q(tmp, generation);
    b.push(tmp);
    b.mov_imm(tmp, 1);
    b.lock_xadd(ctr, tmp);
    b.add_imm(tmp, 1);
    b.cmp(tmp, nthr);
    b.pop(tmp); // generation seen on arrival
    b.jcc(Cond::Ne, spin);

    b.store_q_imm(ctr, 0);
    b.inc(tmp);
    b.store_q(generation, tmp);
    b.jmp(restore);

    b.bind(spin);
    b.pause();
    b.cmp_mem(tmp, generation);
    b.jcc(Cond::Eq, spin);

    b.bind(restore);
    b.pop(tmp);
    b.bind(exit);
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use tj_asm::{Inst, Machine};

    use super::*;

    fn barrier_program() -> tj_asm::Program {
        let mut b = CodeBuilder::new();
        b.preamble();
        // rdi holds the context, rsi the group size.
        emit_barrier(&mut b, Gpr::Rdi, Gpr::Rsi, Gpr::R15);
        b.postamble();
        b.finish().unwrap()
    }

    #[test]
    fn test_host_wait_counts_generations() {
        let ctx = BarrierContext::new();
        let nthr = 4;
        let rounds = 10;
        thread::scope(|s| {
            for _ in 0..nthr {
                s.spawn(|| {
                    for _ in 0..rounds {
                        ctx.wait(nthr);
                    }
                });
            }
        });
        assert_eq!(ctx.generation(), rounds);
        assert_eq!(ctx.ctr.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_single_worker_skips() {
        let ctx = BarrierContext::new();
        ctx.wait(1);
        ctx.wait(0);
        assert_eq!(ctx.generation(), 0);

        let program = barrier_program();
        let mut m = Machine::new();
        m.set_gpr(Gpr::Rsi, 1);
        unsafe { m.call(&program, &ctx as *const BarrierContext as u64) };
        assert_eq!(ctx.generation(), 0);
    }

    #[test]
    fn test_emitted_barrier_with_host_threads() {
        let ctx = BarrierContext::new();
        let program = barrier_program();
        let nthr = 3;
        let rounds = 5;
        thread::scope(|s| {
            // One emulated worker rendezvous with two host threads.
            s.spawn(|| {
                let mut m = Machine::new();
                for _ in 0..rounds {
                    m.set_gpr(Gpr::Rsi, nthr as u64);
                    m.set_gpr(Gpr::R15, 0xfeed);
                    unsafe { m.call(&program, &ctx as *const BarrierContext as u64) };
                    assert_eq!(m.gpr(Gpr::R15), 0xfeed);
                }
            });
            for _ in 1..nthr {
                s.spawn(|| {
                    for _ in 0..rounds {
                        ctx.wait(nthr);
                    }
                });
            }
        });
        assert_eq!(ctx.generation(), rounds as u64);
    }

    #[test]
    fn test_held_until_last_arrival() {
        let ctx = BarrierContext::new();
        let program = barrier_program();
        let addr = &ctx as *const BarrierContext as u64;
        let nthr = 4;
        let (held_generation, held_ctr) = thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(|| ctx.wait(nthr));
            }
            s.spawn(|| {
                let mut m = Machine::new();
                m.set_gpr(Gpr::Rsi, nthr as u64);
                unsafe { m.call(&program, addr) };
            });

            while ctx.ctr.load(Ordering::SeqCst) < nthr as u64 - 1 {
                thread::yield_now();
            }
            thread::sleep(Duration::from_millis(50));
            let held = (ctx.generation(), ctx.ctr.load(Ordering::SeqCst));
            // The last participant releases the others.
            ctx.wait(nthr);
            held
        });
        assert_eq!(held_generation, 0);
        assert_eq!(held_ctr, nthr as u64 - 1);
        assert_eq!(ctx.generation(), 1);
        assert_eq!(ctx.ctr.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_emitted_barrier_is_balanced() {
        let program = barrier_program();
        let pushes = program.count(|i| matches!(i, Inst::Push(_)));
        let pops = program.count(|i| matches!(i, Inst::Pop(_)));
        assert_eq!(pushes, pops);
    }
}
