//! End-to-end runs of both relayouts over generated data.

use core::fmt;
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tj_transpose::reference::{strided_reference, tile_rows_reference};
use tj_transpose::{
    Backend, BackendPreference, BarrierContext, TransposeArgs, TransposeConfig, TransposeError,
    TransposeKernel, Variant,
};
use tj_util::LANES;
use tracing::{info, info_span, instrument, warn};

/// Fill value of destination elements a kernel is not expected to write.
const UNWRITTEN: f32 = -1.0;

#[derive(Debug, thiserror::Error)]
pub enum DemoError {
    #[error(transparent)]
    Kernel(#[from] TransposeError),
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("l_pad {l_pad} + iw {iw} does not fit tr_iw {tr_iw} with pads of at most 16")]
    InvalidShape { iw: usize, tr_iw: usize, l_pad: usize },
    #[error("stride_w {stride_w} overlaps destination rows of {nthr} concurrent workers")]
    OverlappingRows { stride_w: usize, nthr: usize },
    #[error("{mismatches} of {elements} relayouted elements differ from the reference")]
    Mismatch { mismatches: usize, elements: usize },
}

pub type DemoResult<T> = Result<T, DemoError>;

/// Outcome of one verified run.
#[derive(Debug)]
pub struct RunReport {
    pub variant: Variant,
    pub backend: Backend,
    pub code_size: usize,
    pub elements: usize,
    pub elapsed: Duration,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} relayout of {} elements verified ({:?} backend, {} code bytes, {:?})",
            self.variant, self.elements, self.backend, self.code_size, self.elapsed
        )
    }
}

/// Prints the verified run, or panics with the failure.
pub fn report_result(result: DemoResult<RunReport>) {
    match result {
        Ok(report) => println!("{report}"),
        Err(e) => panic!("{e}"),
    }
}

fn random_vec(len: usize, rng: &mut SmallRng) -> Vec<f32> {
    (0..len).map(|_| rng.random::<f32>() + 1.0).collect()
}

fn compare(actual: &[f32], expected: &[f32]) -> DemoResult<()> {
    let mismatches = actual.iter().zip(expected).filter(|(a, e)| a != e).count();
    if mismatches == 0 {
        Ok(())
    } else {
        Err(DemoError::Mismatch {
            mismatches,
            elements: expected.len(),
        })
    }
}

/// Splits `0..ih` into `nthr` contiguous ranges; trailing workers may get none.
#[must_use]
pub fn split_rows(ih: usize, nthr: usize) -> Vec<(usize, usize)> {
    (0..nthr)
        .map(|t| (ih * t / nthr, ih * (t + 1) / nthr))
        .collect()
}

/// Checks that a row of `conf.iw` positions and both pads fit the padded width.
pub fn check_tile_shape(conf: &TransposeConfig) -> DemoResult<()> {
    if conf.l_pad > LANES || conf.l_pad + conf.iw > conf.tr_iw || conf.right_pad() > LANES {
        return Err(DemoError::InvalidShape {
            iw: conf.iw,
            tr_iw: conf.tr_iw,
            l_pad: conf.l_pad,
        });
    }
    Ok(())
}

/// Relayouts `blocks` channel blocks in parallel, each block with its own kernel call.
#[instrument(skip_all, fields(iw = conf.iw, tr_iw = conf.tr_iw, blocks = blocks))]
pub fn run_tile_blocks(
    kernel: &TransposeKernel,
    conf: &TransposeConfig,
    blocks: usize,
    rng: &mut SmallRng,
) -> DemoResult<RunReport> {
    check_tile_shape(conf)?;

    let (src_len, dst_len) = (conf.iw * LANES, conf.tile_dst_len());
    let src = random_vec(blocks * src_len, rng);
    let mut dst = vec![UNWRITTEN; blocks * dst_len];
    // An empty padded row leaves `dst` empty, so no chunk is ever produced.
    let chunk = dst_len.max(1);

    let start = Instant::now();
    info_span!("kernel calls").in_scope(|| {
        dst.par_chunks_mut(chunk).enumerate().for_each(|(block, d)| {
            let s = src.as_ptr().wrapping_add(block * src_len);
            // The next block is the prefetch target; past the end it is never dereferenced.
            let args = TransposeArgs::tile(s, d.as_mut_ptr()).with_prefetch(
                s.wrapping_add(src_len),
                d.as_ptr().wrapping_add(dst_len),
            );
            unsafe { kernel.call(&args) };
        });
    });
    let elapsed = start.elapsed();

    let mut expected = vec![UNWRITTEN; blocks * dst_len];
    info_span!("reference").in_scope(|| {
        for (block, e) in expected.chunks_mut(chunk).enumerate() {
            tile_rows_reference(conf, &src[block * src_len..], e);
        }
    });
    compare(&dst, &expected)?;

    Ok(RunReport {
        variant: kernel.variant(),
        backend: kernel.backend(),
        code_size: kernel.code_size(),
        elements: dst.len(),
        elapsed,
    })
}

/// Relayouts `ih` rows with `conf.nthr` workers sharing one barrier, `rounds` times.
#[instrument(skip_all, fields(iw = conf.iw, tr_ld = conf.tr_ld, ih = ih, nthr = conf.nthr))]
pub fn run_strided_group(
    kernel: &TransposeKernel,
    conf: &TransposeConfig,
    ih: usize,
    rounds: usize,
    rng: &mut SmallRng,
) -> DemoResult<RunReport> {
    let nthr = conf.nthr.max(1);
    if conf.stride_w < 4 && nthr > 1 {
        return Err(DemoError::OverlappingRows {
            stride_w: conf.stride_w,
            nthr,
        });
    }

    let src = random_vec(ih * conf.iw, rng);
    let dst_len = ih.saturating_sub(1) * conf.strided_dst_step() + 4 * conf.tr_ld;
    let mut dst = vec![UNWRITTEN; dst_len];
    let ranges = split_rows(ih, nthr);
    let bctx = BarrierContext::new();

    let (src_addr, dst_addr) = (src.as_ptr() as usize, dst.as_mut_ptr() as usize);
    let start = Instant::now();
    for round in 0..rounds {
        info_span!("round", round).in_scope(|| {
            thread::scope(|s| {
                for &(ih_start, ih_end) in &ranges {
                    let bctx = &bctx;
                    s.spawn(move || {
                        let args = TransposeArgs::strided(
                            src_addr as *const f32,
                            dst_addr as *mut f32,
                            ih_start,
                            ih_end,
                            nthr,
                            bctx,
                        );
                        unsafe { kernel.call(&args) };
                    });
                }
            });
        });
    }
    let elapsed = start.elapsed();

    let expected_generation = if nthr > 1 { 2 * rounds as u64 } else { 0 };
    if bctx.generation() != expected_generation {
        warn!(
            generation = bctx.generation(),
            expected = expected_generation,
            "unexpected number of rendezvous"
        );
    }
    info!(rendezvous = bctx.generation(), "group finished");

    let mut expected = vec![UNWRITTEN; dst_len];
    strided_reference(conf, &src, &mut expected, 0, ih);
    compare(&dst, &expected)?;

    Ok(RunReport {
        variant: kernel.variant(),
        backend: kernel.backend(),
        code_size: kernel.code_size(),
        elements: ih * 4 * conf.strided_iters() * LANES,
        elapsed,
    })
}

/// Builds the kernel for `conf` and runs it.
pub fn run(
    conf: &TransposeConfig,
    pref: BackendPreference,
    blocks: usize,
    ih: usize,
    listing: bool,
) -> DemoResult<RunReport> {
    if Variant::select(conf)? == Variant::Tile {
        check_tile_shape(conf)?;
    }
    let kernel = TransposeKernel::with_backend(conf, pref)?;
    info!(
        variant = %kernel.variant(),
        backend = ?kernel.backend(),
        insts = kernel.program().len(),
        code_size = kernel.code_size(),
        "kernel ready"
    );
    if listing {
        println!("{}", kernel.program());
    }

    // WARNING: Use a real cryptographic PRNG in applications!!
    let mut rng = SmallRng::seed_from_u64(1);
    match kernel.variant() {
        Variant::Tile => run_tile_blocks(&kernel, conf, blocks, &mut rng),
        Variant::Strided => run_strided_group(&kernel, conf, ih, 1, &mut rng),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_rows_covers_range() {
        let ranges = split_rows(7, 3);
        assert_eq!(ranges, vec![(0, 2), (2, 4), (4, 7)]);
        assert_eq!(split_rows(1, 3), vec![(0, 0), (0, 0), (0, 1)]);
    }

    #[test]
    fn test_emulated_runs_verify() {
        let conf = TransposeConfig::default()
            .with_widths(30, 33)
            .with_l_pad(1);
        let report = run(&conf, BackendPreference::Emulated, 4, 0, false).unwrap();
        assert_eq!(report.variant, Variant::Tile);
        assert_eq!(report.elements, 4 * LANES * 33);

        let conf = TransposeConfig::default()
            .with_first_conv(true)
            .with_widths(50, 50)
            .with_tr_ld(32)
            .with_stride_w(4)
            .with_nthr(3);
        let report = run(&conf, BackendPreference::Emulated, 0, 5, false).unwrap();
        assert_eq!(report.variant, Variant::Strided);
    }

    #[test]
    fn test_oversized_pad_is_rejected() {
        // Right pad of 20.
        let conf = TransposeConfig::default().with_widths(30, 50);
        let err = run(&conf, BackendPreference::Emulated, 2, 0, false).unwrap_err();
        assert!(matches!(err, DemoError::InvalidShape { iw: 30, tr_iw: 50, l_pad: 0 }));

        let conf = TransposeConfig::default().with_widths(30, 60).with_l_pad(17);
        let err = run(&conf, BackendPreference::Emulated, 2, 0, false).unwrap_err();
        assert!(matches!(err, DemoError::InvalidShape { l_pad: 17, .. }));
    }

    #[test]
    fn test_empty_rows_leave_destination_untouched() {
        let conf = TransposeConfig::default().with_widths(0, 4).with_l_pad(2);
        let report = run(&conf, BackendPreference::Emulated, 2, 0, false).unwrap();
        assert_eq!(report.elements, 2 * LANES * 4);

        let conf = TransposeConfig::default().with_widths(0, 0);
        let report = run(&conf, BackendPreference::Emulated, 3, 0, false).unwrap();
        assert_eq!(report.elements, 0);
    }

    #[test]
    fn test_overlapping_group_is_rejected() {
        let conf = TransposeConfig::default()
            .with_first_conv(true)
            .with_widths(50, 50)
            .with_tr_ld(32)
            .with_stride_w(2)
            .with_nthr(2);
        let err = run(&conf, BackendPreference::Emulated, 0, 5, false).unwrap_err();
        assert!(matches!(err, DemoError::OverlappingRows { .. }));
    }
}
