use std::hint::black_box;

use criterion::{BenchmarkGroup, Criterion, Throughput, criterion_group, criterion_main};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tj_transpose::reference::{strided_reference, tile_rows_reference};
use tj_transpose::{
    BackendPreference, BarrierContext, TransposeArgs, TransposeConfig, TransposeKernel,
    native_supported,
};
use tj_util::LANES;

fn random_vec(len: usize) -> Vec<f32> {
    let mut rng = SmallRng::seed_from_u64(1);
    (0..len).map(|_| rng.random()).collect()
}

fn backends() -> Vec<(&'static str, BackendPreference)> {
    let mut backends = vec![("emulated", BackendPreference::Emulated)];
    if native_supported() {
        backends.push(("native", BackendPreference::Native));
    }
    backends
}

fn generate_benchmark(c: &mut Criterion) {
    let mut g = c.benchmark_group("generate");
    for iw in [14, 56, 224] {
        let conf = TransposeConfig::default()
            .with_widths(iw, iw + 2)
            .with_l_pad(1);
        g.bench_function(format!("tile iw={iw}"), |b| {
            b.iter(|| TransposeKernel::with_backend(black_box(&conf), BackendPreference::Emulated))
        });
    }
    let conf = TransposeConfig::default()
        .with_first_conv(true)
        .with_widths(224, 224)
        .with_tr_ld(64)
        .with_stride_w(2);
    g.bench_function("strided tr_ld=64", |b| {
        b.iter(|| TransposeKernel::with_backend(black_box(&conf), BackendPreference::Emulated))
    });
}

fn tile_benchmark(c: &mut Criterion) {
    const WIDTHS: [usize; 3] = [14, 56, 224];

    let inner = |g: &mut BenchmarkGroup<_>, iw: usize| {
        let conf = TransposeConfig::default()
            .with_widths(iw, iw + 2)
            .with_l_pad(1);
        let src = random_vec(iw * LANES);
        let mut dst = vec![0.0; conf.tile_dst_len()];
        g.throughput(Throughput::Bytes((src.len() * size_of::<f32>()) as u64));

        g.bench_function(format!("reference iw={iw}"), |b| {
            b.iter(|| tile_rows_reference(&conf, black_box(&src), &mut dst))
        });
        for (name, pref) in backends() {
            let kernel = TransposeKernel::with_backend(&conf, pref).unwrap();
            let args = TransposeArgs::tile(src.as_ptr(), dst.as_mut_ptr());
            g.bench_function(format!("{name} iw={iw}"), |b| {
                b.iter(|| unsafe { kernel.call(black_box(&args)) })
            });
        }
    };

    let mut g = c.benchmark_group("tile");
    for iw in WIDTHS {
        inner(&mut g, iw);
    }
}

fn strided_benchmark(c: &mut Criterion) {
    const IH: usize = 8;

    let mut g = c.benchmark_group("strided");
    for niters in [1, 4] {
        let conf = TransposeConfig::default()
            .with_first_conv(true)
            .with_widths(niters * 64, niters * 64)
            .with_tr_ld(niters * LANES)
            .with_stride_w(4);
        let src = random_vec(IH * conf.iw);
        let mut dst = vec![0.0; IH * conf.strided_dst_step()];
        g.throughput(Throughput::Bytes((src.len() * size_of::<f32>()) as u64));

        g.bench_function(format!("reference tr_ld={}", conf.tr_ld), |b| {
            b.iter(|| strided_reference(&conf, black_box(&src), &mut dst, 0, IH))
        });
        let bctx = BarrierContext::new();
        for (name, pref) in backends() {
            let kernel = TransposeKernel::with_backend(&conf, pref).unwrap();
            let args = TransposeArgs::strided(src.as_ptr(), dst.as_mut_ptr(), 0, IH, 1, &bctx);
            g.bench_function(format!("{name} tr_ld={}", conf.tr_ld), |b| {
                b.iter(|| unsafe { kernel.call(black_box(&args)) })
            });
        }
    }
}

criterion_group!(benches, generate_benchmark, tile_benchmark, strided_benchmark);
criterion_main!(benches);
