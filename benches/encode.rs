use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::Array2;
use sparsedict::{encode_with, initialize_dictionary, train, PatchBatch, Scalar, SolverConfig, TrainConfig};

/// 8x8 patches, as in the usual natural-image setup.
const PATCH_DIM: usize = 64;
const PATCH_COUNTS: &[usize] = &[256, 1024, 4096];

fn synthetic_batch(count: usize) -> PatchBatch {
    let data = Array2::from_shape_fn((PATCH_DIM, count), |(i, j)| {
        ((i * 31 + j * 17) as Scalar * 0.011).sin() * ((j % 7) as Scalar + 1.0)
    });
    PatchBatch::new(data).expect("synthetic batch is finite and non-empty")
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    let dictionary = initialize_dictionary(PATCH_DIM, 128, 0).expect("valid sizes");

    for &count in PATCH_COUNTS {
        let batch = synthetic_batch(count);
        group.throughput(Throughput::Elements(count as u64));
        for parallel in [false, true] {
            let config = SolverConfig {
                lambda: 0.1,
                parallel,
                ..SolverConfig::default()
            };
            let name = if parallel { "parallel" } else { "sequential" };
            group.bench_with_input(BenchmarkId::new(name, count), &count, |bencher, _| {
                bencher.iter(|| encode_with(black_box(&batch), black_box(&dictionary), &config))
            });
        }
    }

    group.finish();
}

fn bench_outer_iteration(c: &mut Criterion) {
    let batch = synthetic_batch(1024);
    let dictionary = initialize_dictionary(PATCH_DIM, 128, 0).expect("valid sizes");
    let config = TrainConfig {
        max_outer_iters: 1,
        ..TrainConfig::default()
    };
    c.bench_function("train/one_outer_iteration", |bencher| {
        bencher.iter(|| train(black_box(&batch), dictionary.clone(), &config))
    });
}

criterion_group!(benches, bench_encode, bench_outer_iteration);
criterion_main!(benches);
