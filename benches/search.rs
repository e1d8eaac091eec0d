//! Index search benchmarks
//!
//! Run with: cargo bench --bench search

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use quiver_core::{
    AnnoyForest, AnnoyParams, Hnsw, HnswParams, Ivf, IvfParams, Record, Vamana, VamanaParams,
    VectorSearch,
};

const DIM: usize = 32;
const N: usize = 2000;

fn sample_records(seed: u64) -> Vec<Record<String>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..N)
        .map(|i| {
            Record::new(
                format!("r{}", i),
                (0..DIM).map(|_| rng.gen::<f32>()).collect(),
            )
        })
        .collect()
}

fn bench_search(c: &mut Criterion) {
    let records = sample_records(42);
    let mut rng = StdRng::seed_from_u64(7);
    let query: Vec<f32> = (0..DIM).map(|_| rng.gen::<f32>()).collect();

    let annoy = AnnoyForest::build(
        records.clone(),
        AnnoyParams {
            threshold: 0.1,
            bucket_threshold: 32,
            max_depth: 16,
        },
        8,
        true,
        Some(1),
    );
    let hnsw = Hnsw::build(
        records.clone(),
        HnswParams {
            ml: 0.9,
            num_layers: 4,
            efc: 32,
        },
        Some(2),
    );
    let vamana = Vamana::build(records.clone(), VamanaParams { alpha: 1.2, r: 24 }, Some(3));
    let ivf = Ivf::build(
        records.clone(),
        IvfParams {
            num_centroids: 32,
            retrain_threshold: 10_000,
        },
        Some(4),
    )
    .unwrap();

    let mut group = c.benchmark_group("search_ef50");
    group.sample_size(50);
    group.measurement_time(Duration::from_secs(3));

    group.bench_function("annoy", |b| b.iter(|| black_box(annoy.search(&query, 50))));
    group.bench_function("hnsw", |b| b.iter(|| black_box(hnsw.search(&query, 50))));
    group.bench_function("vamana", |b| b.iter(|| black_box(vamana.search(&query, 50))));
    group.bench_function("ivf", |b| b.iter(|| black_box(ivf.search(&query, 50))));

    group.finish();
}

criterion_group!(benches, bench_search);
criterion_main!(benches);
