use criterion::{black_box, criterion_group, criterion_main, Criterion};
use imgclump::cluster::{Affinity, Agglomerative, Clustering, Kmeans, Linkage};
use imgclump::reduce::{Tsne, TsneMethod};
use rand::prelude::*;

fn random_points(n: usize, d: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..d).map(|_| rng.random::<f32>()).collect())
        .collect()
}

fn bench_kmeans(c: &mut Criterion) {
    let mut group = c.benchmark_group("kmeans");

    // Reduced coordinates are 2-D.
    let data = random_points(1000, 2, 42);

    group.bench_function("fit_predict_n1000_d2_k10", |b| {
        b.iter(|| {
            let model = Kmeans::new(10).with_max_iter(10).with_seed(42);
            model.fit_predict(black_box(&data)).unwrap();
        })
    });

    group.finish();
}

fn bench_agglomerative(c: &mut Criterion) {
    let mut group = c.benchmark_group("agglomerative");
    let data = random_points(500, 2, 7);

    for (linkage, affinity) in [
        (Linkage::Ward, Affinity::Euclidean),
        (Linkage::Average, Affinity::Cosine),
        (Linkage::Single, Affinity::Manhattan),
    ] {
        group.bench_function(format!("{linkage}_{affinity}_n500_k8"), |b| {
            b.iter(|| {
                let model = Agglomerative::new(8)
                    .with_affinity(affinity)
                    .with_linkage(linkage);
                model.fit_predict(black_box(&data)).unwrap();
            })
        });
    }

    group.finish();
}

fn bench_tsne(c: &mut Criterion) {
    let mut group = c.benchmark_group("tsne");
    group.sample_size(10);
    let data = random_points(200, 50, 3);

    group.bench_function("fit_transform_n200_d50", |b| {
        b.iter(|| {
            Tsne::new()
                .with_max_iter(250)
                .fit_transform(black_box(&data))
                .unwrap();
        })
    });

    let large = random_points(2000, 50, 5);
    for method in [TsneMethod::Exact, TsneMethod::BarnesHut] {
        group.bench_function(format!("{method:?}_n2000_d50_iter50"), |b| {
            b.iter(|| {
                Tsne::new()
                    .with_method(method)
                    .with_max_iter(50)
                    .fit_transform(black_box(&large))
                    .unwrap();
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_kmeans, bench_agglomerative, bench_tsne);
criterion_main!(benches);
