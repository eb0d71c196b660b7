//! Benchmarks for manifest loading.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use metamorph::manifest::{load_str, Interpolator, ManifestOverrides};
use metamorph::runtime::DockerImage;
use metamorph::testing::SAMPLE_MANIFEST;

fn manifest_benchmark(c: &mut Criterion) {
    c.bench_function("image_parse", |b| {
        b.iter(|| DockerImage::parse(black_box("registry.example.com:5000/team/app:1.2.3")))
    });

    let interpolator = Interpolator::new().with_override("GITLAB_ORG", "acme");
    c.bench_function("interpolate", |b| {
        b.iter(|| interpolator.expand(black_box(SAMPLE_MANIFEST)))
    });

    let overrides = ManifestOverrides::new().with_org("acme");
    c.bench_function("load_str", |b| {
        b.iter(|| load_str(black_box(SAMPLE_MANIFEST), &overrides))
    });
}

criterion_group!(benches, manifest_benchmark);
criterion_main!(benches);
