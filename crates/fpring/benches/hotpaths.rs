use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndarray::Array2;

use fpring::ridge::segment;
use fpring::{render_circle, AiryModel, AiryParams, FinderConfig, RingFinder, H_ALPHA_UM};

fn airy_params(size: usize) -> AiryParams {
    let c = size as f64 / 2.0;
    AiryParams {
        b_ratio: 1.2e-3,
        center_col: c,
        center_row: c,
        continuum: 1.0,
        finesse: 5.0,
        gap: 250.0,
        intensity: 100.0,
    }
}

fn make_plane(size: usize) -> Array2<f64> {
    AiryModel::new(airy_params(size), H_ALPHA_UM, (size, size)).render()
}

fn bench_airy_render(c: &mut Criterion) {
    let model = AiryModel::new(airy_params(512), H_ALPHA_UM, (512, 512));
    c.bench_function("airy_render_512", |b| {
        b.iter(|| black_box(model.render()));
    });
}

fn bench_segment(c: &mut Criterion) {
    let plane = make_plane(512);
    let config = FinderConfig::default();
    c.bench_function("ridge_segment_512", |b| {
        b.iter(|| black_box(segment(black_box(&plane.view()), &config)));
    });
}

fn bench_render_circle(c: &mut Criterion) {
    c.bench_function("render_circle_512_r180", |b| {
        b.iter(|| {
            black_box(render_circle(
                black_box([255.3, 256.8]),
                black_box(180.0),
                black_box(1.5),
                (512, 512),
            ))
        });
    });
}

fn bench_find_plane(c: &mut Criterion) {
    let plane = make_plane(256);
    let finder = RingFinder::default();
    let mut group = c.benchmark_group("finder");
    group.sample_size(10);
    group.bench_function("process_plane_256", |b| {
        b.iter(|| black_box(finder.process_plane(black_box(&plane.view()), 0)));
    });
    group.finish();
}

criterion_group!(
    hotpaths,
    bench_airy_render,
    bench_segment,
    bench_render_circle,
    bench_find_plane
);
criterion_main!(hotpaths);
