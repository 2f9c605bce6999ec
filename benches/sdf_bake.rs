//! Benchmarks for SDF baking and CPU reference ticks.
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::Vec3;

use plume::prelude::*;
use plume::sdf::query::distance_to_triangle;
use plume::Triangle;

fn bench_sdf_bake(c: &mut Criterion) {
    let mut group = c.benchmark_group("sdf_bake");
    group.sample_size(10);

    let scene = Scene::new()
        .with_mesh(Mesh::cube(Vec3::ZERO, 1.0))
        .with_mesh(Mesh::cuboid(Vec3::new(0.0, -0.6, 0.0), Vec3::new(2.0, 0.1, 2.0)));

    for resolution in [8u32, 16, 24] {
        group.bench_with_input(BenchmarkId::new("cube_on_floor", resolution), &resolution, |b, &n| {
            let options = SdfOptions::new(n);
            b.iter(|| {
                let volume = pollster::block_on(SdfVolumeGenerator::new().generate(&scene, &options, |_| {}));
                black_box(volume)
            })
        });
    }

    group.finish();
}

fn bench_closest_point(c: &mut Criterion) {
    let triangle = Triangle::new(Vec3::ZERO, Vec3::X, Vec3::Y);

    c.bench_function("distance_to_triangle", |b| {
        b.iter(|| black_box(distance_to_triangle(black_box(Vec3::new(0.3, 0.2, 0.7)), &triangle)))
    });
}

fn bench_cpu_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("cpu_tick");

    for width in [16u32, 32, 64] {
        group.bench_with_input(BenchmarkId::new("with_density", width * width), &width, |b, &w| {
            let mut substrate = CpuSubstrate::new();
            let config = EngineConfig::new(w).with_seed(1).with_density(DensityConfig::new(64));
            let mut engine = match SmokeEngine::new(&mut substrate, &Mesh::quad(2.0, 2.0), config, None) {
                Ok(engine) => engine,
                Err(e) => panic!("engine setup failed: {}", e),
            };
            let mut t = 0.0;
            b.iter(|| {
                t += 1.0 / 60.0;
                black_box(engine.step(&mut substrate, t, 1.0 / 60.0))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_sdf_bake, bench_closest_point, bench_cpu_tick);
criterion_main!(benches);
