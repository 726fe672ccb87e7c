//! Criterion benchmarks for grid tiling and reconstruction.
//!
//! Run with: cargo bench --bench grid_aggregation
//!
//! - grid location enumeration
//! - patch cropping over a full grid
//! - aggregation of per-patch predictions back into a volume
//! - label foreground scan

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use medpatch::{GridAggregator, GridSampler, LabelSampler, Subject, Volume};
use ndarray::Array3;

fn create_subject(shape: [usize; 3]) -> Subject {
    let image = Array3::from_shape_fn(shape, |(x, y, z)| ((x + y + z) % 256) as f32);
    let mut label = Array3::zeros(shape);
    label[[shape[0] / 2, shape[1] / 2, shape[2] / 2]] = 1.0;
    Subject::new(
        "bench",
        [
            ("image", Volume::intensity(image).unwrap()),
            ("label", Volume::label(label).unwrap()),
        ],
    )
    .unwrap()
}

const SHAPES: [[usize; 3]; 2] = [[96, 96, 96], [197, 233, 189]];

fn bench_grid_locations(c: &mut Criterion) {
    let mut group = c.benchmark_group("grid_locations");
    let grid = GridSampler::new([64, 64, 64], [16, 16, 16]).unwrap();
    for shape in SHAPES {
        let label = format!("{}x{}x{}", shape[0], shape[1], shape[2]);
        group.bench_with_input(BenchmarkId::from_parameter(&label), &shape, |b, &shape| {
            b.iter(|| black_box(grid.locations_for(shape).unwrap().count()))
        });
    }
    group.finish();
}

fn bench_grid_crop(c: &mut Criterion) {
    let mut group = c.benchmark_group("grid_crop");
    let grid = GridSampler::new([64, 64, 64], [16, 16, 16]).unwrap();
    for shape in SHAPES {
        let subject = create_subject(shape);
        let label = format!("{}x{}x{}", shape[0], shape[1], shape[2]);
        group.throughput(Throughput::Bytes((shape.iter().product::<usize>() * 8) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(&label), &subject, |b, subject| {
            b.iter(|| {
                for patch in grid.iter(subject).unwrap() {
                    black_box(patch);
                }
            })
        });
    }
    group.finish();
}

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");
    let grid = GridSampler::new([64, 64, 64], [16, 16, 16]).unwrap();
    for shape in SHAPES {
        let subject = create_subject(shape);
        let predictions: Vec<_> = grid
            .iter(&subject)
            .unwrap()
            .map(|patch| (patch.location(), patch.get("image").unwrap().clone()))
            .collect();
        let label = format!("{}x{}x{}", shape[0], shape[1], shape[2]);
        group.throughput(Throughput::Bytes((shape.iter().product::<usize>() * 4) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(&label),
            &predictions,
            |b, predictions| {
                b.iter(|| {
                    let mut aggregator = GridAggregator::for_subject(&grid, &subject).unwrap();
                    for (location, prediction) in predictions {
                        aggregator.add(*location, prediction).unwrap();
                    }
                    black_box(aggregator.finalize().unwrap())
                })
            },
        );
    }
    group.finish();
}

fn bench_foreground_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("foreground_scan");
    for shape in SHAPES {
        let subject = create_subject(shape);
        let label_volume = subject.get("label").unwrap();
        let label = format!("{}x{}x{}", shape[0], shape[1], shape[2]);
        group.bench_with_input(BenchmarkId::from_parameter(&label), label_volume, |b, volume| {
            b.iter(|| black_box(LabelSampler::foreground_voxels(volume)))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_grid_locations,
    bench_grid_crop,
    bench_aggregate,
    bench_foreground_scan
);
criterion_main!(benches);
