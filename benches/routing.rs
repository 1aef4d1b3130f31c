use std::hint::black_box;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use rand::Rng;
use safewalk::{
    math::{self, polyline},
    model::{BoundingBox, Point},
};

fn create_random_nearby_points() -> Vec<Point> {
    let mut rng = rand::rng();
    let initial = Point::new(rng.random_range(-60.0..60.0), rng.random_range(-179.0..179.0));

    let mut points = vec![initial];
    for _ in 0..127 {
        points.push(Point::new(
            initial.lat + rng.random_range(-0.01..0.01),
            initial.lng + rng.random_range(-0.01..0.01),
        ));
    }

    points
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("fast_distance", |b| {
        b.iter_batched(
            create_random_nearby_points,
            |points| {
                for p in &points {
                    black_box(math::fast_distance(points[0], *p));
                }
            },
            BatchSize::SmallInput,
        );
    });

    c.bench_function("haversine", |b| {
        b.iter_batched(
            create_random_nearby_points,
            |points| {
                for p in &points {
                    black_box(math::haversine(points[0], *p));
                }
            },
            BatchSize::SmallInput,
        );
    });

    c.bench_function("polyline_round_trip", |b| {
        b.iter_batched(
            create_random_nearby_points,
            |points| {
                let encoded = polyline::encode(&points);
                black_box(polyline::decode(&encoded));
            },
            BatchSize::SmallInput,
        );
    });

    c.bench_function("lighting_stamp", |b| {
        b.iter_batched(
            || {
                let bbox = BoundingBox {
                    south: 51.50,
                    west: -0.11,
                    north: 51.52,
                    east: -0.09,
                };
                let mut rng = rand::rng();
                let lamps = (0..256)
                    .map(|_| {
                        Point::new(
                            rng.random_range(51.50..51.52),
                            rng.random_range(-0.11..-0.09),
                        )
                    })
                    .collect::<Vec<_>>();
                (bbox, lamps)
            },
            |(bbox, lamps)| {
                black_box(safewalk::graph::coverage::build_lighting(&bbox, 25., &lamps));
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
