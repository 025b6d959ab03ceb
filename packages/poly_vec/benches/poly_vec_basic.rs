//! Basic benchmarks for the `poly_vec` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::time::Instant;

use criterion::{Criterion, criterion_group, criterion_main};
use poly_vec::{PolyVec, upcast};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

trait Shape {
    fn area(&self) -> f64;
}

struct Square {
    side: f64,
}

struct Rectangle {
    width: f64,
    height: f64,
}

impl Shape for Square {
    fn area(&self) -> f64 {
        self.side * self.side
    }
}

impl Shape for Rectangle {
    fn area(&self) -> f64 {
        self.width * self.height
    }
}

upcast!(dyn Shape => Square, Rectangle);

const SHAPE_COUNT: usize = 10_000;

fn filled() -> PolyVec<dyn Shape> {
    let mut vec = PolyVec::<dyn Shape>::new();

    for i in 0..SHAPE_COUNT {
        if i % 2 == 0 {
            vec.push(Square { side: 2.0 });
        } else {
            vec.push(Rectangle {
                width: 2.0,
                height: 3.0,
            });
        }
    }

    vec
}

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("poly_vec_basic");

    group.bench_function("build_empty", |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(PolyVec::<dyn Shape>::new()));
            }

            start.elapsed()
        });
    });

    group.bench_function("push_one", |b| {
        b.iter_custom(|iters| {
            let mut vecs = iter::repeat_with(PolyVec::<dyn Shape>::new)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let start = Instant::now();

            for vec in &mut vecs {
                _ = black_box(vec.push(black_box(Square { side: 1.0 })));
            }

            start.elapsed()
        });
    });

    group.bench_function("read_one", |b| {
        b.iter_custom(|iters| {
            let mut vec = PolyVec::<dyn Shape>::new();
            let index = vec.push(Square { side: 1.0 });

            let start = Instant::now();

            for _ in 0..iters {
                _ = black_box(vec[black_box(index)].area());
            }

            start.elapsed()
        });
    });

    group.bench_function("free_and_reuse_one", |b| {
        b.iter_custom(|iters| {
            let mut vec = PolyVec::<dyn Shape>::new();
            let mut index = vec.push(Square { side: 1.0 });

            let start = Instant::now();

            for _ in 0..iters {
                vec.free(index).unwrap();
                index = black_box(vec.push(Square { side: 1.0 }));
            }

            start.elapsed()
        });
    });

    group.finish();

    let mut group = c.benchmark_group("poly_vec_slow");

    group.bench_function("push_10k", |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(filled()));
            }

            start.elapsed()
        });
    });

    group.bench_function("iterate_10k", |b| {
        b.iter_custom(|iters| {
            let vec = filled();

            let start = Instant::now();

            for _ in 0..iters {
                let total: f64 = vec.iter().map(|shape| shape.area()).sum();
                _ = black_box(total);
            }

            start.elapsed()
        });
    });

    group.bench_function("iterate_10k_half_vacant", |b| {
        b.iter_custom(|iters| {
            let mut vec = filled();

            for index in (0..SHAPE_COUNT).step_by(2) {
                vec.free(index).unwrap();
            }

            let start = Instant::now();

            for _ in 0..iters {
                let total: f64 = vec.iter().map(|shape| shape.area()).sum();
                _ = black_box(total);
            }

            start.elapsed()
        });
    });

    group.bench_function("baseline_boxed_iterate_10k", |b| {
        b.iter_custom(|iters| {
            let boxed = (0..SHAPE_COUNT)
                .map(|i| -> Box<dyn Shape> {
                    if i % 2 == 0 {
                        Box::new(Square { side: 2.0 })
                    } else {
                        Box::new(Rectangle {
                            width: 2.0,
                            height: 3.0,
                        })
                    }
                })
                .collect::<Vec<_>>();

            let start = Instant::now();

            for _ in 0..iters {
                let total: f64 = boxed.iter().map(|shape| shape.area()).sum();
                _ = black_box(total);
            }

            start.elapsed()
        });
    });

    group.finish();
}
