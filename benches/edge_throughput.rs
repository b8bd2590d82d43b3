use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use dagrt::config::Config;
use dagrt::edge::EdgeAlgo;

fn bench_single_threaded_arrivals(c: &mut Criterion) {
    let mut group = c.benchmark_group("Incounter single-threaded arrivals");
    let config = Config::default();

    for algo in [EdgeAlgo::Simple, EdgeAlgo::Distributed, EdgeAlgo::Dyntree, EdgeAlgo::DyntreeOpt] {
        group.bench_function(format!("{algo:?}"), |b| {
            b.iter_batched(
                || algo.build(&config).0,
                |incounter| {
                    for i in 0..1000 {
                        incounter.increment(black_box(i));
                    }
                    for i in 0..1000 {
                        incounter.decrement(black_box(i));
                    }
                    black_box(incounter.is_activated());
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_concurrent_arrivals(c: &mut Criterion) {
    let mut group = c.benchmark_group("Incounter 4-thread arrivals");
    let config = Config::default();

    for algo in [EdgeAlgo::Distributed, EdgeAlgo::Dyntree, EdgeAlgo::DyntreeOpt] {
        group.bench_function(format!("{algo:?}"), |b| {
            b.iter_batched(
                || std::sync::Arc::new(algo.build(&config).0),
                |incounter| {
                    std::thread::scope(|s| {
                        for t in 0..4 {
                            let incounter = incounter.clone();
                            s.spawn(move || {
                                let base = t * 250;
                                for i in base..base + 250 {
                                    incounter.increment(i);
                                }
                                for i in base..base + 250 {
                                    incounter.decrement(i);
                                }
                            });
                        }
                    });
                    black_box(incounter.is_activated());
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_single_threaded_arrivals, bench_concurrent_arrivals);
criterion_main!(benches);
