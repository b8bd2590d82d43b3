use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use dagrt::config::Config;
use dagrt::task::{self, TaskAction};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn bench_parallel_for(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_for throughput");

    for &len in &[1_000usize, 100_000] {
        group.bench_function(format!("len={len}"), |b| {
            b.iter_batched(
                || dagrt::init(Config { proc: 4, ..Config::default() }),
                |runtime| {
                    let total = Arc::new(AtomicU64::new(0));
                    runtime.launch({
                        let total = total.clone();
                        move |ctx, block| match block {
                            0 => {
                                let total = total.clone();
                                task::parallel_for(ctx, 0, len, 1, 64, move |i| {
                                    total.fetch_add(i as u64, Ordering::Relaxed);
                                })
                            }
                            1 => TaskAction::Done,
                            _ => unreachable!(),
                        }
                    });
                    black_box(total.load(Ordering::Relaxed));
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_async_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn_async fan-out");

    for &depth in &[8u32, 12] {
        group.bench_function(format!("depth={depth}"), |b| {
            b.iter_batched(
                || dagrt::init(Config { proc: 4, ..Config::default() }),
                |runtime| {
                    let leaves = Arc::new(AtomicU64::new(0));
                    runtime.launch({
                        let leaves = leaves.clone();
                        move |ctx, block| match block {
                            0 => task::finish(ctx, 1, fanout_node(depth, leaves.clone())),
                            1 => TaskAction::Done,
                            _ => unreachable!(),
                        }
                    });
                    black_box(leaves.load(Ordering::Relaxed));
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn fanout_node(
    depth: u32,
    leaves: Arc<AtomicU64>,
) -> impl FnMut(&dagrt::TaskContext<'_>, usize) -> TaskAction + Send + 'static {
    move |ctx, _block| {
        if depth == 0 {
            leaves.fetch_add(1, Ordering::Relaxed);
            return TaskAction::Done;
        }
        let _ = task::spawn_async(ctx, 0, fanout_node(depth - 1, leaves.clone()));
        let _ = task::spawn_async(ctx, 0, fanout_node(depth - 1, leaves.clone()));
        TaskAction::Done
    }
}

criterion_group!(benches, bench_parallel_for, bench_async_fanout);
criterion_main!(benches);
