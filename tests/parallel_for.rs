//! S3: `parallel_for` over `[0, 1000)` writes each index into a disjoint
//! slot exactly once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dagrt::config::Config;
use dagrt::task::{self, TaskAction};

#[test]
fn parallel_for_covers_every_index_exactly_once() {
    const LEN: usize = 1000;
    let runtime = dagrt::init(Config { proc: 4, ..Config::default() });
    let results: Arc<Vec<AtomicUsize>> =
        Arc::new((0..LEN).map(|_| AtomicUsize::new(usize::MAX)).collect());

    runtime.launch({
        let results = results.clone();
        move |ctx, block| match block {
            0 => {
                let results = results.clone();
                task::parallel_for(ctx, 0, LEN, 1, 16, move |i| {
                    results[i].store(i, Ordering::Relaxed);
                })
            }
            1 => TaskAction::Done,
            _ => unreachable!(),
        }
    });

    for i in 0..LEN {
        assert_eq!(results[i].load(Ordering::Relaxed), i);
    }
}
