//! Substitute for S5 (Gauss-Seidel, out of scope): a chain of stages each
//! depending on the previous one's result through `finish`, proving
//! sequential dependency ordering holds across suspensions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dagrt::config::Config;
use dagrt::task::{self, TaskAction};
use dagrt::TaskContext;

const LEN: usize = 20;

fn pipelined_chain(
    results: Arc<Vec<AtomicU64>>,
) -> impl FnMut(&TaskContext<'_>, usize) -> TaskAction + Send + 'static {
    move |ctx, block| {
        if block >= LEN {
            return TaskAction::Done;
        }
        let i = block;
        let results = results.clone();
        task::finish(ctx, block + 1, move |_ctx, _block| {
            let prev = if i == 0 { 0 } else { results[i - 1].load(Ordering::SeqCst) };
            results[i].store(prev + i as u64, Ordering::SeqCst);
            TaskAction::Done
        })
    }
}

#[test]
fn pipelined_finish_chain_propagates_results_in_order() {
    let runtime = dagrt::init(Config { proc: 4, ..Config::default() });
    let results: Arc<Vec<AtomicU64>> = Arc::new((0..LEN).map(|_| AtomicU64::new(0)).collect());

    runtime.launch(pipelined_chain(results.clone()));

    let mut expected = 0u64;
    for i in 0..LEN {
        expected += i as u64;
        assert_eq!(results[i].load(Ordering::SeqCst), expected);
    }
}
