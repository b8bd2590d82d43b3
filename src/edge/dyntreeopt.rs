//! The `dyntreeopt` edge-tracking variant: [`super::dyntree::DyntreeIncounter`]
//! and [`super::dyntree::DyntreeOutset`] configured with a larger per-node
//! amortization bound, so that most arrivals/consumer insertions land in an
//! already-allocated node instead of growing the tree.
//!
//! Spec 4.3.5 gives the defaults `branching_factor = 12`, `A = 128`; these are
//! sourced from [`crate::config::Config`] rather than hard-coded so that
//! `edge_algo = "dyntreeopt"` stays tunable at startup.

use super::dyntree::{DyntreeIncounter, DyntreeOutset};

/// Default branching factor for `dyntreeopt` when not overridden by config.
pub const DEFAULT_BRANCHING_FACTOR: usize = 12;

/// Default per-node amortization bound (`A`) for `dyntreeopt`.
pub const DEFAULT_AMORTIZATION: usize = 128;

/// Builds a `dyntreeopt`-configured in-counter.
pub fn new_incounter(branching_factor: usize, amortization: usize) -> DyntreeIncounter {
    DyntreeIncounter::new(branching_factor, amortization)
}

/// Builds a `dyntreeopt`-configured out-set.
pub fn new_outset(branching_factor: usize, amortization: usize) -> DyntreeOutset {
    DyntreeOutset::new(branching_factor, amortization)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{EdgeConsumer, Incounter, InsertOutcome, Outset, Status};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingConsumer(AtomicUsize);
    impl EdgeConsumer for CountingConsumer {
        fn notify(&self, _source: usize) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn amortized_node_holds_many_consumers_before_growing() {
        let outset = new_outset(DEFAULT_BRANCHING_FACTOR, DEFAULT_AMORTIZATION);
        let consumers: Vec<_> = (0..DEFAULT_AMORTIZATION)
            .map(|_| Arc::new(CountingConsumer(AtomicUsize::new(0))))
            .collect();
        for c in &consumers {
            assert_eq!(outset.insert(c.clone()), InsertOutcome::Inserted);
        }
        outset.finish(0);
        for c in &consumers {
            assert_eq!(c.0.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn amortized_incounter_holds_many_arrivals_before_growing() {
        let incounter = new_incounter(DEFAULT_BRANCHING_FACTOR, DEFAULT_AMORTIZATION);
        for i in 0..DEFAULT_AMORTIZATION {
            incounter.increment(i);
        }
        assert!(!incounter.is_activated());
        let mut activations = 0;
        for i in 0..DEFAULT_AMORTIZATION {
            if incounter.decrement(i) == Status::Activated {
                activations += 1;
            }
        }
        assert_eq!(activations, 1);
        assert!(incounter.is_activated());
    }
}
