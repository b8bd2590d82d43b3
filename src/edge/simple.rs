//! The `simple` edge-tracking variant: a heap-allocated fetch-add counter for
//! the in-counter and a lock-free Treiber stack for the out-set.
//!
//! This is the variant `Generic` falls back to when nothing about the task
//! graph calls for contention-spreading: one cache line for the whole counter,
//! one CAS per push.

use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::Arc;

use super::{EdgeConsumer, InsertOutcome, Incounter, Outset, Status};
use crate::concurrency::worklist::TreiberStack;

/// Heap-allocated fetch-add in-counter.
pub struct SimpleIncounter {
    count: AtomicIsize,
}

impl SimpleIncounter {
    /// Creates a new in-counter starting at zero in-edges.
    pub fn new() -> Self {
        Self {
            count: AtomicIsize::new(0),
        }
    }
}

impl Default for SimpleIncounter {
    fn default() -> Self {
        Self::new()
    }
}

impl Incounter for SimpleIncounter {
    fn increment(&self, _source: usize) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn decrement(&self, _source: usize) -> Status {
        let old = self.count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old >= 1, "simple in-counter decremented below zero");
        if old == 1 {
            Status::Activated
        } else {
            Status::NotActivated
        }
    }

    fn is_activated(&self) -> bool {
        self.count.load(Ordering::Acquire) == 0
    }
}

/// Lock-free Treiber-stack out-set: every insert races to prepend a cell;
/// `finish` atomically detaches and seals the whole list in one swap.
pub struct SimpleOutset {
    consumers: TreiberStack<Arc<dyn EdgeConsumer>>,
}

impl SimpleOutset {
    /// Creates a new, open out-set.
    pub fn new() -> Self {
        Self {
            consumers: TreiberStack::new(),
        }
    }
}

impl Default for SimpleOutset {
    fn default() -> Self {
        Self::new()
    }
}

impl Outset for SimpleOutset {
    fn insert(&self, consumer: Arc<dyn EdgeConsumer>) -> InsertOutcome {
        match self.consumers.push(consumer) {
            Ok(()) => InsertOutcome::Inserted,
            Err(_) => InsertOutcome::AlreadyFinished,
        }
    }

    fn finish(&self, source: usize) {
        for consumer in self.consumers.seal() {
            consumer.notify(source);
        }
    }
}
