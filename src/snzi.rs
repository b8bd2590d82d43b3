//! Scalable Non-Zero Indicator (SNZI): a tree of counters that spreads
//! contention across leaves while still answering "is the aggregate nonzero?"
//! from the root alone.
//!
//! This is the classic two-state-per-node SNZI: each node's `(count, version)`
//! pair lives in one `AtomicU64`, `count` transitions through a distinguished
//! "half arrived" state while it propagates an `arrive` up to its parent, and
//! `version` is bumped on every such transition so a racing `depart` cannot
//! mistake a stale read of `count == 0` for a fresh one (ABA avoidance).
//!
//! Backs the `distributed` in-counter variant (see [`crate::edge::distributed`]).

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::concurrency::hashu;

/// Sentinel written into a node's `count` field while it is transitioning from
/// zero to one and has not yet committed.
const HALF_ARRIVED: i32 = -1;

fn pack(count: i32, version: i32) -> u64 {
    ((count as u32 as u64) << 32) | (version as u32 as u64)
}

fn unpack(word: u64) -> (i32, i32) {
    ((word >> 32) as u32 as i32, word as u32 as i32)
}

struct Node {
    contents: AtomicU64,
    parent: usize,
}

impl Node {
    const fn leaf(parent: usize) -> Self {
        Self {
            contents: AtomicU64::new(0),
            parent,
        }
    }
}

/// A fixed-height, fixed-branching-factor (2) SNZI tree.
///
/// The root stores no parent; instead callers use [`Tree::set_root_annotation`] /
/// [`Tree::root_annotation`] to stash the pointer-sized identity of whichever
/// object should be notified when the indicator falls to zero.
pub struct Tree {
    nodes: Vec<Node>,
    /// Number of leaf nodes (`1 << height`).
    nb_leaves: usize,
    /// Arbitrary payload describing what "zero" at the root means, e.g. a
    /// pointer to the owning in-counter's task. Tagged so that `0` can mean
    /// "unset" without conflating it with a real pointer value of `0`.
    root_annotation: AtomicUsize,
}

const UNSET: usize = 0;

impl Tree {
    /// Builds a complete binary tree of the given `height` (height 0 = a single
    /// root node acting as its own only leaf).
    pub fn new(height: u32) -> Self {
        let nb_nodes = (1usize << (height + 1)) - 1;
        let nb_leaves = 1usize << height;
        let mut nodes = Vec::with_capacity(nb_nodes);
        // Node 0 is the root; node i's parent is (i - 1) / 2.
        for i in 0..nb_nodes {
            let parent = if i == 0 { usize::MAX } else { (i - 1) / 2 };
            nodes.push(Node::leaf(parent));
        }
        Self {
            nodes,
            nb_leaves,
            root_annotation: AtomicUsize::new(UNSET),
        }
    }

    fn first_leaf(&self) -> usize {
        self.nodes.len() - self.nb_leaves
    }

    /// Returns the leaf index selected by hashing `identity` (e.g. a task
    /// pointer cast to `usize`), spreading distinct callers across leaves.
    pub fn random_leaf_of(&self, identity: usize) -> usize {
        let h = hashu(identity as u64) as usize;
        self.first_leaf() + (h % self.nb_leaves)
    }

    /// Stashes the root annotation (idempotent; callers install it once before
    /// any `arrive`/`depart` traffic begins).
    pub fn set_root_annotation(&self, ptr: usize) {
        self.root_annotation.store(ptr, Ordering::Release);
    }

    /// Reads back the root annotation set by [`Tree::set_root_annotation`].
    pub fn root_annotation(&self) -> usize {
        self.root_annotation.load(Ordering::Acquire)
    }

    /// Whether the indicator is currently nonzero (root's `count > 0`).
    pub fn is_nonzero(&self) -> bool {
        let (count, _) = unpack(self.nodes[0].contents.load(Ordering::Acquire));
        count > 0
    }

    /// Registers one arrival at `leaf`, propagating to the root as needed.
    pub fn arrive(&self, leaf: usize) {
        self.arrive_at(leaf);
    }

    fn arrive_at(&self, node_idx: usize) {
        let node = &self.nodes[node_idx];
        loop {
            let word = node.contents.load(Ordering::Acquire);
            let (count, version) = unpack(word);
            if count >= 1 {
                let new = pack(count + 1, version);
                if node
                    .contents
                    .compare_exchange(word, new, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return;
                }
                continue;
            }

            // count is 0 or HALF_ARRIVED; try to claim the half-arrived slot.
            debug_assert!(count == 0 || count == HALF_ARRIVED);
            if count == HALF_ARRIVED {
                // Someone else is already transitioning; spin until they commit
                // or fail (version will have changed either way).
                std::hint::spin_loop();
                continue;
            }
            let claim = pack(HALF_ARRIVED, version + 1);
            if node
                .contents
                .compare_exchange(word, claim, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }

            if node_idx != 0 {
                self.arrive_at(node.parent);
            }

            // Commit to 1. If another thread already bumped the version via a
            // subsequent arrive this will fail; fall back to a plain fetch-add
            // style bump since we know count is still in the half-arrived run.
            loop {
                let w = node.contents.load(Ordering::Acquire);
                let (c, v) = unpack(w);
                if c != HALF_ARRIVED {
                    // A concurrent depart/arrive already resolved this;
                    // nothing further to commit.
                    break;
                }
                let committed = pack(1, v);
                if node
                    .contents
                    .compare_exchange(w, committed, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    break;
                }
            }
            return;
        }
    }

    /// Registers one departure at `leaf`. Returns `true` exactly once per
    /// zero-crossing of the whole tree: the unique call whose propagation
    /// reaches the root and observes it drop from one to zero.
    pub fn depart(&self, leaf: usize) -> bool {
        self.depart_at(leaf)
    }

    fn depart_at(&self, node_idx: usize) -> bool {
        let node = &self.nodes[node_idx];
        loop {
            let word = node.contents.load(Ordering::Acquire);
            let (count, version) = unpack(word);
            debug_assert!(count >= 1, "depart without a matching arrive");
            let new_count = count - 1;
            let new = pack(new_count, version);
            if node
                .contents
                .compare_exchange(word, new, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }
            if new_count > 0 {
                return false;
            }
            if node_idx == 0 {
                return true;
            }
            return self.depart_at(node.parent);
        }
    }

    /// Number of leaves in this tree.
    pub fn nb_leaves(&self) -> usize {
        self.nb_leaves
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn starts_zero() {
        let tree = Tree::new(2);
        assert!(!tree.is_nonzero());
    }

    #[test]
    fn single_arrive_depart_round_trips() {
        let tree = Tree::new(2);
        tree.arrive(tree.first_leaf());
        assert!(tree.is_nonzero());
        assert!(tree.depart(tree.first_leaf()));
        assert!(!tree.is_nonzero());
    }

    #[test]
    fn many_arrivals_need_matching_departures() {
        let tree = Tree::new(3);
        let leaves: Vec<usize> = (0..tree.nb_leaves()).map(|i| tree.first_leaf() + i).collect();
        for &leaf in &leaves {
            tree.arrive(leaf);
            tree.arrive(leaf);
        }
        assert!(tree.is_nonzero());
        let mut zero_crossings = 0;
        for &leaf in &leaves {
            if tree.depart(leaf) {
                zero_crossings += 1;
            }
            if tree.depart(leaf) {
                zero_crossings += 1;
            }
        }
        assert_eq!(zero_crossings, 1, "exactly one depart call must observe the root hit zero");
        assert!(!tree.is_nonzero());
    }

    #[test]
    fn concurrent_arrivals_then_concurrent_departures_fire_exactly_once() {
        let tree = Arc::new(Tree::new(4));
        let nb_leaves = tree.nb_leaves();

        let arrivers: Vec<_> = (0..nb_leaves)
            .map(|i| {
                let tree = tree.clone();
                let leaf = tree.first_leaf() + i;
                thread::spawn(move || tree.arrive(leaf))
            })
            .collect();
        for h in arrivers {
            h.join().unwrap();
        }
        assert!(tree.is_nonzero());

        let departers: Vec<_> = (0..nb_leaves)
            .map(|i| {
                let tree = tree.clone();
                let leaf = tree.first_leaf() + i;
                thread::spawn(move || tree.depart(leaf))
            })
            .collect();
        let total: u32 = departers
            .into_iter()
            .map(|h| h.join().unwrap() as u32)
            .sum();
        assert_eq!(total, 1, "zero-crossing must be observed by exactly one caller overall");
        assert!(!tree.is_nonzero());
    }
}
