//! The `dyntree` edge-tracking variant: a dynamically growing, lock-free
//! concurrent tree shared by an in-counter ([`DyntreeIncounter`]) and an
//! out-set ([`DyntreeOutset`]).
//!
//! Both trees are built from the same idea: a node has a bounded amount of
//! local capacity (one arrival for the in-counter's base `A = 1`, one
//! consumer slot for the out-set), and once that capacity is exhausted, a
//! further arrival/consumer pseudo-randomly picks one of `branching` child
//! slots, installing a fresh node there the first time anything lands on it.
//! [`super::dyntreeopt`] reuses both engines verbatim, just with `A` raised
//! so most traffic never needs to grow a child at all.
//!
//! Every mutating operation here is a plain atomic load/CAS on a tagged word
//! (see [`crate::tagged`]) — no node is ever locked. The in-counter additionally
//! *shrinks* the tree as arrivals are matched by departures: when a node's
//! local count returns to zero and it has no live children, it CAS-seals
//! itself (so no racing increment can land on it again), CAS-detaches itself
//! from its parent's child slot, and threads itself onto [`DyntreeIncounter`]'s
//! `freelist` — a lock-free stack, not a scratch `Vec` — so the node survives
//! until the whole in-counter is dropped rather than being freed while some
//! other thread might still be mid-traversal through the now-stale pointer a
//! racing reader captured before the detach. The out-set never removes nodes
//! mid-flight (its tree only grows, until one single `finish` sweep seals it
//! for good), so it has nothing to defer: both it and the in-counter's
//! freelist are only ever actually deallocated by their respective `Drop`,
//! which Rust only runs once every other reference, and therefore every
//! concurrent caller, is gone.

use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::Arc;

use super::{EdgeConsumer, Incounter, InsertOutcome, Outset, Status};
use crate::concurrency::hashu;
use crate::concurrency::worklist::TreiberStack;
use crate::tagged;

const EMPTY_TAG: usize = 0;
const FILLED_TAG: usize = 1; // out-set consumer/child slot holding a live pointer
const CHILD_TAG: usize = 1; // in-counter child slot holding a live pointer
const SEALED_TAG: usize = 2;

/// Sentinel written into a [`CountNode`]'s `local` once it has been
/// CAS-sealed: permanently barred from ever absorbing another arrival.
const SEALED: isize = -1;

// ---------------------------------------------------------------------
// In-counter
// ---------------------------------------------------------------------

struct CountNode {
    parent: *const CountNode,
    parent_slot: usize,
    /// Arrivals currently absorbed by this node, bounded by `amortization`,
    /// or [`SEALED`] once this node has been fully drained and detached.
    local: AtomicIsize,
    /// `branching` child slots: [`EMPTY_TAG`] or [`CHILD_TAG`] (pointer to a
    /// child `CountNode`). Never tagged "removing" as a slot — removal is
    /// expressed instead by sealing the *child's own* `local`, see the module
    /// doc comment.
    children: Box<[AtomicUsize]>,
}

// SAFETY: `parent` is a raw pointer into the same tree, set once at
// construction and never mutated; every node it can point to lives at least
// as long as `self` (nodes are only freed after the whole in-counter drops).
unsafe impl Send for CountNode {}
unsafe impl Sync for CountNode {}

impl CountNode {
    fn root(branching: usize) -> Self {
        Self {
            parent: std::ptr::null(),
            parent_slot: 0,
            local: AtomicIsize::new(0),
            children: (0..branching).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    fn leaf(parent: &CountNode, parent_slot: usize, branching: usize) -> Self {
        Self {
            parent: parent as *const CountNode,
            parent_slot,
            // This node exists because of exactly one arrival: seed its own
            // local counter with it rather than publishing an empty node and
            // racing a second CAS to record the arrival that caused it.
            local: AtomicIsize::new(1),
            children: (0..branching).map(|_| AtomicUsize::new(0)).collect(),
        }
    }
}

/// A dynamically growing, lock-free concurrent in-counter (spec 4.3.3/4.3.5).
pub struct DyntreeIncounter {
    root: CountNode,
    branching: usize,
    amortization: isize,
    /// Nodes detached from the live tree by a completed `try_collapse`,
    /// parked here until `self` is dropped.
    freelist: TreiberStack<usize>,
}

impl DyntreeIncounter {
    /// Creates a fresh in-counter starting at zero in-edges. `branching`
    /// bounds fan-out per node; `amortization` bounds how many arrivals a
    /// single node absorbs before growing a child (1 for plain `dyntree`,
    /// larger for `dyntreeopt`).
    pub fn new(branching: usize, amortization: usize) -> Self {
        assert!(branching >= 1);
        assert!(amortization >= 1);
        Self {
            root: CountNode::root(branching),
            branching,
            amortization: amortization as isize,
            freelist: TreiberStack::new(),
        }
    }

    fn try_increment_at(&self, node: &CountNode, source: usize) -> bool {
        loop {
            let local = node.local.load(Ordering::Acquire);
            if local == SEALED {
                // A concurrent decrement fully drained and detached this
                // node; restart the whole increment from the root.
                return false;
            }
            if local < self.amortization {
                if node
                    .local
                    .compare_exchange_weak(local, local + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return true;
                }
                continue;
            }

            let idx = (hashu((source as u64).wrapping_add(node as *const CountNode as u64)) as usize)
                % self.branching;
            let slot = &node.children[idx];
            let word = slot.load(Ordering::Acquire);
            let (ptr, tag) = tagged::unpack(word);
            if tag == CHILD_TAG {
                let child = unsafe { &*(ptr as *const CountNode) };
                return self.try_increment_at(child, source);
            }
            // EMPTY: CAS-install a freshly allocated, pre-seeded child.
            let child = Box::into_raw(Box::new(CountNode::leaf(node, idx, self.branching)));
            let new_word = tagged::pack(child as usize, CHILD_TAG);
            match slot.compare_exchange(word, new_word, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return true,
                Err(_) => {
                    // SAFETY: nobody else observed `child`; we just allocated it.
                    unsafe {
                        drop(Box::from_raw(child));
                    }
                }
            }
        }
    }

    fn find_live_child(&self, node: &CountNode) -> Option<*const CountNode> {
        let start = (hashu(node as *const CountNode as u64) as usize) % self.branching;
        for i in 0..self.branching {
            let idx = (start + i) % self.branching;
            let (ptr, tag) = tagged::unpack(node.children[idx].load(Ordering::Acquire));
            if tag == CHILD_TAG {
                return Some(ptr as *const CountNode);
            }
        }
        None
    }

    fn try_decrement_at(&self, node: &CountNode, source: usize) -> Option<bool> {
        loop {
            let local = node.local.load(Ordering::Acquire);
            if local > 0 {
                if node
                    .local
                    .compare_exchange_weak(local, local - 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    continue;
                }
                if local - 1 == 0 {
                    return Some(self.try_collapse(node));
                }
                return Some(false);
            }
            // `local` is already 0 or SEALED: this arrival must be counted
            // somewhere further down.
            return match self.find_live_child(node) {
                Some(child_ptr) => {
                    let child = unsafe { &*child_ptr };
                    self.try_decrement_at(child, source)
                }
                // Stale read raced with a concurrent structural change
                // (e.g. the child we would have picked was just detached);
                // restart the whole decrement from the root.
                None => None,
            };
        }
    }

    /// Attempts to seal and detach `node`, cascading the same attempt up to
    /// its parent if that leaves the parent empty too. Returns whether the
    /// *root* was the node confirmed fully drained by this call — the unique
    /// global zero-crossing.
    fn try_collapse(&self, node: &CountNode) -> bool {
        if node.local.compare_exchange(0, SEALED, Ordering::AcqRel, Ordering::Acquire).is_err() {
            // A racing increment reused this node before we could seal it.
            return false;
        }
        for slot in node.children.iter() {
            if tagged::tag_of(slot.load(Ordering::Acquire)) == CHILD_TAG {
                // Still has a live descendant. It stays sealed (arrivals will
                // never reuse it again) but reachable, a harmless pass-through
                // until that descendant itself eventually collapses.
                return false;
            }
        }
        if node.parent.is_null() {
            return true;
        }
        // SAFETY: `parent` outlives every one of its descendants.
        let parent = unsafe { &*node.parent };
        let expect = tagged::pack(node as *const CountNode as usize, CHILD_TAG);
        let slot = &parent.children[node.parent_slot];
        if slot
            .compare_exchange(expect, tagged::pack(0, EMPTY_TAG), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let _ = self.freelist.push(node as *const CountNode as usize);
            self.try_collapse(parent)
        } else {
            false
        }
    }
}

impl Incounter for DyntreeIncounter {
    fn increment(&self, source: usize) {
        while !self.try_increment_at(&self.root, source) {}
    }

    fn decrement(&self, source: usize) -> Status {
        loop {
            if let Some(activated) = self.try_decrement_at(&self.root, source) {
                return if activated { Status::Activated } else { Status::NotActivated };
            }
        }
    }

    fn is_activated(&self) -> bool {
        if self.root.local.load(Ordering::Acquire) > 0 {
            return false;
        }
        self.root
            .children
            .iter()
            .all(|slot| tagged::tag_of(slot.load(Ordering::Acquire)) != CHILD_TAG)
    }
}

impl Drop for DyntreeIncounter {
    fn drop(&mut self) {
        fn free_subtree(ptr: *const CountNode) {
            // SAFETY: every node reachable from a CHILD-tagged slot, or
            // parked on the freelist, was heap-allocated by
            // `try_increment_at`/never freed until this `Drop` runs — each
            // node is reachable from exactly one of "still live in the tree"
            // or "on the freelist", never both.
            let node = unsafe { Box::from_raw(ptr as *mut CountNode) };
            for slot in node.children.iter() {
                let (child_ptr, tag) = tagged::unpack(slot.load(Ordering::Relaxed));
                if tag == CHILD_TAG {
                    free_subtree(child_ptr as *const CountNode);
                }
            }
        }
        for slot in self.root.children.iter() {
            let (ptr, tag) = tagged::unpack(slot.load(Ordering::Relaxed));
            if tag == CHILD_TAG {
                free_subtree(ptr as *const CountNode);
            }
        }
        for ptr in self.freelist.seal() {
            free_subtree(ptr as *const CountNode);
        }
    }
}

// ---------------------------------------------------------------------
// Out-set
// ---------------------------------------------------------------------

struct ConsumerCell {
    consumer: Arc<dyn EdgeConsumer>,
}

struct ConsumerNode {
    /// `amortization` consumer slots: `EMPTY` / `FILLED` (pointer to a
    /// [`ConsumerCell`]) / `SEALED`.
    consumers: Box<[AtomicUsize]>,
    /// `branching` child slots: `EMPTY` / `FILLED` (pointer to a child
    /// `ConsumerNode`) / `SEALED`.
    children: Box<[AtomicUsize]>,
}

impl ConsumerNode {
    fn new(branching: usize, amortization: usize) -> Self {
        Self {
            consumers: (0..amortization).map(|_| AtomicUsize::new(0)).collect(),
            children: (0..branching).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    /// Seals a single consumer slot: if it was `EMPTY`, marks it `SEALED` so
    /// no later `insert` can land there, and returns `None`. If a consumer
    /// had already landed there, returns it (without touching the slot
    /// further — it is left `FILLED`; nothing reads it again).
    fn seal_consumer_slot(slot: &AtomicUsize) -> Option<*const ConsumerCell> {
        loop {
            let word = slot.load(Ordering::Acquire);
            let (ptr, tag) = tagged::unpack(word);
            match tag {
                EMPTY_TAG => {
                    if slot
                        .compare_exchange(word, tagged::pack(0, SEALED_TAG), Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return None;
                    }
                    // Lost the race to a concurrent insert; reload and retry.
                }
                FILLED_TAG => return Some(ptr as *const ConsumerCell),
                SEALED_TAG => return None,
                _ => unreachable!("out-set slot tag"),
            }
        }
    }
}

/// A dynamically growing, lock-free concurrent out-set (spec 4.3.4/4.3.5).
///
/// Also backs the `distributed` variant's out-set unchanged, per spec 4.3.2.
pub struct DyntreeOutset {
    root: ConsumerNode,
    branching: usize,
    amortization: usize,
}

impl DyntreeOutset {
    /// Creates a new, open out-set. `branching` bounds fan-out per node;
    /// `amortization` bounds how many consumers a single node holds before
    /// growing a child (1 for plain `dyntree`, larger for `dyntreeopt`).
    pub fn new(branching: usize, amortization: usize) -> Self {
        assert!(branching >= 1);
        assert!(amortization >= 1);
        Self { root: ConsumerNode::new(branching, amortization), branching, amortization }
    }

    fn insert_into(&self, node: &ConsumerNode, consumer: Arc<dyn EdgeConsumer>, seed: u64) -> InsertOutcome {
        let start = (seed as usize) % node.consumers.len();
        for i in 0..node.consumers.len() {
            let idx = (start + i) % node.consumers.len();
            let slot = &node.consumers[idx];
            let word = slot.load(Ordering::Acquire);
            if tagged::tag_of(word) != EMPTY_TAG {
                continue;
            }
            let cell = Box::into_raw(Box::new(ConsumerCell { consumer: consumer.clone() }));
            let new_word = tagged::pack(cell as usize, FILLED_TAG);
            match slot.compare_exchange(word, new_word, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return InsertOutcome::Inserted,
                Err(_) => unsafe {
                    drop(Box::from_raw(cell));
                },
            }
        }

        // Every local slot was full or sealed: descend into (or grow) one
        // pseudo-randomly chosen child.
        let idx = (seed as usize) % node.children.len();
        let slot = &node.children[idx];
        loop {
            let word = slot.load(Ordering::Acquire);
            let (ptr, tag) = tagged::unpack(word);
            match tag {
                EMPTY_TAG => {
                    let child = Box::into_raw(Box::new(ConsumerNode::new(self.branching, self.amortization)));
                    let new_word = tagged::pack(child as usize, FILLED_TAG);
                    match slot.compare_exchange(word, new_word, Ordering::AcqRel, Ordering::Acquire) {
                        Ok(_) => {
                            let child_ref = unsafe { &*child };
                            return self.insert_into(child_ref, consumer, hashu(seed));
                        }
                        Err(_) => unsafe {
                            drop(Box::from_raw(child));
                        },
                    }
                }
                FILLED_TAG => {
                    let child = unsafe { &*(ptr as *const ConsumerNode) };
                    return self.insert_into(child, consumer, hashu(seed));
                }
                SEALED_TAG => return InsertOutcome::AlreadyFinished,
                _ => unreachable!("out-set slot tag"),
            }
        }
    }

    fn finish_node(node: &ConsumerNode, source: usize) {
        for slot in node.consumers.iter() {
            if let Some(cell_ptr) = ConsumerNode::seal_consumer_slot(slot) {
                // SAFETY: a `FILLED` consumer slot's cell is never freed
                // before `self` (the whole out-set) is dropped.
                let cell = unsafe { &*cell_ptr };
                cell.consumer.notify(source);
            }
        }
        for slot in node.children.iter() {
            loop {
                let word = slot.load(Ordering::Acquire);
                let (ptr, tag) = tagged::unpack(word);
                match tag {
                    EMPTY_TAG => {
                        if slot
                            .compare_exchange(word, tagged::pack(0, SEALED_TAG), Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                        {
                            break;
                        }
                    }
                    FILLED_TAG => {
                        let child = unsafe { &*(ptr as *const ConsumerNode) };
                        Self::finish_node(child, source);
                        break;
                    }
                    SEALED_TAG => break,
                    _ => unreachable!("out-set slot tag"),
                }
            }
        }
    }
}

impl Outset for DyntreeOutset {
    fn insert(&self, consumer: Arc<dyn EdgeConsumer>) -> InsertOutcome {
        let seed = Arc::as_ptr(&consumer) as *const () as u64;
        self.insert_into(&self.root, consumer, hashu(seed))
    }

    fn finish(&self, source: usize) {
        Self::finish_node(&self.root, source);
    }
}

impl Drop for DyntreeOutset {
    fn drop(&mut self) {
        fn free_node_contents(node: &ConsumerNode) {
            for slot in node.consumers.iter() {
                let (ptr, tag) = tagged::unpack(slot.load(Ordering::Relaxed));
                if tag == FILLED_TAG {
                    // SAFETY: exclusive access via `&mut self`, nothing else
                    // can still be racing `insert`/`finish`.
                    unsafe {
                        drop(Box::from_raw(ptr as *mut ConsumerCell));
                    }
                }
            }
            for slot in node.children.iter() {
                let (ptr, tag) = tagged::unpack(slot.load(Ordering::Relaxed));
                if tag == FILLED_TAG {
                    let child = unsafe { Box::from_raw(ptr as *mut ConsumerNode) };
                    free_node_contents(&child);
                }
            }
        }
        free_node_contents(&self.root);
    }
}
