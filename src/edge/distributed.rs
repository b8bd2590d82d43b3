//! The `distributed` edge-tracking variant: a SNZI tree in-counter.
//!
//! [`TreeIncounter`] backs only this variant. `dyntree` and `dyntreeopt` have
//! their own, differently shaped in-counter ([`super::dyntree::DyntreeIncounter`]):
//! a node there grows and shrinks dynamically along with the out-set sharing
//! its tree, rather than the fixed-height annotated tree a SNZI indicator
//! builds. What the three variants do share is the out-set: `distributed`'s
//! out-set is [`super::dyntree::DyntreeOutset`] unchanged (spec 4.3.2).

use super::{Incounter, Status};
use crate::snzi;

/// A SNZI-tree-backed in-counter.
pub struct TreeIncounter {
    tree: snzi::Tree,
}

impl TreeIncounter {
    /// Builds a fresh in-counter backed by a SNZI tree of the given `height`.
    pub fn new(height: u32) -> Self {
        Self {
            tree: snzi::Tree::new(height),
        }
    }
}

impl Incounter for TreeIncounter {
    fn increment(&self, source: usize) {
        let leaf = self.tree.random_leaf_of(source);
        self.tree.arrive(leaf);
    }

    fn decrement(&self, source: usize) -> Status {
        let leaf = self.tree.random_leaf_of(source);
        if self.tree.depart(leaf) {
            Status::Activated
        } else {
            Status::NotActivated
        }
    }

    fn is_activated(&self) -> bool {
        !self.tree.is_nonzero()
    }
}
