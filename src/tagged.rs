//! Tagged words: a pointer-sized value carrying a small integer tag in its low bits.
//!
//! Every reference to an in-counter or out-set is a tagged word: the tag picks one
//! of a handful of cheap inline representations (see [`crate::edge`]) before ever
//! falling back to a heap-allocated tree. The dyntree/dyntreeopt child slots and the
//! SNZI root's annotation-or-parent disambiguation both reuse this same primitive.

use core::sync::atomic::{AtomicUsize, Ordering};

/// Number of bits reserved for the tag. Allocations handed to [`pack`] must be
/// aligned to at least `1 << NUM_TAG_BITS`.
pub const NUM_TAG_BITS: u32 = 3;

/// Bitmask covering the tag bits.
pub const TAG_MASK: usize = (1 << NUM_TAG_BITS) - 1;

/// Packs a (possibly zero) pointer-sized value and a tag into one word.
///
/// # Panics
/// Panics in debug builds if `value` has any of its low `NUM_TAG_BITS` set, or if
/// `tag` does not fit in `NUM_TAG_BITS`.
#[inline]
pub fn pack(value: usize, tag: usize) -> usize {
    debug_assert_eq!(value & TAG_MASK, 0, "value is not tag-aligned");
    debug_assert!(tag <= TAG_MASK, "tag does not fit in NUM_TAG_BITS");
    value | tag
}

/// Splits a tagged word back into its value and tag components.
#[inline]
pub fn unpack(word: usize) -> (usize, usize) {
    (word & !TAG_MASK, word & TAG_MASK)
}

/// Returns just the value component of a tagged word.
#[inline]
pub fn value_of(word: usize) -> usize {
    word & !TAG_MASK
}

/// Returns just the tag component of a tagged word.
#[inline]
pub fn tag_of(word: usize) -> usize {
    word & TAG_MASK
}

/// Atomically adds `delta` to the value component of a tagged atomic word, leaving
/// its tag untouched, and returns the pre-image's value component.
///
/// This is the entire mechanism behind the `simple` in-counter variant: the counter
/// *is* the tagged word, and increment/decrement are calls to this function with
/// `delta` of `+1`/`-1`.
///
/// # Panics
/// Panics in debug builds if the shifted delta would disturb the tag bits of an
/// in-flight neighbor value, i.e. if `delta` does not fit in the value's bit width.
#[inline]
pub fn fetch_add_value(word: &AtomicUsize, delta: isize) -> isize {
    let shifted = delta.wrapping_shl(NUM_TAG_BITS);
    let old = word.fetch_add(shifted as usize, Ordering::AcqRel);
    (value_of(old) as isize) >> NUM_TAG_BITS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_roundtrip() {
        for tag in 0..=TAG_MASK {
            let ptr = 0x1000usize;
            let word = pack(ptr, tag);
            assert_eq!(unpack(word), (ptr, tag));
        }
    }

    #[test]
    fn fetch_add_value_preserves_tag() {
        let word = AtomicUsize::new(pack(0, 5));
        let old = fetch_add_value(&word, 3);
        assert_eq!(old, 0);
        let (value, tag) = unpack(word.load(Ordering::SeqCst));
        assert_eq!(value >> NUM_TAG_BITS, 3);
        assert_eq!(tag, 5);
    }

    #[test]
    fn fetch_add_value_handles_negative_delta() {
        let word = AtomicUsize::new(pack(1 << NUM_TAG_BITS, 0));
        let old = fetch_add_value(&word, -1);
        assert_eq!(old, 1);
        assert_eq!(value_of(word.load(Ordering::SeqCst)), 0);
    }
}
