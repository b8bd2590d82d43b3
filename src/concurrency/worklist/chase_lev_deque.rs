//! A fixed-capacity Chase-Lev work-stealing deque.
//!
//! Properties:
//! - Single owner: `push_bottom` / `pop_bottom`.
//! - Multiple stealers: `steal`.
//! - Fixed capacity, power-of-two ring buffer.
//!
//! Stores `usize` slots so callers can stash a task pointer (`*mut Task as usize`)
//! without this type knowing anything about tasks.

use core::sync::atomic::{fence, AtomicUsize, Ordering};

/// Sentinel for an empty slot.
pub const NONE: usize = usize::MAX;

/// A single-owner, multi-stealer Chase-Lev deque of `usize` slots.
pub struct ChaseLevDeque {
    top: AtomicUsize,
    bottom: AtomicUsize,
    buf: Vec<AtomicUsize>,
    mask: usize,
}

impl ChaseLevDeque {
    /// Creates a new deque. `capacity` must be a nonzero power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two());
        assert!(capacity != 0);
        let buf = (0..capacity).map(|_| AtomicUsize::new(NONE)).collect();
        Self {
            top: AtomicUsize::new(0),
            bottom: AtomicUsize::new(0),
            buf,
            mask: capacity - 1,
        }
    }

    /// Number of elements currently owned by this deque, from the owner's view.
    pub fn len(&self) -> usize {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Acquire);
        b.saturating_sub(t)
    }

    /// Whether the deque is empty, from the owner's view.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attempts to push `x` to the bottom. Owner-only. Returns `false` if full.
    pub fn push_bottom(&self, x: usize) -> bool {
        debug_assert!(x != NONE);
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Acquire);
        if b < t || b - t >= self.buf.len() {
            return false;
        }
        self.buf[b & self.mask].store(x, Ordering::Relaxed);
        fence(Ordering::Release);
        self.bottom.store(b + 1, Ordering::Release);
        true
    }

    /// Attempts to pop from the bottom. Owner-only.
    pub fn pop_bottom(&self) -> Option<usize> {
        let b = self.bottom.load(Ordering::Relaxed);
        let t0 = self.top.load(Ordering::Acquire);
        if b <= t0 {
            return None;
        }

        let b1 = b - 1;
        self.bottom.store(b1, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        let t = self.top.load(Ordering::Acquire);
        if t > b1 {
            self.bottom.store(b, Ordering::Relaxed);
            return None;
        }

        let x = self.buf[b1 & self.mask].load(Ordering::Relaxed);
        if t == b1 {
            if self
                .top
                .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_err()
            {
                self.bottom.store(b, Ordering::Relaxed);
                return None;
            }
            self.bottom.store(b, Ordering::Relaxed);
        }
        Some(x)
    }

    /// Attempts to steal from the top. Multi-stealer.
    pub fn steal(&self) -> Option<usize> {
        loop {
            let t = self.top.load(Ordering::Acquire);
            fence(Ordering::SeqCst);
            let b = self.bottom.load(Ordering::Acquire);
            if t >= b {
                return None;
            }
            let x = self.buf[t & self.mask].load(Ordering::Relaxed);
            if self
                .top
                .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                return Some(x);
            }
        }
    }
}
