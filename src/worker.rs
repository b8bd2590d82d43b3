//! The work-stealing scheduler: a fixed pool of worker threads, each owning a
//! Chase-Lev deque, stealing from random victims when their own deque runs
//! dry and parking on a futex-style wait address when there is no work
//! anywhere.
//!
//! Spec's REDESIGN FLAG R1: the original runtime relied on an external
//! harness to decide when a computation was "done". Here [`Pool`] tracks
//! that itself with an explicit `outstanding` task counter, so [`Runtime::launch`]
//! can block the calling thread until the whole task graph has drained
//! without any cooperation from the embedder.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::concurrency::sync::{wait_on_u32, wake_all_u32};
use crate::concurrency::worklist::ChaseLevDeque;
use crate::concurrency::CachePadded;
use crate::config::Config;
use crate::edge::{IncounterSlot, OutsetSlot};
use crate::task::{Task, TaskAction, TaskContext};

/// Per-worker deque capacity. Must be a power of two; overflow falls back to
/// [`Pool::overflow`], which every worker also drains before stealing.
const DEQUE_CAPACITY: usize = 1 << 16;

thread_local! {
    static CURRENT_WORKER: Cell<Option<usize>> = Cell::new(None);
}

/// The id of the worker thread executing this call, or `None` if called from
/// outside the pool (e.g. the thread that called [`Runtime::launch`]).
pub fn current_worker_id() -> Option<usize> {
    CURRENT_WORKER.with(|c| c.get())
}

/// Shared pool state, reference-counted so a [`Task`] can hold a handle back
/// to the pool it runs on (needed to reschedule itself from
/// [`crate::edge::EdgeConsumer::notify`]).
pub struct Pool {
    config: Config,
    decks: Vec<CachePadded<ChaseLevDeque>>,
    overflow: Mutex<Vec<usize>>,
    shutdown: AtomicBool,
    outstanding: AtomicUsize,
    idle_round: AtomicU32,
    done: (Mutex<()>, Condvar),
}

/// A cheap-to-clone reference to the pool, threaded through every [`Task`]
/// and [`TaskContext`].
pub type PoolHandle = Arc<Pool>;

impl Pool {
    /// The configuration this pool was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Places `task` on a deque, preferring the calling worker's own deque
    /// (LIFO locality) and falling back to a shared overflow list if that
    /// deque is full. Wakes any worker parked waiting for work.
    ///
    /// `push_bottom`/`pop_bottom` are owner-only operations (only the worker
    /// thread that owns a `ChaseLevDeque` may call them); a call arriving from
    /// outside any worker thread — e.g. the thread running [`Runtime::launch`]
    /// — has no deque it owns, so it always goes through `overflow` instead of
    /// guessing at a worker's bottom.
    pub fn schedule(&self, task: Arc<Task>) {
        let ptr = Arc::into_raw(task) as usize;
        match current_worker_id() {
            Some(id) if !self.decks[id].push_bottom(ptr) => {
                self.overflow.lock().unwrap().push(ptr);
            }
            Some(_) => {}
            None => self.overflow.lock().unwrap().push(ptr),
        }
        self.idle_round.fetch_add(1, Ordering::Release);
        wake_all_u32(&self.idle_round);
    }

    /// Registers one more task in flight, keeping [`Runtime::launch`] blocked.
    pub fn task_created(&self) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
    }

    /// Marks one task as finished; wakes [`Runtime::launch`] if this was the
    /// last one outstanding.
    pub fn task_finished(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.done.0.lock().unwrap();
            self.done.1.notify_all();
        }
    }
}

fn run_task_ptr(ptr: usize) {
    let task = unsafe { Arc::from_raw(ptr as *const Task) };
    Task::run(&task);
}

fn worker_loop(pool: PoolHandle, id: usize, nb_workers: usize) {
    CURRENT_WORKER.with(|c| c.set(Some(id)));
    let mut rng = SmallRng::seed_from_u64((id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ 0xD1B5_4A32);

    loop {
        if pool.shutdown.load(Ordering::Acquire) {
            return;
        }

        if let Some(ptr) = pool.decks[id].pop_bottom() {
            run_task_ptr(ptr);
            continue;
        }

        if let Some(ptr) = pool.overflow.lock().unwrap().pop() {
            run_task_ptr(ptr);
            continue;
        }

        if nb_workers > 1 {
            let victim = loop {
                let v = rng.gen_range(0..nb_workers);
                if v != id {
                    break v;
                }
            };
            if let Some(ptr) = pool.decks[victim].steal() {
                // A stolen task is the one point in its life where it might
                // carry a divisible producer still worth dividing further
                // (spec 4.6) before this thief runs it.
                let task = unsafe { Arc::from_raw(ptr as *const Task) };
                Task::maybe_split(&task);
                Task::run(&task);
                continue;
            }
        }

        let round = pool.idle_round.load(Ordering::Acquire);
        if pool.shutdown.load(Ordering::Acquire) {
            return;
        }
        wait_on_u32(&pool.idle_round, round);
    }
}

/// An initialized scheduler, ready to run task graphs.
///
/// Dropping a `Runtime` signals every worker thread to stop after its
/// current task and joins them; it does not wait for outstanding tasks to
/// finish first (use [`Runtime::launch`]'s return for that).
pub struct Runtime {
    pool: PoolHandle,
    threads: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Starts a worker pool sized by `config.proc`.
    pub fn new(config: Config) -> Runtime {
        let nb_workers = config.proc.max(1);
        let decks = (0..nb_workers)
            .map(|_| CachePadded::new(ChaseLevDeque::new(DEQUE_CAPACITY)))
            .collect();
        let pool = Arc::new(Pool {
            config,
            decks,
            overflow: Mutex::new(Vec::new()),
            shutdown: AtomicBool::new(false),
            outstanding: AtomicUsize::new(0),
            idle_round: AtomicU32::new(0),
            done: (Mutex::new(()), Condvar::new()),
        });

        let threads = (0..nb_workers)
            .map(|id| {
                let pool = pool.clone();
                thread::Builder::new()
                    .name(format!("dagrt-worker-{id}"))
                    .spawn(move || worker_loop(pool, id, nb_workers))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Runtime { pool, threads }
    }

    /// The configuration this runtime was built from.
    pub fn config(&self) -> &Config {
        self.pool.config()
    }

    /// Runs `root_body` as a computation's root task and blocks the calling
    /// thread until it, and everything it transitively spawned, has
    /// finished.
    pub fn launch(
        &self,
        root_body: impl FnMut(&TaskContext<'_>, usize) -> TaskAction + Send + 'static,
    ) {
        let root = Task::new(self.pool.clone(), IncounterSlot::Ready, OutsetSlot::Noop, root_body);
        self.pool.task_created();
        self.pool.schedule(root);

        let mut guard = self.pool.done.0.lock().unwrap();
        while self.pool.outstanding.load(Ordering::Acquire) != 0 {
            guard = self.pool.done.1.wait(guard).unwrap();
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.pool.shutdown.store(true, Ordering::Release);
        wake_all_u32(&self.pool.idle_round);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    #[test]
    fn launch_blocks_until_a_single_task_completes() {
        let runtime = Runtime::new(Config { proc: 2, ..Config::default() });
        let ran = Arc::new(StdAtomicUsize::new(0));
        let ran_clone = ran.clone();
        runtime.launch(move |_ctx, _block| {
            ran_clone.fetch_add(1, Ordering::SeqCst);
            TaskAction::Done
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn launch_waits_for_spawned_async_descendants() {
        let runtime = Runtime::new(Config { proc: 4, ..Config::default() });
        let counter = Arc::new(StdAtomicUsize::new(0));

        runtime.launch({
            let counter = counter.clone();
            move |ctx, block| match block {
                0 => {
                    let counter = counter.clone();
                    crate::task::spawn_async(ctx, 1, move |_ctx, _block| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        TaskAction::Done
                    })
                }
                1 => TaskAction::Done,
                _ => unreachable!(),
            }
        });

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn finish_waits_for_a_producer_that_forks_async_children_before_returning() {
        let runtime = Runtime::new(Config { proc: 4, ..Config::default() });
        let counter = Arc::new(StdAtomicUsize::new(0));

        runtime.launch({
            let counter = counter.clone();
            move |ctx, block| match block {
                0 => {
                    let counter = counter.clone();
                    crate::task::finish(ctx, 1, move |ctx, _block| {
                        let c1 = counter.clone();
                        let c2 = counter.clone();
                        // Both children report back to this producer itself,
                        // which returns `Done` before either has necessarily
                        // run: the producer's in-counter must stay pending
                        // until both have reported in.
                        let _ = crate::task::spawn_async(ctx, 0, move |_ctx, _block| {
                            c1.fetch_add(1, Ordering::SeqCst);
                            TaskAction::Done
                        });
                        let _ = crate::task::spawn_async(ctx, 0, move |_ctx, _block| {
                            c2.fetch_add(1, Ordering::SeqCst);
                            TaskAction::Done
                        });
                        TaskAction::Done
                    })
                }
                1 => TaskAction::Done,
                _ => unreachable!(),
            }
        });

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn current_worker_id_is_set_inside_worker_threads_only() {
        assert_eq!(current_worker_id(), None);
        let runtime = Runtime::new(Config { proc: 2, ..Config::default() });
        let seen = Arc::new(StdAtomicUsize::new(usize::MAX));
        let seen_clone = seen.clone();
        runtime.launch(move |_ctx, _block| {
            if let Some(id) = current_worker_id() {
                seen_clone.store(id, Ordering::SeqCst);
            }
            TaskAction::Done
        });
        assert_ne!(seen.load(Ordering::SeqCst), usize::MAX);
    }
}
