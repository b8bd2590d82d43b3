//! Multishot tasks: a single heap object that re-enters its body across
//! several explicit continuation blocks, and the five edge operations
//! (`async`, `finish`, `future`/`force`, `parallel_for`) that create and wire
//! together the tasks of a computation.
//!
//! A task is always held behind an `Arc`: the scheduler, a producer's
//! out-set, and a consumer's notification path all need to share ownership of
//! the same task without knowing in advance which one will be the last to
//! drop it. Its in-counter and out-set slots live in `UnsafeCell`s because
//! only the thread currently running a task's body ever replaces them
//! (`finish`/`force`/`parallel_for` install a fresh slot at the moment they
//! suspend); concurrent *counting* on an already-installed slot is the job of
//! the atomics/locks inside [`IncounterSlot`]/[`OutsetSlot`] themselves.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::edge::{EdgeConsumer, IncounterSlot, InsertOutcome, OutsetSlot, Status};
use crate::worker::PoolHandle;

/// What a task's body asks the scheduler to do after one block has run.
pub enum TaskAction {
    /// No more blocks to run; seal this task's out-set and notify consumers.
    Done,
    /// Re-enqueue this task immediately, resuming at block `_0` next time.
    JumpTo(usize),
    /// Don't re-enqueue; a consumer of this task's in-counter will do it once
    /// the in-counter reaches zero.
    Suspend,
}

/// The signature every task body closure implements.
pub type Body = dyn FnMut(&TaskContext<'_>, usize) -> TaskAction + Send;

/// Passed to a task's body on every call: who it is, and how to reach the
/// pool it runs on.
pub struct TaskContext<'a> {
    /// This task, as the scheduler currently sees it.
    pub this: &'a Arc<Task>,
    /// The pool this task belongs to.
    pub pool: &'a PoolHandle,
}

/// A multishot task.
pub struct Task {
    incounter: UnsafeCell<IncounterSlot>,
    outset: UnsafeCell<OutsetSlot>,
    block: UnsafeCell<usize>,
    body: UnsafeCell<Option<Box<Body>>>,
    /// Set once this task lazily upgrades to a counting in-counter to accept
    /// `spawn_async` children (see `ensure_counting_incounter`). When set,
    /// the in-counter holds one extra placeholder edge standing for this
    /// task's own eventual completion, which [`Task::run`]'s `Done` handling
    /// must consume like any other in-edge before the task is truly finished.
    self_edge: UnsafeCell<bool>,
    /// Present only on a `parallel_for` leaf produced before it has run: lets
    /// a thief carve off half of its remaining range at steal-time (spec
    /// 4.6) instead of running the whole range itself. `None` for every
    /// other task.
    divisible: UnsafeCell<Option<Box<dyn DivisibleProducer>>>,
    pool: PoolHandle,
}

// SAFETY: every field is only mutated by whichever thread currently owns
// exclusive execution of this task (the scheduler's single-runner
// invariant, see `crate::worker`); cross-thread access to the in-counter and
// out-set goes through their own thread-safe methods.
unsafe impl Send for Task {}
unsafe impl Sync for Task {}

impl Task {
    /// Creates a new task, not yet scheduled.
    pub fn new(
        pool: PoolHandle,
        incounter: IncounterSlot,
        outset: OutsetSlot,
        body: impl FnMut(&TaskContext<'_>, usize) -> TaskAction + Send + 'static,
    ) -> Arc<Task> {
        Arc::new(Task {
            incounter: UnsafeCell::new(incounter),
            outset: UnsafeCell::new(outset),
            block: UnsafeCell::new(0),
            body: UnsafeCell::new(Some(Box::new(body))),
            self_edge: UnsafeCell::new(false),
            divisible: UnsafeCell::new(None),
            pool,
        })
    }

    /// Attaches a divisible producer to a freshly created, not-yet-scheduled
    /// task.
    fn install_divisible(self_arc: &Arc<Task>, producer: Box<dyn DivisibleProducer>) {
        unsafe {
            *self_arc.divisible.get() = Some(producer);
        }
    }

    /// Gives this task's divisible producer, if it has one, a chance to carve
    /// off roughly half of its remaining work before the calling thief runs
    /// it. A no-op for every task that isn't a `parallel_for` leaf.
    ///
    /// # Safety
    /// Callable only by a thief right after stealing `self_arc` and before
    /// calling [`Task::run`] on it, i.e. while no other thread can yet be
    /// running or re-stealing it.
    pub fn maybe_split(self_arc: &Arc<Task>) {
        let slot = unsafe { &*self_arc.divisible.get() };
        if let Some(producer) = slot {
            producer.split();
        }
    }

    /// This task's identity, stable for its lifetime, used to pick
    /// tree-shaped edge-tracking leaves/paths.
    pub fn identity(self_arc: &Arc<Task>) -> usize {
        Arc::as_ptr(self_arc) as *const () as usize
    }

    /// Shared access to this task's in-counter.
    pub fn incounter(&self) -> &IncounterSlot {
        // SAFETY: reading the slot's current discriminant/value through its
        // own thread-safe methods is always sound; only *replacing* the
        // slot requires exclusive ownership (see `replace_incounter`).
        unsafe { &*self.incounter.get() }
    }

    /// Shared access to this task's out-set.
    pub fn outset(&self) -> &OutsetSlot {
        unsafe { &*self.outset.get() }
    }

    /// Replaces this task's in-counter slot.
    ///
    /// # Safety
    /// Callable only from within this task's own body, i.e. while the caller
    /// holds the scheduler's exclusive right to run it.
    unsafe fn replace_incounter(&self, new: IncounterSlot) {
        *self.incounter.get() = new;
    }

    /// Ensures this task's in-counter can accept an in-edge from a
    /// `spawn_async` child, lazily upgrading it if needed.
    ///
    /// A freshly created task's in-counter (`Ready`, or `Unary` once fired)
    /// holds no object capable of counting an arbitrary number of in-edges.
    /// The first time a running task spawns an async child reporting back to
    /// itself, this swaps in a `FetchAdd` counter seeded with one
    /// placeholder edge standing for the task's own eventual completion —
    /// without it, the last child to report in would race the task's own
    /// `Done` return to decide who finishes the task.
    fn ensure_counting_incounter(&self) {
        let already_counting =
            matches!(self.incounter(), IncounterSlot::FetchAdd(_) | IncounterSlot::Generic(_));
        if already_counting {
            return;
        }
        // SAFETY: only called from within this task's own body.
        unsafe {
            self.replace_incounter(IncounterSlot::FetchAdd(AtomicIsize::new(1)));
            *self.self_edge.get() = true;
        }
    }

    fn current_block(&self) -> usize {
        // SAFETY: see `replace_incounter`; same single-writer discipline.
        unsafe { *self.block.get() }
    }

    fn set_block(&self, next: usize) {
        unsafe {
            *self.block.get() = next;
        }
    }

    /// Runs exactly one block of this task's body (one "shot"), then acts on
    /// the result: finishes and frees the task, re-enqueues it, or leaves it
    /// suspended for a later wake-up.
    pub fn run(self_arc: &Arc<Task>) {
        let block = self_arc.current_block();
        let pool = self_arc.pool.clone();
        let action = {
            let ctx = TaskContext { this: self_arc, pool: &pool };
            let body_slot = unsafe { &mut *self_arc.body.get() };
            let body = body_slot.as_mut().expect("task body missing or already finished");
            body(&ctx, block)
        };
        match action {
            TaskAction::Done => {
                // Consumed first: if some in-flight async child's `notify`
                // is the one that ends up crossing this in-counter to zero,
                // it must see the body already gone so it finishes the task
                // itself instead of trying to run a non-existent next block.
                unsafe {
                    *self_arc.body.get() = None;
                }
                let identity = Task::identity(self_arc);
                let has_self_edge = unsafe { *self_arc.self_edge.get() };
                let fully_done = if has_self_edge {
                    self_arc.incounter().decrement(identity) == Status::Activated
                } else {
                    self_arc.incounter().is_activated()
                };
                if fully_done {
                    self_arc.outset().finish(identity);
                    pool.task_finished();
                }
            }
            TaskAction::JumpTo(next) => {
                self_arc.set_block(next);
                pool.schedule(self_arc.clone());
            }
            TaskAction::Suspend => {}
        }
    }
}

impl EdgeConsumer for Task {
    fn notify(&self, source: usize) {
        if self.incounter().decrement(source) == Status::Activated {
            // Every `Task` handed out as an `EdgeConsumer` is always behind
            // an `Arc`; `self` is that `Arc`'s data pointer, so we can
            // recover an owned handle without the caller having to thread
            // one through `notify`'s signature.
            let ptr = self as *const Task;
            unsafe {
                Arc::increment_strong_count(ptr);
            }
            let owned = unsafe { Arc::from_raw(ptr) };
            let body_already_done = unsafe { (*self.body.get()).is_none() };
            if body_already_done {
                // This task's own body already returned `Done` while async
                // children were still outstanding; this is the last one, so
                // finish up directly rather than trying to run a block that
                // no longer exists.
                let identity = Task::identity(&owned);
                owned.outset().finish(identity);
                self.pool.task_finished();
            } else {
                self.pool.schedule(owned);
            }
        }
    }
}

/// A future: a handle to a producer task whose out-set may be `force`d by
/// more than one reader.
#[derive(Clone)]
pub struct Future(Arc<Task>);

impl Future {
    /// Attempts to record `consumer` so it is notified when this future's
    /// producer finishes.
    fn insert(&self, consumer: Arc<dyn EdgeConsumer>) -> InsertOutcome {
        self.0.outset().insert(consumer)
    }
}

/// `async(producer_body, k)`: spawn a fire-and-forget producer that reports
/// to the caller, and move the caller on to block `k` immediately.
pub fn spawn_async(
    ctx: &TaskContext<'_>,
    continuation_block: usize,
    producer_body: impl FnMut(&TaskContext<'_>, usize) -> TaskAction + Send + 'static,
) -> TaskAction {
    ctx.this.ensure_counting_incounter();
    let consumer: Arc<dyn EdgeConsumer> = ctx.this.clone();
    let producer = Task::new(ctx.pool.clone(), IncounterSlot::Ready, OutsetSlot::Unary(consumer), producer_body);
    let identity = Task::identity(&producer);
    ctx.this.incounter().increment(identity);
    ctx.pool.task_created();
    ctx.pool.schedule(producer);
    TaskAction::JumpTo(continuation_block)
}

/// `finish(producer_body, k)`: spawn a producer, suspend the caller behind a
/// fresh single-edge in-counter, and resume the caller at block `k` once the
/// producer (and transitively, everything it spawned) has finished.
pub fn finish(
    ctx: &TaskContext<'_>,
    continuation_block: usize,
    producer_body: impl FnMut(&TaskContext<'_>, usize) -> TaskAction + Send + 'static,
) -> TaskAction {
    let consumer: Arc<dyn EdgeConsumer> = ctx.this.clone();
    // SAFETY: called from within `ctx.this`'s own body, which holds
    // exclusive rights to it for the duration of this call.
    unsafe {
        ctx.this.replace_incounter(IncounterSlot::unary());
    }
    ctx.this.set_block(continuation_block);
    let producer = Task::new(ctx.pool.clone(), IncounterSlot::Ready, OutsetSlot::Unary(consumer), producer_body);
    ctx.pool.task_created();
    ctx.pool.schedule(producer);
    TaskAction::Suspend
}

/// `future(producer_body, k)`: like `spawn_async`, but the producer's
/// out-set is a multi-consumer [`crate::edge`] object instead of a direct
/// single edge, so more than one later caller can `force` it.
pub fn spawn_future(
    ctx: &TaskContext<'_>,
    continuation_block: usize,
    producer_body: impl FnMut(&TaskContext<'_>, usize) -> TaskAction + Send + 'static,
) -> (Future, TaskAction) {
    let (_, outset) = ctx.pool.config().edge_algo.build(ctx.pool.config());
    let producer = Task::new(
        ctx.pool.clone(),
        IncounterSlot::Ready,
        crate::edge::OutsetSlot::Generic(outset),
        producer_body,
    );
    ctx.pool.task_created();
    ctx.pool.schedule(producer.clone());
    (Future(producer), TaskAction::JumpTo(continuation_block))
}

/// `force(future, k)`: block the caller on `future` if it has not finished
/// yet (resuming at `k` once it does), or continue immediately at `k` if it
/// already had.
pub fn force(ctx: &TaskContext<'_>, future: &Future, continuation_block: usize) -> TaskAction {
    unsafe {
        ctx.this.replace_incounter(IncounterSlot::unary());
    }
    let consumer: Arc<dyn EdgeConsumer> = ctx.this.clone();
    match future.insert(consumer) {
        InsertOutcome::Inserted => {
            ctx.this.set_block(continuation_block);
            TaskAction::Suspend
        }
        InsertOutcome::AlreadyFinished => TaskAction::JumpTo(continuation_block),
    }
}

/// A range of loop indices shared between a `parallel_for` leaf's body and
/// its [`DivisibleProducer`]: the body reads it once, at the moment it
/// finally runs; `split` may have shrunk it zero or more times before then.
struct Range {
    lo: AtomicUsize,
    hi: AtomicUsize,
}

/// Something a thief may divide in two before running it (spec 4.6). Carried
/// by a `parallel_for` leaf task; every other task has none.
trait DivisibleProducer: Send {
    /// Carves off roughly half of the remaining range into a fresh,
    /// independently schedulable task wired to the same join consumer, if
    /// there's enough of it left to be worth dividing. Returns whether it did.
    fn split(&self) -> bool;
}

struct ForRangeProducer {
    pool: PoolHandle,
    range: Arc<Range>,
    chunk: usize,
    body_fn: Arc<dyn Fn(usize) + Send + Sync>,
    join: Arc<Task>,
}

impl DivisibleProducer for ForRangeProducer {
    fn split(&self) -> bool {
        let lo = self.range.lo.load(Ordering::Relaxed);
        let hi = self.range.hi.load(Ordering::Relaxed);
        if hi.saturating_sub(lo) <= self.chunk {
            return false;
        }
        let mid = lo + (hi - lo) / 2;
        // Shrink this task's own remaining range first so the two halves
        // never overlap regardless of when its body eventually runs.
        self.range.hi.store(mid, Ordering::Relaxed);
        self.join.incounter().increment(Task::identity(&self.join));
        spawn_for_range_task(&self.pool, mid, hi, self.chunk, self.body_fn.clone(), self.join.clone());
        true
    }
}

fn spawn_for_range_task(
    pool: &PoolHandle,
    lo: usize,
    hi: usize,
    chunk: usize,
    body_fn: Arc<dyn Fn(usize) + Send + Sync>,
    join: Arc<Task>,
) {
    let range = Arc::new(Range {
        lo: AtomicUsize::new(lo),
        hi: AtomicUsize::new(hi),
    });
    let join_consumer: Arc<dyn EdgeConsumer> = join.clone();
    let body_range = range.clone();
    let body_fn_for_task = body_fn.clone();
    let task = Task::new(
        pool.clone(),
        IncounterSlot::Ready,
        OutsetSlot::Unary(join_consumer),
        move |_ctx, _block| {
            let lo = body_range.lo.load(Ordering::Relaxed);
            let hi = body_range.hi.load(Ordering::Relaxed);
            for i in lo..hi {
                (body_fn_for_task)(i);
            }
            TaskAction::Done
        },
    );
    Task::install_divisible(
        &task,
        Box::new(ForRangeProducer { pool: pool.clone(), range, chunk, body_fn, join }),
    );
    pool.task_created();
    pool.schedule(task);
}

/// `parallel_for(lo, hi, body, k)`: run `body(i)` for every `i` in
/// `[lo, hi)`, and resume the caller at block `k` once every index has run.
///
/// The whole range starts out as a single divisible-producer leaf task (spec
/// 4.6): a thief that steals it before it runs may call `split` on it first,
/// carving off roughly half the remaining range into a second, independently
/// schedulable leaf wired to the same join consumer, and so on recursively
/// for whichever half gets stolen next. A leaf nobody steals just runs its
/// whole current range in one shot — no tree is built up front.
pub fn parallel_for(
    ctx: &TaskContext<'_>,
    lo: usize,
    hi: usize,
    continuation_block: usize,
    chunk: usize,
    body_fn: impl Fn(usize) + Send + Sync + 'static,
) -> TaskAction {
    unsafe {
        ctx.this.replace_incounter(IncounterSlot::unary());
    }
    ctx.this.set_block(continuation_block);
    let consumer: Arc<dyn EdgeConsumer> = ctx.this.clone();
    let chunk = chunk.max(1);
    let body_fn: Arc<dyn Fn(usize) + Send + Sync> = Arc::new(body_fn);

    let join = Task::new(
        ctx.pool.clone(),
        IncounterSlot::fetch_add(),
        OutsetSlot::Unary(consumer),
        |_ctx, _block| TaskAction::Done,
    );
    ctx.pool.task_created();
    join.incounter().increment(Task::identity(&join));

    spawn_for_range_task(ctx.pool, lo, hi, chunk, body_fn, join);
    TaskAction::Suspend
}
