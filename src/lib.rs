//! # `dagrt` — a work-stealing runtime for fine-grained task-graph parallelism
//!
//! A task graph is built out of a handful of primitives: [`tagged`] packs a
//! small discriminant into a pointer-sized word, [`snzi`] gives a tree a
//! scalable way to answer "is anything still outstanding", [`edge`] tracks
//! the in-edges and out-edges of a task behind four interchangeable
//! algorithms, and [`task`] ties those into a multishot task that re-enters
//! its body across explicit continuation blocks. [`worker`] schedules the
//! result: a fixed pool of threads stealing work from each other's
//! Chase-Lev deques.
//!
//! ## Example
//!
//! ```rust
//! use dagrt::{init, task, TaskAction};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let runtime = init(Default::default());
//! let total = Arc::new(AtomicUsize::new(0));
//!
//! runtime.launch({
//!     let total = total.clone();
//!     move |ctx, block| match block {
//!         0 => {
//!             let total = total.clone();
//!             task::parallel_for(ctx, 0, 1000, 1, 16, move |i| {
//!                 total.fetch_add(i, Ordering::Relaxed);
//!             })
//!         }
//!         1 => TaskAction::Done,
//!         _ => unreachable!(),
//!     }
//! });
//!
//! assert_eq!(total.load(Ordering::Relaxed), (0..1000).sum());
//! ```

#![warn(missing_docs, clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod concurrency;
pub mod config;
pub mod edge;
pub mod error;
pub mod snzi;
pub mod tagged;
pub mod task;
pub mod worker;

pub use config::Config;
pub use error::ConfigError;
pub use task::{Future, Task, TaskAction, TaskContext};
pub use worker::{current_worker_id, Runtime};

/// Starts a worker pool from `config`, ready to [`Runtime::launch`] task
/// graphs.
pub fn init(config: Config) -> Runtime {
    Runtime::new(config)
}
