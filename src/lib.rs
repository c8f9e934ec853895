//! Execute queued tasks on a fixed pool of worker threads, with optional
//! per-strand serialization.
//!
//! A dispatch pool couples three pieces: an unbounded FIFO queue of tasks
//! shared by every handle, a fixed set of worker threads draining that
//! queue, and a reference-counted [`WorkGuard`] that keeps the workers
//! parked on an empty queue while more work may still be submitted. On top
//! of those sits the [`Strand`], a serialization domain for tasks that must
//! not overlap.
//!
//! Tasks submitted through a [`Dispatcher`] run on whichever worker frees
//! up first; once two or more workers drain the queue, unrelated tasks have
//! no ordering relation at all. Tasks submitted through the same [`Strand`]
//! run one at a time, in submission order, while distinct strands stay free
//! to run concurrently. That split is deliberate: unrelated work stays
//! unordered for throughput, and FIFO execution is bought back only where a
//! shared key demands it.
//!
//! A pool stops once its queue is empty and the last [`WorkGuard`] has been
//! dropped, or once [`DispatchPool::shutdown`] closes the queue; either
//! way, tasks already accepted into the shared queue are drained before the
//! workers exit. A panicking task is caught and logged by the worker that
//! ran it and never takes the worker down.
//!
//! # Example
//!
//! ```
//! use dispatch_pool::DispatchPool;
//!
//! let (dispatcher, pool) = DispatchPool::fixed_size(4);
//! let guard = dispatcher.work_guard();
//! pool.start();
//!
//! // Serialized: these three run one at a time, in order.
//! let strand = dispatcher.strand();
//! for i in 0..3 {
//!     strand.submit(move || println!("in order: {}", i)).unwrap();
//! }
//!
//! // Unordered: runs whenever a worker is free.
//! dispatcher.submit(|| println!("any order")).unwrap();
//!
//! drop(guard);
//! pool.join();
//! ```

#![deny(warnings, missing_docs, missing_debug_implementations)]

mod dispatch_pool;
mod error;
mod queue;
mod strand;
mod task;

pub use dispatch_pool::{Builder, DispatchPool, Dispatcher};
pub use error::SubmitError;
pub use queue::WorkGuard;
pub use strand::Strand;
pub use task::{Task, TaskBox};
