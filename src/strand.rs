//! Serialized task execution on top of the shared pool.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::error::SubmitError;
use crate::queue::{TaskQueue, WorkGuard};
use crate::task::{Task, TaskBox};

/// A serialization domain over a dispatch pool.
///
/// Tasks submitted through the same strand execute one at a time, in
/// submission order, no matter how many workers drain the shared queue.
/// Tasks on different strands stay free to run concurrently; the strand
/// buys intra-key sequencing without giving up cross-key parallelism.
///
/// A strand is a cheap cloneable handle: clones share one ordering domain,
/// and the serialized state itself stays put behind an `Arc`. Create one
/// with [`Dispatcher::strand`](crate::Dispatcher::strand). Dropping every
/// handle does not abandon tasks the strand has accepted; an in-flight
/// completion co-owns the shared state, so the chain drains first.
///
/// Internally the strand keeps a private FIFO of tasks not yet handed to
/// the shared queue, plus a flag marking whether a task is in flight. At
/// most one task per strand is ever inside the shared queue (or running)
/// at a time; each dispatched task is wrapped in a completion adapter that
/// feeds the next pending task to the queue when it finishes. The strand
/// holds a [`WorkGuard`](crate::WorkGuard) from its first dispatch until it
/// drains, so a pool never stops while a completion still has work to hand
/// over.
pub struct Strand {
    inner: Arc<Inner>,
}

struct Inner {
    queue: Arc<TaskQueue>,
    // Distinct from the queue's lock, and never held while a task body
    // runs: only submission and the completion step take it. The strand
    // lock may be taken before the queue lock, never after.
    state: Mutex<StrandState>,
}

struct StrandState {
    // Raw tasks not yet dispatched to the shared queue, oldest first.
    pending: VecDeque<Box<dyn TaskBox>>,
    // A wrapped task is in flight: dispatched and not yet completed.
    running: bool,
    // Held while `running`, released when the strand goes idle.
    work: Option<WorkGuard>,
}

impl Clone for Strand {
    fn clone(&self) -> Strand {
        Strand {
            inner: self.inner.clone(),
        }
    }
}

impl fmt::Debug for Strand {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Strand").finish()
    }
}

// ===== impl Strand =====

impl Strand {
    pub(crate) fn new(queue: Arc<TaskQueue>) -> Strand {
        Strand {
            inner: Arc::new(Inner {
                queue,
                state: Mutex::new(StrandState {
                    pending: VecDeque::new(),
                    running: false,
                    work: None,
                }),
            }),
        }
    }

    /// Submit a task to this strand.
    ///
    /// The task runs after every task previously submitted to the strand
    /// has completed, and never overlaps any of them. If no strand task is
    /// in flight the task is dispatched to the shared queue immediately;
    /// otherwise it waits in the strand's pending list and is dispatched by
    /// the completion of its predecessor.
    ///
    /// Returns [`SubmitError`] once the pool has stopped. Tasks accepted
    /// but still pending when the pool's queue closes are dropped.
    pub fn submit<T: Task>(&self, task: T) -> Result<(), SubmitError> {
        let mut state = self.inner.state.lock();

        if self.inner.queue.is_stopped() {
            return Err(SubmitError);
        }

        if state.running {
            state.pending.push_back(Box::new(task));
            return Ok(());
        }

        // Idle implies nothing pending: completions only go idle after
        // draining the pending list.
        debug_assert!(state.pending.is_empty(), "idle strand with queued tasks");

        state.running = true;
        state.work = Some(WorkGuard::new(self.inner.queue.clone()));
        drop(state);

        if let Err(err) = self.inner.dispatch(Box::new(task), &self.inner) {
            // Concurrent submits may have raced tasks into `pending` after
            // the lock dropped; those were accepted and are dropped here.
            let dropped = self.inner.clear();
            if dropped > 0 {
                warn!(dropped, "queue closed with serialized tasks still pending");
            }
            return Err(err);
        }

        Ok(())
    }
}

// ===== impl Inner =====

impl Inner {
    /// Hand one raw task to the shared queue, wrapped so that its
    /// completion re-arms the strand. Called with the strand lock released.
    fn dispatch(&self, task: Box<dyn TaskBox>, arc: &Arc<Inner>) -> Result<(), SubmitError> {
        let strand = arc.clone();

        self.queue.push(Box::new(move || {
            // The adapter must observe completion even when the task body
            // panics, or the strand would stay marked in-flight forever
            // with its pending tasks stalled. Unwinding runs the drop.
            let _completion = CompletionGuard { strand };
            task.run();
        }))
    }

    /// The completion step: runs exactly once per dispatched task, after
    /// its body has returned or panicked.
    fn complete(&self, arc: &Arc<Inner>) {
        let mut state = self.state.lock();
        debug_assert!(state.running, "strand completion observed while idle");

        let next = match state.pending.pop_front() {
            Some(next) => next,
            None => {
                state.running = false;
                let released = state.work.take();
                drop(state);
                drop(released);
                return;
            }
        };
        drop(state);

        if self.dispatch(next, arc).is_err() {
            // The queue closed while this strand still had work. Nothing
            // can run anymore; release the guard and drop the remainder,
            // counting the task whose dispatch was just rejected.
            let dropped = self.clear() + 1;
            warn!(dropped, "queue closed with serialized tasks still pending");
        }
    }

    /// Drop all pending work and return the strand to idle. Returns how
    /// many pending tasks were dropped.
    fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.pending.len();
        state.pending.clear();
        state.running = false;
        let released = state.work.take();
        drop(state);
        drop(released);

        dropped
    }
}

struct CompletionGuard {
    strand: Arc<Inner>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.strand.complete(&self.strand);
    }
}
