//! The shared task queue and its outstanding-work accounting.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::SubmitError;
use crate::task::TaskBox;

/// Thread-safe, unbounded FIFO of pending tasks.
///
/// One `TaskQueue` instance is shared by the pool, every submission handle,
/// every strand, and every work guard; nothing in this crate is process-wide.
/// Pushing never blocks. Popping blocks while the queue is empty and more
/// work may still arrive, and yields the stop sentinel (`None`) only once the
/// queue is empty and either no [`WorkGuard`] is alive or the queue has been
/// closed.
pub(crate) struct TaskQueue {
    state: Mutex<QueueState>,
    // Signaled once per push and broadcast on close and on any transition
    // into the stopped state.
    available: Condvar,
}

struct QueueState {
    tasks: VecDeque<Box<dyn TaskBox>>,
    // Number of live `WorkGuard`s.
    outstanding_work: usize,
    // `close` was called: reject new pushes, drain what is already queued.
    closed: bool,
    // Latched by whichever thread first makes or observes the stop condition
    // (empty queue, no outstanding work). Pushes fail fast from then on, so a
    // task can never land in a queue no worker will drain.
    stopped: bool,
}

// ===== impl TaskQueue =====

impl TaskQueue {
    pub(crate) fn new() -> TaskQueue {
        TaskQueue {
            state: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                outstanding_work: 0,
                closed: false,
                stopped: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Append a task. Never blocks.
    pub(crate) fn push(&self, task: Box<dyn TaskBox>) -> Result<(), SubmitError> {
        let mut state = self.state.lock();

        if state.closed || state.stopped {
            return Err(SubmitError);
        }

        state.tasks.push_back(task);
        drop(state);

        self.available.notify_one();
        Ok(())
    }

    /// Remove and return the oldest task, blocking while the queue is empty
    /// and more work may arrive. Returns `None` once the stop condition
    /// holds; every subsequent call returns `None` immediately.
    pub(crate) fn pop_blocking(&self) -> Option<Box<dyn TaskBox>> {
        let mut state = self.state.lock();

        loop {
            if let Some(task) = state.tasks.pop_front() {
                // The pop that empties the queue after the last guard is
                // gone makes the stop condition true for everyone else.
                if state.tasks.is_empty() && state.outstanding_work == 0 && !state.stopped {
                    state.stopped = true;
                    self.available.notify_all();
                }
                return Some(task);
            }

            if state.stopped || state.closed || state.outstanding_work == 0 {
                if !state.stopped {
                    state.stopped = true;
                    self.available.notify_all();
                }
                return None;
            }

            self.available.wait(&mut state);
        }
    }

    /// Close the queue: reject new pushes, wake all blocked pops. Tasks that
    /// are already queued are still handed out until the queue is drained.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);

        self.available.notify_all();
    }

    pub(crate) fn is_stopped(&self) -> bool {
        let state = self.state.lock();
        state.stopped || state.closed
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }
}

// ===== impl WorkGuard =====

/// Keeps the pool's drain loop alive while more work may be submitted.
///
/// Workers park on an empty queue rather than exiting for as long as at
/// least one `WorkGuard` is alive. Creating or cloning a guard acquires a
/// reference on the pool's outstanding-work count; dropping it releases the
/// reference. The count reaching zero with an empty queue is what lets the
/// workers observe the stop sentinel and return, so every independent
/// submission source should hold its own guard and drop it when that source
/// is done.
///
/// An executing task does not count as outstanding work by itself: a task
/// that submits follow-up work must hold a guard across the gap, which is
/// exactly what a [`Strand`](crate::Strand) does internally while it has
/// pending or in-flight tasks. Acquiring a guard after the pool has stopped
/// does not revive it.
pub struct WorkGuard {
    queue: Arc<TaskQueue>,
}

impl WorkGuard {
    pub(crate) fn new(queue: Arc<TaskQueue>) -> WorkGuard {
        queue.state.lock().outstanding_work += 1;
        WorkGuard { queue }
    }
}

impl Clone for WorkGuard {
    fn clone(&self) -> WorkGuard {
        WorkGuard::new(self.queue.clone())
    }
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        let mut state = self.queue.state.lock();
        state.outstanding_work -= 1;

        if state.outstanding_work == 0 {
            if state.tasks.is_empty() {
                state.stopped = true;
            }
            drop(state);

            // Wake every parked worker: either the stop condition now holds
            // or only the already-queued drain is left.
            self.queue.available.notify_all();
        }
    }
}

impl fmt::Debug for WorkGuard {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("WorkGuard").finish()
    }
}
