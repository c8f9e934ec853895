use thiserror::Error;

/// Error returned when a task is submitted to a stopped pool.
///
/// A pool stops accepting work once its queue is empty and the last
/// [`WorkGuard`](crate::WorkGuard) has been released, or once
/// [`DispatchPool::shutdown`](crate::DispatchPool::shutdown) closes the
/// queue. The rejected task is dropped: submission boxes (and, for strands,
/// wraps) the task, so there is no way to hand the original callable back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dispatch pool has stopped accepting tasks")]
pub struct SubmitError;
