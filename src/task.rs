/// A unit of work that can be dispatched to a pool.
///
/// A task is a zero-argument callable: ownership transfers to the queue on
/// submission and the task is consumed by execution. Any closure implementing
/// `FnOnce() + Send + 'static` is a `Task`, so most callers never implement
/// this trait by hand.
pub trait Task: Send + 'static {
    /// Run the task, consuming it.
    fn run(self);
}

/// An object-safe version of [`Task`].
///
/// The shared queue stores its tasks as `Box<dyn TaskBox>` so that plain
/// closures, custom task types, and strand completion adapters can all travel
/// through the same FIFO.
pub trait TaskBox: Send + 'static {
    /// Run the boxed task, consuming it.
    fn run_box(self: Box<Self>);
}

impl<F> Task for F
where
    F: FnOnce() + Send + 'static,
{
    fn run(self) {
        (self)()
    }
}

impl<T: Task> TaskBox for T {
    fn run_box(self: Box<Self>) {
        (*self).run()
    }
}

impl Task for Box<dyn TaskBox> {
    fn run(self) {
        self.run_box()
    }
}
