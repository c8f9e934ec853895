use std::any::Any;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::SubmitError;
use crate::queue::{TaskQueue, WorkGuard};
use crate::strand::Strand;
use crate::task::Task;

/// Lifecycle handle for a pool of worker threads draining one shared queue.
///
/// A pool is created together with its [`Dispatcher`] by [`Builder::build`]
/// (or the [`fixed_size`](DispatchPool::fixed_size) and
/// [`single_thread`](DispatchPool::single_thread) shorthands), and owns the
/// worker threads for the duration of a dispatch session: [`start`]
/// spawns them, [`join`] waits for them to finish.
///
/// Workers finish when they observe the stop sentinel, which requires the
/// queue to be empty and either every [`WorkGuard`](crate::WorkGuard) to
/// have been dropped or [`shutdown`] to have closed the queue. Tasks that
/// are already queued are always drained first; a session never discards a
/// task it accepted into the shared queue.
///
/// [`start`]: DispatchPool::start
/// [`join`]: DispatchPool::join
/// [`shutdown`]: DispatchPool::shutdown
pub struct DispatchPool {
    inner: Arc<Inner>,
}

/// Dispatch pool configuration.
///
/// Provides control over the properties of the pool before it is built.
#[derive(Debug)]
pub struct Builder {
    config: Config,
}

/// Worker-thread configuration values.
struct Config {
    pool_size: usize,
    // Used to name worker threads
    name_prefix: Option<String>,
    stack_size: Option<usize>,
    after_start: Option<Arc<dyn Fn() + Send + Sync>>,
    before_stop: Option<Arc<dyn Fn() + Send + Sync>>,
}

/// A handle that submits work to a dispatch pool.
///
/// Cloning is cheap; clones all feed the same shared queue. The handle
/// also vends the pool's [`WorkGuard`](crate::WorkGuard)s and
/// [`Strand`](crate::Strand)s, so a submission source usually needs
/// nothing else.
pub struct Dispatcher {
    queue: Arc<TaskQueue>,
}

struct Inner {
    queue: Arc<TaskQueue>,

    // Join handles for the spawned workers, taken by `join`.
    threads: Mutex<Vec<thread::JoinHandle<()>>>,

    // Flipped by the first `start` call.
    started: AtomicBool,

    config: Config,
}

impl Clone for Dispatcher {
    fn clone(&self) -> Self {
        Dispatcher {
            queue: self.queue.clone(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        const SOME: &'static &'static str = &"Some(_)";
        const NONE: &'static &'static str = &"None";

        fmt.debug_struct("Config")
            .field("pool_size", &self.pool_size)
            .field("name_prefix", &self.name_prefix)
            .field("stack_size", &self.stack_size)
            .field("after_start", if self.after_start.is_some() { SOME } else { NONE })
            .field("before_stop", if self.before_stop.is_some() { SOME } else { NONE })
            .finish()
    }
}

impl fmt::Debug for DispatchPool {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("DispatchPool").finish()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Dispatcher").finish()
    }
}

/// State owned by one worker thread.
struct Worker {
    index: usize,
    inner: Arc<Inner>,
}

// ===== impl Builder =====

impl Builder {
    /// Returns a builder with default values.
    ///
    /// The default pool size is the number of logical CPUs.
    pub fn new() -> Builder {
        Builder {
            config: Config {
                pool_size: num_cpus::get(),
                name_prefix: None,
                stack_size: None,
                after_start: None,
                before_stop: None,
            },
        }
    }

    /// Set the number of worker threads the pool will spawn.
    ///
    /// The pool size is fixed for the lifetime of the pool; workers are
    /// interchangeable and keep no state between tasks.
    pub fn pool_size(mut self, val: usize) -> Self {
        self.config.pool_size = val;
        self
    }

    /// Set the name prefix of threads spawned by the pool.
    ///
    /// The prefix is used for generating thread names. For example, if the
    /// prefix is `my-pool-`, threads in the pool will get names like
    /// `my-pool-0`, `my-pool-1` etc.
    pub fn name_prefix<S: Into<String>>(mut self, val: S) -> Self {
        self.config.name_prefix = Some(val.into());
        self
    }

    /// Set the stack size of threads spawned by the pool.
    pub fn stack_size(mut self, val: usize) -> Self {
        self.config.stack_size = Some(val);
        self
    }

    /// Execute function `f` right after each worker thread is started but
    /// before it runs any tasks.
    ///
    /// This is intended for bookkeeping and monitoring uses.
    pub fn after_start<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.after_start = Some(Arc::new(f));
        self
    }

    /// Execute function `f` right before each worker thread stops.
    ///
    /// This is intended for bookkeeping and monitoring uses.
    pub fn before_stop<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.before_stop = Some(Arc::new(f));
        self
    }

    /// Build the configured pool.
    ///
    /// Returns the submission handle and the lifecycle handle. Workers are
    /// not spawned until [`DispatchPool::start`] is called, so tasks may be
    /// queued up front and drained once the pool starts.
    pub fn build(self) -> (Dispatcher, DispatchPool) {
        assert!(self.config.pool_size >= 1, "at least one worker required");

        let queue = Arc::new(TaskQueue::new());

        let inner = Arc::new(Inner {
            queue: queue.clone(),
            threads: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            config: self.config,
        });

        let dispatcher = Dispatcher { queue };
        let pool = DispatchPool { inner };

        (dispatcher, pool)
    }
}

// ===== impl DispatchPool =====

impl DispatchPool {
    /// Create a pool with a fixed number of worker threads operating off a
    /// shared unbounded queue.
    ///
    /// At any point, at most `size` tasks are executing. Additional tasks
    /// wait in the queue until a worker frees up. Equivalent to
    /// `Builder::new().pool_size(size).build()`.
    pub fn fixed_size(size: usize) -> (Dispatcher, DispatchPool) {
        Builder::new().pool_size(size).build()
    }

    /// Create a pool with a single worker thread operating off an unbounded
    /// queue.
    ///
    /// With one worker the shared queue's FIFO order becomes a total
    /// execution order: tasks run sequentially in submission order, and no
    /// more than one task is active at any given time.
    pub fn single_thread() -> (Dispatcher, DispatchPool) {
        Builder::new().pool_size(1).build()
    }

    /// Spawn the configured number of worker threads.
    ///
    /// Each worker repeatedly pulls the oldest queued task and executes it,
    /// parking when the queue is empty while work may still arrive. Workers
    /// exit once the queue is empty and no [`WorkGuard`](crate::WorkGuard)
    /// is alive, or after [`shutdown`](DispatchPool::shutdown) has closed
    /// the queue and the queue has drained.
    ///
    /// A pool with no live guard and nothing queued stops straight away, so
    /// either hold a guard before starting or queue work up front.
    ///
    /// # Panics
    ///
    /// Panics if the pool was already started.
    pub fn start(&self) {
        assert!(
            !self.inner.started.swap(true, SeqCst),
            "dispatch pool already started"
        );

        let mut threads = self.inner.threads.lock();

        for index in 0..self.inner.config.pool_size {
            let worker = Worker {
                index,
                inner: self.inner.clone(),
            };

            threads.push(worker.spawn());
        }
    }

    /// Initiate an orderly shutdown.
    ///
    /// No new tasks are accepted, but previously submitted tasks are still
    /// executed, including tasks a strand has already accepted into the
    /// shared queue. Invocation has no additional effect if the pool is
    /// already shut down.
    ///
    /// This function does not wait for the drain to finish; use
    /// [`join`](DispatchPool::join) for that.
    pub fn shutdown(&self) {
        self.inner.queue.close();
    }

    /// Block until every worker thread has exited.
    ///
    /// Workers exit once they observe the stop sentinel, so the caller must
    /// have arranged for it: drop the last [`WorkGuard`](crate::WorkGuard)
    /// or call [`shutdown`](DispatchPool::shutdown) first. A worker thread
    /// that itself panicked (for example from an
    /// [`after_start`](Builder::after_start) hook) is logged and does not
    /// poison the join.
    pub fn join(self) {
        let threads: Vec<_> = self.inner.threads.lock().drain(..).collect();

        for handle in threads {
            if handle.join().is_err() {
                error!("worker thread panicked outside of a task");
            }
        }
    }

    /// Shut the pool down and block until every worker thread has exited.
    ///
    /// Equivalent to [`shutdown`](DispatchPool::shutdown) followed by
    /// [`join`](DispatchPool::join): queued tasks are drained, in-flight
    /// tasks run to completion, and no task is left executing once this
    /// returns.
    pub fn stop_and_join(self) {
        self.shutdown();
        self.join();
    }

    /// Returns the configured number of worker threads.
    pub fn pool_size(&self) -> usize {
        self.inner.config.pool_size
    }

    /// Returns the current number of tasks waiting in the shared queue.
    ///
    /// Tasks held back inside a strand's pending list are not counted.
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }
}

// ===== impl Dispatcher =====

impl Dispatcher {
    /// Submit a task for execution on any free worker.
    ///
    /// Tasks submitted this way run in whatever order workers pick them up:
    /// the queue itself is FIFO, but once two or more workers drain it
    /// concurrently no relative ordering between tasks is guaranteed. Use a
    /// [`Strand`](crate::Strand) where ordering matters.
    ///
    /// Returns [`SubmitError`] once the pool has stopped; the task is
    /// dropped in that case.
    pub fn submit<T: Task>(&self, task: T) -> Result<(), SubmitError> {
        self.queue.push(Box::new(task))
    }

    /// Create a new serialization domain on this pool.
    ///
    /// Tasks submitted through the returned [`Strand`](crate::Strand) run
    /// one at a time in submission order. Each call creates an independent
    /// domain; tasks on different strands may run concurrently.
    pub fn strand(&self) -> Strand {
        Strand::new(self.queue.clone())
    }

    /// Acquire a guard that keeps the pool alive while work may still be
    /// submitted.
    ///
    /// See [`WorkGuard`](crate::WorkGuard).
    pub fn work_guard(&self) -> WorkGuard {
        WorkGuard::new(self.queue.clone())
    }

    /// Returns `true` once the pool has stopped accepting tasks.
    pub fn is_stopped(&self) -> bool {
        self.queue.is_stopped()
    }
}

// ===== impl Worker =====

impl Worker {
    fn spawn(self) -> thread::JoinHandle<()> {
        let mut b = thread::Builder::new();

        {
            let c = &self.inner.config;

            if let Some(stack_size) = c.stack_size {
                b = b.stack_size(stack_size);
            }

            if let Some(ref name_prefix) = c.name_prefix {
                b = b.name(format!("{}{}", name_prefix, self.index));
            }
        }

        b.spawn(move || self.run()).unwrap()
    }

    fn run(self) {
        use std::panic::{self, AssertUnwindSafe};

        if let Some(ref f) = self.inner.config.after_start {
            f();
        }

        debug!(worker = self.index, "worker started");

        while let Some(task) = self.inner.queue.pop_blocking() {
            // AssertUnwindSafe is used because `Task` is `Send + 'static`,
            // which is essentially unwind safe. A panicking task must not
            // take the worker down with it.
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || task.run())) {
                error!(
                    worker = self.index,
                    panic = %panic_message(payload.as_ref()),
                    "task panicked"
                );
            }
        }

        debug!(worker = self.index, "worker stopped");

        if let Some(ref f) = self.inner.config.before_stop {
            f();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    }
}
