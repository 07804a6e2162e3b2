use crate::runtime::shared::Shared;
use crate::runtime::{compute, io};
use crate::task::{DEFAULT_STACK_SIZE, Task, TaskId};
#[allow(unused)]
use crate::utils::scheduler::{Call, Method};
use anyhow::{Context as _, Result, anyhow};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Default consumer sleep between empty-queue polls.
const POLL_INTERVAL: Duration = Duration::from_micros(100);

/// Empty polls of the parked queue before the I/O executor reports idle.
const IO_IDLE_GRACE: u32 = 5;

/// Default prefix for executor thread names.
const THREAD_NAME: &str = "filo";

// One runtime at a time: both executors register thread-local ambient state
// and the quiescence protocol assumes a single pair of workers.
static RUNTIME_ACTIVE: AtomicBool = AtomicBool::new(false);

#[derive(Debug)]
pub struct Builder {
    stack_size: usize,
    poll_interval: Duration,
    io_idle_grace: u32,
    thread_name: String,
}

impl Builder {
    pub fn new() -> Self {
        Builder {
            stack_size: DEFAULT_STACK_SIZE,
            poll_interval: POLL_INTERVAL,
            io_idle_grace: IO_IDLE_GRACE,
            thread_name: THREAD_NAME.to_string(),
        }
    }

    /// Sets the stack size (in bytes) allocated for each spawned task.
    ///
    /// The default is 1 MiB. Tasks that recurse deeply or keep large values
    /// on the stack need more; workloads spawning thousands of tasks want
    /// less.
    #[track_caller]
    pub fn stack_size(mut self, val: usize) -> Self {
        assert!(val.is_power_of_two(), "stack_size must be a power of two");
        assert!(val >= 16 * 1024, "stack_size must be at least 16 KiB");
        self.stack_size = val;
        self
    }

    /// Sets the sleep between empty-queue polls on both executors.
    ///
    /// This bounds dispatch latency from below once a queue has drained; the
    /// default is 100 µs.
    #[track_caller]
    pub fn poll_interval(mut self, val: Duration) -> Self {
        assert!(!val.is_zero(), "poll_interval must be non-zero");
        self.poll_interval = val;
        self
    }

    /// Sets how many consecutive empty polls of the parked queue the I/O
    /// executor observes before reporting idle to the shutdown check.
    #[track_caller]
    pub fn io_idle_grace(mut self, val: u32) -> Self {
        assert!(val > 0, "io_idle_grace must be greater than 0");
        self.io_idle_grace = val;
        self
    }

    /// Sets the executor thread name prefix; the workers are named
    /// `{prefix}-compute` and `{prefix}-io`. Defaults to `filo`.
    pub fn thread_name(mut self, val: impl Into<String>) -> Self {
        self.thread_name = val.into();
        self
    }

    /// Creates the configured [`Runtime`]: both queues and both executor
    /// worker threads. The returned runtime is ready to spawn tasks.
    ///
    /// Fails if a runtime is already active in this process or if either
    /// worker thread cannot be created.
    pub fn try_build(self) -> Result<Runtime> {
        if RUNTIME_ACTIVE.swap(true, Ordering::SeqCst) {
            return Err(anyhow!(
                "cannot create a new Runtime: a runtime is already active in this process"
            ));
        }

        let cfg = RuntimeConfig {
            stack_size: self.stack_size,
            poll_interval: self.poll_interval,
            io_idle_grace: self.io_idle_grace,
            thread_name: self.thread_name,
        };
        let shared = Arc::new(Shared::new(cfg));

        match spawn_executors(&shared) {
            Ok((compute, io)) => {
                tracing::debug!("runtime started");
                Ok(Runtime {
                    shared,
                    compute: Some(compute),
                    io: Some(io),
                })
            }
            Err(e) => {
                RUNTIME_ACTIVE.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_executors(
    shared: &Arc<Shared>,
) -> Result<(thread::JoinHandle<()>, thread::JoinHandle<()>)> {
    let compute = {
        let shared = Arc::clone(shared);
        thread::Builder::new()
            .name(format!("{}-compute", shared.cfg.thread_name))
            .spawn(move || compute::run(shared))
            .context("failed to spawn the compute executor thread")?
    };

    let io = {
        let worker = Arc::clone(shared);
        match thread::Builder::new()
            .name(format!("{}-io", shared.cfg.thread_name))
            .spawn(move || io::run(worker))
        {
            Ok(handle) => handle,
            Err(e) => {
                // Startup is fatal without both workers: release the compute
                // loop (quiescence with shutdown requested) and report.
                shared.request_shutdown();
                let _ = compute.join();
                return Err(
                    anyhow::Error::new(e).context("failed to spawn the I/O executor thread")
                );
            }
        }
    };

    Ok((compute, io))
}

/// Handle to a running two-executor scheduler.
///
/// Created by [`Builder::try_build`]; torn down by [`Runtime::shutdown`],
/// which `Drop` also performs (ignoring errors) if the runtime is leaked
/// without an explicit shutdown.
#[derive(Debug)]
pub struct Runtime {
    shared: Arc<Shared>,
    compute: Option<thread::JoinHandle<()>>,
    io: Option<thread::JoinHandle<()>>,
}

impl Runtime {
    /// Allocates a context and stack for `f` and enqueues it on the ready
    /// queue in `Ready` phase. Never blocks the caller.
    ///
    /// Fails on stack allocation failure; nothing is enqueued in that case
    /// and the scheduler is left untouched.
    pub fn spawn<F>(&self, f: F) -> Result<TaskId>
    where
        F: FnOnce() + Send + 'static,
    {
        spawn_inner(&self.shared, f)
    }

    /// Blocks until both executors have stopped: the ready and parked queues
    /// have drained and no blocking call is in flight. No task is forcibly
    /// killed.
    ///
    /// Must be the last call; the runtime is consumed.
    pub fn shutdown(mut self) -> Result<()> {
        self.shutdown_inner()
    }

    fn shutdown_inner(&mut self) -> Result<()> {
        let (Some(compute), Some(io)) = (self.compute.take(), self.io.take()) else {
            return Ok(());
        };

        tracing::debug!("runtime shutdown requested");
        self.shared.request_shutdown();

        // The compute executor stops first (quiescence); observing that stop
        // releases the I/O executor's loop.
        let compute_res = compute.join();
        let io_res = io.join();

        RUNTIME_ACTIVE.store(false, Ordering::SeqCst);

        if compute_res.is_err() || io_res.is_err() {
            return Err(anyhow!("executor thread panicked during shutdown"));
        }
        Ok(())
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown_inner() {
            tracing::error!("runtime drop: {e}");
        }
    }
}

// Test-only helpers
#[cfg(test)]
impl Runtime {
    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

pub(crate) fn spawn_inner<F>(shared: &Shared, f: F) -> Result<TaskId>
where
    F: FnOnce() + Send + 'static,
{
    let task = Task::new(f, shared.cfg.stack_size)?;
    let id = task.id();

    shared.track(Method::Spawn, Call::Spawn { id });
    tracing::trace!(task = %id, "spawn");

    shared.ready.push_tail(task);
    Ok(id)
}

/// Configuration consumed by both executors, exported from the builder.
#[derive(Debug, Clone)]
pub(crate) struct RuntimeConfig {
    pub(crate) stack_size: usize,
    pub(crate) poll_interval: Duration,
    pub(crate) io_idle_grace: u32,
    pub(crate) thread_name: String,
}
