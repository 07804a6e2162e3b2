//! Tasks: cooperatively scheduled units of work, each owning its stack and
//! execution context.

use crate::arch;
use crate::context;
use anyhow::{Context as _, Result};
use std::fmt;
use std::num::NonZeroU64;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

/// Default stack size for each task (1 MiB).
pub(crate) const DEFAULT_STACK_SIZE: usize = 1024 * 1024;

/// An opaque ID that uniquely identifies a task relative to all other tasks
/// spawned during the lifetime of the process.
///
/// IDs are never reused.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct TaskId(NonZeroU64);

impl TaskId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let id = COUNTER.fetch_add(1, Ordering::Relaxed);

        // Safety: this number is unimaginably large, even at 1 billion
        // spawns/sec it would take 584 years to wrap around.
        let Some(id) = NonZeroU64::new(id) else {
            Self::exhausted();
        };

        Self(id)
    }

    #[cold]
    fn exhausted() -> ! {
        panic!("failed to generate unique task ID: bitspace exhausted")
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Scheduling phase of a task.
///
/// Bookkeeping only: mutual exclusion comes from ownership of the `Task`
/// value (a task is owned by exactly one queue or one executor at any
/// instant), not from this field. Termination has no variant; a terminated
/// task is dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Sitting in the ready queue.
    Ready,
    /// Executing on the compute executor.
    RunningCompute,
    /// Sitting in the parked queue, no thread owns it yet.
    ParkedForIo,
    /// Executing its blocking call on the I/O executor.
    RunningIo,
}

/// Heap-allocated stack for one task.
///
/// The owning task holds it for its entire lifetime; dropping the task is
/// the single release point.
struct Stack {
    mem: Vec<u8>,
}

impl Stack {
    fn new(size: usize) -> Result<Self> {
        let mut mem = Vec::new();
        mem.try_reserve_exact(size)
            .context("task stack allocation failed")?;
        mem.resize(size, 0);
        Ok(Stack { mem })
    }

    /// Top of the stack (highest address), aligned down to 16 bytes as the
    /// ABI requires. The stack grows downward from here.
    fn top(&self) -> usize {
        let top = self.mem.as_ptr() as usize + self.mem.len();
        top & !0xF
    }
}

type EntryFn = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct Task {
    id: TaskId,
    pub(crate) context: arch::Context,
    /// Keeps the stack alive for as long as the task can run on it.
    _stack: Stack,
    pub(crate) phase: Phase,
    /// Consumed by the trampoline on first dispatch.
    entry: Option<EntryFn>,
}

// A task only ever executes on the thread that currently owns it, and moves
// between threads by value through the queues.
unsafe impl Send for Task {}

impl Task {
    /// Allocates a stack and a context whose first resumption enters `f`.
    /// The new task is in `Ready` phase and not yet enqueued anywhere.
    pub(crate) fn new<F>(f: F, stack_size: usize) -> Result<Box<Self>>
    where
        F: FnOnce() + Send + 'static,
    {
        let stack = Stack::new(stack_size)?;
        let context = arch::Context::new_for_task(stack.top(), task_trampoline as usize);

        Ok(Box::new(Task {
            id: TaskId::next(),
            context,
            _stack: stack,
            phase: Phase::Ready,
            entry: Some(Box::new(f)),
        }))
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn take_entry(&mut self) -> Option<EntryFn> {
        self.entry.take()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

/// Entry point for new tasks. Runs on the task's own stack, entered by the
/// first context switch into the task.
extern "C" fn task_trampoline() {
    let (id, entry) = context::with_executor(|ex| {
        let task = ex.current_mut().expect("trampoline without a current task");
        let entry = task.take_entry().expect("task entered twice");
        (task.id(), entry)
    });

    // A panic must not unwind across the context-switch frame below.
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(entry)) {
        let msg = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("non-string panic payload");
        tracing::error!(task = %id, "task panicked: {msg}");
    }

    // Normal return from the entry function transfers control permanently to
    // the compute executor's loop, same as an explicit exit.
    context::finish_current();
}
