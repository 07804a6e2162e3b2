//! Per-executor ambient state and the hand-off protocol between a running
//! task and its executor loop.
//!
//! Each executor thread registers an [`Executor`] in thread-local storage
//! for the lifetime of its loop. Task-side operations (yield, blocking
//! calls, exit) reach the executor they are currently running on through it.
//!
//! A task never enqueues itself: it records *why* it is handing control back
//! ([`Unscheduled`]) and switches to the loop context; the loop, which owns
//! the `Box<Task>`, publishes it to the destination queue. This keeps every
//! context owned by exactly one place (a queue, or the executor running it)
//! at every instant, so a context can never be switched into while its
//! register state is still being saved on another thread.

use crate::arch;
use crate::runtime::shared::Shared;
use crate::task::Task;
use std::cell::Cell;
use std::ptr;
use std::sync::Arc;

/// Which worker thread an executor drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ExecutorKind {
    Compute,
    Io,
}

/// Why a task handed control back to its executor loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Unscheduled {
    /// Cooperative preemption point: requeue on the ready queue.
    Yielded,
    /// About to perform a blocking call: hand over to the parked queue.
    ParkedForIo,
    /// Blocking call completed on the I/O executor: requeue on the ready
    /// queue.
    IoComplete,
    /// The task is terminated: drop it, reclaiming context and stack.
    Finished,
}

/// Ambient state of one executor thread. Lives on the executor's own stack
/// for the lifetime of its loop and is reachable from task code through TLS.
pub(crate) struct Executor {
    pub(crate) kind: ExecutorKind,
    pub(crate) shared: Arc<Shared>,
    /// Context of the executor loop; the return target of every unschedule.
    loop_context: arch::Context,
    /// The task currently running on this executor, if any.
    current: Option<Box<Task>>,
    /// Set by the task immediately before switching back to the loop.
    unscheduled: Unscheduled,
}

impl Executor {
    pub(crate) fn new(kind: ExecutorKind, shared: Arc<Shared>) -> Self {
        Executor {
            kind,
            shared,
            loop_context: arch::Context::default(),
            current: None,
            unscheduled: Unscheduled::Yielded,
        }
    }

    pub(crate) fn current_mut(&mut self) -> Option<&mut Task> {
        self.current.as_deref_mut()
    }
}

thread_local! {
    static CURRENT_EXECUTOR: Cell<*mut Executor> = const { Cell::new(ptr::null_mut()) };
}

/// Registers `executor` as this thread's executor until the guard drops.
///
/// After registration the executor must only be reached through the ambient
/// accessors below, from this thread.
pub(crate) fn enter(executor: &mut Executor) -> EnterGuard {
    CURRENT_EXECUTOR.with(|cell| {
        assert!(
            cell.get().is_null(),
            "an executor is already registered on this thread"
        );
        cell.set(executor as *mut Executor);
    });
    EnterGuard
}

pub(crate) struct EnterGuard;

impl Drop for EnterGuard {
    fn drop(&mut self) {
        CURRENT_EXECUTOR.with(|cell| cell.set(ptr::null_mut()));
    }
}

/// Runs `f` with this thread's executor.
///
/// # Panics
///
/// Panics on a thread with no registered executor, i.e. when a task-only
/// operation is used outside a running task.
pub(crate) fn with_executor<R>(f: impl FnOnce(&mut Executor) -> R) -> R {
    let ptr = CURRENT_EXECUTOR.with(|cell| cell.get());
    assert!(
        !ptr.is_null(),
        "not inside a running task (no executor on this thread)"
    );
    // Safety: the pointer targets the executor loop's stack frame, which
    // outlives every task it dispatches, and only this thread can reach it.
    // Borrows handed to `f` end before the next context switch.
    unsafe { f(&mut *ptr) }
}

/// The shared scheduler state of this thread's executor, if any.
pub(crate) fn try_shared() -> Option<Arc<Shared>> {
    let ptr = CURRENT_EXECUTOR.with(|cell| cell.get());
    if ptr.is_null() {
        None
    } else {
        // Safety: as in `with_executor`.
        unsafe { Some(Arc::clone(&(*ptr).shared)) }
    }
}

/// Dispatches `task` on this thread's executor: switches into it and returns
/// once the task has unscheduled itself, together with the reason.
pub(crate) fn dispatch(task: Box<Task>) -> (Box<Task>, Unscheduled) {
    let (loop_context, task_context) = with_executor(|ex| {
        debug_assert!(
            ex.current.is_none(),
            "dispatch while another task is in flight"
        );
        ex.current = Some(task);
        (
            &mut ex.loop_context as *mut arch::Context,
            &ex.current.as_ref().unwrap().context as *const arch::Context,
        )
    });

    // Runs the task until it switches back. For a fresh task this enters the
    // trampoline; otherwise it resumes right after the task's own
    // context_switch in `unschedule`.
    arch::context_switch(loop_context, task_context);

    with_executor(|ex| {
        let task = ex.current.take().expect("task vanished while running");
        (task, ex.unscheduled)
    })
}

/// Hands control from the running task back to its executor loop.
///
/// Returns when the task is next dispatched, possibly on the other executor
/// thread, which is why callers must re-read the ambient executor afterwards
/// instead of caching it across this call.
pub(crate) fn unschedule(why: Unscheduled) {
    let (task_context, loop_context) = with_executor(|ex| {
        ex.unscheduled = why;
        let task = ex.current.as_mut().expect("unschedule without a running task");
        (
            &mut task.context as *mut arch::Context,
            &ex.loop_context as *const arch::Context,
        )
    });

    // The task context lives inside the Box<Task> held by the executor until
    // the loop takes it back out; neither context moves while the switch is
    // in flight.
    arch::context_switch(task_context, loop_context);
}

/// Terminal hand-off for a finished task. The caller's state is not saved:
/// this context is never resumed; the executor loop drops the task.
pub(crate) fn finish_current() -> ! {
    let loop_context = with_executor(|ex| {
        debug_assert_eq!(
            ex.kind,
            ExecutorKind::Compute,
            "tasks can only terminate on the compute executor"
        );
        debug_assert!(ex.current.is_some(), "exit without a running task");
        ex.unscheduled = Unscheduled::Finished;
        &ex.loop_context as *const arch::Context
    });

    arch::switch_terminal(loop_context)
}

/// Runs `op` on the I/O executor thread while the compute executor is freed
/// to dispatch other ready tasks.
///
/// Callable only from a task running on the compute executor. The calling
/// task parks, is resumed on the I/O executor where `op` runs synchronously
/// on the task's own (migrated) stack, then requeues itself; the call
/// returns on the compute executor with `op`'s result. The caller never
/// observes the intermediate hand-offs.
pub(crate) fn offload<T>(op: impl FnOnce() -> T) -> T {
    let shared = with_executor(|ex| {
        assert_eq!(
            ex.kind,
            ExecutorKind::Compute,
            "blocking calls cannot be issued from the I/O executor"
        );
        Arc::clone(&ex.shared)
    });

    shared.pending_io_inc();
    unschedule(Unscheduled::ParkedForIo);

    // Now on the I/O executor thread.
    debug_assert!(with_executor(|ex| ex.kind == ExecutorKind::Io));
    let out = op();
    unschedule(Unscheduled::IoComplete);

    // Back on the compute executor thread, past the blocking call.
    debug_assert!(with_executor(|ex| ex.kind == ExecutorKind::Compute));
    shared.pending_io_dec();
    out
}
