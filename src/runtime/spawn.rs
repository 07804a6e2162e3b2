//! Task-side operations: spawning from inside a task, yielding, exiting.

use crate::context::{self, ExecutorKind, Unscheduled};
use crate::runtime::runtime::spawn_inner;
use crate::task::TaskId;
use anyhow::Result;

/// Spawns a new task from inside a running task.
///
/// The child is enqueued on the ready queue before this call returns, so the
/// scheduler always observes it before the parent next suspends. From the
/// embedding thread, use [`Runtime::spawn`](crate::Runtime::spawn) instead.
///
/// # Panics
///
/// Panics when called outside a running task.
pub fn spawn<F>(f: F) -> Result<TaskId>
where
    F: FnOnce() + Send + 'static,
{
    let shared = context::try_shared()
        .expect("Can't spawn from the current thread when not inside a task; use Runtime::spawn");
    spawn_inner(&shared, f)
}

/// Cooperative preemption point: requeues the current task at the tail of
/// the ready queue and hands control back to the compute executor. When the
/// task is later redispatched, the call returns transparently with all local
/// state intact.
///
/// # Panics
///
/// Panics when called outside a running task.
pub fn yield_now() {
    context::with_executor(|ex| {
        assert_eq!(
            ex.kind,
            ExecutorKind::Compute,
            "yield_now cannot be issued from the I/O executor"
        );
        debug_assert!(ex.current_mut().is_some());
    });
    context::unschedule(Unscheduled::Yielded);
}

/// Terminates the current task immediately, transferring control permanently
/// to the compute executor. The task's stack and context are reclaimed.
///
/// Locals in the stack frames between the task's entry function and this
/// call are *not* dropped; returning from the entry function is the tidier
/// way out and is exactly equivalent for the scheduler.
///
/// # Panics
///
/// Panics when called outside a running task.
pub fn exit_task() -> ! {
    context::finish_current()
}
