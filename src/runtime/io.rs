//! The I/O executor: resumes parked tasks so their blocking calls run on
//! this thread, then hands them back to the ready queue.

use crate::context::{self, Executor, ExecutorKind, Unscheduled};
use crate::runtime::shared::Shared;
use crate::task::Phase;
#[allow(unused)]
use crate::utils::scheduler::{Call, Method};
use std::sync::Arc;
use std::thread;

pub(crate) fn run(shared: Arc<Shared>) {
    let mut executor = Executor::new(ExecutorKind::Io, Arc::clone(&shared));
    let _guard = context::enter(&mut executor);

    let mut empty_polls: u32 = 0;

    // Runs for the lifetime of the compute executor: only an observed
    // compute stop releases this loop.
    loop {
        let Some(mut task) = shared.parked.pop_head() else {
            empty_polls += 1;
            if empty_polls >= shared.cfg.io_idle_grace {
                shared.set_io_busy(false);
            }
            if shared.compute_stopped() {
                break;
            }
            thread::sleep(shared.cfg.poll_interval);
            continue;
        };

        empty_polls = 0;
        shared.set_io_busy(true);
        debug_assert_eq!(task.phase, Phase::ParkedForIo);
        task.phase = Phase::RunningIo;
        shared.track(Method::IoDispatch, Call::IoDispatch { id: task.id() });

        // The blocking call runs synchronously on this thread before the
        // task switches back, so control returns here only once the
        // operation has completed; this loop itself never blocks inside
        // the scheduler.
        let (mut task, why) = context::dispatch(task);

        shared.track(Method::IoReturn, Call::IoReturn { id: task.id() });
        debug_assert_eq!(why, Unscheduled::IoComplete);

        task.phase = Phase::Ready;
        shared.ready.push_tail(task);
        shared.set_io_busy(true);
    }

    tracing::debug!("i/o executor stopped");
}
