//! The compute executor: dispatches ready tasks until the system quiesces.

use crate::context::{self, Executor, ExecutorKind, Unscheduled};
use crate::runtime::shared::Shared;
use crate::task::Phase;
#[allow(unused)]
use crate::utils::scheduler::{Call, Method};
use std::sync::Arc;
use std::thread;

pub(crate) fn run(shared: Arc<Shared>) {
    let mut executor = Executor::new(ExecutorKind::Compute, Arc::clone(&shared));
    let _guard = context::enter(&mut executor);

    // Bootstrap guard: do not stop before the first task has ever been
    // dispatched (or shutdown was requested on a runtime that never ran one).
    let mut dispatched_any = false;

    loop {
        let Some(mut task) = shared.ready.pop_head() else {
            if shared.quiescent(dispatched_any) {
                break;
            }
            thread::sleep(shared.cfg.poll_interval);
            continue;
        };

        dispatched_any = true;
        debug_assert_eq!(task.phase, Phase::Ready);
        task.phase = Phase::RunningCompute;
        shared.track(Method::Dispatch, Call::Dispatch { id: task.id() });

        let (mut task, why) = context::dispatch(task);

        shared.track(
            Method::Unschedule,
            Call::Unschedule {
                id: task.id(),
                why,
            },
        );

        match why {
            Unscheduled::Yielded => {
                task.phase = Phase::Ready;
                shared.ready.push_tail(task);
            }
            Unscheduled::ParkedForIo => {
                task.phase = Phase::ParkedForIo;
                shared.parked.push_tail(task);
            }
            Unscheduled::Finished => {
                // Terminated: dropping the task reclaims its context and
                // stack, exactly once.
                drop(task);
            }
            Unscheduled::IoComplete => {
                unreachable!("I/O completion observed on the compute executor")
            }
        }
    }

    tracing::debug!("compute executor stopped");
    shared.set_compute_stopped();
}
