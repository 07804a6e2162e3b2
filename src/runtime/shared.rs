//! State shared between the two executors and the embedding thread.

use crate::queue::FifoQueue;
use crate::runtime::runtime::RuntimeConfig;
use crate::task::Task;
#[allow(unused)]
use crate::utils::scheduler::{Call, Method, Tracker};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) cfg: RuntimeConfig,

    /// Tasks ready to run on the compute executor.
    pub(crate) ready: FifoQueue<Box<Task>>,

    /// Tasks waiting for the I/O executor to run their blocking call.
    pub(crate) parked: FifoQueue<Box<Task>>,

    /// Number of tasks anywhere between entering and returning from a
    /// blocking call. Modified only by task code running on the compute
    /// executor, so the count is stable whenever the compute loop itself
    /// reads it.
    pending_io: AtomicUsize,

    /// Maintained by the I/O executor: true while it has recently found
    /// work, false once the parked queue has stayed empty for the grace
    /// window.
    io_busy: AtomicBool,

    /// Set by `Runtime::shutdown`. Substitutes for the first-dispatch
    /// bootstrap guard so a runtime that never ran a task can still stop.
    shutdown_requested: AtomicBool,

    /// Set by the compute loop on exit; release condition for the I/O loop.
    compute_stopped: AtomicBool,

    #[cfg(test)]
    pub(crate) tracker: Tracker,
}

impl Shared {
    pub(crate) fn new(cfg: RuntimeConfig) -> Self {
        Shared {
            cfg,
            ready: FifoQueue::new(),
            parked: FifoQueue::new(),
            pending_io: AtomicUsize::new(0),
            io_busy: AtomicBool::new(false),
            shutdown_requested: AtomicBool::new(false),
            compute_stopped: AtomicBool::new(false),

            #[cfg(test)]
            tracker: Tracker::new(),
        }
    }

    pub(crate) fn pending_io_inc(&self) {
        self.pending_io.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn pending_io_dec(&self) {
        let prev = self.pending_io.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "pending-I/O count underflow");
    }

    pub(crate) fn pending_io(&self) -> usize {
        self.pending_io.load(Ordering::SeqCst)
    }

    pub(crate) fn set_io_busy(&self, busy: bool) {
        self.io_busy.store(busy, Ordering::SeqCst);
    }

    pub(crate) fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_compute_stopped(&self) {
        self.compute_stopped.store(true, Ordering::SeqCst);
    }

    pub(crate) fn compute_stopped(&self) -> bool {
        self.compute_stopped.load(Ordering::SeqCst)
    }

    /// Shutdown check for the compute loop, evaluated only when the ready
    /// queue has just come up empty.
    ///
    /// `pending_io == 0` rules out every task in the parked → running-I/O →
    /// ready-again leg (the count is released only after the blocking call
    /// has returned to its caller on the compute executor), so no task can
    /// be missed between the queue check and this one. `dispatched_any` is
    /// the bootstrap guard against stopping before the embedding program's
    /// first task has run.
    pub(crate) fn quiescent(&self, dispatched_any: bool) -> bool {
        (dispatched_any || self.shutdown_requested.load(Ordering::SeqCst))
            && self.pending_io.load(Ordering::SeqCst) == 0
            && !self.io_busy.load(Ordering::SeqCst)
    }

    // Small price to pay to get introspection on all scheduler calls during
    // testing. No op in release builds.
    #[allow(unused)]
    #[inline(always)]
    pub(crate) fn track(&self, method: Method, call: Call) {
        #[cfg(test)]
        self.tracker.record(method, call);
    }
}
