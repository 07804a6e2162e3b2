#![allow(unused)]

//! Test-only introspection of scheduler calls. No-op in release builds (the
//! recording sites are compiled out).

use crate::context::Unscheduled;
use crate::task::TaskId;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Method {
    Spawn,
    Dispatch,
    Unschedule,
    IoDispatch,
    IoReturn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Spawn { id: TaskId },
    Dispatch { id: TaskId },
    Unschedule { id: TaskId, why: Unscheduled },
    IoDispatch { id: TaskId },
    IoReturn { id: TaskId },
}

#[derive(Debug, Clone)]
pub(crate) struct Tracker {
    calls: Arc<DashMap<Method, Vec<Call>>>,

    /// In-flight dispatch markers per task. A context must never be owned by
    /// two executors at once; `record` asserts it.
    inflight: Arc<DashMap<TaskId, u32>>,
}

impl Tracker {
    pub(crate) fn new() -> Self {
        let calls = DashMap::new();
        calls.insert(Method::Spawn, Vec::new());
        calls.insert(Method::Dispatch, Vec::new());
        calls.insert(Method::Unschedule, Vec::new());
        calls.insert(Method::IoDispatch, Vec::new());
        calls.insert(Method::IoReturn, Vec::new());

        Self {
            calls: Arc::new(calls),
            inflight: Arc::new(DashMap::new()),
        }
    }

    pub(crate) fn record(&self, method: Method, call: Call) {
        match call {
            Call::Dispatch { id } | Call::IoDispatch { id } => {
                let mut markers = self.inflight.entry(id).or_insert(0);
                *markers += 1;
                assert_eq!(*markers, 1, "task {id} dispatched on two executors at once");
            }
            Call::Unschedule { id, .. } | Call::IoReturn { id } => {
                let mut markers = self.inflight.entry(id).or_insert(0);
                assert_eq!(*markers, 1, "task {id} returned without being in flight");
                *markers -= 1;
            }
            Call::Spawn { .. } => {}
        }

        self.calls
            .get_mut(&method)
            .expect("method not found")
            .push(call)
    }

    pub(crate) fn get_calls(&self, method: &Method) -> Vec<Call> {
        self.calls
            .get(method)
            .expect("method not found")
            .value()
            .clone()
    }

    pub(crate) fn num_calls(&self, method: &Method) -> usize {
        self.calls.get(method).map_or(0, |calls| calls.len())
    }
}
