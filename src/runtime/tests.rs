use super::*;
use crate as filo;
use crate::context;
use crate::runtime::shared::Shared;
use crate::task::TaskId;
use crate::utils::scheduler::{Call, Method};
use anyhow::Result;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use parking_lot::Mutex;
use rstest::rstest;
use static_assertions::assert_impl_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

assert_impl_all!(Runtime: Send, Sync);
assert_impl_all!(Shared: Send, Sync);
assert_impl_all!(TaskId: Copy, Send, Sync);

// The process-wide single-runtime guard means runtime tests cannot overlap.
static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> parking_lot::MutexGuard<'static, ()> {
    SERIAL.lock()
}

// 1000-task cases do not need MiB stacks.
fn small_stack_builder() -> Builder {
    Builder::new().stack_size(64 * 1024)
}

#[rstest]
#[case(1)]
#[case(10)]
#[case(1000)]
fn test_all_spawned_tasks_complete(#[case] n: usize) -> Result<()> {
    let _guard = serial();
    let runtime = small_stack_builder().try_build()?;

    let completed = Arc::new(AtomicUsize::new(0));
    for _ in 0..n {
        let completed = Arc::clone(&completed);
        runtime.spawn(move || {
            for _ in 0..3 {
                filo::yield_now();
            }
            completed.fetch_add(1, Ordering::SeqCst);
        })?;
    }

    runtime.shutdown()?;
    assert_eq!(completed.load(Ordering::SeqCst), n);
    Ok(())
}

#[test]
fn test_yield_preserves_local_state_in_order() -> Result<()> {
    let _guard = serial();
    let runtime = small_stack_builder().try_build()?;

    let observed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&observed);
    runtime.spawn(move || {
        for i in 0..100u32 {
            sink.lock().push(i);
            filo::yield_now();
        }
    })?;

    runtime.shutdown()?;
    assert_eq!(*observed.lock(), (0..100).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_ready_tasks_interleave_in_fifo_order() -> Result<()> {
    let _guard = serial();
    let runtime = small_stack_builder().try_build()?;

    let observed = Arc::new(Mutex::new(Vec::new()));

    // Spawn both children from a parent task so they are enqueued
    // back-to-back; from then on FIFO dispatch alternates them exactly.
    let sink = Arc::clone(&observed);
    runtime.spawn(move || {
        for tag in [b'a', b'b'] {
            let sink = Arc::clone(&sink);
            filo::spawn(move || {
                for i in 0..10u32 {
                    sink.lock().push((tag, i));
                    filo::yield_now();
                }
            })
            .unwrap();
        }
    })?;

    runtime.shutdown()?;

    let expected: Vec<(u8, u32)> = (0..10u32).flat_map(|i| [(b'a', i), (b'b', i)]).collect();
    assert_eq!(*observed.lock(), expected);
    Ok(())
}

#[test]
fn test_exit_task_terminates_mid_loop() -> Result<()> {
    let _guard = serial();
    let runtime = small_stack_builder().try_build()?;

    let iterations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&iterations);
    runtime.spawn(move || {
        for i in 0..10 {
            if i == 3 {
                filo::exit_task();
            }
            counter.fetch_add(1, Ordering::SeqCst);
            filo::yield_now();
        }
    })?;

    runtime.shutdown()?;
    assert_eq!(iterations.load(Ordering::SeqCst), 3);
    Ok(())
}

#[test]
fn test_blocking_call_runs_on_io_executor_and_returns_transparently() -> Result<()> {
    let _guard = serial();
    let runtime = Builder::new().thread_name("filo-test").try_build()?;

    fn current_thread_name() -> String {
        thread::current().name().unwrap_or("<unnamed>").to_string()
    }

    let observed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&observed);
    runtime.spawn(move || {
        let mut names = sink.lock();
        names.push(current_thread_name());
        names.push(context::offload(current_thread_name));
        names.push(current_thread_name());
    })?;

    runtime.shutdown()?;
    assert_eq!(
        *observed.lock(),
        ["filo-test-compute", "filo-test-io", "filo-test-compute"]
    );
    Ok(())
}

#[test]
fn test_file_write_read_round_trip() -> Result<()> {
    let _guard = serial();
    let runtime = Builder::new().try_build()?;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("round-trip");
    let data_out = b"I love me some filo pastry!\n".to_vec();

    let read_back = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&read_back);
    let expected = data_out.clone();
    runtime.spawn(move || {
        let file = filo::fs::open(
            &path,
            OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .unwrap();
        assert_eq!(filo::fs::write(&file, &expected), Ok(expected.len()));
        filo::fs::close(file).unwrap();

        let file = filo::fs::open(&path, OFlag::O_RDONLY, Mode::empty()).unwrap();
        let mut buf = vec![0u8; expected.len() * 2];
        let n = filo::fs::read(&file, &mut buf).unwrap();
        filo::fs::close(file).unwrap();

        sink.lock().extend_from_slice(&buf[..n]);
    })?;

    runtime.shutdown()?;
    assert_eq!(*read_back.lock(), data_out);
    Ok(())
}

#[test]
fn test_pending_io_count_returns_to_zero() -> Result<()> {
    const TASKS: usize = 8;
    const ROUNDS: usize = 5;

    let _guard = serial();
    let runtime = small_stack_builder().try_build()?;

    for _ in 0..TASKS {
        runtime.spawn(|| {
            for _ in 0..ROUNDS {
                context::offload(|| thread::sleep(Duration::from_micros(200)));
                filo::yield_now();
            }
        })?;
    }

    // Sample the counter from outside while the workload runs. The invariant
    // "always >= 0" holds by type; the bound by construction is TASKS.
    for _ in 0..50 {
        assert!(runtime.shared().pending_io() <= TASKS);
        thread::sleep(Duration::from_micros(500));
    }

    let shared = Arc::clone(runtime.shared());
    runtime.shutdown()?;

    assert_eq!(shared.pending_io(), 0);
    assert_eq!(shared.tracker.num_calls(&Method::IoDispatch), TASKS * ROUNDS);
    assert_eq!(shared.tracker.num_calls(&Method::IoReturn), TASKS * ROUNDS);
    Ok(())
}

#[test]
fn test_shutdown_waits_for_io_then_yields_then_exit() -> Result<()> {
    let _guard = serial();
    let runtime = Builder::new().try_build()?;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("shutdown-safety");

    let done = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&done);
    runtime.spawn(move || {
        let file = filo::fs::open(
            &path,
            OFlag::O_WRONLY | OFlag::O_CREAT,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .unwrap();
        filo::fs::write(&file, b"almost done").unwrap();
        filo::fs::close(file).unwrap();

        for _ in 0..50 {
            filo::yield_now();
        }
        flag.store(true, Ordering::SeqCst);
    })?;

    runtime.shutdown()?;
    assert!(done.load(Ordering::SeqCst), "shutdown returned before task exit");
    Ok(())
}

// Every dispatch must pair with exactly one hand-back, per task, with never
// two executors owning the same context; the tracker asserts the in-flight
// invariant at record time, this test drives it hard and checks the totals.
#[test]
fn test_no_double_dispatch_under_stress() -> Result<()> {
    const TASKS: usize = 50;
    const YIELDS: usize = 20;
    const IO_ROUNDS: usize = 2;

    let _guard = serial();
    let runtime = small_stack_builder().try_build()?;

    let mut ids = Vec::with_capacity(TASKS);
    for _ in 0..TASKS {
        ids.push(runtime.spawn(|| {
            for _ in 0..YIELDS {
                filo::yield_now();
            }
            for _ in 0..IO_ROUNDS {
                context::offload(|| 7);
            }
        })?);
    }

    let shared = Arc::clone(runtime.shared());
    runtime.shutdown()?;

    let mut dispatches: HashMap<TaskId, usize> = HashMap::new();
    for call in shared.tracker.get_calls(&Method::Dispatch) {
        let Call::Dispatch { id } = call else {
            unreachable!()
        };
        *dispatches.entry(id).or_default() += 1;
    }

    // Initial dispatch + one redispatch per yield + one per I/O round trip.
    for id in &ids {
        assert_eq!(dispatches.get(id), Some(&(1 + YIELDS + IO_ROUNDS)));
    }

    let unschedules = shared.tracker.num_calls(&Method::Unschedule);
    assert_eq!(unschedules, TASKS * (1 + YIELDS + IO_ROUNDS));
    assert_eq!(shared.tracker.num_calls(&Method::IoDispatch), TASKS * IO_ROUNDS);
    Ok(())
}

#[test]
fn test_zero_task_runtime_shuts_down() -> Result<()> {
    let _guard = serial();
    let runtime = Builder::new().try_build()?;
    runtime.shutdown()
}

#[test]
fn test_drop_performs_shutdown() -> Result<()> {
    let _guard = serial();
    let completed = Arc::new(AtomicUsize::new(0));

    {
        let runtime = small_stack_builder().try_build()?;
        let completed = Arc::clone(&completed);
        runtime.spawn(move || {
            filo::yield_now();
            completed.fetch_add(1, Ordering::SeqCst);
        })?;
        // Dropped without an explicit shutdown.
    }

    assert_eq!(completed.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_spawn_failure_leaves_runtime_usable() -> Result<()> {
    let _guard = serial();

    // A power-of-two stack size the allocator can never satisfy.
    let runtime = Builder::new().stack_size(1usize << 63).try_build()?;

    assert!(runtime.spawn(|| {}).is_err());
    runtime.shutdown()
}

#[test]
fn test_second_runtime_is_rejected_while_active() -> Result<()> {
    let _guard = serial();
    let runtime = Builder::new().try_build()?;

    let err = Builder::new().try_build().unwrap_err();
    assert!(err.to_string().contains("already active"));

    runtime.shutdown()?;

    // After shutdown a fresh runtime may be built again.
    Builder::new().try_build()?.shutdown()
}

#[test]
#[should_panic(expected = "stack_size must be a power of two")]
fn test_builder_rejects_non_power_of_two_stack() {
    let _ = Builder::new().stack_size(1000);
}

#[test]
#[should_panic(expected = "io_idle_grace must be greater than 0")]
fn test_builder_rejects_zero_idle_grace() {
    let _ = Builder::new().io_idle_grace(0);
}

#[test]
#[should_panic(expected = "not inside a running task")]
fn test_yield_now_outside_task_panics() {
    filo::yield_now();
}
