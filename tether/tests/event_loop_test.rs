// Integration tests for tether::runtime::event_loop

use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tether::runtime::{current_task_id, EventLoop, RuntimeConfig, TaskId};
use tether::RuntimeError;

use test_helpers::{recv, test_loop};

#[test]
fn test_exec_returns_after_stop_after() {
    let event_loop = test_loop(2);
    let done = event_loop.eval(|| "done");
    event_loop.stop_after(&done);
    assert_eq!(event_loop.exec().unwrap(), 0);
    assert_eq!(done.peek(), Some("done"));
}

#[test]
fn test_stop_after_code_propagates_exit_code() {
    let event_loop = test_loop(2);
    let code = event_loop.eval(|| 5);
    event_loop.stop_after_code(&code);
    assert_eq!(event_loop.exec().unwrap(), 5);
}

#[test]
fn test_eval_resumes_as_a_queued_task() {
    let event_loop = test_loop(2);
    let handle = event_loop.handle().clone();
    let eval_task: Arc<Mutex<Option<TaskId>>> = Arc::new(Mutex::new(None));
    let recorded = eval_task.clone();

    let outcome = event_loop.spawn(async move {
        let before = current_task_id();
        let value = handle
            .eval(move || {
                *recorded.lock().unwrap() = current_task_id();
                7
            })
            .await;
        (value, before, current_task_id())
    });
    event_loop.stop_after(&outcome);
    assert_eq!(event_loop.exec().unwrap(), 0);

    let (value, before, after) = outcome.peek().unwrap();
    let eval_task = eval_task.lock().unwrap().unwrap();
    assert_eq!(value, 7);
    let after = after.expect("resumption must run inside a task");
    assert_ne!(after, eval_task);
    assert_ne!(Some(after), before);
}

#[test]
fn test_second_loop_on_same_thread_is_rejected() {
    let _first = test_loop(1);
    assert!(matches!(
        EventLoop::with_config(RuntimeConfig::default().with_pool_size(1)),
        Err(RuntimeError::LoopAlreadyRunning)
    ));
}

#[test]
fn test_loops_on_other_threads_are_independent() {
    let event_loop = test_loop(1);
    let (tx, rx) = mpsc::channel();
    let other = thread::spawn(move || {
        let other_loop = test_loop(1);
        let value = other_loop.eval(|| 2).sync_wait();
        tx.send((value, other_loop.id())).unwrap();
    });
    let (value, other_id) = recv(&rx);
    other.join().unwrap();
    assert_eq!(value, 2);
    assert_ne!(other_id, event_loop.id());
}

#[test]
fn test_current_is_visible_from_workers_and_owner() {
    let event_loop = test_loop(2);
    assert!(EventLoop::current().unwrap().same_loop(event_loop.handle()));

    let seen_on_worker = event_loop.eval(|| EventLoop::current().map(|handle| handle.id()));
    assert_eq!(seen_on_worker.sync_wait(), Some(event_loop.id()));
}

#[test]
fn test_sleep_resolves_after_duration() {
    let event_loop = test_loop(1);
    let started = Instant::now();
    let slept = event_loop.sleep(Duration::from_millis(30));
    event_loop.stop_after(&slept);
    assert_eq!(event_loop.exec().unwrap(), 0);
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[test]
fn test_failing_task_fails_exec() {
    let event_loop = test_loop(1);
    event_loop
        .defer_fallible(|| Err(anyhow::anyhow!("engine handle vanished")))
        .unwrap();
    match event_loop.exec() {
        Err(RuntimeError::TaskFailed(message)) => {
            assert!(message.contains("engine handle vanished"))
        }
        other => panic!("expected TaskFailed, got {other:?}"),
    }
}

#[test]
fn test_defer_after_stop_is_rejected() {
    let event_loop = test_loop(1);
    event_loop.stop(0);
    assert!(event_loop.is_stopped());
    assert!(matches!(event_loop.defer(|| {}), Err(RuntimeError::Stopped)));
}

#[test]
fn test_try_eval_reports_stopped_loop() {
    let event_loop = test_loop(1);
    assert_eq!(event_loop.try_eval(|| 3).unwrap().sync_wait(), 3);

    event_loop.stop(0);
    assert!(matches!(event_loop.try_eval(|| 1), Err(RuntimeError::Stopped)));
    assert!(!event_loop.eval(|| 1).is_resolved());
}

#[test]
fn test_stop_releases_task_blocked_in_sync_wait() {
    let event_loop = test_loop(2);
    let never = event_loop.promise::<u8>();
    let (started_tx, started_rx) = mpsc::channel();
    event_loop
        .defer(move || {
            started_tx.send(()).unwrap();
            let _: u8 = never.sync_wait();
        })
        .unwrap();
    recv(&started_rx);

    event_loop.stop(0);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(event_loop.exec().unwrap(), 0);
}
