// Integration tests for tether::runtime::pool

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use tether::runtime::{RuntimeConfig, ThreadPool};
use tether::RuntimeError;

use test_helpers::recv;

fn pool(size: usize) -> ThreadPool {
    ThreadPool::new(RuntimeConfig::default().with_pool_size(size)).unwrap()
}

#[test]
fn test_global_fifo_across_producers() {
    let pool = Arc::new(pool(1));
    // Producers enqueue while holding `sequence`, so the value each task
    // carries is its position in the global enqueue order.
    let sequence = Arc::new(Mutex::new(0usize));
    let observed = Arc::new(Mutex::new(Vec::new()));

    let producers: Vec<_> = (0..4)
        .map(|_| {
            let pool = pool.clone();
            let sequence = sequence.clone();
            let observed = observed.clone();
            thread::spawn(move || {
                for _ in 0..250 {
                    let mut next = sequence.lock().unwrap();
                    let position = *next;
                    *next += 1;
                    let observed = observed.clone();
                    pool.defer(move || observed.lock().unwrap().push(position))
                        .unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    pool.wait_all();

    let observed = observed.lock().unwrap();
    assert_eq!(observed.len(), 1000);
    assert!(observed.iter().enumerate().all(|(index, position)| index == *position));
}

#[test]
fn test_wait_all_sees_every_task_finished() {
    let pool = pool(4);
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..200 {
        let counter = counter.clone();
        pool.defer(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }
    pool.wait_all();
    assert_eq!(counter.load(Ordering::SeqCst), 200);
    assert_eq!(pool.metrics().queued, 0);
}

#[test]
fn test_stop_discards_queued_tasks() {
    let pool = pool(1);
    let (started_tx, started_rx) = mpsc::channel();
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    pool.defer(move || {
        started_tx.send(()).unwrap();
        let _ = gate_rx.recv();
    })
    .unwrap();
    recv(&started_rx);

    let ran = Arc::new(AtomicUsize::new(0));
    for _ in 0..5 {
        let ran = ran.clone();
        pool.defer(move || {
            ran.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    pool.stop();
    gate_tx.send(()).unwrap();
    pool.join();

    assert_eq!(ran.load(Ordering::SeqCst), 0);
    let metrics = pool.metrics();
    assert_eq!(metrics.discarded, 5);
    assert!(metrics.stopped);
    assert!(matches!(pool.defer(|| {}), Err(RuntimeError::Stopped)));
}

#[test]
fn test_drop_joins_and_releases_discarded_tasks() {
    let sentinel = Arc::new(());
    {
        let pool = pool(1);
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        pool.defer(move || {
            let _ = gate_rx.recv();
        })
        .unwrap();
        for _ in 0..3 {
            let held = sentinel.clone();
            pool.defer(move || drop(held)).unwrap();
        }
        pool.stop();
        drop(gate_tx);
    }
    assert_eq!(Arc::strong_count(&sentinel), 1);
}

#[test]
fn test_stop_wakes_wait_all() {
    let pool = Arc::new(pool(1));
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    pool.defer(move || {
        let _ = gate_rx.recv();
    })
    .unwrap();
    pool.defer(|| {}).unwrap();

    let waiter_pool = pool.clone();
    let (done_tx, done_rx) = mpsc::channel();
    let waiter = thread::spawn(move || {
        waiter_pool.wait_all();
        done_tx.send(()).unwrap();
    });

    pool.stop();
    recv(&done_rx);
    drop(gate_tx);
    waiter.join().unwrap();
}

#[test]
fn test_concurrent_wait_all_from_tasks() {
    let pool = Arc::new(pool(2));
    let (tx, rx) = mpsc::channel();
    for index in 0..2 {
        let task_pool = pool.clone();
        let tx = tx.clone();
        pool.defer(move || {
            thread::sleep(Duration::from_millis(20));
            task_pool.wait_all();
            tx.send(index).unwrap();
        })
        .unwrap();
    }

    let mut finished = vec![recv(&rx), recv(&rx)];
    finished.sort_unstable();
    assert_eq!(finished, vec![0, 1]);
    pool.wait_all();
    assert_eq!(pool.metrics().in_flight, 0);
}
