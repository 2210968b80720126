// Integration tests for tether::logging

use std::io;
use std::sync::{Arc, Mutex};

use tether::logging::{self, LogConfig};
use tether::runtime::{EventLoop, RuntimeConfig};
use tether::{log_dispatch, log_error, log_lifecycle, loop_span, task_span};
use tracing::Level;

#[test]
fn test_log_config_defaults() {
    let config = LogConfig::default();
    assert_eq!(config.level, Level::INFO);
    assert!(!config.json_format);
    assert!(config.show_file_line);
    assert!(config.target_filters.is_none());
}

#[test]
fn test_init_is_idempotent_and_macros_expand() {
    logging::init_test();
    logging::init_test();
    logging::init_default();
    logging::init(LogConfig {
        json_format: true,
        ..LogConfig::default()
    });

    let span = loop_span!("loop-under-test", pool = 1u64);
    let _guard = span.enter();
    let task = task_span!("dispatch");
    let _task_guard = task.enter();
    log_lifecycle!("event_loop", "loop-under-test", "created");
    log_dispatch!("Tasker.Task.Succeeded", "resolved", id = 1i64);
    log_error!("synthetic failure", component = "logging_test");
}

#[test]
fn test_init_with_file_checks_path() {
    let outcome = logging::init_with_file(
        LogConfig::default(),
        "/nonexistent-tether-dir/nested/tether.log",
    );
    assert!(outcome.is_err());

    let dir = std::env::temp_dir().join(format!("tether-log-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("tether.log");
    logging::init_with_file(LogConfig::default(), path.to_str().unwrap()).unwrap();
    assert!(path.exists());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_workers_log_through_creator_subscriber() {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let event_loop = EventLoop::with_config(RuntimeConfig::default().with_pool_size(1)).unwrap();
        event_loop
            .eval(|| tracing::warn!("reported from a worker"))
            .sync_wait();
    });

    let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
    assert!(output.contains("reported from a worker"));
}
