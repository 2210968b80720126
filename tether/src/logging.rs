// Logging setup for tether and the binding layers built on it.
//
// Loop, pool and dispatch events are emitted through `tracing` as structured
// fields. Install a global subscriber once, early in main:
//
// ```rust
// tether::logging::init(tether::logging::LogConfig {
//     level: tracing::Level::DEBUG,
//     ..Default::default()
// });
// ```
//
// A `ThreadPool` captures `current_subscriber()` when it is created and runs
// its workers under it, so a subscriber installed with
// `tracing::subscriber::set_default` in a test also sees task logs.

use std::fs::{File, OpenOptions};
use std::io;
use std::sync::Once;
use tracing::{Level, Subscriber};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

/// Settings for the global subscriber installed by [`init`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: Level,
    /// Whether to use JSON format for logs
    pub json_format: bool,
    /// Whether to include file and line information
    pub show_file_line: bool,
    /// Whether to include thread name/id. Worker names carry the pool's
    /// thread prefix, which makes this the quickest way to see which pool
    /// ran a task.
    pub show_thread_info: bool,
    /// Whether to include timestamps
    pub show_time: bool,
    /// Target filter expressions (format: "target=level,target2=level2,...")
    pub target_filters: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            show_file_line: true,
            show_thread_info: true,
            show_time: true,
            target_filters: None,
        }
    }
}

static INIT: Once = Once::new();

fn env_filter(config: &LogConfig) -> EnvFilter {
    let mut env_filter = EnvFilter::from_default_env().add_directive(config.level.into());
    if let Some(filters) = &config.target_filters {
        for filter in filters.split(',') {
            if let Ok(directive) = filter.trim().parse() {
                env_filter = env_filter.add_directive(directive);
            }
        }
    }
    env_filter
}

// Console output: JSON for aggregators, otherwise human-readable with colors
// when stdout is a terminal.
fn console_layer<S>(config: &LogConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    if config.json_format {
        return fmt::layer()
            .json()
            .flatten_event(true)
            .with_thread_names(config.show_thread_info)
            .boxed();
    }
    let layer = fmt::layer()
        .with_ansi(atty::is(atty::Stream::Stdout))
        .with_file(config.show_file_line)
        .with_line_number(config.show_file_line)
        .with_thread_names(config.show_thread_info)
        .with_thread_ids(config.show_thread_info);
    if config.show_time {
        layer.boxed()
    } else {
        layer.without_time().boxed()
    }
}

/// Installs the global subscriber. Only the first init call in a process
/// takes effect.
pub fn init(config: LogConfig) {
    INIT.call_once(|| {
        let subscriber = tracing_subscriber::registry()
            .with(env_filter(&config))
            .with(console_layer(&config));
        set_global_subscriber(subscriber);
    });
}

fn set_global_subscriber<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error setting global tracing subscriber: {}", err);
    }
}

fn append_to(path: &str) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Like [`init`], plus a plain-text copy of every event appended to
/// `log_file`.
///
/// # Errors
/// Returns an error if the log file cannot be opened or created. The file is
/// opened up front so a bad path surfaces here and not inside the writer.
pub fn init_with_file(config: LogConfig, log_file: &str) -> Result<(), io::Error> {
    drop(append_to(log_file)?);

    INIT.call_once(|| {
        let path = log_file.to_string();
        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(move || -> Box<dyn io::Write + Send + Sync> {
                match append_to(&path) {
                    Ok(file) => Box::new(file),
                    Err(_) => Box::new(io::stderr()),
                }
            })
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true)
            .with_thread_ids(true);

        let subscriber = tracing_subscriber::registry()
            .with(env_filter(&config))
            .with(console_layer(&config))
            .with(file_layer);
        set_global_subscriber(subscriber);
    });

    Ok(())
}

/// INFO level, human-readable console output.
pub fn init_default() {
    init(LogConfig::default());
}

/// Warnings and errors only, without thread info or timestamps.
pub fn init_test() {
    let config = LogConfig {
        level: Level::WARN,
        json_format: false,
        show_file_line: true,
        show_thread_info: false,
        show_time: false,
        target_filters: None,
    };
    init(config);
}

/// Span covering work done on behalf of one event loop.
///
/// ```rust
/// use tether::loop_span;
///
/// let span = loop_span!("3c0d9a52");
/// let _guard = span.enter();
///
/// let span = loop_span!("3c0d9a52", pool = 4u64);
/// ```
#[macro_export]
macro_rules! loop_span {
    ($loop_id:expr) => {
        tracing::info_span!("event_loop", id = %$loop_id)
    };
    ($loop_id:expr, $($fields:tt)*) => {
        tracing::info_span!("event_loop", id = %$loop_id, $($fields)*)
    };
}

/// Span covering one drain of the dispatcher inbox or one promise drain.
///
/// ```rust
/// use tether::task_span;
///
/// let span = task_span!("dispatch");
/// let _guard = span.enter();
/// ```
#[macro_export]
macro_rules! task_span {
    ($kind:expr) => {
        tracing::debug_span!("task", kind = $kind)
    };
    ($kind:expr, $($fields:tt)*) => {
        tracing::debug_span!("task", kind = $kind, $($fields)*)
    };
}

/// Log lifecycle events: loop created/stopped, pool started/joined, worker
/// started.
///
/// ```rust
/// use tether::log_lifecycle;
///
/// log_lifecycle!("pool", 1u64, "started");
/// log_lifecycle!("event_loop", "3c0d9a52", "stopped", code = 0);
/// ```
#[macro_export]
macro_rules! log_lifecycle {
    ($component:expr, $id:expr, $event:expr) => {
        tracing::info!(component = $component, id = %$id, event = $event);
    };
    ($component:expr, $id:expr, $event:expr, $($fields:tt)*) => {
        tracing::info!(component = $component, id = %$id, event = $event, $($fields)*);
    };
}

/// Log one step of completion-message dispatch.
///
/// ```rust
/// use tether::log_dispatch;
///
/// log_dispatch!("Tasker.Task.Succeeded", "resolved");
/// log_dispatch!("Tasker.Task.Succeeded", "abandoned", id = 43i64);
/// ```
#[macro_export]
macro_rules! log_dispatch {
    ($tag:expr, $outcome:expr) => {
        tracing::debug!(tag = $tag, outcome = $outcome);
    };
    ($tag:expr, $outcome:expr, $($fields:tt)*) => {
        tracing::debug!(tag = $tag, outcome = $outcome, $($fields)*);
    };
}

/// Log error events
///
/// ```rust
/// use tether::log_error;
///
/// let error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
/// log_error!(error, component = "logging");
/// ```
#[macro_export]
macro_rules! log_error {
    ($error:expr) => {
        tracing::error!(error = %$error);
    };
    ($error:expr, $($fields:tt)*) => {
        tracing::error!(error = %$error, $($fields)*);
    };
}

/// Dispatcher of the calling thread. `ThreadPool::new` captures it so its
/// workers log through the creator's subscriber.
#[inline]
pub fn current_subscriber() -> tracing::Dispatch {
    tracing::dispatcher::get_default(|d| d.clone())
}
