//! # Runtime Error Types
//!
//! Errors surfaced synchronously to the call site that caused them. Races the
//! runtime expects (a completion for an abandoned action, a message tag it
//! does not know) are absorbed by the dispatch step and never show up here.
//!
//! ## Usage Example
//!
//! ```rust
//! use tether_api::errors::RuntimeError;
//!
//! fn describe(error: RuntimeError) -> String {
//!     match error {
//!         RuntimeError::PostFailed { owner } => format!("{owner} rejected the post"),
//!         RuntimeError::Stopped => "loop already stopped".to_string(),
//!         other => other.to_string(),
//!     }
//! }
//! ```

use std::fmt;

use thiserror::Error;

/// Core error type for the execution runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The native post call returned the invalid-id sentinel.
    ///
    /// # Parameters
    /// * `owner` - Name of the domain object whose post failed
    #[error("Native post failed for {owner}: engine returned the invalid id")]
    PostFailed { owner: String },

    /// A loop is already current on the constructing thread.
    #[error("An event loop is already running on this thread")]
    LoopAlreadyRunning,

    /// No loop is current on the calling thread.
    #[error("No event loop is current on this thread")]
    NoCurrentLoop,

    /// Work was submitted to a stopped pool.
    #[error("Event loop is stopped")]
    Stopped,

    /// A deferred task returned an error or panicked.
    ///
    /// # Parameters
    /// * String - Description of the failure, including the task id
    #[error("Deferred task failed: {0}")]
    TaskFailed(String),

    /// A worker thread could not be spawned.
    #[error("Thread setup error: {0}")]
    ThreadSetup(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A promise was resolved a second time. Carries the rejected value back to
/// the caller.
pub struct ResolveError<T> {
    pub value: T,
}

impl<T> ResolveError<T> {
    pub fn into_value(self) -> T {
        self.value
    }
}

impl<T> fmt::Debug for ResolveError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveError").finish_non_exhaustive()
    }
}

impl<T> fmt::Display for ResolveError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Promise already resolved")
    }
}

impl<T> std::error::Error for ResolveError<T> {}
