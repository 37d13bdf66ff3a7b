//! Progress reporting and cancellation for long-running operations.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Operation a progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Listing books on a slot.
    List,
    /// Uploading books.
    Upload,
    /// Deleting books.
    Delete,
}

/// One step of a long running operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    /// What is running.
    pub operation: Operation,
    /// Files handled so far, including this one.
    pub done: usize,
    /// Total number of files, when known up front.
    pub total: Option<usize>,
    /// File this step was about.
    pub path: String,
}

/// Progress callback, invoked once per file.
#[derive(Clone, Default)]
pub struct Progress {
    callback: Option<Arc<dyn Fn(ProgressEvent) + Send + Sync>>,
}

impl Progress {
    /// A reporter that drops every event.
    pub fn none() -> Self {
        Self::default()
    }

    /// A reporter calling `f` for every event.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(ProgressEvent) + Send + Sync + 'static,
    {
        Self {
            callback: Some(Arc::new(f)),
        }
    }

    /// Delivers an event to the callback.
    pub fn report(&self, event: ProgressEvent) {
        if let Some(callback) = &self.callback {
            callback(event);
        }
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress")
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Shared cancellation flag, checked between files.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
