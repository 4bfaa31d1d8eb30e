//! Progress reporting and cooperative cancellation for long-running passes.
//!
//! A clustering pass runs on a worker thread. The caller keeps a
//! [`CancelFlag`] clone to request cancellation and, optionally, the receiving
//! end of a channel of [`TaskUpdate`]s to follow progress.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

/// Shared cancellation request, observed at the pass's yield points.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress information for a task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskProgress {
    pub current: usize,
    pub total: usize,
    pub message: Option<String>,
}

impl TaskProgress {
    pub fn new(current: usize, total: usize) -> Self {
        Self {
            current,
            total,
            message: None,
        }
    }

    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Calculate progress percentage (0-100).
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            0
        } else {
            ((self.current as f64 / self.total as f64) * 100.0).min(100.0) as u8
        }
    }
}

/// Update messages sent from a running pass.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskUpdate {
    /// Pass has started with total items to process.
    Started { total: usize },
    Progress(TaskProgress),
    Completed { message: String },
    Cancelled,
    Failed { error: String },
}

/// Cancellation and progress hooks handed to a clustering pass.
#[derive(Debug, Clone, Default)]
pub struct PassControl {
    cancel: CancelFlag,
    updates: Option<Sender<TaskUpdate>>,
}

impl PassControl {
    pub fn new(cancel: CancelFlag) -> Self {
        Self {
            cancel,
            updates: None,
        }
    }

    pub fn with_updates(mut self, tx: Sender<TaskUpdate>) -> Self {
        self.updates = Some(tx);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Send an update; a dropped receiver is not an error.
    pub fn send(&self, update: TaskUpdate) {
        if let Some(tx) = &self.updates {
            let _ = tx.send(update);
        }
    }

    pub fn progress(&self, current: usize, total: usize, message: impl Into<String>) {
        self.send(TaskUpdate::Progress(
            TaskProgress::new(current, total).with_message(message),
        ));
    }
}
