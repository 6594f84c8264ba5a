//! Progress and error monitor.
//!
//! Long call chains use a [`ProgressMonitor`] to detect a specific remote
//! failure and apply a local retry or fallback policy without unwinding the
//! chain: errors are reported as ordered records, not thrown.
//!
//! Cancellation is cooperative. Engines poll [`ProgressMonitor::is_canceled`]
//! at the top of every loop that would otherwise issue another remote call;
//! nothing is preempted mid round-trip.
//!
//! A forked monitor shares its parent's cancellation flag but buffers its own
//! error records. The pattern is: fork, attempt the call, inspect
//! [`ProgressMonitor::first_error_kind`], decide on a fallback, and either
//! [`ProgressMonitor::reset`] or re-surface the records to the parent.

use crate::error::{DirectoryError, ErrorKind};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// One reported failure: a message, an optional classified cause, and when
/// it happened.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub message: String,
    pub cause: Option<DirectoryError>,
    pub at: DateTime<Utc>,
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {}", self.message, cause),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Cancellation flag plus ordered error record list.
#[derive(Debug, Clone)]
pub struct ProgressMonitor {
    canceled: Arc<AtomicBool>,
    errors: Arc<Mutex<Vec<ErrorRecord>>>,
}

impl ProgressMonitor {
    pub fn new() -> Self {
        Self {
            canceled: Arc::new(AtomicBool::new(false)),
            errors: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fork a child monitor: cancellation is shared with the parent, error
    /// records are buffered locally until surfaced.
    pub fn fork(&self) -> Self {
        Self {
            canceled: Arc::clone(&self.canceled),
            errors: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Append an error record. Does not unwind and does not cancel.
    pub fn report_error(&self, message: impl Into<String>, cause: Option<DirectoryError>) {
        self.errors.lock().push(ErrorRecord {
            message: message.into(),
            cause,
            at: Utc::now(),
        });
    }

    /// Report a classified transport error using its diagnostic as message.
    pub fn report_directory_error(&self, cause: DirectoryError) {
        self.report_error(cause.diagnostic.clone(), Some(cause));
    }

    /// Whether any error has been reported since the last reset.
    pub fn errors_reported(&self) -> bool {
        !self.errors.lock().is_empty()
    }

    /// Snapshot of the ordered error records.
    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.errors.lock().clone()
    }

    /// Kind of the first classified error, if any. This is what fallback
    /// decisions match on.
    pub fn first_error_kind(&self) -> Option<ErrorKind> {
        self.errors
            .lock()
            .iter()
            .find_map(|r| r.cause.as_ref().map(|c| c.kind))
    }

    /// Clear error records. Cancellation state is not touched.
    pub fn reset(&self) {
        self.errors.lock().clear();
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    pub fn set_canceled(&self, canceled: bool) {
        self.canceled.store(canceled, Ordering::Release);
    }

    /// Move all buffered records onto `parent`, preserving order.
    pub fn surface_to(&self, parent: &ProgressMonitor) {
        let mut own = self.errors.lock();
        parent.errors.lock().append(&mut own);
    }
}

impl Default for ProgressMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_and_reset() {
        let monitor = ProgressMonitor::new();
        assert!(!monitor.errors_reported());

        monitor.report_error("lookup failed", Some(DirectoryError::no_such_object("gone")));
        assert!(monitor.errors_reported());
        assert_eq!(monitor.first_error_kind(), Some(ErrorKind::NoSuchObject));

        monitor.set_canceled(true);
        monitor.reset();
        assert!(!monitor.errors_reported());
        // reset clears records but not cancellation
        assert!(monitor.is_canceled());
    }

    #[test]
    fn test_fork_shares_cancellation() {
        let parent = ProgressMonitor::new();
        let child = parent.fork();

        parent.set_canceled(true);
        assert!(child.is_canceled());

        child.set_canceled(false);
        assert!(!parent.is_canceled());
    }

    #[test]
    fn test_fork_buffers_errors() {
        let parent = ProgressMonitor::new();
        let child = parent.fork();

        child.report_error("entry exists", Some(DirectoryError::already_exists("x")));
        assert!(child.errors_reported());
        assert!(!parent.errors_reported());

        child.surface_to(&parent);
        assert!(parent.errors_reported());
        assert!(!child.errors_reported());
        assert_eq!(parent.first_error_kind(), Some(ErrorKind::AlreadyExists));
    }

    #[test]
    fn test_record_order_preserved() {
        let monitor = ProgressMonitor::new();
        monitor.report_error("first", None);
        monitor.report_error("second", None);
        let records = monitor.errors();
        assert_eq!(records[0].message, "first");
        assert_eq!(records[1].message, "second");
    }
}
