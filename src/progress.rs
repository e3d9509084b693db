//! Progress-callback trait for per-object derivation events.
//!
//! Inject an [`Arc<dyn DeriveProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events while [`crate::Deriver::derive_batch`] works through its objects.
//!
//! # Example
//!
//! ```rust
//! use ocr_derivatives::{DeriveProgressCallback, PageReport, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl DeriveProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, index: usize, total: usize, report: &PageReport) {
//!         let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{} done ({done}/{total}, item {index})", report.object);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn DeriveProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::PageReport;
use crate::repository::ObjectId;
use std::sync::Arc;

/// Called by the batch driver as it processes each object.
///
/// Objects are derived concurrently, so `on_page_start`, `on_page_complete`
/// and `on_page_error` may be called from different tasks at once.
/// Implementations must synchronise any shared mutable state. Every method
/// has a no-op default.
pub trait DeriveProgressCallback: Send + Sync {
    /// Called once before any object is processed.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called before the first repository read for an object.
    ///
    /// `index` is 1-based in submission order.
    fn on_page_start(&self, index: usize, total: usize, object: &ObjectId) {
        let _ = (index, total, object);
    }

    /// Called when an object produced a report. The report may still contain
    /// failed derivatives.
    fn on_page_complete(&self, index: usize, total: usize, report: &PageReport) {
        let _ = (index, total, report);
    }

    /// Called when an object was aborted by a fatal error.
    fn on_page_error(&self, index: usize, total: usize, object: &ObjectId, error: &str) {
        let _ = (index, total, object, error);
    }

    /// Called once after every object has been attempted.
    ///
    /// `success_count` counts objects whose report is fully successful.
    fn on_batch_complete(&self, total: usize, success_count: usize) {
        let _ = (total, success_count);
    }
}

/// A no-op implementation for callers that need a placeholder callback.
pub struct NoopProgressCallback;

impl DeriveProgressCallback for NoopProgressCallback {}

/// Type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn DeriveProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        batch_total: AtomicUsize,
        batch_successes: AtomicUsize,
    }

    impl DeriveProgressCallback for TrackingCallback {
        fn on_batch_start(&self, total: usize) {
            self.batch_total.store(total, Ordering::SeqCst);
        }

        fn on_page_start(&self, _index: usize, _total: usize, _object: &ObjectId) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_complete(&self, _index: usize, _total: usize, _report: &PageReport) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_error(&self, _index: usize, _total: usize, _object: &ObjectId, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_batch_complete(&self, _total: usize, success_count: usize) {
            self.batch_successes.store(success_count, Ordering::SeqCst);
        }
    }

    fn report(id: &str) -> PageReport {
        PageReport {
            object: ObjectId::from(id),
            outcomes: Vec::new(),
            duration_ms: 1,
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        let pid = ObjectId::from("book:1");
        cb.on_batch_start(2);
        cb.on_page_start(1, 2, &pid);
        cb.on_page_complete(1, 2, &report("book:1"));
        cb.on_page_error(2, 2, &pid, "repository unreachable");
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        let pid = ObjectId::from("book:3");

        tracker.on_batch_start(3);
        assert_eq!(tracker.batch_total.load(Ordering::SeqCst), 3);

        tracker.on_page_start(1, 3, &pid);
        tracker.on_page_complete(1, 3, &report("book:1"));
        tracker.on_page_start(2, 3, &pid);
        tracker.on_page_complete(2, 3, &report("book:2"));
        tracker.on_page_start(3, 3, &pid);
        tracker.on_page_error(3, 3, &pid, "scratch dir not writable");

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);

        tracker.on_batch_complete(3, 2);
        assert_eq!(tracker.batch_successes.load(Ordering::SeqCst), 2);
    }
}
