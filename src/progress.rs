//! Progress-callback trait for per-page parsing events.
//!
//! Inject an [`Arc<dyn ParseProgressCallback>`] via
//! [`crate::config::ParseConfigBuilder::progress_callback`] to receive
//! events as the dispatcher works through the pages.
//!
//! # Example
//!
//! ```rust
//! use edgequake_layout::{ParseConfig, ParseProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter {
//!     done: AtomicUsize,
//! }
//!
//! impl ParseProgressCallback for Counter {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, elements: usize) {
//!         self.done.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("page {page_num}/{total_pages}: {elements} elements");
//!     }
//! }
//!
//! let config = ParseConfig::builder()
//!     .progress_callback(Arc::new(Counter { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it processes each page.
///
/// Pages are dispatched concurrently, so `on_page_*` methods may be called
/// from several tasks at once. Protect shared state with atomics or a
/// `Mutex`. Every method defaults to a no-op.
pub trait ParseProgressCallback: Send + Sync {
    /// Called once before the first page is dispatched.
    fn on_parse_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before the first backend request for a page.
    ///
    /// `page_num` is 1-indexed.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page produced a result.
    ///
    /// `elements` is 0 for text-only modes.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, elements: usize) {
        let _ = (page_num, total_pages, elements);
    }

    /// Called when a page ends up filtered.
    fn on_page_filtered(&self, page_num: usize, total_pages: usize, reason: &str) {
        let _ = (page_num, total_pages, reason);
    }

    /// Called once after every page has a result.
    fn on_parse_complete(&self, total_pages: usize, succeeded: usize) {
        let _ = (total_pages, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ParseProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ParseConfig`].
pub type ProgressCallback = Arc<dyn ParseProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        completes: AtomicUsize,
        filtered: AtomicUsize,
        elements: AtomicUsize,
    }

    impl ParseProgressCallback for Tracking {
        fn on_page_complete(&self, _page_num: usize, _total: usize, elements: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
            self.elements.fetch_add(elements, Ordering::SeqCst);
        }

        fn on_page_filtered(&self, _page_num: usize, _total: usize, _reason: &str) {
            self.filtered.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_parse_start(2);
        cb.on_page_start(1, 2);
        cb.on_page_complete(1, 2, 7);
        cb.on_page_filtered(2, 2, "backend timeout");
        cb.on_parse_complete(2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let t = Tracking::default();
        t.on_page_complete(1, 3, 4);
        t.on_page_complete(2, 3, 6);
        t.on_page_filtered(3, 3, "malformed response");
        assert_eq!(t.completes.load(Ordering::SeqCst), 2);
        assert_eq!(t.filtered.load(Ordering::SeqCst), 1);
        assert_eq!(t.elements.load(Ordering::SeqCst), 10);
    }
}
