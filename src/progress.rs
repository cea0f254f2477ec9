//! Progress-callback trait for per-document and per-page events.
//!
//! Inject an [`Arc<dyn TranscriptionProgress>`] via
//! [`crate::config::TranscriptionConfigBuilder::progress_callback`]. The CLI
//! drives an `indicatif` bar through it; library users can forward events
//! anywhere.
//!
//! Pages run concurrently, so the page methods may be called from several
//! tasks at once and in any page order. Implementations must synchronise
//! their own state.

use std::sync::Arc;

/// Receives pipeline events. Every method defaults to a no-op.
pub trait TranscriptionProgress: Send + Sync {
    /// Pages are selected and the worker budget is known.
    fn on_document_start(&self, document: &str, pages: usize, workers: usize) {
        let _ = (document, pages, workers);
    }

    /// A worker picked up `page`.
    fn on_page_start(&self, page: usize) {
        let _ = page;
    }

    /// `page` is about to be retried; `attempt` counts from 2.
    fn on_page_retry(&self, page: usize, attempt: u32) {
        let _ = (page, attempt);
    }

    /// `page` was transcribed; `chars` is the length of its text.
    fn on_page_complete(&self, page: usize, chars: usize) {
        let _ = (page, chars);
    }

    /// `page` ended as a failure placeholder.
    fn on_page_error(&self, page: usize, error: &str) {
        let _ = (page, error);
    }

    /// All pages have a terminal outcome and the merged file is written.
    fn on_document_complete(&self, document: &str, succeeded: usize, failed: usize) {
        let _ = (document, succeeded, failed);
    }
}

/// Default when no callback is configured.
pub struct NoopProgress;

impl TranscriptionProgress for NoopProgress {}

/// Type stored in [`crate::config::TranscriptionConfig`].
pub type ProgressCallback = Arc<dyn TranscriptionProgress>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        completed: AtomicUsize,
        errors: Mutex<Vec<usize>>,
    }

    impl TranscriptionProgress for Recorder {
        fn on_page_complete(&self, _page: usize, _chars: usize) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_error(&self, page: usize, _error: &str) {
            self.errors.lock().unwrap().push(page);
        }
    }

    #[test]
    fn noop_accepts_everything() {
        let cb: ProgressCallback = Arc::new(NoopProgress);
        cb.on_document_start("doc", 3, 2);
        cb.on_page_start(1);
        cb.on_page_retry(1, 2);
        cb.on_page_complete(1, 10);
        cb.on_page_error(2, "boom");
        cb.on_document_complete("doc", 1, 1);
    }

    #[test]
    fn overridden_methods_receive_events() {
        let rec = Arc::new(Recorder::default());
        let cb: ProgressCallback = rec.clone();
        cb.on_page_complete(1, 5);
        cb.on_page_complete(3, 7);
        cb.on_page_error(2, "gave up");
        cb.on_page_start(4);
        assert_eq!(rec.completed.load(Ordering::SeqCst), 2);
        assert_eq!(*rec.errors.lock().unwrap(), vec![2]);
    }
}
