//! Progress-callback trait for per-page extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the vision workflow processes each page.
//!
//! # Example
//!
//! ```rust
//! use sitework_takeoff::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     records: Arc<AtomicUsize>,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: u32, total_pages: usize, records: usize) {
//!         self.records.fetch_add(records, Ordering::SeqCst);
//!         eprintln!("Page {}/{}: {} records", page_num, total_pages, records);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     records: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the vision workflow as it processes each page.
///
/// Pages run concurrently, so `on_page_start`, `on_pass_complete`,
/// `on_page_complete` and `on_page_error` may be called from different tasks
/// at once. All methods default to no-ops.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once before any page is sent to the model.
    fn on_extraction_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    fn on_page_start(&self, page_num: u32, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called after every model call on a page.
    ///
    /// # Arguments
    /// * `page_num` — 1-indexed page number
    /// * `pass`     — "overview", "merge", "single", or the section name
    fn on_pass_complete(&self, page_num: u32, pass: &str) {
        let _ = (page_num, pass);
    }

    /// Called when a page has been extracted and parsed.
    ///
    /// `records` counts pipes, structures and earthwork items on the page.
    fn on_page_complete(&self, page_num: u32, total_pages: usize, records: usize) {
        let _ = (page_num, total_pages, records);
    }

    /// Called when the model failed on a page after all retries.
    fn on_page_error(&self, page_num: u32, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after all pages have been attempted.
    fn on_extraction_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// The default when no callback is configured.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
