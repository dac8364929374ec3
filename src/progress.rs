//! Progress-callback trait for run lifecycle events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::orchestrator::RunOrchestratorBuilder::progress_callback`] to
//! receive events as a run moves through its states. The CLI uses this to
//! drive its progress bar; a server could forward the same events to a
//! channel or a job table without the library knowing about either.
//!
//! # Example
//!
//! ```rust
//! use edgequake_ocr::{RunProgressCallback, RunState};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     recognized: AtomicUsize,
//! }
//!
//! impl RunProgressCallback for CountingCallback {
//!     fn on_variant_recognized(&self, done: usize, total: usize, label: &str, _conf: Option<f64>) {
//!         self.recognized.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{done}/{total} {label}");
//!     }
//! }
//! ```

use crate::orchestrator::RunState;
use std::sync::Arc;

/// Called by the orchestrator as a run progresses.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Events for one run arrive in order; a callback
/// shared between concurrent runs must synchronise its own state.
pub trait RunProgressCallback: Send + Sync {
    /// Called on every state transition, `Aborted` included.
    fn on_state(&self, state: RunState) {
        let _ = state;
    }

    /// Called once the artifact's pages are known.
    ///
    /// # Arguments
    /// * `pages`: number of source pages
    /// * `variants_per_page`: variants each page will be recognised as
    fn on_pages_resolved(&self, pages: usize, variants_per_page: usize) {
        let _ = (pages, variants_per_page);
    }

    /// Called after each variant is recognised.
    ///
    /// # Arguments
    /// * `done`: 1-indexed count of recognised variants so far
    /// * `total`: variants in the whole run
    /// * `label`: variant label, e.g. `page_2_contrast`
    /// * `confidence`: raw backend confidence, if any
    fn on_variant_recognized(&self, done: usize, total: usize, label: &str, confidence: Option<f64>) {
        let _ = (done, total, label, confidence);
    }

    /// Called after the run tree was committed.
    fn on_run_complete(&self, run_id: i64, summary_len: usize) {
        let _ = (run_id, summary_len);
    }

    /// Called when the run fails; `last_state` is the last state reached.
    fn on_run_aborted(&self, last_state: RunState, error: &str) {
        let _ = (last_state, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// Shared handle stored by the orchestrator.
pub type ProgressCallback = Arc<dyn RunProgressCallback>;
