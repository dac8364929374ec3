//! # edgequake-ocr
//!
//! Run scanned images and documents through pluggable OCR backends, keep
//! every attempt, and pick one best transcription per run.
//!
//! ## Why variants?
//!
//! No single preprocessing suits every scan: binarisation rescues a faded
//! photocopy but erases the diacritics a clean page needs. Instead of
//! guessing, each page is recognised as several progressively cleaned-up
//! variants and the best observation wins, while the full provenance tree
//! (page → variant → result) is stored for review.
//!
//! ## Pipeline Overview
//!
//! ```text
//! artifact (file / upload / URL)
//!  │
//!  ├─ 1. Ingest     copy into <data_dir>/<token>/original/
//!  ├─ 2. Pages      image as-is; .pdf rasterised; .doc/.docx → PDF first
//!  ├─ 3. Variants   original → grayscale → contrast → median_filter → threshold
//!  ├─ 4. Recognise  every variant through the selected backend
//!  ├─ 5. Summarise  highest confidence, then longest text
//!  └─ 6. Commit     whole run tree in one transaction
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_ocr::{
//!     ArtifactSource, BackendRegistry, RunOrchestrator, RunnerConfig, SqliteRunStore,
//!     TesseractBackend,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut registry = BackendRegistry::new();
//!     registry.register("tesseract", |hint: Option<&str>| {
//!         Ok(Box::new(TesseractBackend::with_hint("tesseract", "vie+eng", hint)) as _)
//!     });
//!
//!     let orchestrator = RunOrchestrator::builder(RunnerConfig::default())
//!         .registry(registry)
//!         .store(Arc::new(SqliteRunStore::open("storage/ocr.sqlite".as_ref())?))
//!         .build()?;
//!
//!     let run = orchestrator
//!         .process(ArtifactSource::File("scan.png".into()), "tesseract", None)
//!         .await?;
//!     println!("{}", run.summary_text.unwrap_or_default());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ocrrun` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod select;
pub mod store;
pub mod variants;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{
    BackendCapabilities, BackendRegistry, Recognition, RecognitionBackend, ResolvedBackend,
    TesseractBackend, VisionBackend, VisionOptions,
};
pub use config::{RunnerConfig, RunnerConfigBuilder};
pub use error::{BackendError, ErrorKind, OcrRunError, VariantError};
pub use model::{ImageKind, PageImage, Run, TextResult};
pub use orchestrator::{RunOrchestrator, RunOrchestratorBuilder, RunState};
pub use pipeline::convert::{DocumentConverter, LibreOfficeConverter};
pub use pipeline::input::ArtifactSource;
pub use pipeline::render::{PdfiumRasterizer, Rasterizer};
pub use progress::{NoopProgressCallback, RunProgressCallback};
pub use select::{display_confidence, normalize_confidence, select_best};
pub use store::{RunStore, SqliteRunStore};
pub use variants::VariantGenerator;
