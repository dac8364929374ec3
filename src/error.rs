//! Error types for the edgequake-ocr library.
//!
//! Three error types reflect three layers of the system:
//!
//! * [`OcrRunError`] is **fatal for a run**: every failure between ingestion
//!   and the final commit aborts the run and is returned as
//!   `Err(OcrRunError)` from [`crate::orchestrator::RunOrchestrator::process`].
//!   No partially built run is ever committed.
//!
//! * [`BackendError`] is raised by a recognition backend (or its factory).
//!   The orchestrator wraps it into [`OcrRunError::RecognitionFailed`] or
//!   [`OcrRunError::BackendUnavailable`], adding the backend name and the
//!   variant label that was being recognised.
//!
//! * [`VariantError`] is raised by the [`crate::variants::VariantGenerator`].
//!   Wrapped into [`OcrRunError::VariantFailed`] with the page number.
//!
//! Callers that need to branch on the failure class use [`OcrRunError::kind`]
//! instead of matching every variant.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by a recognition run.
#[derive(Debug, Error)]
pub enum OcrRunError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The artifact's extension is neither an image nor a supported document.
    #[error(
        "Unsupported file type '{extension}' for '{filename}'\n\
Supported: .png .jpg .jpeg .tif .tiff .bmp .pdf .doc .docx"
    )]
    UnsupportedFormat { filename: String, extension: String },

    /// The input string is not a readable file path or a valid HTTP/HTTPS URL.
    #[error("Invalid input '{input}': {reason}")]
    InvalidInput { input: String, reason: String },

    /// Copying the artifact into run-scoped storage failed.
    #[error("Failed to ingest artifact into '{path}': {source}")]
    IngestFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// The external converter or rasteriser failed.
    #[error("Conversion failed for '{path}': {detail}")]
    ConversionFailed { path: PathBuf, detail: String },

    /// A page image could not be decoded.
    #[error("Failed to decode page image '{path}': {detail}")]
    ImageDecodeFailed { path: PathBuf, detail: String },

    // ── Processing errors ─────────────────────────────────────────────────
    /// Variant generation failed for a page.
    #[error("Variant generation failed for page {page}: {source}")]
    VariantFailed {
        page: usize,
        #[source]
        source: VariantError,
    },

    // ── Backend errors ────────────────────────────────────────────────────
    /// No backend is registered under the requested name.
    #[error("Unsupported OCR backend '{name}'. Available: {}", available.join(", "))]
    BackendNotFound { name: String, available: Vec<String> },

    /// The backend is registered but could not be constructed.
    #[error("OCR backend '{name}' could not be initialised: {detail}")]
    BackendUnavailable { name: String, detail: String },

    /// A backend `identify` call failed; the whole run is aborted.
    #[error("Backend '{backend}' failed on variant '{label}': {detail}")]
    RecognitionFailed {
        backend: String,
        label: String,
        detail: String,
    },

    /// A backend `identify` call exceeded the configured timeout.
    #[error("Backend '{backend}' timed out after {secs}s on variant '{label}'")]
    RecognitionTimeout {
        backend: String,
        label: String,
        secs: u64,
    },

    // ── Storage errors ────────────────────────────────────────────────────
    /// The run store rejected a read or the final commit.
    #[error("Run store error: {detail}")]
    StorageFailed { detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (e.g. a blocking task panicked).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an [`OcrRunError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    UnsupportedFormat,
    ConversionFailed,
    BackendNotFound,
    RecognitionFailed,
    StorageFailed,
    /// Variant generation failed.
    Processing,
    /// Ingestion or download failed.
    Input,
    Config,
    Internal,
}

impl OcrRunError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OcrRunError::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            OcrRunError::InvalidInput { .. }
            | OcrRunError::IngestFailed { .. }
            | OcrRunError::DownloadFailed { .. }
            | OcrRunError::DownloadTimeout { .. } => ErrorKind::Input,
            OcrRunError::ConversionFailed { .. } | OcrRunError::ImageDecodeFailed { .. } => {
                ErrorKind::ConversionFailed
            }
            OcrRunError::VariantFailed { .. } => ErrorKind::Processing,
            OcrRunError::BackendNotFound { .. } => ErrorKind::BackendNotFound,
            OcrRunError::BackendUnavailable { .. }
            | OcrRunError::RecognitionFailed { .. }
            | OcrRunError::RecognitionTimeout { .. } => ErrorKind::RecognitionFailed,
            OcrRunError::StorageFailed { .. } => ErrorKind::StorageFailed,
            OcrRunError::InvalidConfig(_) => ErrorKind::Config,
            OcrRunError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn storage(detail: impl std::fmt::Display) -> Self {
        OcrRunError::StorageFailed {
            detail: detail.to_string(),
        }
    }
}

/// An error raised by a recognition backend or its factory.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The engine binary, model or provider is not available.
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// The engine ran but reported a failure.
    #[error("engine error: {0}")]
    Engine(String),

    /// The backend cannot apply the requested reconfiguration.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),
}

/// An error raised while generating preprocessing variants.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VariantError {
    /// The source image has a zero dimension.
    #[error("source image is empty ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    /// A requested label names no stage of the pipeline.
    #[error("unknown variant '{label}' (pipeline stages: {})", known.join(", "))]
    UnknownLabel { label: String, known: Vec<String> },

    /// A stage transform failed; later stages were not executed.
    #[error("stage '{stage}' failed: {detail}")]
    StageFailed { stage: String, detail: String },
}
