//! Pipeline stages that turn a caller's artifact into page images.
//!
//! Each submodule implements exactly one step, so each is independently
//! testable and the external tools (pdfium, LibreOffice) sit behind traits
//! the orchestrator can swap.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ pages ──▶ convert ──▶ render
//! (ingest)  (classify) (doc→pdf)  (pdfium)
//! ```
//!
//! 1. [`input`]   copies the file, upload or URL into run-scoped storage
//! 2. [`pages`]   classifies by extension and resolves ordered page images
//! 3. [`convert`] turns `.doc`/`.docx` into PDF through LibreOffice
//! 4. [`render`]  rasterises PDF pages; runs in `spawn_blocking` because
//!    pdfium is not async-safe

pub mod convert;
pub mod input;
pub mod pages;
pub mod render;
