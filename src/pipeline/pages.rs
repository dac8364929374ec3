//! Page resolution: classify the artifact and turn it into page images.
//!
//! ```text
//! Image               ──────────────────────────────▶ [itself]
//! PagedDocument       ──▶ Rasterizer ───────────────▶ pages/page_001.png …
//! ConvertibleDocument ──▶ DocumentConverter ──▶ PDF ──▶ Rasterizer ──▶ …
//! ```
//!
//! Classification is by (case-insensitive) extension only. Anything else
//! is rejected with [`OcrRunError::UnsupportedFormat`] before any
//! conversion work starts.

use super::convert::DocumentConverter;
use super::input::IngestedArtifact;
use super::render::Rasterizer;
use crate::error::OcrRunError;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "bmp"];
pub const PAGED_EXTENSIONS: &[&str] = &["pdf"];
pub const CONVERTIBLE_EXTENSIONS: &[&str] = &["doc", "docx"];

/// How an artifact becomes pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    /// A single raster image; it is its own (only) page.
    Image,
    /// A paginated document rasterised directly.
    PagedDocument,
    /// A document converted to a paged document first.
    ConvertibleDocument,
}

impl ArtifactFormat {
    /// Classify by lowercased extension (without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(ArtifactFormat::Image)
        } else if PAGED_EXTENSIONS.contains(&ext.as_str()) {
            Some(ArtifactFormat::PagedDocument)
        } else if CONVERTIBLE_EXTENSIONS.contains(&ext.as_str()) {
            Some(ArtifactFormat::ConvertibleDocument)
        } else {
            None
        }
    }

    /// Classify `path`, or fail with `UnsupportedFormat`.
    pub fn classify(path: &Path) -> Result<Self, OcrRunError> {
        let extension = super::input::extension_of(path);
        Self::from_extension(&extension).ok_or_else(|| OcrRunError::UnsupportedFormat {
            filename: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            extension: if extension.is_empty() {
                "(none)".to_string()
            } else {
                format!(".{extension}")
            },
        })
    }
}

/// Page images resolved for one artifact.
#[derive(Debug, Clone)]
pub struct ResolvedPages {
    pub format: ArtifactFormat,
    /// The paged document that was rasterised: the converter's output, or
    /// the artifact itself for a PDF. `None` for images.
    pub paged_document: Option<PathBuf>,
    /// Page image files in page order.
    pub pages: Vec<PathBuf>,
}

/// Turn the ingested artifact into ordered page image files.
pub async fn resolve_pages(
    artifact: &IngestedArtifact,
    converter: &dyn DocumentConverter,
    rasterizer: &dyn Rasterizer,
) -> Result<ResolvedPages, OcrRunError> {
    let format = ArtifactFormat::classify(&artifact.original_path)?;
    debug!("Artifact classified as {:?}", format);

    let (paged_document, pages) = match format {
        ArtifactFormat::Image => (None, vec![artifact.original_path.clone()]),
        ArtifactFormat::PagedDocument => {
            let pages = rasterizer
                .rasterize(&artifact.original_path, &artifact.pages_dir())
                .await?;
            (Some(artifact.original_path.clone()), pages)
        }
        ArtifactFormat::ConvertibleDocument => {
            let pdf = converter
                .convert(&artifact.original_path, &artifact.converted_dir())
                .await?;
            let pages = rasterizer.rasterize(&pdf, &artifact.pages_dir()).await?;
            (Some(pdf), pages)
        }
    };

    if pages.is_empty() {
        return Err(OcrRunError::ConversionFailed {
            path: paged_document
                .clone()
                .unwrap_or_else(|| artifact.original_path.clone()),
            detail: "document has no pages".to_string(),
        });
    }

    info!("Resolved {} page(s) ({:?})", pages.len(), format);
    Ok(ResolvedPages {
        format,
        paged_document,
        pages,
    })
}

/// Decode a page image and normalise it to RGB8.
pub fn load_page(path: &Path) -> Result<DynamicImage, OcrRunError> {
    let img = image::open(path).map_err(|e| OcrRunError::ImageDecodeFailed {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    Ok(DynamicImage::ImageRgb8(img.to_rgb8()))
}

/// Decode a saved variant as stored, keeping its colour type.
pub fn load_variant(path: &Path) -> Result<DynamicImage, OcrRunError> {
    image::open(path).map_err(|e| OcrRunError::ImageDecodeFailed {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

/// File name of the n-th (1-based) rendered page.
pub fn page_file_name(page_number: usize) -> String {
    format!("page_{page_number:03}.png")
}
