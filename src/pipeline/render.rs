//! PDF rasterisation: render every page to `pages/page_NNN.png` via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! Binding, rendering and PNG encoding all happen on one blocking-pool
//! thread; only the resulting file paths cross back to the async side.
//!
//! ## DPI and the pixel cap
//!
//! Pages render at `dpi / 72` (PDF points are 1/72 in). `max_rendered_pixels`
//! caps the longest edge on top of that so an A0 poster cannot produce a
//! 10,000+ px bitmap.

use super::pages::page_file_name;
use crate::error::OcrRunError;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Renders a paged document to one image file per page.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Render all pages of `document` into `out_dir`, returning the page
    /// image paths in page order.
    async fn rasterize(&self, document: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, OcrRunError>;
}

/// pdfium-backed rasteriser.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    dpi: u32,
    max_rendered_pixels: u32,
    /// Library file or directory containing it; `None` → system library.
    library_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn new(dpi: u32, max_rendered_pixels: u32, library_path: Option<PathBuf>) -> Self {
        Self {
            dpi,
            max_rendered_pixels,
            library_path,
        }
    }
}

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    async fn rasterize(&self, document: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, OcrRunError> {
        let this = self.clone();
        let document = document.to_path_buf();
        let out_dir = out_dir.to_path_buf();

        tokio::task::spawn_blocking(move || this.rasterize_blocking(&document, &out_dir))
            .await
            .map_err(|e| OcrRunError::Internal(format!("Render task panicked: {}", e)))?
    }
}

impl PdfiumRasterizer {
    fn bind(&self, document: &Path) -> Result<Pdfium, OcrRunError> {
        let bindings = match &self.library_path {
            Some(path) if path.is_dir() => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(path))
            }
            Some(path) => Pdfium::bind_to_library(path),
            None => Pdfium::bind_to_system_library(),
        };
        bindings
            .map(Pdfium::new)
            .map_err(|e| OcrRunError::ConversionFailed {
                path: document.to_path_buf(),
                detail: format!(
                    "pdfium library unavailable ({e}); set PDFIUM_LIB_PATH or --pdfium-lib"
                ),
            })
    }

    fn rasterize_blocking(&self, document: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, OcrRunError> {
        let failed = |detail: String| OcrRunError::ConversionFailed {
            path: document.to_path_buf(),
            detail,
        };

        let pdfium = self.bind(document)?;
        let pdf = pdfium
            .load_pdf_from_file(document, None)
            .map_err(|e| failed(format!("cannot open document: {:?}", e)))?;

        std::fs::create_dir_all(out_dir)
            .map_err(|e| failed(format!("cannot create '{}': {e}", out_dir.display())))?;

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(self.dpi as f32 / 72.0)
            .set_maximum_width(self.max_rendered_pixels as i32)
            .set_maximum_height(self.max_rendered_pixels as i32);

        let pages = pdf.pages();
        info!("Document loaded: {} pages", pages.len());

        let mut paths = Vec::with_capacity(pages.len() as usize);
        for (idx, page) in pages.iter().enumerate() {
            let page_number = idx + 1;
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| failed(format!("page {page_number}: {:?}", e)))?;

            let image = bitmap.as_image();
            let path = out_dir.join(page_file_name(page_number));
            image
                .save_with_format(&path, image::ImageFormat::Png)
                .map_err(|e| failed(format!("page {page_number}: {e}")))?;
            debug!(
                "Rendered page {} → {}x{} px",
                page_number,
                image.width(),
                image.height()
            );
            paths.push(path);
        }

        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn missing_library_is_conversion_failure() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("doc.pdf");
        std::fs::write(&pdf, b"%PDF-1.4\n").unwrap();
        let rasterizer = PdfiumRasterizer::new(300, 5000, Some(dir.path().join("no-such-lib.so")));
        let err = rasterizer
            .rasterize(&pdf, &dir.path().join("pages"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConversionFailed);
    }
}
