//! Configuration types for recognition runs.
//!
//! All run behaviour is controlled through [`RunnerConfig`], built via its
//! [`RunnerConfigBuilder`]. Backend-specific settings (default languages,
//! vision provider) live with the backend factories registered in
//! [`crate::backend::BackendRegistry`], not here.

use crate::error::OcrRunError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the run orchestrator.
///
/// # Example
/// ```rust
/// use edgequake_ocr::RunnerConfig;
///
/// let config = RunnerConfig::builder()
///     .data_dir("/var/lib/ocr")
///     .dpi(200)
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 200);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Root directory under which every run gets its own `<token>/` directory.
    /// Default: `storage`.
    pub data_dir: PathBuf,

    /// Rasterisation resolution for paged documents. Range: 72–600. Default: 300.
    ///
    /// OCR engines are trained on ~300 DPI scans; lower values lose
    /// diacritics and small print.
    pub dpi: u32,

    /// Safety cap on the longest edge of a rasterised page, in pixels. Default: 5000.
    ///
    /// An A0 poster at 300 DPI would otherwise allocate a 10 000 × 14 000 px
    /// bitmap.
    pub max_rendered_pixels: u32,

    /// Number of pages whose variants may be generated concurrently. Default: 4.
    ///
    /// Only image transforms run in parallel; recognition calls against the
    /// run's backend instance are always serialised.
    pub variant_concurrency: usize,

    /// Per-`identify` timeout in seconds. `0` disables the timeout. Default: 300.
    pub recognition_timeout_secs: u64,

    /// Timeout for the external document converter in seconds. Default: 180.
    pub conversion_timeout_secs: u64,

    /// Download timeout for URL artifacts in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// LibreOffice executable used to convert `.doc`/`.docx` to PDF.
    pub libreoffice_bin: PathBuf,

    /// The pdfium shared library, or the directory containing it. `None`
    /// binds to the system library.
    pub pdfium_lib_path: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("storage"),
            dpi: 300,
            max_rendered_pixels: 5000,
            variant_concurrency: 4,
            recognition_timeout_secs: 300,
            conversion_timeout_secs: 180,
            download_timeout_secs: 120,
            libreoffice_bin: PathBuf::from("libreoffice"),
            pdfium_lib_path: None,
        }
    }
}

impl RunnerConfig {
    /// Create a new builder for `RunnerConfig`.
    pub fn builder() -> RunnerConfigBuilder {
        RunnerConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`RunnerConfig`].
#[derive(Debug)]
pub struct RunnerConfigBuilder {
    config: RunnerConfig,
}

impl RunnerConfigBuilder {
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn variant_concurrency(mut self, n: usize) -> Self {
        self.config.variant_concurrency = n;
        self
    }

    pub fn recognition_timeout_secs(mut self, secs: u64) -> Self {
        self.config.recognition_timeout_secs = secs;
        self
    }

    pub fn conversion_timeout_secs(mut self, secs: u64) -> Self {
        self.config.conversion_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn libreoffice_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.config.libreoffice_bin = bin.into();
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RunnerConfig, OcrRunError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(OcrRunError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.variant_concurrency == 0 {
            return Err(OcrRunError::InvalidConfig(
                "Variant concurrency must be ≥ 1".into(),
            ));
        }
        if c.data_dir.as_os_str().is_empty() {
            return Err(OcrRunError::InvalidConfig(
                "Data directory must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RunnerConfig::builder().build().expect("defaults build");
        assert_eq!(config.dpi, 300);
        assert_eq!(config.variant_concurrency, 4);
        assert_eq!(config.data_dir, PathBuf::from("storage"));
        assert!(config.pdfium_lib_path.is_none());
    }

    #[test]
    fn rejects_out_of_range_dpi() {
        let err = RunnerConfig::builder().dpi(1200).build().unwrap_err();
        assert!(err.to_string().contains("1200"), "got: {err}");
    }

    #[test]
    fn rejects_zero_concurrency() {
        assert!(RunnerConfig::builder()
            .variant_concurrency(0)
            .build()
            .is_err());
    }

    #[test]
    fn max_rendered_pixels_has_a_floor() {
        let config = RunnerConfig::builder()
            .max_rendered_pixels(10)
            .build()
            .unwrap();
        assert_eq!(config.max_rendered_pixels, 100);
    }
}
