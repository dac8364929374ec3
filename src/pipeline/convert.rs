//! Document conversion: word-processor formats → PDF.
//!
//! Conversion sits behind [`DocumentConverter`] so tests (and deployments
//! with a different office suite) can swap the implementation. The default
//! [`LibreOfficeConverter`] runs `libreoffice --headless --convert-to pdf`
//! and expects `<stem>.pdf` in the output directory afterwards.

use crate::error::OcrRunError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Converts a document into a paged (PDF) document.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Convert `input`, writing into `out_dir`; returns the produced PDF.
    async fn convert(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, OcrRunError>;
}

/// Headless LibreOffice conversion.
#[derive(Debug, Clone)]
pub struct LibreOfficeConverter {
    binary: PathBuf,
    timeout_secs: u64,
}

impl LibreOfficeConverter {
    pub fn new(binary: impl Into<PathBuf>, timeout_secs: u64) -> Self {
        Self {
            binary: binary.into(),
            timeout_secs,
        }
    }
}

impl Default for LibreOfficeConverter {
    fn default() -> Self {
        Self::new("libreoffice", 180)
    }
}

#[async_trait]
impl DocumentConverter for LibreOfficeConverter {
    async fn convert(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, OcrRunError> {
        let failed = |detail: String| OcrRunError::ConversionFailed {
            path: input.to_path_buf(),
            detail,
        };

        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| failed(format!("cannot create '{}': {e}", out_dir.display())))?;

        info!("Converting {} to PDF", input.display());
        let run = Command::new(&self.binary)
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg(input)
            .arg("--outdir")
            .arg(out_dir)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(Duration::from_secs(self.timeout_secs), run)
            .await
            .map_err(|_| failed(format!("converter timed out after {}s", self.timeout_secs)))?
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => failed(format!(
                    "'{}' not found; install LibreOffice or set --libreoffice-bin",
                    self.binary.display()
                )),
                _ => failed(e.to_string()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failed(format!(
                "converter exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let pdf = expected_output(input, out_dir);
        if !tokio::fs::try_exists(&pdf).await.unwrap_or(false) {
            return Err(failed(format!(
                "converter produced no output at '{}'",
                pdf.display()
            )));
        }

        debug!("Converted → {}", pdf.display());
        Ok(pdf)
    }
}

/// `<out_dir>/<input stem>.pdf`.
pub fn expected_output(input: &Path, out_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    out_dir.join(format!("{stem}.pdf"))
}
