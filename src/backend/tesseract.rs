//! Tesseract backend: drives the `tesseract` CLI with TSV output.
//!
//! One invocation yields both the text and per-word confidences: words are
//! re-joined line by line from the TSV rows, and the page confidence is the
//! mean of the word confidences Tesseract reports (0–100; `-1` rows are
//! structural and skipped).

use super::{normalize_hint, BackendCapabilities, Recognition, RecognitionBackend};
use crate::error::BackendError;
use async_trait::async_trait;
use image::DynamicImage;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

/// Default Tesseract language set: Vietnamese with English fallback.
pub const DEFAULT_LANGUAGE: &str = "vie+eng";

/// Recognition through the Tesseract command-line tool.
#[derive(Debug, Clone)]
pub struct TesseractBackend {
    binary: PathBuf,
    default_language: String,
    language: String,
}

impl TesseractBackend {
    /// Backend using `binary`, with `default_language` applied when no hint is given.
    pub fn new(binary: impl Into<PathBuf>, default_language: impl Into<String>) -> Self {
        let default_language = default_language.into();
        Self {
            binary: binary.into(),
            language: default_language.clone(),
            default_language,
        }
    }

    /// Backend with the given hint applied over `default_language`.
    pub fn with_hint(
        binary: impl Into<PathBuf>,
        default_language: impl Into<String>,
        hint: Option<&str>,
    ) -> Self {
        let mut backend = Self::new(binary, default_language);
        backend.apply_hint(hint);
        backend
    }

    fn apply_hint(&mut self, hint: Option<&str>) {
        self.language = normalize_hint(hint)
            .unwrap_or(&self.default_language)
            .to_string();
    }
}

impl Default for TesseractBackend {
    fn default() -> Self {
        Self::new("tesseract", DEFAULT_LANGUAGE)
    }
}

#[async_trait]
impl RecognitionBackend for TesseractBackend {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn language(&self) -> Option<&str> {
        Some(&self.language)
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            preferred_variants: None,
            configurable_language: true,
        }
    }

    fn set_language(&mut self, hint: Option<&str>) -> Result<(), BackendError> {
        self.apply_hint(hint);
        Ok(())
    }

    async fn identify(&mut self, image: &DynamicImage) -> Result<Recognition, BackendError> {
        let input = tempfile::Builder::new()
            .prefix("ocr-variant-")
            .suffix(".png")
            .tempfile()?;
        let png = image.clone();
        let path = input.path().to_path_buf();
        tokio::task::spawn_blocking(move || png.save_with_format(&path, image::ImageFormat::Png))
            .await
            .map_err(|e| BackendError::Engine(format!("encode task panicked: {e}")))??;

        let output = Command::new(&self.binary)
            .arg(input.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .arg("tsv")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => BackendError::Unavailable(format!(
                    "'{}' not found; install tesseract-ocr or set --tesseract-bin",
                    self.binary.display()
                )),
                _ => BackendError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::Engine(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        let recognition = parse_tsv(&tsv);
        debug!(
            "tesseract[{}]: {} chars, confidence {:?}",
            self.language,
            recognition.text.len(),
            recognition.confidence
        );
        Ok(recognition)
    }
}

/// Rebuild text and mean word confidence from Tesseract TSV output.
pub fn parse_tsv(tsv: &str) -> Recognition {
    let mut lines: Vec<String> = Vec::new();
    let mut current_key: Option<(&str, &str, &str, &str)> = None;
    let mut confidences: Vec<f64> = Vec::new();

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let word = cols[11].trim();
        if word.is_empty() {
            continue;
        }
        if let Ok(conf) = cols[10].trim().parse::<f64>() {
            if conf >= 0.0 {
                confidences.push(conf);
            }
        }

        let key = (cols[1], cols[2], cols[3], cols[4]);
        match lines.last_mut() {
            Some(line) if current_key == Some(key) => {
                line.push(' ');
                line.push_str(word);
            }
            _ => {
                lines.push(word.to_string());
                current_key = Some(key);
            }
        }
    }

    let confidence = if confidences.is_empty() {
        None
    } else {
        Some(confidences.iter().sum::<f64>() / confidences.len() as f64)
    };

    Recognition {
        text: lines.join("\n").trim().to_string(),
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    #[test]
    fn parses_words_into_lines() {
        let tsv = format!(
            "{HEADER}\n\
1\t1\t0\t0\t0\t0\t0\t0\t100\t100\t-1\t\n\
4\t1\t1\t1\t1\t0\t0\t0\t100\t10\t-1\t\n\
5\t1\t1\t1\t1\t1\t0\t0\t10\t10\t90.5\tXin\n\
5\t1\t1\t1\t1\t2\t12\t0\t10\t10\t89.5\tchào\n\
5\t1\t1\t1\t2\t1\t0\t12\t10\t10\t80\tthế\n\
5\t1\t1\t1\t2\t2\t12\t12\t10\t10\t-1\t \n\
5\t1\t1\t1\t2\t3\t24\t12\t10\t10\t60\tgiới\n"
        );
        let out = parse_tsv(&tsv);
        assert_eq!(out.text, "Xin chào\nthế giới");
        assert_eq!(out.confidence, Some(80.0));
    }

    #[test]
    fn blank_page_has_no_confidence() {
        let tsv = format!("{HEADER}\n1\t1\t0\t0\t0\t0\t0\t0\t100\t100\t-1\t\n");
        let out = parse_tsv(&tsv);
        assert_eq!(out.text, "");
        assert_eq!(out.confidence, None);
    }

    #[test]
    fn hint_overrides_default_language() {
        let backend = TesseractBackend::with_hint("tesseract", DEFAULT_LANGUAGE, Some(" eng "));
        assert_eq!(backend.language(), Some("eng"));
        let backend = TesseractBackend::with_hint("tesseract", DEFAULT_LANGUAGE, Some(""));
        assert_eq!(backend.language(), Some(DEFAULT_LANGUAGE));
    }

    #[test]
    fn set_language_none_restores_default() {
        let mut backend = TesseractBackend::with_hint("tesseract", "eng", Some("deu"));
        backend.set_language(None).unwrap();
        assert_eq!(backend.language(), Some("eng"));
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let mut backend = TesseractBackend::new("/nonexistent/tesseract-binary", "eng");
        let err = backend
            .identify(&DynamicImage::new_luma8(4, 4))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)), "got: {err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancelled_identify_kills_the_engine() {
        use std::os::unix::fs::PermissionsExt;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let script = dir.path().join("slow-tesseract");
        std::fs::write(
            &script,
            format!("#!/bin/sh\nsleep 1\ntouch '{}'\n", marker.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut backend = TesseractBackend::new(&script, "eng");
        let image = DynamicImage::new_luma8(4, 4);
        let outcome =
            tokio::time::timeout(Duration::from_millis(300), backend.identify(&image)).await;
        assert!(outcome.is_err(), "identify should have timed out");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "engine kept running after cancellation");
    }
}
