//! Artifact ingestion: copy the caller's artifact into run-scoped storage.
//!
//! Every run owns a directory `<data_dir>/<token>/` where `token` is a fresh
//! UUID in simple (hex) form. The artifact lands in `original/`; later stages
//! write `converted/`, `pages/` and `preprocessed/` beside it, so two runs
//! never share a file even when they process the same input.
//!
//! Uploaded filenames are untrusted: only the final path component is kept
//! and every character outside `[A-Za-z0-9._-]` becomes `_`.

use crate::error::OcrRunError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Where the artifact comes from.
#[derive(Debug, Clone)]
pub enum ArtifactSource {
    /// A file on the local filesystem.
    File(PathBuf),
    /// An in-memory upload with its client-side filename.
    Bytes { filename: String, data: Vec<u8> },
    /// An HTTP or HTTPS URL to download.
    Url(String),
}

impl ArtifactSource {
    /// Interpret a CLI argument: URLs download, anything else is a path.
    pub fn parse(input: &str) -> Self {
        if is_url(input) {
            ArtifactSource::Url(input.to_string())
        } else {
            ArtifactSource::File(PathBuf::from(input))
        }
    }

    /// Filename the artifact will be stored under, before sanitising.
    pub fn display_name(&self) -> String {
        match self {
            ArtifactSource::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            ArtifactSource::Bytes { filename, .. } => filename.clone(),
            ArtifactSource::Url(url) => filename_from_url(url),
        }
    }
}

/// An artifact copied into its run directory.
#[derive(Debug, Clone)]
pub struct IngestedArtifact {
    /// Run token (UUID hex) naming the run directory.
    pub token: String,
    pub run_dir: PathBuf,
    /// `<run_dir>/original/<sanitised filename>`.
    pub original_path: PathBuf,
}

impl IngestedArtifact {
    pub fn converted_dir(&self) -> PathBuf {
        self.run_dir.join("converted")
    }

    pub fn pages_dir(&self) -> PathBuf {
        self.run_dir.join("pages")
    }

    pub fn variants_dir(&self) -> PathBuf {
        self.run_dir.join("preprocessed")
    }

    /// Extension of the stored artifact, lowercased (`""` when absent).
    pub fn extension(&self) -> String {
        extension_of(&self.original_path)
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Lowercased extension of `path`, or `""`.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]").expect("valid regex"));

/// Reduce an untrusted filename to a safe single path component.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned = UNSAFE_CHARS.replace_all(base, "_");
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "artifact".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Copy `source` into a fresh run directory under `data_dir`.
pub async fn ingest(
    source: &ArtifactSource,
    data_dir: &Path,
    download_timeout_secs: u64,
) -> Result<IngestedArtifact, OcrRunError> {
    if let ArtifactSource::File(path) = source {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| OcrRunError::InvalidInput {
                input: path.display().to_string(),
                reason: e.to_string(),
            })?;
        if !meta.is_file() {
            return Err(OcrRunError::InvalidInput {
                input: path.display().to_string(),
                reason: "not a regular file".to_string(),
            });
        }
    }

    let token = Uuid::new_v4().simple().to_string();
    let run_dir = data_dir.join(&token);
    let original_dir = run_dir.join("original");
    tokio::fs::create_dir_all(&original_dir)
        .await
        .map_err(|source| OcrRunError::IngestFailed {
            path: original_dir.clone(),
            source,
        })?;

    let original_path = original_dir.join(sanitize_filename(&source.display_name()));
    let write_err = |source: std::io::Error| OcrRunError::IngestFailed {
        path: original_path.clone(),
        source,
    };

    match source {
        ArtifactSource::File(path) => {
            tokio::fs::copy(path, &original_path)
                .await
                .map_err(write_err)?;
        }
        ArtifactSource::Bytes { data, .. } => {
            tokio::fs::write(&original_path, data)
                .await
                .map_err(write_err)?;
        }
        ArtifactSource::Url(url) => {
            let bytes = download(url, download_timeout_secs).await?;
            tokio::fs::write(&original_path, &bytes)
                .await
                .map_err(write_err)?;
        }
    }

    debug!("Ingested artifact → {}", original_path.display());
    Ok(IngestedArtifact {
        token,
        run_dir,
        original_path,
    })
}

async fn download(url: &str, timeout_secs: u64) -> Result<Vec<u8>, OcrRunError> {
    info!("Downloading artifact from: {}", url);

    let failed = |reason: String| OcrRunError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            OcrRunError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    Ok(bytes.to_vec())
}

fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/scan.png"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn sanitizes_untrusted_names() {
        assert_eq!(sanitize_filename("scan 01.png"), "scan_01.png");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\bad name!.pdf"), "bad_name_.pdf");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
        assert_eq!(sanitize_filename(""), "artifact");
    }

    #[test]
    fn url_filename_falls_back() {
        assert_eq!(filename_from_url("https://x.org/a/b/page.tiff"), "page.tiff");
        assert_eq!(filename_from_url("https://x.org/"), "downloaded");
    }

    #[tokio::test]
    async fn ingests_bytes_into_fresh_run_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let source = ArtifactSource::Bytes {
            filename: "my scan.PNG".into(),
            data: vec![1, 2, 3],
        };
        let a = ingest(&source, dir.path(), 5).await.unwrap();
        let b = ingest(&source, dir.path(), 5).await.unwrap();

        assert_ne!(a.token, b.token);
        assert_eq!(a.token.len(), 32);
        assert!(a.original_path.ends_with("original/my_scan.PNG"));
        assert_eq!(a.extension(), "png");
        assert_eq!(std::fs::read(&a.original_path).unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn missing_file_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let source = ArtifactSource::File(dir.path().join("nope.png"));
        let err = ingest(&source, dir.path(), 5).await.unwrap_err();
        assert!(matches!(err, OcrRunError::InvalidInput { .. }), "got: {err}");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
