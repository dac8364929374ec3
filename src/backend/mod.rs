//! Pluggable recognition backends.
//!
//! A backend turns one image into text plus an optional confidence. The
//! orchestrator only ever talks to the [`RecognitionBackend`] trait, so
//! swapping an engine needs no orchestrator change.
//!
//! Optional behaviour is declared up front through [`BackendCapabilities`]
//! rather than discovered at runtime:
//!
//! * `preferred_variants`: the variant labels this engine should be fed;
//!   `None` means every generated variant.
//! * `configurable_language`: whether [`RecognitionBackend::set_language`]
//!   can switch language/model without reconstructing the backend.
//!
//! `identify` takes `&mut self`: engines commonly hold a loaded model that is
//! not safe to share, so the orchestrator keeps each instance behind a
//! [`tokio::sync::Mutex`] (see [`registry::ResolvedBackend`]).

pub mod registry;
pub mod tesseract;
pub mod vision;

use crate::error::BackendError;
use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

pub use registry::{BackendFactory, BackendRegistry, ResolvedBackend};
pub use tesseract::TesseractBackend;
pub use vision::{VisionBackend, VisionOptions};

/// The output of one `identify` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    /// Extracted text, trimmed. May be empty for blank pages.
    pub text: String,
    /// Backend-native confidence (e.g. 0–100 for Tesseract), if any.
    pub confidence: Option<f64>,
}

impl Recognition {
    pub fn new(text: impl Into<String>, confidence: Option<f64>) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// Optional capabilities a backend declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub preferred_variants: Option<Vec<String>>,
    pub configurable_language: bool,
}

/// A text-recognition engine.
#[async_trait]
pub trait RecognitionBackend: Send {
    /// Registry name of the engine (e.g. `"tesseract"`).
    fn name(&self) -> &str;

    /// Language/model currently in effect.
    fn language(&self) -> Option<&str>;

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }

    /// Switch language/model in place. `None` restores the backend default.
    fn set_language(&mut self, hint: Option<&str>) -> Result<(), BackendError> {
        let _ = hint;
        Err(BackendError::Unsupported(format!(
            "backend '{}' has a fixed language",
            self.name()
        )))
    }

    /// Recognise the text in `image`.
    async fn identify(&mut self, image: &DynamicImage) -> Result<Recognition, BackendError>;
}

/// Trim a caller-supplied hint; blank hints count as absent.
pub fn normalize_hint(hint: Option<&str>) -> Option<&str> {
    hint.map(str::trim).filter(|h| !h.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    #[async_trait]
    impl RecognitionBackend for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn language(&self) -> Option<&str> {
            None
        }
        async fn identify(&mut self, _image: &DynamicImage) -> Result<Recognition, BackendError> {
            Ok(Recognition::new("hello", Some(0.5)))
        }
    }

    #[test]
    fn hints_are_trimmed() {
        assert_eq!(normalize_hint(Some("  vie ")), Some("vie"));
        assert_eq!(normalize_hint(Some("   ")), None);
        assert_eq!(normalize_hint(Some("")), None);
        assert_eq!(normalize_hint(None), None);
    }

    #[test]
    fn default_capabilities_are_unrestricted() {
        let caps = Fixed.capabilities();
        assert!(caps.preferred_variants.is_none());
        assert!(!caps.configurable_language);
    }

    #[test]
    fn fixed_language_backends_refuse_reconfiguration() {
        let err = Fixed.set_language(Some("eng")).unwrap_err();
        assert!(matches!(err, BackendError::Unsupported(_)));
    }

    #[tokio::test]
    async fn identify_through_trait_object() {
        let mut backend: Box<dyn RecognitionBackend> = Box::new(Fixed);
        let image = DynamicImage::new_luma8(2, 2);
        let out = backend.identify(&image).await.unwrap();
        assert_eq!(out.text, "hello");
        assert_eq!(out.confidence, Some(0.5));
    }
}
