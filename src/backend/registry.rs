//! Name → factory lookup for recognition backends.
//!
//! The registry is built once at startup and handed to the orchestrator;
//! it is read-only afterwards, so lookups need no locking. Each
//! [`BackendRegistry::resolve`] call constructs a fresh backend instance for
//! one run, which is what makes the run's language immutable: no other run
//! can reconfigure it. Factories that wrap expensive state (a loaded model,
//! an HTTP client) share it between instances by capturing an `Arc`.

use super::{normalize_hint, RecognitionBackend};
use crate::error::{BackendError, OcrRunError};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Builds a backend, given the trimmed caller hint (`None` → backend default).
pub type BackendFactory =
    Arc<dyn Fn(Option<&str>) -> Result<Box<dyn RecognitionBackend>, BackendError> + Send + Sync>;

/// Registered backend factories in registration order.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: Vec<(String, BackendFactory)>,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.names())
            .finish()
    }
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`, replacing any previous registration.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(Option<&str>) -> Result<Box<dyn RecognitionBackend>, BackendError>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        let factory: BackendFactory = Arc::new(factory);
        match self.factories.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = factory,
            None => self.factories.push((name, factory)),
        }
        self
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.factories.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.iter().any(|(n, _)| n == name)
    }

    /// Construct the backend registered as `name` for one run.
    ///
    /// A hint that is blank after trimming is ignored and the backend's own
    /// default applies. The language and preferred variants are captured
    /// here and stay fixed for the run.
    pub fn resolve(
        &self,
        name: &str,
        language_hint: Option<&str>,
    ) -> Result<ResolvedBackend, OcrRunError> {
        let (_, factory) = self
            .factories
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| OcrRunError::BackendNotFound {
                name: name.to_string(),
                available: self.names(),
            })?;

        let hint = normalize_hint(language_hint);
        let unavailable = |e: BackendError| OcrRunError::BackendUnavailable {
            name: name.to_string(),
            detail: e.to_string(),
        };

        let mut backend = factory(hint).map_err(unavailable)?;
        let capabilities = backend.capabilities();
        if capabilities.configurable_language {
            if let Some(hint) = hint {
                if backend.language() != Some(hint) {
                    backend.set_language(Some(hint)).map_err(unavailable)?;
                }
            }
        }

        let language = backend.language().map(str::to_string);
        debug!(
            "Resolved backend '{}' (language: {:?}, preferred variants: {:?})",
            name, language, capabilities.preferred_variants
        );

        Ok(ResolvedBackend {
            name: name.to_string(),
            language,
            preferred_variants: capabilities.preferred_variants,
            instance: Arc::new(Mutex::new(backend)),
        })
    }
}

/// A backend instance bound to one run.
#[derive(Clone)]
pub struct ResolvedBackend {
    pub name: String,
    pub language: Option<String>,
    pub preferred_variants: Option<Vec<String>>,
    /// Calls against the instance are serialised through this lock.
    pub instance: Arc<Mutex<Box<dyn RecognitionBackend>>>,
}

impl fmt::Debug for ResolvedBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedBackend")
            .field("name", &self.name)
            .field("language", &self.language)
            .field("preferred_variants", &self.preferred_variants)
            .finish()
    }
}
