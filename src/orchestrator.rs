//! The recognition run: artifact in, committed run tree out.
//!
//! ## State machine
//!
//! ```text
//! Created ─▶ Ingested ─▶ PagesResolved ─▶ VariantsGenerated ─▶ Recognized
//!                                                                  │
//!                        Persisted ◀── Summarized ◀────────────────┘
//!
//! any state before Persisted ──(error)──▶ Aborted
//! ```
//!
//! Everything up to `Summarized` is built in memory as a [`RunDraft`]; the
//! only database write is the single [`RunStore::commit`] that moves the run
//! to `Persisted`. An aborted run therefore never appears in the store. Files
//! already written under its run directory stay where they are for
//! inspection.
//!
//! ## Concurrency
//!
//! Variant generation is pure CPU work and runs on the blocking pool, up to
//! `variant_concurrency` pages at a time, with results kept in page order.
//! Recognition is sequential: every `identify` call goes through the
//! backend's mutex, one variant after another in generation order.

use crate::backend::{BackendRegistry, Recognition, ResolvedBackend};
use crate::config::RunnerConfig;
use crate::error::OcrRunError;
use crate::model::{ImageDraft, ImageKind, ResultDraft, Run, RunDraft};
use crate::pipeline::convert::{DocumentConverter, LibreOfficeConverter};
use crate::pipeline::input::{self, ArtifactSource, IngestedArtifact};
use crate::pipeline::pages::{self, ResolvedPages};
use crate::pipeline::render::{PdfiumRasterizer, Rasterizer};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::select::select_best;
use crate::store::RunStore;
use crate::variants::VariantGenerator;
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Created,
    Ingested,
    PagesResolved,
    VariantsGenerated,
    Recognized,
    Summarized,
    Persisted,
    Aborted,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Created => "created",
            RunState::Ingested => "ingested",
            RunState::PagesResolved => "pages_resolved",
            RunState::VariantsGenerated => "variants_generated",
            RunState::Recognized => "recognized",
            RunState::Summarized => "summarized",
            RunState::Persisted => "persisted",
            RunState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Persisted | RunState::Aborted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label of the n-th (1-based) source page.
pub fn page_label(page_number: usize) -> String {
    format!("page_{page_number}")
}

/// Label of a variant: the page label, then the stage label.
pub fn variant_label(page_number: usize, stage: &str) -> String {
    format!("{}_{stage}", page_label(page_number))
}

/// Drives runs from artifact to committed tree.
pub struct RunOrchestrator {
    config: RunnerConfig,
    registry: BackendRegistry,
    store: Arc<dyn RunStore>,
    converter: Arc<dyn DocumentConverter>,
    rasterizer: Arc<dyn Rasterizer>,
    generator: Arc<VariantGenerator>,
    progress: ProgressCallback,
}

impl fmt::Debug for RunOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOrchestrator")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("generator", &self.generator)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RunOrchestrator`].
///
/// Only the store is required. The converter and rasteriser default to
/// LibreOffice and pdfium configured from the [`RunnerConfig`]; the
/// generator defaults to [`VariantGenerator::standard`].
pub struct RunOrchestratorBuilder {
    config: RunnerConfig,
    registry: BackendRegistry,
    store: Option<Arc<dyn RunStore>>,
    converter: Option<Arc<dyn DocumentConverter>>,
    rasterizer: Option<Arc<dyn Rasterizer>>,
    generator: Option<Arc<VariantGenerator>>,
    progress: Option<ProgressCallback>,
}

impl RunOrchestratorBuilder {
    pub fn registry(mut self, registry: BackendRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn converter(mut self, converter: Arc<dyn DocumentConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    pub fn rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    pub fn generator(mut self, generator: VariantGenerator) -> Self {
        self.generator = Some(Arc::new(generator));
        self
    }

    pub fn progress_callback(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn build(self) -> Result<RunOrchestrator, OcrRunError> {
        let store = self
            .store
            .ok_or_else(|| OcrRunError::InvalidConfig("a run store is required".to_string()))?;
        let config = self.config;
        let converter = self.converter.unwrap_or_else(|| {
            Arc::new(LibreOfficeConverter::new(
                config.libreoffice_bin.clone(),
                config.conversion_timeout_secs,
            ))
        });
        let rasterizer = self.rasterizer.unwrap_or_else(|| {
            Arc::new(PdfiumRasterizer::new(
                config.dpi,
                config.max_rendered_pixels,
                config.pdfium_lib_path.clone(),
            ))
        });
        Ok(RunOrchestrator {
            registry: self.registry,
            store,
            converter,
            rasterizer,
            generator: self
                .generator
                .unwrap_or_else(|| Arc::new(VariantGenerator::standard())),
            progress: self
                .progress
                .unwrap_or_else(|| Arc::new(NoopProgressCallback)),
            config,
        })
    }
}

/// Variants generated and saved for one page.
struct PageVariants {
    page_number: usize,
    source_path: PathBuf,
    variants: Vec<SavedVariant>,
}

/// A variant written to disk. Pixels are reloaded only when recognised.
struct SavedVariant {
    label: String,
    path: PathBuf,
}

/// Tracks the current state and reports every transition.
struct Lifecycle {
    state: RunState,
    progress: ProgressCallback,
}

impl Lifecycle {
    fn start(progress: ProgressCallback) -> Self {
        progress.on_state(RunState::Created);
        Self {
            state: RunState::Created,
            progress,
        }
    }

    fn advance(&mut self, next: RunState) {
        debug!("Run state: {} → {}", self.state, next);
        self.state = next;
        self.progress.on_state(next);
    }
}

impl RunOrchestrator {
    pub fn builder(config: RunnerConfig) -> RunOrchestratorBuilder {
        RunOrchestratorBuilder {
            config,
            registry: BackendRegistry::new(),
            store: None,
            converter: None,
            rasterizer: None,
            generator: None,
            progress: None,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Run `source` through the named backend and commit the result tree.
    ///
    /// A blank or absent `language` leaves the backend's default in place.
    ///
    /// # Errors
    /// Any failure aborts the run: nothing is committed and the originating
    /// error is returned. The backend is resolved before ingestion, so an
    /// unknown name leaves no files behind either.
    pub async fn process(
        &self,
        source: ArtifactSource,
        backend: &str,
        language: Option<&str>,
    ) -> Result<Run, OcrRunError> {
        let started = Instant::now();
        let mut lifecycle = Lifecycle::start(Arc::clone(&self.progress));
        info!(
            "Starting run: {} (backend: {})",
            source.display_name(),
            backend
        );

        match self.execute(&source, backend, language, &mut lifecycle).await {
            Ok(run) => {
                info!(
                    "Run {} persisted in {}ms: {} images, {} results, summary confidence {}",
                    run.id,
                    started.elapsed().as_millis(),
                    run.images.len(),
                    run.text_results.len(),
                    run.summary_confidence_display()
                        .unwrap_or_else(|| "n/a".to_string())
                );
                self.progress.on_run_complete(
                    run.id,
                    run.summary_text.as_deref().map_or(0, str::len),
                );
                Ok(run)
            }
            Err(e) => {
                let last_state = lifecycle.state;
                warn!("Run aborted after state '{}': {}", last_state, e);
                lifecycle.advance(RunState::Aborted);
                self.progress.on_run_aborted(last_state, &e.to_string());
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        source: &ArtifactSource,
        backend_name: &str,
        language: Option<&str>,
        lifecycle: &mut Lifecycle,
    ) -> Result<Run, OcrRunError> {
        // ── Step 1: Resolve backend (language fixed for the run) ─────────
        let backend = self.registry.resolve(backend_name, language)?;

        // ── Step 2: Ingest ───────────────────────────────────────────────
        let artifact = input::ingest(
            source,
            &self.config.data_dir,
            self.config.download_timeout_secs,
        )
        .await?;
        info!("Run token {}", artifact.token);
        lifecycle.advance(RunState::Ingested);

        // ── Step 3: Resolve pages ────────────────────────────────────────
        let resolved =
            pages::resolve_pages(&artifact, &*self.converter, &*self.rasterizer).await?;
        let variants_per_page = self
            .generator
            .emitted_labels(backend.preferred_variants.as_deref())
            .map_err(|source| OcrRunError::VariantFailed { page: 1, source })?
            .len();
        self.progress
            .on_pages_resolved(resolved.pages.len(), variants_per_page);
        lifecycle.advance(RunState::PagesResolved);

        // ── Step 4: Generate variants ────────────────────────────────────
        let generated = self.generate_variants(&artifact, &resolved, &backend).await?;
        let (images, pending) = plan_images(generated);
        lifecycle.advance(RunState::VariantsGenerated);

        // ── Step 5: Recognise every variant ──────────────────────────────
        let total = pending.len();
        let mut results = Vec::with_capacity(total);
        for (done, (image_idx, label, path)) in pending.into_iter().enumerate() {
            let image = tokio::task::spawn_blocking(move || pages::load_variant(&path))
                .await
                .map_err(|e| OcrRunError::Internal(format!("Variant load panicked: {}", e)))??;
            let recognition = self.recognize(&backend, &label, &image).await?;
            debug!(
                "{}: {} chars, confidence {:?}",
                label,
                recognition.text.chars().count(),
                recognition.confidence
            );
            let confidence = recognition.confidence.filter(|c| c.is_finite());
            if confidence.is_none() && recognition.confidence.is_some() {
                warn!("{}: dropping non-finite confidence", label);
            }
            self.progress
                .on_variant_recognized(done + 1, total, &label, confidence);
            results.push(ResultDraft {
                image: image_idx,
                variant_label: label,
                text: recognition.text,
                confidence,
            });
        }
        lifecycle.advance(RunState::Recognized);

        // ── Step 6: Summarise ────────────────────────────────────────────
        let best = select_best(&results);
        let summary_text = best.map(|r| r.text.clone());
        let summary_confidence = best.and_then(|r| r.confidence);
        if let Some(best) = best {
            debug!("Best result: {}", best.variant_label);
        }
        lifecycle.advance(RunState::Summarized);

        // ── Step 7: Commit the whole tree ────────────────────────────────
        let draft = RunDraft {
            token: artifact.token,
            created_at: Utc::now(),
            backend: backend.name.clone(),
            language: backend.language.clone(),
            original_path: artifact.original_path,
            converted_path: resolved.paged_document,
            summary_text,
            summary_confidence,
            images,
            results,
        };
        let run = self.store.commit(draft).await?;
        lifecycle.advance(RunState::Persisted);
        Ok(run)
    }

    /// Generate and save the variants of every page, in page order.
    async fn generate_variants(
        &self,
        artifact: &IngestedArtifact,
        resolved: &ResolvedPages,
        backend: &ResolvedBackend,
    ) -> Result<Vec<PageVariants>, OcrRunError> {
        let out_dir = artifact.variants_dir();
        tokio::fs::create_dir_all(&out_dir).await.map_err(|e| {
            OcrRunError::Internal(format!("cannot create '{}': {e}", out_dir.display()))
        })?;

        stream::iter(resolved.pages.iter().cloned().enumerate())
            .map(|(idx, source_path)| {
                let generator = Arc::clone(&self.generator);
                let allowed = backend.preferred_variants.clone();
                let out_dir = out_dir.clone();
                async move {
                    tokio::task::spawn_blocking(move || {
                        generate_page(
                            &generator,
                            idx + 1,
                            source_path,
                            allowed.as_deref(),
                            &out_dir,
                        )
                    })
                    .await
                    .map_err(|e| OcrRunError::Internal(format!("Variant task panicked: {}", e)))?
                }
            })
            .buffered(self.config.variant_concurrency)
            .try_collect()
            .await
    }

    async fn recognize(
        &self,
        backend: &ResolvedBackend,
        label: &str,
        image: &DynamicImage,
    ) -> Result<Recognition, OcrRunError> {
        let mut instance = backend.instance.lock().await;
        let call = instance.identify(image);
        let outcome = match self.config.recognition_timeout_secs {
            0 => call.await,
            secs => tokio::time::timeout(Duration::from_secs(secs), call)
                .await
                .map_err(|_| OcrRunError::RecognitionTimeout {
                    backend: backend.name.clone(),
                    label: label.to_string(),
                    secs,
                })?,
        };
        outcome.map_err(|e| OcrRunError::RecognitionFailed {
            backend: backend.name.clone(),
            label: label.to_string(),
            detail: e.to_string(),
        })
    }
}

/// Load one page, run the generator and write each variant as PNG.
fn generate_page(
    generator: &VariantGenerator,
    page_number: usize,
    source_path: PathBuf,
    allowed: Option<&[String]>,
    out_dir: &Path,
) -> Result<PageVariants, OcrRunError> {
    let page = pages::load_page(&source_path)?;
    let generated = generator
        .generate(&page, allowed)
        .map_err(|source| OcrRunError::VariantFailed {
            page: page_number,
            source,
        })?;

    let mut variants = Vec::with_capacity(generated.len());
    for variant in generated {
        let label = variant_label(page_number, &variant.label);
        let path = out_dir.join(format!("{label}.png"));
        variant
            .image
            .save_with_format(&path, image::ImageFormat::Png)
            .map_err(|e| {
                OcrRunError::Internal(format!("cannot write '{}': {e}", path.display()))
            })?;
        variants.push(SavedVariant { label, path });
    }
    debug!("Page {}: {} variant(s)", page_number, variants.len());

    Ok(PageVariants {
        page_number,
        source_path,
        variants,
    })
}

/// Lay out image drafts and the recognition work list.
///
/// Each source page is followed by its variants. Sources are numbered by
/// page; derived images share one run-wide counter in generation order.
fn plan_images(
    generated: Vec<PageVariants>,
) -> (Vec<ImageDraft>, Vec<(usize, String, PathBuf)>) {
    let mut images = Vec::new();
    let mut pending = Vec::new();
    let mut derived_sequence = 0u32;

    for page in generated {
        let source_idx = images.len();
        images.push(ImageDraft {
            path: page.source_path,
            kind: ImageKind::Source,
            label: page_label(page.page_number),
            sequence: page.page_number as u32,
            source: None,
        });
        for variant in page.variants {
            derived_sequence += 1;
            pending.push((images.len(), variant.label.clone(), variant.path.clone()));
            images.push(ImageDraft {
                path: variant.path,
                kind: ImageKind::Derived,
                label: variant.label,
                sequence: derived_sequence,
                source: Some(source_idx),
            });
        }
    }

    (images, pending)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn saved(label: &str) -> SavedVariant {
        SavedVariant {
            label: label.to_string(),
            path: PathBuf::from(format!("{label}.png")),
        }
    }

    #[test]
    fn labels_concatenate_page_and_stage() {
        assert_eq!(page_label(3), "page_3");
        assert_eq!(variant_label(3, "median_filter"), "page_3_median_filter");
        assert!(variant_label(12, "original").starts_with(&page_label(12)));
    }

    #[test]
    fn state_names_are_snake_case() {
        assert_eq!(RunState::PagesResolved.to_string(), "pages_resolved");
        assert_eq!(
            serde_json::to_string(&RunState::VariantsGenerated).unwrap(),
            "\"variants_generated\""
        );
        assert!(RunState::Aborted.is_terminal());
        assert!(!RunState::Summarized.is_terminal());
    }

    #[test]
    fn plan_numbers_sources_by_page_and_variants_run_wide() {
        let generated = vec![
            PageVariants {
                page_number: 1,
                source_path: PathBuf::from("page_001.png"),
                variants: vec![saved("page_1_original"), saved("page_1_grayscale")],
            },
            PageVariants {
                page_number: 2,
                source_path: PathBuf::from("page_002.png"),
                variants: vec![saved("page_2_original"), saved("page_2_grayscale")],
            },
        ];
        let (images, pending) = plan_images(generated);

        let sources: Vec<_> = images
            .iter()
            .filter(|i| i.kind == ImageKind::Source)
            .map(|i| (i.label.as_str(), i.sequence))
            .collect();
        assert_eq!(sources, vec![("page_1", 1), ("page_2", 2)]);

        let derived: Vec<_> = images
            .iter()
            .filter(|i| i.kind == ImageKind::Derived)
            .map(|i| (i.sequence, i.source))
            .collect();
        assert_eq!(derived, vec![(1, Some(0)), (2, Some(0)), (3, Some(3)), (4, Some(3))]);

        let order: Vec<_> = pending.iter().map(|(idx, label, _)| (*idx, label.as_str())).collect();
        assert_eq!(
            order,
            vec![
                (1, "page_1_original"),
                (2, "page_1_grayscale"),
                (4, "page_2_original"),
                (5, "page_2_grayscale"),
            ]
        );
        // Work items point at the saved files, not decoded pixels.
        for (idx, _, path) in &pending {
            assert_eq!(path, &images[*idx].path);
        }
    }

    #[test]
    fn builder_requires_a_store() {
        let err = RunOrchestrator::builder(RunnerConfig::default())
            .build()
            .unwrap_err();
        assert!(matches!(err, OcrRunError::InvalidConfig(_)));
    }
}
