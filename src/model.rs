//! Run tree value objects.
//!
//! [`Run`], [`PageImage`] and [`TextResult`] are plain immutable values
//! returned by the [`crate::store::RunStore`] read API, with their image and
//! result collections already loaded. The `*Draft` types describe a run that
//! the orchestrator has built in memory but not yet committed; the store
//! assigns ids when the draft is committed as one unit.

use crate::select::{display_confidence, Candidate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Whether an image is a page of the artifact or a preprocessing variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Source,
    Derived,
}

impl ImageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageKind::Source => "source",
            ImageKind::Derived => "derived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "source" => Some(ImageKind::Source),
            "derived" => Some(ImageKind::Derived),
            _ => None,
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One committed recognition job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    /// Random 128-bit token naming the run's storage directory.
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub backend: String,
    /// Language/model hint resolved at run start.
    pub language: Option<String>,
    pub original_path: PathBuf,
    /// Intermediate PDF for documents that needed conversion (or the PDF itself).
    pub converted_path: Option<PathBuf>,
    pub summary_text: Option<String>,
    /// Raw backend-native confidence of the summary result.
    pub summary_confidence: Option<f64>,
    /// Images in insertion order: each source page followed by its variants.
    pub images: Vec<PageImage>,
    pub text_results: Vec<TextResult>,
}

impl Run {
    pub fn source_images(&self) -> impl Iterator<Item = &PageImage> {
        self.images.iter().filter(|i| i.kind == ImageKind::Source)
    }

    /// Derived images whose lineage points at `source_id`.
    pub fn variants_of(&self, source_id: i64) -> impl Iterator<Item = &PageImage> {
        self.images
            .iter()
            .filter(move |i| i.kind == ImageKind::Derived && i.source_image_id == Some(source_id))
    }

    /// Text results produced from the image with `image_id`.
    pub fn results_for(&self, image_id: i64) -> impl Iterator<Item = &TextResult> {
        self.text_results
            .iter()
            .filter(move |r| r.image_id == Some(image_id))
    }

    /// Summary confidence formatted for display (e.g. `"87.00%"`).
    pub fn summary_confidence_display(&self) -> Option<String> {
        display_confidence(self.summary_confidence)
    }
}

/// One image file belonging to a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageImage {
    pub id: i64,
    pub run_id: i64,
    pub path: PathBuf,
    pub kind: ImageKind,
    /// `page_N` for sources, `page_N_<stage>` for variants.
    pub label: String,
    pub sequence: u32,
    /// Lineage: the source page a derived image was produced from.
    pub source_image_id: Option<i64>,
}

/// One recognition observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextResult {
    pub id: i64,
    pub run_id: i64,
    /// `None` once the image has been deleted administratively.
    pub image_id: Option<i64>,
    pub variant_label: String,
    pub text: String,
    /// Raw backend-native confidence; never normalised at rest.
    pub confidence: Option<f64>,
}

impl TextResult {
    pub fn confidence_display(&self) -> Option<String> {
        display_confidence(self.confidence)
    }
}

impl Candidate for TextResult {
    fn confidence(&self) -> Option<f64> {
        self.confidence
    }

    fn text(&self) -> &str {
        &self.text
    }
}

// ── Drafts ───────────────────────────────────────────────────────────────

/// A fully built run awaiting its atomic commit.
#[derive(Debug, Clone)]
pub struct RunDraft {
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub backend: String,
    pub language: Option<String>,
    pub original_path: PathBuf,
    pub converted_path: Option<PathBuf>,
    pub summary_text: Option<String>,
    pub summary_confidence: Option<f64>,
    pub images: Vec<ImageDraft>,
    pub results: Vec<ResultDraft>,
}

/// An image of a [`RunDraft`].
#[derive(Debug, Clone)]
pub struct ImageDraft {
    pub path: PathBuf,
    pub kind: ImageKind,
    pub label: String,
    pub sequence: u32,
    /// Index into [`RunDraft::images`] of the source page.
    pub source: Option<usize>,
}

/// A text result of a [`RunDraft`].
#[derive(Debug, Clone)]
pub struct ResultDraft {
    /// Index into [`RunDraft::images`] of the recognised variant.
    pub image: usize,
    pub variant_label: String,
    pub text: String,
    pub confidence: Option<f64>,
}

impl Candidate for ResultDraft {
    fn confidence(&self) -> Option<f64> {
        self.confidence
    }

    fn text(&self) -> &str {
        &self.text
    }
}
