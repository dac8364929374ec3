//! Preprocessing variant generation.
//!
//! A [`VariantGenerator`] holds an ordered chain of [`VariantStage`]s. The
//! first stage sees the source page; every later stage consumes the output
//! of the stage before it, so the chain models progressive cleanup:
//!
//! ```text
//! original ──▶ grayscale ──▶ contrast ──▶ median_filter ──▶ threshold
//! ```
//!
//! An allow-list only controls which stage outputs are *emitted*. Every stage
//! still runs, so an allowed late stage receives the same cumulative input
//! whether or not the stages before it are emitted.
//!
//! Stages are pure functions of their input image: the same page and the
//! same allow-list always yield pixel-identical variants in the same order.

use crate::error::VariantError;
use image::{DynamicImage, GrayImage, Luma, RgbImage};
use imageproc::filter::median_filter;

/// Label of the identity stage.
pub const ORIGINAL: &str = "original";
pub const GRAYSCALE: &str = "grayscale";
pub const CONTRAST: &str = "contrast";
pub const MEDIAN_FILTER: &str = "median_filter";
pub const THRESHOLD: &str = "threshold";

/// One named image transform.
pub trait VariantStage: Send + Sync {
    fn label(&self) -> &str;
    fn apply(&self, input: &DynamicImage) -> Result<DynamicImage, VariantError>;
}

/// A generated variant.
#[derive(Debug, Clone)]
pub struct Variant {
    pub label: String,
    pub image: DynamicImage,
}

/// Identity copy of the source page.
#[derive(Debug, Clone, Copy, Default)]
pub struct Original;

impl VariantStage for Original {
    fn label(&self) -> &str {
        ORIGINAL
    }

    fn apply(&self, input: &DynamicImage) -> Result<DynamicImage, VariantError> {
        Ok(input.clone())
    }
}

/// Luma conversion with Rec. 601 weights (0.299, 0.587, 0.114).
#[derive(Debug, Clone, Copy, Default)]
pub struct Grayscale;

impl VariantStage for Grayscale {
    fn label(&self) -> &str {
        GRAYSCALE
    }

    fn apply(&self, input: &DynamicImage) -> Result<DynamicImage, VariantError> {
        Ok(DynamicImage::ImageLuma8(luma_601(input)))
    }
}

/// Histogram autocontrast: stretch the darkest value to 0 and the lightest
/// to 255, per channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct Contrast;

impl VariantStage for Contrast {
    fn label(&self) -> &str {
        CONTRAST
    }

    fn apply(&self, input: &DynamicImage) -> Result<DynamicImage, VariantError> {
        if input.color().has_color() {
            let mut rgb = input.to_rgb8();
            for channel in 0..3 {
                let lut = stretch_lut(rgb.pixels().map(|p| p.0[channel]));
                for p in rgb.pixels_mut() {
                    p.0[channel] = lut[p.0[channel] as usize];
                }
            }
            Ok(DynamicImage::ImageRgb8(rgb))
        } else {
            let mut gray = input.to_luma8();
            let lut = stretch_lut(gray.pixels().map(|p| p.0[0]));
            for p in gray.pixels_mut() {
                p.0[0] = lut[p.0[0] as usize];
            }
            Ok(DynamicImage::ImageLuma8(gray))
        }
    }
}

/// Rec. 601 luma in 16-bit fixed point, rounded to nearest.
///
/// `image`'s own `to_luma8` uses Rec. 709 weights, which darken reds and
/// lighten greens compared with what scanner-oriented tooling produces.
fn luma_601(input: &DynamicImage) -> GrayImage {
    if let DynamicImage::ImageLuma8(gray) = input {
        return gray.clone();
    }
    let rgb = input.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let l = (u32::from(r) * 19595 + u32::from(g) * 38470 + u32::from(b) * 7471 + 0x8000) >> 16;
        Luma([l as u8])
    })
}

/// Build the lookup table mapping `[lo, hi]` onto `[0, 255]`.
fn stretch_lut(values: impl Iterator<Item = u8>) -> [u8; 256] {
    let mut lo = u8::MAX;
    let mut hi = u8::MIN;
    for v in values {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    let mut lut = [0u8; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        *slot = i as u8;
    }
    if hi <= lo {
        return lut;
    }
    let scale = 255.0 / f32::from(hi - lo);
    let offset = -f32::from(lo) * scale;
    for (i, slot) in lut.iter_mut().enumerate() {
        *slot = (i as f32 * scale + offset).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Median denoise over a `(2r+1)²` window.
#[derive(Debug, Clone, Copy)]
pub struct MedianFilter {
    pub radius: u32,
}

impl Default for MedianFilter {
    fn default() -> Self {
        Self { radius: 1 }
    }
}

impl VariantStage for MedianFilter {
    fn label(&self) -> &str {
        MEDIAN_FILTER
    }

    fn apply(&self, input: &DynamicImage) -> Result<DynamicImage, VariantError> {
        if input.color().has_color() {
            let rgb: RgbImage = input.to_rgb8();
            Ok(DynamicImage::ImageRgb8(median_filter(
                &rgb,
                self.radius,
                self.radius,
            )))
        } else {
            let gray: GrayImage = input.to_luma8();
            Ok(DynamicImage::ImageLuma8(median_filter(
                &gray,
                self.radius,
                self.radius,
            )))
        }
    }
}

/// Global binarisation: luma above `level` becomes white, the rest black.
#[derive(Debug, Clone, Copy)]
pub struct Threshold {
    pub level: u8,
}

impl Default for Threshold {
    fn default() -> Self {
        Self { level: 160 }
    }
}

impl VariantStage for Threshold {
    fn label(&self) -> &str {
        THRESHOLD
    }

    fn apply(&self, input: &DynamicImage) -> Result<DynamicImage, VariantError> {
        let gray = luma_601(input);
        let level = self.level;
        let binary = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
            if gray.get_pixel(x, y).0[0] > level {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        Ok(DynamicImage::ImageLuma8(binary))
    }
}

/// Ordered chain of variant stages.
pub struct VariantGenerator {
    stages: Vec<Box<dyn VariantStage>>,
}

impl Default for VariantGenerator {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for VariantGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariantGenerator")
            .field("stages", &self.labels())
            .finish()
    }
}

impl VariantGenerator {
    /// The five-stage pipeline: original, grayscale, contrast, median filter, threshold.
    pub fn standard() -> Self {
        Self::with_stages(vec![
            Box::new(Original),
            Box::new(Grayscale),
            Box::new(Contrast),
            Box::new(MedianFilter::default()),
            Box::new(Threshold::default()),
        ])
    }

    pub fn with_stages(stages: Vec<Box<dyn VariantStage>>) -> Self {
        Self { stages }
    }

    /// Stage labels in execution order.
    pub fn labels(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.label()).collect()
    }

    /// Labels that `generate` will emit for `allowed`, in emission order.
    pub fn emitted_labels<S: AsRef<str>>(
        &self,
        allowed: Option<&[S]>,
    ) -> Result<Vec<String>, VariantError> {
        self.check_allowed(allowed)?;
        Ok(self
            .stages
            .iter()
            .map(|s| s.label())
            .filter(|label| is_allowed(allowed, label))
            .map(str::to_string)
            .collect())
    }

    /// Run every stage over `source`, emitting the outputs named in `allowed`
    /// (all outputs when `None`).
    ///
    /// A label in `allowed` that names no stage is an error rather than a
    /// silently shorter list, as is any stage failure.
    pub fn generate<S: AsRef<str>>(
        &self,
        source: &DynamicImage,
        allowed: Option<&[S]>,
    ) -> Result<Vec<Variant>, VariantError> {
        if source.width() == 0 || source.height() == 0 {
            return Err(VariantError::EmptyImage {
                width: source.width(),
                height: source.height(),
            });
        }
        self.check_allowed(allowed)?;

        let mut outputs = Vec::new();
        let mut current: Option<DynamicImage> = None;
        for stage in &self.stages {
            let input = current.as_ref().unwrap_or(source);
            let next = stage.apply(input)?;
            if is_allowed(allowed, stage.label()) {
                outputs.push(Variant {
                    label: stage.label().to_string(),
                    image: next.clone(),
                });
            }
            current = Some(next);
        }
        Ok(outputs)
    }

    fn check_allowed<S: AsRef<str>>(&self, allowed: Option<&[S]>) -> Result<(), VariantError> {
        let Some(allowed) = allowed else {
            return Ok(());
        };
        for label in allowed {
            let label = label.as_ref();
            if !self.stages.iter().any(|s| s.label() == label) {
                return Err(VariantError::UnknownLabel {
                    label: label.to_string(),
                    known: self.labels().into_iter().map(str::to_string).collect(),
                });
            }
        }
        Ok(())
    }
}

fn is_allowed<S: AsRef<str>>(allowed: Option<&[S]>, label: &str) -> bool {
    allowed.is_none_or(|set| set.iter().any(|l| l.as_ref() == label))
}
