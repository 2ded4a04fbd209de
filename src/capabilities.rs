//! External capability interfaces: OCR and named-entity recognition.
//!
//! The pipeline never talks to a concrete OCR engine or entity model.
//! Both are consumed through narrow object-safe traits injected via
//! [`crate::config::PipelineConfig`] as `Arc<dyn …>`, so callers can plug in
//! any backend — or none. Absence is a first-class, documented degraded mode:
//! images are marked `[OCR not available]` and PII redaction falls back to
//! its regex stage, both reported in result metadata rather than silently
//! changing behaviour.
//!
//! No wall-clock timeout governs capability calls; the orchestrator bounds
//! call *counts* per document instead. A backend that never returns stalls
//! its own job only — sibling batch jobs keep running on their own workers.

use image::GrayImage;
use std::sync::Arc;

/// Boxed error for capability implementations.
///
/// Capability failures are always recoverable at the call site (a failed OCR
/// call becomes a placeholder, a failed recognizer batch leaves the regex
/// pass standing), so a precise error type buys nothing here.
pub type CapabilityError = Box<dyn std::error::Error + Send + Sync>;

/// A fragment of text recognized within an image.
#[derive(Debug, Clone)]
pub struct OcrFragment {
    /// The recognized text.
    pub text: String,
    /// Engine confidence in `[0, 1]`, if the backend reports one.
    pub confidence: Option<f32>,
    /// Bounding box `[left, top, right, bottom]` in source-image pixels.
    /// Carried for callers that consume fragments directly; the pipeline
    /// itself only joins fragment texts.
    pub region: Option<[f32; 4]>,
}

/// Optical character recognition over a grayscale pixel buffer.
///
/// Implementations must be `Send + Sync`: the orchestrator dispatches calls
/// from a small pool of worker threads.
pub trait OcrEngine: Send + Sync {
    /// Short engine identifier surfaced in result metadata (e.g. `"ocrs"`).
    fn name(&self) -> &str;

    /// Recognize text fragments in the image.
    ///
    /// Fragment order should follow reading order; the pipeline joins
    /// fragments with single spaces and normalizes whitespace, so exact
    /// positioning is not consumed.
    fn recognize(&self, image: &GrayImage) -> Result<Vec<OcrFragment>, CapabilityError>;
}

/// Entity label classes the redaction stage acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityLabel {
    /// A person's name.
    Person,
    /// An organization.
    Org,
    /// A geo-political entity (country, city, state).
    Gpe,
    /// Anything else the backend labels; ignored by redaction.
    Other,
}

/// An entity span within one input string.
///
/// `start`/`end` are **byte offsets** into the exact string passed to
/// [`EntityRecognizer::recognize_batch`], computed before any textual
/// replacement. Offsets not on UTF-8 boundaries are discarded by the caller.
#[derive(Debug, Clone)]
pub struct EntitySpan {
    pub start: usize,
    pub end: usize,
    pub label: EntityLabel,
}

/// Batched named-entity recognition.
///
/// The batch shape exists so model-backed implementations can amortize
/// inference across every text-bearing node of a document in one call.
pub trait EntityRecognizer: Send + Sync {
    /// Short recognizer identifier surfaced in result metadata.
    fn name(&self) -> &str;

    /// Recognize entities in each input string.
    ///
    /// Must return exactly one span list per input, in input order.
    fn recognize_batch(&self, texts: &[String]) -> Result<Vec<Vec<EntitySpan>>, CapabilityError>;
}

/// Shared handle types stored in [`crate::config::PipelineConfig`].
pub type SharedOcrEngine = Arc<dyn OcrEngine>;
pub type SharedEntityRecognizer = Arc<dyn EntityRecognizer>;

// ── ocrs adapter (feature "ocr") ─────────────────────────────────────────

/// Adapter implementing [`OcrEngine`] over the pure-Rust `ocrs` engine.
///
/// Model loading is the expensive step; construct once and share via `Arc`.
/// Requires the `text-detection.rten` and `text-recognition.rten` model
/// files (see the ocrs-models releases).
#[cfg(feature = "ocr")]
pub mod ocrs_engine {
    use super::{CapabilityError, OcrEngine, OcrFragment};
    use image::GrayImage;
    use ocrs::{ImageSource, OcrEngine as OcrsInner, OcrEngineParams};
    use rten::Model;
    use std::path::Path;

    pub struct OcrsEngine {
        inner: OcrsInner,
    }

    impl OcrsEngine {
        /// Load detection and recognition models from the given paths.
        pub fn from_model_paths(
            detection: impl AsRef<Path>,
            recognition: impl AsRef<Path>,
        ) -> Result<Self, CapabilityError> {
            let detection_model = Model::load_file(detection.as_ref())
                .map_err(|e| format!("failed to load detection model: {e}"))?;
            let recognition_model = Model::load_file(recognition.as_ref())
                .map_err(|e| format!("failed to load recognition model: {e}"))?;
            let inner = OcrsInner::new(OcrEngineParams {
                detection_model: Some(detection_model),
                recognition_model: Some(recognition_model),
                ..Default::default()
            })
            .map_err(|e| format!("failed to initialise ocrs engine: {e}"))?;
            Ok(Self { inner })
        }
    }

    impl OcrEngine for OcrsEngine {
        fn name(&self) -> &str {
            "ocrs"
        }

        fn recognize(&self, image: &GrayImage) -> Result<Vec<OcrFragment>, CapabilityError> {
            let rgb = image::DynamicImage::ImageLuma8(image.clone()).to_rgb8();
            let (width, height) = rgb.dimensions();
            let source = ImageSource::from_bytes(rgb.as_raw(), (width, height))
                .map_err(|e| format!("image source: {e}"))?;
            let input = self
                .inner
                .prepare_input(source)
                .map_err(|e| format!("preprocessing: {e}"))?;
            let text = self
                .inner
                .get_text(&input)
                .map_err(|e| format!("recognition: {e}"))?;

            Ok(text
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(|l| OcrFragment {
                    text: l.trim().to_string(),
                    confidence: None,
                    region: None,
                })
                .collect())
        }
    }
}

#[cfg(feature = "ocr")]
pub use ocrs_engine::OcrsEngine;
