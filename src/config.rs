//! Configuration types: pipeline construction knobs and per-request options.
//!
//! Two layers, deliberately separate:
//!
//! * [`PipelineConfig`] — construction-time state of a
//!   [`crate::pipeline::DocumentPipeline`]: cache capacity, OCR bounds, the
//!   injected capability handles. Built once per worker via its builder and
//!   cheap to clone (capabilities are `Arc`s).
//! * [`ProcessingRequest`] / [`Options`] — per-call inputs: the three
//!   operation flags plus the option record that participates in the cache
//!   fingerprint. Created fresh for every document and discarded after.
//!
//! # Design choice: builder over constructor
//! The builder lets callers set only what they care about while defaults stay
//! documented in one place, and `build()` is the single validation point.

use crate::capabilities::{SharedEntityRecognizer, SharedOcrEngine};
use crate::error::ProcessError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Construction-time configuration for a document pipeline.
#[derive(Clone)]
pub struct PipelineConfig {
    /// Maximum finalized results kept in the per-pipeline LRU cache.
    /// 0 disables caching entirely. Default: 64.
    pub max_cache_entries: usize,

    /// Hard cap on OCR calls per document. Once reached, remaining images
    /// are marked skipped rather than queued. Default: 10.
    pub ocr_max_images_per_doc: usize,

    /// Worker threads for intra-document OCR dispatch. OCR calls are
    /// independent per image, so a small pool overlaps them without
    /// oversubscribing the batch-level workers. Default: 2.
    pub ocr_workers: usize,

    /// Symmetric header/footer clip ratio for PDF text extraction: each
    /// page's text is taken from the vertical band between
    /// `height * ratio` and `height * (1 - ratio)`, excluding repeating
    /// headers and footers. Range 0.0–0.4. Default: 0.08.
    pub header_footer_ratio: f32,

    /// OCR backend. `None` disables OCR globally; every image is reported
    /// `[OCR not available]`.
    pub ocr_engine: Option<SharedOcrEngine>,

    /// Named-entity recognizer for the model-based redaction stage.
    /// `None` degrades PII removal to the regex stage only (reported as
    /// `ner_mode = regex_only` in metadata).
    pub entity_recognizer: Option<SharedEntityRecognizer>,

    /// OCR outputs that mark an image as non-informative (recurring logo
    /// artifacts). Matching images are excluded from rendered and JSON
    /// output. Compared case-insensitively against the trimmed OCR text.
    pub noise_ocr_markers: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_cache_entries: 64,
            ocr_max_images_per_doc: 10,
            ocr_workers: 2,
            header_footer_ratio: 0.08,
            ocr_engine: None,
            entity_recognizer: None,
            noise_ocr_markers: Vec::new(),
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("max_cache_entries", &self.max_cache_entries)
            .field("ocr_max_images_per_doc", &self.ocr_max_images_per_doc)
            .field("ocr_workers", &self.ocr_workers)
            .field("header_footer_ratio", &self.header_footer_ratio)
            .field("ocr_engine", &self.ocr_engine.as_ref().map(|e| e.name().to_string()))
            .field(
                "entity_recognizer",
                &self.entity_recognizer.as_ref().map(|r| r.name().to_string()),
            )
            .field("noise_ocr_markers", &self.noise_ocr_markers)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn max_cache_entries(mut self, n: usize) -> Self {
        self.config.max_cache_entries = n;
        self
    }

    pub fn ocr_max_images_per_doc(mut self, n: usize) -> Self {
        self.config.ocr_max_images_per_doc = n;
        self
    }

    pub fn ocr_workers(mut self, n: usize) -> Self {
        self.config.ocr_workers = n.max(1);
        self
    }

    pub fn header_footer_ratio(mut self, ratio: f32) -> Self {
        self.config.header_footer_ratio = ratio.clamp(0.0, 0.4);
        self
    }

    pub fn ocr_engine(mut self, engine: SharedOcrEngine) -> Self {
        self.config.ocr_engine = Some(engine);
        self
    }

    pub fn entity_recognizer(mut self, recognizer: SharedEntityRecognizer) -> Self {
        self.config.entity_recognizer = Some(recognizer);
        self
    }

    pub fn noise_ocr_markers(mut self, markers: Vec<String>) -> Self {
        self.config.noise_ocr_markers = markers;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ProcessError> {
        let c = &self.config;
        if c.ocr_workers == 0 {
            return Err(ProcessError::InvalidConfig("OCR workers must be ≥ 1".into()));
        }
        if !(0.0..=0.4).contains(&c.header_footer_ratio) {
            return Err(ProcessError::InvalidConfig(format!(
                "header/footer ratio must be 0.0–0.4, got {}",
                c.header_footer_ratio
            )));
        }
        Ok(self.config)
    }
}

// ── Per-request types ────────────────────────────────────────────────────

/// The three operation flags plus the option record for one document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingRequest {
    /// Substitute the configured literal terms throughout the document.
    pub anonymize: bool,
    /// Redact personally identifiable information.
    pub remove_pii: bool,
    /// Emit a structured JSON snapshot instead of a rewritten document.
    pub extract_json: bool,
    /// Tuning options; normalized before use and part of the fingerprint.
    pub options: Options,
}

impl ProcessingRequest {
    /// Copy of this request with [`Options::normalized`] applied.
    pub fn normalized(&self) -> Self {
        Self {
            options: self.options.normalized(),
            ..self.clone()
        }
    }
}

/// Per-request tuning options.
///
/// Every field participates in the cache fingerprint, so two requests that
/// differ in any option never alias each other's cached results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Options {
    /// Trade accuracy for speed: disables OCR, PDF table extraction, and
    /// model-based PII detection in favour of regex-only processing.
    pub throughput_mode: bool,
    /// Emit debug-level tracing from the processing stages.
    pub verbose_logging: bool,
    /// Master OCR switch. Ignored (treated as off) in throughput mode.
    pub ocr_enabled: bool,
    /// Literal terms to substitute when anonymizing. Matched
    /// case-insensitively as a single alternation.
    pub anonymize_terms: Vec<String>,
    /// Replacement for matched terms. Empty string substitutes a single
    /// space so adjacent words are not glued together.
    pub anonymize_replace: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            throughput_mode: false,
            verbose_logging: false,
            ocr_enabled: true,
            anonymize_terms: Vec::new(),
            anonymize_replace: String::new(),
        }
    }
}

impl Options {
    /// Normalize the option record: terms trimmed, empties dropped,
    /// deduplicated case-insensitively with first-seen order preserved.
    ///
    /// Idempotent: `o.normalized().normalized() == o.normalized()`.
    pub fn normalized(&self) -> Self {
        let mut seen = HashSet::new();
        let terms = self
            .anonymize_terms
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .filter(|t| seen.insert(t.to_lowercase()))
            .map(str::to_string)
            .collect();

        Self {
            anonymize_terms: terms,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let config = PipelineConfig::builder().build().unwrap();
        assert_eq!(config.max_cache_entries, 64);
        assert_eq!(config.ocr_max_images_per_doc, 10);
        assert_eq!(config.ocr_workers, 2);
        assert!((config.header_footer_ratio - 0.08).abs() < f32::EPSILON);
        assert!(config.ocr_engine.is_none());
    }

    #[test]
    fn builder_clamps_ratio() {
        let config = PipelineConfig::builder()
            .header_footer_ratio(0.9)
            .build()
            .unwrap();
        assert!(config.header_footer_ratio <= 0.4);
    }

    #[test]
    fn normalization_trims_dedupes_preserves_order() {
        let options = Options {
            anonymize_terms: vec![
                "  Acme ".into(),
                "".into(),
                "acme".into(),
                "Widget".into(),
                "ACME".into(),
            ],
            ..Options::default()
        };
        let normalized = options.normalized();
        assert_eq!(normalized.anonymize_terms, vec!["Acme", "Widget"]);
    }

    #[test]
    fn normalization_is_idempotent() {
        let options = Options {
            anonymize_terms: vec!["Acme Corp".into(), " acme corp ".into(), "Beta".into()],
            ..Options::default()
        };
        let once = options.normalized();
        let twice = once.normalized();
        assert_eq!(once, twice);
    }
}
