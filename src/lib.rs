//! # docscrub
//!
//! Document scrubbing pipeline: ingest plain-text, word-processor, or
//! portable-document inputs, extract their structured content (text, tables,
//! embedded images), optionally anonymize or redact PII, optionally run OCR
//! over embedded images, and emit either a rewritten PDF or a structured
//! JSON snapshot. Batches of independent documents run concurrently with
//! streamed progress and cooperative cancellation.
//!
//! ## Pipeline Overview
//!
//! ```text
//! document
//!  │
//!  ├─ 1. Cache      fingerprint(bytes + flags + normalized options) → hit?
//!  ├─ 2. Read       txt passthrough / docx zip+xml / pdf single-pass
//!  ├─ 3. OCR        admissibility heuristics, per-doc cap, bounded pool
//!  ├─ 4. Transform  term anonymization, regex + model PII redaction
//!  ├─ 5. Render     JSON snapshot or rewritten PDF (fallback ladder)
//!  └─ 6. Store      LRU cache, deep-copied metadata
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docscrub::{DocumentPipeline, PipelineConfig, ProcessingRequest, Options};
//!
//! # fn main() -> Result<(), docscrub::ProcessError> {
//! let pipeline = DocumentPipeline::new(PipelineConfig::default());
//! let request = ProcessingRequest {
//!     remove_pii: true,
//!     options: Options::default(),
//!     ..ProcessingRequest::default()
//! };
//! let bytes = std::fs::read("contract.pdf").expect("readable input");
//! let result = pipeline.process(&bytes, "contract.pdf", &request)?;
//! std::fs::write("contract_processed.pdf", result.content.as_bytes()).ok();
//! # Ok(())
//! # }
//! ```
//!
//! ## Batches
//!
//! [`BatchSupervisor`] fans jobs out across `min(jobs, max_parallelism)`
//! blocking workers and streams [`JobUpdate`]s tagged with each job's stable
//! submission index. Cancellation is cooperative via [`CancellationToken`]:
//! not-yet-started jobs report `Cancelled`, in-flight jobs run to their own
//! terminal state, and every job ends in exactly one of Done/Error/Cancelled.
//!
//! ## External capabilities
//!
//! OCR and named-entity recognition are consumed through the narrow traits
//! in [`capabilities`]; both are optional, and absence is a documented
//! degraded mode reported in result metadata (`ocr.engine = "unavailable"`,
//! `ner_mode = "regex_only"`), never a silent behaviour change.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod cache;
pub mod capabilities;
pub mod config;
pub mod document;
pub mod error;
pub mod ocr;
pub mod pipeline;
pub mod reader;
pub mod render;
pub mod transform;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{BatchJob, BatchReport, BatchSupervisor, CancellationToken, JobUpdate};
pub use capabilities::{
    CapabilityError, EntityLabel, EntityRecognizer, EntitySpan, OcrEngine, OcrFragment,
};
pub use config::{Options, PipelineConfig, PipelineConfigBuilder, ProcessingRequest};
pub use document::{
    derive_output_name, DocumentFormat, ExtractedContent, ImageRecord, Metadata, NerMode,
    OcrSummary, OutputContent, ProcessingResult, Table,
};
pub use error::ProcessError;
pub use pipeline::DocumentPipeline;
pub use transform::PII_SENTINEL;

#[cfg(feature = "ocr")]
pub use capabilities::OcrsEngine;
