//! Error types for the docscrub library.
//!
//! A single fatal error type, [`ProcessError`], covers everything that can
//! fail a *job*: unsupported input, extraction that failed even after the
//! text-only fallback, a poisoned internal lock, invalid configuration.
//!
//! Everything else degrades in-band rather than erroring, per the pipeline's
//! fallback ladders:
//!
//! * a corrupt embedded image becomes a placeholder [`crate::document::ImageRecord`]
//! * a failed OCR call becomes `[OCR failed: …]` text on the image
//! * a failed rich render falls back to a text-only render, then to an
//!   error document
//! * a failed container transform returns the original bytes untouched
//!
//! Callers therefore only ever see `Err(ProcessError)` when a document is
//! genuinely unprocessable; partial success is encoded in the result's
//! metadata, not in the error channel.

use thiserror::Error;

/// Fatal, per-job errors returned by [`crate::pipeline::DocumentPipeline::process`].
///
/// A failing job never aborts sibling jobs in a batch; the supervisor maps
/// this error into a `JobUpdate::Error` tagged with the job's index.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The filename extension maps to no supported format.
    #[error("Unsupported file format '{extension}' for '{filename}'\nSupported: .txt, .docx, .pdf")]
    UnsupportedFormat { filename: String, extension: String },

    /// Content extraction failed, including the minimal text-only fallback.
    #[error("Extraction failed for '{filename}': {detail}")]
    Extraction { filename: String, detail: String },

    /// A Word container could not be opened at all (not a zip archive, or
    /// the main document part is missing).
    #[error("'{filename}' is not a readable Word document: {detail}")]
    InvalidContainer { filename: String, detail: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error (poisoned lock, panicked worker).
    #[error("Internal error: {0}")]
    Internal(String),
}
