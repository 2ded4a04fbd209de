//! Format-specific content extraction.
//!
//! Each reader is stateless given the input bytes: dispatch happens once on
//! the [`DocumentFormat`] tag and every call stands alone.
//!
//! ## Data flow
//!
//! ```text
//! bytes ──▶ text  (UTF-8 passthrough)
//!       ──▶ word  (zip + xml: paragraphs, tables, media)
//!       ──▶ pdf   (pdfium single pass, lopdf text-only fallback)
//! ```
//!
//! Readers never run OCR; the pipeline hands the extracted image records to
//! the orchestrator afterwards.

pub mod pdf;
pub mod text;
pub mod word;

use crate::document::{DocumentFormat, ExtractedContent};
use crate::error::ProcessError;
use std::collections::BTreeMap;
use std::time::Instant;

/// Extract structured content from a document, recording the read time
/// under the stage key for its format.
pub fn read_document(
    format: DocumentFormat,
    bytes: &[u8],
    filename: &str,
    header_footer_ratio: f32,
    throughput_mode: bool,
    timing: &mut BTreeMap<String, f64>,
) -> Result<ExtractedContent, ProcessError> {
    let start = Instant::now();
    let (key, result) = match format {
        DocumentFormat::Text => ("read_txt", Ok(text::read(bytes))),
        DocumentFormat::Word => ("read_docx", word::read(bytes, filename)),
        DocumentFormat::Pdf => (
            "read_pdf",
            pdf::read(bytes, filename, header_footer_ratio, throughput_mode, timing),
        ),
    };
    *timing.entry(key.to_string()).or_insert(0.0) += start.elapsed().as_secs_f64();
    result
}
