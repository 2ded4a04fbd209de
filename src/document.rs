//! Core data model: formats, extracted content, metadata, results.

use crate::config::Options;
use crate::error::ProcessError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Supported input formats, resolved once from the filename extension.
///
/// Exhaustive dispatch — every downstream `match` covers all three arms, so
/// adding a format is a compile-checked change, not a runtime fallthrough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentFormat {
    /// Plain UTF-8 text (`.txt`).
    Text,
    /// Word-processor container (`.docx`).
    Word,
    /// Portable document (`.pdf`).
    Pdf,
}

impl DocumentFormat {
    /// Resolve the format from a filename's extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Result<Self, ProcessError> {
        let extension = Path::new(filename)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        match extension.as_str() {
            ".txt" => Ok(Self::Text),
            ".docx" => Ok(Self::Word),
            ".pdf" => Ok(Self::Pdf),
            _ => Err(ProcessError::UnsupportedFormat {
                filename: filename.to_string(),
                extension,
            }),
        }
    }

    /// The canonical extension for this format, with leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Text => ".txt",
            Self::Word => ".docx",
            Self::Pdf => ".pdf",
        }
    }
}

/// An extracted table: row-major grid of cell strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    /// Zero-based index in document order.
    pub table_index: usize,
    /// Row-major cell text.
    pub data: Vec<Vec<String>>,
    pub rows: usize,
    pub cols: usize,
    /// 1-indexed source page, for formats with pages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
}

impl Table {
    pub fn from_grid(table_index: usize, data: Vec<Vec<String>>, page: Option<usize>) -> Self {
        let rows = data.len();
        let cols = data.first().map(Vec::len).unwrap_or(0);
        Self {
            table_index,
            data,
            rows,
            cols,
            page,
        }
    }
}

/// An embedded image extracted from a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Source kind tag (e.g. `"pdf_embedded_image"`, `"docx_embedded_image"`).
    pub kind: String,
    /// Human-readable description (source location, or failure note for
    /// placeholder records).
    pub description: String,
    /// Raw encoded image bytes. Empty for placeholder records.
    #[serde(skip)]
    pub data: Vec<u8>,
    /// Detected format name (`"png"`, `"jpeg"`, `"unknown"`).
    pub format: String,
    /// OCR output, or a bracketed skip/failure reason.
    pub extracted_text: String,
    /// True only when an OCR call completed for this image.
    pub ocr_applied: bool,
}

impl ImageRecord {
    /// A placeholder for an image whose bytes could not be read. The record
    /// stays in the sequence so extraction never silently drops media.
    pub fn placeholder(kind: &str, description: String, reason: String) -> Self {
        Self {
            kind: kind.to_string(),
            description,
            data: Vec::new(),
            format: "unknown".to_string(),
            extracted_text: reason,
            ocr_applied: false,
        }
    }
}

/// Structured content extracted from one document.
#[derive(Debug, Clone, Default)]
pub struct ExtractedContent {
    /// Flattened text view: paragraphs in document order, table rows
    /// pipe-joined, page texts concatenated in page order.
    pub text: String,
    /// Non-empty paragraphs, for formats with paragraph structure.
    pub paragraphs: Vec<String>,
    pub tables: Vec<Table>,
    pub images: Vec<ImageRecord>,
    /// Which extraction engine produced this (`"pdfium_single_pass"`,
    /// `"lopdf_text_only"`), for formats with more than one path.
    pub engine: Option<String>,
}

/// Which redaction stages ran for this document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NerMode {
    /// Pattern pass only: throughput mode, or no recognizer configured.
    RegexOnly,
    /// Pattern pass followed by batched model-based entity redaction.
    ModelBatch,
}

/// OCR counters and identifiers for one processed document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrSummary {
    /// Engine identifier, or `"unavailable"`.
    pub engine: String,
    pub images_processed: usize,
    pub images_skipped: usize,
    pub max_images_per_doc: usize,
    /// Whether OCR was effectively enabled for this run (flag on and not
    /// in throughput mode and an engine present).
    pub enabled: bool,
}

/// Everything a caller may want to know about how a result was produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Per-stage wall-clock seconds, keyed by stage name.
    pub timing: BTreeMap<String, f64>,
    pub throughput_mode: bool,
    /// True when the result was served from the cache. Timing and counters
    /// are then historical — copied from the original computation.
    pub cache_hit: bool,
    pub ner_mode: NerMode,
    pub ocr: OcrSummary,
    /// PDF extraction engine used, when the input was a PDF.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_engine: Option<String>,
    /// The normalized options this result was computed under.
    pub options: Options,
}

/// Final output payload: rewritten document bytes or JSON text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputContent {
    Bytes(Vec<u8>),
    Text(String),
}

impl OutputContent {
    /// Byte view regardless of variant.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Bytes(b) => b,
            Self::Text(t) => t.as_bytes(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// The result of processing one document.
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub content: OutputContent,
    /// Output extension: `".json"`, `".pdf"`, or the original extension
    /// when the document passed through unmodified.
    pub extension: String,
    pub metadata: Metadata,
}

/// Derive the output filename for a processed document.
///
/// `.json` when a JSON snapshot was requested; `{stem}_processed.pdf` when a
/// scrubbing operation rewrote the document; otherwise the original name.
pub fn derive_output_name(
    filename: &str,
    anonymize: bool,
    remove_pii: bool,
    extract_json: bool,
) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());
    if extract_json {
        format!("{stem}.json")
    } else if anonymize || remove_pii {
        format!("{stem}_processed.pdf")
    } else {
        filename.to_string()
    }
}
