//! Portable-document extraction: pdfium single pass with a pure-Rust
//! text-only fallback.
//!
//! ## The two paths
//!
//! The primary path binds the system pdfium library and makes one pass per
//! page: clip-band text (excluding the header/footer ratio at the top and
//! bottom of the page), heuristic-gated table recovery from the page text,
//! and embedded image objects deduplicated by content digest.
//!
//! When pdfium cannot be bound or the single pass fails, extraction falls
//! back to `lopdf` — text only, no tables or images. The fallback ladder is
//! explicit: `single_pass → text_only → ProcessError::Extraction`. Only the
//! last rung fails the job.
//!
//! ## Why gate table recovery behind indicators?
//!
//! Most pages have no tabular content, and scanning every page for column
//! structure is pure waste. The indicator check is a handful of cheap regex
//! probes over text we already extracted; only pages that look table-ish pay
//! for the real scan.

use crate::document::{ExtractedContent, ImageRecord, Table};
use crate::error::ProcessError;
use once_cell::sync::Lazy;
use pdfium_render::prelude::*;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::time::Instant;
use tracing::{debug, warn};

const IMAGE_KIND: &str = "pdf_embedded_image";

/// Extract text, tables, and images from a PDF, degrading to text-only on
/// failure.
pub fn read(
    bytes: &[u8],
    filename: &str,
    header_footer_ratio: f32,
    throughput_mode: bool,
    timing: &mut BTreeMap<String, f64>,
) -> Result<ExtractedContent, ProcessError> {
    match read_single_pass(bytes, header_footer_ratio, throughput_mode, timing) {
        Ok(content) => Ok(content),
        Err(detail) => {
            warn!(%filename, %detail, "single-pass PDF read failed, trying text-only fallback");
            read_text_only(bytes).map_err(|fallback_detail| ProcessError::Extraction {
                filename: filename.to_string(),
                detail: format!("{detail}; text-only fallback: {fallback_detail}"),
            })
        }
    }
}

/// Primary path: one pdfium pass per page.
fn read_single_pass(
    bytes: &[u8],
    header_footer_ratio: f32,
    throughput_mode: bool,
    timing: &mut BTreeMap<String, f64>,
) -> Result<ExtractedContent, String> {
    let bindings = Pdfium::bind_to_system_library()
        .map_err(|e| format!("pdfium binding unavailable: {e:?}"))?;
    let pdfium = Pdfium::new(bindings);
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| format!("cannot open PDF: {e:?}"))?;

    let mut text_chunks: Vec<String> = Vec::new();
    let mut tables: Vec<Table> = Vec::new();
    let mut images: Vec<ImageRecord> = Vec::new();
    let mut seen_digests: HashSet<[u8; 32]> = HashSet::new();

    for (page_index, page) in document.pages().iter().enumerate() {
        let page_num = page_index + 1;
        let page_text = extract_page_text(&page, header_footer_ratio)
            .map_err(|e| format!("text extraction failed on page {page_num}: {e:?}"))?;
        if !page_text.is_empty() {
            text_chunks.push(page_text.clone());
        }

        if !throughput_mode {
            if has_table_indicators(&page_text) {
                debug!(page = page_num, "table indicators found, scanning");
                let start = Instant::now();
                let found = scan_text_tables(&page_text, page_num, tables.len());
                *timing.entry("table_extraction".to_string()).or_insert(0.0) +=
                    start.elapsed().as_secs_f64();
                tables.extend(found);
            } else {
                debug!(page = page_num, "no table indicators, skipping scan");
            }
        }

        extract_page_images(&page, page_num, &mut seen_digests, &mut images);
    }

    Ok(ExtractedContent {
        text: text_chunks.join("\n"),
        paragraphs: Vec::new(),
        tables,
        images,
        engine: Some("pdfium_single_pass".to_string()),
    })
}

/// Page text clipped to the band between the header and footer ratios.
fn extract_page_text(page: &PdfPage, ratio: f32) -> Result<String, PdfiumError> {
    let text = page.text()?;
    let height = page.height().value;
    let width = page.width().value;
    let bottom = height * ratio;
    let top = height * (1.0 - ratio);
    if ratio > 0.0 && top > bottom {
        Ok(text.inside_rect(PdfRect::new(
            PdfPoints::new(bottom),
            PdfPoints::new(0.0),
            PdfPoints::new(top),
            PdfPoints::new(width),
        )))
    } else {
        Ok(text.all())
    }
}

/// Collect the page's embedded image objects, deduplicating repeated
/// references to the same underlying image by content digest.
fn extract_page_images(
    page: &PdfPage,
    page_num: usize,
    seen: &mut HashSet<[u8; 32]>,
    images: &mut Vec<ImageRecord>,
) {
    for object in page.objects().iter() {
        let PdfPageObject::Image(ref image_object) = object else {
            continue;
        };
        match image_object.get_raw_image() {
            Ok(raw) => {
                let mut encoded = Vec::new();
                if raw
                    .write_to(&mut Cursor::new(&mut encoded), image::ImageFormat::Png)
                    .is_err()
                {
                    continue;
                }
                let digest: [u8; 32] = Sha256::digest(&encoded).into();
                if !seen.insert(digest) {
                    continue;
                }
                images.push(ImageRecord {
                    kind: IMAGE_KIND.to_string(),
                    description: format!("Image on page {page_num}"),
                    format: "png".to_string(),
                    data: encoded,
                    extracted_text: String::new(),
                    ocr_applied: false,
                });
            }
            Err(e) => {
                warn!(page = page_num, error = ?e, "unreadable embedded image");
                images.push(ImageRecord::placeholder(
                    IMAGE_KIND,
                    format!("Image on page {page_num} (extraction failed)"),
                    format!("[Image extraction failed: {e:?}]"),
                ));
            }
        }
    }
}

/// Fallback path: lopdf text extraction, no tables or images.
fn read_text_only(bytes: &[u8]) -> Result<ExtractedContent, String> {
    let document =
        lopdf::Document::load_mem(bytes).map_err(|e| format!("cannot parse PDF: {e}"))?;
    let pages = document.get_pages();

    let mut text_chunks = Vec::new();
    for page_num in pages.keys() {
        match document.extract_text(&[*page_num]) {
            Ok(text) if !text.trim().is_empty() => text_chunks.push(text),
            Ok(_) => {}
            Err(e) => debug!(page = page_num, error = %e, "page text extraction failed"),
        }
    }

    Ok(ExtractedContent {
        text: text_chunks.join("\n"),
        paragraphs: Vec::new(),
        tables: Vec::new(),
        images: Vec::new(),
        engine: Some("lopdf_text_only".to_string()),
    })
}

// ── Table heuristics ─────────────────────────────────────────────────────

static INDICATOR_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\|\s*[\w\s]+\s*\|",             // pipe-delimited cells
        r"\+-+\+",                        // ASCII box borders
        r"[\w\s]+\s+\|\s+[\w\s]+",        // text with a pipe separator
        r"(?i)\b(table|tab\.?|tbl)\b",    // explicit table references
        r"\s{4,}[\w\s]+\s{4,}[\w\s]+",    // wide-space columns
        r"\t+[\w\s]+\t+[\w\s]+",          // tab columns
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

static RE_NUMBER_ROW: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+[,\d]*\s+\d+[,\d]*").unwrap());
static RE_WIDE_GAP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{3,}").unwrap());

/// Cheap scan deciding whether a page is worth a table-extraction pass.
pub(crate) fn has_table_indicators(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }

    if INDICATOR_PATTERNS.iter().any(|p| p.is_match(text)) {
        return true;
    }

    // Count table-like lines within the first 50 lines only, for speed.
    let mut table_like = 0;
    for line in text.lines().take(50) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.matches('|').count() >= 2
            || RE_WIDE_GAP.split(line).count() >= 3
            || RE_NUMBER_ROW.is_match(line)
        {
            table_like += 1;
        }
        if table_like >= 3 {
            return true;
        }
    }
    false
}

#[derive(PartialEq)]
enum RowKind {
    Pipe,
    Gap,
    Other,
}

/// Recover tables from page text by grouping consecutive pipe-delimited or
/// wide-gap-columned lines into grids. Runs shorter than two rows are
/// discarded as false positives.
pub(crate) fn scan_text_tables(text: &str, page_num: usize, start_index: usize) -> Vec<Table> {
    let mut tables = Vec::new();
    let mut run: Vec<Vec<String>> = Vec::new();
    let mut run_kind = RowKind::Other;

    let flush = |run: &mut Vec<Vec<String>>, tables: &mut Vec<Table>| {
        if run.len() >= 2 {
            tables.push(Table::from_grid(
                start_index + tables.len(),
                std::mem::take(run),
                Some(page_num),
            ));
        } else {
            run.clear();
        }
    };

    for line in text.lines() {
        let trimmed = line.trim();
        let (kind, cells) = classify_row(trimmed);
        if kind == RowKind::Other || cells.len() < 2 {
            flush(&mut run, &mut tables);
            run_kind = RowKind::Other;
            continue;
        }
        if kind != run_kind {
            flush(&mut run, &mut tables);
            run_kind = kind;
        }
        run.push(cells);
    }
    flush(&mut run, &mut tables);

    tables
}

fn classify_row(line: &str) -> (RowKind, Vec<String>) {
    if line.is_empty() {
        return (RowKind::Other, Vec::new());
    }
    if line.matches('|').count() >= 2 {
        let mut cells: Vec<String> = line.split('|').map(|c| c.trim().to_string()).collect();
        // "|a|b|" splits with empty edge cells.
        if cells.first().is_some_and(String::is_empty) {
            cells.remove(0);
        }
        if cells.last().is_some_and(String::is_empty) {
            cells.pop();
        }
        return (RowKind::Pipe, cells);
    }
    let gap_cells: Vec<String> = RE_WIDE_GAP
        .split(line)
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    if gap_cells.len() >= 3 {
        return (RowKind::Gap, gap_cells);
    }
    (RowKind::Other, Vec::new())
}
