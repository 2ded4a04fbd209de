//! Word-processor extraction: a single streaming pass over the container's
//! main document part, plus a walk of the embedded media entries.
//!
//! The container is a zip archive; `word/document.xml` holds body paragraphs
//! (`w:p` → `w:r` → `w:t` leaves) and tables (`w:tbl` → `w:tr` → `w:tc`).
//! The flat text view lists paragraphs in document order followed by each
//! table row pipe-joined — tables stay searchable from plain text.
//!
//! Corrupt media entries never abort extraction: the image becomes a
//! placeholder record describing the failure.

use crate::document::{ExtractedContent, ImageRecord, Table};
use crate::error::ProcessError;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Cursor, Read};
use tracing::{debug, warn};
use zip::ZipArchive;

const IMAGE_KIND: &str = "docx_embedded_image";

/// Extract text, tables, and embedded images from a Word container.
pub fn read(bytes: &[u8], filename: &str) -> Result<ExtractedContent, ProcessError> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|e| ProcessError::InvalidContainer {
            filename: filename.to_string(),
            detail: format!("not a zip archive: {e}"),
        })?;

    let document_xml =
        read_entry(&mut archive, "word/document.xml").map_err(|detail| {
            ProcessError::InvalidContainer {
                filename: filename.to_string(),
                detail,
            }
        })?;

    let mut content = parse_document_xml(&document_xml).map_err(|detail| {
        ProcessError::InvalidContainer {
            filename: filename.to_string(),
            detail,
        }
    })?;

    content.images = extract_media(&mut archive);
    debug!(
        paragraphs = content.paragraphs.len(),
        tables = content.tables.len(),
        images = content.images.len(),
        "word extraction complete"
    );
    Ok(content)
}

fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<Vec<u8>, String> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| format!("missing '{name}': {e}"))?;
    let mut data = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut data)
        .map_err(|e| format!("unreadable '{name}': {e}"))?;
    Ok(data)
}

/// Walk the main document part, collecting paragraphs and tables in
/// document order.
fn parse_document_xml(xml: &[u8]) -> Result<ExtractedContent, String> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    // Flat text lines: paragraphs, then pipe-joined rows per table.
    let mut flat: Vec<String> = Vec::new();
    let mut paragraphs: Vec<String> = Vec::new();
    let mut tables: Vec<Table> = Vec::new();

    let mut table_depth = 0usize;
    let mut in_text = false;
    let mut paragraph = String::new();
    let mut cell = String::new();
    let mut row: Vec<String> = Vec::new();
    let mut grid: Vec<Vec<String>> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"tbl" => {
                    table_depth += 1;
                    if table_depth == 1 {
                        grid.clear();
                    }
                }
                b"tr" if table_depth == 1 => row.clear(),
                b"tc" if table_depth == 1 => cell.clear(),
                b"p" if table_depth == 0 => paragraph.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"tbl" => {
                    table_depth = table_depth.saturating_sub(1);
                    if table_depth == 0 && !grid.is_empty() {
                        for r in &grid {
                            flat.push(r.join(" | "));
                        }
                        tables.push(Table::from_grid(tables.len(), std::mem::take(&mut grid), None));
                    }
                }
                b"tr" if table_depth == 1 => grid.push(std::mem::take(&mut row)),
                b"tc" if table_depth == 1 => row.push(std::mem::take(&mut cell)),
                b"p" if table_depth == 0 => {
                    flat.push(paragraph.clone());
                    if !paragraph.trim().is_empty() {
                        paragraphs.push(paragraph.clone());
                    }
                }
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let piece = t.unescape().map_err(|e| format!("bad text node: {e}"))?;
                if table_depth > 0 {
                    cell.push_str(&piece);
                } else {
                    paragraph.push_str(&piece);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(format!("malformed document xml: {e}")),
        }
        buf.clear();
    }

    Ok(ExtractedContent {
        text: flat.join("\n"),
        paragraphs,
        tables,
        images: Vec::new(),
        engine: None,
    })
}

/// Collect raw bytes for every `word/media/*` entry.
fn extract_media(archive: &mut ZipArchive<Cursor<&[u8]>>) -> Vec<ImageRecord> {
    let mut images = Vec::new();
    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(e) => e,
            Err(_) => continue,
        };
        let name = entry.name().to_string();
        if !name.starts_with("word/media/") || name.ends_with('/') {
            continue;
        }

        let mut data = Vec::with_capacity(entry.size() as usize);
        match entry.read_to_end(&mut data) {
            Ok(_) => images.push(ImageRecord {
                kind: IMAGE_KIND.to_string(),
                description: format!("Embedded image {name}"),
                format: detect_format(&data),
                data,
                extracted_text: String::new(),
                ocr_applied: false,
            }),
            Err(e) => {
                warn!(entry = %name, error = %e, "unreadable media entry");
                images.push(ImageRecord::placeholder(
                    IMAGE_KIND,
                    format!("Embedded image {name} (extraction failed)"),
                    format!("[Image extraction failed: {e}]"),
                ));
            }
        }
    }
    images
}

/// Detect an image format name from its magic bytes.
pub(crate) fn detect_format(data: &[u8]) -> String {
    image::guess_format(data)
        .map(|f| format!("{f:?}").to_lowercase())
        .unwrap_or_else(|_| "unknown".to_string())
}
