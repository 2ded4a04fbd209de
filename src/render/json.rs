//! JSON snapshot rendering: a fixed schema over the extracted content.

use crate::document::{ImageRecord, Table};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::io::Cursor;
use tracing::debug;

/// Source images above this many bytes are listed without pixel data.
const THUMBNAIL_SOURCE_LIMIT: usize = 10_000;

/// Thumbnail bounding box, pixels.
const THUMBNAIL_MAX_DIM: u32 = 100;

static RE_IMAGE_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[Image:\s*(.*?)\]|!\[(.*?)\]").unwrap());

/// Inputs for one snapshot.
pub struct SnapshotInput<'a> {
    pub filename: &'a str,
    /// Output extension of the source format (e.g. `".pdf"`).
    pub file_type: &'a str,
    /// Size of the original input, bytes.
    pub file_size: usize,
    /// Transformed document text.
    pub text: &'a str,
    pub tables: &'a [Table],
    pub images: &'a [ImageRecord],
    pub anonymized: bool,
    pub pii_removed: bool,
    pub noise_markers: &'a [String],
}

/// Render the snapshot as pretty-printed JSON.
pub fn render(input: &SnapshotInput) -> String {
    let snapshot = json!({
        "document_metadata": {
            "filename": input.filename,
            "file_type": input.file_type,
            "processing_date": chrono::Local::now().to_rfc3339(),
            "file_size": input.file_size,
        },
        "content": {
            "text": input.text,
            "tables": input.tables,
            "images": image_entries(input),
        },
        "processing_info": {
            "anonymized": input.anonymized,
            "pii_removed": input.pii_removed,
            "extracted_to_json": true,
        },
    });
    serde_json::to_string_pretty(&snapshot).unwrap_or_else(|_| "{}".to_string())
}

fn image_entries(input: &SnapshotInput) -> Vec<Value> {
    let mut entries: Vec<Value> = Vec::new();

    for image in input.images {
        let mut entry = json!({
            "type": image.kind,
            "description": image.description,
            "extracted_text": image.extracted_text,
            "ocr_applied": image.ocr_applied,
            "image_format": image.format,
        });
        if let Some(thumbnail) = thumbnail_base64(image) {
            entry["thumbnail"] = Value::String(thumbnail);
        }
        entries.push(entry);
    }

    // References in the document text that no extracted image describes.
    for captures in RE_IMAGE_REF.captures_iter(input.text) {
        let alt = captures
            .get(1)
            .or_else(|| captures.get(2))
            .map(|m| m.as_str().trim())
            .unwrap_or("");
        if alt.is_empty() {
            continue;
        }
        let already_known = entries
            .iter()
            .any(|e| e["description"].as_str() == Some(alt));
        if already_known {
            continue;
        }
        entries.push(json!({
            "type": "referenced_image",
            "description": alt,
            "extracted_text": format!("Referenced image: {alt}"),
            "ocr_applied": false,
        }));
    }

    let before = entries.len();
    let kept: Vec<Value> = entries
        .into_iter()
        .filter(|entry| {
            let text = entry["extracted_text"]
                .as_str()
                .unwrap_or("")
                .trim()
                .to_lowercase();
            text.is_empty()
                || !input
                    .noise_markers
                    .iter()
                    .any(|m| m.to_lowercase() == text)
        })
        .collect();
    if kept.len() < before {
        debug!(dropped = before - kept.len(), "noise images excluded from snapshot");
    }
    kept
}

/// Base64 PNG thumbnail for small source images; `None` for large images,
/// placeholders, and anything that will not decode.
fn thumbnail_base64(image: &ImageRecord) -> Option<String> {
    if image.data.is_empty() || image.data.len() >= THUMBNAIL_SOURCE_LIMIT {
        return None;
    }
    let decoded = image::load_from_memory(&image.data).ok()?;
    let thumb = decoded.thumbnail(THUMBNAIL_MAX_DIM, THUMBNAIL_MAX_DIM);
    let mut buf = Vec::new();
    thumb
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .ok()?;
    Some(STANDARD.encode(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn small_png() -> Vec<u8> {
        let img = GrayImage::from_pixel(10, 10, Luma([128]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn image(text: &str, data: Vec<u8>) -> ImageRecord {
        ImageRecord {
            kind: "pdf_embedded_image".into(),
            description: "Image on page 1".into(),
            data,
            format: "png".into(),
            extracted_text: text.into(),
            ocr_applied: !text.is_empty(),
        }
    }

    fn snapshot(images: &[ImageRecord], text: &str, markers: &[String]) -> Value {
        let rendered = render(&SnapshotInput {
            filename: "doc.pdf",
            file_type: ".pdf",
            file_size: 1234,
            text,
            tables: &[],
            images,
            anonymized: true,
            pii_removed: false,
            noise_markers: markers,
        });
        serde_json::from_str(&rendered).expect("valid JSON")
    }

    #[test]
    fn schema_has_fixed_sections() {
        let v = snapshot(&[], "hello", &[]);
        assert_eq!(v["document_metadata"]["filename"], "doc.pdf");
        assert_eq!(v["document_metadata"]["file_type"], ".pdf");
        assert_eq!(v["document_metadata"]["file_size"], 1234);
        assert!(v["document_metadata"]["processing_date"].is_string());
        assert_eq!(v["content"]["text"], "hello");
        assert_eq!(v["processing_info"]["anonymized"], true);
        assert_eq!(v["processing_info"]["pii_removed"], false);
        assert_eq!(v["processing_info"]["extracted_to_json"], true);
    }

    #[test]
    fn small_images_get_thumbnails_large_do_not() {
        let small = image("text", small_png());
        let large = image("text", vec![0u8; THUMBNAIL_SOURCE_LIMIT + 1]);
        let v = snapshot(&[small, large], "", &[]);
        let images = v["content"]["images"].as_array().unwrap();
        assert_eq!(images.len(), 2);
        assert!(images[0]["thumbnail"].is_string());
        assert!(images[1].get("thumbnail").is_none());
    }

    #[test]
    fn noise_marker_images_are_excluded() {
        let markers = vec!["logoco".to_string()];
        let v = snapshot(
            &[image("LogoCo", small_png()), image("keep me", small_png())],
            "",
            &markers,
        );
        let images = v["content"]["images"].as_array().unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0]["extracted_text"], "keep me");
    }

    #[test]
    fn referenced_images_are_appended_once() {
        let v = snapshot(&[], "See [Image: diagram] and ![diagram] again", &[]);
        let images = v["content"]["images"].as_array().unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0]["type"], "referenced_image");
        assert_eq!(images[0]["description"], "diagram");
    }

    #[test]
    fn tables_serialize_with_dimensions() {
        let tables = vec![Table::from_grid(
            0,
            vec![vec!["a".into(), "b".into()]],
            Some(3),
        )];
        let rendered = render(&SnapshotInput {
            filename: "t.pdf",
            file_type: ".pdf",
            file_size: 0,
            text: "",
            tables: &tables,
            images: &[],
            anonymized: false,
            pii_removed: false,
            noise_markers: &[],
        });
        let v: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(v["content"]["tables"][0]["rows"], 1);
        assert_eq!(v["content"]["tables"][0]["cols"], 2);
        assert_eq!(v["content"]["tables"][0]["page"], 3);
    }
}
