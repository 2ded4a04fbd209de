//! Output rendering: JSON snapshots and rewritten portable documents.
//!
//! Rendering must never raise past the pipeline boundary. The JSON renderer
//! is pure data assembly; the document renderer is an explicit fallback
//! ladder (`layout → text-only → error document → raw bytes`) whose entry
//! point is infallible.

pub mod json;
pub mod pdf;

use crate::document::ImageRecord;

/// Content-domain filter: an image whose OCR output matches a known
/// non-informative marker (a recurring logo artifact) is excluded from all
/// output, both rendered and JSON.
pub(crate) fn is_noise_image(image: &ImageRecord, markers: &[String]) -> bool {
    let text = image.extracted_text.trim().to_lowercase();
    !text.is_empty() && markers.iter().any(|m| m.to_lowercase() == text)
}
