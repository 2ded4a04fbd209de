//! OCR orchestration: admissibility filtering, per-document cost bounding,
//! and bounded-concurrency dispatch to the external engine.
//!
//! OCR is the unbounded-cost operation of the pipeline, so three guards run
//! before any engine call:
//!
//! 1. **Mode gates** — throughput mode or a disabled flag skips every image
//!    with a reason; no engine call at all.
//! 2. **Admissibility heuristic** — tiny images, blank/near-blank images,
//!    and images with almost no dark pixels cannot contain readable glyphs;
//!    rejecting them costs a decode, not an inference.
//! 3. **Per-document cap** — once the cap is reached, remaining images are
//!    marked skipped rather than queued.
//!
//! Admissible images are dispatched to a small pool of scoped worker
//! threads. An OCR failure on one image never fails the document: it becomes
//! a placeholder message and a skip counter increment.

use crate::capabilities::OcrEngine;
use crate::document::{ImageRecord, OcrSummary};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use tracing::{debug, warn};

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Aggregate counters for one document's OCR pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct OcrOutcome {
    pub processed: usize,
    pub skipped: usize,
}

/// Per-request OCR orchestrator.
pub struct OcrOrchestrator<'a> {
    engine: Option<&'a dyn OcrEngine>,
    ocr_enabled: bool,
    throughput_mode: bool,
    max_images_per_doc: usize,
    workers: usize,
}

impl<'a> OcrOrchestrator<'a> {
    pub fn new(
        engine: Option<&'a dyn OcrEngine>,
        ocr_enabled: bool,
        throughput_mode: bool,
        max_images_per_doc: usize,
        workers: usize,
    ) -> Self {
        Self {
            engine,
            ocr_enabled,
            throughput_mode,
            max_images_per_doc,
            workers: workers.max(1),
        }
    }

    /// Whether any engine call can happen under this configuration.
    pub fn effective_enabled(&self) -> bool {
        self.ocr_enabled && !self.throughput_mode && self.engine.is_some()
    }

    /// Summary skeleton for result metadata.
    pub fn summary(&self, outcome: OcrOutcome) -> OcrSummary {
        OcrSummary {
            engine: self
                .engine
                .map(|e| e.name().to_string())
                .unwrap_or_else(|| "unavailable".to_string()),
            images_processed: outcome.processed,
            images_skipped: outcome.skipped,
            max_images_per_doc: self.max_images_per_doc,
            enabled: self.effective_enabled(),
        }
    }

    /// Run OCR over a document's extracted images, in place.
    pub fn run(&self, images: &mut [ImageRecord]) -> OcrOutcome {
        if images.is_empty() {
            return OcrOutcome::default();
        }

        if self.throughput_mode || !self.ocr_enabled {
            let reason = if self.throughput_mode {
                "[OCR disabled in throughput mode]"
            } else {
                "[OCR disabled]"
            };
            return skip_all(images, reason);
        }

        let Some(engine) = self.engine else {
            return skip_all(images, "[OCR not available]");
        };

        // Queue admissible images up to the per-document cap.
        let mut outcome = OcrOutcome::default();
        let mut queued: Vec<usize> = Vec::new();
        for (index, image) in images.iter_mut().enumerate() {
            if queued.len() >= self.max_images_per_doc {
                image.extracted_text = "[OCR skipped: max images reached]".to_string();
                image.ocr_applied = false;
                outcome.skipped += 1;
                continue;
            }
            if image.data.is_empty() {
                image.extracted_text = "[OCR skipped: no image data]".to_string();
                image.ocr_applied = false;
                outcome.skipped += 1;
                continue;
            }
            if !should_apply_ocr(&image.data) {
                image.extracted_text = "[OCR skipped: low-text likelihood]".to_string();
                image.ocr_applied = false;
                outcome.skipped += 1;
                continue;
            }
            queued.push(index);
        }

        if queued.is_empty() {
            return outcome;
        }

        let results = self.dispatch(engine, images, &queued);
        for (slot, result) in results {
            let image = &mut images[queued[slot]];
            match result {
                Ok(text) => {
                    image.extracted_text = text;
                    image.ocr_applied = true;
                    outcome.processed += 1;
                }
                Err(detail) => {
                    image.extracted_text = format!("[OCR failed: {detail}]");
                    image.ocr_applied = false;
                    outcome.skipped += 1;
                }
            }
        }

        // A panicked worker returns no pairs for its jobs; those images must
        // still reach a terminal marker.
        for &index in &queued {
            let image = &mut images[index];
            if !image.ocr_applied && image.extracted_text.is_empty() {
                image.extracted_text = "[OCR failed: worker terminated]".to_string();
                outcome.skipped += 1;
            }
        }

        debug!(
            processed = outcome.processed,
            skipped = outcome.skipped,
            "OCR pass complete"
        );
        outcome
    }

    /// Recognize queued images on a small scoped worker pool.
    ///
    /// Workers pull jobs from a shared cursor; each returns its own
    /// `(slot, result)` pairs so no shared mutable state is needed.
    fn dispatch(
        &self,
        engine: &dyn OcrEngine,
        images: &[ImageRecord],
        queued: &[usize],
    ) -> Vec<(usize, Result<String, String>)> {
        let jobs: Vec<&[u8]> = queued.iter().map(|&i| images[i].data.as_slice()).collect();
        let worker_count = self.workers.min(jobs.len());
        let cursor = AtomicUsize::new(0);

        thread::scope(|scope| {
            let handles: Vec<_> = (0..worker_count)
                .map(|_| {
                    let cursor = &cursor;
                    let jobs = &jobs;
                    scope.spawn(move || {
                        let mut local = Vec::new();
                        loop {
                            let slot = cursor.fetch_add(1, Ordering::Relaxed);
                            if slot >= jobs.len() {
                                break;
                            }
                            local.push((slot, recognize_one(engine, jobs[slot])));
                        }
                        local
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|handle| match handle.join() {
                    Ok(local) => local,
                    Err(_) => {
                        warn!("OCR worker panicked; its jobs are reported as failed");
                        Vec::new()
                    }
                })
                .collect()
        })
    }
}

fn skip_all(images: &mut [ImageRecord], reason: &str) -> OcrOutcome {
    for image in images.iter_mut() {
        image.extracted_text = reason.to_string();
        image.ocr_applied = false;
    }
    OcrOutcome {
        processed: 0,
        skipped: images.len(),
    }
}

/// One engine call: decode to grayscale, recognize, normalize whitespace.
fn recognize_one(engine: &dyn OcrEngine, data: &[u8]) -> Result<String, String> {
    let decoded =
        image::load_from_memory(data).map_err(|e| format!("cannot decode image: {e}"))?;
    let gray = decoded.to_luma8();
    let fragments = engine.recognize(&gray).map_err(|e| e.to_string())?;
    let joined = fragments
        .iter()
        .map(|f| f.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let cleaned = clean_ocr_text(&joined);
    if cleaned.is_empty() {
        Ok("[No text detected in image]".to_string())
    } else {
        Ok(cleaned)
    }
}

/// Collapse runs of whitespace and trim.
pub(crate) fn clean_ocr_text(text: &str) -> String {
    RE_WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// Cheap pre-filter deciding whether an image is worth an engine call.
///
/// Rejects images below a minimum pixel area, blank/near-blank images
/// (near-zero intensity variance), and images whose downsampled dark-pixel
/// ratio says there are no readable glyphs. Undecodable bytes pass: the
/// engine call will surface the real failure.
pub(crate) fn should_apply_ocr(data: &[u8]) -> bool {
    let Ok(decoded) = image::load_from_memory(data) else {
        return true;
    };
    let gray = decoded.to_luma8();
    let (width, height) = gray.dimensions();
    if width < 32 || height < 32 || (width as u64 * height as u64) < 2000 {
        return false;
    }

    let pixels = gray.as_raw();
    let count = pixels.len() as f64;
    let mean = pixels.iter().map(|&p| p as f64).sum::<f64>() / count;
    let variance = pixels
        .iter()
        .map(|&p| {
            let d = p as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / count;
    if variance.sqrt() < 8.0 {
        return false;
    }

    let sample = image::imageops::resize(&gray, 64, 64, image::imageops::FilterType::Triangle);
    let dark = sample.as_raw().iter().filter(|&&p| p < 110).count();
    (dark as f64 / sample.as_raw().len() as f64) >= 0.01
}
