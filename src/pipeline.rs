//! Per-document orchestration: cache → read → OCR → transform → render →
//! cache store → metadata finalization.
//!
//! A pipeline is an explicit object constructed from [`PipelineConfig`], one
//! per worker. All per-call scratch state (stage timing, OCR counters) lives
//! on the stack of `process`; the only cross-call state is the result cache,
//! whose reuse across a session of calls is the point.
//!
//! ## Stage order
//!
//! ```text
//! fingerprint ──▶ cache? ──hit──▶ done
//!      │ miss
//!      ▼
//! (word + scrub: container transform)
//!      ▼
//! read ──▶ OCR ──▶ (text/pdf: text transform) ──▶ render ──▶ store ──▶ done
//! ```
//!
//! Word documents that need scrubbing are transformed at the container level
//! *before* extraction, so headers, footers, and table cells are covered and
//! the rewritten container is what extraction sees.

use crate::cache::{fingerprint, CacheStore};
use crate::config::{PipelineConfig, ProcessingRequest};
use crate::document::{
    DocumentFormat, Metadata, OutputContent, ProcessingResult,
};
use crate::error::ProcessError;
use crate::ocr::OcrOrchestrator;
use crate::reader;
use crate::render::json::SnapshotInput;
use crate::render::pdf::RenderInput;
use crate::transform::{ContentTransformer, Operation};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info};

/// The per-document processing pipeline.
pub struct DocumentPipeline {
    config: PipelineConfig,
    cache: Mutex<CacheStore>,
}

impl DocumentPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let cache = Mutex::new(CacheStore::new(config.max_cache_entries));
        Self { config, cache }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process one document.
    ///
    /// The input is borrowed read-only; the request is normalized before
    /// anything else so fingerprinting and substitution always see the same
    /// option record.
    pub fn process(
        &self,
        bytes: &[u8],
        filename: &str,
        request: &ProcessingRequest,
    ) -> Result<ProcessingResult, ProcessError> {
        let request = request.normalized();
        let options = &request.options;
        info!(%filename, anonymize = request.anonymize, remove_pii = request.remove_pii,
              extract_json = request.extract_json, "processing document");

        // ── Cache check ──────────────────────────────────────────────────
        let cache_key = (self.config.max_cache_entries > 0)
            .then(|| fingerprint(bytes, &request));
        if let Some(key) = &cache_key {
            if let Some(hit) = self.lock_cache()?.get(key) {
                debug!(%filename, "served from cache");
                return Ok(hit);
            }
        }

        let format = DocumentFormat::from_filename(filename)?;
        let mut timing: BTreeMap<String, f64> = BTreeMap::new();

        let transformer =
            ContentTransformer::new(options, self.config.entity_recognizer.as_deref());

        // ── Word containers are scrubbed at the markup level first ───────
        let effective_bytes: Cow<[u8]> =
            if format == DocumentFormat::Word && (request.anonymize || request.remove_pii) {
                let mut container = bytes.to_vec();
                if request.anonymize {
                    let start = Instant::now();
                    container = transformer.transform_container(&container, Operation::Anonymize);
                    record(&mut timing, "anonymize", start);
                }
                if request.remove_pii {
                    let start = Instant::now();
                    container = transformer.transform_container(&container, Operation::RemovePii);
                    record(&mut timing, "pii_removal", start);
                }
                Cow::Owned(container)
            } else {
                Cow::Borrowed(bytes)
            };

        // ── Extract ──────────────────────────────────────────────────────
        let mut content = reader::read_document(
            format,
            &effective_bytes,
            filename,
            self.config.header_footer_ratio,
            options.throughput_mode,
            &mut timing,
        )?;

        // ── OCR ──────────────────────────────────────────────────────────
        let orchestrator = OcrOrchestrator::new(
            self.config.ocr_engine.as_deref(),
            options.ocr_enabled,
            options.throughput_mode,
            self.config.ocr_max_images_per_doc,
            self.config.ocr_workers,
        );
        let ocr_outcome = if content.images.is_empty() {
            Default::default()
        } else {
            let start = Instant::now();
            let outcome = orchestrator.run(&mut content.images);
            record(&mut timing, "ocr", start);
            outcome
        };

        // ── Transform (whole-text formats) ───────────────────────────────
        let mut text = content.text.clone();
        if format != DocumentFormat::Word {
            if request.anonymize {
                let start = Instant::now();
                text = transformer.transform_text(&text, Operation::Anonymize);
                record(&mut timing, "anonymize", start);
            }
            if request.remove_pii {
                let start = Instant::now();
                text = transformer.transform_text(&text, Operation::RemovePii);
                record(&mut timing, "pii_removal", start);
            }
        }

        // ── Render ───────────────────────────────────────────────────────
        let (output, extension) = if request.extract_json {
            let start = Instant::now();
            let snapshot = crate::render::json::render(&SnapshotInput {
                filename,
                file_type: format.extension(),
                file_size: bytes.len(),
                text: &text,
                tables: &content.tables,
                images: &content.images,
                anonymized: request.anonymize,
                pii_removed: request.remove_pii,
                noise_markers: &self.config.noise_ocr_markers,
            });
            record(&mut timing, "render_json", start);
            (OutputContent::Text(snapshot), ".json".to_string())
        } else if request.anonymize || request.remove_pii {
            let start = Instant::now();
            let rendered = crate::render::pdf::render_document(&RenderInput {
                filename,
                text: &text,
                tables: &content.tables,
                images: &content.images,
                noise_markers: &self.config.noise_ocr_markers,
            });
            record(&mut timing, "render_pdf", start);
            (OutputContent::Bytes(rendered), ".pdf".to_string())
        } else {
            // No operation requested: the original bytes pass through.
            (
                OutputContent::Bytes(bytes.to_vec()),
                format.extension().to_string(),
            )
        };

        // ── Finalize ─────────────────────────────────────────────────────
        if options.verbose_logging {
            debug!(%filename, timing = ?timing, "stage timing");
        }
        let metadata = Metadata {
            timing,
            throughput_mode: options.throughput_mode,
            cache_hit: false,
            ner_mode: transformer.ner_mode(),
            ocr: orchestrator.summary(ocr_outcome),
            pdf_engine: content.engine.clone(),
            options: options.clone(),
        };
        let result = ProcessingResult {
            content: output,
            extension,
            metadata,
        };

        if let Some(key) = cache_key {
            self.lock_cache()?.put(key, &result);
        }
        info!(%filename, extension = %result.extension, bytes = result.content.len(),
              "document processed");
        Ok(result)
    }

    fn lock_cache(&self) -> Result<std::sync::MutexGuard<'_, CacheStore>, ProcessError> {
        self.cache
            .lock()
            .map_err(|_| ProcessError::Internal("result cache lock poisoned".into()))
    }
}

fn record(timing: &mut BTreeMap<String, f64>, key: &str, start: Instant) {
    *timing.entry(key.to_string()).or_insert(0.0) += start.elapsed().as_secs_f64();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;

    fn pipeline() -> DocumentPipeline {
        DocumentPipeline::new(PipelineConfig::default())
    }

    fn request(anonymize: bool, remove_pii: bool, extract_json: bool) -> ProcessingRequest {
        ProcessingRequest {
            anonymize,
            remove_pii,
            extract_json,
            options: Options {
                anonymize_terms: vec!["Acme".into()],
                anonymize_replace: "[REDACTED]".into(),
                ..Options::default()
            },
        }
    }

    #[test]
    fn passthrough_returns_original_bytes() {
        let p = pipeline();
        let result = p
            .process(b"hello Acme", "a.txt", &request(false, false, false))
            .unwrap();
        assert_eq!(result.content.as_bytes(), b"hello Acme");
        assert_eq!(result.extension, ".txt");
        assert!(!result.metadata.cache_hit);
    }

    #[test]
    fn anonymize_renders_pdf() {
        let p = pipeline();
        let result = p
            .process(b"Acme internal memo", "memo.txt", &request(true, false, false))
            .unwrap();
        assert_eq!(result.extension, ".pdf");
        assert_eq!(&result.content.as_bytes()[..4], b"%PDF");
        assert!(result.metadata.timing.contains_key("anonymize"));
        assert!(result.metadata.timing.contains_key("render_pdf"));
    }

    #[test]
    fn extract_json_wins_over_pdf_rewrite() {
        let p = pipeline();
        let result = p
            .process(
                b"Call 555-123-4567 at Acme",
                "contact.txt",
                &request(true, true, true),
            )
            .unwrap();
        assert_eq!(result.extension, ".json");
        let v: serde_json::Value =
            serde_json::from_str(std::str::from_utf8(result.content.as_bytes()).unwrap())
                .unwrap();
        let text = v["content"]["text"].as_str().unwrap();
        assert!(text.contains("[REDACTED]"));
        assert!(text.contains("[PII_REMOVED]"));
        assert!(!text.contains("555-123-4567"));
    }

    #[test]
    fn second_identical_call_is_a_cache_hit() {
        let p = pipeline();
        let req = request(false, false, true);
        let first = p.process(b"cache me", "c.txt", &req).unwrap();
        assert!(!first.metadata.cache_hit);

        let second = p.process(b"cache me", "c.txt", &req).unwrap();
        assert!(second.metadata.cache_hit);
        assert_eq!(first.content.as_bytes(), second.content.as_bytes());
    }

    #[test]
    fn zero_capacity_never_hits() {
        let config = PipelineConfig::builder().max_cache_entries(0).build().unwrap();
        let p = DocumentPipeline::new(config);
        let req = request(false, false, true);
        p.process(b"x", "x.txt", &req).unwrap();
        let again = p.process(b"x", "x.txt", &req).unwrap();
        assert!(!again.metadata.cache_hit);
    }

    #[test]
    fn differing_options_do_not_alias_cache_entries() {
        let p = pipeline();
        let req_a = request(true, false, true);
        let mut req_b = req_a.clone();
        req_b.options.anonymize_terms = vec!["Other".into()];

        p.process(b"Acme", "a.txt", &req_a).unwrap();
        let other = p.process(b"Acme", "a.txt", &req_b).unwrap();
        assert!(!other.metadata.cache_hit);
    }

    #[test]
    fn unsupported_extension_fails_the_job() {
        let p = pipeline();
        let err = p
            .process(b"bytes", "deck.pptx", &request(false, false, false))
            .unwrap_err();
        assert!(matches!(err, ProcessError::UnsupportedFormat { .. }));
    }

    #[test]
    fn metadata_reports_effective_options_and_modes() {
        let p = pipeline();
        let mut req = request(false, true, true);
        req.options.anonymize_terms =
            vec![" Acme ".into(), "acme".into(), "Beta".into()];
        let result = p.process(b"text", "m.txt", &req).unwrap();

        // Normalized terms, not the raw caller list.
        assert_eq!(
            result.metadata.options.anonymize_terms,
            vec!["Acme", "Beta"]
        );
        assert_eq!(result.metadata.ner_mode, crate::document::NerMode::RegexOnly);
        assert_eq!(result.metadata.ocr.engine, "unavailable");
        assert!(!result.metadata.ocr.enabled);
    }

    #[test]
    fn word_scrub_covers_container_text() {
        // Minimal docx with body text mentioning the term.
        use std::io::{Cursor, Write};
        use zip::write::SimpleFileOptions;
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("word/document.xml", SimpleFileOptions::default())
            .unwrap();
        writer
            .write_all(
                br#"<w:document xmlns:w="ns"><w:body><w:p><w:r><w:t>Acme ships today</w:t></w:r></w:p></w:body></w:document>"#,
            )
            .unwrap();
        let docx = writer.finish().unwrap().into_inner();

        let p = pipeline();
        let result = p
            .process(&docx, "memo.docx", &request(true, false, true))
            .unwrap();
        let v: serde_json::Value =
            serde_json::from_str(std::str::from_utf8(result.content.as_bytes()).unwrap())
                .unwrap();
        let text = v["content"]["text"].as_str().unwrap();
        assert!(text.contains("[REDACTED] ships today"), "got: {text}");
    }

    #[test]
    fn invalid_pdf_fails_with_extraction_error() {
        let p = pipeline();
        let err = p
            .process(b"not a pdf", "broken.pdf", &request(false, false, true))
            .unwrap_err();
        assert!(matches!(err, ProcessError::Extraction { .. }));
    }
}
