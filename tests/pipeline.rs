//! End-to-end tests for the document pipeline and batch supervisor.
//!
//! External capabilities (OCR, entity recognition) are exercised through
//! injected stubs so every test runs hermetically — no models, no native
//! libraries, no network.

use docscrub::{
    BatchJob, BatchSupervisor, CancellationToken, CapabilityError, DocumentPipeline, EntityLabel,
    EntityRecognizer, EntitySpan, JobUpdate, NerMode, Options, OcrEngine, OcrFragment,
    PipelineConfig, ProcessingRequest, PII_SENTINEL,
};
use image::{GrayImage, Luma};
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

// ── Test doubles ─────────────────────────────────────────────────────────

/// OCR engine returning a fixed string per call, counting calls.
struct StubOcr {
    text: &'static str,
    calls: AtomicUsize,
}

impl StubOcr {
    fn new(text: &'static str) -> Arc<Self> {
        Arc::new(Self {
            text,
            calls: AtomicUsize::new(0),
        })
    }
}

impl OcrEngine for StubOcr {
    fn name(&self) -> &str {
        "stub-ocr"
    }

    fn recognize(&self, _image: &GrayImage) -> Result<Vec<OcrFragment>, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![OcrFragment {
            text: self.text.to_string(),
            confidence: Some(1.0),
            region: None,
        }])
    }
}

/// Recognizer labelling every occurrence of "Ada Lovelace" as PERSON.
struct StubNer;

impl EntityRecognizer for StubNer {
    fn name(&self) -> &str {
        "stub-ner"
    }

    fn recognize_batch(&self, texts: &[String]) -> Result<Vec<Vec<EntitySpan>>, CapabilityError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut spans = Vec::new();
                let needle = "Ada Lovelace";
                let mut from = 0;
                while let Some(pos) = text[from..].find(needle) {
                    let start = from + pos;
                    spans.push(EntitySpan {
                        start,
                        end: start + needle.len(),
                        label: EntityLabel::Person,
                    });
                    from = start + needle.len();
                }
                spans
            })
            .collect())
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────

/// PNG large and contrasty enough to pass the OCR admissibility heuristic.
fn texty_png() -> Vec<u8> {
    let mut img = GrayImage::from_pixel(128, 64, Luma([255]));
    for x in 0..128u32 {
        for y in 0..64u32 {
            if (x / 8) % 2 == 0 && (y / 8) % 2 == 0 {
                img.put_pixel(x, y, Luma([20]));
            }
        }
    }
    let mut buf = Vec::new();
    image::DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

/// Minimal docx container: one body paragraph per line, optional media.
fn build_docx(paragraphs: &[&str], media_count: usize) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{p}</w:t></w:r></w:p>"))
        .collect();
    let xml = format!(
        r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
    );

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    writer.start_file("word/document.xml", options).unwrap();
    writer.write_all(xml.as_bytes()).unwrap();
    let png = texty_png();
    for i in 0..media_count {
        writer
            .start_file(format!("word/media/image{i}.png"), options)
            .unwrap();
        writer.write_all(&png).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn json_text(result: &docscrub::ProcessingResult) -> String {
    let v: serde_json::Value =
        serde_json::from_slice(result.content.as_bytes()).expect("valid snapshot JSON");
    v["content"]["text"].as_str().unwrap_or_default().to_string()
}

// ── Pipeline scenarios ───────────────────────────────────────────────────

#[test]
fn remove_pii_scenario_from_text_file() {
    let pipeline = DocumentPipeline::new(PipelineConfig::default());
    let request = ProcessingRequest {
        remove_pii: true,
        extract_json: true,
        ..ProcessingRequest::default()
    };
    let result = pipeline
        .process(
            b"Contact sales@acme.com, call 555-123-4567",
            "contact.txt",
            &request,
        )
        .unwrap();

    let text = json_text(&result);
    assert_eq!(text.matches(PII_SENTINEL).count(), 2, "got: {text}");
    assert!(!text.contains('5'), "phone digits must be gone: {text}");
    assert_eq!(result.metadata.ner_mode, NerMode::RegexOnly);
}

#[test]
fn model_stage_redacts_entities_after_regex_stage() {
    let config = PipelineConfig::builder()
        .entity_recognizer(Arc::new(StubNer))
        .build()
        .unwrap();
    let pipeline = DocumentPipeline::new(config);
    let request = ProcessingRequest {
        remove_pii: true,
        extract_json: true,
        ..ProcessingRequest::default()
    };
    let result = pipeline
        .process(
            b"Ada Lovelace (ada@lovelace.org) met Ada Lovelace.",
            "ada.txt",
            &request,
        )
        .unwrap();

    let text = json_text(&result);
    assert!(!text.contains("Ada Lovelace"), "got: {text}");
    assert!(!text.contains("ada@lovelace.org"), "got: {text}");
    assert_eq!(result.metadata.ner_mode, NerMode::ModelBatch);
}

#[test]
fn throughput_mode_degrades_to_regex_only_and_skips_ocr() {
    let ocr = StubOcr::new("should never run");
    let config = PipelineConfig::builder()
        .ocr_engine(ocr.clone())
        .entity_recognizer(Arc::new(StubNer))
        .build()
        .unwrap();
    let pipeline = DocumentPipeline::new(config);
    let request = ProcessingRequest {
        remove_pii: true,
        extract_json: true,
        options: Options {
            throughput_mode: true,
            ..Options::default()
        },
        ..ProcessingRequest::default()
    };
    let docx = build_docx(&["Ada Lovelace wrote to a@b.io"], 2);
    let result = pipeline.process(&docx, "letter.docx", &request).unwrap();

    assert_eq!(result.metadata.ner_mode, NerMode::RegexOnly);
    assert!(!result.metadata.ocr.enabled);
    assert_eq!(result.metadata.ocr.images_processed, 0);
    assert_eq!(result.metadata.ocr.images_skipped, 2);
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);

    let text = json_text(&result);
    assert!(text.contains("Ada Lovelace"), "model stage must be off");
    assert!(!text.contains("a@b.io"), "regex stage must still run");
}

#[test]
fn ocr_budget_processes_exactly_the_cap() {
    let ocr = StubOcr::new("Invoice 42");
    let config = PipelineConfig::builder()
        .ocr_engine(ocr.clone())
        .ocr_max_images_per_doc(2)
        .build()
        .unwrap();
    let pipeline = DocumentPipeline::new(config);
    let request = ProcessingRequest {
        extract_json: true,
        ..ProcessingRequest::default()
    };
    let docx = build_docx(&["with five images"], 5);
    let result = pipeline.process(&docx, "imgs.docx", &request).unwrap();

    assert_eq!(result.metadata.ocr.images_processed, 2);
    assert_eq!(result.metadata.ocr.images_skipped, 3);
    assert_eq!(result.metadata.ocr.max_images_per_doc, 2);
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 2);
    assert_eq!(result.metadata.ocr.engine, "stub-ocr");
}

#[test]
fn ocr_text_lands_in_snapshot_images() {
    let config = PipelineConfig::builder()
        .ocr_engine(StubOcr::new("Total due: 99"))
        .build()
        .unwrap();
    let pipeline = DocumentPipeline::new(config);
    let request = ProcessingRequest {
        extract_json: true,
        ..ProcessingRequest::default()
    };
    let docx = build_docx(&["body"], 1);
    let result = pipeline.process(&docx, "inv.docx", &request).unwrap();

    let v: serde_json::Value = serde_json::from_slice(result.content.as_bytes()).unwrap();
    let images = v["content"]["images"].as_array().unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0]["extracted_text"], "Total due: 99");
    assert_eq!(images[0]["ocr_applied"], true);
}

#[test]
fn noise_marker_images_are_dropped_from_snapshot() {
    let config = PipelineConfig::builder()
        .ocr_engine(StubOcr::new("LogoCo"))
        .noise_ocr_markers(vec!["logoco".into()])
        .build()
        .unwrap();
    let pipeline = DocumentPipeline::new(config);
    let request = ProcessingRequest {
        extract_json: true,
        ..ProcessingRequest::default()
    };
    let docx = build_docx(&["body"], 1);
    let result = pipeline.process(&docx, "logo.docx", &request).unwrap();

    let v: serde_json::Value = serde_json::from_slice(result.content.as_bytes()).unwrap();
    assert_eq!(v["content"]["images"].as_array().unwrap().len(), 0);
}

#[test]
fn docx_scrub_produces_rewritten_pdf() {
    let pipeline = DocumentPipeline::new(PipelineConfig::default());
    let request = ProcessingRequest {
        anonymize: true,
        options: Options {
            anonymize_terms: vec!["Initech".into()],
            anonymize_replace: "[X]".into(),
            ..Options::default()
        },
        ..ProcessingRequest::default()
    };
    let docx = build_docx(&["Initech quarterly report"], 0);
    let result = pipeline.process(&docx, "q.docx", &request).unwrap();

    assert_eq!(result.extension, ".pdf");
    assert_eq!(&result.content.as_bytes()[..4], b"%PDF");
}

#[test]
fn cache_returns_identical_bytes_with_hit_flag() {
    let pipeline = DocumentPipeline::new(PipelineConfig::default());
    let request = ProcessingRequest {
        extract_json: true,
        ..ProcessingRequest::default()
    };

    let first = pipeline.process(b"same content", "s.txt", &request).unwrap();
    let second = pipeline.process(b"same content", "s.txt", &request).unwrap();

    assert!(!first.metadata.cache_hit);
    assert!(second.metadata.cache_hit);
    assert_eq!(first.content.as_bytes(), second.content.as_bytes());
    // Historical timing is preserved, not re-measured.
    assert_eq!(first.metadata.timing, second.metadata.timing);
}

// ── Batch scenarios ──────────────────────────────────────────────────────

fn batch_job(index: usize, filename: &str, bytes: &[u8]) -> BatchJob {
    BatchJob {
        index,
        filename: filename.to_string(),
        bytes: bytes.to_vec(),
        request: ProcessingRequest {
            extract_json: true,
            ..ProcessingRequest::default()
        },
    }
}

#[tokio::test]
async fn batch_preserves_submission_order() {
    let supervisor = BatchSupervisor::new(PipelineConfig::default()).with_max_parallelism(3);
    let jobs = vec![
        batch_job(0, "c.txt", b"third alphabetically"),
        batch_job(1, "a.txt", b"first"),
        batch_job(2, "b.txt", b"second"),
    ];
    let report = supervisor.run(jobs, CancellationToken::new()).await;

    assert_eq!(report.done, 3);
    let order: Vec<usize> = report.outcomes.iter().map(JobUpdate::index).collect();
    assert_eq!(order, vec![0, 1, 2]);
}

#[tokio::test]
async fn batch_partial_failure_is_normal() {
    let supervisor = BatchSupervisor::new(PipelineConfig::default()).with_max_parallelism(2);
    let jobs = vec![
        batch_job(0, "ok.txt", b"fine"),
        batch_job(1, "nope.xlsx", b"unsupported format"),
        batch_job(2, "broken.pdf", b"not really a pdf"),
        batch_job(3, "fine.txt", b"also fine"),
    ];
    let report = supervisor.run(jobs, CancellationToken::new()).await;

    assert_eq!(report.done, 2);
    assert_eq!(report.errors, 2);
    assert_eq!(report.cancelled, 0);
    assert_eq!(report.outcomes.len(), 4);
}

#[tokio::test]
async fn cancelled_batch_leaves_no_job_without_terminal_state() {
    let token = CancellationToken::new();
    token.cancel();

    let supervisor = BatchSupervisor::new(PipelineConfig::default()).with_max_parallelism(2);
    let jobs: Vec<BatchJob> = (0..8)
        .map(|i| batch_job(i, &format!("doc{i}.txt"), b"payload"))
        .collect();
    let report = supervisor.run(jobs, token).await;

    assert_eq!(report.cancelled, 8);
    assert_eq!(report.outcomes.len(), 8);
    assert!(report.outcomes.iter().all(JobUpdate::is_terminal));
}
