//! Content transforms: anonymization and PII redaction.
//!
//! Two independent, composable transforms applied to every text unit:
//!
//! * **Anonymize** — case-insensitive substitution of caller-supplied literal
//!   terms, compiled once per request into a single alternation so a
//!   substitution near a term boundary is never double-processed.
//! * **Remove-PII** — a fixed regex pass (email, phone, SSN, credit card,
//!   IBAN) replacing matches with the sentinel, optionally followed by
//!   model-based entity redaction. Entity spans are offsets into the text
//!   *before* any replacement, sorted and applied in one left-to-right
//!   rebuild — substring-replace-by-text would double-redact repeated names.
//!
//! Word documents are transformed at the container level: every text-bearing
//! leaf of the main document, header, and footer parts is collected, batch
//! transformed (one recognizer call per part), and written back only where
//! changed. Any container failure returns the original bytes untouched.

use crate::capabilities::{EntityLabel, EntityRecognizer};
use crate::config::Options;
use crate::document::NerMode;
use once_cell::sync::Lazy;
use quick_xml::events::{BytesText, Event};
use quick_xml::{Reader, Writer};
use regex::{NoExpand, Regex, RegexBuilder};
use std::io::{Cursor, Read, Write};
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

/// Fixed placeholder substituted for every detected piece of PII.
pub const PII_SENTINEL: &str = "[PII_REMOVED]";

static PII_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // email
        r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
        // phone (optional country code, common separators)
        r"\b(\+\d{1,2}\s?)?1?-?\.?\s?\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}\b",
        // SSN
        r"\b\d{3}-\d{2}-\d{4}\b",
        // credit card
        r"\b\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b",
        // IBAN-like
        r"\b[A-Z]{2}\d{2}[\s-]?[A-Z\d]{4}[\s-]?[A-Z\d]{4}[\s-]?[A-Z\d]{4}[\s-]?[A-Z\d]{1,4}\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

/// Which transform a batch call applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Anonymize,
    RemovePii,
}

/// Per-request term substitution, compiled once.
#[derive(Debug, Clone)]
pub struct Anonymizer {
    pattern: Option<Regex>,
    replacement: String,
}

impl Anonymizer {
    /// Compile the normalized term list into a single case-insensitive
    /// alternation. An empty replacement becomes a single space so adjacent
    /// words are not glued together.
    pub fn from_options(options: &Options) -> Self {
        let pattern = if options.anonymize_terms.is_empty() {
            None
        } else {
            let alternation = options
                .anonymize_terms
                .iter()
                .map(|t| regex::escape(t))
                .collect::<Vec<_>>()
                .join("|");
            match RegexBuilder::new(&alternation).case_insensitive(true).build() {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(error = %e, "anonymization pattern failed to compile, terms ignored");
                    None
                }
            }
        };
        let replacement = if options.anonymize_replace.is_empty() {
            " ".to_string()
        } else {
            options.anonymize_replace.clone()
        };
        Self {
            pattern,
            replacement,
        }
    }

    pub fn apply(&self, text: &str) -> String {
        match &self.pattern {
            Some(re) => re
                .replace_all(text, NoExpand(&self.replacement))
                .into_owned(),
            None => text.to_string(),
        }
    }
}

/// Regex-only PII pass: every pattern match becomes the sentinel.
pub fn remove_pii_fast(text: &str) -> String {
    PII_PATTERNS.iter().fold(text.to_string(), |acc, pattern| {
        pattern.replace_all(&acc, PII_SENTINEL).into_owned()
    })
}

/// Redact recognizer spans in one left-to-right rebuild.
///
/// Spans are byte offsets into `text`; out-of-bounds, non-boundary, and
/// overlapping spans are skipped rather than corrupting neighbours.
pub fn apply_entity_spans(text: &str, spans: &[crate::capabilities::EntitySpan]) -> String {
    let mut targets: Vec<(usize, usize)> = spans
        .iter()
        .filter(|s| {
            matches!(
                s.label,
                EntityLabel::Person | EntityLabel::Org | EntityLabel::Gpe
            )
        })
        .filter(|s| {
            s.start < s.end
                && s.end <= text.len()
                && text.is_char_boundary(s.start)
                && text.is_char_boundary(s.end)
        })
        .map(|s| (s.start, s.end))
        .collect();
    if targets.is_empty() {
        return text.to_string();
    }
    targets.sort_unstable();

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (start, end) in targets {
        if start < last {
            continue;
        }
        out.push_str(&text[last..start]);
        out.push_str(PII_SENTINEL);
        last = end;
    }
    out.push_str(&text[last..]);
    out
}

/// The per-request transform chain.
///
/// Holds the compiled anonymizer and the optional recognizer handle; which
/// stages actually run is decided by the operation and the throughput flag.
pub struct ContentTransformer<'a> {
    anonymizer: Anonymizer,
    recognizer: Option<&'a dyn EntityRecognizer>,
    throughput_mode: bool,
}

impl<'a> ContentTransformer<'a> {
    pub fn new(
        options: &Options,
        recognizer: Option<&'a dyn EntityRecognizer>,
    ) -> Self {
        Self {
            anonymizer: Anonymizer::from_options(options),
            recognizer,
            throughput_mode: options.throughput_mode,
        }
    }

    /// Which redaction stages remove-PII runs with this configuration.
    pub fn ner_mode(&self) -> NerMode {
        if self.throughput_mode || self.recognizer.is_none() {
            NerMode::RegexOnly
        } else {
            NerMode::ModelBatch
        }
    }

    /// Apply one operation to a whole-document text.
    pub fn transform_text(&self, text: &str, operation: Operation) -> String {
        self.transform_batch(&[text.to_string()], operation)
            .pop()
            .unwrap_or_else(|| text.to_string())
    }

    /// Apply one operation to a batch of text units.
    ///
    /// The batch shape lets model-backed recognizers amortize inference over
    /// every text-bearing node of a document in one call.
    pub fn transform_batch(&self, texts: &[String], operation: Operation) -> Vec<String> {
        match operation {
            Operation::Anonymize => texts.iter().map(|t| self.anonymizer.apply(t)).collect(),
            Operation::RemovePii => {
                let cleaned: Vec<String> =
                    texts.iter().map(|t| remove_pii_fast(t)).collect();
                let Some(recognizer) = self.recognizer else {
                    return cleaned;
                };
                if self.ner_mode() == NerMode::RegexOnly {
                    return cleaned;
                }
                match recognizer.recognize_batch(&cleaned) {
                    Ok(span_lists) if span_lists.len() == cleaned.len() => cleaned
                        .iter()
                        .zip(span_lists)
                        .map(|(text, spans)| apply_entity_spans(text, &spans))
                        .collect(),
                    Ok(span_lists) => {
                        warn!(
                            expected = cleaned.len(),
                            got = span_lists.len(),
                            "recognizer batch shape mismatch, keeping regex output"
                        );
                        cleaned
                    }
                    Err(e) => {
                        warn!(error = %e, "entity recognition failed, keeping regex output");
                        cleaned
                    }
                }
            }
        }
    }

    /// Transform a Word container at the markup level.
    ///
    /// Every `word/document.xml`, `word/header*.xml`, and `word/footer*.xml`
    /// entry has its `w:t` leaf texts batch-transformed and written back;
    /// all other entries are copied verbatim. Any failure returns the
    /// original bytes so the document is never lost to a transform error.
    pub fn transform_container(&self, bytes: &[u8], operation: Operation) -> Vec<u8> {
        match self.try_transform_container(bytes, operation) {
            Ok(rebuilt) => rebuilt,
            Err(detail) => {
                warn!(%detail, "container transform failed, keeping original bytes");
                bytes.to_vec()
            }
        }
    }

    fn try_transform_container(
        &self,
        bytes: &[u8],
        operation: Operation,
    ) -> Result<Vec<u8>, String> {
        let mut archive =
            ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("not a zip archive: {e}"))?;
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();

        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| format!("entry {index}: {e}"))?;
            let name = entry.name().to_string();

            if entry.is_dir() {
                writer
                    .add_directory(name, options)
                    .map_err(|e| format!("directory: {e}"))?;
                continue;
            }

            let mut data = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut data)
                .map_err(|e| format!("read '{name}': {e}"))?;

            if is_text_part(&name) {
                data = self.transform_xml_part(&data, operation)?;
            }

            writer
                .start_file(name, options)
                .map_err(|e| format!("start entry: {e}"))?;
            writer
                .write_all(&data)
                .map_err(|e| format!("write entry: {e}"))?;
        }

        writer
            .finish()
            .map(|cursor| cursor.into_inner())
            .map_err(|e| format!("finalize archive: {e}"))
    }

    /// Rewrite one XML part: collect every `w:t` leaf text, transform the
    /// batch, and re-emit the event stream with only the changed leaves
    /// replaced.
    fn transform_xml_part(&self, xml: &[u8], operation: Operation) -> Result<Vec<u8>, String> {
        let mut reader = Reader::from_reader(xml);
        let mut buf = Vec::new();
        let mut events: Vec<Event<'static>> = Vec::new();
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Eof) => break,
                Ok(event) => events.push(event.into_owned()),
                Err(e) => return Err(format!("malformed xml: {e}")),
            }
            buf.clear();
        }

        // Pass 1: locate text leaves.
        let mut in_text = false;
        let mut leaf_indices = Vec::new();
        let mut leaf_texts = Vec::new();
        for (index, event) in events.iter().enumerate() {
            match event {
                Event::Start(e) if e.local_name().as_ref() == b"t" => in_text = true,
                Event::End(e) if e.local_name().as_ref() == b"t" => in_text = false,
                Event::Text(t) if in_text => {
                    let text = t
                        .unescape()
                        .map_err(|e| format!("bad text node: {e}"))?
                        .into_owned();
                    leaf_indices.push(index);
                    leaf_texts.push(text);
                }
                _ => {}
            }
        }

        let processed = self.transform_batch(&leaf_texts, operation);
        let mut changed: std::collections::HashMap<usize, String> =
            std::collections::HashMap::new();
        for ((index, original), new) in leaf_indices.iter().zip(&leaf_texts).zip(processed) {
            if *original != new {
                changed.insert(*index, new);
            }
        }
        debug!(leaves = leaf_indices.len(), changed = changed.len(), "xml part transformed");

        // Pass 2: re-emit, substituting changed leaves.
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        for (index, event) in events.into_iter().enumerate() {
            let out_event = match changed.get(&index) {
                Some(new_text) => Event::Text(BytesText::new(new_text).into_owned()),
                None => event,
            };
            writer
                .write_event(out_event)
                .map_err(|e| format!("write xml: {e}"))?;
        }
        Ok(writer.into_inner().into_inner())
    }
}

fn is_text_part(name: &str) -> bool {
    name == "word/document.xml"
        || (name.starts_with("word/header") && name.ends_with(".xml"))
        || (name.starts_with("word/footer") && name.ends_with(".xml"))
}
