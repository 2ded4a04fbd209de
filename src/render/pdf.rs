//! Rewritten-document rendering via printpdf.
//!
//! printpdf 0.8 is data-oriented: a document is a list of `PdfPage`s, each a
//! `Vec<Op>` operation list, serialised by `PdfDocument::save`. Text flows
//! top-to-bottom in built-in Helvetica with simple word wrap; pages break
//! when the cursor reaches the bottom margin.
//!
//! The entry point [`render_document`] is an explicit fallback ladder:
//!
//! ```text
//! render_with_layout ──▶ render_text_only ──▶ render_error_document ──▶ raw bytes
//! (text + tables + images) (text only)        (single error page)
//! ```
//!
//! Each tier's failure feeds the next; the ladder itself never fails, so
//! rendering can never raise past the pipeline boundary.

use crate::document::{ImageRecord, Table};
use crate::render::is_noise_image;
use printpdf::{
    BuiltinFont, Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, PdfWarnMsg, Point, Pt, RawImage,
    RawImageData, RawImageFormat, TextItem, XObjectTransform,
};
use tracing::{debug, warn};

// US Letter.
const PAGE_W_MM: f32 = 215.9;
const PAGE_H_MM: f32 = 279.4;
const MARGIN_MM: f32 = 20.0;

const TITLE_PT: f32 = 16.0;
const HEADING_PT: f32 = 13.0;
const BODY_PT: f32 = 11.0;
const SMALL_PT: f32 = 10.0;

/// Display caps keeping the rendered document bounded.
const MAX_TABLE_ROWS: usize = 10;
const MAX_TABLE_COLS: usize = 6;
const MAX_CELL_CHARS: usize = 50;
const MAX_IMAGE_WIDTH_PT: f32 = 400.0;
const IMAGE_DPI: f32 = 150.0;

/// Inputs for one rendered document.
pub struct RenderInput<'a> {
    pub filename: &'a str,
    /// Transformed document text; each non-empty line becomes a flow block.
    pub text: &'a str,
    pub tables: &'a [Table],
    pub images: &'a [ImageRecord],
    pub noise_markers: &'a [String],
}

/// Render the document, degrading through the ladder on failure. Infallible.
pub fn render_document(input: &RenderInput) -> Vec<u8> {
    match render_with_layout(input) {
        Ok(bytes) => bytes,
        Err(detail) => {
            warn!(%detail, "layout render failed, falling back to text-only");
            match render_text_only(input.text, input.filename) {
                Ok(bytes) => bytes,
                Err(fallback_detail) => {
                    warn!(%fallback_detail, "text-only render failed, producing error document");
                    render_error_document(&format!("{detail}; {fallback_detail}"))
                }
            }
        }
    }
}

/// Full render: reflowed text, capped tables, image gallery.
fn render_with_layout(input: &RenderInput) -> Result<Vec<u8>, String> {
    let mut doc = PdfDocument::new(&format!("Processed Document: {}", input.filename));
    let mut flow = PageFlow::new();

    write_header(&mut flow, input.filename);
    write_body_text(&mut flow, input.text);

    if !input.tables.is_empty() {
        flow.spacer(12.0);
        flow.text_line("Extracted Tables:", HEADING_PT);
        flow.spacer(4.0);
        for (display_index, table) in input.tables.iter().enumerate() {
            write_table(&mut flow, display_index, table);
        }
    }

    let visible_images: Vec<&ImageRecord> = input
        .images
        .iter()
        .filter(|img| !img.data.is_empty())
        .filter(|img| !is_noise_image(img, input.noise_markers))
        .collect();
    if !visible_images.is_empty() {
        flow.spacer(12.0);
        flow.text_line("Extracted Images:", HEADING_PT);
        flow.spacer(4.0);
        for (display_index, image) in visible_images.iter().enumerate() {
            write_image(&mut flow, &mut doc, display_index, image);
        }
    }

    Ok(finish(doc, flow))
}

/// Text-only fallback: header plus reflowed paragraphs, nothing else.
fn render_text_only(text: &str, filename: &str) -> Result<Vec<u8>, String> {
    let doc = PdfDocument::new(&format!("Processed Document: {filename}"));
    let mut flow = PageFlow::new();
    write_header(&mut flow, filename);
    write_body_text(&mut flow, text);
    Ok(finish(doc, flow))
}

/// Last rung before raw bytes: a single page describing the failure.
pub fn render_error_document(detail: &str) -> Vec<u8> {
    let build = || -> Vec<u8> {
        let doc = PdfDocument::new("Document Generation Error");
        let mut flow = PageFlow::new();
        flow.text_line("Document Generation Error", TITLE_PT);
        flow.spacer(8.0);
        for line in wrap_text(&format!("Error: {detail}"), flow.max_chars_per_line()) {
            flow.text_line(&line, BODY_PT);
        }
        finish(doc, flow)
    };
    let bytes = build();
    if bytes.is_empty() {
        format!("PDF generation failed: {detail}").into_bytes()
    } else {
        bytes
    }
}

fn write_header(flow: &mut PageFlow, filename: &str) {
    flow.text_line(&format!("Processed Document: {filename}"), TITLE_PT);
    flow.spacer(6.0);
    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    flow.text_line(&format!("Processed on: {timestamp}"), SMALL_PT);
    flow.spacer(10.0);
}

fn write_body_text(flow: &mut PageFlow, text: &str) {
    let max_chars = flow.max_chars_per_line();
    for paragraph in text.lines() {
        if paragraph.trim().is_empty() {
            continue;
        }
        for line in wrap_text(paragraph, max_chars) {
            flow.text_line(&line, BODY_PT);
        }
        flow.spacer(4.0);
    }
}

/// One table, capped to the display limits, rendered as pipe-joined rows.
fn write_table(flow: &mut PageFlow, display_index: usize, table: &Table) {
    let label = match table.page {
        Some(page) => format!("Table {} (page {page}):", display_index + 1),
        None => format!("Table {}:", display_index + 1),
    };
    flow.text_line(&label, BODY_PT);

    for row in table.data.iter().take(MAX_TABLE_ROWS) {
        let cells: Vec<String> = row
            .iter()
            .take(MAX_TABLE_COLS)
            .map(|cell| {
                let trimmed: String = cell.chars().take(MAX_CELL_CHARS).collect();
                trimmed
            })
            .collect();
        flow.text_line(&cells.join(" | "), SMALL_PT);
    }
    if table.data.len() > MAX_TABLE_ROWS {
        flow.text_line(
            &format!("… {} more rows", table.data.len() - MAX_TABLE_ROWS),
            SMALL_PT,
        );
    }
    flow.spacer(8.0);
}

/// One gallery image, downscaled to the maximum display width. A decode
/// failure degrades to a placeholder line, never an error.
fn write_image(flow: &mut PageFlow, doc: &mut PdfDocument, display_index: usize, image: &ImageRecord) {
    if !image.description.is_empty() {
        flow.text_line(
            &format!("Image {}: {}", display_index + 1, image.description),
            SMALL_PT,
        );
        flow.spacer(2.0);
    }

    let decoded = match image::load_from_memory(&image.data) {
        Ok(img) => img,
        Err(e) => {
            debug!(error = %e, "gallery image failed to decode");
            flow.text_line("[image could not be rendered]", SMALL_PT);
            flow.spacer(6.0);
            return;
        }
    };

    let rgb = decoded.to_rgb8();
    let (px_w, px_h) = rgb.dimensions();
    let raw = RawImage {
        pixels: RawImageData::U8(rgb.into_raw()),
        width: px_w as usize,
        height: px_h as usize,
        data_format: RawImageFormat::RGB8,
        tag: Vec::new(),
    };
    let xobject_id = doc.add_image(&raw);

    let native_w_pt = px_w as f32 / IMAGE_DPI * 72.0;
    let native_h_pt = px_h as f32 / IMAGE_DPI * 72.0;
    let scale = (MAX_IMAGE_WIDTH_PT / native_w_pt).min(1.0);
    let rendered_h_pt = native_h_pt * scale;

    flow.ensure_space(rendered_h_pt);
    flow.y_pt -= rendered_h_pt;
    flow.ops.push(Op::UseXobject {
        id: xobject_id,
        transform: XObjectTransform {
            translate_x: Some(Pt(flow.margin_pt)),
            translate_y: Some(Pt(flow.y_pt)),
            scale_x: Some(scale),
            scale_y: Some(scale),
            dpi: Some(IMAGE_DPI),
            rotate: None,
        },
    });
    flow.spacer(10.0);
}

fn finish(mut doc: PdfDocument, mut flow: PageFlow) -> Vec<u8> {
    flow.break_page();
    if flow.pages.is_empty() {
        flow.pages
            .push(PdfPage::new(Mm(PAGE_W_MM), Mm(PAGE_H_MM), Vec::new()));
    }
    doc.with_pages(flow.pages);
    let mut warnings: Vec<PdfWarnMsg> = Vec::new();
    doc.save(&PdfSaveOptions::default(), &mut warnings)
}

// ── Page flow ────────────────────────────────────────────────────────────

/// Top-down layout cursor over a growing list of pages.
struct PageFlow {
    pages: Vec<PdfPage>,
    ops: Vec<Op>,
    y_pt: f32,
    margin_pt: f32,
    page_h_pt: f32,
}

impl PageFlow {
    fn new() -> Self {
        let margin_pt = Mm(MARGIN_MM).into_pt().0;
        let page_h_pt = Mm(PAGE_H_MM).into_pt().0;
        Self {
            pages: Vec::new(),
            ops: Vec::new(),
            y_pt: page_h_pt - margin_pt,
            margin_pt,
            page_h_pt,
        }
    }

    /// Helvetica at body size, approximate glyph width 0.5 em.
    fn max_chars_per_line(&self) -> usize {
        let usable_mm = PAGE_W_MM - 2.0 * MARGIN_MM;
        let char_mm = 0.50 * BODY_PT * 0.3528;
        ((usable_mm / char_mm) as usize).max(20)
    }

    fn break_page(&mut self) {
        let ops = std::mem::take(&mut self.ops);
        if !ops.is_empty() {
            self.pages
                .push(PdfPage::new(Mm(PAGE_W_MM), Mm(PAGE_H_MM), ops));
        }
        self.y_pt = self.page_h_pt - self.margin_pt;
    }

    fn ensure_space(&mut self, needed_pt: f32) {
        if self.y_pt - needed_pt < self.margin_pt {
            self.break_page();
        }
    }

    fn spacer(&mut self, pt: f32) {
        self.y_pt -= pt;
    }

    fn text_line(&mut self, text: &str, size_pt: f32) {
        let line_height = size_pt * 1.3;
        self.ensure_space(line_height);
        self.y_pt -= line_height;
        self.ops.push(Op::StartTextSection);
        self.ops.push(Op::SetTextCursor {
            pos: Point {
                x: Pt(self.margin_pt),
                y: Pt(self.y_pt),
            },
        });
        self.ops.push(Op::SetFontSizeBuiltinFont {
            size: Pt(size_pt),
            font: BuiltinFont::Helvetica,
        });
        self.ops.push(Op::WriteTextBuiltinFont {
            items: vec![TextItem::Text(text.to_string())],
            font: BuiltinFont::Helvetica,
        });
        self.ops.push(Op::EndTextSection);
    }
}

/// Word-wrap a line to `max_width` characters; oversized words are
/// force-broken.
fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return vec![String::new()];
    }

    let mut lines = Vec::new();
    let mut current = String::with_capacity(max_width);
    for word in words {
        if word.len() > max_width {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let mut rest = word;
            while rest.len() > max_width {
                let split_at = (0..=max_width)
                    .rev()
                    .find(|&i| rest.is_char_boundary(i))
                    .unwrap_or(0);
                if split_at == 0 {
                    break;
                }
                let (chunk, tail) = rest.split_at(split_at);
                lines.push(chunk.to_string());
                rest = tail;
            }
            current.push_str(rest);
        } else if current.is_empty() {
            current.push_str(word);
        } else if current.len() + 1 + word.len() <= max_width {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
