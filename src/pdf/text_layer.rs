use anyhow::{anyhow, Context, Result};
use lopdf::content::Operation;
use lopdf::{Dictionary, Document, Encoding, Object, ObjectId};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::{SourcePage, TextLayer, TextRun};

type Matrix = [f32; 6];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];
const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];
const DEFAULT_GLYPH_WIDTH: f32 = 500.0;
const COMPOSITE_GLYPH_EM: f32 = 0.5;
/// `TJ` adjustments wider than this (thousandths of an em) read as a word gap.
const SPACE_KERNING: f32 = 200.0;
const MAX_INHERIT_DEPTH: usize = 32;

/// Native text layer read with `lopdf`.
pub struct LopdfTextLayer {
    doc: Document,
    pages: Vec<ObjectId>,
}

impl LopdfTextLayer {
    pub fn load(bytes: &[u8]) -> Result<Self> {
        let doc = Document::load_mem(bytes).with_context(|| "failed to parse pdf")?;
        let pages = doc.get_pages().into_values().collect::<Vec<_>>();
        debug!("loaded pdf with {} page(s)", pages.len());
        Ok(Self { doc, pages })
    }

    fn page_fonts(&self, page_id: ObjectId) -> Result<BTreeMap<Vec<u8>, PageFont<'_>>> {
        let fonts = self
            .doc
            .get_page_fonts(page_id)
            .with_context(|| "failed to read page fonts")?;
        Ok(fonts
            .into_iter()
            .map(|(name, dict)| {
                let encoding = match dict.get_font_encoding(&self.doc) {
                    Ok(encoding) => Some(encoding),
                    Err(err) => {
                        debug!(
                            "no usable encoding for font {}: {}",
                            String::from_utf8_lossy(&name),
                            err
                        );
                        None
                    }
                };
                let font = PageFont {
                    metrics: FontMetrics::from_dict(&self.doc, dict),
                    encoding,
                };
                (name, font)
            })
            .collect())
    }

    fn page_runs(&self, page_id: ObjectId, origin: (f32, f32)) -> Result<Vec<TextRun>> {
        let content = self
            .doc
            .get_and_decode_page_content(page_id)
            .with_context(|| "failed to decode page content")?;
        let fonts = self.page_fonts(page_id)?;
        Ok(Interpreter::new(&fonts, origin).run(&content.operations))
    }
}

impl TextLayer for LopdfTextLayer {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page(&self, index: usize) -> Result<SourcePage> {
        let page_id = *self
            .pages
            .get(index)
            .ok_or_else(|| anyhow!("page {} out of range", index + 1))?;
        let [x0, y0, x1, y1] = page_box(&self.doc, page_id);
        // An unreadable text layer leaves the page to OCR.
        let runs = self.page_runs(page_id, (x0, y0)).unwrap_or_else(|err| {
            warn!("page {}: text layer unreadable: {:#}", index + 1, err);
            Vec::new()
        });
        Ok(SourcePage {
            width: x1 - x0,
            height: y1 - y0,
            runs,
        })
    }
}

#[derive(Debug, Clone, Default)]
struct FontMetrics {
    base_name: Option<String>,
    first_char: i64,
    widths: Vec<f32>,
    composite: bool,
}

impl FontMetrics {
    fn from_dict(doc: &Document, dict: &Dictionary) -> Self {
        let base_name = dict
            .get(b"BaseFont")
            .and_then(Object::as_name)
            .ok()
            .map(|name| strip_subset_prefix(&String::from_utf8_lossy(name)).to_string());
        let composite = dict
            .get(b"Subtype")
            .and_then(Object::as_name)
            .map(|name| name == b"Type0")
            .unwrap_or(false);
        let first_char = dict
            .get(b"FirstChar")
            .map(|obj| resolve(doc, obj))
            .and_then(Object::as_i64)
            .unwrap_or(0);
        let widths = dict
            .get(b"Widths")
            .map(|obj| resolve(doc, obj))
            .and_then(Object::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|item| number(resolve(doc, item)).unwrap_or(0.0))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            base_name,
            first_char,
            widths,
            composite,
        }
    }

    fn glyph_width(&self, code: u8) -> f32 {
        let index = i64::from(code) - self.first_char;
        usize::try_from(index)
            .ok()
            .and_then(|index| self.widths.get(index).copied())
            .filter(|width| *width > 0.0)
            .unwrap_or(DEFAULT_GLYPH_WIDTH)
    }
}

struct PageFont<'a> {
    metrics: FontMetrics,
    encoding: Option<Encoding<'a>>,
}

#[derive(Debug, Clone)]
struct GraphicsState {
    ctm: Matrix,
    font: Option<Vec<u8>>,
    font_size: f32,
    char_spacing: f32,
    word_spacing: f32,
    horizontal_scale: f32,
    leading: f32,
    rise: f32,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            ctm: IDENTITY,
            font: None,
            font_size: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scale: 1.0,
            leading: 0.0,
            rise: 0.0,
        }
    }
}

/// Walks a page's content stream, emitting one [`TextRun`] per text-showing
/// operator. Form XObjects are not entered.
struct Interpreter<'f, 'a> {
    fonts: &'f BTreeMap<Vec<u8>, PageFont<'a>>,
    origin: (f32, f32),
    stack: Vec<GraphicsState>,
    gs: GraphicsState,
    tm: Matrix,
    tlm: Matrix,
    runs: Vec<TextRun>,
}

impl<'f, 'a> Interpreter<'f, 'a> {
    fn new(fonts: &'f BTreeMap<Vec<u8>, PageFont<'a>>, origin: (f32, f32)) -> Self {
        Self {
            fonts,
            origin,
            stack: Vec::new(),
            gs: GraphicsState::default(),
            tm: IDENTITY,
            tlm: IDENTITY,
            runs: Vec::new(),
        }
    }

    fn run(mut self, operations: &[Operation]) -> Vec<TextRun> {
        for op in operations {
            self.apply(op);
        }
        self.runs
    }

    fn apply(&mut self, op: &Operation) {
        let operands = op.operands.as_slice();
        match op.operator.as_str() {
            "q" => self.stack.push(self.gs.clone()),
            "Q" => {
                if let Some(saved) = self.stack.pop() {
                    self.gs = saved;
                }
            }
            "cm" => {
                if let Some(m) = matrix(operands) {
                    self.gs.ctm = multiply(&m, &self.gs.ctm);
                }
            }
            "BT" => {
                self.tm = IDENTITY;
                self.tlm = IDENTITY;
            }
            "Tf" => {
                if let [Object::Name(name), size] = operands {
                    self.gs.font = Some(name.clone());
                    self.gs.font_size = number(size).unwrap_or(0.0);
                }
            }
            "Tc" => set_first(operands, &mut self.gs.char_spacing),
            "Tw" => set_first(operands, &mut self.gs.word_spacing),
            "TL" => set_first(operands, &mut self.gs.leading),
            "Ts" => set_first(operands, &mut self.gs.rise),
            "Tz" => {
                if let Some(percent) = operands.first().and_then(number) {
                    self.gs.horizontal_scale = percent / 100.0;
                }
            }
            "Tm" => {
                if let Some(m) = matrix(operands) {
                    self.tm = m;
                    self.tlm = m;
                }
            }
            "Td" | "TD" => {
                if let [tx, ty, ..] = operands {
                    let (tx, ty) = (number(tx).unwrap_or(0.0), number(ty).unwrap_or(0.0));
                    if op.operator == "TD" {
                        self.gs.leading = -ty;
                    }
                    self.next_line(tx, ty);
                }
            }
            "T*" => self.next_line(0.0, -self.gs.leading),
            "Tj" | "TJ" => self.show(operands),
            "'" => {
                self.next_line(0.0, -self.gs.leading);
                self.show(operands);
            }
            "\"" => {
                if let [aw, ac, rest @ ..] = operands {
                    self.gs.word_spacing = number(aw).unwrap_or(0.0);
                    self.gs.char_spacing = number(ac).unwrap_or(0.0);
                    self.next_line(0.0, -self.gs.leading);
                    self.show(rest);
                }
            }
            _ => {}
        }
    }

    fn next_line(&mut self, tx: f32, ty: f32) {
        self.tlm = multiply(&translate(tx, ty), &self.tlm);
        self.tm = self.tlm;
    }

    fn rendering_matrix(&self) -> Matrix {
        let gs = &self.gs;
        let params = [
            gs.font_size * gs.horizontal_scale,
            0.0,
            0.0,
            gs.font_size,
            0.0,
            gs.rise,
        ];
        let mut trm = multiply(&multiply(&params, &self.tm), &gs.ctm);
        trm[4] -= self.origin.0;
        trm[5] -= self.origin.1;
        trm
    }

    fn show(&mut self, operands: &[Object]) {
        let transform = self.rendering_matrix();
        let start = multiply(&self.tm, &self.gs.ctm);
        let mut text = String::new();
        self.collect(operands, &mut text);
        if text.is_empty() {
            return;
        }
        let end = multiply(&self.tm, &self.gs.ctm);
        let width = (end[4] - start[4]).hypot(end[5] - start[5]);
        let font_name = self
            .font()
            .and_then(|font| font.metrics.base_name.clone());
        self.runs.push(TextRun {
            text,
            transform,
            width,
            height: transform[2].hypot(transform[3]),
            font_name,
        });
    }

    fn collect(&mut self, items: &[Object], text: &mut String) {
        for item in items {
            match item {
                Object::String(bytes, _) => {
                    let decoded = self.decode(bytes);
                    let advance = self.advance(bytes, &decoded);
                    text.push_str(&decoded);
                    self.tm = multiply(&translate(advance, 0.0), &self.tm);
                }
                Object::Array(inner) => self.collect(inner, text),
                other => {
                    let Some(adjust) = number(other) else {
                        continue;
                    };
                    if adjust < -SPACE_KERNING && !text.is_empty() && !text.ends_with(' ') {
                        text.push(' ');
                    }
                    let tx = -adjust / 1000.0 * self.gs.font_size * self.gs.horizontal_scale;
                    self.tm = multiply(&translate(tx, 0.0), &self.tm);
                }
            }
        }
    }

    fn font(&self) -> Option<&'f PageFont<'a>> {
        self.gs.font.as_ref().and_then(|name| self.fonts.get(name))
    }

    fn decode(&self, bytes: &[u8]) -> String {
        let decoded = match self.font().and_then(|font| font.encoding.as_ref()) {
            Some(encoding) => Document::decode_text(encoding, bytes)
                .unwrap_or_else(|_| String::from_utf8_lossy(bytes).into_owned()),
            None => String::from_utf8_lossy(bytes).into_owned(),
        };
        decoded.chars().filter(|ch| !ch.is_control()).collect()
    }

    /// Horizontal displacement in text space after showing `bytes`.
    fn advance(&self, bytes: &[u8], decoded: &str) -> f32 {
        let gs = &self.gs;
        let metrics = self.font().map(|font| &font.metrics);
        let total = match metrics {
            Some(metrics) if !metrics.composite => bytes
                .iter()
                .map(|&code| {
                    let word = if code == b' ' { gs.word_spacing } else { 0.0 };
                    metrics.glyph_width(code) / 1000.0 * gs.font_size + gs.char_spacing + word
                })
                .sum::<f32>(),
            Some(_) => decoded
                .chars()
                .map(|_| COMPOSITE_GLYPH_EM * gs.font_size + gs.char_spacing)
                .sum::<f32>(),
            None => bytes
                .iter()
                .map(|_| DEFAULT_GLYPH_WIDTH / 1000.0 * gs.font_size + gs.char_spacing)
                .sum::<f32>(),
        };
        total * gs.horizontal_scale
    }
}

fn set_first(operands: &[Object], target: &mut f32) {
    if let Some(value) = operands.first().and_then(number) {
        *target = value;
    }
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value),
        _ => None,
    }
}

fn matrix(operands: &[Object]) -> Option<Matrix> {
    let values = operands.iter().map(number).collect::<Option<Vec<f32>>>()?;
    values.try_into().ok()
}

/// `a × b` for PDF row-vector matrices.
fn multiply(a: &Matrix, b: &Matrix) -> Matrix {
    [
        a[0] * b[0] + a[1] * b[2],
        a[0] * b[1] + a[1] * b[3],
        a[2] * b[0] + a[3] * b[2],
        a[2] * b[1] + a[3] * b[3],
        a[4] * b[0] + a[5] * b[2] + b[4],
        a[4] * b[1] + a[5] * b[3] + b[5],
    ]
}

fn translate(x: f32, y: f32) -> Matrix {
    [1.0, 0.0, 0.0, 1.0, x, y]
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

/// Visible page area as `[llx, lly, urx, ury]`: the CropBox clipped to the
/// MediaBox, or the MediaBox alone. Renderers draw the same area.
fn page_box(doc: &Document, page_id: ObjectId) -> [f32; 4] {
    let media = inherited_box(doc, page_id, b"MediaBox")
        .map(normalize_box)
        .filter(|area| area[2] > area[0] && area[3] > area[1])
        .unwrap_or(DEFAULT_MEDIA_BOX);
    inherited_box(doc, page_id, b"CropBox")
        .and_then(|crop| intersect_boxes(normalize_box(crop), media))
        .unwrap_or(media)
}

fn normalize_box([x0, y0, x1, y1]: [f32; 4]) -> [f32; 4] {
    [x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)]
}

fn intersect_boxes(a: [f32; 4], b: [f32; 4]) -> Option<[f32; 4]> {
    let area = [a[0].max(b[0]), a[1].max(b[1]), a[2].min(b[2]), a[3].min(b[3])];
    (area[2] > area[0] && area[3] > area[1]).then_some(area)
}

/// A page box entry, following `/Parent` inheritance.
fn inherited_box(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<[f32; 4]> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_INHERIT_DEPTH {
        if let Ok(value) = node.get(key) {
            let items = resolve(doc, value).as_array().ok()?;
            let values = items
                .iter()
                .map(|item| number(resolve(doc, item)))
                .collect::<Option<Vec<f32>>>()?;
            return values.try_into().ok();
        }
        let parent = node.get(b"Parent").and_then(Object::as_reference).ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

/// `ABCDEF+Helvetica` -> `Helvetica`.
fn strip_subset_prefix(name: &str) -> &str {
    match name.split_once('+') {
        Some((tag, rest)) if tag.len() == 6 && tag.bytes().all(|b| b.is_ascii_uppercase()) => {
            rest
        }
        _ => name,
    }
}
