use anyhow::{anyhow, Context, Result};
use printpdf::{
    BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference, Pt,
};
use std::io::BufWriter;

use super::{DocumentWriter, DrawCall};
use crate::error::PipelineError;

const LAYER_NAME: &str = "Text";
/// US Letter, used when a document ends up with no pages at all.
const FALLBACK_PAGE: (f32, f32) = (612.0, 792.0);

/// Writes pages with the built-in Helvetica face.
///
/// Standard fonts only cover WinAnsi; text outside that set is rejected per
/// draw call rather than rendered as garbage.
pub struct PrintPdfWriter {
    title: String,
    doc: Option<(PdfDocumentReference, IndirectFontRef)>,
    layer: Option<PdfLayerReference>,
}

impl PrintPdfWriter {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            doc: None,
            layer: None,
        }
    }
}

impl DocumentWriter for PrintPdfWriter {
    fn add_page(&mut self, width: f32, height: f32) -> Result<()> {
        let (width, height) = (Mm::from(Pt(width)), Mm::from(Pt(height)));
        let layer = match &self.doc {
            Some((doc, _)) => {
                let (page, layer) = doc.add_page(width, height, LAYER_NAME);
                doc.get_page(page).get_layer(layer)
            }
            None => {
                let (doc, page, layer) = PdfDocument::new(&self.title, width, height, LAYER_NAME);
                let font = doc
                    .add_builtin_font(BuiltinFont::Helvetica)
                    .map_err(|err| anyhow!("failed to load Helvetica: {}", err))?;
                let layer = doc.get_page(page).get_layer(layer);
                self.doc = Some((doc, font));
                layer
            }
        };
        self.layer = Some(layer);
        Ok(())
    }

    fn draw_text(&mut self, call: &DrawCall) -> Result<(), PipelineError> {
        let fail = |reason: String| PipelineError::BlockDraw {
            text: call.text.clone(),
            reason,
        };
        let (Some((_, font)), Some(layer)) = (&self.doc, &self.layer) else {
            return Err(fail("no page to draw on".to_string()));
        };
        if ![call.x, call.y, call.size].iter().all(|value| value.is_finite()) {
            return Err(fail(format!(
                "invalid geometry x={} y={} size={}",
                call.x, call.y, call.size
            )));
        }
        let text = single_line(&call.text);
        if let Some(ch) = text.chars().find(|ch| !is_winansi(*ch)) {
            return Err(fail(format!(
                "Helvetica cannot encode {:?} (U+{:04X})",
                ch, ch as u32
            )));
        }
        layer.use_text(
            text,
            call.size,
            Mm::from(Pt(call.x)),
            Mm::from(Pt(call.y)),
            font,
        );
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<Vec<u8>> {
        if self.doc.is_none() {
            self.add_page(FALLBACK_PAGE.0, FALLBACK_PAGE.1)?;
        }
        let (doc, _) = self
            .doc
            .take()
            .ok_or_else(|| anyhow!("no pages to write"))?;
        let mut buffer = Vec::new();
        {
            let mut writer = BufWriter::new(&mut buffer);
            doc.save(&mut writer).with_context(|| "failed to write pdf")?;
        }
        Ok(buffer)
    }
}

fn single_line(text: &str) -> String {
    text.chars()
        .map(|ch| if ch.is_whitespace() { ' ' } else { ch })
        .collect()
}

/// Whether `ch` has a code point in WinAnsiEncoding.
fn is_winansi(ch: char) -> bool {
    matches!(ch, ' '..='~' | '\u{A0}'..='\u{FF}')
        || matches!(
            ch,
            '€' | '‚'
                | 'ƒ'
                | '„'
                | '…'
                | '†'
                | '‡'
                | 'ˆ'
                | '‰'
                | 'Š'
                | '‹'
                | 'Œ'
                | 'Ž'
                | '‘'
                | '’'
                | '“'
                | '”'
                | '•'
                | '–'
                | '—'
                | '˜'
                | '™'
                | 'š'
                | '›'
                | 'œ'
                | 'ž'
                | 'Ÿ'
        )
}
