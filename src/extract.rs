use anyhow::{anyhow, Context, Result};
use image::DynamicImage;
use tracing::debug;

use crate::model::{OcrQuality, PageLayout, TextBlock, BASE_DPI, DEFAULT_FONT_FAMILY};
use crate::ocr::{optimize_for_ocr, upscale, OcrSession};
use crate::pdf::{PageRasterizer, SourcePage, TextLayer, TextRun};
use crate::progress::{ProgressRange, ProgressSink};

/// Pages with more native runs than this are read from the text layer.
pub const NATIVE_TEXT_THRESHOLD: usize = 20;

/// Turns source pages into [`PageLayout`]s, choosing between the native text
/// layer and OCR page by page.
pub struct BlockExtractor<'s> {
    session: &'s mut OcrSession,
    quality: OcrQuality,
    native_threshold: usize,
}

impl<'s> BlockExtractor<'s> {
    pub fn new(session: &'s mut OcrSession, quality: OcrQuality) -> Self {
        Self {
            session,
            quality,
            native_threshold: NATIVE_TEXT_THRESHOLD,
        }
    }

    pub fn with_native_threshold(mut self, threshold: usize) -> Self {
        self.native_threshold = threshold;
        self
    }

    pub fn extract_pdf(
        &mut self,
        text_layer: &dyn TextLayer,
        rasterizer: &mut dyn PageRasterizer,
        range: ProgressRange,
        progress: &mut dyn ProgressSink,
    ) -> Result<Vec<PageLayout>> {
        let total = text_layer.page_count();
        let mut pages = Vec::with_capacity(total);
        for index in 0..total {
            let page_number = index as u32 + 1;
            let source = text_layer
                .page(index)
                .with_context(|| format!("failed to read page {}", page_number))?;
            let mut layout = PageLayout::new(source.width, source.height);
            layout.blocks = if source.runs.len() > self.native_threshold {
                debug!(
                    "page {}: native text ({} runs)",
                    page_number,
                    source.runs.len()
                );
                native_blocks(&source, page_number)
            } else {
                debug!(
                    "page {}: scanned ({} runs <= {}), running OCR",
                    page_number,
                    source.runs.len(),
                    self.native_threshold
                );
                let bitmap = rasterizer
                    .render(index, self.quality.render_scale())
                    .with_context(|| format!("failed to render page {}", page_number))?;
                self.recognize(bitmap, source.width, source.height, page_number)?
            };
            pages.push(layout);
            progress.report(
                range.map(index + 1, total),
                &format!("Extracted page {}/{}", page_number, total),
            );
        }
        Ok(pages)
    }

    /// A raster image input is a single scanned page measured at 72 DPI.
    pub fn extract_image(
        &mut self,
        image: DynamicImage,
        range: ProgressRange,
        progress: &mut dyn ProgressSink,
    ) -> Result<Vec<PageLayout>> {
        let (width, height) = (image.width() as f32, image.height() as f32);
        debug!("image input {}x{}, running OCR", width, height);
        let bitmap = upscale(image, self.quality.target_dpi(), BASE_DPI);
        let mut layout = PageLayout::new(width, height);
        layout.blocks = self.recognize(bitmap, width, height, 1)?;
        progress.report(range.map(1, 1), "Extracted page 1/1");
        Ok(vec![layout])
    }

    /// OCR one page bitmap and map the lines back into page space. The
    /// bitmap is dropped before returning.
    fn recognize(
        &mut self,
        bitmap: DynamicImage,
        page_width: f32,
        page_height: f32,
        page_number: u32,
    ) -> Result<Vec<TextBlock>> {
        if bitmap.width() == 0 || bitmap.height() == 0 {
            return Err(anyhow!("page {} rendered to an empty bitmap", page_number));
        }
        let scale_x = page_width / bitmap.width() as f32;
        let scale_y = page_height / bitmap.height() as f32;
        let prepared = DynamicImage::ImageRgba8(optimize_for_ocr(&bitmap));
        drop(bitmap);
        let recognized = self
            .session
            .acquire()?
            .recognize(&prepared, self.quality.target_dpi().round() as u32)
            .with_context(|| format!("OCR failed on page {}", page_number))?;
        Ok(recognized
            .to_text_blocks(page_number)
            .iter()
            .map(|block| block.rescaled(scale_x, scale_y))
            .collect())
    }
}

fn native_blocks(page: &SourcePage, page_number: u32) -> Vec<TextBlock> {
    page.runs
        .iter()
        .map(|run| native_block(run, page.height, page_number))
        .collect()
}

fn native_block(run: &TextRun, page_height: f32, page_number: u32) -> TextBlock {
    let [scale, _, _, _, x, baseline] = run.transform;
    let font_size = scale.abs();
    let extent = run.height.max(font_size);
    TextBlock {
        text: run.text.clone(),
        x,
        y: page_height - baseline - extent,
        width: run.width.max(0.0),
        height: extent,
        font_size,
        font_family: run
            .font_name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_FONT_FAMILY.to_string()),
        page_number,
    }
}
