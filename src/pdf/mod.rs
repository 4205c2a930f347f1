mod raster;
mod text_layer;
mod writer;

use anyhow::Result;
use image::DynamicImage;

use crate::error::PipelineError;

pub use raster::{command_exists, CliRasterizer};
pub use text_layer::LopdfTextLayer;
pub use writer::PrintPdfWriter;

/// One `Tj`/`TJ` text-showing operation.
///
/// `transform` is the text rendering matrix `[a b c d e f]` in page space with
/// the origin at the bottom-left of the page box; `e`/`f` locate the baseline
/// start and `a` is the horizontal scale (effective font size).
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub transform: [f32; 6],
    pub width: f32,
    pub height: f32,
    pub font_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourcePage {
    pub width: f32,
    pub height: f32,
    pub runs: Vec<TextRun>,
}

/// Positioned text runs of a loaded document, one page at a time.
pub trait TextLayer {
    fn page_count(&self) -> usize;
    fn page(&self, index: usize) -> Result<SourcePage>;
}

/// Renders a page at `scale` × its native 72 DPI size.
pub trait PageRasterizer {
    fn render(&mut self, index: usize, scale: f32) -> Result<DynamicImage>;
}

/// A text draw in output page space (origin bottom-left).
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub size: f32,
}

/// Builds an output document page by page.
pub trait DocumentWriter {
    fn add_page(&mut self, width: f32, height: f32) -> Result<()>;

    /// Draws on the most recently added page. A failure affects this call
    /// only; the writer stays usable.
    fn draw_text(&mut self, call: &DrawCall) -> Result<(), PipelineError>;

    fn finish(self: Box<Self>) -> Result<Vec<u8>>;
}
