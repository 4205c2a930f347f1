mod preprocess;
mod tesseract;
mod text;

use anyhow::{anyhow, Result};
use image::DynamicImage;
use serde::Serialize;
use tracing::{info, warn};

use crate::model::{TextBlock, DEFAULT_FONT_FAMILY};

pub use preprocess::{optimize_for_ocr, upscale};
pub use tesseract::{list_tesseract_languages, parse_tsv_page, TesseractEngine};

/// Font size used for lines the engine reports with no confidence.
pub const FALLBACK_FONT_SIZE: f32 = 12.0;
const LINE_HEIGHT_TO_FONT_SIZE: f32 = 0.8;

/// Corner coordinates in bitmap pixels, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OcrBBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl OcrBBox {
    pub fn width(&self) -> f32 {
        (self.x1 - self.x0).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y1 - self.y0).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrLine {
    pub text: String,
    pub bbox: OcrBBox,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OcrParagraph {
    pub lines: Vec<OcrLine>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OcrBlock {
    pub paragraphs: Vec<OcrParagraph>,
}

/// Recognition result for one bitmap, in the engine's block/paragraph/line order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OcrPage {
    pub blocks: Vec<OcrBlock>,
}

impl OcrPage {
    pub fn lines(&self) -> impl Iterator<Item = &OcrLine> {
        self.blocks
            .iter()
            .flat_map(|block| block.paragraphs.iter())
            .flat_map(|paragraph| paragraph.lines.iter())
    }

    /// Flattens to one block per recognized line, still in bitmap coordinates.
    pub fn to_text_blocks(&self, page_number: u32) -> Vec<TextBlock> {
        self.lines()
            .map(|line| line_to_block(line, page_number))
            .collect()
    }
}

fn line_to_block(line: &OcrLine, page_number: u32) -> TextBlock {
    let height = line.bbox.height();
    let font_size = if line.confidence > 0.0 {
        height * LINE_HEIGHT_TO_FONT_SIZE
    } else {
        FALLBACK_FONT_SIZE
    };
    TextBlock {
        text: line.text.trim().to_string(),
        x: line.bbox.x0,
        y: line.bbox.y0,
        width: line.bbox.width(),
        height,
        font_size,
        font_family: DEFAULT_FONT_FAMILY.to_string(),
        page_number,
    }
}

/// Line-level text recognizer.
pub trait OcrEngine: Send {
    /// Recognizes `image`, which was rendered at `dpi`.
    fn recognize(&mut self, image: &DynamicImage, dpi: u32) -> Result<OcrPage>;

    /// Frees the engine's resources. Called once by [`OcrSession::release`].
    fn terminate(&mut self) -> Result<()> {
        Ok(())
    }
}

pub type OcrFactory = Box<dyn Fn() -> Result<Box<dyn OcrEngine>> + Send + Sync>;

/// Lazily started OCR engine shared by every scanned page of a run.
///
/// The engine is created on the first [`acquire`](Self::acquire) and reused
/// until [`release`](Self::release). Dropping the session releases it, so
/// early returns on error paths never leak a running engine.
pub struct OcrSession {
    factory: OcrFactory,
    engine: Option<Box<dyn OcrEngine>>,
}

impl OcrSession {
    pub fn new(factory: OcrFactory) -> Self {
        Self {
            factory,
            engine: None,
        }
    }

    pub fn tesseract(languages: impl Into<String>) -> Self {
        let languages = languages.into();
        Self::new(Box::new(move || {
            let engine = TesseractEngine::start(&languages)?;
            Ok(Box::new(engine) as Box<dyn OcrEngine>)
        }))
    }

    pub fn acquire(&mut self) -> Result<&mut dyn OcrEngine> {
        if self.engine.is_none() {
            info!("starting OCR session");
            self.engine = Some((self.factory)()?);
        }
        match self.engine.as_deref_mut() {
            Some(engine) => Ok(engine),
            None => Err(anyhow!("OCR session is not available")),
        }
    }

    pub fn is_active(&self) -> bool {
        self.engine.is_some()
    }

    pub fn release(&mut self) {
        let Some(mut engine) = self.engine.take() else {
            return;
        };
        info!("releasing OCR session");
        if let Err(err) = engine.terminate() {
            warn!("failed to terminate OCR engine: {:#}", err);
        }
    }
}

impl Drop for OcrSession {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn line(text: &str, bbox: (f32, f32, f32, f32), confidence: f32) -> OcrLine {
        OcrLine {
            text: text.to_string(),
            bbox: OcrBBox {
                x0: bbox.0,
                y0: bbox.1,
                x1: bbox.2,
                y1: bbox.3,
            },
            confidence,
        }
    }

    #[test]
    fn flattens_hierarchy_in_engine_order() {
        let page = OcrPage {
            blocks: vec![
                OcrBlock {
                    paragraphs: vec![
                        OcrParagraph {
                            lines: vec![line("one", (0.0, 0.0, 10.0, 10.0), 90.0)],
                        },
                        OcrParagraph {
                            lines: vec![line("two ", (0.0, 20.0, 10.0, 30.0), 90.0)],
                        },
                    ],
                },
                OcrBlock {
                    paragraphs: vec![OcrParagraph {
                        lines: vec![line("three", (0.0, 40.0, 10.0, 50.0), 0.0)],
                    }],
                },
            ],
        };
        let blocks = page.to_text_blocks(3);
        let texts = blocks.iter().map(|b| b.text.as_str()).collect::<Vec<_>>();
        assert_eq!(texts, vec!["one", "two", "three"]);
        assert!(blocks.iter().all(|b| b.page_number == 3));
    }

    #[test]
    fn font_size_follows_line_height_when_confident() {
        let confident = line_to_block(&line("a", (0.0, 0.0, 100.0, 20.0), 87.0), 1);
        assert_eq!(confident.font_size, 16.0);
        assert_eq!(confident.width, 100.0);
        assert_eq!(confident.height, 20.0);

        let unsure = line_to_block(&line("a", (0.0, 0.0, 100.0, 20.0), 0.0), 1);
        assert_eq!(unsure.font_size, FALLBACK_FONT_SIZE);
    }

    struct CountingEngine {
        terminated: Arc<AtomicUsize>,
    }

    impl OcrEngine for CountingEngine {
        fn recognize(&mut self, _image: &DynamicImage, _dpi: u32) -> Result<OcrPage> {
            Ok(OcrPage::default())
        }

        fn terminate(&mut self) -> Result<()> {
            self.terminated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn counting_session(created: Arc<AtomicUsize>, terminated: Arc<AtomicUsize>) -> OcrSession {
        OcrSession::new(Box::new(move || {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingEngine {
                terminated: terminated.clone(),
            }) as Box<dyn OcrEngine>)
        }))
    }

    #[test]
    fn session_is_lazy_and_reused() {
        let created = Arc::new(AtomicUsize::new(0));
        let terminated = Arc::new(AtomicUsize::new(0));
        let mut session = counting_session(created.clone(), terminated.clone());
        assert!(!session.is_active());
        assert_eq!(created.load(Ordering::SeqCst), 0);

        let image = DynamicImage::new_rgba8(1, 1);
        session.acquire().unwrap().recognize(&image, 300).unwrap();
        session.acquire().unwrap().recognize(&image, 300).unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(session.is_active());

        session.release();
        session.release();
        assert_eq!(terminated.load(Ordering::SeqCst), 1);
        assert!(!session.is_active());
    }

    #[test]
    fn dropping_session_terminates_engine() {
        let created = Arc::new(AtomicUsize::new(0));
        let terminated = Arc::new(AtomicUsize::new(0));
        {
            let mut session = counting_session(created.clone(), terminated.clone());
            session.acquire().unwrap();
        }
        assert_eq!(terminated.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unused_session_never_starts_engine() {
        let created = Arc::new(AtomicUsize::new(0));
        let terminated = Arc::new(AtomicUsize::new(0));
        drop(counting_session(created.clone(), terminated.clone()));
        assert_eq!(created.load(Ordering::SeqCst), 0);
        assert_eq!(terminated.load(Ordering::SeqCst), 0);
    }
}
