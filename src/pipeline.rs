use anyhow::Result;
use thiserror::Error;
use tracing::info;

use crate::error::PipelineError;
use crate::extract::{BlockExtractor, NATIVE_TEXT_THRESHOLD};
use crate::input::{InputDocument, InputKind};
use crate::keywords::KeywordProtector;
use crate::model::{PageLayout, ProcessedDocument, TranslationOptions};
use crate::ocr::OcrSession;
use crate::pdf::{
    CliRasterizer, DocumentWriter, LopdfTextLayer, PageRasterizer, PrintPdfWriter, TextLayer,
};
use crate::progress::{Monotonic, ProgressRange, ProgressSink};
use crate::providers::Provider;
use crate::reconstruct;
use crate::translator::{unique_texts, Translator, TranslatorConfig, DEFAULT_CHUNK_SIZE, DEFAULT_CONTENT_TYPE};

pub const PROGRESS_START: u8 = 5;
pub const EXTRACT_RANGE: ProgressRange = ProgressRange::new(5.0, 50.0);
pub const TRANSLATE_RANGE: ProgressRange = ProgressRange::new(50.0, 90.0);
pub const PROGRESS_REBUILT: u8 = 95;
pub const PROGRESS_DONE: u8 = 100;

pub const DEFAULT_OCR_LANGUAGES: &str = "eng+por";

/// The document-side collaborators of a run: text layer, rasterizer, OCR
/// and output writer.
pub trait Backend {
    fn open_text_layer(&self, pdf: &[u8]) -> Result<Box<dyn TextLayer>>;
    fn rasterizer<'a>(&self, pdf: &'a [u8]) -> Box<dyn PageRasterizer + 'a>;
    fn ocr_session(&self) -> OcrSession;
    fn writer(&self, title: &str) -> Box<dyn DocumentWriter>;
}

/// lopdf text layer, mutool/pdftoppm rendering, tesseract OCR, printpdf output.
#[derive(Debug, Clone)]
pub struct DefaultBackend {
    pub ocr_languages: String,
}

impl Default for DefaultBackend {
    fn default() -> Self {
        Self {
            ocr_languages: DEFAULT_OCR_LANGUAGES.to_string(),
        }
    }
}

impl Backend for DefaultBackend {
    fn open_text_layer(&self, pdf: &[u8]) -> Result<Box<dyn TextLayer>> {
        Ok(Box::new(LopdfTextLayer::load(pdf)?))
    }

    fn rasterizer<'a>(&self, pdf: &'a [u8]) -> Box<dyn PageRasterizer + 'a> {
        Box::new(CliRasterizer::new(pdf))
    }

    fn ocr_session(&self) -> OcrSession {
        OcrSession::tesseract(self.ocr_languages.clone())
    }

    fn writer(&self, title: &str) -> Box<dyn DocumentWriter> {
        Box::new(PrintPdfWriter::new(title))
    }
}

#[derive(Debug)]
pub struct RunOutput {
    pub document: ProcessedDocument,
    pub pdf: Vec<u8>,
}

/// A failed run: the error plus the terminal document state to show for it.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunFailure {
    pub error: PipelineError,
    pub document: ProcessedDocument,
}

/// One document run: extract, translate, rebuild. Stages are strictly
/// sequential and each depends on the full output of the previous one.
pub struct Pipeline<P: Provider + Clone, B: Backend> {
    provider: P,
    backend: B,
    options: TranslationOptions,
    content_type: String,
    chunk_size: usize,
    native_threshold: usize,
    protector: KeywordProtector,
}

impl<P: Provider + Clone, B: Backend> Pipeline<P, B> {
    pub fn new(provider: P, backend: B, options: TranslationOptions) -> Self {
        Self {
            provider,
            backend,
            options,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            native_threshold: NATIVE_TEXT_THRESHOLD,
            protector: KeywordProtector::default(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        if chunk_size > 0 {
            self.chunk_size = chunk_size;
        }
        self
    }

    pub fn with_native_threshold(mut self, threshold: usize) -> Self {
        self.native_threshold = threshold;
        self
    }

    pub fn with_protector(mut self, protector: KeywordProtector) -> Self {
        self.protector = protector;
        self
    }

    pub async fn run(
        &self,
        input: &InputDocument,
        progress: &mut dyn ProgressSink,
    ) -> Result<RunOutput, RunFailure> {
        let mut progress = Monotonic::new(progress);
        match self.run_stages(input, &mut progress).await {
            Ok(output) => Ok(output),
            Err(error) => {
                let document =
                    ProcessedDocument::failed(&input.name, progress.last(), error.to_string());
                Err(RunFailure { error, document })
            }
        }
    }

    async fn run_stages(
        &self,
        input: &InputDocument,
        progress: &mut dyn ProgressSink,
    ) -> Result<RunOutput, PipelineError> {
        progress.report(PROGRESS_START, &format!("Reading {}", input.name));
        let pages = self.extract(input, progress)?;

        let texts = unique_texts(&pages);
        info!(
            "{}: {} pages, {} unique texts",
            input.name,
            pages.len(),
            texts.len()
        );
        let translator = Translator::new(
            self.provider.clone(),
            TranslatorConfig {
                target_language: self.options.target_language.clone(),
                content_type: self.content_type.clone(),
                chunk_size: self.chunk_size,
                preserve_keywords: self.options.preserve_keywords,
            },
        )
        .with_protector(self.protector.clone());
        let map = translator
            .translate_all(&texts, TRANSLATE_RANGE, progress)
            .await?;

        let mut writer = self.backend.writer(&input.name);
        let stats = reconstruct::rebuild(
            &pages,
            &map,
            writer.as_mut(),
            self.options.preserve_layout,
        )
        .map_err(PipelineError::DocumentWrite)?;
        progress.report(
            PROGRESS_REBUILT,
            &format!("Rebuilt {} pages ({} blocks skipped)", pages.len(), stats.skipped),
        );
        let pdf = writer.finish().map_err(PipelineError::DocumentWrite)?;
        progress.report(PROGRESS_DONE, "Done");

        Ok(RunOutput {
            document: ProcessedDocument::completed(&input.name, pages, &map),
            pdf,
        })
    }

    /// The OCR session lives only for this stage and is released on every
    /// exit path.
    fn extract(
        &self,
        input: &InputDocument,
        progress: &mut dyn ProgressSink,
    ) -> Result<Vec<PageLayout>, PipelineError> {
        let mut session = self.backend.ocr_session();
        let mut extractor = BlockExtractor::new(&mut session, self.options.ocr_quality)
            .with_native_threshold(self.native_threshold);
        let pages = match input.kind {
            InputKind::Pdf => {
                let text_layer = self
                    .backend
                    .open_text_layer(&input.bytes)
                    .map_err(PipelineError::DocumentParse)?;
                let mut rasterizer = self.backend.rasterizer(&input.bytes);
                extractor.extract_pdf(
                    text_layer.as_ref(),
                    rasterizer.as_mut(),
                    EXTRACT_RANGE,
                    progress,
                )
            }
            InputKind::Image => input
                .decode_image()
                .and_then(|image| extractor.extract_image(image, EXTRACT_RANGE, progress)),
        }
        .map_err(PipelineError::DocumentParse)?;
        session.release();
        Ok(pages)
    }
}
