use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub mod chunker;
pub mod error;
pub mod extract;
pub mod input;
pub mod keywords;
pub mod logging;
pub mod model;
pub mod ocr;
pub mod pdf;
pub mod pipeline;
pub mod progress;
pub mod providers;
pub mod reconstruct;
pub mod settings;
pub mod translations;
pub mod translator;

pub use error::PipelineError;
pub use keywords::KeywordProtector;
pub use model::{
    DocumentStatus, OcrQuality, PageLayout, ProcessedDocument, TextBlock, TranslationMap,
    TranslationOptions,
};
pub use pipeline::{Backend, DefaultBackend, Pipeline, RunFailure, RunOutput};
pub use progress::{NoProgress, ProgressSink};
pub use providers::{Gemini, OpenAI, Provider, ProviderKind, ProviderUsage};
pub use translator::{ExecutionOutput, Translator, TranslatorConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub file: PathBuf,
    pub lang: Option<String>,
    pub model: Option<String>,
    pub key: Option<String>,
    pub quality: Option<String>,
    pub preserve_keywords: bool,
    pub preserve_layout: bool,
    pub output: Option<PathBuf>,
    pub text_output: Option<PathBuf>,
    pub settings_path: Option<PathBuf>,
}

#[derive(Debug)]
pub struct Translated {
    pub output: RunOutput,
    pub pdf_path: PathBuf,
    pub text_path: PathBuf,
}

/// Reads, translates and rebuilds `config.file`. Nothing is written to disk;
/// the returned paths are where the caller should store the results.
///
/// A failed run surfaces as a [`RunFailure`] inside the error.
pub async fn run(config: Config, progress: &mut dyn ProgressSink) -> Result<Translated> {
    let settings = settings::load_settings(config.settings_path.as_deref())?;

    let input = input::read_input(&config.file, input::max_file_size(settings.max_file_size_mb))?;

    let quality = match config.quality.as_deref() {
        Some(value) => value.parse::<OcrQuality>()?,
        None => settings.ocr_quality,
    };
    let options = TranslationOptions {
        preserve_layout: config.preserve_layout,
        preserve_keywords: config.preserve_keywords,
        ocr_quality: quality,
        target_language: config
            .lang
            .clone()
            .unwrap_or_else(|| settings.target_language.clone()),
    };

    let model_arg = config.model.as_deref().or(settings.model.as_deref());
    let selection = providers::resolve_provider_selection(model_arg, config.key.as_deref())?;
    let key = providers::resolve_key(selection.provider, config.key.as_deref())
        .with_context(|| "no API key found for selected provider")?;
    let model = selection
        .requested_model
        .unwrap_or_else(|| selection.provider.default_model().to_string());
    tracing::info!("using {}:{}", selection.provider.as_str(), model);
    let provider = providers::build_provider(selection.provider, key, model);

    let protector = if settings.extra_keywords.is_empty() {
        KeywordProtector::default()
    } else {
        KeywordProtector::with_extra(&settings.extra_keywords)?
    };

    let backend = DefaultBackend {
        ocr_languages: settings.ocr_languages.clone(),
    };
    let pipeline = Pipeline::new(provider, backend, options)
        .with_content_type(settings.content_type.clone())
        .with_chunk_size(settings.chunk_size)
        .with_native_threshold(settings.native_text_threshold)
        .with_protector(protector);

    let output = pipeline.run(&input, progress).await?;

    let pdf_path = config
        .output
        .unwrap_or_else(|| output_path(&config.file, &settings.output_prefix));
    let text_path = config
        .text_output
        .unwrap_or_else(|| pdf_path.with_extension("txt"));
    Ok(Translated {
        output,
        pdf_path,
        text_path,
    })
}

/// `<dir>/<prefix><name>`, always with a `.pdf` extension.
pub fn output_path(input: &Path, prefix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    input.with_file_name(format!("{}{}.pdf", prefix, stem))
}
