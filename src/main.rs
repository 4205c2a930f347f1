use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "pdf-translate",
    version,
    about = "Translate PDFs and scanned pages while keeping their layout"
)]
struct Cli {
    /// PDF or image file to translate
    file: PathBuf,

    /// Target language (default from settings: pt-BR)
    #[arg(short = 'l', long = "lang")]
    lang: Option<String>,

    /// Provider or provider:model (e.g. gemini:gemini-2.5-flash, openai:gpt-4o-mini)
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// API key (overrides environment variables)
    #[arg(short = 'k', long = "key")]
    key: Option<String>,

    /// OCR quality for scanned pages: low, medium or high
    #[arg(short = 'q', long = "quality")]
    quality: Option<String>,

    /// Translate programming keywords too
    #[arg(long = "no-keywords")]
    no_keywords: bool,

    /// Flow translated text top-down instead of placing it at source positions
    #[arg(long = "no-layout")]
    no_layout: bool,

    /// Output PDF path (default: translated_<name>.pdf next to the input)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Plain-text export path (default: output path with .txt)
    #[arg(long = "text-output")]
    text_output: Option<PathBuf>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    pdf_translate::logging::init(cli.verbose)?;

    let mut progress = |percent: u8, status: &str| eprintln!("[{:>3}%] {}", percent, status);
    let translated = pdf_translate::run(
        pdf_translate::Config {
            file: cli.file,
            lang: cli.lang,
            model: cli.model,
            key: cli.key,
            quality: cli.quality,
            preserve_keywords: !cli.no_keywords,
            preserve_layout: !cli.no_layout,
            output: cli.output,
            text_output: cli.text_output,
            settings_path: cli.read_settings,
        },
        &mut progress,
    )
    .await
    .inspect_err(|err| {
        if let Some(failure) = err.downcast_ref::<pdf_translate::RunFailure>() {
            eprintln!("[{:>3}%] failed", failure.document.progress);
        }
    })?;

    let pdf_path = &translated.pdf_path;
    fs::write(pdf_path, &translated.output.pdf)
        .with_context(|| format!("failed to write {}", pdf_path.display()))?;
    let text_path = &translated.text_path;
    fs::write(text_path, &translated.output.document.translated_text)
        .with_context(|| format!("failed to write {}", text_path.display()))?;

    println!("{}", pdf_path.display());
    println!("{}", text_path.display());
    Ok(())
}
