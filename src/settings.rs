use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::extract::NATIVE_TEXT_THRESHOLD;
use crate::input::DEFAULT_MAX_FILE_SIZE_MB;
use crate::model::OcrQuality;
use crate::pipeline::DEFAULT_OCR_LANGUAGES;
use crate::translator::{DEFAULT_CHUNK_SIZE, DEFAULT_CONTENT_TYPE};

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub target_language: String,
    pub chunk_size: usize,
    pub content_type: String,
    pub model: Option<String>,
    pub extra_keywords: Vec<String>,
    pub max_file_size_mb: u64,
    pub ocr_languages: String,
    pub ocr_quality: OcrQuality,
    pub native_text_threshold: usize,
    pub output_prefix: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_language: "pt-BR".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            model: None,
            extra_keywords: Vec::new(),
            max_file_size_mb: DEFAULT_MAX_FILE_SIZE_MB,
            ocr_languages: DEFAULT_OCR_LANGUAGES.to_string(),
            ocr_quality: OcrQuality::Medium,
            native_text_threshold: NATIVE_TEXT_THRESHOLD,
            output_prefix: "translated_".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    translation: Option<TranslationSettings>,
    input: Option<InputSettings>,
    ocr: Option<OcrSettings>,
    output: Option<OutputSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct TranslationSettings {
    target_language: Option<String>,
    chunk_size: Option<usize>,
    content_type: Option<String>,
    model: Option<String>,
    keywords: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct InputSettings {
    max_file_size_mb: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct OcrSettings {
    languages: Option<String>,
    quality: Option<String>,
    native_text_threshold: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct OutputSettings {
    prefix: Option<String>,
}

/// Built-in defaults overlaid with every settings file found, later files
/// winning: `./settings.toml`, `./settings.local.toml`, the same two under
/// `$HOME/.pdf-translate/`, then `extra_path`.
pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    settings.merge(parse_settings(DEFAULT_SETTINGS_TOML, Path::new("<built-in>"))?);

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];
    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }
    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            settings.merge(parse_settings(&content, &path)?);
        }
    }

    Ok(settings)
}

fn parse_settings(content: &str, path: &Path) -> Result<SettingsFile> {
    toml::from_str(content).with_context(|| format!("failed to parse settings: {}", path.display()))
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(translation) = incoming.translation {
            if let Some(language) = non_blank(translation.target_language) {
                self.target_language = language;
            }
            if let Some(size) = translation.chunk_size {
                if size > 0 {
                    self.chunk_size = size;
                }
            }
            if let Some(content_type) = non_blank(translation.content_type) {
                self.content_type = content_type;
            }
            if let Some(model) = non_blank(translation.model) {
                self.model = Some(model);
            }
            if let Some(keywords) = translation.keywords {
                self.extra_keywords.extend(
                    keywords
                        .into_iter()
                        .filter_map(|keyword| non_blank(Some(keyword))),
                );
            }
        }
        if let Some(input) = incoming.input {
            if let Some(limit) = input.max_file_size_mb {
                if limit > 0 {
                    self.max_file_size_mb = limit;
                }
            }
        }
        if let Some(ocr) = incoming.ocr {
            if let Some(languages) = non_blank(ocr.languages) {
                self.ocr_languages = languages;
            }
            if let Some(quality) = ocr.quality.and_then(|value| value.parse().ok()) {
                self.ocr_quality = quality;
            }
            if let Some(threshold) = ocr.native_text_threshold {
                self.native_text_threshold = threshold;
            }
        }
        if let Some(output) = incoming.output {
            if let Some(prefix) = non_blank(output.prefix) {
                self.output_prefix = prefix;
            }
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".pdf-translate"))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_settings_match_defaults() {
        let mut settings = Settings::default();
        settings.merge(parse_settings(DEFAULT_SETTINGS_TOML, Path::new("x")).unwrap());
        assert_eq!(settings.target_language, "pt-BR");
        assert_eq!(settings.chunk_size, 3500);
        assert_eq!(settings.max_file_size_mb, 20);
        assert_eq!(settings.ocr_languages, "eng+por");
        assert_eq!(settings.ocr_quality, OcrQuality::Medium);
        assert_eq!(settings.output_prefix, "translated_");
        assert_eq!(settings.model, None);
        assert!(settings.extra_keywords.is_empty());
    }

    #[test]
    fn keyword_lists_accumulate_across_layers() {
        let mut settings = Settings::default();
        settings.merge(
            parse_settings("[translation]\nkeywords = [\"Kubernetes\", \" \"]\n", Path::new("x")).unwrap(),
        );
        settings.merge(
            parse_settings("[translation]\nkeywords = [\"Terraform\"]\n", Path::new("y")).unwrap(),
        );
        assert_eq!(settings.extra_keywords, vec!["Kubernetes", "Terraform"]);
    }

    #[test]
    fn later_layers_override_and_invalid_values_are_ignored() {
        let mut settings = Settings::default();
        settings.merge(
            parse_settings(
                r#"
                [translation]
                target_language = "es"
                chunk_size = 0

                [ocr]
                languages = "  "
                quality = "HIGH"
                native_text_threshold = 5

                [output]
                prefix = "es_"
                "#,
                Path::new("x"),
            )
            .unwrap(),
        );
        assert_eq!(settings.target_language, "es");
        assert_eq!(settings.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(settings.ocr_languages, DEFAULT_OCR_LANGUAGES);
        assert_eq!(settings.ocr_quality, OcrQuality::High);
        assert_eq!(settings.native_text_threshold, 5);
        assert_eq!(settings.output_prefix, "es_");
    }

    #[test]
    fn unknown_quality_keeps_previous_value() {
        let mut settings = Settings::default();
        settings.merge(parse_settings("[ocr]\nquality = \"ultra\"\n", Path::new("x")).unwrap());
        assert_eq!(settings.ocr_quality, OcrQuality::Medium);
    }

    #[test]
    fn missing_extra_file_is_an_error() {
        let err = load_settings(Some(Path::new("/nonexistent/pdf-translate.toml"))).unwrap_err();
        assert!(err.to_string().contains("settings file not found"));
    }

    #[test]
    fn malformed_file_reports_its_path() {
        let err = parse_settings("[translation\n", Path::new("broken.toml")).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }
}
