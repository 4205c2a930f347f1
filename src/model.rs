use anyhow::{anyhow, Result};
use indexmap::IndexMap;
use serde::Serialize;
use std::str::FromStr;

/// Original (trimmed) block text to translated text, in first-seen document order.
pub type TranslationMap = IndexMap<String, String>;

pub const DEFAULT_FONT_FAMILY: &str = "Helvetica";

/// One positioned line or run of text. `x`/`y` is the top-left corner in page
/// space with Y growing downward from the top of the page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextBlock {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub font_size: f32,
    pub font_family: String,
    pub page_number: u32,
}

impl TextBlock {
    /// Lookup key into a [`TranslationMap`].
    pub fn key(&self) -> &str {
        self.text.trim()
    }

    pub fn is_blank(&self) -> bool {
        self.key().is_empty()
    }

    /// Maps a block measured on an upscaled bitmap back into native page space.
    pub fn rescaled(&self, scale_x: f32, scale_y: f32) -> TextBlock {
        TextBlock {
            text: self.text.clone(),
            x: self.x * scale_x,
            y: self.y * scale_y,
            width: self.width * scale_x,
            height: self.height * scale_y,
            font_size: self.font_size * scale_y,
            font_family: self.font_family.clone(),
            page_number: self.page_number,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddedImage {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageLayout {
    pub width: f32,
    pub height: f32,
    pub blocks: Vec<TextBlock>,
    pub images: Vec<EmbeddedImage>,
}

impl PageLayout {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            blocks: Vec::new(),
            images: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrQuality {
    Low,
    #[default]
    Medium,
    High,
}

impl OcrQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcrQuality::Low => "low",
            OcrQuality::Medium => "medium",
            OcrQuality::High => "high",
        }
    }

    /// Rasterization scale relative to the 72 DPI page baseline.
    pub fn render_scale(&self) -> f32 {
        match self {
            OcrQuality::Low => 2.0,
            OcrQuality::Medium => 3.5,
            OcrQuality::High => 4.5,
        }
    }

    pub fn target_dpi(&self) -> f32 {
        self.render_scale() * BASE_DPI
    }
}

pub const BASE_DPI: f32 = 72.0;

impl FromStr for OcrQuality {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "low" => Ok(OcrQuality::Low),
            "medium" | "med" => Ok(OcrQuality::Medium),
            "high" => Ok(OcrQuality::High),
            other => Err(anyhow!(
                "invalid ocr quality '{}' (expected low, medium, high)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranslationOptions {
    pub preserve_layout: bool,
    pub preserve_keywords: bool,
    pub ocr_quality: OcrQuality,
    pub target_language: String,
}

impl Default for TranslationOptions {
    fn default() -> Self {
        Self {
            preserve_layout: true,
            preserve_keywords: true,
            ocr_quality: OcrQuality::Medium,
            target_language: "pt-BR".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Idle,
    Processing,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessedDocument {
    pub name: String,
    pub original_text: String,
    pub translated_text: String,
    pub pages: Vec<PageLayout>,
    pub status: DocumentStatus,
    pub progress: u8,
    pub error: Option<String>,
}

impl ProcessedDocument {
    pub fn completed(name: impl Into<String>, pages: Vec<PageLayout>, map: &TranslationMap) -> Self {
        let original_text = map.keys().cloned().collect::<Vec<_>>().join("\n");
        let translated_text = map.values().cloned().collect::<Vec<_>>().join("\n");
        Self {
            name: name.into(),
            original_text,
            translated_text,
            pages,
            status: DocumentStatus::Completed,
            progress: 100,
            error: None,
        }
    }

    pub fn failed(name: impl Into<String>, progress: u8, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            original_text: String::new(),
            translated_text: String::new(),
            pages: Vec::new(),
            status: DocumentStatus::Error,
            progress,
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(text: &str) -> TextBlock {
        TextBlock {
            text: text.to_string(),
            x: 0.0,
            y: 0.0,
            width: 100.0,
            height: 20.0,
            font_size: 16.0,
            font_family: DEFAULT_FONT_FAMILY.to_string(),
            page_number: 1,
        }
    }

    #[test]
    fn rescale_maps_ocr_space_back_to_page_space() {
        let scaled = block("line").rescaled(1.0 / 3.5, 1.0 / 3.5);
        assert!((scaled.width - 28.571).abs() < 0.01);
        assert!((scaled.height - 5.714).abs() < 0.01);
        assert!((scaled.font_size - 4.571).abs() < 0.01);
        assert_eq!(scaled.x, 0.0);
        assert_eq!(scaled.text, "line");
    }

    #[test]
    fn key_is_trimmed() {
        assert_eq!(block("  Hello  ").key(), "Hello");
        assert!(block(" \t ").is_blank());
    }

    #[test]
    fn parses_quality_tiers() {
        assert_eq!("HIGH".parse::<OcrQuality>().unwrap(), OcrQuality::High);
        assert_eq!(" low ".parse::<OcrQuality>().unwrap(), OcrQuality::Low);
        assert!("ultra".parse::<OcrQuality>().is_err());
        assert_eq!(OcrQuality::Medium.target_dpi(), 252.0);
    }

    #[test]
    fn completed_document_joins_texts_in_order() {
        let mut map = TranslationMap::new();
        map.insert("Hello".to_string(), "Olá".to_string());
        map.insert("World".to_string(), "Mundo".to_string());
        let doc = ProcessedDocument::completed("a.pdf", Vec::new(), &map);
        assert_eq!(doc.original_text, "Hello\nWorld");
        assert_eq!(doc.translated_text, "Olá\nMundo");
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert_eq!(doc.progress, 100);
    }
}
