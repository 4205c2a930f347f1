use anyhow::{anyhow, Context, Result};
use image::DynamicImage;
use std::fs;
use std::path::Path;

use crate::error::PipelineError;

pub const PDF_MIME: &str = "application/pdf";
pub const DEFAULT_MAX_FILE_SIZE_MB: u64 = 20;

const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Pdf,
    Image,
}

/// A size-checked, type-detected input file held in memory.
#[derive(Debug, Clone)]
pub struct InputDocument {
    pub name: String,
    pub mime: String,
    pub kind: InputKind,
    pub bytes: Vec<u8>,
}

impl InputDocument {
    /// Detects the type of in-memory bytes. `name` supplies the extension
    /// fallback when the content is not recognised.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, PipelineError> {
        let name = name.into();
        let mime = detect_mime(&bytes, Path::new(&name)).ok_or_else(|| {
            PipelineError::UnsupportedInput(format!(
                "'{}' is neither a PDF nor an image",
                name
            ))
        })?;
        let kind = if mime == PDF_MIME {
            InputKind::Pdf
        } else if mime.starts_with("image/") {
            InputKind::Image
        } else {
            return Err(PipelineError::UnsupportedInput(format!(
                "'{}' has type {}",
                name, mime
            )));
        };
        Ok(Self {
            name,
            mime,
            kind,
            bytes,
        })
    }

    pub fn decode_image(&self) -> Result<DynamicImage> {
        image::load_from_memory(&self.bytes)
            .with_context(|| format!("failed to decode image '{}'", self.name))
    }
}

pub fn max_file_size(megabytes: u64) -> u64 {
    megabytes.saturating_mul(BYTES_PER_MB)
}

/// Reads `path` after checking its size against `limit` bytes.
///
/// The size comes from file metadata, so an oversize file is rejected without
/// reading any of its content.
pub fn read_input(path: &Path, limit: u64) -> Result<InputDocument, PipelineError> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("failed to stat input: {}", path.display()))
        .map_err(PipelineError::DocumentParse)?;
    if !metadata.is_file() {
        return Err(PipelineError::UnsupportedInput(format!(
            "{} is not a file",
            path.display()
        )));
    }
    check_size(metadata.len(), limit)?;
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read input: {}", path.display()))
        .map_err(PipelineError::DocumentParse)?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| PipelineError::DocumentParse(anyhow!("input path has no file name")))?;
    InputDocument::from_bytes(name, bytes)
}

pub fn check_size(size: u64, limit: u64) -> Result<(), PipelineError> {
    if size > limit {
        return Err(PipelineError::OversizeInput { size, limit });
    }
    Ok(())
}

fn detect_mime(bytes: &[u8], path: &Path) -> Option<String> {
    if let Some(kind) = infer::get(bytes) {
        return Some(kind.mime_type().to_string());
    }
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    mime_from_extension(&ext).map(str::to_string)
}

fn mime_from_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "pdf" => Some(PDF_MIME),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "tif" | "tiff" => Some("image/tiff"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::new_rgb8(4, 3)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn oversize_file_is_rejected_from_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.pdf");
        fs::write(&path, vec![b'x'; 64]).unwrap();
        match read_input(&path, 63).unwrap_err() {
            PipelineError::OversizeInput { size, limit } => assert_eq!((size, limit), (64, 63)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn sniffs_pdf_regardless_of_name() {
        let doc = InputDocument::from_bytes("scan.bin", b"%PDF-1.7\n%\xe2\xe3\n".to_vec()).unwrap();
        assert_eq!(doc.kind, InputKind::Pdf);
        assert_eq!(doc.mime, PDF_MIME);
    }

    #[test]
    fn detects_and_decodes_images() {
        let doc = InputDocument::from_bytes("page.png", png_bytes()).unwrap();
        assert_eq!(doc.kind, InputKind::Image);
        let image = doc.decode_image().unwrap();
        assert_eq!((image.width(), image.height()), (4, 3));
    }

    #[test]
    fn falls_back_to_extension() {
        let doc = InputDocument::from_bytes("broken.PDF", b"not really".to_vec()).unwrap();
        assert_eq!(doc.kind, InputKind::Pdf);
    }

    #[test]
    fn rejects_other_files() {
        let err = InputDocument::from_bytes("notes.txt", b"hello".to_vec()).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedInput(_)));
        let zip = b"PK\x03\x04\x14\x00\x00\x00".to_vec();
        let err = InputDocument::from_bytes("a.zip", zip).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedInput(_)));
    }

    #[test]
    fn reads_small_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.png");
        fs::write(&path, png_bytes()).unwrap();
        let doc = read_input(&path, max_file_size(DEFAULT_MAX_FILE_SIZE_MB)).unwrap();
        assert_eq!(doc.name, "page.png");
        assert_eq!(doc.kind, InputKind::Image);
    }
}
