use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, ImageFormat};
use indexmap::IndexMap;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;
use tracing::{debug, warn};

use super::text::join_words;
use super::{OcrBBox, OcrBlock, OcrEngine, OcrLine, OcrPage, OcrParagraph};

const PAGE_SEGMENTATION_MODE: u32 = 3;

/// `tesseract` CLI wrapper. Bitmaps are staged in a private temp dir that
/// lives until [`OcrEngine::terminate`].
pub struct TesseractEngine {
    languages: String,
    workdir: Option<TempDir>,
    pages: usize,
}

impl TesseractEngine {
    pub fn start(languages: &str) -> Result<Self> {
        let languages = normalize_ocr_languages(languages)?;
        let workdir = tempfile::Builder::new()
            .prefix("pdf-translate-ocr")
            .tempdir()
            .with_context(|| "failed to create temp dir for OCR")?;
        debug!("tesseract session using languages {}", languages);
        Ok(Self {
            languages,
            workdir: Some(workdir),
            pages: 0,
        })
    }
}

impl OcrEngine for TesseractEngine {
    fn recognize(&mut self, image: &DynamicImage, dpi: u32) -> Result<OcrPage> {
        let dir = self
            .workdir
            .as_ref()
            .ok_or_else(|| anyhow!("OCR engine already terminated"))?;
        self.pages += 1;
        let path = dir.path().join(format!("page-{:03}.png", self.pages));
        image
            .save_with_format(&path, ImageFormat::Png)
            .with_context(|| "failed to write temp image for OCR")?;
        let tsv = run_tesseract_tsv(&path, &self.languages, dpi);
        if let Err(err) = fs::remove_file(&path) {
            warn!("failed to remove OCR temp image {}: {}", path.display(), err);
        }
        parse_tsv_page(&tsv?)
    }

    fn terminate(&mut self) -> Result<()> {
        if let Some(dir) = self.workdir.take() {
            dir.close()
                .with_context(|| "failed to remove OCR temp dir")?;
        }
        Ok(())
    }
}

pub fn list_tesseract_languages() -> Result<Vec<String>> {
    let output = Command::new("tesseract")
        .arg("--list-langs")
        .output()
        .with_context(|| "failed to run tesseract --list-langs")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("tesseract --list-langs failed: {}", stderr.trim()));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect())
}

fn normalize_ocr_languages(requested: &str) -> Result<String> {
    let trimmed = requested.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("ocr languages is empty"));
    }

    let available = match list_tesseract_languages() {
        Ok(list) => list,
        Err(_) => return Ok(trimmed.to_string()),
    };

    let (chosen, missing): (Vec<&str>, Vec<&str>) = trimmed
        .split(['+', ',', ' '])
        .map(str::trim)
        .filter(|lang| !lang.is_empty())
        .partition(|lang| available.iter().any(|value| value == lang));

    if chosen.is_empty() {
        return Err(anyhow!(
            "ocr language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        ));
    }
    if !missing.is_empty() {
        warn!(
            "ocr language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        );
    }
    Ok(chosen.join("+"))
}

fn run_tesseract_tsv(path: &Path, languages: &str, dpi: u32) -> Result<String> {
    let output = Command::new("tesseract")
        .arg(path)
        .arg("stdout")
        .args(tsv_args(languages, dpi))
        .output()
        .with_context(|| "failed to run tesseract (is it installed?)")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("tesseract failed: {}", stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn tsv_args(languages: &str, dpi: u32) -> Vec<String> {
    vec![
        "-l".to_string(),
        languages.to_string(),
        "--oem".to_string(),
        "1".to_string(),
        "--psm".to_string(),
        PAGE_SEGMENTATION_MODE.to_string(),
        "--dpi".to_string(),
        dpi.max(1).to_string(),
        "tsv".to_string(),
    ]
}

#[derive(Default)]
struct LineRows {
    bbox: Option<OcrBBox>,
    words: Vec<(String, f32, OcrBBox)>,
}

type LineKey = (i32, i32, i32, i32);

/// Parses tesseract TSV output into the block/paragraph/line hierarchy.
///
/// Line geometry comes from the level-4 rows; line confidence is the mean of
/// its word confidences.
pub fn parse_tsv_page(tsv: &str) -> Result<OcrPage> {
    let mut rows: IndexMap<LineKey, LineRows> = IndexMap::new();

    for row in tsv.lines().skip(1) {
        let cols = row.split('\t').collect::<Vec<_>>();
        if cols.len() < 11 {
            continue;
        }
        let level: i32 = cols[0].trim().parse().unwrap_or(0);
        if level != 4 && level != 5 {
            continue;
        }
        let num = |idx: usize| cols[idx].trim().parse::<i32>().unwrap_or(0);
        let key = (num(1), num(2), num(3), num(4));
        let left = num(6) as f32;
        let top = num(7) as f32;
        let bbox = OcrBBox {
            x0: left,
            y0: top,
            x1: left + num(8).max(0) as f32,
            y1: top + num(9).max(0) as f32,
        };
        let entry = rows.entry(key).or_default();
        if level == 4 {
            entry.bbox = Some(bbox);
            continue;
        }
        let conf: f32 = cols[10].trim().parse().unwrap_or(-1.0);
        let text = cols.get(11).map(|value| value.trim()).unwrap_or_default();
        if text.is_empty() || conf < 0.0 {
            continue;
        }
        entry.words.push((text.to_string(), conf, bbox));
    }

    let mut page = OcrPage::default();
    let mut last_block: Option<(i32, i32)> = None;
    let mut last_paragraph: Option<(i32, i32, i32)> = None;
    for ((page_num, block_num, par_num, _), line_rows) in rows {
        let Some(line) = build_line(line_rows) else {
            continue;
        };
        if last_block != Some((page_num, block_num)) {
            page.blocks.push(OcrBlock::default());
            last_block = Some((page_num, block_num));
            last_paragraph = None;
        }
        let block = page
            .blocks
            .last_mut()
            .ok_or_else(|| anyhow!("OCR block missing while parsing TSV"))?;
        if last_paragraph != Some((page_num, block_num, par_num)) {
            block.paragraphs.push(OcrParagraph::default());
            last_paragraph = Some((page_num, block_num, par_num));
        }
        block
            .paragraphs
            .last_mut()
            .ok_or_else(|| anyhow!("OCR paragraph missing while parsing TSV"))?
            .lines
            .push(line);
    }
    Ok(page)
}

fn build_line(rows: LineRows) -> Option<OcrLine> {
    let text = join_words(rows.words.iter().map(|(word, _, _)| word.as_str()));
    if text.is_empty() {
        return None;
    }
    let bbox = match rows.bbox {
        Some(bbox) => bbox,
        None => rows
            .words
            .iter()
            .map(|(_, _, bbox)| *bbox)
            .reduce(|a, b| OcrBBox {
                x0: a.x0.min(b.x0),
                y0: a.y0.min(b.y0),
                x1: a.x1.max(b.x1),
                y1: a.y1.max(b.y1),
            })?,
    };
    let confidence =
        rows.words.iter().map(|(_, conf, _)| *conf).sum::<f32>() / rows.words.len() as f32;
    Some(OcrLine {
        text,
        bbox,
        confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_render_dpi_to_tesseract() {
        let args = tsv_args("eng+por", 252);
        let dpi = args.iter().position(|arg| arg == "--dpi").unwrap();
        assert_eq!(args[dpi + 1], "252");
        assert_eq!(&args[..2], ["-l", "eng+por"]);
        assert_eq!(args.last().map(String::as_str), Some("tsv"));
    }

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn tsv(rows: &[&str]) -> String {
        let mut out = vec![HEADER];
        out.extend_from_slice(rows);
        out.join("\n")
    }

    #[test]
    fn groups_words_into_lines_paragraphs_and_blocks() {
        let input = tsv(&[
            "1\t1\t0\t0\t0\t0\t0\t0\t800\t600\t-1\t",
            "2\t1\t1\t0\t0\t0\t10\t10\t300\t60\t-1\t",
            "3\t1\t1\t1\t0\t0\t10\t10\t300\t60\t-1\t",
            "4\t1\t1\t1\t1\t0\t10\t10\t300\t20\t-1\t",
            "5\t1\t1\t1\t1\t1\t10\t10\t100\t20\t96.5\tHello",
            "5\t1\t1\t1\t1\t2\t120\t10\t190\t20\t91.5\tWorld",
            "4\t1\t1\t1\t2\t0\t10\t40\t200\t20\t-1\t",
            "5\t1\t1\t1\t2\t1\t10\t40\t200\t20\t80\tdef",
            "2\t1\t2\t0\t0\t0\t10\t100\t300\t20\t-1\t",
            "3\t1\t2\t1\t0\t0\t10\t100\t300\t20\t-1\t",
            "4\t1\t2\t1\t1\t0\t10\t100\t300\t20\t-1\t",
            "5\t1\t2\t1\t1\t1\t10\t100\t300\t20\t70\tpass",
        ]);
        let page = parse_tsv_page(&input).unwrap();
        assert_eq!(page.blocks.len(), 2);
        assert_eq!(page.blocks[0].paragraphs.len(), 1);
        assert_eq!(page.blocks[0].paragraphs[0].lines.len(), 2);

        let first = &page.blocks[0].paragraphs[0].lines[0];
        assert_eq!(first.text, "Hello World");
        assert_eq!(
            first.bbox,
            OcrBBox {
                x0: 10.0,
                y0: 10.0,
                x1: 310.0,
                y1: 30.0
            }
        );
        assert_eq!(first.confidence, 94.0);

        let texts = page.lines().map(|l| l.text.as_str()).collect::<Vec<_>>();
        assert_eq!(texts, vec!["Hello World", "def", "pass"]);
    }

    #[test]
    fn drops_lines_without_words() {
        let input = tsv(&[
            "4\t1\t1\t1\t1\t0\t10\t10\t300\t20\t-1\t",
            "5\t1\t1\t1\t1\t1\t10\t10\t100\t20\t-1\t ",
        ]);
        let page = parse_tsv_page(&input).unwrap();
        assert!(page.blocks.is_empty());
    }

    #[test]
    fn falls_back_to_word_union_without_line_row() {
        let input = tsv(&[
            "5\t1\t1\t1\t1\t1\t10\t12\t50\t20\t90\tfoo",
            "5\t1\t1\t1\t1\t2\t70\t10\t30\t25\t90\tbar",
        ]);
        let page = parse_tsv_page(&input).unwrap();
        let line = page.lines().next().unwrap();
        assert_eq!(line.text, "foo bar");
        assert_eq!(
            line.bbox,
            OcrBBox {
                x0: 10.0,
                y0: 10.0,
                x1: 100.0,
                y1: 35.0
            }
        );
    }

    #[test]
    fn ignores_malformed_rows() {
        let input = tsv(&["garbage", "5\t1\t1"]);
        assert_eq!(parse_tsv_page(&input).unwrap(), OcrPage::default());
    }
}
