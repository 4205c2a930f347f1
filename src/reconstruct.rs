use anyhow::Result;
use tracing::{debug, warn};

use crate::model::{PageLayout, TextBlock, TranslationMap};
use crate::pdf::{DocumentWriter, DrawCall};

/// Share of the block height between its top edge and the text baseline.
pub const BASELINE_OFFSET: f32 = 0.8;
pub const FONT_SHRINK: f32 = 0.9;
pub const MIN_FONT_SIZE: f32 = 4.0;

const FLOW_MARGIN: f32 = 36.0;
const FLOW_FONT_SIZE: f32 = 11.0;
const FLOW_LINE_HEIGHT: f32 = 1.3;
/// Average Helvetica advance in em, used to wrap flowed lines.
const FLOW_AVG_CHAR_WIDTH: f32 = 0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildStats {
    pub drawn: usize,
    pub skipped: usize,
}

/// Draws every page of `pages` into `writer`, substituting translated text.
///
/// With `preserve_layout` each block lands at its source position; otherwise
/// the texts of each page are flowed top-down from the left margin. Blocks the
/// writer refuses are logged and skipped; a fatal writer error aborts.
pub fn rebuild(
    pages: &[PageLayout],
    map: &TranslationMap,
    writer: &mut dyn DocumentWriter,
    preserve_layout: bool,
) -> Result<RebuildStats> {
    let mut stats = RebuildStats::default();
    for (index, page) in pages.iter().enumerate() {
        if preserve_layout {
            draw_positioned(page, map, writer, &mut stats)?;
        } else {
            draw_flowed(page, map, writer, &mut stats)?;
        }
        debug!("rebuilt page {}/{}", index + 1, pages.len());
    }
    Ok(stats)
}

/// Translated text for `block`, or its own text when the map has no entry.
pub fn resolve<'a>(map: &'a TranslationMap, block: &'a TextBlock) -> &'a str {
    map.get(block.key())
        .map(String::as_str)
        .unwrap_or(block.text.as_str())
}

/// Output placement for a block in bottom-left page coordinates.
pub fn placement(page_height: f32, block: &TextBlock) -> (f32, f32, f32) {
    let y = page_height - block.y - block.height * BASELINE_OFFSET;
    let size = (block.font_size * FONT_SHRINK).max(MIN_FONT_SIZE);
    (block.x, y, size)
}

fn draw_positioned(
    page: &PageLayout,
    map: &TranslationMap,
    writer: &mut dyn DocumentWriter,
    stats: &mut RebuildStats,
) -> Result<()> {
    writer.add_page(page.width, page.height)?;
    for block in &page.blocks {
        let text = resolve(map, block);
        if text.trim().is_empty() {
            continue;
        }
        let (x, y, size) = placement(page.height, block);
        draw(
            writer,
            DrawCall {
                text: text.to_string(),
                x,
                y,
                size,
            },
            block.page_number,
            stats,
        )?;
    }
    Ok(())
}

fn draw_flowed(
    page: &PageLayout,
    map: &TranslationMap,
    writer: &mut dyn DocumentWriter,
    stats: &mut RebuildStats,
) -> Result<()> {
    let line_height = FLOW_FONT_SIZE * FLOW_LINE_HEIGHT;
    let top = page.height - FLOW_MARGIN - FLOW_FONT_SIZE;
    let max_chars =
        ((page.width - 2.0 * FLOW_MARGIN) / (FLOW_FONT_SIZE * FLOW_AVG_CHAR_WIDTH)).max(1.0) as usize;

    writer.add_page(page.width, page.height)?;
    let mut y = top;
    for block in &page.blocks {
        let text = resolve(map, block);
        if text.trim().is_empty() {
            continue;
        }
        for line in wrap(text.trim(), max_chars) {
            if y < FLOW_MARGIN {
                writer.add_page(page.width, page.height)?;
                y = top;
            }
            draw(
                writer,
                DrawCall {
                    text: line,
                    x: FLOW_MARGIN,
                    y,
                    size: FLOW_FONT_SIZE,
                },
                block.page_number,
                stats,
            )?;
            y -= line_height;
        }
    }
    Ok(())
}

fn draw(
    writer: &mut dyn DocumentWriter,
    call: DrawCall,
    page_number: u32,
    stats: &mut RebuildStats,
) -> Result<()> {
    match writer.draw_text(&call) {
        Ok(()) => stats.drawn += 1,
        Err(err) if err.is_fatal() => return Err(err.into()),
        Err(err) => {
            warn!("page {}: skipping block: {}", page_number, err);
            stats.skipped += 1;
        }
    }
    Ok(())
}

/// Greedy word wrap on character counts. Words longer than a line are kept whole.
fn wrap(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > max_chars {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
