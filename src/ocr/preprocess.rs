use image::{DynamicImage, RgbaImage};

/// Grayscale, contrast-stretch and binarize a bitmap for OCR.
///
/// The threshold is the midpoint of the observed luminance range, applied
/// globally. Alpha is left untouched.
pub fn optimize_for_ocr(image: &DynamicImage) -> RgbaImage {
    let mut rgba = image.to_rgba8();

    let mut min = u8::MAX;
    let mut max = u8::MIN;
    for pixel in rgba.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        let gray = luminance(r, g, b);
        min = min.min(gray);
        max = max.max(gray);
        pixel.0 = [gray, gray, gray, a];
    }
    if min > max {
        return rgba;
    }

    let range = if max == min { 1.0 } else { (max - min) as f32 };
    for pixel in rgba.pixels_mut() {
        let stretched = (pixel.0[0] - min) as f32 / range * 255.0;
        let value = if stretched > 127.5 { 255 } else { 0 };
        pixel.0 = [value, value, value, pixel.0[3]];
    }
    rgba
}

/// Rescales from `current_dpi` to `target_dpi`. Never shrinks.
pub fn upscale(image: DynamicImage, target_dpi: f32, current_dpi: f32) -> DynamicImage {
    let scale = target_dpi / current_dpi;
    if !scale.is_finite() || scale <= 1.0 {
        return image;
    }
    let width = (image.width() as f32 * scale).floor().max(1.0) as u32;
    let height = (image.height() as f32 * scale).floor().max(1.0) as u32;
    image.resize_exact(width, height, image::imageops::FilterType::Lanczos3)
}

fn luminance(r: u8, g: u8, b: u8) -> u8 {
    (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32)
        .round()
        .clamp(0.0, 255.0) as u8
}
