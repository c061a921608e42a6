use image::{DynamicImage, GrayImage, Luma};
use std::io::Write;
use tempfile::NamedTempFile;

use crate::error::OcrEngineError;

const BLUR_KERNEL: usize = 3;
const THRESHOLD_BLOCK: usize = 11;
const THRESHOLD_OFFSET: f32 = 2.0;

/// Grayscale, light blur, then Gaussian adaptive threshold.
pub(super) fn binarize_for_ocr(image: &DynamicImage) -> GrayImage {
    let luma = flatten_to_luma(image);
    let blurred = gaussian_filter(&luma, BLUR_KERNEL);
    let blurred = to_gray(&blurred, luma.width(), luma.height());
    adaptive_threshold(&blurred, THRESHOLD_BLOCK, THRESHOLD_OFFSET)
}

/// Writes the derived image to a temp file that is removed when dropped.
pub(super) fn write_derived(image: GrayImage) -> Result<NamedTempFile, OcrEngineError> {
    let mut tmp = tempfile::Builder::new()
        .prefix("searchable-pdf-prep-")
        .suffix(".png")
        .tempfile()
        .map_err(|err| OcrEngineError::Preprocess(format!("temp file: {err}")))?;
    DynamicImage::ImageLuma8(image)
        .write_to(&mut tmp, image::ImageFormat::Png)
        .map_err(|err| OcrEngineError::Preprocess(format!("write derived image: {err}")))?;
    tmp.flush().ok();
    Ok(tmp)
}

fn flatten_to_luma(image: &DynamicImage) -> GrayImage {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut luma = GrayImage::new(width, height);

    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as f32 / 255.0;
        let r = r as f32 * alpha + 255.0 * (1.0 - alpha);
        let g = g as f32 * alpha + 255.0 * (1.0 - alpha);
        let b = b as f32 * alpha + 255.0 * (1.0 - alpha);
        let value = (0.299 * r + 0.587 * g + 0.114 * b).round() as u8;
        luma.put_pixel(x, y, Luma([value]));
    }
    luma
}

/// Normalized 1-D Gaussian with the sigma OpenCV derives from the kernel size.
fn gaussian_kernel(size: usize) -> Vec<f32> {
    let sigma = 0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let half = (size / 2) as i32;
    let mut kernel = (-half..=half)
        .map(|i| (-((i * i) as f32) / (2.0 * sigma * sigma)).exp())
        .collect::<Vec<_>>();
    let sum: f32 = kernel.iter().sum();
    for weight in &mut kernel {
        *weight /= sum;
    }
    kernel
}

/// Separable Gaussian filter with replicated borders. Returns row-major floats.
fn gaussian_filter(image: &GrayImage, size: usize) -> Vec<f32> {
    let kernel = gaussian_kernel(size);
    let (width, height) = (image.width() as usize, image.height() as usize);
    let half = (size / 2) as isize;
    let src = image.as_raw().iter().map(|v| *v as f32).collect::<Vec<_>>();

    let mut horizontal = vec![0f32; width * height];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = (x as isize + k as isize - half).clamp(0, width as isize - 1) as usize;
                acc += src[y * width + sx] * weight;
            }
            horizontal[y * width + x] = acc;
        }
    }

    let mut out = vec![0f32; width * height];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = (y as isize + k as isize - half).clamp(0, height as isize - 1) as usize;
                acc += horizontal[sy * width + x] * weight;
            }
            out[y * width + x] = acc;
        }
    }
    out
}

fn to_gray(values: &[f32], width: u32, height: u32) -> GrayImage {
    let mut gray = GrayImage::new(width, height);
    for (pixel, value) in gray.pixels_mut().zip(values) {
        pixel[0] = value.round().clamp(0.0, 255.0) as u8;
    }
    gray
}

/// White where a pixel is brighter than its weighted neighbourhood minus `offset`.
fn adaptive_threshold(image: &GrayImage, block: usize, offset: f32) -> GrayImage {
    let local_mean = gaussian_filter(image, block);
    let mut output = image.clone();
    for (pixel, mean) in output.pixels_mut().zip(local_mean) {
        pixel[0] = if pixel[0] as f32 > mean - offset { 255 } else { 0 };
    }
    output
}
