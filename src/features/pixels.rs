//! Pixel-level signals: HSV colour histograms and structural similarity.
//!
//! Pixels come from a [`PixelSource`]; the engine never reads files itself.
//! Each photo is reduced once to a [`PixelSignature`] so a reference image is
//! not re-processed for every candidate on the short list.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};

use crate::error::Result;
use crate::photo::PhotoRecord;

/// Supplies decoded RGB pixels for a photo.
pub trait PixelSource: Send + Sync {
    /// Pixels for `photo`, or `None` when the photo has no image data.
    fn load(&self, photo: &PhotoRecord) -> Result<Option<RgbImage>>;
}

/// Reads the photo from `PhotoRecord::path` and downsizes it.
#[derive(Debug, Clone)]
pub struct FilePixelSource {
    max_dimension: u32,
}

impl FilePixelSource {
    pub fn new(max_dimension: u32) -> Self {
        Self {
            max_dimension: max_dimension.max(8),
        }
    }
}

impl Default for FilePixelSource {
    fn default() -> Self {
        Self::new(256)
    }
}

impl PixelSource for FilePixelSource {
    fn load(&self, photo: &PhotoRecord) -> Result<Option<RgbImage>> {
        let Some(path) = photo.path.as_deref() else {
            return Ok(None);
        };
        let path = Path::new(path);
        if !path.exists() {
            return Ok(None);
        }
        // thumbnail() keeps the aspect ratio and is cheaper than resize for large images
        let img = image::open(path)?;
        let thumbnail = img.thumbnail(self.max_dimension, self.max_dimension);
        Ok(Some(thumbnail.to_rgb8()))
    }
}

/// Histogram bins per HSV channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistogramBins {
    pub hue: usize,
    pub saturation: usize,
    pub value: usize,
}

impl HistogramBins {
    fn total(&self) -> usize {
        self.hue * self.saturation * self.value
    }
}

impl Default for HistogramBins {
    fn default() -> Self {
        Self {
            hue: 16,
            saturation: 4,
            value: 4,
        }
    }
}

/// Reduced pixel data for one photo.
#[derive(Debug, Clone)]
pub struct PixelSignature {
    histogram: Vec<f64>,
    gray: GrayImage,
}

impl PixelSignature {
    /// Normalized HSV histogram plus a grayscale copy at `resolution`².
    pub fn compute(image: &RgbImage, bins: HistogramBins, resolution: u32) -> Self {
        let resolution = resolution.max(8);
        let gray_source = image::DynamicImage::ImageRgb8(image.clone()).to_luma8();
        let gray = imageops::resize(&gray_source, resolution, resolution, FilterType::Triangle);
        Self {
            histogram: hsv_histogram(image, bins),
            gray,
        }
    }

    pub fn color_similarity(&self, other: &PixelSignature) -> Option<f32> {
        bhattacharyya(&self.histogram, &other.histogram)
    }

    pub fn structural_similarity(&self, other: &PixelSignature) -> Option<f32> {
        ssim(&self.gray, &other.gray)
    }
}

/// RGB (0-255) to HSV with h in [0, 360), s and v in [0, 1].
fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f64, f64, f64) {
    let (r, g, b) = (r as f64 / 255.0, g as f64 / 255.0, b as f64 / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let saturation = if max == 0.0 { 0.0 } else { delta / max };
    (hue, saturation, max)
}

fn bin_index(value: f64, range: f64, bins: usize) -> usize {
    ((value / range * bins as f64) as usize).min(bins - 1)
}

/// Normalized HSV histogram (sums to 1 for a non-empty image).
pub fn hsv_histogram(image: &RgbImage, bins: HistogramBins) -> Vec<f64> {
    let bins = HistogramBins {
        hue: bins.hue.max(1),
        saturation: bins.saturation.max(1),
        value: bins.value.max(1),
    };
    let mut histogram = vec![0.0f64; bins.total()];
    for pixel in image.pixels() {
        let [r, g, b] = pixel.0;
        let (h, s, v) = rgb_to_hsv(r, g, b);
        let hi = bin_index(h, 360.0, bins.hue);
        let si = bin_index(s, 1.0, bins.saturation);
        let vi = bin_index(v, 1.0, bins.value);
        histogram[(hi * bins.saturation + si) * bins.value + vi] += 1.0;
    }
    let total = (image.width() as f64) * (image.height() as f64);
    if total > 0.0 {
        for bin in &mut histogram {
            *bin /= total;
        }
    }
    histogram
}

/// Bhattacharyya coefficient of two normalized histograms.
pub fn bhattacharyya(a: &[f64], b: &[f64]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let (sum_a, sum_b): (f64, f64) = (a.iter().sum(), b.iter().sum());
    if sum_a <= 0.0 || sum_b <= 0.0 {
        return None;
    }
    let coefficient: f64 = a
        .iter()
        .zip(b)
        .map(|(p, q)| ((p / sum_a) * (q / sum_b)).sqrt())
        .sum();
    Some(coefficient.clamp(0.0, 1.0) as f32)
}

const SSIM_WINDOW: u32 = 8;
const SSIM_STRIDE: u32 = 4;
const SSIM_C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
const SSIM_C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);

/// Mean SSIM over sliding windows of two equally sized grayscale images,
/// clamped to [0, 1].
pub fn ssim(a: &GrayImage, b: &GrayImage) -> Option<f32> {
    if a.dimensions() != b.dimensions() {
        return None;
    }
    let (width, height) = a.dimensions();
    if width < SSIM_WINDOW || height < SSIM_WINDOW {
        return None;
    }

    let mut total = 0.0f64;
    let mut windows = 0usize;
    let mut y = 0;
    while y + SSIM_WINDOW <= height {
        let mut x = 0;
        while x + SSIM_WINDOW <= width {
            total += window_ssim(a, b, x, y);
            windows += 1;
            x += SSIM_STRIDE;
        }
        y += SSIM_STRIDE;
    }

    Some((total / windows as f64).clamp(0.0, 1.0) as f32)
}

fn window_ssim(a: &GrayImage, b: &GrayImage, x0: u32, y0: u32) -> f64 {
    let n = (SSIM_WINDOW * SSIM_WINDOW) as f64;
    let (mut sum_a, mut sum_b) = (0.0f64, 0.0f64);
    for y in y0..y0 + SSIM_WINDOW {
        for x in x0..x0 + SSIM_WINDOW {
            sum_a += a.get_pixel(x, y).0[0] as f64;
            sum_b += b.get_pixel(x, y).0[0] as f64;
        }
    }
    let (mean_a, mean_b) = (sum_a / n, sum_b / n);

    let (mut var_a, mut var_b, mut cov) = (0.0f64, 0.0f64, 0.0f64);
    for y in y0..y0 + SSIM_WINDOW {
        for x in x0..x0 + SSIM_WINDOW {
            let da = a.get_pixel(x, y).0[0] as f64 - mean_a;
            let db = b.get_pixel(x, y).0[0] as f64 - mean_b;
            var_a += da * da;
            var_b += db * db;
            cov += da * db;
        }
    }
    let (var_a, var_b, cov) = (var_a / n, var_b / n, cov / n);

    let numerator = (2.0 * mean_a * mean_b + SSIM_C1) * (2.0 * cov + SSIM_C2);
    let denominator = (mean_a * mean_a + mean_b * mean_b + SSIM_C1) * (var_a + var_b + SSIM_C2);
    numerator / denominator
}
