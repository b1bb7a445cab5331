//! Contrast normalization of the face crop (or whole frame).
//!
//! Lighting shifts the brightness statistics the classifier relies on, so the
//! region is histogram-equalized first. Contrast-limited adaptive
//! equalization (CLAHE) is preferred; small regions fall back to global
//! equalization and empty regions pass through untouched. Normalization
//! never fails and never changes dimensions.

use image::GrayImage;
use imageproc::contrast::equalize_histogram;
use moodlens_common::NormalizationConfig;

const BINS: usize = 256;

/// How a [`NormalizedRegion`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizationMethod {
    Clahe,
    Global,
    /// Passed through unmodified.
    Raw,
}

/// Grayscale region ready for statistics and smile detection.
#[derive(Debug, Clone)]
pub struct NormalizedRegion {
    pixels: GrayImage,
    method: NormalizationMethod,
}

impl NormalizedRegion {
    /// Wrap an already prepared luma image without touching it.
    pub fn from_gray(pixels: GrayImage) -> Self {
        Self {
            pixels,
            method: NormalizationMethod::Raw,
        }
    }

    pub fn pixels(&self) -> &GrayImage {
        &self.pixels
    }

    pub fn method(&self) -> NormalizationMethod {
        self.method
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.width() == 0 || self.pixels.height() == 0
    }
}

/// Applies CLAHE or global equalization according to configuration.
#[derive(Debug, Clone)]
pub struct RegionNormalizer {
    enabled: bool,
    clahe: bool,
    clip_limit: f64,
    tile_grid: u32,
}

impl Default for RegionNormalizer {
    fn default() -> Self {
        Self::from_config(&NormalizationConfig::default())
    }
}

impl RegionNormalizer {
    pub fn from_config(config: &NormalizationConfig) -> Self {
        Self {
            enabled: config.enabled,
            clahe: config.clahe,
            clip_limit: config.clip_limit,
            tile_grid: config.tile_grid.max(1),
        }
    }

    pub fn normalize(&self, gray: GrayImage) -> NormalizedRegion {
        let (w, h) = gray.dimensions();
        let method = if w == 0 || h == 0 || !self.enabled {
            NormalizationMethod::Raw
        } else if self.clahe && w >= self.tile_grid && h >= self.tile_grid {
            NormalizationMethod::Clahe
        } else {
            NormalizationMethod::Global
        };

        let pixels = match method {
            NormalizationMethod::Clahe => clahe(&gray, self.clip_limit, self.tile_grid),
            NormalizationMethod::Global => equalize_histogram(&gray),
            NormalizationMethod::Raw => gray,
        };

        tracing::trace!(?method, width = w, height = h, "Region normalized");
        NormalizedRegion { pixels, method }
    }
}

/// Contrast-limited adaptive histogram equalization with bilinear blending
/// between neighbouring tile mappings.
///
/// `gray` must be at least `tiles` pixels on each side.
pub fn clahe(gray: &GrayImage, clip_limit: f64, tiles: u32) -> GrayImage {
    let (w, h) = gray.dimensions();
    let n = tiles as usize;
    let tile_w = w as f64 / tiles as f64;
    let tile_h = h as f64 / tiles as f64;

    let tile_of = |pos: u32, size: f64| ((pos as f64 / size) as usize).min(n - 1);

    let mut hists = vec![[0u32; BINS]; n * n];
    let mut areas = vec![0u32; n * n];
    for (x, y, p) in gray.enumerate_pixels() {
        let t = tile_of(y, tile_h) * n + tile_of(x, tile_w);
        hists[t][p.0[0] as usize] += 1;
        areas[t] += 1;
    }

    let luts: Vec<[u8; BINS]> = hists
        .iter_mut()
        .zip(&areas)
        .map(|(hist, &area)| {
            if clip_limit > 0.0 {
                clip_histogram(hist, clip_limit, area);
            }
            cumulative_lut(hist, area)
        })
        .collect();

    let lut_at = |ty: usize, tx: usize, v: u8| luts[ty * n + tx][v as usize] as f64;

    GrayImage::from_fn(w, h, |x, y| {
        let v = gray.get_pixel(x, y).0[0];

        let (tx1, tx2, xa) = neighbours(x as f64 / tile_w - 0.5, n);
        let (ty1, ty2, ya) = neighbours(y as f64 / tile_h - 0.5, n);

        let top = lut_at(ty1, tx1, v) * (1.0 - xa) + lut_at(ty1, tx2, v) * xa;
        let bottom = lut_at(ty2, tx1, v) * (1.0 - xa) + lut_at(ty2, tx2, v) * xa;
        let out = top * (1.0 - ya) + bottom * ya;
        image::Luma([out.round().clamp(0.0, 255.0) as u8])
    })
}

/// Two tile indices to blend between and the weight of the second.
fn neighbours(pos: f64, n: usize) -> (usize, usize, f64) {
    let first = pos.floor();
    let weight = pos - first;
    let lo = if first < 0.0 { 0 } else { first as usize };
    let hi = ((first + 1.0).max(0.0) as usize).min(n - 1);
    (lo.min(n - 1), hi, weight)
}

/// Cap every bin and spread the excess evenly over all bins.
fn clip_histogram(hist: &mut [u32; BINS], clip_limit: f64, area: u32) {
    let limit = ((clip_limit * area as f64 / BINS as f64) as u32).max(1);

    let mut clipped = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            clipped += *bin - limit;
            *bin = limit;
        }
    }

    let batch = clipped / BINS as u32;
    let mut residual = clipped - batch * BINS as u32;
    for bin in hist.iter_mut() {
        *bin += batch;
    }

    if residual > 0 {
        let step = (BINS / residual as usize).max(1);
        let mut i = 0;
        while i < BINS && residual > 0 {
            hist[i] += 1;
            residual -= 1;
            i += step;
        }
    }
}

fn cumulative_lut(hist: &[u32; BINS], area: u32) -> [u8; BINS] {
    let scale = if area > 0 { 255.0 / area as f64 } else { 0.0 };
    let mut lut = [0u8; BINS];
    let mut sum = 0u32;
    for (slot, &count) in lut.iter_mut().zip(hist) {
        sum += count;
        *slot = (sum as f64 * scale).round().min(255.0) as u8;
    }
    lut
}
