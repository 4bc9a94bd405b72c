//! Hair color fidelity: estimate the dominant hair color of a candidate and
//! compare it with the target color in Lab space.

use image::DynamicImage;

use crate::config::ScoringConfig;
use crate::services::color_math::{delta_e76, rgb_to_lab, Rgb};
use crate::services::imaging;

/// Average color of the pixels classified as hair, channels 0.0..=255.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HairEstimate {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    /// Number of pixels that qualified; zero means the fallback was used.
    pub samples: u64,
}

/// Skin/face area left out of the scan: x in [25%, 75%), y in [20%, 70%).
fn in_face_area(x: u32, y: u32, width: u32, height: u32) -> bool {
    let x0 = (width as f64 * 0.25).floor() as u32;
    let x1 = (width as f64 * 0.75).floor() as u32;
    let y0 = (height as f64 * 0.20).floor() as u32;
    let y1 = (height as f64 * 0.70).floor() as u32;
    x >= x0 && x < x1 && y >= y0 && y < y1
}

#[inline]
fn luma(r: f64, g: f64, b: f64) -> f64 {
    0.2126 * r + 0.7152 * g + 0.0722 * b
}

#[inline]
fn saturation(r: u8, g: u8, b: u8) -> f64 {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    if max == 0 {
        0.0
    } else {
        (max - min) as f64 / max as f64
    }
}

/// Estimate hair color from the dark, saturated pixels outside the face area.
pub fn estimate_hair_color(img: &DynamicImage, cfg: &ScoringConfig) -> HairEstimate {
    let rgb = imaging::resize_to_height(img, cfg.color_working_height).to_rgb8();
    let (width, height) = rgb.dimensions();

    let (mut rs, mut gs, mut bs, mut count) = (0.0_f64, 0.0_f64, 0.0_f64, 0_u64);
    for (x, y, px) in rgb.enumerate_pixels() {
        if in_face_area(x, y, width, height) {
            continue;
        }
        let [r, g, b] = px.0;
        let (rf, gf, bf) = (r as f64, g as f64, b as f64);
        if luma(rf, gf, bf) < cfg.hair_luma_max && saturation(r, g, b) > cfg.hair_saturation_min {
            rs += rf;
            gs += gf;
            bs += bf;
            count += 1;
        }
    }

    if count == 0 {
        let level = cfg.hair_fallback_level as f64;
        return HairEstimate {
            r: level,
            g: level,
            b: level,
            samples: 0,
        };
    }

    let n = count as f64;
    HairEstimate {
        r: rs / n,
        g: gs / n,
        b: bs / n,
        samples: count,
    }
}

/// Map a ΔE76 distance to 0..=100 with a Gaussian falloff.
#[inline]
pub fn score_from_distance(delta_e: f64, falloff: f64) -> f64 {
    (100.0 * (-(delta_e / falloff).powi(2)).exp()).round().clamp(0.0, 100.0)
}

/// Color score of an estimated hair color against the target.
pub fn score_estimate(estimate: &HairEstimate, target: Rgb, cfg: &ScoringConfig) -> u8 {
    let candidate_lab = rgb_to_lab(estimate.r, estimate.g, estimate.b);
    let dist = delta_e76(candidate_lab, target.to_lab());
    score_from_distance(dist, cfg.color_falloff) as u8
}

/// Rounded color score of a decoded candidate.
pub fn score(candidate: &DynamicImage, target: Rgb, cfg: &ScoringConfig) -> u8 {
    let estimate = estimate_hair_color(candidate, cfg);
    tracing::trace!(
        r = estimate.r,
        g = estimate.g,
        b = estimate.b,
        samples = estimate.samples,
        "Hair color estimated"
    );
    score_estimate(&estimate, target, cfg)
}
