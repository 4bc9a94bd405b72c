//! Identity preservation estimate from face-region pixel error.
//!
//! This is a proxy, not face recognition: both images are cropped to the
//! region where a portrait's face usually sits, scaled to cover a small
//! square (the centre window is kept, nothing is stretched) and compared
//! pixel by pixel in greyscale. Pose or framing changes lower the
//! score as much as an actual identity change does, so treat it as a coarse
//! gate.

use image::{DynamicImage, GrayImage};

use crate::services::imaging::{self, ImageError, FACE_CROP};

/// Greyscale face crop normalized to a fixed square.
#[derive(Debug, Clone)]
pub struct FaceCrop {
    pixels: GrayImage,
}

impl FaceCrop {
    /// Decode image bytes and extract the face crop.
    pub fn from_bytes(bytes: &[u8], size: u32) -> Result<Self, ImageError> {
        Self::from_image(&imaging::decode(bytes)?, size)
    }

    pub fn from_image(img: &DynamicImage, size: u32) -> Result<Self, ImageError> {
        let face = imaging::crop_fraction(img, FACE_CROP)?;
        let pixels = imaging::cover_square(&face, size).to_luma8();
        Ok(Self { pixels })
    }

    /// Root-mean-square intensity error against another crop.
    pub fn rmse(&self, other: &FaceCrop) -> f64 {
        let a = self.pixels.as_raw();
        let b = other.pixels.as_raw();
        let n = a.len().min(b.len());
        if n == 0 {
            return 0.0;
        }

        let sum: f64 = a
            .iter()
            .zip(b.iter())
            .map(|(&p, &q)| {
                let d = p as f64 - q as f64;
                d * d
            })
            .sum();
        (sum / n as f64).sqrt()
    }
}

/// Map an RMSE in 0..=255 to a 0..=100 score.
#[inline]
pub fn score_from_rmse(rmse: f64) -> f64 {
    (100.0 * (1.0 - rmse / 255.0)).clamp(0.0, 100.0)
}

/// Unrounded identity score of `candidate` against the subject's crop.
pub fn score(subject: &FaceCrop, candidate: &FaceCrop) -> f64 {
    score_from_rmse(subject.rmse(candidate))
}
