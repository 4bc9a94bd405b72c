//! sRGB ↔ CIE Lab conversion and ΔE76 color distance.
//!
//! ΔE76 is plain Euclidean distance in Lab; no CIE94 or CIEDE2000
//! correction is applied, so distances between saturated colors are
//! overstated compared to perception.

use std::fmt;
use std::str::FromStr;

/// D65 reference white in XYZ, Y normalized to 1.
const D65_WHITE: [f64; 3] = [0.95047, 1.0, 1.08883];

/// An 8-bit sRGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    pub fn to_lab(self) -> Lab {
        rgb_to_lab(self.r as f64, self.g as f64, self.b as f64)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid hex color {0:?}, expected #RRGGBB")]
pub struct ParseRgbError(pub String);

impl FromStr for Rgb {
    type Err = ParseRgbError;

    /// Accepts `#rrggbb` or `rrggbb`, case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().strip_prefix('#').unwrap_or(s.trim());
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ParseRgbError(s.to_string()));
        }
        let n = u32::from_str_radix(digits, 16).map_err(|_| ParseRgbError(s.to_string()))?;
        Ok(Self::new((n >> 16) as u8, (n >> 8) as u8, n as u8))
    }
}

/// A color in CIE L*a*b* (D65).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lab {
    pub l: f64,
    pub a: f64,
    pub b: f64,
}

/// Gamma-decode one sRGB channel (0-255) to linear light (0.0-1.0).
#[inline]
pub fn srgb_to_linear(channel: f64) -> f64 {
    let c = channel / 255.0;
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

#[inline]
fn lab_f(t: f64) -> f64 {
    if t > 0.008856 {
        t.cbrt()
    } else {
        7.787 * t + 16.0 / 116.0
    }
}

/// Convert sRGB channels (0-255, fractional allowed) to Lab.
pub fn rgb_to_lab(r: f64, g: f64, b: f64) -> Lab {
    let (r, g, b) = (srgb_to_linear(r), srgb_to_linear(g), srgb_to_linear(b));

    let x = r * 0.4124564 + g * 0.3575761 + b * 0.1804375;
    let y = r * 0.2126729 + g * 0.7151522 + b * 0.0721750;
    let z = r * 0.0193339 + g * 0.1191920 + b * 0.9503041;

    let fx = lab_f(x / D65_WHITE[0]);
    let fy = lab_f(y / D65_WHITE[1]);
    let fz = lab_f(z / D65_WHITE[2]);

    Lab {
        l: 116.0 * fy - 16.0,
        a: 500.0 * (fx - fy),
        b: 200.0 * (fy - fz),
    }
}

/// Euclidean distance between two Lab colors.
#[inline]
pub fn delta_e76(lab1: Lab, lab2: Lab) -> f64 {
    let dl = lab1.l - lab2.l;
    let da = lab1.a - lab2.a;
    let db = lab1.b - lab2.b;
    (dl * dl + da * da + db * db).sqrt()
}
