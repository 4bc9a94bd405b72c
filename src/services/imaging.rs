use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, RgbImage};
use std::io::Cursor;

use crate::models::job::ErrorCode;
use crate::services::color_math::Rgb;

/// Resampling filter for every resize done while scoring.
pub const SCORING_FILTER: FilterType = FilterType::Lanczos3;

/// Edge length of the color swatch sent to the generator.
pub const SWATCH_SIZE: u32 = 128;

/// A rectangle expressed as fractions of the image size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FractionalRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// Where the face is assumed to be in a portrait: 50%×50%, 25% from the
/// left and 20% from the top.
pub const FACE_CROP: FractionalRect = FractionalRect {
    left: 0.25,
    top: 0.20,
    width: 0.50,
    height: 0.50,
};

/// Pixel rectangle inside an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FractionalRect {
    /// Resolve against an image size, flooring every edge.
    pub fn resolve(&self, width: u32, height: u32) -> PixelRect {
        PixelRect {
            x: (width as f64 * self.left).floor() as u32,
            y: (height as f64 * self.top).floor() as u32,
            width: (width as f64 * self.width).floor() as u32,
            height: (height as f64 * self.height).floor() as u32,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Failed to encode image: {0}")]
    Encode(image::ImageError),

    #[error("Crop {rect:?} does not fit a {width}x{height} image")]
    CropOutOfBounds {
        rect: PixelRect,
        width: u32,
        height: u32,
    },
}

impl ImageError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::ImageDecodeError
    }
}

/// Decode image bytes of any enabled format.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, ImageError> {
    Ok(image::load_from_memory(bytes)?)
}

/// Crop a fractional region, failing if it is empty or leaves the image.
pub fn crop_fraction(img: &DynamicImage, region: FractionalRect) -> Result<DynamicImage, ImageError> {
    let (width, height) = img.dimensions();
    let rect = region.resolve(width, height);

    let fits = rect.width > 0
        && rect.height > 0
        && rect.x.checked_add(rect.width).is_some_and(|right| right <= width)
        && rect.y.checked_add(rect.height).is_some_and(|bottom| bottom <= height);
    if !fits {
        return Err(ImageError::CropOutOfBounds { rect, width, height });
    }

    Ok(img.crop_imm(rect.x, rect.y, rect.width, rect.height))
}

/// Scale to cover a `size`×`size` square and keep the centre window.
pub fn cover_square(img: &DynamicImage, size: u32) -> DynamicImage {
    img.resize_to_fill(size, size, SCORING_FILTER)
}

/// Resize to a fixed height, keeping the aspect ratio.
pub fn resize_to_height(img: &DynamicImage, target_height: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    if height == target_height || height == 0 {
        return img.clone();
    }
    let target_width = ((width as f64 * target_height as f64 / height as f64).round() as u32).max(1);
    img.resize_exact(target_width, target_height, SCORING_FILTER)
}

/// Solid PNG square of `color`.
pub fn color_swatch(color: Rgb, size: u32) -> Result<Vec<u8>, ImageError> {
    let img = RgbImage::from_pixel(size, size, image::Rgb([color.r, color.g, color.b]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).map_err(ImageError::Encode)?;
    Ok(buf.into_inner())
}


#[cfg(test)]
mod tests {
    use super::test_images::*;
    use super::*;

    #[test]
    fn test_face_rect_resolution() {
        let rect = FACE_CROP.resolve(1024, 768);
        assert_eq!(
            rect,
            PixelRect {
                x: 256,
                y: 153,
                width: 512,
                height: 384
            }
        );
    }

    #[test]
    fn test_crop_fraction_dimensions() {
        let img = DynamicImage::ImageRgb8(solid(200, 100, [10, 20, 30]));
        let crop = crop_fraction(&img, FACE_CROP).unwrap();
        assert_eq!(crop.dimensions(), (100, 50));
    }

    #[test]
    fn test_crop_of_tiny_image_fails() {
        let img = DynamicImage::ImageRgb8(solid(1, 1, [0, 0, 0]));
        let err = crop_fraction(&img, FACE_CROP).unwrap_err();
        assert!(matches!(err, ImageError::CropOutOfBounds { .. }));
        assert_eq!(err.code(), ErrorCode::ImageDecodeError);
    }

    #[test]
    fn test_crop_outside_bounds_fails() {
        let img = DynamicImage::ImageRgb8(solid(64, 64, [0, 0, 0]));
        let region = FractionalRect {
            left: 0.75,
            top: 0.0,
            width: 0.5,
            height: 0.5,
        };
        assert!(crop_fraction(&img, region).is_err());
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = decode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, ImageError::Decode(_)));
    }

    #[test]
    fn test_resize_keeps_aspect() {
        let img = DynamicImage::ImageRgb8(solid(300, 200, [1, 2, 3]));
        assert_eq!(resize_to_height(&img, 100).dimensions(), (150, 100));
        assert_eq!(resize_to_height(&img, 200).dimensions(), (300, 200));
    }

    #[test]
    fn test_cover_square_keeps_centre() {
        // Tall image: red top and bottom bands fall outside the window
        let img = RgbImage::from_fn(100, 300, |_, y| {
            if (100..200).contains(&y) {
                image::Rgb([10, 200, 10])
            } else {
                image::Rgb([255, 0, 0])
            }
        });
        let square = cover_square(&DynamicImage::ImageRgb8(img), 50).to_rgb8();
        assert_eq!(square.dimensions(), (50, 50));
        assert_eq!(square.get_pixel(25, 5), &image::Rgb([10, 200, 10]));
        assert_eq!(square.get_pixel(25, 44), &image::Rgb([10, 200, 10]));
    }

    #[test]
    fn test_color_swatch_is_solid() {
        let bytes = color_swatch(Rgb::new(0x78, 0x3c, 0x14), SWATCH_SIZE).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);
        let img = decode(&bytes).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (SWATCH_SIZE, SWATCH_SIZE));
        assert!(img.pixels().all(|p| p.0 == [0x78, 0x3c, 0x14]));
    }

    #[test]
    fn test_decode_roundtrip_png() {
        let bytes = encode_png(solid(8, 4, [200, 100, 50]));
        let img = decode(&bytes).unwrap();
        assert_eq!(img.dimensions(), (8, 4));
    }
}
