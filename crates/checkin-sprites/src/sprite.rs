//! Rasterized sprite container

use image::RgbaImage;

/// Errors while building a sprite
#[derive(Debug, thiserror::Error)]
pub enum SpriteError {
    /// Source picture has no pixels
    #[error("source image is empty ({width}x{height})")]
    EmptySource {
        /// Source width
        width: u32,
        /// Source height
        height: u32,
    },
}

/// RGBA bitmap drawn at a device pixel ratio
#[derive(Debug, Clone, PartialEq)]
pub struct SpriteImage {
    image: RgbaImage,
    pixel_ratio: f32,
}

impl SpriteImage {
    /// Wrap a bitmap drawn at `pixel_ratio`
    #[must_use]
    pub fn new(image: RgbaImage, pixel_ratio: f32) -> Self {
        Self {
            image,
            pixel_ratio: normalize_pixel_ratio(pixel_ratio),
        }
    }

    /// Width in device pixels
    #[inline]
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height in device pixels
    #[inline]
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Device pixels per logical pixel
    #[inline]
    #[must_use]
    pub fn pixel_ratio(&self) -> f32 {
        self.pixel_ratio
    }

    /// Size in logical pixels
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn logical_size(&self) -> (f32, f32) {
        (
            self.width() as f32 / self.pixel_ratio,
            self.height() as f32 / self.pixel_ratio,
        )
    }

    /// Underlying bitmap
    #[inline]
    #[must_use]
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Raw RGBA bytes, row-major
    #[inline]
    #[must_use]
    pub fn as_rgba(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// RGBA value at device pixel `(x, y)`
    #[inline]
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.image.get_pixel(x, y).0
    }
}

/// Clamp a device pixel ratio into `1.0..=4.0`, mapping nonsense to `1.0`
#[must_use]
pub fn normalize_pixel_ratio(ratio: f32) -> f32 {
    if ratio.is_finite() && ratio > 0.0 {
        ratio.clamp(1.0, 4.0)
    } else {
        1.0
    }
}
