//! Circular user avatars

use crate::raster::{circle_distance, coverage, paint, scaled, shadow_falloff, Color};
use crate::sprite::{normalize_pixel_ratio, SpriteError, SpriteImage};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, RgbaImage};

/// Logical outer diameter of an avatar marker
pub const AVATAR_DIAMETER: f32 = 44.0;

/// Logical width of the border ring
pub const AVATAR_RING: f32 = 3.0;

/// Border ring colour
pub const AVATAR_BORDER: [u8; 4] = [239, 68, 68, 255];

const SHADOW_BLUR: f32 = 3.0;
const SHADOW_OFFSET_Y: f32 = 2.0;
const SHADOW_COLOR: Color = [0, 0, 0, 100];

/// Cut `source` into a red-ringed disc with a drop shadow
///
/// The picture is center-cropped to a square before scaling, so portraits and
/// landscapes keep their aspect ratio.
///
/// # Errors
/// Returns `SpriteError::EmptySource` if `source` has no pixels.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn composite_avatar(source: &DynamicImage, pixel_ratio: f32) -> Result<SpriteImage, SpriteError> {
    let (width, height) = source.dimensions();
    if width == 0 || height == 0 {
        return Err(SpriteError::EmptySource { width, height });
    }

    let ratio = normalize_pixel_ratio(pixel_ratio);
    let pad = SHADOW_BLUR + SHADOW_OFFSET_Y;
    let side = scaled(AVATAR_DIAMETER + pad * 2.0, ratio);
    let mut image = RgbaImage::new(side, side);

    let c = (AVATAR_DIAMETER / 2.0 + pad) * ratio;
    let outer = AVATAR_DIAMETER / 2.0 * ratio;
    let inner = outer - AVATAR_RING * ratio;
    let blur = SHADOW_BLUR * ratio;
    let offset = SHADOW_OFFSET_Y * ratio;

    let square = width.min(height);
    let photo_side = scaled(inner * 2.0 / ratio, ratio);
    let photo = source
        .crop_imm((width - square) / 2, (height - square) / 2, square, square)
        .resize_exact(photo_side, photo_side, FilterType::Triangle)
        .to_rgba8();
    let photo_left = c - inner;
    let last = photo_side - 1;

    paint(&mut image, |x, y| {
        Some((SHADOW_COLOR, shadow_falloff(circle_distance(x, y - offset, c, c, outer), blur)))
    });
    paint(&mut image, |x, y| {
        Some((AVATAR_BORDER, coverage(circle_distance(x, y, c, c, outer))))
    });
    paint(&mut image, |x, y| {
        let alpha = coverage(circle_distance(x, y, c, c, inner));
        if alpha <= 0.0 {
            return None;
        }
        let px = ((x - photo_left).max(0.0) as u32).min(last);
        let py = ((y - photo_left).max(0.0) as u32).min(last);
        Some((photo.get_pixel(px, py).0, alpha))
    });

    Ok(SpriteImage::new(image, ratio))
}
