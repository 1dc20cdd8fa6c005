//! Generic avatar for users without a usable picture

use crate::raster::{circle_distance, coverage, lerp_color, paint, scaled, shadow_falloff, Color};
use crate::sprite::{normalize_pixel_ratio, SpriteImage};
use image::RgbaImage;

/// Logical diameter of the fallback disc
pub const FALLBACK_DIAMETER: f32 = 40.0;

const RING: f32 = 2.0;
const SHADOW_BLUR: f32 = 3.0;
const SHADOW_OFFSET_Y: f32 = 1.5;
const SHADOW_COLOR: Color = [0, 0, 0, 80];
const RING_COLOR: Color = [255, 255, 255, 255];
const GRADIENT_FROM: Color = [99, 102, 241, 255];
const GRADIENT_TO: Color = [168, 85, 247, 255];
const GLYPH_COLOR: Color = [255, 255, 255, 255];

// 5x7 bitmap of '?', one row per byte, most significant of the low 5 bits first.
const QUESTION_MARK: [u8; 7] = [
    0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b00000, 0b00100,
];
const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;
const GLYPH_GAP: u32 = 1;

/// Gradient disc with a white ring and a `??` glyph
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn fallback_avatar(pixel_ratio: f32) -> SpriteImage {
    let ratio = normalize_pixel_ratio(pixel_ratio);
    let pad = SHADOW_BLUR + SHADOW_OFFSET_Y;
    let side = scaled(FALLBACK_DIAMETER + pad * 2.0, ratio);
    let mut image = RgbaImage::new(side, side);

    let c = (FALLBACK_DIAMETER / 2.0 + pad) * ratio;
    let outer = FALLBACK_DIAMETER / 2.0 * ratio;
    let inner = outer - RING * ratio;
    let blur = SHADOW_BLUR * ratio;
    let offset = SHADOW_OFFSET_Y * ratio;

    paint(&mut image, |x, y| {
        Some((SHADOW_COLOR, shadow_falloff(circle_distance(x, y - offset, c, c, outer), blur)))
    });
    paint(&mut image, |x, y| {
        Some((RING_COLOR, coverage(circle_distance(x, y, c, c, outer))))
    });
    paint(&mut image, |x, y| {
        let t = ((x - (c - inner)) + (y - (c - inner))) / (inner * 4.0);
        Some((
            lerp_color(GRADIENT_FROM, GRADIENT_TO, t),
            coverage(circle_distance(x, y, c, c, inner)),
        ))
    });

    // Glyph block spans ~half the disc.
    let cols = GLYPH_W * 2 + GLYPH_GAP;
    let cell = ((inner * 2.0 * 0.5) / cols as f32).floor().max(1.0) as u32;
    let text_w = cols * cell;
    let text_h = GLYPH_H * cell;
    let left = (c as u32).saturating_sub(text_w / 2);
    let top = (c as u32).saturating_sub(text_h / 2);

    for glyph in 0..2 {
        let origin_x = left + glyph * (GLYPH_W + GLYPH_GAP) * cell;
        stamp_glyph(&mut image, &QUESTION_MARK, origin_x, top, cell);
    }

    SpriteImage::new(image, ratio)
}

fn stamp_glyph(image: &mut RgbaImage, rows: &[u8; 7], left: u32, top: u32, cell: u32) {
    for (row, bits) in (0u32..).zip(rows.iter()) {
        for col in 0..GLYPH_W {
            if bits & (1 << (GLYPH_W - 1 - col)) == 0 {
                continue;
            }
            for dy in 0..cell {
                for dx in 0..cell {
                    let x = left + col * cell + dx;
                    let y = top + row * cell + dy;
                    if x < image.width() && y < image.height() {
                        image.put_pixel(x, y, image::Rgba(GLYPH_COLOR));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_glyph(px: [u8; 4]) -> bool {
        px == GLYPH_COLOR
    }

    #[test]
    fn disc_is_opaque_and_corners_clear() {
        let sprite = fallback_avatar(1.0);
        assert_eq!(sprite.width(), sprite.height());
        assert_eq!(sprite.pixel(0, 0)[3], 0);

        // Just inside the ring, left of the glyph block.
        let c = sprite.width() / 2;
        let px = sprite.pixel(c - 14, c);
        assert_eq!(px[3], 255);
        assert!(!is_glyph(px));
    }

    #[test]
    fn glyph_is_drawn_inside_disc() {
        let sprite = fallback_avatar(2.0);
        let c = sprite.width() / 2;
        let mut glyph_pixels = 0;
        for y in c - 10..c + 10 {
            for x in c - 16..c + 16 {
                if is_glyph(sprite.pixel(x, y)) {
                    glyph_pixels += 1;
                }
            }
        }
        assert!(glyph_pixels > 0);
    }

    #[test]
    fn deterministic() {
        assert_eq!(fallback_avatar(1.5), fallback_avatar(1.5));
    }
}
