//! Anti-aliased shape primitives on RGBA buffers
//!
//! Shapes are described by signed distance functions (negative inside) and
//! sampled at pixel centers.

use image::{Rgba, RgbaImage};

pub(crate) type Color = [u8; 4];

/// Device pixels covering `logical` logical pixels
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn scaled(logical: f32, ratio: f32) -> u32 {
    (logical * ratio).ceil().max(1.0) as u32
}

pub(crate) fn circle_distance(x: f32, y: f32, cx: f32, cy: f32, radius: f32) -> f32 {
    (x - cx).hypot(y - cy) - radius
}

pub(crate) fn round_rect_distance(
    x: f32,
    y: f32,
    center: (f32, f32),
    half: (f32, f32),
    radius: f32,
) -> f32 {
    let qx = (x - center.0).abs() - (half.0 - radius);
    let qy = (y - center.1).abs() - (half.1 - radius);
    let outside = qx.max(0.0).hypot(qy.max(0.0));
    let inside = qx.max(qy).min(0.0);
    outside + inside - radius
}

/// One-pixel anti-aliasing ramp
pub(crate) fn coverage(distance: f32) -> f32 {
    (0.5 - distance).clamp(0.0, 1.0)
}

/// Quadratic falloff outside the shape
pub(crate) fn shadow_falloff(distance: f32, blur: f32) -> f32 {
    if distance <= 0.0 {
        1.0
    } else if blur <= 0.0 {
        0.0
    } else {
        let t = 1.0 - (distance / blur).min(1.0);
        t * t
    }
}

pub(crate) fn lerp_color(a: Color, b: Color, t: f32) -> Color {
    let t = t.clamp(0.0, 1.0);
    let mut out = [0u8; 4];
    for (i, channel) in out.iter_mut().enumerate() {
        *channel = to_u8((f32::from(a[i]) * (1.0 - t) + f32::from(b[i]) * t) / 255.0);
    }
    out
}

/// Source-over composite of `color` at `alpha` onto `pixel`
pub(crate) fn blend(pixel: &mut Rgba<u8>, color: Color, alpha: f32) {
    let src_a = f32::from(color[3]) / 255.0 * alpha.clamp(0.0, 1.0);
    if src_a <= 0.0 {
        return;
    }
    let dst_a = f32::from(pixel.0[3]) / 255.0;
    let out_a = src_a + dst_a * (1.0 - src_a);

    for c in 0..3 {
        let src = f32::from(color[c]) / 255.0;
        let dst = f32::from(pixel.0[c]) / 255.0;
        pixel.0[c] = to_u8((src * src_a + dst * dst_a * (1.0 - src_a)) / out_a);
    }
    pixel.0[3] = to_u8(out_a);
}

/// Fill every pixel with `shade(x, y)` returning `(color, alpha)`
pub(crate) fn paint<F>(image: &mut RgbaImage, mut shade: F)
where
    F: FnMut(f32, f32) -> Option<(Color, f32)>,
{
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        #[allow(clippy::cast_precision_loss)]
        let (fx, fy) = (x as f32 + 0.5, y as f32 + 0.5);
        if let Some((color, alpha)) = shade(fx, fy) {
            blend(pixel, color, alpha);
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}
