//! Cluster count badges

use crate::raster::{paint, round_rect_distance, coverage, scaled, shadow_falloff, Color};
use crate::sprite::{normalize_pixel_ratio, SpriteImage};
use checkin_model::ClusterTier;
use image::RgbaImage;

const SHADOW_BLUR: f32 = 4.0;
const SHADOW_OFFSET_Y: f32 = 2.0;
const SHADOW_COLOR: Color = [15, 23, 42, 90];
const BORDER: f32 = 2.0;
const BORDER_COLOR: Color = [255, 255, 255, 255];

/// Logical `(width, height)` of a tier's badge body
#[must_use]
pub fn badge_size(tier: ClusterTier) -> (f32, f32) {
    match tier {
        ClusterTier::Small => (36.0, 26.0),
        ClusterTier::Medium => (44.0, 30.0),
        ClusterTier::Large => (52.0, 34.0),
    }
}

fn fill_color(tier: ClusterTier) -> Color {
    match tier {
        ClusterTier::Small => [59, 130, 246, 255],
        ClusterTier::Medium => [245, 158, 11, 255],
        ClusterTier::Large => [239, 68, 68, 255],
    }
}

/// Rounded-rect badge with a soft drop shadow; the engine draws the count on top
#[must_use]
pub fn cluster_badge(tier: ClusterTier, pixel_ratio: f32) -> SpriteImage {
    let ratio = normalize_pixel_ratio(pixel_ratio);
    let (w, h) = badge_size(tier);
    let pad = SHADOW_BLUR + SHADOW_OFFSET_Y;

    let mut image = RgbaImage::new(scaled(w + pad * 2.0, ratio), scaled(h + pad * 2.0, ratio));

    let center = ((w / 2.0 + pad) * ratio, (h / 2.0 + pad) * ratio);
    let half = (w / 2.0 * ratio, h / 2.0 * ratio);
    let radius = h * 0.4 * ratio;
    let blur = SHADOW_BLUR * ratio;
    let offset = SHADOW_OFFSET_Y * ratio;
    let border = BORDER * ratio;
    let fill = fill_color(tier);

    paint(&mut image, |x, y| {
        let d = round_rect_distance(x, y - offset, center, half, radius);
        Some((SHADOW_COLOR, shadow_falloff(d, blur)))
    });
    paint(&mut image, |x, y| {
        let d = round_rect_distance(x, y, center, half, radius);
        Some((BORDER_COLOR, coverage(d)))
    });
    paint(&mut image, |x, y| {
        let d = round_rect_distance(x, y, center, half, radius) + border;
        Some((fill, coverage(d)))
    });

    SpriteImage::new(image, ratio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn center_is_tier_color() {
        for tier in ClusterTier::ALL {
            let sprite = cluster_badge(tier, 1.0);
            let px = sprite.pixel(sprite.width() / 2, sprite.height() / 2);
            assert_eq!(px, fill_color(tier), "{tier:?}");
        }
    }

    #[test]
    fn corners_are_transparent() {
        let sprite = cluster_badge(ClusterTier::Medium, 2.0);
        assert_eq!(sprite.pixel(0, 0)[3], 0);
        assert_eq!(sprite.pixel(sprite.width() - 1, 0)[3], 0);
    }

    #[test]
    fn tiers_grow() {
        let small = cluster_badge(ClusterTier::Small, 1.0);
        let large = cluster_badge(ClusterTier::Large, 1.0);
        assert!(large.width() > small.width());
        assert!(large.height() > small.height());
    }

    proptest! {
        #[test]
        fn prop_size_scales_with_ratio(ratio in 1.0f32..4.0) {
            let base = cluster_badge(ClusterTier::Small, 1.0);
            let scaled = cluster_badge(ClusterTier::Small, ratio);
            prop_assert!(scaled.width() >= base.width());
            let (lw, _) = scaled.logical_size();
            prop_assert!((lw - base.logical_size().0).abs() <= 1.0);
            prop_assert!((scaled.pixel_ratio() - ratio).abs() < f32::EPSILON);
        }
    }
}
