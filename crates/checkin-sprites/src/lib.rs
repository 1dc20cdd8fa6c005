//! Check-in sprite rasterization
//!
//! Produces the bitmaps the map layer registers with the engine's image atlas:
//!
//! - [`cluster_badge`]: rounded-rect badge per [`ClusterTier`](checkin_model::ClusterTier)
//! - [`fallback_avatar`]: gradient disc with a `??` glyph
//! - [`composite_avatar`]: a user's picture cut into a red-ringed disc
//!
//! All sprites are drawn at the device pixel ratio and carry it in
//! [`SpriteImage`] so engines can scale them back to logical size.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod avatar;
mod badge;
mod fallback;
mod raster;
mod sprite;

pub use avatar::{composite_avatar, AVATAR_BORDER, AVATAR_DIAMETER, AVATAR_RING};
pub use badge::{badge_size, cluster_badge};
pub use fallback::{fallback_avatar, FALLBACK_DIAMETER};
pub use sprite::{normalize_pixel_ratio, SpriteError, SpriteImage};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
