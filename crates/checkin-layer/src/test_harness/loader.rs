//! Canned avatar loader

use crate::avatar::AvatarLoader;
use crate::error::AvatarError;
use image::{DynamicImage, Rgba, RgbaImage};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Square single-colour picture
#[must_use]
pub fn solid_picture(size: u32, color: [u8; 4]) -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(size, size, Rgba(color)))
}

/// [`AvatarLoader`] serving pictures from memory
///
/// Unknown URLs answer 404 unless [`serve_all`](Self::serve_all) is set.
#[derive(Debug, Default)]
pub struct StaticAvatarLoader {
    pictures: HashMap<String, DynamicImage>,
    failing: HashSet<String>,
    default_picture: Option<DynamicImage>,
    delay: Option<Duration>,
    calls: Mutex<HashMap<String, usize>>,
}

impl StaticAvatarLoader {
    /// Loader with nothing to serve
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `picture` at `url`
    #[must_use]
    pub fn with_picture(mut self, url: impl Into<String>, picture: DynamicImage) -> Self {
        self.pictures.insert(url.into(), picture);
        self
    }

    /// Fail loads of `url` with a network error
    #[must_use]
    pub fn with_failure(mut self, url: impl Into<String>) -> Self {
        self.failing.insert(url.into());
        self
    }

    /// Serve `picture` for every URL not otherwise configured
    #[must_use]
    pub fn serve_all(mut self, picture: DynamicImage) -> Self {
        self.default_picture = Some(picture);
        self
    }

    /// Wait `delay` before answering
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Loads requested for `url`
    #[must_use]
    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().get(url).copied().unwrap_or(0)
    }

    /// Loads requested in total
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }
}

#[async_trait::async_trait]
impl AvatarLoader for StaticAvatarLoader {
    async fn load(&self, url: &str) -> Result<DynamicImage, AvatarError> {
        *self.calls.lock().entry(url.to_string()).or_default() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.contains(url) {
            return Err(AvatarError::Fetch {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        self.pictures
            .get(url)
            .or(self.default_picture.as_ref())
            .cloned()
            .ok_or_else(|| AvatarError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_configured_pictures() {
        let loader = StaticAvatarLoader::new()
            .with_picture("a", solid_picture(4, [1, 2, 3, 255]))
            .with_failure("b");

        assert!(loader.load("a").await.is_ok());
        assert!(matches!(loader.load("b").await, Err(AvatarError::Fetch { .. })));
        assert!(matches!(
            loader.load("c").await,
            Err(AvatarError::Status { status: 404, .. })
        ));
        assert_eq!(loader.calls("a"), 1);
        assert_eq!(loader.total_calls(), 3);
    }
}
