//! Avatar loading and registration
//!
//! Each representative user's picture is fetched, composited into a ringed
//! disc and added to the atlas under `avatar-{userId}`. A batch runs
//! concurrently and every request settles on its own: one failing picture
//! never blocks or fails the others, it just leaves its marker on the
//! fallback glyph until a later refresh retries it.

use crate::assets::{finish, precheck};
use crate::engine::MapEngine;
use crate::error::{AvatarError, LayerError};
use crate::registry::{RegistrationOutcome, SpriteRegistry};
use checkin_model::{AvatarRequest, IconId};
use checkin_sprites::composite_avatar;
use futures::future::join_all;
use image::DynamicImage;
use std::time::Duration;
use tracing::debug;

/// Source of avatar pictures
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait AvatarLoader: Send + Sync {
    /// Fetch and decode the picture at `url`
    async fn load(&self, url: &str) -> Result<DynamicImage, AvatarError>;
}

/// Loads avatars over HTTP
#[derive(Debug, Clone)]
pub struct HttpAvatarLoader {
    client: reqwest::Client,
}

impl HttpAvatarLoader {
    /// Loader without a request timeout
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Loader whose requests give up after `timeout`
    ///
    /// # Errors
    /// Returns `AvatarError::Fetch` if the HTTP client cannot be built.
    pub fn with_timeout(timeout: Duration) -> Result<Self, AvatarError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AvatarError::Fetch {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }

    /// Loader reusing an existing client
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpAvatarLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AvatarLoader for HttpAvatarLoader {
    async fn load(&self, url: &str) -> Result<DynamicImage, AvatarError> {
        let fetch_error = |e: reqwest::Error| {
            if e.is_timeout() {
                AvatarError::Timeout { url: url.to_string() }
            } else {
                AvatarError::Fetch {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        let response = self.client.get(url).send().await.map_err(fetch_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(AvatarError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(fetch_error)?;
        image::load_from_memory(&bytes).map_err(|e| AvatarError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Register every requested avatar, concurrently
pub async fn register_avatars(
    engine: &dyn MapEngine,
    registry: &SpriteRegistry,
    loader: &dyn AvatarLoader,
    requests: &[AvatarRequest],
    pixel_ratio: f32,
    timeout: Option<Duration>,
) -> Vec<(IconId, RegistrationOutcome)> {
    let attempts = requests.iter().map(|request| async move {
        let outcome =
            register_avatar(engine, registry, loader, request, pixel_ratio, timeout).await;
        (request.icon_id.clone(), outcome)
    });
    join_all(attempts).await
}

/// Register one avatar unless it is already registered or in flight
pub async fn register_avatar(
    engine: &dyn MapEngine,
    registry: &SpriteRegistry,
    loader: &dyn AvatarLoader,
    request: &AvatarRequest,
    pixel_ratio: f32,
    timeout: Option<Duration>,
) -> RegistrationOutcome {
    let guard = match precheck(engine, registry, &request.icon_id) {
        Ok(guard) => guard,
        Err(outcome) => return outcome,
    };

    debug!(image_id = %request.icon_id, url = %request.url, "loading avatar");
    let result = load_with_timeout(loader, &request.url, timeout)
        .await
        .map_err(LayerError::from)
        .and_then(|picture| Ok(composite_avatar(&picture, pixel_ratio)?))
        .and_then(|sprite| Ok(engine.add_image(request.icon_id.as_str(), &sprite)?));
    finish(guard, result)
}

async fn load_with_timeout(
    loader: &dyn AvatarLoader,
    url: &str,
    timeout: Option<Duration>,
) -> Result<DynamicImage, AvatarError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, loader.load(url))
            .await
            .map_err(|_| AvatarError::Timeout { url: url.to_string() })?,
        None => loader.load(url).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistrationState;
    use crate::test_harness::RecordingEngine;
    use image::{Rgba, RgbaImage};

    fn picture() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 16, Rgba([10, 20, 30, 255])))
    }

    fn request(user: &str) -> AvatarRequest {
        AvatarRequest {
            icon_id: IconId::avatar(user),
            user_id: user.to_string(),
            url: format!("https://cdn.example/{user}.png"),
        }
    }

    #[tokio::test]
    async fn loads_and_registers() {
        let engine = RecordingEngine::new();
        let registry = SpriteRegistry::new();
        let mut loader = MockAvatarLoader::new();
        loader
            .expect_load()
            .withf(|url| url == "https://cdn.example/u1.png")
            .times(1)
            .returning(|_| Ok(picture()));

        let outcome = register_avatar(&engine, &registry, &loader, &request("u1"), 1.0, None).await;

        assert_eq!(outcome, RegistrationOutcome::Registered);
        assert!(engine.has_image("avatar-u1"));
        assert!(registry.is_registered(&IconId::avatar("u1")));
    }

    #[tokio::test]
    async fn failure_is_isolated_and_retryable() {
        let engine = RecordingEngine::new();
        let registry = SpriteRegistry::new();
        let mut loader = MockAvatarLoader::new();
        loader.expect_load().returning(|url| {
            if url.contains("bad") {
                Err(AvatarError::Status {
                    url: url.to_string(),
                    status: 404,
                })
            } else {
                Ok(picture())
            }
        });

        let outcomes = register_avatars(
            &engine,
            &registry,
            &loader,
            &[request("bad"), request("good")],
            1.0,
            None,
        )
        .await;

        assert!(matches!(outcomes[0].1, RegistrationOutcome::Failed(_)));
        assert_eq!(outcomes[1].1, RegistrationOutcome::Registered);
        assert_eq!(
            registry.state(&IconId::avatar("bad")),
            RegistrationState::Unregistered
        );
    }

    #[tokio::test]
    async fn registered_avatar_is_not_fetched_again() {
        let engine = RecordingEngine::new();
        let registry = SpriteRegistry::new();
        let mut loader = MockAvatarLoader::new();
        loader.expect_load().times(1).returning(|_| Ok(picture()));

        for _ in 0..3 {
            register_avatar(&engine, &registry, &loader, &request("u1"), 1.0, None).await;
        }
        assert_eq!(engine.image_add_count("avatar-u1"), 1);
    }

    #[tokio::test]
    async fn disposed_engine_releases_reservation() {
        let engine = RecordingEngine::new();
        let registry = SpriteRegistry::new();
        let mut loader = MockAvatarLoader::new();
        loader.expect_load().returning(|_| Ok(picture()));
        engine.dispose();

        let outcome = register_avatar(&engine, &registry, &loader, &request("u1"), 1.0, None).await;

        assert!(matches!(outcome, RegistrationOutcome::Failed(_)));
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_load_times_out() {
        let engine = RecordingEngine::new();
        let registry = SpriteRegistry::new();
        let loader = crate::test_harness::StaticAvatarLoader::new()
            .serve_all(picture())
            .with_delay(Duration::from_secs(30));

        let outcome = register_avatar(
            &engine,
            &registry,
            &loader,
            &request("u1"),
            1.0,
            Some(Duration::from_secs(5)),
        )
        .await;

        assert!(matches!(outcome, RegistrationOutcome::Failed(reason) if reason.contains("timed out")));
        assert!(!engine.has_image("avatar-u1"));
    }
}
