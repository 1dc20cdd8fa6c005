//! Error types for the check-in layer
//!
//! Failures are classified so callers can tell apart:
//! - benign outcomes (an image the engine already holds)
//! - recoverable ones (a single avatar that failed to load)
//! - best-effort cleanup errors during teardown
//!
//! None of them is meant to reach the host page as a crash.

use checkin_sprites::SpriteError;

/// Errors reported by a map engine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The atlas already holds an image with this id
    #[error("image already exists: {0}")]
    ImageExists(String),

    /// No source with this id
    #[error("source not found: {0}")]
    MissingSource(String),

    /// No layer with this id
    #[error("layer not found: {0}")]
    MissingLayer(String),

    /// A source with this id already exists
    #[error("source already exists: {0}")]
    SourceExists(String),

    /// A layer with this id already exists
    #[error("layer already exists: {0}")]
    LayerExists(String),

    /// The engine instance has been torn down
    #[error("map engine disposed")]
    Disposed,

    /// Any other refusal
    #[error("engine rejected request: {0}")]
    Rejected(String),
}

/// Avatar fetch and decode failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AvatarError {
    /// Network-level failure
    #[error("fetching {url} failed: {reason}")]
    Fetch {
        /// Requested picture
        url: String,
        /// Transport error
        reason: String,
    },

    /// Server answered with a non-success status
    #[error("fetching {url} returned status {status}")]
    Status {
        /// Requested picture
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Bytes could not be decoded as an image
    #[error("decoding {url} failed: {reason}")]
    Decode {
        /// Requested picture
        url: String,
        /// Decoder error
        reason: String,
    },

    /// Load exceeded the configured timeout
    #[error("fetching {url} timed out")]
    Timeout {
        /// Requested picture
        url: String,
    },
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// TOML could not be parsed
    #[error("invalid config file: {0}")]
    Parse(String),

    /// A value is out of range or inconsistent
    #[error("invalid config value `{field}`: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Main layer error type
#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    /// Engine call failed
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Avatar could not be loaded
    #[error("avatar error: {0}")]
    Avatar(#[from] AvatarError),

    /// Sprite could not be rasterized
    #[error("sprite error: {0}")]
    Sprite(#[from] SpriteError),

    /// Configuration rejected
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl LayerError {
    /// Whether the error only reports that the work was already done
    #[inline]
    #[must_use]
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::Engine(EngineError::ImageExists(_)))
    }

    /// Whether a later attempt may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Avatar(_)
                | Self::Engine(EngineError::MissingSource(_) | EngineError::MissingLayer(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_error_display() {
        let err = LayerError::from(EngineError::Disposed);
        assert!(err.to_string().contains("disposed"));
    }

    #[test]
    fn image_exists_is_benign() {
        assert!(LayerError::from(EngineError::ImageExists("fallback".into())).is_benign());
        assert!(!LayerError::from(EngineError::Disposed).is_benign());
    }

    #[test]
    fn avatar_failures_are_retryable() {
        let err = LayerError::from(AvatarError::Status {
            url: "https://cdn.example/a.png".into(),
            status: 404,
        });
        assert!(err.is_retryable());
        assert!(!LayerError::from(EngineError::Disposed).is_retryable());
    }
}
