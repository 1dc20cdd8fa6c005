//! Check-in map layer
//!
//! Draws clustered check-in markers on any map engine implementing
//! [`MapEngine`]:
//! - registers cluster badges, a fallback avatar and per-user avatars with the
//!   engine's image atlas, at most once per engine instance
//! - keeps a clustered source in sync with the latest list of aggregates
//! - expands clusters and opens user rosters on click
//! - hides the cluster layer past the cluster max zoom
//! - tears everything down on unmount without leaking listeners
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use checkin_layer::prelude::*;
//!
//! let registry = Arc::new(SpriteRegistry::new());
//! let layer = CheckInMapLayer::new(
//!     engine,
//!     registry,
//!     Arc::new(HttpAvatarLoader::new()),
//!     LayerConfig::for_viewport(width),
//! )?;
//!
//! layer.mount().await;
//! layer.set_check_ins(&aggregates).await;
//! ```

pub mod assets;
pub mod avatar;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod interaction;
pub mod layer;
pub mod popup;
pub mod registry;
pub mod style;

// Test harness
pub mod test_harness;

pub use config::{DeviceClass, LayerConfig};
pub use engine::MapEngine;
pub use error::{AvatarError, ConfigError, EngineError, LayerError};
pub use layer::{CheckInMapLayer, MountOutcome, SyncReport, SyncStatus};

/// Common imports for hosts
pub mod prelude {
    pub use crate::avatar::{AvatarLoader, HttpAvatarLoader};
    pub use crate::config::{DeviceClass, LayerConfig};
    pub use crate::engine::{
        CameraTarget, Cursor, EventHandler, EventKind, ListenerId, LngLat, MapEngine, MapEvent,
        RenderedFeature, ScreenPoint,
    };
    pub use crate::error::{AvatarError, ConfigError, EngineError, LayerError};
    pub use crate::events::{EventSink, LayerEvent, RecordingSink, TracingSink};
    pub use crate::layer::{CheckInMapLayer, MountOutcome, SyncReport, SyncStatus};
    pub use crate::popup::{PopupAvatar, PopupContent, PopupEntry};
    pub use crate::registry::{RegistrationOutcome, RegistrationState, SpriteRegistry};
    pub use crate::style::{LayerSpec, SourceSpec, Visibility};
    pub use checkin_model::{CheckInAggregate, UserRef};
    pub use std::sync::Arc;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
