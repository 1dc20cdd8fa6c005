//! Layer configuration
//!
//! Defaults depend on the device class: mobile viewports cluster wider and
//! keep clustering to a deeper zoom. Values can come from code, a TOML file, or
//! `CHECKIN_*` environment overrides.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Viewport width below which the layer uses mobile clustering
pub const MOBILE_BREAKPOINT_PX: u32 = 768;

/// Viewport class driving clustering parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    /// Wide viewport
    #[default]
    Desktop,
    /// Narrow viewport
    Mobile,
}

impl DeviceClass {
    /// Classify a viewport by its CSS pixel width
    #[inline]
    #[must_use]
    pub fn from_viewport_width(width: u32) -> Self {
        if width < MOBILE_BREAKPOINT_PX {
            Self::Mobile
        } else {
            Self::Desktop
        }
    }

    /// Default `(cluster_radius, cluster_max_zoom)`
    #[must_use]
    pub fn cluster_defaults(self) -> (u32, f64) {
        match self {
            Self::Desktop => (50, 14.0),
            Self::Mobile => (70, 15.0),
        }
    }
}

/// Check-in layer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerConfig {
    /// Clustered source id
    pub source_id: String,
    /// Cluster symbol layer id
    pub cluster_layer_id: String,
    /// Unclustered point layer id
    pub points_layer_id: String,
    /// Viewport class the defaults were picked for
    pub device_class: DeviceClass,
    /// Cluster radius in screen pixels
    pub cluster_radius: u32,
    /// Highest zoom at which points are clustered
    pub cluster_max_zoom: f64,
    /// Device pixel ratio sprites are drawn at
    pub pixel_ratio: f32,
    /// Users listed in a point popup before the overflow count
    pub popup_max_users: usize,
    /// Optional per-avatar load timeout
    pub avatar_timeout_ms: Option<u64>,
    /// Whether lifecycle events go to the event sink
    pub emit_events: bool,
}

impl LayerConfig {
    /// Defaults for a device class
    #[must_use]
    pub fn for_device(device_class: DeviceClass) -> Self {
        let (cluster_radius, cluster_max_zoom) = device_class.cluster_defaults();
        Self {
            source_id: "checkins".to_string(),
            cluster_layer_id: "checkins-clusters".to_string(),
            points_layer_id: "checkins-points".to_string(),
            device_class,
            cluster_radius,
            cluster_max_zoom,
            pixel_ratio: 1.0,
            popup_max_users: 10,
            avatar_timeout_ms: None,
            emit_events: false,
        }
    }

    /// Defaults for a viewport width
    #[inline]
    #[must_use]
    pub fn for_viewport(width: u32) -> Self {
        Self::for_device(DeviceClass::from_viewport_width(width))
    }

    /// With device pixel ratio
    #[inline]
    #[must_use]
    pub fn with_pixel_ratio(mut self, ratio: f32) -> Self {
        self.pixel_ratio = checkin_sprites::normalize_pixel_ratio(ratio);
        self
    }

    /// With cluster radius and max zoom
    #[inline]
    #[must_use]
    pub fn with_clustering(mut self, radius: u32, max_zoom: f64) -> Self {
        self.cluster_radius = radius;
        self.cluster_max_zoom = max_zoom;
        self
    }

    /// With popup roster size
    #[inline]
    #[must_use]
    pub fn with_popup_max_users(mut self, max: usize) -> Self {
        self.popup_max_users = max;
        self
    }

    /// With avatar load timeout
    #[inline]
    #[must_use]
    pub fn with_avatar_timeout(mut self, timeout: Duration) -> Self {
        self.avatar_timeout_ms = u64::try_from(timeout.as_millis()).ok();
        self
    }

    /// Enable or disable the event hook
    #[inline]
    #[must_use]
    pub fn with_events(mut self, enabled: bool) -> Self {
        self.emit_events = enabled;
        self
    }

    /// With custom engine ids
    #[must_use]
    pub fn with_ids(
        mut self,
        source_id: impl Into<String>,
        cluster_layer_id: impl Into<String>,
        points_layer_id: impl Into<String>,
    ) -> Self {
        self.source_id = source_id.into();
        self.cluster_layer_id = cluster_layer_id.into();
        self.points_layer_id = points_layer_id.into();
        self
    }

    /// Avatar timeout as a duration
    #[inline]
    #[must_use]
    pub fn avatar_timeout(&self) -> Option<Duration> {
        self.avatar_timeout_ms.map(Duration::from_millis)
    }

    /// Check ids and ranges
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ids = [
            ("source_id", &self.source_id),
            ("cluster_layer_id", &self.cluster_layer_id),
            ("points_layer_id", &self.points_layer_id),
        ];
        for (field, id) in ids {
            if id.trim().is_empty() {
                return Err(invalid(field, "must not be empty"));
            }
        }
        let distinct: HashSet<&String> = ids.iter().map(|(_, id)| *id).collect();
        if distinct.len() != ids.len() {
            return Err(invalid("points_layer_id", "source and layer ids must differ"));
        }

        if self.cluster_radius == 0 {
            return Err(invalid("cluster_radius", "must be positive"));
        }
        if !self.cluster_max_zoom.is_finite() || !(0.0..=24.0).contains(&self.cluster_max_zoom) {
            return Err(invalid("cluster_max_zoom", "must be within 0..=24"));
        }
        if self.popup_max_users == 0 {
            return Err(invalid("popup_max_users", "must be at least 1"));
        }
        Ok(())
    }

    /// Parse a TOML config; unset fields take the device class defaults
    ///
    /// # Errors
    /// Returns `ConfigError::Parse` for malformed TOML and
    /// `ConfigError::Invalid` if the result does not validate.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let device = file.device_class.unwrap_or_default();
        let config = file.apply(Self::for_device(device));
        config.validate()?;
        Ok(config)
    }

    /// Desktop defaults with `CHECKIN_*` environment overrides
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `CHECKIN_*` environment overrides
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(radius) = env_value("CHECKIN_CLUSTER_RADIUS") {
            self.cluster_radius = radius;
        }
        if let Some(max_zoom) = env_value("CHECKIN_CLUSTER_MAX_ZOOM") {
            self.cluster_max_zoom = max_zoom;
        }
        if let Some(ratio) = env_value::<f32>("CHECKIN_PIXEL_RATIO") {
            self.pixel_ratio = checkin_sprites::normalize_pixel_ratio(ratio);
        }
        if let Some(emit) = env_value("CHECKIN_EMIT_EVENTS") {
            self.emit_events = emit;
        }
        self
    }
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self::for_device(DeviceClass::Desktop)
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

fn env_value<T: FromStr>(key: &str) -> Option<T>
where
    T::Err: Display,
{
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => {
            info!("{key} override applied: {raw}");
            Some(value)
        }
        Err(e) => {
            warn!("Invalid {key} value {raw:?}: {e}, keeping default");
            None
        }
    }
}

/// On-disk shape: every field optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    source_id: Option<String>,
    cluster_layer_id: Option<String>,
    points_layer_id: Option<String>,
    device_class: Option<DeviceClass>,
    cluster_radius: Option<u32>,
    cluster_max_zoom: Option<f64>,
    pixel_ratio: Option<f32>,
    popup_max_users: Option<usize>,
    avatar_timeout_ms: Option<u64>,
    emit_events: Option<bool>,
}

impl ConfigFile {
    fn apply(self, mut base: LayerConfig) -> LayerConfig {
        if let Some(v) = self.source_id {
            base.source_id = v;
        }
        if let Some(v) = self.cluster_layer_id {
            base.cluster_layer_id = v;
        }
        if let Some(v) = self.points_layer_id {
            base.points_layer_id = v;
        }
        if let Some(v) = self.cluster_radius {
            base.cluster_radius = v;
        }
        if let Some(v) = self.cluster_max_zoom {
            base.cluster_max_zoom = v;
        }
        if let Some(v) = self.pixel_ratio {
            base.pixel_ratio = checkin_sprites::normalize_pixel_ratio(v);
        }
        if let Some(v) = self.popup_max_users {
            base.popup_max_users = v;
        }
        if self.avatar_timeout_ms.is_some() {
            base.avatar_timeout_ms = self.avatar_timeout_ms;
        }
        if let Some(v) = self.emit_events {
            base.emit_events = v;
        }
        base
    }
}
