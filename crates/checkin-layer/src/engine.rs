//! Map engine boundary
//!
//! The layer never talks to a renderer directly. Everything it needs from one
//! (image atlas, clustered sources, symbol layers, camera, hit testing, UI and
//! events) goes through [`MapEngine`], so any engine exposing the same
//! capability set can host the layer.

use crate::error::EngineError;
use crate::popup::PopupContent;
use crate::style::{LayerSpec, SourceSpec};
use checkin_model::{FeatureCollection, Point};
use checkin_sprites::SpriteImage;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Screen position in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScreenPoint {
    /// Horizontal offset from the left edge
    pub x: f64,
    /// Vertical offset from the top edge
    pub y: f64,
}

impl ScreenPoint {
    /// Point at `(x, y)`
    #[inline]
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Geographic position
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LngLat {
    /// Longitude
    pub lng: f64,
    /// Latitude
    pub lat: f64,
}

impl LngLat {
    /// Position at `(lng, lat)`
    #[inline]
    #[must_use]
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }
}

impl From<&Point> for LngLat {
    fn from(point: &Point) -> Self {
        Self::new(point.lng(), point.lat())
    }
}

/// Animated camera move
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraTarget {
    /// New map center
    pub center: LngLat,
    /// New zoom level
    pub zoom: f64,
}

/// Mouse cursor shown over the map canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cursor {
    /// Engine default
    #[default]
    Default,
    /// Hand cursor over clickable markers
    Pointer,
}

/// Engine event kinds the layer listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Click on the canvas or a layer
    Click,
    /// Pointer entered a layer's features
    MouseEnter,
    /// Pointer left a layer's features
    MouseLeave,
    /// Zoom animation finished
    ZoomEnd,
    /// Pan animation finished
    MoveEnd,
    /// Style finished loading
    Load,
}

/// Event delivered to a handler
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapEvent {
    /// What happened
    pub kind: EventKind,
    /// Pointer position, for pointer events
    pub point: Option<ScreenPoint>,
    /// Geographic pointer position, for pointer events
    pub lng_lat: Option<LngLat>,
}

impl MapEvent {
    /// Event without a pointer position
    #[must_use]
    pub fn bare(kind: EventKind) -> Self {
        Self {
            kind,
            point: None,
            lng_lat: None,
        }
    }

    /// Pointer event at `point`
    #[must_use]
    pub fn at(kind: EventKind, point: ScreenPoint, lng_lat: LngLat) -> Self {
        Self {
            kind,
            point: Some(point),
            lng_lat: Some(lng_lat),
        }
    }
}

/// Feature returned by a rendered-features query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedFeature {
    /// Layer the feature was drawn by
    pub layer_id: String,
    /// Feature position
    pub geometry: Point,
    /// Feature properties, including `cluster_id`/`point_count` for clusters
    pub properties: Map<String, Value>,
}

impl RenderedFeature {
    /// Cluster id, for cluster features
    #[must_use]
    pub fn cluster_id(&self) -> Option<u64> {
        self.properties.get("cluster_id").and_then(Value::as_u64)
    }

    /// Location id, for unclustered points
    #[must_use]
    pub fn location_id(&self) -> Option<i64> {
        self.properties.get("locationId").and_then(Value::as_i64)
    }
}

/// Handle returned by [`MapEngine::on`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListenerId(pub Uuid);

impl ListenerId {
    /// Fresh random id
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Callback attached to an engine event
pub type EventHandler = Arc<dyn Fn(&MapEvent) + Send + Sync>;

/// Capabilities the check-in layer requires from a map renderer
///
/// Calls are synchronous except where the engine needs to compute something
/// over its own tiles. Implementations must tolerate calls after disposal by
/// returning [`EngineError::Disposed`] rather than panicking.
pub trait MapEngine: Send + Sync {
    /// Whether the style has finished loading
    fn is_style_loaded(&self) -> bool;

    // Image atlas

    /// Whether the atlas holds `id`
    fn has_image(&self, id: &str) -> bool;

    /// Add a bitmap to the atlas at its pixel ratio
    ///
    /// # Errors
    /// `EngineError::ImageExists` if `id` is taken.
    fn add_image(&self, id: &str, image: &SpriteImage) -> Result<(), EngineError>;

    /// Remove a bitmap from the atlas
    ///
    /// # Errors
    /// Engine specific.
    fn remove_image(&self, id: &str) -> Result<(), EngineError>;

    // Sources

    /// Whether a source with `id` exists
    fn has_source(&self, id: &str) -> bool;

    /// Create a source
    ///
    /// # Errors
    /// `EngineError::SourceExists` if `id` is taken.
    fn add_source(&self, id: &str, spec: &SourceSpec) -> Result<(), EngineError>;

    /// Replace a GeoJSON source's data wholesale
    ///
    /// # Errors
    /// `EngineError::MissingSource` if the source does not exist.
    fn set_source_data(&self, id: &str, data: &FeatureCollection) -> Result<(), EngineError>;

    /// Remove a source
    ///
    /// # Errors
    /// `EngineError::MissingSource` if the source does not exist.
    fn remove_source(&self, id: &str) -> Result<(), EngineError>;

    // Layers

    /// Whether a layer with `id` exists
    fn has_layer(&self, id: &str) -> bool;

    /// Create a layer
    ///
    /// # Errors
    /// `EngineError::LayerExists` or `EngineError::MissingSource`.
    fn add_layer(&self, spec: &LayerSpec) -> Result<(), EngineError>;

    /// Remove a layer
    ///
    /// # Errors
    /// `EngineError::MissingLayer` if the layer does not exist.
    fn remove_layer(&self, id: &str) -> Result<(), EngineError>;

    /// Set one layout property of a layer
    ///
    /// # Errors
    /// `EngineError::MissingLayer` if the layer does not exist.
    fn set_layout_property(&self, layer_id: &str, name: &str, value: Value)
        -> Result<(), EngineError>;

    // Camera

    /// Current zoom level
    fn zoom(&self) -> f64;

    /// Animate the camera
    fn ease_to(&self, target: CameraTarget);

    // Queries

    /// Features drawn at `point` by any of `layers`
    fn query_rendered_features(&self, point: ScreenPoint, layers: &[&str]) -> Vec<RenderedFeature>;

    /// Zoom at which a cluster splits into its children
    ///
    /// # Errors
    /// `EngineError::MissingSource` or `EngineError::Rejected` for unknown clusters.
    fn cluster_expansion_zoom(&self, source_id: &str, cluster_id: u64) -> Result<f64, EngineError>;

    // UI

    /// Open a popup, replacing any open one
    fn show_popup(&self, content: PopupContent);

    /// Change the canvas cursor
    fn set_cursor(&self, cursor: Cursor);

    // Events

    /// Attach a handler, optionally restricted to one layer's features
    fn on(&self, kind: EventKind, layer_id: Option<&str>, handler: EventHandler) -> ListenerId;

    /// Detach a handler; unknown ids are ignored
    fn off(&self, id: ListenerId);
}
