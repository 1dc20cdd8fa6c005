//! In-memory map engine
//!
//! Records every call the layer makes, evaluates layer style expressions the
//! way a renderer would, and lets tests fire pointer and camera events.

use crate::engine::{
    CameraTarget, Cursor, EventHandler, EventKind, ListenerId, LngLat, MapEngine, MapEvent,
    RenderedFeature, ScreenPoint,
};
use crate::error::EngineError;
use crate::popup::PopupContent;
use crate::style::{LayerSpec, SourceSpec};
use checkin_model::{EvalContext, Expr, FeatureCollection, Point, PointFeature};
use checkin_sprites::SpriteImage;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};

/// How a marker would be drawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMarker {
    /// Atlas id the icon expression picked
    pub icon: String,
    /// Text the label expression produced
    pub text: String,
}

struct Listener {
    id: ListenerId,
    kind: EventKind,
    layer: Option<String>,
    handler: EventHandler,
}

struct SourceRecord {
    spec: SourceSpec,
    data: FeatureCollection,
    updates: usize,
}

#[derive(Default)]
struct EngineState {
    style_loaded: bool,
    disposed: bool,
    images: HashMap<String, SpriteImage>,
    image_adds: HashMap<String, usize>,
    sources: HashMap<String, SourceRecord>,
    layers: Vec<LayerSpec>,
    layout: HashMap<(String, String), Value>,
    zoom: f64,
    camera: Vec<CameraTarget>,
    popups: Vec<PopupContent>,
    cursor: Cursor,
    listeners: Vec<Listener>,
    hits: Vec<(ScreenPoint, RenderedFeature)>,
    expansion_zooms: HashMap<u64, f64>,
    rejected_images: HashSet<String>,
    reject_sources: bool,
    reject_layers: bool,
}

/// Recording [`MapEngine`] for tests and the simulator
pub struct RecordingEngine {
    state: Mutex<EngineState>,
}

impl RecordingEngine {
    /// Engine whose style is already loaded
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState {
                style_loaded: true,
                zoom: 10.0,
                ..EngineState::default()
            }),
        }
    }

    /// Engine still loading its style
    #[must_use]
    pub fn loading() -> Self {
        let engine = Self::new();
        engine.state.lock().style_loaded = false;
        engine
    }

    /// Engine starting at `zoom`
    #[must_use]
    pub fn at_zoom(zoom: f64) -> Self {
        let engine = Self::new();
        engine.state.lock().zoom = zoom;
        engine
    }

    // Scripting

    /// Finish loading the style and fire `load`
    pub fn finish_style_load(&self) {
        self.state.lock().style_loaded = true;
        self.fire(MapEvent::bare(EventKind::Load), &[]);
    }

    /// Make every later call fail with `Disposed`
    pub fn dispose(&self) {
        self.state.lock().disposed = true;
    }

    /// Refuse `add_image` for `id`
    pub fn reject_image(&self, id: &str) {
        self.state.lock().rejected_images.insert(id.to_string());
    }

    /// Refuse or accept `add_source`
    pub fn reject_sources(&self, reject: bool) {
        self.state.lock().reject_sources = reject;
    }

    /// Refuse or accept `add_layer`
    pub fn reject_layers(&self, reject: bool) {
        self.state.lock().reject_layers = reject;
    }

    /// Zoom and fire `zoomend`
    pub fn zoom_to(&self, zoom: f64) {
        self.state.lock().zoom = zoom;
        self.fire(MapEvent::bare(EventKind::ZoomEnd), &[]);
    }

    /// Fire `moveend`
    pub fn pan(&self) {
        self.fire(MapEvent::bare(EventKind::MoveEnd), &[]);
    }

    /// Click the marker for `location_id` on `layer_id`
    ///
    /// Returns `false` if the layer or the feature does not exist.
    #[allow(clippy::cast_precision_loss)]
    pub fn click_point(&self, layer_id: &str, location_id: i64) -> bool {
        let point = ScreenPoint::new(location_id as f64, 0.0);
        let hit = {
            let state = self.state.lock();
            state
                .source_of(layer_id)
                .and_then(|source| source.data.get(location_id))
                .map(|feature| rendered(layer_id, feature))
        };
        let Some(hit) = hit else {
            return false;
        };
        self.state.lock().hits = vec![(point, hit.clone())];
        self.fire(MapEvent::at(EventKind::Click, point, LngLat::from(&hit.geometry)), &[layer_id]);
        true
    }

    /// Click a cluster of `point_count` points whose expansion zoom is `expansion_zoom`
    pub fn click_cluster(
        &self,
        layer_id: &str,
        cluster_id: u64,
        point_count: u32,
        center: LngLat,
        expansion_zoom: f64,
    ) {
        let point = ScreenPoint::new(-1.0, -1.0);
        let mut properties = Map::new();
        properties.insert("cluster".into(), json!(true));
        properties.insert("cluster_id".into(), json!(cluster_id));
        properties.insert("point_count".into(), json!(point_count));
        let hit = RenderedFeature {
            layer_id: layer_id.to_string(),
            geometry: Point::new(center.lng, center.lat),
            properties,
        };
        {
            let mut state = self.state.lock();
            state.expansion_zooms.insert(cluster_id, expansion_zoom);
            state.hits = vec![(point, hit)];
        }
        self.fire(MapEvent::at(EventKind::Click, point, center), &[layer_id]);
    }

    /// Move the pointer onto (`true`) or off a layer's features
    pub fn hover(&self, layer_id: &str, entering: bool) {
        let kind = if entering {
            EventKind::MouseEnter
        } else {
            EventKind::MouseLeave
        };
        self.fire(MapEvent::bare(kind), &[layer_id]);
    }

    fn fire(&self, event: MapEvent, hit_layers: &[&str]) {
        let handlers: Vec<EventHandler> = self
            .state
            .lock()
            .listeners
            .iter()
            .filter(|l| l.kind == event.kind)
            .filter(|l| l.layer.as_deref().map_or(true, |id| hit_layers.contains(&id)))
            .map(|l| l.handler.clone())
            .collect();
        for handler in handlers {
            handler(&event);
        }
    }

    // Inspection

    /// Times `add_image` succeeded for `id`
    #[must_use]
    pub fn image_add_count(&self, id: &str) -> usize {
        self.state.lock().image_adds.get(id).copied().unwrap_or(0)
    }

    /// Largest `add_image` count across ids
    #[must_use]
    pub fn max_image_adds(&self) -> usize {
        self.state.lock().image_adds.values().copied().max().unwrap_or(0)
    }

    /// Atlas ids, sorted
    #[must_use]
    pub fn image_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().images.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Registered image
    #[must_use]
    pub fn image(&self, id: &str) -> Option<SpriteImage> {
        self.state.lock().images.get(id).cloned()
    }

    /// Source definition
    #[must_use]
    pub fn source_spec(&self, id: &str) -> Option<SourceSpec> {
        self.state.lock().sources.get(id).map(|s| s.spec.clone())
    }

    /// Current source data
    #[must_use]
    pub fn source_data(&self, id: &str) -> Option<FeatureCollection> {
        self.state.lock().sources.get(id).map(|s| s.data.clone())
    }

    /// Number of `set_source_data` calls on `id`
    #[must_use]
    pub fn source_updates(&self, id: &str) -> usize {
        self.state.lock().sources.get(id).map_or(0, |s| s.updates)
    }

    /// Features in a source, 0 if it does not exist
    #[must_use]
    pub fn feature_count(&self, id: &str) -> usize {
        self.state.lock().sources.get(id).map_or(0, |s| s.data.len())
    }

    /// Number of sources
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.state.lock().sources.len()
    }

    /// Layer ids in draw order
    #[must_use]
    pub fn layer_ids(&self) -> Vec<String> {
        self.state.lock().layers.iter().map(|l| l.id.clone()).collect()
    }

    /// Layout property last set on a layer
    #[must_use]
    pub fn layout_property(&self, layer_id: &str, name: &str) -> Option<Value> {
        self.state
            .lock()
            .layout
            .get(&(layer_id.to_string(), name.to_string()))
            .cloned()
    }

    /// Whether a layer is drawn
    #[must_use]
    pub fn is_layer_visible(&self, layer_id: &str) -> bool {
        self.layout_property(layer_id, "visibility")
            .map_or(true, |v| v != json!("none"))
    }

    /// Attached listeners
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    /// Camera moves so far
    #[must_use]
    pub fn camera_moves(&self) -> Vec<CameraTarget> {
        self.state.lock().camera.clone()
    }

    /// Popups shown so far
    #[must_use]
    pub fn popups(&self) -> Vec<PopupContent> {
        self.state.lock().popups.clone()
    }

    /// Current cursor
    #[must_use]
    pub fn cursor(&self) -> Cursor {
        self.state.lock().cursor
    }

    /// Draw the marker for `location_id` through `layer_id`'s style
    ///
    /// `None` if the layer, source or feature is missing, or the layer's
    /// filter excludes the feature.
    #[must_use]
    pub fn resolve_point(&self, layer_id: &str, location_id: i64) -> Option<ResolvedMarker> {
        let state = self.state.lock();
        let layer = state.layers.iter().find(|l| l.id == layer_id)?;
        let feature = state.sources.get(&layer.source)?.data.get(location_id)?;
        let lookup = |name: &str| feature.property(name);
        state.resolve(layer, &lookup)
    }

    /// Draw a cluster of `point_count` points through `layer_id`'s style
    #[must_use]
    pub fn resolve_cluster(&self, layer_id: &str, point_count: u32) -> Option<ResolvedMarker> {
        let state = self.state.lock();
        let layer = state.layers.iter().find(|l| l.id == layer_id)?;
        let lookup = |name: &str| match name {
            "point_count" => Some(json!(point_count)),
            "cluster" => Some(json!(true)),
            _ => None,
        };
        state.resolve(layer, &lookup)
    }

    fn check(&self) -> Result<parking_lot::MutexGuard<'_, EngineState>, EngineError> {
        let state = self.state.lock();
        if state.disposed {
            return Err(EngineError::Disposed);
        }
        Ok(state)
    }
}

impl Default for RecordingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RecordingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RecordingEngine")
            .field("images", &state.images.len())
            .field("sources", &state.sources.len())
            .field("layers", &state.layers.len())
            .field("listeners", &state.listeners.len())
            .field("zoom", &state.zoom)
            .finish_non_exhaustive()
    }
}

impl EngineState {
    fn source_of(&self, layer_id: &str) -> Option<&SourceRecord> {
        let layer = self.layers.iter().find(|l| l.id == layer_id)?;
        self.sources.get(&layer.source)
    }

    fn resolve(
        &self,
        layer: &LayerSpec,
        lookup: &dyn Fn(&str) -> Option<Value>,
    ) -> Option<ResolvedMarker> {
        let ctx = StyleContext {
            lookup,
            images: &self.images,
        };
        if layer.filter.evaluate(&ctx) != Value::Bool(true) {
            return None;
        }
        let text = |expr: &Expr| match expr.evaluate(&ctx) {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };
        Some(ResolvedMarker {
            icon: text(&layer.layout.icon_image),
            text: text(&layer.layout.text_field),
        })
    }
}

struct StyleContext<'a> {
    lookup: &'a dyn Fn(&str) -> Option<Value>,
    images: &'a HashMap<String, SpriteImage>,
}

impl EvalContext for StyleContext<'_> {
    fn property(&self, name: &str) -> Option<Value> {
        (self.lookup)(name)
    }

    fn has_image(&self, id: &str) -> bool {
        self.images.contains_key(id)
    }
}

fn rendered(layer_id: &str, feature: &PointFeature) -> RenderedFeature {
    let properties = match serde_json::to_value(&feature.properties) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    RenderedFeature {
        layer_id: layer_id.to_string(),
        geometry: feature.geometry.clone(),
        properties,
    }
}

impl MapEngine for RecordingEngine {
    fn is_style_loaded(&self) -> bool {
        self.state.lock().style_loaded
    }

    fn has_image(&self, id: &str) -> bool {
        self.state.lock().images.contains_key(id)
    }

    fn add_image(&self, id: &str, image: &SpriteImage) -> Result<(), EngineError> {
        let mut state = self.check()?;
        if state.rejected_images.contains(id) {
            return Err(EngineError::Rejected(format!("image {id} refused")));
        }
        if state.images.contains_key(id) {
            return Err(EngineError::ImageExists(id.to_string()));
        }
        state.images.insert(id.to_string(), image.clone());
        *state.image_adds.entry(id.to_string()).or_default() += 1;
        Ok(())
    }

    fn remove_image(&self, id: &str) -> Result<(), EngineError> {
        self.check()?.images.remove(id);
        Ok(())
    }

    fn has_source(&self, id: &str) -> bool {
        self.state.lock().sources.contains_key(id)
    }

    fn add_source(&self, id: &str, spec: &SourceSpec) -> Result<(), EngineError> {
        let mut state = self.check()?;
        if state.reject_sources {
            return Err(EngineError::Rejected(format!("source {id} refused")));
        }
        if state.sources.contains_key(id) {
            return Err(EngineError::SourceExists(id.to_string()));
        }
        state.sources.insert(
            id.to_string(),
            SourceRecord {
                spec: spec.clone(),
                data: spec.data.clone(),
                updates: 0,
            },
        );
        Ok(())
    }

    fn set_source_data(&self, id: &str, data: &FeatureCollection) -> Result<(), EngineError> {
        let mut state = self.check()?;
        let source = state
            .sources
            .get_mut(id)
            .ok_or_else(|| EngineError::MissingSource(id.to_string()))?;
        source.data = data.clone();
        source.updates += 1;
        Ok(())
    }

    fn remove_source(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.check()?;
        if state.layers.iter().any(|l| l.source == id) {
            return Err(EngineError::Rejected(format!("source {id} still in use")));
        }
        state
            .sources
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| EngineError::MissingSource(id.to_string()))
    }

    fn has_layer(&self, id: &str) -> bool {
        self.state.lock().layers.iter().any(|l| l.id == id)
    }

    fn add_layer(&self, spec: &LayerSpec) -> Result<(), EngineError> {
        let mut state = self.check()?;
        if state.reject_layers {
            return Err(EngineError::Rejected(format!("layer {} refused", spec.id)));
        }
        if state.layers.iter().any(|l| l.id == spec.id) {
            return Err(EngineError::LayerExists(spec.id.clone()));
        }
        if !state.sources.contains_key(&spec.source) {
            return Err(EngineError::MissingSource(spec.source.clone()));
        }
        state.layers.push(spec.clone());
        Ok(())
    }

    fn remove_layer(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.check()?;
        let before = state.layers.len();
        state.layers.retain(|l| l.id != id);
        if state.layers.len() == before {
            return Err(EngineError::MissingLayer(id.to_string()));
        }
        state.layout.retain(|(layer, _), _| layer != id);
        Ok(())
    }

    fn set_layout_property(&self, layer_id: &str, name: &str, value: Value) -> Result<(), EngineError> {
        let mut state = self.check()?;
        if !state.layers.iter().any(|l| l.id == layer_id) {
            return Err(EngineError::MissingLayer(layer_id.to_string()));
        }
        state
            .layout
            .insert((layer_id.to_string(), name.to_string()), value);
        Ok(())
    }

    fn zoom(&self) -> f64 {
        self.state.lock().zoom
    }

    fn ease_to(&self, target: CameraTarget) {
        let mut state = self.state.lock();
        state.zoom = target.zoom;
        state.camera.push(target);
    }

    fn query_rendered_features(&self, point: ScreenPoint, layers: &[&str]) -> Vec<RenderedFeature> {
        self.state
            .lock()
            .hits
            .iter()
            .filter(|(at, f)| *at == point && layers.contains(&f.layer_id.as_str()))
            .map(|(_, f)| f.clone())
            .collect()
    }

    fn cluster_expansion_zoom(&self, source_id: &str, cluster_id: u64) -> Result<f64, EngineError> {
        let state = self.check()?;
        if !state.sources.contains_key(source_id) {
            return Err(EngineError::MissingSource(source_id.to_string()));
        }
        state
            .expansion_zooms
            .get(&cluster_id)
            .copied()
            .ok_or_else(|| EngineError::Rejected(format!("unknown cluster {cluster_id}")))
    }

    fn show_popup(&self, content: PopupContent) {
        self.state.lock().popups.push(content);
    }

    fn set_cursor(&self, cursor: Cursor) {
        self.state.lock().cursor = cursor;
    }

    fn on(&self, kind: EventKind, layer_id: Option<&str>, handler: EventHandler) -> ListenerId {
        let id = ListenerId::new();
        self.state.lock().listeners.push(Listener {
            id,
            kind,
            layer: layer_id.map(str::to_string),
            handler,
        });
        id
    }

    fn off(&self, id: ListenerId) {
        self.state.lock().listeners.retain(|l| l.id != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayerConfig;
    use crate::style::{points_layer, SourceSpec};
    use checkin_model::{build_features, CheckInAggregate, UserRef};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn layer_events_only_reach_hit_layer() {
        let engine = RecordingEngine::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        engine.on(
            EventKind::MouseEnter,
            Some("points"),
            Arc::new(move |_: &MapEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        engine.hover("other", true);
        engine.hover("points", true);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn resolves_points_through_style() {
        let engine = RecordingEngine::new();
        let config = LayerConfig::default();
        engine
            .add_source(&config.source_id, &SourceSpec::clustered(&config))
            .unwrap();
        engine.add_layer(&points_layer(&config)).unwrap();

        let aggregate = CheckInAggregate::new(
            5,
            1.0,
            2.0,
            vec![UserRef::with_avatar("u1", "A", "https://cdn.example/u1.png")],
            4,
        );
        engine
            .set_source_data(&config.source_id, &build_features(&[aggregate]).collection)
            .unwrap();

        let marker = engine.resolve_point(&config.points_layer_id, 5).unwrap();
        assert_eq!(marker.icon, "fallback");
        assert_eq!(marker.text, "+3");

        engine
            .add_image("avatar-u1", &checkin_sprites::fallback_avatar(1.0))
            .unwrap();
        let marker = engine.resolve_point(&config.points_layer_id, 5).unwrap();
        assert_eq!(marker.icon, "avatar-u1");
    }

    #[test]
    fn disposed_engine_refuses_mutation() {
        let engine = RecordingEngine::new();
        engine.dispose();
        assert_eq!(
            engine.add_image("x", &checkin_sprites::fallback_avatar(1.0)),
            Err(EngineError::Disposed)
        );
        assert_eq!(engine.remove_layer("x"), Err(EngineError::Disposed));
    }
}
