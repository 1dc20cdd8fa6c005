//! Click, hover and camera handlers

use crate::config::LayerConfig;
use crate::engine::{CameraTarget, Cursor, EventKind, LngLat, MapEngine, MapEvent};
use crate::engine::{EventHandler, ListenerId};
use crate::error::EngineError;
use crate::events::{Emitter, LayerEvent};
use crate::popup::PopupContent;
use crate::style::Visibility;
use checkin_model::CheckInAggregate;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Aggregates currently on the map, by location id
pub(crate) type Snapshot = Arc<RwLock<HashMap<i64, CheckInAggregate>>>;

/// Zoom a cluster click eases to
///
/// Always past `cluster_max_zoom`, so the click reveals individual markers
/// even when the engine reports a shallower expansion zoom.
#[inline]
#[must_use]
pub fn cluster_target_zoom(expansion_zoom: f64, cluster_max_zoom: f64) -> f64 {
    expansion_zoom.max(cluster_max_zoom + 1.0)
}

/// Whether the cluster layer is drawn at `zoom`
#[inline]
#[must_use]
pub fn cluster_layer_visible(zoom: f64, cluster_max_zoom: f64) -> bool {
    zoom <= cluster_max_zoom
}

/// Show or hide the cluster layer for the current zoom
///
/// # Errors
/// `EngineError::MissingLayer` if the cluster layer is gone.
pub(crate) fn apply_visibility(
    engine: &dyn MapEngine,
    config: &LayerConfig,
    emitter: &Emitter,
) -> Result<bool, EngineError> {
    let zoom = engine.zoom();
    let visible = cluster_layer_visible(zoom, config.cluster_max_zoom);
    engine.set_layout_property(
        &config.cluster_layer_id,
        "visibility",
        Visibility::from_shown(visible).to_value(),
    )?;
    emitter.emit(LayerEvent::ClusterVisibility { zoom, visible });
    Ok(visible)
}

/// State shared by every handler of one mounted layer
#[derive(Clone)]
pub(crate) struct Handlers {
    pub(crate) engine: Arc<dyn MapEngine>,
    pub(crate) config: Arc<LayerConfig>,
    pub(crate) snapshot: Snapshot,
    pub(crate) emitter: Emitter,
}

impl Handlers {
    /// Attach cluster click, point click, hover and camera handlers
    pub(crate) fn attach(&self) -> Vec<ListenerId> {
        let clusters = self.config.cluster_layer_id.as_str();
        let points = self.config.points_layer_id.as_str();

        let bindings: [(EventKind, Option<&str>, EventHandler); 6] = [
            (EventKind::Click, Some(clusters), self.handler(Self::on_cluster_click)),
            (EventKind::Click, Some(points), self.handler(Self::on_point_click)),
            (EventKind::MouseEnter, Some(points), self.cursor(Cursor::Pointer)),
            (EventKind::MouseLeave, Some(points), self.cursor(Cursor::Default)),
            (EventKind::ZoomEnd, None, self.handler(Self::on_camera_end)),
            (EventKind::MoveEnd, None, self.handler(Self::on_camera_end)),
        ];

        let ids: Vec<ListenerId> = bindings
            .into_iter()
            .map(|(kind, layer, handler)| self.engine.on(kind, layer, handler))
            .collect();
        self.emitter
            .emit(LayerEvent::HandlersAttached { listeners: ids.len() });
        ids
    }

    fn handler(&self, f: fn(&Self, &MapEvent)) -> EventHandler {
        let this = self.clone();
        Arc::new(move |event: &MapEvent| f(&this, event))
    }

    fn cursor(&self, cursor: Cursor) -> EventHandler {
        let engine = Arc::clone(&self.engine);
        Arc::new(move |_: &MapEvent| engine.set_cursor(cursor))
    }

    fn on_cluster_click(&self, event: &MapEvent) {
        let Some(point) = event.point else {
            return;
        };
        let hits = self
            .engine
            .query_rendered_features(point, &[self.config.cluster_layer_id.as_str()]);
        let Some((cluster_id, center)) = hits
            .iter()
            .find_map(|f| Some((f.cluster_id()?, LngLat::from(&f.geometry))))
        else {
            return;
        };

        match self
            .engine
            .cluster_expansion_zoom(&self.config.source_id, cluster_id)
        {
            Ok(expansion) => {
                let zoom = cluster_target_zoom(expansion, self.config.cluster_max_zoom);
                debug!(cluster_id, expansion, zoom, "expanding cluster");
                self.engine.ease_to(CameraTarget { center, zoom });
                self.emitter
                    .emit(LayerEvent::ClusterExpanded { cluster_id, zoom });
            }
            Err(e) => warn!(cluster_id, error = %e, "cluster expansion zoom unavailable"),
        }
    }

    fn on_point_click(&self, event: &MapEvent) {
        let Some(point) = event.point else {
            return;
        };
        let hits = self
            .engine
            .query_rendered_features(point, &[self.config.points_layer_id.as_str()]);
        let Some(location_id) = hits.iter().find_map(|f| f.location_id()) else {
            return;
        };

        let popup = self
            .snapshot
            .read()
            .get(&location_id)
            .map(|agg| PopupContent::for_aggregate(agg, self.config.popup_max_users));
        let Some(popup) = popup else {
            debug!(location_id, "clicked marker no longer in data set");
            return;
        };

        let entries = popup.entries.len();
        self.engine.show_popup(popup);
        self.emitter
            .emit(LayerEvent::PopupShown { location_id, entries });
    }

    fn on_camera_end(&self, _event: &MapEvent) {
        if let Err(e) = apply_visibility(self.engine.as_ref(), &self.config, &self.emitter) {
            debug!(error = %e, "cluster visibility not updated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn target_zoom_passes_max_zoom() {
        assert!((cluster_target_zoom(10.0, 14.0) - 15.0).abs() < f64::EPSILON);
        assert!((cluster_target_zoom(16.5, 14.0) - 16.5).abs() < f64::EPSILON);
    }

    #[test]
    fn clusters_hidden_only_past_max_zoom() {
        assert!(cluster_layer_visible(14.0, 14.0));
        assert!(!cluster_layer_visible(14.01, 14.0));
    }

    proptest! {
        #[test]
        fn target_zoom_rule(expansion in 0.0f64..24.0, max in 0.0f64..22.0) {
            let zoom = cluster_target_zoom(expansion, max);
            prop_assert!(zoom >= expansion);
            prop_assert!(zoom >= max + 1.0);
            prop_assert!(zoom == expansion || zoom == max + 1.0);
        }

        #[test]
        fn visibility_rule(zoom in 0.0f64..24.0, max in 0.0f64..24.0) {
            prop_assert_eq!(cluster_layer_visible(zoom, max), !(zoom > max));
        }
    }
}
