//! Lifecycle event hook
//!
//! Layer operations report what they did as [`LayerEvent`]s. Hosts inject an
//! [`EventSink`] to forward them to their own telemetry; by default they go to
//! `tracing`. Nothing is emitted unless `LayerConfig::emit_events` is set.

use crate::registry::RegistrationOutcome;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Something the layer did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LayerEvent {
    /// A sprite registration attempt finished
    ImageRegistration {
        /// Atlas id
        image_id: String,
        /// What happened
        outcome: RegistrationOutcome,
    },
    /// Style not loaded yet; initialization waits for the load signal
    InitDeferred,
    /// Clustered source created
    SourceCreated {
        /// Source id
        source_id: String,
    },
    /// Cluster and point layers created
    LayersCreated {
        /// Cluster layer id
        cluster_layer_id: String,
        /// Points layer id
        points_layer_id: String,
    },
    /// Source or layer creation failed; retried on the next data update
    CreationFailed {
        /// Engine error text
        reason: String,
    },
    /// Layer marked ready
    Ready,
    /// Interaction handlers attached
    HandlersAttached {
        /// Number of listeners
        listeners: usize,
    },
    /// A data set was pushed to the source
    DataApplied {
        /// Features sent
        features: usize,
        /// Aggregates dropped as invalid
        rejected: usize,
        /// Duplicate location ids dropped
        duplicates: usize,
    },
    /// Cluster layer visibility recomputed
    ClusterVisibility {
        /// Current zoom
        zoom: f64,
        /// Whether clusters are shown
        visible: bool,
    },
    /// Camera eased into a cluster
    ClusterExpanded {
        /// Engine cluster id
        cluster_id: u64,
        /// Target zoom
        zoom: f64,
    },
    /// Roster popup opened
    PopupShown {
        /// Location id
        location_id: i64,
        /// Users listed
        entries: usize,
    },
    /// Listeners, layers and source removed
    TornDown,
}

/// Receiver of layer events
pub trait EventSink: Send + Sync {
    /// Handle one event
    fn emit(&self, event: &LayerEvent);
}

/// Forwards events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &LayerEvent) {
        match event {
            LayerEvent::ImageRegistration {
                image_id,
                outcome: RegistrationOutcome::Failed(reason),
            } => warn!(image_id = %image_id, %reason, "image registration failed"),
            LayerEvent::ImageRegistration { image_id, outcome } => {
                debug!(image_id = %image_id, ?outcome, "image registration");
            }
            LayerEvent::CreationFailed { reason } => {
                warn!(%reason, "source/layer creation failed");
            }
            LayerEvent::DataApplied {
                features,
                rejected,
                duplicates,
            } => info!(features, rejected, duplicates, "check-ins applied"),
            LayerEvent::Ready | LayerEvent::TornDown => info!(?event, "layer lifecycle"),
            other => debug!(event = ?other, "layer event"),
        }
    }
}

/// Keeps every event, for tests
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<LayerEvent>>>,
}

impl RecordingSink {
    /// Empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events so far
    #[must_use]
    pub fn events(&self) -> Vec<LayerEvent> {
        self.events.lock().clone()
    }

    /// Count events matching `pred`
    pub fn count(&self, pred: impl Fn(&LayerEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    /// Drop recorded events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &LayerEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Sink plus the enable flag
#[derive(Clone)]
pub(crate) struct Emitter {
    sink: Arc<dyn EventSink>,
    enabled: bool,
}

impl Emitter {
    pub(crate) fn new(sink: Arc<dyn EventSink>, enabled: bool) -> Self {
        Self { sink, enabled }
    }

    pub(crate) fn emit(&self, event: LayerEvent) {
        if self.enabled {
            self.sink.emit(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_emitter_drops_events() {
        let sink = RecordingSink::new();
        Emitter::new(Arc::new(sink.clone()), false).emit(LayerEvent::Ready);
        assert!(sink.events().is_empty());

        Emitter::new(Arc::new(sink.clone()), true).emit(LayerEvent::Ready);
        assert_eq!(sink.events(), vec![LayerEvent::Ready]);
    }

    #[test]
    fn events_serialize_tagged() {
        let event = LayerEvent::ImageRegistration {
            image_id: "fallback".into(),
            outcome: RegistrationOutcome::AlreadyExists,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "image_registration");
        assert_eq!(json["outcome"]["outcome"], "already_exists");
    }
}
