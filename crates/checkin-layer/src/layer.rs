//! The check-in map layer
//!
//! [`CheckInMapLayer`] binds a list of check-in aggregates to one engine
//! instance:
//!
//! 1. `mount` waits for the style, registers sprites and avatars, creates the
//!    clustered source and both symbol layers, attaches handlers
//! 2. `set_check_ins` pushes each new list, registering new avatars first
//! 3. `unmount` (or drop) detaches handlers and removes layers and source
//!
//! Nothing here fails the host: engine and asset errors degrade to logged
//! warnings, the fallback glyph, or a retry on the next data update.

use crate::assets::register_static_sprites;
use crate::avatar::{register_avatars, AvatarLoader};
use crate::config::LayerConfig;
use crate::engine::{EventKind, ListenerId, MapEngine, MapEvent};
use crate::error::{EngineError, LayerError};
use crate::events::{Emitter, EventSink, LayerEvent, TracingSink};
use crate::interaction::{apply_visibility, Handlers, Snapshot};
use crate::registry::{RegistrationOutcome, SpriteRegistry};
use crate::style::{cluster_layer, points_layer, SourceSpec};
use checkin_model::{avatar_requests, build_features, CheckInAggregate, IconId};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Result of [`CheckInMapLayer::mount`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MountOutcome {
    /// Initialized; the layer is ready
    Ready,
    /// The layer was already mounted
    AlreadyMounted,
    /// Unmounted before initialization finished
    Cancelled,
}

/// What happened to one data set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Pushed to the source
    Applied,
    /// Layer not ready; kept and applied once initialization completes
    Deferred,
    /// A newer list arrived while avatars were loading
    Superseded,
    /// The engine refused the data; the next update retries
    Failed(String),
}

/// Report of one [`CheckInMapLayer::set_check_ins`] call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    /// Outcome
    pub status: SyncStatus,
    /// Features pushed
    pub features: usize,
    /// Aggregates dropped as invalid
    pub rejected: usize,
    /// Duplicate location ids dropped
    pub duplicates: usize,
    /// Avatar registration attempts
    pub avatars: Vec<(IconId, RegistrationOutcome)>,
}

impl SyncReport {
    fn with_status(status: SyncStatus) -> Self {
        Self {
            status,
            features: 0,
            rejected: 0,
            duplicates: 0,
            avatars: Vec::new(),
        }
    }

    /// Whether the data reached the engine
    #[inline]
    #[must_use]
    pub fn is_applied(&self) -> bool {
        self.status == SyncStatus::Applied
    }
}

#[derive(Debug, Default)]
struct LayerState {
    mounted: bool,
    ready: bool,
    epoch: u64,
    listeners: Vec<ListenerId>,
    load_listener: Option<ListenerId>,
}

/// Clustered check-in markers on one map engine
///
/// The sprite registry belongs to the engine instance, not the layer: hosts
/// share one [`SpriteRegistry`] between every layer they create on the same
/// engine so remounts never register an image twice.
pub struct CheckInMapLayer {
    engine: Arc<dyn MapEngine>,
    registry: Arc<SpriteRegistry>,
    loader: Arc<dyn AvatarLoader>,
    config: Arc<LayerConfig>,
    emitter: Emitter,
    snapshot: Snapshot,
    state: Mutex<LayerState>,
    latest: Mutex<Option<(u64, Arc<[CheckInAggregate]>)>>,
    data_seq: AtomicU64,
    style_loaded: Arc<Notify>,
}

impl CheckInMapLayer {
    /// Create an unmounted layer
    ///
    /// # Errors
    /// Returns `LayerError::Config` if `config` does not validate.
    pub fn new(
        engine: Arc<dyn MapEngine>,
        registry: Arc<SpriteRegistry>,
        loader: Arc<dyn AvatarLoader>,
        config: LayerConfig,
    ) -> Result<Self, LayerError> {
        config.validate()?;
        let emitter = Emitter::new(Arc::new(TracingSink), config.emit_events);
        Ok(Self {
            engine,
            registry,
            loader,
            config: Arc::new(config),
            emitter,
            snapshot: Arc::new(RwLock::new(HashMap::new())),
            state: Mutex::new(LayerState::default()),
            latest: Mutex::new(None),
            data_seq: AtomicU64::new(0),
            style_loaded: Arc::new(Notify::new()),
        })
    }

    /// Send events to `sink` instead of `tracing`
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.emitter = Emitter::new(sink, self.config.emit_events);
        self
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    /// Shared sprite registry
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<SpriteRegistry> {
        &self.registry
    }

    /// Whether initialization has completed
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    /// Whether the layer is mounted
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.state.lock().mounted
    }

    /// Handlers currently attached to the engine
    #[must_use]
    pub fn listener_count(&self) -> usize {
        let state = self.state.lock();
        state.listeners.len() + usize::from(state.load_listener.is_some())
    }

    /// Aggregate currently shown for `location_id`
    #[must_use]
    pub fn aggregate(&self, location_id: i64) -> Option<CheckInAggregate> {
        self.snapshot.read().get(&location_id).cloned()
    }

    /// Mount on the engine, waiting for its style to load first
    ///
    /// Calling it again while mounted is a no-op, so handlers are attached
    /// once however many times the host mounts.
    pub async fn mount(&self) -> MountOutcome {
        let epoch = {
            let mut state = self.state.lock();
            if state.mounted {
                return MountOutcome::AlreadyMounted;
            }
            state.mounted = true;
            state.epoch += 1;
            state.epoch
        };

        if !self.wait_for_style(epoch).await {
            return MountOutcome::Cancelled;
        }
        self.initialize(epoch).await
    }

    async fn wait_for_style(&self, epoch: u64) -> bool {
        if self.engine.is_style_loaded() {
            return true;
        }

        self.emitter.emit(LayerEvent::InitDeferred);
        debug!("style not loaded, deferring initialization");
        let notify = Arc::clone(&self.style_loaded);
        let id = self
            .engine
            .on(EventKind::Load, None, Arc::new(move |_: &MapEvent| notify.notify_one()));
        self.state.lock().load_listener = Some(id);

        // The load event may have fired between the first check and `on`.
        while !self.engine.is_style_loaded() {
            self.style_loaded.notified().await;
            if !self.is_current(epoch) {
                return false;
            }
        }

        let load_listener = self.state.lock().load_listener.take();
        if let Some(id) = load_listener {
            self.engine.off(id);
        }
        self.is_current(epoch)
    }

    fn is_current(&self, epoch: u64) -> bool {
        let state = self.state.lock();
        state.mounted && state.epoch == epoch
    }

    async fn initialize(&self, epoch: u64) -> MountOutcome {
        let statics = register_static_sprites(
            self.engine.as_ref(),
            &self.registry,
            self.config.pixel_ratio,
        );
        self.report_images(&statics);

        let registered = self.register_pending_avatars(epoch, None).await;

        if !self.is_current(epoch) {
            debug!("unmounted during initialization");
            return MountOutcome::Cancelled;
        }

        if let Err(e) = self.ensure_source_and_layers() {
            warn!(error = %e, "source/layer creation failed, retrying on next update");
            self.emitter.emit(LayerEvent::CreationFailed {
                reason: e.to_string(),
            });
        }

        let handlers = Handlers {
            engine: Arc::clone(&self.engine),
            config: Arc::clone(&self.config),
            snapshot: Arc::clone(&self.snapshot),
            emitter: self.emitter.clone(),
        };
        {
            let mut state = self.state.lock();
            state.ready = true;
            if state.listeners.is_empty() {
                state.listeners = handlers.attach();
            }
        }
        info!(
            source = %self.config.source_id,
            cluster_layer = self.engine.has_layer(&self.config.cluster_layer_id),
            "check-in layer ready"
        );
        self.emitter.emit(LayerEvent::Ready);
        self.update_visibility();

        // A list stored before `ready` was set may still lack its avatars.
        let registered = self.register_pending_avatars(epoch, registered).await;
        if !self.is_current(epoch) {
            return MountOutcome::Cancelled;
        }
        let latest = self.latest.lock().clone();
        if let Some((seq, list)) = latest {
            if registered == Some(seq) {
                self.apply(seq, &list);
            }
        }
        MountOutcome::Ready
    }

    /// Register avatars for the kept list until no newer list arrives
    ///
    /// Returns the sequence number of the last list whose avatars were
    /// registered.
    async fn register_pending_avatars(&self, epoch: u64, mut registered: Option<u64>) -> Option<u64> {
        loop {
            let pending = self.latest.lock().clone();
            let Some((seq, list)) = pending else {
                return registered;
            };
            if registered == Some(seq) || !self.is_current(epoch) {
                return registered;
            }
            let avatars = self.register_avatars(&list).await;
            self.report_images(&avatars);
            registered = Some(seq);
        }
    }

    /// Create the source and both layers where missing
    ///
    /// Returns whether any layer was added.
    fn ensure_source_and_layers(&self) -> Result<bool, LayerError> {
        let engine = self.engine.as_ref();
        let config = self.config.as_ref();

        if !engine.has_source(&config.source_id) {
            match engine.add_source(&config.source_id, &SourceSpec::clustered(config)) {
                Ok(()) => self.emitter.emit(LayerEvent::SourceCreated {
                    source_id: config.source_id.clone(),
                }),
                Err(EngineError::SourceExists(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let mut created = false;
        for spec in [cluster_layer(config), points_layer(config)] {
            if engine.has_layer(&spec.id) {
                continue;
            }
            match engine.add_layer(&spec) {
                Ok(()) => created = true,
                Err(EngineError::LayerExists(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        if created {
            self.emitter.emit(LayerEvent::LayersCreated {
                cluster_layer_id: config.cluster_layer_id.clone(),
                points_layer_id: config.points_layer_id.clone(),
            });
        }
        Ok(created)
    }

    /// Replace the markers with `check_ins`
    ///
    /// Before the layer is ready the list is kept and applied when
    /// initialization completes. Only the most recent list is ever applied.
    pub async fn set_check_ins(&self, check_ins: &[CheckInAggregate]) -> SyncReport {
        let seq = self.data_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let list: Arc<[CheckInAggregate]> = Arc::from(check_ins);
        *self.latest.lock() = Some((seq, Arc::clone(&list)));

        if !self.is_ready() {
            debug!(aggregates = list.len(), "layer not ready, data kept for initialization");
            return SyncReport::with_status(SyncStatus::Deferred);
        }

        let avatars = self.register_avatars(&list).await;
        self.report_images(&avatars);

        if self.data_seq.load(Ordering::SeqCst) != seq {
            debug!(seq, "newer check-ins arrived, skipping stale list");
            return SyncReport {
                avatars,
                ..SyncReport::with_status(SyncStatus::Superseded)
            };
        }
        if !self.is_ready() {
            return SyncReport {
                avatars,
                ..SyncReport::with_status(SyncStatus::Deferred)
            };
        }

        SyncReport {
            avatars,
            ..self.apply(seq, &list)
        }
    }

    fn apply(&self, seq: u64, list: &[CheckInAggregate]) -> SyncReport {
        let build = build_features(list);
        for rejected in &build.rejected {
            warn!(location_id = rejected.location_id(), error = %rejected, "check-in dropped");
        }
        if !build.duplicates.is_empty() {
            debug!(duplicates = ?build.duplicates, "duplicate locations dropped");
        }

        match self.ensure_source_and_layers() {
            Ok(true) => {
                self.update_visibility();
            }
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "source or layers still missing, data not applied");
                self.emitter.emit(LayerEvent::CreationFailed {
                    reason: e.to_string(),
                });
                return SyncReport::with_status(SyncStatus::Failed(e.to_string()));
            }
        }

        if let Err(e) = self
            .engine
            .set_source_data(&self.config.source_id, &build.collection)
        {
            warn!(error = %e, "setting check-in data failed");
            return SyncReport::with_status(SyncStatus::Failed(e.to_string()));
        }

        {
            let mut snapshot = self.snapshot.write();
            snapshot.clear();
            for &index in &build.kept {
                let aggregate = &list[index];
                snapshot.insert(aggregate.location_id, aggregate.clone());
            }
        }

        let report = SyncReport {
            status: SyncStatus::Applied,
            features: build.collection.len(),
            rejected: build.rejected.len(),
            duplicates: build.duplicates.len(),
            avatars: Vec::new(),
        };
        debug!(seq, features = report.features, "check-ins applied");
        self.emitter.emit(LayerEvent::DataApplied {
            features: report.features,
            rejected: report.rejected,
            duplicates: report.duplicates,
        });
        report
    }

    async fn register_avatars(&self, list: &[CheckInAggregate]) -> Vec<(IconId, RegistrationOutcome)> {
        let requests = avatar_requests(list);
        if requests.is_empty() {
            return Vec::new();
        }
        register_avatars(
            self.engine.as_ref(),
            &self.registry,
            self.loader.as_ref(),
            &requests,
            self.config.pixel_ratio,
            self.config.avatar_timeout(),
        )
        .await
    }

    fn report_images(&self, outcomes: &[(IconId, RegistrationOutcome)]) {
        for (id, outcome) in outcomes {
            self.emitter.emit(LayerEvent::ImageRegistration {
                image_id: id.to_string(),
                outcome: outcome.clone(),
            });
        }
    }

    /// Recompute cluster layer visibility for the current zoom
    ///
    /// Returns the new visibility, or `None` when the layer is not ready or
    /// the cluster layer is missing.
    pub fn update_visibility(&self) -> Option<bool> {
        if !self.is_ready() {
            return None;
        }
        match apply_visibility(self.engine.as_ref(), &self.config, &self.emitter) {
            Ok(visible) => Some(visible),
            Err(e) => {
                debug!(error = %e, "cluster visibility not updated");
                None
            }
        }
    }

    /// Detach handlers and remove layers and source
    ///
    /// Removal errors, such as a disposed engine, are ignored. Registered
    /// images stay in the atlas and the registry.
    pub fn unmount(&self) {
        let (listeners, load_listener) = {
            let mut state = self.state.lock();
            if !state.mounted {
                return;
            }
            state.mounted = false;
            state.ready = false;
            state.epoch += 1;
            (std::mem::take(&mut state.listeners), state.load_listener.take())
        };
        // Wake a mount still waiting for the style so it can bail out.
        self.style_loaded.notify_one();

        for id in listeners.into_iter().chain(load_listener) {
            self.engine.off(id);
        }

        let engine = self.engine.as_ref();
        for layer in [&self.config.points_layer_id, &self.config.cluster_layer_id] {
            if engine.has_layer(layer) {
                if let Err(e) = engine.remove_layer(layer) {
                    debug!(layer = %layer, error = %e, "layer removal ignored");
                }
            }
        }
        if engine.has_source(&self.config.source_id) {
            if let Err(e) = engine.remove_source(&self.config.source_id) {
                debug!(source = %self.config.source_id, error = %e, "source removal ignored");
            }
        }

        self.snapshot.write().clear();
        info!("check-in layer torn down");
        self.emitter.emit(LayerEvent::TornDown);
    }

    /// Tear down and move to another engine instance
    ///
    /// The caller remounts afterwards. The last data set is kept.
    pub fn rebind(&mut self, engine: Arc<dyn MapEngine>, registry: Arc<SpriteRegistry>) {
        self.unmount();
        self.engine = engine;
        self.registry = registry;
    }
}

impl Drop for CheckInMapLayer {
    fn drop(&mut self) {
        self.unmount();
    }
}

impl std::fmt::Debug for CheckInMapLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CheckInMapLayer")
            .field("source_id", &self.config.source_id)
            .field("mounted", &state.mounted)
            .field("ready", &state.ready)
            .field("listeners", &state.listeners.len())
            .finish_non_exhaustive()
    }
}
