//! Check-in layer simulator
//!
//! Drives a [`CheckInMapLayer`] on a [`RecordingEngine`] through randomized
//! data refreshes, remounts, camera moves and clicks, checking after every
//! step that:
//! - no image id is added to the atlas twice
//! - the source holds exactly one feature per valid location
//! - every marker resolves to the expected icon and badge
//! - cluster visibility and cluster-click zoom follow the zoom rules
//! - listeners never accumulate and teardown leaves nothing behind

use super::engine::RecordingEngine;
use super::loader::{solid_picture, StaticAvatarLoader};
use crate::config::LayerConfig;
use crate::engine::{LngLat, MapEngine};
use crate::interaction::{cluster_layer_visible, cluster_target_zoom};
use crate::layer::{CheckInMapLayer, MountOutcome};
use crate::registry::{RegistrationOutcome, SpriteRegistry};
use checkin_model::{CheckInAggregate, UserRef};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

/// Listeners a mounted layer keeps on the engine
const MOUNTED_LISTENERS: usize = 6;

/// Simulator configuration
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Data refreshes to run
    pub refreshes: u32,
    /// Distinct locations to draw from
    pub locations: u32,
    /// Distinct users to draw from
    pub users: u32,
    /// Unmount and remount every this many refreshes; 0 never
    pub remount_every: u32,
    /// Share of avatar URLs that fail to load
    pub failure_rate: f64,
    /// Stop at the first violation
    pub stop_on_first_violation: bool,
    /// Layer configuration under test
    pub layer: LayerConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            refreshes: 200,
            locations: 60,
            users: 40,
            remount_every: 25,
            failure_rate: 0.2,
            stop_on_first_violation: false,
            layer: LayerConfig::default(),
        }
    }
}

/// An invariant broken during simulation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// An image was added to the atlas more than once
    DuplicateRegistration {
        /// Refresh number
        step: u32,
        /// Highest add count seen
        adds: usize,
    },
    /// Source feature count differs from the distinct valid locations
    FeatureCountMismatch {
        /// Refresh number
        step: u32,
        /// Expected features
        expected: usize,
        /// Features in the source
        actual: usize,
    },
    /// A marker's badge text is wrong
    BadgeMismatch {
        /// Refresh number
        step: u32,
        /// Location
        location_id: i64,
        /// Expected text
        expected: String,
        /// Drawn text
        actual: String,
    },
    /// A marker's icon is wrong
    IconMismatch {
        /// Refresh number
        step: u32,
        /// Location
        location_id: i64,
        /// Expected atlas id
        expected: String,
        /// Drawn atlas id
        actual: String,
    },
    /// Cluster layer visibility disagrees with the zoom rule
    VisibilityMismatch {
        /// Refresh number
        step: u32,
        /// Camera zoom
        zoom: f64,
        /// Whether clusters were drawn
        visible: bool,
    },
    /// Cluster click eased to the wrong zoom
    ClusterZoomMismatch {
        /// Refresh number
        step: u32,
        /// Expected target zoom
        expected: f64,
        /// Actual target zoom, if the camera moved
        actual: Option<f64>,
    },
    /// Listener count differs from a single mounted layer's
    ListenerLeak {
        /// Refresh number
        step: u32,
        /// Listeners on the engine
        listeners: usize,
    },
    /// Unmount left layers, sources or listeners behind
    TeardownLeak {
        /// Refresh number
        step: u32,
        /// Layers left
        layers: usize,
        /// Sources left
        sources: usize,
        /// Listeners left
        listeners: usize,
    },
    /// The layer did not become ready
    NotReady {
        /// Refresh number
        step: u32,
    },
}

/// Simulation counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulatorStats {
    /// Refreshes run
    pub refreshes: u32,
    /// Refreshes that reached the engine
    pub refreshes_applied: u32,
    /// Features pushed, summed over refreshes
    pub features_applied: usize,
    /// Aggregates dropped as invalid
    pub rejected: usize,
    /// Duplicate locations dropped
    pub duplicates: usize,
    /// Avatars added to the atlas
    pub avatars_registered: usize,
    /// Avatar loads that failed
    pub avatar_failures: usize,
    /// Unmount/mount cycles
    pub remounts: u32,
    /// Camera zoom changes
    pub zoom_changes: u32,
    /// Cluster clicks
    pub cluster_clicks: u32,
    /// Point clicks that opened a popup
    pub popups: u32,
}

/// Final report from the simulator
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorReport {
    /// Configuration used
    pub config: SimulatorConfig,
    /// Counters
    pub stats: SimulatorStats,
    /// Broken invariants
    pub violations: Vec<Violation>,
}

impl SimulatorReport {
    /// Whether no invariant was broken
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Human-readable report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        let s = &self.stats;

        report.push_str("=== Check-in Layer Simulator Report ===\n\n");
        let _ = writeln!(report, "Seed: {}", self.config.seed);
        let _ = writeln!(report, "Refreshes: {} ({} applied)", s.refreshes, s.refreshes_applied);
        let _ = writeln!(report, "Features Applied: {}", s.features_applied);
        let _ = writeln!(report, "Rejected Aggregates: {}", s.rejected);
        let _ = writeln!(report, "Duplicate Locations: {}", s.duplicates);
        let _ = writeln!(report, "Avatars Registered: {}", s.avatars_registered);
        let _ = writeln!(report, "Avatar Failures: {}", s.avatar_failures);
        let _ = writeln!(report, "Remounts: {}", s.remounts);
        let _ = writeln!(report, "Zoom Changes: {}", s.zoom_changes);
        let _ = writeln!(report, "Cluster Clicks: {}", s.cluster_clicks);
        let _ = writeln!(report, "Popups: {}", s.popups);
        let _ = writeln!(report, "Violations: {}", self.violations.len());

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                let _ = writeln!(report, "{}. {:?}", i + 1, v);
            }
        }

        let _ = write!(
            report,
            "\n=== Result: {} ===\n",
            if self.passed() { "PASS" } else { "FAIL" }
        );
        report
    }

    /// JSON report
    ///
    /// # Errors
    /// Returns the serializer error, which only happens for non-finite zooms.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

struct World {
    users: Vec<UserRef>,
    failing: HashSet<String>,
}

impl World {
    fn generate(rng: &mut StdRng, config: &SimulatorConfig) -> Self {
        let mut failing = HashSet::new();
        let users = (0..config.users.max(1))
            .map(|i| {
                let id = format!("user-{i}");
                let name = format!("User {i}");
                if rng.random_bool(0.7) {
                    let url = format!("https://avatars.example/{id}.png");
                    if rng.random_bool(config.failure_rate.clamp(0.0, 1.0)) {
                        failing.insert(url.clone());
                    }
                    UserRef::with_avatar(id, name, url)
                } else {
                    UserRef::named(id, name)
                }
            })
            .collect();
        Self { users, failing }
    }

    fn loader(&self) -> StaticAvatarLoader {
        self.failing.iter().fold(
            StaticAvatarLoader::new().serve_all(solid_picture(24, [90, 140, 200, 255])),
            |loader, url| loader.with_failure(url.clone()),
        )
    }

    #[allow(clippy::cast_possible_truncation)]
    fn refresh(&self, rng: &mut StdRng, locations: u32) -> Vec<CheckInAggregate> {
        let n = rng.random_range(0..=locations.max(1)) as usize;
        let mut list = Vec::with_capacity(n + 2);
        for _ in 0..n {
            let location_id = i64::from(rng.random_range(1..=locations.max(1)));
            let listed = rng.random_range(1..=4usize.min(self.users.len()));
            let users: Vec<UserRef> = (0..listed)
                .map(|_| self.users[rng.random_range(0..self.users.len())].clone())
                .collect();
            let count = listed as u32 + rng.random_range(0..20u32);
            list.push(CheckInAggregate::new(
                location_id,
                rng.random_range(-80.0..80.0),
                rng.random_range(-170.0..170.0),
                users,
                count,
            ));
        }
        if rng.random_bool(0.1) {
            list.push(CheckInAggregate::new(-1, 123.0, 0.0, Vec::new(), 1));
        }
        list
    }

    fn expected_icon(&self, aggregate: &CheckInAggregate) -> String {
        let icon = aggregate.icon_id();
        let failed = aggregate
            .representative()
            .and_then(UserRef::avatar_url)
            .is_some_and(|url| self.failing.contains(url));
        if icon.is_avatar() && !failed {
            icon.as_str().to_string()
        } else {
            checkin_model::FALLBACK_ICON.to_string()
        }
    }
}

struct Run {
    config: SimulatorConfig,
    stats: SimulatorStats,
    violations: Vec<Violation>,
}

impl Run {
    fn violate(&mut self, violation: Violation) -> bool {
        self.violations.push(violation);
        self.config.stop_on_first_violation
    }
}

/// Run the simulator
pub async fn run_simulator(config: SimulatorConfig) -> SimulatorReport {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let world = World::generate(&mut rng, &config);
    let engine = Arc::new(RecordingEngine::new());
    let registry = Arc::new(SpriteRegistry::new());
    let layer_config = config.layer.clone();
    let mut run = Run {
        config,
        stats: SimulatorStats::default(),
        violations: Vec::new(),
    };

    let layer = match CheckInMapLayer::new(
        Arc::clone(&engine) as Arc<dyn MapEngine>,
        Arc::clone(&registry),
        Arc::new(world.loader()),
        layer_config.clone(),
    ) {
        Ok(layer) => layer,
        Err(e) => {
            tracing::error!(error = %e, "simulator layer config rejected");
            run.violations.push(Violation::NotReady { step: 0 });
            return run.finish();
        }
    };

    if layer.mount().await != MountOutcome::Ready {
        run.violate(Violation::NotReady { step: 0 });
        return run.finish();
    }

    for step in 1..=run.config.refreshes {
        if run.step(step, &mut rng, &world, &engine, &layer).await {
            break;
        }
    }
    run.finish()
}

impl Run {
    fn finish(self) -> SimulatorReport {
        SimulatorReport {
            config: self.config,
            stats: self.stats,
            violations: self.violations,
        }
    }

    /// One refresh plus random interactions; `true` to stop
    async fn step(
        &mut self,
        step: u32,
        rng: &mut StdRng,
        world: &World,
        engine: &RecordingEngine,
        layer: &CheckInMapLayer,
    ) -> bool {
        let config = layer.config().clone();

        let list = world.refresh(rng, self.config.locations);
        let report = layer.set_check_ins(&list).await;
        self.stats.refreshes += 1;
        for (_, outcome) in &report.avatars {
            match outcome {
                RegistrationOutcome::Registered => self.stats.avatars_registered += 1,
                RegistrationOutcome::Failed(_) => self.stats.avatar_failures += 1,
                _ => {}
            }
        }
        if report.is_applied() {
            self.stats.refreshes_applied += 1;
            self.stats.features_applied += report.features;
            self.stats.rejected += report.rejected;
            self.stats.duplicates += report.duplicates;
        } else if self.violate(Violation::NotReady { step }) {
            return true;
        }

        if self.check_atlas(step, engine) || self.check_markers(step, world, engine, &config, &list) {
            return true;
        }

        if rng.random_bool(0.5) {
            let zoom = f64::from(rng.random_range(0..=40u32)) / 2.0;
            engine.zoom_to(zoom);
            self.stats.zoom_changes += 1;
            let visible = engine.is_layer_visible(&config.cluster_layer_id);
            if visible != cluster_layer_visible(zoom, config.cluster_max_zoom)
                && self.violate(Violation::VisibilityMismatch { step, zoom, visible })
            {
                return true;
            }
        }

        if rng.random_bool(0.3) && self.click_cluster(step, rng, engine, &config) {
            return true;
        }

        if let Some(first) = list.iter().find(|a| a.validate().is_ok()) {
            if rng.random_bool(0.3) && engine.click_point(&config.points_layer_id, first.location_id) {
                self.stats.popups += 1;
            }
        }

        let listeners = engine.listener_count();
        if listeners != MOUNTED_LISTENERS
            && self.violate(Violation::ListenerLeak { step, listeners })
        {
            return true;
        }

        if self.config.remount_every > 0 && step % self.config.remount_every == 0 {
            return self.remount(step, engine, layer).await;
        }
        false
    }

    fn check_atlas(&mut self, step: u32, engine: &RecordingEngine) -> bool {
        let adds = engine.max_image_adds();
        adds > 1 && self.violate(Violation::DuplicateRegistration { step, adds })
    }

    fn check_markers(
        &mut self,
        step: u32,
        world: &World,
        engine: &RecordingEngine,
        config: &LayerConfig,
        list: &[CheckInAggregate],
    ) -> bool {
        let mut firsts: HashMap<i64, &CheckInAggregate> = HashMap::new();
        for aggregate in list.iter().filter(|a| a.validate().is_ok()) {
            firsts.entry(aggregate.location_id).or_insert(aggregate);
        }

        let actual = engine.feature_count(&config.source_id);
        if actual != firsts.len()
            && self.violate(Violation::FeatureCountMismatch {
                step,
                expected: firsts.len(),
                actual,
            })
        {
            return true;
        }

        let mut ids: Vec<i64> = firsts.keys().copied().collect();
        ids.sort_unstable();
        for location_id in ids {
            let aggregate = firsts[&location_id];
            let Some(marker) = engine.resolve_point(&config.points_layer_id, location_id) else {
                continue;
            };

            let expected_badge = aggregate.badge_text();
            if marker.text != expected_badge
                && self.violate(Violation::BadgeMismatch {
                    step,
                    location_id,
                    expected: expected_badge,
                    actual: marker.text.clone(),
                })
            {
                return true;
            }

            let expected_icon = world.expected_icon(aggregate);
            if marker.icon != expected_icon
                && self.violate(Violation::IconMismatch {
                    step,
                    location_id,
                    expected: expected_icon,
                    actual: marker.icon,
                })
            {
                return true;
            }
        }
        false
    }

    fn click_cluster(
        &mut self,
        step: u32,
        rng: &mut StdRng,
        engine: &RecordingEngine,
        config: &LayerConfig,
    ) -> bool {
        let cluster_id = rng.random_range(1..10_000u64);
        let expansion = f64::from(rng.random_range(0..=36u32)) / 2.0;
        let center = LngLat::new(rng.random_range(-170.0..170.0), rng.random_range(-80.0..80.0));
        let before = engine.camera_moves().len();

        engine.click_cluster(
            &config.cluster_layer_id,
            cluster_id,
            rng.random_range(2..500),
            center,
            expansion,
        );
        self.stats.cluster_clicks += 1;

        let moves = engine.camera_moves();
        let actual = (moves.len() > before).then(|| moves[moves.len() - 1].zoom);
        let expected = cluster_target_zoom(expansion, config.cluster_max_zoom);
        let matches = actual.is_some_and(|zoom| (zoom - expected).abs() < 1e-9);
        !matches
            && self.violate(Violation::ClusterZoomMismatch {
                step,
                expected,
                actual,
            })
    }

    async fn remount(&mut self, step: u32, engine: &RecordingEngine, layer: &CheckInMapLayer) -> bool {
        layer.unmount();
        let layers = engine.layer_ids().len();
        let sources = engine.source_count();
        let listeners = engine.listener_count();
        if (layers, sources, listeners) != (0, 0, 0)
            && self.violate(Violation::TeardownLeak {
                step,
                layers,
                sources,
                listeners,
            })
        {
            return true;
        }

        self.stats.remounts += 1;
        if layer.mount().await != MountOutcome::Ready {
            return self.violate(Violation::NotReady { step });
        }
        self.check_atlas(step, engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_run_passes() {
        let report = run_simulator(SimulatorConfig {
            refreshes: 60,
            ..SimulatorConfig::default()
        })
        .await;

        assert!(report.passed(), "{}", report.generate_text());
        assert_eq!(report.stats.refreshes, 60);
        assert!(report.stats.remounts >= 2);
        assert!(report.stats.avatars_registered > 0);
    }

    #[tokio::test]
    async fn same_seed_same_stats() {
        let config = SimulatorConfig {
            refreshes: 20,
            seed: 7,
            ..SimulatorConfig::default()
        };
        let a = run_simulator(config.clone()).await;
        let b = run_simulator(config).await;
        assert_eq!(a.stats.features_applied, b.stats.features_applied);
        assert_eq!(a.stats.avatar_failures, b.stats.avatar_failures);
    }

    #[tokio::test]
    async fn mobile_config_passes() {
        let report = run_simulator(SimulatorConfig {
            refreshes: 30,
            layer: LayerConfig::for_viewport(390),
            ..SimulatorConfig::default()
        })
        .await;
        assert!(report.passed(), "{}", report.generate_text());
    }

    #[test]
    fn report_text_and_json() {
        let report = SimulatorReport {
            config: SimulatorConfig::default(),
            stats: SimulatorStats::default(),
            violations: vec![Violation::ListenerLeak {
                step: 3,
                listeners: 12,
            }],
        };
        assert!(!report.passed());
        assert!(report.generate_text().contains("Result: FAIL"));
        assert!(report.to_json().unwrap().contains("listener_leak"));
    }
}
