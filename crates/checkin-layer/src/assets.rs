//! Atlas registration of static sprites
//!
//! Cluster badges and the fallback avatar are drawn locally, so registering
//! them never suspends. Avatar registration shares [`precheck`] and
//! [`finish`] with this module so both paths settle reservations the same way.

use crate::engine::MapEngine;
use crate::error::{EngineError, LayerError};
use crate::registry::{RegistrationOutcome, Reservation, ReservationGuard, SkipReason, SpriteRegistry};
use checkin_model::{ClusterTier, IconId};
use checkin_sprites::{cluster_badge, fallback_avatar, SpriteImage};
use tracing::{debug, warn};

/// Ids of every static sprite, cluster tiers first
#[must_use]
pub fn static_sprite_ids() -> Vec<IconId> {
    ClusterTier::ALL
        .iter()
        .map(|tier| IconId::cluster(*tier))
        .chain(std::iter::once(IconId::fallback()))
        .collect()
}

/// Register cluster badges and the fallback avatar
pub fn register_static_sprites(
    engine: &dyn MapEngine,
    registry: &SpriteRegistry,
    pixel_ratio: f32,
) -> Vec<(IconId, RegistrationOutcome)> {
    let mut outcomes: Vec<(IconId, RegistrationOutcome)> = ClusterTier::ALL
        .iter()
        .map(|tier| {
            let id = IconId::cluster(*tier);
            let outcome = register_sprite(engine, registry, &id, || {
                Ok(cluster_badge(*tier, pixel_ratio))
            });
            (id, outcome)
        })
        .collect();

    let fallback = IconId::fallback();
    let outcome = register_sprite(engine, registry, &fallback, || {
        Ok(fallback_avatar(pixel_ratio))
    });
    outcomes.push((fallback, outcome));
    outcomes
}

/// Register one locally rendered sprite unless it is already known
pub fn register_sprite<F>(
    engine: &dyn MapEngine,
    registry: &SpriteRegistry,
    id: &IconId,
    render: F,
) -> RegistrationOutcome
where
    F: FnOnce() -> Result<SpriteImage, LayerError>,
{
    let guard = match precheck(engine, registry, id) {
        Ok(guard) => guard,
        Err(outcome) => return outcome,
    };
    let result = render().and_then(|sprite| Ok(engine.add_image(id.as_str(), &sprite)?));
    finish(guard, result)
}

/// Reserve `id` unless the registry or the engine already has it
///
/// An id the registry believes registered but the engine has lost (a style
/// reload) is forgotten and reserved again.
pub(crate) fn precheck<'r>(
    engine: &dyn MapEngine,
    registry: &'r SpriteRegistry,
    id: &IconId,
) -> Result<ReservationGuard<'r>, RegistrationOutcome> {
    if registry.is_registered(id) {
        if engine.has_image(id.as_str()) {
            return Err(RegistrationOutcome::Skipped(SkipReason::AlreadyRegistered));
        }
        debug!(image_id = %id, "registered image missing from engine, re-registering");
        registry.invalidate(id);
    }

    match registry.reserve(id) {
        Reservation::Registered => Err(RegistrationOutcome::Skipped(SkipReason::AlreadyRegistered)),
        Reservation::Pending => Err(RegistrationOutcome::Skipped(SkipReason::InFlight)),
        Reservation::Acquired(guard) => {
            if engine.has_image(id.as_str()) {
                guard.confirm();
                return Err(RegistrationOutcome::AlreadyExists);
            }
            Ok(guard)
        }
    }
}

/// Settle a reservation from the result of adding the image
pub(crate) fn finish(guard: ReservationGuard<'_>, result: Result<(), LayerError>) -> RegistrationOutcome {
    match result {
        Ok(()) => {
            debug!(image_id = %guard.id(), "image registered");
            guard.confirm();
            RegistrationOutcome::Registered
        }
        Err(e) if e.is_benign() => {
            guard.confirm();
            RegistrationOutcome::AlreadyExists
        }
        Err(LayerError::Engine(EngineError::Disposed)) => {
            debug!(image_id = %guard.id(), "engine disposed before image was added");
            guard.release();
            RegistrationOutcome::Failed(EngineError::Disposed.to_string())
        }
        Err(e) => {
            warn!(image_id = %guard.id(), error = %e, "image registration failed");
            guard.release();
            RegistrationOutcome::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistrationState;
    use crate::test_harness::RecordingEngine;
    use checkin_sprites::SpriteError;

    #[test]
    fn registers_each_static_sprite_once() {
        let engine = RecordingEngine::new();
        let registry = SpriteRegistry::new();

        let first = register_static_sprites(&engine, &registry, 2.0);
        assert!(first.iter().all(|(_, o)| *o == RegistrationOutcome::Registered));

        let second = register_static_sprites(&engine, &registry, 2.0);
        assert!(second
            .iter()
            .all(|(_, o)| *o == RegistrationOutcome::Skipped(SkipReason::AlreadyRegistered)));

        for id in static_sprite_ids() {
            assert_eq!(engine.image_add_count(id.as_str()), 1);
        }
    }

    #[test]
    fn engine_copy_counts_as_registered() {
        let engine = RecordingEngine::new();
        let registry = SpriteRegistry::new();
        engine
            .add_image("fallback", &fallback_avatar(1.0))
            .unwrap();

        let outcome = register_sprite(&engine, &registry, &IconId::fallback(), || {
            Ok(fallback_avatar(1.0))
        });
        assert_eq!(outcome, RegistrationOutcome::AlreadyExists);
        assert!(registry.is_registered(&IconId::fallback()));
        assert_eq!(engine.image_add_count("fallback"), 1);
    }

    #[test]
    fn failed_render_releases_reservation() {
        let engine = RecordingEngine::new();
        let registry = SpriteRegistry::new();
        let id = IconId::avatar("u1");

        let outcome = register_sprite(&engine, &registry, &id, || {
            Err(SpriteError::EmptySource { width: 0, height: 0 }.into())
        });
        assert!(matches!(outcome, RegistrationOutcome::Failed(_)));
        assert_eq!(registry.state(&id), RegistrationState::Unregistered);
    }

    #[test]
    fn lost_engine_image_is_registered_again() {
        let engine = RecordingEngine::new();
        let registry = SpriteRegistry::new();
        register_static_sprites(&engine, &registry, 1.0);
        engine.remove_image("fallback").unwrap();

        let outcome = register_sprite(&engine, &registry, &IconId::fallback(), || {
            Ok(fallback_avatar(1.0))
        });
        assert_eq!(outcome, RegistrationOutcome::Registered);
        assert_eq!(engine.image_add_count("fallback"), 2);
    }
}
