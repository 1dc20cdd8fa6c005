//! Per-engine sprite registry
//!
//! Tracks which atlas ids have been registered, or are being registered, on
//! one engine instance. Every layer mounted on that engine shares the same
//! registry, so mount/unmount/remount cycles and concurrent initializations
//! register each id at most once.
//!
//! Reservation is a synchronous check-and-set done before any await; the
//! returned [`ReservationGuard`] releases the id on drop unless confirmed, so a
//! failed or abandoned load always leaves the id retryable.

use checkin_model::IconId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;

/// Registration state of one atlas id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    /// Never registered, or released after a failure
    #[default]
    Unregistered,
    /// Reserved by an in-flight registration
    Pending,
    /// Present in the engine's atlas
    Registered,
}

/// Outcome of one registration attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum RegistrationOutcome {
    /// Image added to the atlas
    Registered,
    /// The engine already held the image
    AlreadyExists,
    /// Nothing to do
    Skipped(SkipReason),
    /// Load, rasterization or engine failure; the id stays retryable
    Failed(String),
}

impl RegistrationOutcome {
    /// Whether the image is in the atlas after this attempt
    #[inline]
    #[must_use]
    pub fn is_present(&self) -> bool {
        matches!(
            self,
            Self::Registered | Self::AlreadyExists | Self::Skipped(SkipReason::AlreadyRegistered)
        )
    }
}

/// Why a registration attempt did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Registry or engine already has it
    AlreadyRegistered,
    /// Another attempt holds the reservation
    InFlight,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRegistered => f.write_str("already registered"),
            Self::InFlight => f.write_str("registration in flight"),
        }
    }
}

/// Result of [`SpriteRegistry::reserve`]
#[derive(Debug)]
pub enum Reservation<'a> {
    /// Caller owns the registration
    Acquired(ReservationGuard<'a>),
    /// Someone else is registering the id
    Pending,
    /// Already registered
    Registered,
}

/// Exclusive right to register one id
///
/// Dropping the guard without [`confirm`](Self::confirm) releases the id.
#[derive(Debug)]
pub struct ReservationGuard<'a> {
    registry: &'a SpriteRegistry,
    id: IconId,
    settled: bool,
}

impl ReservationGuard<'_> {
    /// The reserved id
    #[inline]
    #[must_use]
    pub fn id(&self) -> &IconId {
        &self.id
    }

    /// Mark the id registered
    pub fn confirm(mut self) {
        self.registry.confirm(&self.id);
        self.settled = true;
    }

    /// Release the id so a later attempt can retry
    pub fn release(mut self) {
        self.registry.release(&self.id);
        self.settled = true;
    }
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.registry.release(&self.id);
        }
    }
}

/// Atlas ids known to one engine instance
#[derive(Debug, Default)]
pub struct SpriteRegistry {
    states: DashMap<IconId, RegistrationState>,
}

impl SpriteRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically reserve `id` unless it is pending or registered
    pub fn reserve(&self, id: &IconId) -> Reservation<'_> {
        match self.states.entry(id.clone()) {
            Entry::Occupied(mut entry) => match *entry.get() {
                RegistrationState::Registered => Reservation::Registered,
                RegistrationState::Pending => Reservation::Pending,
                RegistrationState::Unregistered => {
                    entry.insert(RegistrationState::Pending);
                    Reservation::Acquired(self.guard(id))
                }
            },
            Entry::Vacant(entry) => {
                entry.insert(RegistrationState::Pending);
                Reservation::Acquired(self.guard(id))
            }
        }
    }

    fn guard(&self, id: &IconId) -> ReservationGuard<'_> {
        ReservationGuard {
            registry: self,
            id: id.clone(),
            settled: false,
        }
    }

    /// Mark `id` registered
    pub fn confirm(&self, id: &IconId) {
        self.states.insert(id.clone(), RegistrationState::Registered);
    }

    /// Drop a pending reservation; registered ids are left alone
    pub fn release(&self, id: &IconId) {
        self.states
            .remove_if(id, |_, state| *state == RegistrationState::Pending);
    }

    /// Forget a registered id the engine no longer holds
    pub fn invalidate(&self, id: &IconId) {
        self.states
            .remove_if(id, |_, state| *state == RegistrationState::Registered);
    }

    /// Current state of `id`
    #[must_use]
    pub fn state(&self, id: &IconId) -> RegistrationState {
        self.states.get(id).map_or(RegistrationState::Unregistered, |s| *s)
    }

    /// Whether `id` is registered
    #[inline]
    #[must_use]
    pub fn is_registered(&self, id: &IconId) -> bool {
        self.state(id) == RegistrationState::Registered
    }

    /// Registered ids, sorted
    #[must_use]
    pub fn registered_ids(&self) -> Vec<IconId> {
        let mut ids: Vec<IconId> = self
            .states
            .iter()
            .filter(|e| *e.value() == RegistrationState::Registered)
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of in-flight reservations
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.states
            .iter()
            .filter(|e| *e.value() == RegistrationState::Pending)
            .count()
    }

    /// Forget everything, for when the engine instance is disposed
    pub fn clear(&self) {
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn id(s: &str) -> IconId {
        IconId::avatar(s)
    }

    #[test]
    fn reserve_then_confirm() {
        let registry = SpriteRegistry::new();
        let Reservation::Acquired(guard) = registry.reserve(&id("u1")) else {
            panic!("expected reservation");
        };
        assert_eq!(registry.state(&id("u1")), RegistrationState::Pending);
        assert!(matches!(registry.reserve(&id("u1")), Reservation::Pending));

        guard.confirm();
        assert!(registry.is_registered(&id("u1")));
        assert!(matches!(registry.reserve(&id("u1")), Reservation::Registered));
    }

    #[test]
    fn dropped_guard_releases() {
        let registry = SpriteRegistry::new();
        {
            let reservation = registry.reserve(&id("u1"));
            assert!(matches!(reservation, Reservation::Acquired(_)));
        }
        assert_eq!(registry.state(&id("u1")), RegistrationState::Unregistered);
        assert!(matches!(registry.reserve(&id("u1")), Reservation::Acquired(_)));
    }

    #[test]
    fn release_keeps_registered_ids() {
        let registry = SpriteRegistry::new();
        registry.confirm(&id("u1"));
        registry.release(&id("u1"));
        assert!(registry.is_registered(&id("u1")));

        registry.invalidate(&id("u1"));
        assert_eq!(registry.state(&id("u1")), RegistrationState::Unregistered);
    }

    #[test]
    fn registered_ids_sorted() {
        let registry = SpriteRegistry::new();
        registry.confirm(&id("b"));
        registry.confirm(&IconId::fallback());
        registry.confirm(&id("a"));
        let Reservation::Acquired(_pending) = registry.reserve(&id("c")) else {
            panic!("expected reservation");
        };

        let ids: Vec<String> = registry
            .registered_ids()
            .iter()
            .map(|i| i.as_str().to_string())
            .collect();
        assert_eq!(ids, vec!["avatar-a", "avatar-b", "fallback"]);
        assert_eq!(registry.pending_count(), 1);
    }

    #[test]
    fn concurrent_reserve_acquires_once() {
        let registry = Arc::new(SpriteRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || match registry.reserve(&id("u1")) {
                    Reservation::Acquired(guard) => {
                        guard.confirm();
                        1
                    }
                    _ => 0,
                })
            })
            .collect();

        let acquired: i32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(acquired, 1);
        assert!(registry.is_registered(&id("u1")));
    }

    #[test]
    fn clear_forgets_everything() {
        let registry = SpriteRegistry::new();
        registry.confirm(&id("u1"));
        registry.clear();
        assert!(registry.registered_ids().is_empty());
    }
}
