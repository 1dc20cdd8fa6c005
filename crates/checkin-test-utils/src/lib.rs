//! Testing utilities for the check-in map workspace
//!
//! Shared fixtures for aggregates and users.

#![allow(missing_docs)]

use checkin_model::{CheckInAggregate, UserRef};

pub fn avatar_url(user_id: &str) -> String {
    format!("https://avatars.example/{user_id}.png")
}

pub fn user(user_id: &str, display_name: &str) -> UserRef {
    UserRef::named(user_id, display_name)
}

pub fn user_with_avatar(user_id: &str, display_name: &str) -> UserRef {
    UserRef::with_avatar(user_id, display_name, avatar_url(user_id))
}

pub fn aggregate(location_id: i64, users: Vec<UserRef>, count: u32) -> CheckInAggregate {
    #[allow(clippy::cast_precision_loss)]
    let offset = (location_id % 1000) as f64 / 1000.0;
    CheckInAggregate::new(location_id, 51.9 + offset, 4.5 + offset, users, count)
}

/// Aggregate with a single user and `count` check-ins
pub fn single(location_id: i64, user: UserRef, count: u32) -> CheckInAggregate {
    aggregate(location_id, vec![user], count)
}

/// `{locationId: 42, lat: 51.9, lng: 4.5, users: [u1 "Ali" without avatar], count: 3}`
pub fn ali_at_42() -> CheckInAggregate {
    CheckInAggregate::new(42, 51.9, 4.5, vec![user("u1", "Ali")], 3)
}

/// `n` locations, each represented by its own avatar-bearing user
pub fn scattered_aggregates(n: i64) -> Vec<CheckInAggregate> {
    (1..=n)
        .map(|i| {
            let id = format!("u{i}");
            single(i, user_with_avatar(&id, &format!("User {i}")), 1 + (i as u32 % 4))
        })
        .collect()
}
