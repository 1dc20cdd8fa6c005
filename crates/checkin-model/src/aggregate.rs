//! Check-in aggregates and user references
//!
//! Aggregates are rebuilt from scratch on every upstream refresh and handed to
//! the layer as an immutable list.

use crate::error::ModelError;
use crate::icon::IconId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A user as shown on the map
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserRef {
    /// Stable user id
    pub user_id: Option<String>,
    /// Name shown in the roster popup
    pub display_name: Option<String>,
    /// Remote avatar picture
    pub avatar_url: Option<String>,
}

impl UserRef {
    /// User with an id and a display name but no avatar
    #[must_use]
    pub fn named(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            display_name: Some(display_name.into()),
            avatar_url: None,
        }
    }

    /// User with an id, a display name and an avatar URL
    #[must_use]
    pub fn with_avatar(
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        avatar_url: impl Into<String>,
    ) -> Self {
        Self {
            user_id: Some(user_id.into()),
            display_name: Some(display_name.into()),
            avatar_url: Some(avatar_url.into()),
        }
    }

    /// User id, treating blank strings as absent
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        non_blank(self.user_id.as_deref())
    }

    /// Display name, treating blank strings as absent
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        non_blank(self.display_name.as_deref())
    }

    /// Avatar URL, treating blank strings as absent
    #[must_use]
    pub fn avatar_url(&self) -> Option<&str> {
        non_blank(self.avatar_url.as_deref())
    }

    /// Up to two upper-cased initials, or `??` when there is no name
    #[must_use]
    pub fn initials(&self) -> String {
        let initials: String = self
            .display_name()
            .map(|name| {
                name.split_whitespace()
                    .filter_map(|word| word.chars().next())
                    .take(2)
                    .flat_map(char::to_uppercase)
                    .collect()
            })
            .unwrap_or_default();

        if initials.is_empty() {
            "??".to_string()
        } else {
            initials
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// All active check-ins at one location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInAggregate {
    /// Unique location key
    pub location_id: i64,
    /// WGS84 latitude
    pub lat: f64,
    /// WGS84 longitude
    pub lng: f64,
    /// Listed users; the first one represents the location on the map
    #[serde(default)]
    pub users: Vec<UserRef>,
    /// Total active check-ins, may exceed `users.len()` when truncated upstream
    pub count: u32,
}

impl CheckInAggregate {
    /// Create an aggregate
    #[must_use]
    pub fn new(location_id: i64, lat: f64, lng: f64, users: Vec<UserRef>, count: u32) -> Self {
        Self {
            location_id,
            lat,
            lng,
            users,
            count,
        }
    }

    /// Check coordinates and counts
    ///
    /// # Errors
    /// - `ModelError::InvalidCoordinates` for non-finite or out-of-range positions
    /// - `ModelError::CountBelowUsers` if `count < users.len()`
    pub fn validate(&self) -> Result<(), ModelError> {
        let lat_ok = self.lat.is_finite() && (-90.0..=90.0).contains(&self.lat);
        let lng_ok = self.lng.is_finite() && (-180.0..=180.0).contains(&self.lng);
        if !lat_ok || !lng_ok {
            return Err(ModelError::InvalidCoordinates {
                location_id: self.location_id,
                lat: self.lat,
                lng: self.lng,
            });
        }

        if (self.count as usize) < self.users.len() {
            return Err(ModelError::CountBelowUsers {
                location_id: self.location_id,
                count: self.count,
                users: self.users.len(),
            });
        }

        Ok(())
    }

    /// The user whose avatar represents this location
    #[inline]
    #[must_use]
    pub fn representative(&self) -> Option<&UserRef> {
        self.users.first()
    }

    /// Icon requested for this location's marker
    #[must_use]
    pub fn icon_id(&self) -> IconId {
        self.representative()
            .map_or_else(IconId::fallback, IconId::for_user)
    }

    /// Check-ins beyond the representative one
    #[inline]
    #[must_use]
    pub fn overflow(&self) -> u32 {
        self.count.saturating_sub(1)
    }

    /// Text of the "+N" marker badge; empty for a single check-in
    #[must_use]
    pub fn badge_text(&self) -> String {
        if self.count > 1 {
            format!("+{}", self.overflow())
        } else {
            String::new()
        }
    }
}

/// An avatar that needs to be fetched and registered
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AvatarRequest {
    /// Atlas id the avatar is registered under
    pub icon_id: IconId,
    /// Owning user
    pub user_id: String,
    /// Remote picture
    pub url: String,
}

/// Distinct avatars needed to draw `aggregates`, in first-seen order
///
/// Only representative users are considered, and a user appearing at several
/// locations is requested once.
#[must_use]
pub fn avatar_requests(aggregates: &[CheckInAggregate]) -> Vec<AvatarRequest> {
    let mut seen = HashSet::new();
    aggregates
        .iter()
        .filter_map(CheckInAggregate::representative)
        .filter_map(|user| Some((user.user_id()?, user.avatar_url()?)))
        .filter(|(user_id, _)| seen.insert(*user_id))
        .map(|(user_id, url)| AvatarRequest {
            icon_id: IconId::avatar(user_id),
            user_id: user_id.to_string(),
            url: url.to_string(),
        })
        .collect()
}
