//! Image-atlas identifiers
//!
//! Every sprite the layer registers with the engine is addressed by an
//! [`IconId`]. Avatar ids are derived strictly from the user id so that a
//! change of representative user between refreshes never reuses an id for a
//! different person.

use crate::aggregate::UserRef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Id of the generic avatar used when a user has no usable picture
pub const FALLBACK_ICON: &str = "fallback";

const AVATAR_PREFIX: &str = "avatar-";

/// Identifier of an image registered with the engine's atlas
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IconId(String);

impl IconId {
    /// The fallback avatar id
    #[inline]
    #[must_use]
    pub fn fallback() -> Self {
        Self(FALLBACK_ICON.to_string())
    }

    /// Per-user avatar id (`avatar-{userId}`)
    #[inline]
    #[must_use]
    pub fn avatar(user_id: &str) -> Self {
        Self(format!("{AVATAR_PREFIX}{user_id}"))
    }

    /// Badge id for a cluster tier
    #[inline]
    #[must_use]
    pub fn cluster(tier: ClusterTier) -> Self {
        Self(tier.icon_name().to_string())
    }

    /// Icon a marker should ask for when `user` is its representative
    ///
    /// Users lacking either an id or an avatar URL always map to the fallback.
    #[must_use]
    pub fn for_user(user: &UserRef) -> Self {
        match (user.user_id(), user.avatar_url()) {
            (Some(id), Some(_)) => Self::avatar(id),
            _ => Self::fallback(),
        }
    }

    /// Id as a string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is a per-user avatar id
    #[inline]
    #[must_use]
    pub fn is_avatar(&self) -> bool {
        self.0.starts_with(AVATAR_PREFIX)
    }

    /// Whether this is the fallback id
    #[inline]
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.0 == FALLBACK_ICON
    }
}

impl fmt::Display for IconId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IconId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Size class of a cluster badge, keyed by point count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClusterTier {
    /// Fewer than 25 points
    Small,
    /// 25 to 99 points
    Medium,
    /// 100 points or more
    Large,
}

impl ClusterTier {
    /// First point count drawn with the medium badge
    pub const MEDIUM_THRESHOLD: u32 = 25;

    /// First point count drawn with the large badge
    pub const LARGE_THRESHOLD: u32 = 100;

    /// All tiers, smallest first
    pub const ALL: [ClusterTier; 3] = [ClusterTier::Small, ClusterTier::Medium, ClusterTier::Large];

    /// Tier for a cluster of `point_count` points
    #[must_use]
    pub fn for_point_count(point_count: u32) -> Self {
        if point_count >= Self::LARGE_THRESHOLD {
            Self::Large
        } else if point_count >= Self::MEDIUM_THRESHOLD {
            Self::Medium
        } else {
            Self::Small
        }
    }

    /// Atlas name of this tier's badge
    #[must_use]
    pub fn icon_name(self) -> &'static str {
        match self {
            Self::Small => "cluster-small",
            Self::Medium => "cluster-medium",
            Self::Large => "cluster-large",
        }
    }
}
