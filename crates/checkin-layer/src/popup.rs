//! Point popup roster

use checkin_model::{CheckInAggregate, UserRef};
use serde::Serialize;

/// Name shown for users without a display name
pub const UNKNOWN_USER: &str = "Unknown";

/// Picture shown next to a roster entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PopupAvatar {
    /// Remote picture
    Image(String),
    /// Initials badge
    Initials(String),
}

/// One user in the roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PopupEntry {
    /// Name as shown
    pub display_name: String,
    /// Picture or initials
    pub avatar: PopupAvatar,
}

impl PopupEntry {
    /// Entry for `user`
    #[must_use]
    pub fn for_user(user: &UserRef) -> Self {
        let avatar = user.avatar_url().map_or_else(
            || PopupAvatar::Initials(user.initials()),
            |url| PopupAvatar::Image(url.to_string()),
        );
        Self {
            display_name: user.display_name().unwrap_or(UNKNOWN_USER).to_string(),
            avatar,
        }
    }
}

/// Popup anchored on a marker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopupContent {
    /// Anchor longitude
    pub lng: f64,
    /// Anchor latitude
    pub lat: f64,
    /// Location the marker stands for
    pub location_id: i64,
    /// Listed users, at most the configured roster size
    pub entries: Vec<PopupEntry>,
    /// Check-ins not listed
    pub overflow: u32,
}

impl PopupContent {
    /// Roster for `aggregate`, listing at most `max_users`
    #[must_use]
    pub fn for_aggregate(aggregate: &CheckInAggregate, max_users: usize) -> Self {
        let entries: Vec<PopupEntry> = aggregate
            .users
            .iter()
            .take(max_users)
            .map(PopupEntry::for_user)
            .collect();
        let listed = u32::try_from(entries.len()).unwrap_or(u32::MAX);
        Self {
            lng: aggregate.lng,
            lat: aggregate.lat,
            location_id: aggregate.location_id,
            overflow: aggregate.count.saturating_sub(listed),
            entries,
        }
    }

    /// "and N more" footer, if any
    #[must_use]
    pub fn overflow_text(&self) -> Option<String> {
        (self.overflow > 0).then(|| format!("+{} more", self.overflow))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn roster_is_capped() {
        let users: Vec<UserRef> = (0..14)
            .map(|i| UserRef::named(format!("u{i}"), format!("User {i}")))
            .collect();
        let aggregate = CheckInAggregate::new(1, 0.0, 0.0, users, 20);

        let popup = PopupContent::for_aggregate(&aggregate, 10);
        assert_eq!(popup.entries.len(), 10);
        assert_eq!(popup.overflow, 10);
        assert_eq!(popup.overflow_text().as_deref(), Some("+10 more"));
    }

    #[test]
    fn entries_use_picture_or_initials() {
        let users = vec![
            UserRef::with_avatar("u1", "Ali Veli", "https://cdn.example/u1.png"),
            UserRef::named("u2", "grace hopper"),
            UserRef::default(),
        ];
        let aggregate = CheckInAggregate::new(7, 1.0, 2.0, users, 3);
        let popup = PopupContent::for_aggregate(&aggregate, 10);

        assert_eq!(
            popup.entries,
            vec![
                PopupEntry {
                    display_name: "Ali Veli".into(),
                    avatar: PopupAvatar::Image("https://cdn.example/u1.png".into()),
                },
                PopupEntry {
                    display_name: "grace hopper".into(),
                    avatar: PopupAvatar::Initials("GH".into()),
                },
                PopupEntry {
                    display_name: UNKNOWN_USER.into(),
                    avatar: PopupAvatar::Initials("??".into()),
                },
            ]
        );
        assert_eq!(popup.overflow, 0);
        assert_eq!(popup.overflow_text(), None);
    }
}
