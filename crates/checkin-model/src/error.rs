//! Error types for the check-in model

/// Validation failures for upstream check-in records
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    /// Coordinates are not finite or outside WGS84 bounds
    #[error("location {location_id}: invalid coordinates ({lat}, {lng})")]
    InvalidCoordinates {
        /// Offending location
        location_id: i64,
        /// Latitude as received
        lat: f64,
        /// Longitude as received
        lng: f64,
    },

    /// Total count is smaller than the listed users
    #[error("location {location_id}: count {count} is below listed users {users}")]
    CountBelowUsers {
        /// Offending location
        location_id: i64,
        /// Reported total
        count: u32,
        /// Number of listed users
        users: usize,
    },
}

impl ModelError {
    /// Location the error refers to
    #[inline]
    #[must_use]
    pub fn location_id(&self) -> i64 {
        match self {
            Self::InvalidCoordinates { location_id, .. }
            | Self::CountBelowUsers { location_id, .. } => *location_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_mentions_location() {
        let err = ModelError::CountBelowUsers {
            location_id: 7,
            count: 1,
            users: 2,
        };
        assert!(err.to_string().contains("location 7"));
        assert_eq!(err.location_id(), 7);
    }
}
