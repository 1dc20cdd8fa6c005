//! Clustered point features
//!
//! GeoJSON-shaped collection the layer pushes into the engine's clustered
//! source. The collection is always rebuilt wholesale from the latest list.

use crate::aggregate::CheckInAggregate;
use crate::error::ModelError;
use crate::icon::IconId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// GeoJSON geometry discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GeometryKind {
    /// A single position
    #[default]
    Point,
}

/// Point geometry with `[lng, lat]` coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Always `"Point"`
    #[serde(rename = "type")]
    pub kind: GeometryKind,
    /// Longitude first, as GeoJSON requires
    pub coordinates: [f64; 2],
}

impl Point {
    /// Point at `(lng, lat)`
    #[inline]
    #[must_use]
    pub fn new(lng: f64, lat: f64) -> Self {
        Self {
            kind: GeometryKind::Point,
            coordinates: [lng, lat],
        }
    }

    /// Longitude
    #[inline]
    #[must_use]
    pub fn lng(&self) -> f64 {
        self.coordinates[0]
    }

    /// Latitude
    #[inline]
    #[must_use]
    pub fn lat(&self) -> f64 {
        self.coordinates[1]
    }
}

/// Properties attached to each marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureProperties {
    /// Feature id (the location id)
    pub id: i64,
    /// Location the marker stands for
    pub location_id: i64,
    /// Total check-ins at the location
    pub user_count: u32,
    /// Requested avatar; the style falls back when it is not in the atlas
    pub icon_id: IconId,
    /// Representative user's picture, if any
    pub avatar_url: Option<String>,
}

/// A single marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointFeature {
    /// Always `"Feature"`
    #[serde(rename = "type")]
    pub kind: FeatureTag,
    /// Marker position
    pub geometry: Point,
    /// Marker properties
    pub properties: FeatureProperties,
}

/// GeoJSON feature discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FeatureTag {
    /// A feature
    #[default]
    Feature,
}

/// GeoJSON collection discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CollectionTag {
    /// A feature collection
    #[default]
    FeatureCollection,
}

impl PointFeature {
    /// Marker for one aggregate
    #[must_use]
    pub fn from_aggregate(aggregate: &CheckInAggregate) -> Self {
        Self {
            kind: FeatureTag::Feature,
            geometry: Point::new(aggregate.lng, aggregate.lat),
            properties: FeatureProperties {
                id: aggregate.location_id,
                location_id: aggregate.location_id,
                user_count: aggregate.count,
                icon_id: aggregate.icon_id(),
                avatar_url: aggregate
                    .representative()
                    .and_then(|u| u.avatar_url())
                    .map(str::to_string),
            },
        }
    }

    /// Property by its wire name, for expression evaluation
    #[must_use]
    pub fn property(&self, name: &str) -> Option<Value> {
        let props = &self.properties;
        match name {
            "id" => Some(props.id.into()),
            "locationId" => Some(props.location_id.into()),
            "userCount" => Some(props.user_count.into()),
            "iconId" => Some(props.icon_id.as_str().into()),
            "avatarUrl" => props.avatar_url.as_deref().map(Value::from),
            _ => None,
        }
    }
}

/// Collection handed to the clustered source
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureCollection {
    /// Always `"FeatureCollection"`
    #[serde(rename = "type")]
    pub kind: CollectionTag,
    /// Markers, one per location
    pub features: Vec<PointFeature>,
}

impl FeatureCollection {
    /// Empty collection used when the source is first created
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of markers
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether there are no markers
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Marker for a location
    #[must_use]
    pub fn get(&self, location_id: i64) -> Option<&PointFeature> {
        self.features
            .iter()
            .find(|f| f.properties.location_id == location_id)
    }
}

/// Result of converting a list of aggregates
#[derive(Debug, Clone, Default)]
pub struct FeatureBuild {
    /// Valid, de-duplicated markers
    pub collection: FeatureCollection,
    /// Aggregates dropped by validation
    pub rejected: Vec<ModelError>,
    /// Location ids seen more than once (first occurrence kept)
    pub duplicates: Vec<i64>,
    /// Input positions of the aggregates that became features, in order
    pub kept: Vec<usize>,
}

/// Convert aggregates into one marker per location
#[must_use]
pub fn build_features(aggregates: &[CheckInAggregate]) -> FeatureBuild {
    let mut build = FeatureBuild::default();
    let mut seen = HashSet::with_capacity(aggregates.len());

    for (index, aggregate) in aggregates.iter().enumerate() {
        if let Err(err) = aggregate.validate() {
            build.rejected.push(err);
            continue;
        }
        if !seen.insert(aggregate.location_id) {
            build.duplicates.push(aggregate.location_id);
            continue;
        }
        build
            .collection
            .features
            .push(PointFeature::from_aggregate(aggregate));
        build.kept.push(index);
    }

    build
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::UserRef;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn example_aggregate_feature() {
        let aggregate =
            CheckInAggregate::new(42, 51.9, 4.5, vec![UserRef::named("u1", "Ali")], 3);
        let feature = PointFeature::from_aggregate(&aggregate);

        assert_eq!(feature.geometry.coordinates, [4.5, 51.9]);
        assert_eq!(feature.properties.user_count, 3);
        assert_eq!(feature.properties.icon_id.as_str(), "fallback");
        assert_eq!(feature.properties.avatar_url, None);
    }

    #[test]
    fn serializes_as_geojson() {
        let aggregate = CheckInAggregate::new(
            7,
            10.0,
            20.0,
            vec![UserRef::with_avatar("u2", "Bea", "https://cdn.example/b.png")],
            1,
        );
        let build = build_features(&[aggregate]);
        let value = serde_json::to_value(&build.collection).unwrap();

        assert_eq!(
            value,
            json!({
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "geometry": { "type": "Point", "coordinates": [20.0, 10.0] },
                    "properties": {
                        "id": 7,
                        "locationId": 7,
                        "userCount": 1,
                        "iconId": "avatar-u2",
                        "avatarUrl": "https://cdn.example/b.png"
                    }
                }]
            })
        );
    }

    #[test]
    fn duplicates_keep_first_occurrence() {
        let first = CheckInAggregate::new(1, 1.0, 1.0, vec![], 2);
        let second = CheckInAggregate::new(1, 5.0, 5.0, vec![], 9);
        let build = build_features(&[first, second]);

        assert_eq!(build.collection.len(), 1);
        assert_eq!(build.duplicates, vec![1]);
        assert_eq!(build.collection.get(1).unwrap().properties.user_count, 2);
    }

    #[test]
    fn invalid_aggregates_are_rejected_not_fatal() {
        let bad = CheckInAggregate::new(1, 95.0, 1.0, vec![], 1);
        let good = CheckInAggregate::new(2, 45.0, 1.0, vec![], 1);
        let build = build_features(&[bad, good]);

        assert_eq!(build.collection.len(), 1);
        assert_eq!(build.rejected.len(), 1);
        assert_eq!(build.rejected[0].location_id(), 1);
        assert_eq!(build.kept, vec![1]);
    }

    #[test]
    fn rejected_entry_does_not_claim_its_location() {
        let bad = CheckInAggregate::new(7, f64::NAN, 1.0, vec![UserRef::named("a", "Bad")], 1);
        let good = CheckInAggregate::new(7, 10.0, 1.0, vec![UserRef::named("b", "Good")], 1);
        let build = build_features(&[bad, good]);

        assert_eq!(build.kept, vec![1]);
        assert!(build.duplicates.is_empty());
        assert_eq!(build.collection.get(7).unwrap().geometry.coordinates, [1.0, 10.0]);
    }

    #[test]
    fn property_lookup_by_wire_name() {
        let aggregate = CheckInAggregate::new(3, 0.0, 0.0, vec![], 5);
        let feature = PointFeature::from_aggregate(&aggregate);
        assert_eq!(feature.property("userCount"), Some(json!(5)));
        assert_eq!(feature.property("avatarUrl"), None);
        assert_eq!(feature.property("nope"), None);
    }

    proptest! {
        #[test]
        fn prop_build_is_idempotent(
            ids in proptest::collection::vec(0i64..20, 0..40),
            count in 1u32..50,
        ) {
            let aggregates: Vec<CheckInAggregate> = ids
                .iter()
                .map(|id| CheckInAggregate::new(*id, 1.0, 2.0, vec![], count))
                .collect();

            let first = build_features(&aggregates).collection;
            let second = build_features(&aggregates).collection;
            prop_assert_eq!(&first, &second);

            let unique: HashSet<i64> = first.features.iter().map(|f| f.properties.location_id).collect();
            prop_assert_eq!(unique.len(), first.len());
        }
    }
}
