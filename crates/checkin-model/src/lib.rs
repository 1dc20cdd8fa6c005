//! Check-in data model
//!
//! Domain types consumed by the map layer and the point format handed to the
//! rendering engine.
//!
//! # Core Concepts
//!
//! - [`CheckInAggregate`]: one location with its present users
//! - [`UserRef`]: a user as seen by the map (id, name, avatar)
//! - [`IconId`]: image-atlas identifiers (`fallback`, `cluster-*`, `avatar-{userId}`)
//! - [`FeatureCollection`]: GeoJSON-shaped points fed to a clustered source
//! - [`Expr`]: style expressions evaluated by the engine, not the application
//!
//! # Example
//!
//! ```rust
//! use checkin_model::{build_features, CheckInAggregate, UserRef};
//!
//! let aggregate = CheckInAggregate::new(42, 51.9, 4.5, vec![UserRef::named("u1", "Ali")], 3);
//! let build = build_features(&[aggregate]);
//!
//! let props = &build.collection.features[0].properties;
//! assert_eq!(props.user_count, 3);
//! assert_eq!(props.icon_id.as_str(), "fallback");
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod aggregate;
mod error;
mod expr;
mod feature;
mod icon;

pub use aggregate::{avatar_requests, AvatarRequest, CheckInAggregate, UserRef};
pub use error::ModelError;
pub use expr::{EvalContext, Expr};
pub use feature::{
    build_features, CollectionTag, FeatureBuild, FeatureCollection, FeatureProperties,
    FeatureTag, GeometryKind, Point, PointFeature,
};
pub use icon::{ClusterTier, IconId, FALLBACK_ICON};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
