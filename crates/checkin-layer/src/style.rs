//! Source and layer definitions
//!
//! Icon choice, fallback and badge text are expressed as engine-evaluated
//! [`Expr`]s so that an avatar registered after the data arrived shows up
//! without pushing the data again.

use crate::config::LayerConfig;
use checkin_model::{ClusterTier, Expr, FeatureCollection, IconId};
use serde::Serialize;
use serde_json::Value;

/// Property set on cluster features by the engine
pub const POINT_COUNT: &str = "point_count";

/// Clustered GeoJSON source definition
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpec {
    /// Always `"geojson"`
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Initial data
    pub data: FeatureCollection,
    /// Whether points are clustered
    pub cluster: bool,
    /// Cluster radius in screen pixels
    pub cluster_radius: u32,
    /// Highest zoom at which points are clustered
    pub cluster_max_zoom: f64,
}

impl SourceSpec {
    /// Empty clustered source for `config`
    #[must_use]
    pub fn clustered(config: &LayerConfig) -> Self {
        Self {
            kind: "geojson",
            data: FeatureCollection::empty(),
            cluster: true,
            cluster_radius: config.cluster_radius,
            cluster_max_zoom: config.cluster_max_zoom,
        }
    }
}

/// Layer visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Drawn
    #[default]
    Visible,
    /// Not drawn
    None,
}

impl Visibility {
    /// From a shown/hidden flag
    #[inline]
    #[must_use]
    pub fn from_shown(shown: bool) -> Self {
        if shown {
            Self::Visible
        } else {
            Self::None
        }
    }

    /// Layout property value
    #[must_use]
    pub fn to_value(self) -> Value {
        Value::from(match self {
            Self::Visible => "visible",
            Self::None => "none",
        })
    }
}

/// Symbol layout
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SymbolLayout {
    /// Atlas id to draw
    pub icon_image: Expr,
    /// Label text
    pub text_field: Expr,
    /// Markers may overlap
    pub icon_allow_overlap: bool,
    /// Initial visibility
    pub visibility: Visibility,
}

/// Symbol layer definition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerSpec {
    /// Layer id
    pub id: String,
    /// Source the layer draws from
    pub source: String,
    /// Feature filter
    pub filter: Expr,
    /// Symbol layout
    pub layout: SymbolLayout,
}

/// Cluster layer: tiered badge icon labelled with the exact point count
#[must_use]
pub fn cluster_layer(config: &LayerConfig) -> LayerSpec {
    LayerSpec {
        id: config.cluster_layer_id.clone(),
        source: config.source_id.clone(),
        filter: Expr::Has(POINT_COUNT.to_string()),
        layout: SymbolLayout {
            icon_image: cluster_icon(),
            text_field: Expr::ToString(Box::new(Expr::get(POINT_COUNT))),
            icon_allow_overlap: true,
            visibility: Visibility::Visible,
        },
    }
}

/// Points layer: representative avatar, or fallback, plus "+N" badge
#[must_use]
pub fn points_layer(config: &LayerConfig) -> LayerSpec {
    LayerSpec {
        id: config.points_layer_id.clone(),
        source: config.source_id.clone(),
        filter: Expr::Not(Box::new(Expr::Has(POINT_COUNT.to_string()))),
        layout: SymbolLayout {
            icon_image: point_icon(),
            text_field: overflow_badge(),
            icon_allow_overlap: true,
            visibility: Visibility::Visible,
        },
    }
}

/// `["step", ["get", "point_count"], "cluster-small", 25, "cluster-medium", 100, "cluster-large"]`
#[must_use]
pub fn cluster_icon() -> Expr {
    let name = |tier: ClusterTier| Expr::string(IconId::cluster(tier).as_str());
    Expr::Step {
        input: Box::new(Expr::get(POINT_COUNT)),
        base: Box::new(name(ClusterTier::Small)),
        stops: vec![
            (f64::from(ClusterTier::MEDIUM_THRESHOLD), name(ClusterTier::Medium)),
            (f64::from(ClusterTier::LARGE_THRESHOLD), name(ClusterTier::Large)),
        ],
    }
}

/// The requested avatar if the atlas has it, otherwise the fallback
#[must_use]
pub fn point_icon() -> Expr {
    Expr::Coalesce(vec![
        Expr::Image(Box::new(Expr::get("iconId"))),
        Expr::string(IconId::fallback().as_str()),
    ])
}

/// `"+" + (userCount - 1)` when more than one user is present
#[must_use]
pub fn overflow_badge() -> Expr {
    let one = || Box::new(Expr::number(1.0));
    Expr::Case {
        branches: vec![(
            Expr::Gt(Box::new(Expr::get("userCount")), one()),
            Expr::Concat(vec![
                Expr::string("+"),
                Expr::ToString(Box::new(Expr::Sub(Box::new(Expr::get("userCount")), one()))),
            ]),
        )],
        otherwise: Box::new(Expr::string("")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkin_model::EvalContext;
    use proptest::prelude::*;
    use serde_json::json;

    struct Props(Value, bool);

    impl EvalContext for Props {
        fn property(&self, name: &str) -> Option<Value> {
            self.0.get(name).cloned()
        }

        fn has_image(&self, _id: &str) -> bool {
            self.1
        }
    }

    #[test]
    fn source_uses_config_clustering() {
        let config = LayerConfig::for_viewport(400);
        let spec = SourceSpec::clustered(&config);
        assert!(spec.cluster);
        assert_eq!(spec.cluster_radius, 70);
        assert!(spec.data.is_empty());

        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["type"], "geojson");
        assert_eq!(json["clusterRadius"], 70);
    }

    #[test]
    fn layers_split_on_point_count() {
        let config = LayerConfig::default();
        let clustered = Props(json!({"point_count": 30}), false);
        let single = Props(json!({"userCount": 1}), false);

        let clusters = cluster_layer(&config);
        let points = points_layer(&config);
        assert_eq!(clusters.filter.evaluate(&clustered), json!(true));
        assert_eq!(clusters.filter.evaluate(&single), json!(false));
        assert_eq!(points.filter.evaluate(&single), json!(true));
        assert_eq!(clusters.layout.icon_image.evaluate(&clustered), json!("cluster-medium"));
        assert_eq!(clusters.layout.text_field.evaluate(&clustered), json!("30"));
    }

    #[test]
    fn point_icon_falls_back_without_image() {
        let props = json!({"iconId": "avatar-u1"});
        assert_eq!(point_icon().evaluate(&Props(props.clone(), false)), json!("fallback"));
        assert_eq!(point_icon().evaluate(&Props(props, true)), json!("avatar-u1"));
    }

    #[test]
    fn layout_serializes_kebab_case() {
        let json = serde_json::to_value(points_layer(&LayerConfig::default())).unwrap();
        assert_eq!(json["layout"]["icon-allow-overlap"], true);
        assert_eq!(json["layout"]["visibility"], "visible");
        assert_eq!(json["filter"], json!(["!", ["has", "point_count"]]));
    }

    proptest! {
        #[test]
        fn badge_matches_overflow(count in 0u32..10_000) {
            let text = overflow_badge().evaluate(&Props(json!({"userCount": count}), false));
            let expected = if count > 1 { format!("+{}", count - 1) } else { String::new() };
            prop_assert_eq!(text, json!(expected));
        }

        #[test]
        fn cluster_icon_matches_tier(count in 2u32..1_000) {
            let icon = cluster_icon().evaluate(&Props(json!({"point_count": count}), false));
            let tier = ClusterTier::for_point_count(count);
            prop_assert_eq!(icon, json!(tier.icon_name()));
        }
    }
}
