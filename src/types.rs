use geojson::PolygonType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of sub-areas emitted per municipality code.
pub type Meta = BTreeMap<String, usize>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum AreaGeometry {
    Polygon(PolygonType),
    MultiPolygon(Vec<PolygonType>),
}

impl AreaGeometry {
    /// A single unit stays a `Polygon`, anything else becomes a `MultiPolygon`.
    pub fn from_units(mut units: Vec<PolygonType>) -> Self {
        if units.len() == 1 {
            AreaGeometry::Polygon(units.remove(0))
        } else {
            AreaGeometry::MultiPolygon(units)
        }
    }

    pub fn polygon_count(&self) -> usize {
        match self {
            AreaGeometry::Polygon(_) => 1,
            AreaGeometry::MultiPolygon(polygons) => polygons.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaProperties {
    pub name: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "Feature")]
pub struct AreaFeature {
    pub properties: AreaProperties,
    pub geometry: AreaGeometry,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "FeatureCollection")]
pub struct AreaCollection {
    pub features: Vec<AreaFeature>,
}

impl AreaCollection {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}
