use crate::data::RawFeature;
use crate::error::Error;
use crate::quantize::{Coordinates, Quantizer};
use crate::types::{AreaCollection, AreaFeature, AreaGeometry, AreaProperties};
use geojson::{JsonObject, JsonValue, PolygonType};
use std::collections::HashMap;
use tracing::debug;

/// Where a feature goes: the grouping key and the properties its group will be emitted with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaKey {
    pub key: String,
    pub name: String,
    pub code: String,
}

pub trait KeyExtractor {
    /// Fails with [`Error::UnresolvableKey`] when the feature can't take part in grouping.
    fn extract(&self, feature: &RawFeature) -> Result<AreaKey, Error>;
}

/// Reads a property as text. Non-empty strings are used verbatim and numbers through
/// their JSON representation, anything else counts as absent.
pub fn property_text(properties: Option<&JsonObject>, field: &str) -> Option<String> {
    match properties?.get(field)? {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Municipality boundaries (N03 dataset). Split polygons of one municipality are merged by name.
#[derive(Debug, Clone)]
pub struct MunicipalityKeys {
    /// Tried in order, the first present value wins.
    pub name_fields: Vec<String>,
    pub fallback_name: String,
    pub code_field: String,
}

impl Default for MunicipalityKeys {
    fn default() -> Self {
        MunicipalityKeys {
            name_fields: vec!["N03_004".to_string(), "N03_003".to_string()],
            fallback_name: "unknown".to_string(),
            code_field: "N03_007".to_string(),
        }
    }
}

impl KeyExtractor for MunicipalityKeys {
    fn extract(&self, feature: &RawFeature) -> Result<AreaKey, Error> {
        let properties = feature.properties.as_ref();
        let name = self
            .name_fields
            .iter()
            .find_map(|field| property_text(properties, field))
            .unwrap_or_else(|| self.fallback_name.clone());
        let code = property_text(properties, &self.code_field).unwrap_or_default();

        Ok(AreaKey {
            key: name.clone(),
            name,
            code,
        })
    }
}

/// Oaza (大字・町) areas. Grouped by the short form of the feature id, named by their label.
#[derive(Debug, Clone)]
pub struct OazaKeys {
    /// Reference to the municipality, see [`parent_code`]. Used to partition a region.
    pub parent_field: String,
    pub label_field: String,
}

impl Default for OazaKeys {
    fn default() -> Self {
        OazaKeys {
            parent_field: "parent".to_string(),
            label_field: "label".to_string(),
        }
    }
}

impl KeyExtractor for OazaKeys {
    fn extract(&self, feature: &RawFeature) -> Result<AreaKey, Error> {
        let name = property_text(feature.properties.as_ref(), &self.label_field)
            .ok_or(Error::UnresolvableKey("label"))?;
        let id = short_id(feature.id.as_ref());

        Ok(AreaKey {
            key: id.clone(),
            name,
            code: id,
        })
    }
}

/// Last path segment of a feature id, empty when the feature has none.
fn short_id(id: Option<&JsonValue>) -> String {
    match id {
        Some(JsonValue::String(s)) => s.rsplit('/').next().unwrap_or_default().to_string(),
        Some(JsonValue::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Extracts the municipality code out of a parent reference.
///
/// `http://data.e-stat.go.jp/lod/sac/C36208-20060301` and `C36208-20060301` both give `36208`.
pub fn parent_code(parent: &str) -> Option<&str> {
    let segment = parent.rsplit('/').next()?;
    let code = segment.strip_prefix('C')?.split('-').next()?;
    (!code.is_empty()).then_some(code)
}

/// Splits a region's features per municipality, in order of first appearance.
/// Features without a usable parent reference are dropped.
pub fn partition_by_parent(
    features: Vec<RawFeature>,
    parent_field: &str,
) -> Vec<(String, Vec<RawFeature>)> {
    let mut partitions: Vec<(String, Vec<RawFeature>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut dropped = 0;

    for feature in features {
        let parent = property_text(feature.properties.as_ref(), parent_field);
        let Some(code) = parent.as_deref().and_then(parent_code) else {
            dropped += 1;
            continue;
        };

        match index.get(code) {
            Some(&i) => partitions[i].1.push(feature),
            None => {
                index.insert(code.to_string(), partitions.len());
                partitions.push((code.to_string(), vec![feature]));
            }
        }
    }

    if dropped > 0 {
        debug!(dropped, "Features without a municipality reference");
    }
    partitions
}

struct AreaGroup {
    name: String,
    code: String,
    units: Vec<PolygonType>,
}

impl AreaGroup {
    fn into_feature(self, keep_empty: bool) -> Option<AreaFeature> {
        if self.units.is_empty() && !keep_empty {
            return None;
        }
        Some(AreaFeature {
            properties: AreaProperties {
                name: self.name,
                code: self.code,
            },
            geometry: AreaGeometry::from_units(self.units),
        })
    }
}

/// Merges the features of one region into one output feature per administrative key.
#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    quantizer: Quantizer,
    keep_empty_groups: bool,
}

impl Aggregator {
    pub fn new(quantizer: Quantizer) -> Self {
        Aggregator {
            quantizer,
            keep_empty_groups: false,
        }
    }

    /// Emit groups that ended up without any polygon as an empty `MultiPolygon`.
    pub fn keep_empty_groups(mut self, keep: bool) -> Self {
        self.keep_empty_groups = keep;
        self
    }

    /// Groups are emitted in order of first appearance, their polygons in order of arrival.
    /// The name and code of a group are the ones of its first feature.
    pub fn aggregate<K>(&self, features: impl IntoIterator<Item = RawFeature>, keys: &K) -> AreaCollection
    where
        K: KeyExtractor + ?Sized,
    {
        let mut groups: Vec<AreaGroup> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut skipped_features = 0;
        let mut skipped_geometries = 0;

        for feature in features {
            let area = match keys.extract(&feature) {
                Ok(area) => area,
                Err(e) => {
                    debug!(error = %e, "Skipping feature");
                    skipped_features += 1;
                    continue;
                }
            };

            let i = *index.entry(area.key).or_insert_with(|| {
                groups.push(AreaGroup {
                    name: area.name,
                    code: area.code,
                    units: Vec::new(),
                });
                groups.len() - 1
            });

            let coordinates = match feature.geometry.map(Coordinates::from_json) {
                Some(Ok(Some(coordinates))) => coordinates,
                Some(Err(e)) => {
                    debug!(error = %e, "Skipping geometry");
                    skipped_geometries += 1;
                    continue;
                }
                _ => continue,
            };

            match self.quantizer.coordinates(&coordinates) {
                Ok(quantized) => groups[i].units.extend(quantized.into_polygon_units()),
                Err(e) => {
                    debug!(error = %e, "Skipping geometry");
                    skipped_geometries += 1;
                }
            }
        }

        if skipped_features > 0 || skipped_geometries > 0 {
            debug!(skipped_features, skipped_geometries, "Aggregation skipped some input");
        }

        AreaCollection {
            features: groups
                .into_iter()
                .filter_map(|group| group.into_feature(self.keep_empty_groups))
                .collect(),
        }
    }
}
