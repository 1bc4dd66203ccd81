use geojson::{Geometry, JsonValue, LineStringType, PolygonType, Position, Value};
use serde::Deserialize;

use crate::error::Error;

/// 4 decimals is roughly 11 meters at Japanese latitudes.
pub const DEFAULT_DECIMALS: u32 = 4;

/// How a value is brought to a fixed number of decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rounding {
    /// Rounds the exact binary value of the `f64` to the nearest decimal and parses it back.
    /// `35.68945` is stored as `35.689450000000000784...` and becomes `35.6895`,
    /// `134.12345` is stored as `134.123449999999991...` and becomes `134.1234`.
    /// Only values that are exact ties in binary go to the even digit.
    /// This is what the published datasets were generated with.
    #[default]
    Exact,
    /// Rounds the scaled value half to even. Scaling can create ties the exact value
    /// doesn't have: `35.68945` scales to `356894.5` and becomes `35.6894`.
    HalfEven,
    /// Rounds the scaled value half away from zero: `134.12345` becomes `134.1235`.
    HalfAwayFromZero,
}

/// Rounds every ordinate of a geometry to a fixed number of decimals.
///
/// The rule is pinned by [`Rounding`] rather than left to a default,
/// so the output is the same whatever produced the input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantizer {
    decimals: u32,
    rounding: Rounding,
    scale: f64,
}

impl Default for Quantizer {
    fn default() -> Self {
        Quantizer::new(DEFAULT_DECIMALS, Rounding::default())
    }
}

impl Quantizer {
    pub fn new(decimals: u32, rounding: Rounding) -> Self {
        Quantizer {
            decimals,
            rounding,
            scale: 10f64.powi(decimals as i32),
        }
    }

    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    pub fn rounding(&self) -> Rounding {
        self.rounding
    }

    pub fn round(&self, value: f64) -> f64 {
        match self.rounding {
            Rounding::Exact => format!("{:.*}", self.decimals as usize, value)
                .parse()
                .unwrap_or(value),
            Rounding::HalfEven => (value * self.scale).round_ties_even() / self.scale,
            Rounding::HalfAwayFromZero => (value * self.scale).round() / self.scale,
        }
    }

    /// A single `[lng, lat, ...]` position. Extra ordinates are kept and rounded too.
    pub fn position(&self, position: &[f64]) -> Result<Position, Error> {
        if position.len() < 2 {
            return Err(Error::malformed(format!(
                "position has {} ordinate(s), expected at least 2",
                position.len()
            )));
        }
        position
            .iter()
            .map(|&ordinate| {
                if ordinate.is_finite() {
                    Ok(self.round(ordinate))
                } else {
                    Err(Error::malformed(format!("non-finite ordinate `{ordinate}`")))
                }
            })
            .collect()
    }

    pub fn ring(&self, ring: &[Position]) -> Result<LineStringType, Error> {
        if ring.is_empty() {
            return Err(Error::malformed("empty ring"));
        }
        ring.iter().map(|position| self.position(position)).collect()
    }

    pub fn polygon(&self, polygon: &[LineStringType]) -> Result<PolygonType, Error> {
        if polygon.is_empty() {
            return Err(Error::malformed("polygon without any ring"));
        }
        polygon.iter().map(|ring| self.ring(ring)).collect()
    }

    pub fn multi_polygon(&self, polygons: &[PolygonType]) -> Result<Vec<PolygonType>, Error> {
        if polygons.is_empty() {
            return Err(Error::malformed("multipolygon without any polygon"));
        }
        polygons.iter().map(|polygon| self.polygon(polygon)).collect()
    }

    /// Returns a new structure of the same depth and shape. The input is left untouched.
    pub fn coordinates(&self, coordinates: &Coordinates) -> Result<Coordinates, Error> {
        match coordinates {
            Coordinates::Polygon(polygon) => self.polygon(polygon).map(Coordinates::Polygon),
            Coordinates::MultiPolygon(polygons) => {
                self.multi_polygon(polygons).map(Coordinates::MultiPolygon)
            }
        }
    }
}

/// Areal coordinates with their nesting depth taken from the declared geometry type.
#[derive(Debug, Clone, PartialEq)]
pub enum Coordinates {
    Polygon(PolygonType),
    MultiPolygon(Vec<PolygonType>),
}

impl Coordinates {
    /// Reads a raw GeoJSON geometry object.
    ///
    /// `Ok(None)` for every other geometry type, known or not. A `Polygon` or `MultiPolygon`
    /// whose coordinates can't be read fails with [`Error::MalformedGeometry`].
    pub fn from_json(geometry: JsonValue) -> Result<Option<Self>, Error> {
        let areal = match geometry.get("type") {
            Some(JsonValue::String(kind)) => matches!(kind.as_str(), "Polygon" | "MultiPolygon"),
            _ => return Err(Error::malformed("geometry without a type")),
        };
        if !areal {
            return Ok(None);
        }
        let geometry = Geometry::from_json_value(geometry).map_err(|e| Error::malformed(e.to_string()))?;
        Ok(Coordinates::from_value(geometry.value))
    }

    /// `None` for every geometry type that does not describe an area.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Polygon(polygon) => Some(Coordinates::Polygon(polygon)),
            Value::MultiPolygon(polygons) => Some(Coordinates::MultiPolygon(polygons)),
            _ => None,
        }
    }

    /// Flattens exactly one level: a polygon is one unit, a multipolygon one unit per member.
    pub fn into_polygon_units(self) -> Vec<PolygonType> {
        match self {
            Coordinates::Polygon(polygon) => vec![polygon],
            Coordinates::MultiPolygon(polygons) => polygons,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn square(x: f64, y: f64) -> PolygonType {
        vec![vec![
            vec![x, y],
            vec![x + 0.123456, y],
            vec![x + 0.123456, y + 0.654321],
            vec![x, y],
        ]]
    }

    #[test]
    fn exact_is_the_default() {
        let quantizer = Quantizer::default();
        assert_eq!(quantizer.decimals(), 4);
        assert_eq!(quantizer.rounding(), Rounding::Exact);
        assert_eq!(quantizer.round(134.12345), 134.1234);
        assert_eq!(quantizer.round(35.68945), 35.6895);
        assert_eq!(quantizer.round(34.56789), 34.5679);
        assert_eq!(quantizer.round(12.34565), 12.3456);
        assert_eq!(quantizer.round(0.00125), 0.0013);
        assert_eq!(quantizer.round(-0.00025), -0.0003);
        assert_eq!(quantizer.round(134.2), 134.2);

        let quantizer = Quantizer::new(2, Rounding::Exact);
        assert_eq!(quantizer.round(139.767125), 139.77);
        assert_eq!(quantizer.round(35.68945), 35.69);
    }

    #[test]
    fn half_even_on_the_scaled_value() {
        let quantizer = Quantizer::new(4, Rounding::HalfEven);
        assert_eq!(quantizer.round(134.12345), 134.1234);
        assert_eq!(quantizer.round(35.68945), 35.6894);
        assert_eq!(quantizer.round(34.56789), 34.5679);
        assert_eq!(quantizer.round(134.2), 134.2);
    }

    #[test]
    fn half_away_from_zero() {
        let quantizer = Quantizer::new(4, Rounding::HalfAwayFromZero);
        assert_eq!(quantizer.round(134.12345), 134.1235);
        assert_eq!(quantizer.round(35.68945), 35.6895);
        assert_eq!(quantizer.round(34.56789), 34.5679);
    }

    #[test]
    fn values_just_below_a_tie() {
        // 135.00005 is stored below the tie and also scales to 1350000.4999999998
        for rounding in [Rounding::Exact, Rounding::HalfEven, Rounding::HalfAwayFromZero] {
            let quantizer = Quantizer::new(4, rounding);
            assert_eq!(quantizer.round(135.00005), 135.0);
            assert_eq!(quantizer.round(-135.00005), -135.0);
            assert_eq!(quantizer.round(1.00005), 1.0001);
        }
    }

    #[test]
    fn other_precisions() {
        let quantizer = Quantizer::new(0, Rounding::HalfEven);
        assert_eq!(quantizer.round(2.5), 2.0);
        assert_eq!(quantizer.round(3.5), 4.0);
        let quantizer = Quantizer::new(2, Rounding::HalfEven);
        assert_eq!(quantizer.round(139.767125), 139.77);
    }

    #[test]
    fn quantization_is_idempotent() {
        let values = [
            134.12345, 34.56789, 139.69175, 35.68945, 0.00125, -0.00025, 12.34565, 141.3468,
            127.6809, 45.5228, 153.9866, 20.4253,
        ];
        for rounding in [Rounding::Exact, Rounding::HalfEven, Rounding::HalfAwayFromZero] {
            for decimals in 0..=8 {
                let quantizer = Quantizer::new(decimals, rounding);
                for value in values {
                    let once = quantizer.round(value);
                    assert_eq!(quantizer.round(once), once, "{value} at {decimals} ({rounding:?})");
                }
            }
        }

        let quantizer = Quantizer::default();
        let polygons = vec![square(139.123456, 35.987654), square(-0.000049, 0.000051)];
        let once = quantizer.multi_polygon(&polygons).unwrap();
        let twice = quantizer.multi_polygon(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn quantization_preserves_shape() {
        let quantizer = Quantizer::default();
        let mut outer = square(130.0, 33.0);
        outer[0].push(vec![130.0000001, 33.0000001]);
        let with_hole = vec![outer[0].clone(), square(130.01, 33.01).remove(0)];
        let polygons = vec![square(140.0, 40.0), with_hole];

        let quantized = quantizer.multi_polygon(&polygons).unwrap();
        assert_eq!(quantized.len(), polygons.len());
        for (input, output) in polygons.iter().zip(&quantized) {
            assert_eq!(input.len(), output.len());
            for (input, output) in input.iter().zip(output) {
                assert_eq!(input.len(), output.len());
                for (input, output) in input.iter().zip(output) {
                    assert_eq!(input.len(), output.len());
                }
            }
        }
    }

    #[test]
    fn extra_ordinates_are_kept() {
        let quantizer = Quantizer::default();
        let position = quantizer.position(&[139.123456, 35.654321, 12.34567]).unwrap();
        assert_eq!(position, vec![139.1235, 35.6543, 12.3457]);
    }

    #[test]
    fn depth_follows_the_declared_type() {
        let quantizer = Quantizer::default();
        let polygon = Coordinates::from_value(Value::Polygon(square(139.0, 35.0))).unwrap();
        let quantized = quantizer.coordinates(&polygon).unwrap();
        assert!(matches!(quantized, Coordinates::Polygon(_)));
        assert_eq!(quantized.into_polygon_units().len(), 1);

        let multi = Coordinates::from_value(Value::MultiPolygon(vec![
            square(139.0, 35.0),
            square(140.0, 36.0),
            square(141.0, 37.0),
        ]))
        .unwrap();
        let quantized = quantizer.coordinates(&multi).unwrap();
        assert!(matches!(quantized, Coordinates::MultiPolygon(_)));
        assert_eq!(quantized.into_polygon_units().len(), 3);

        assert_eq!(Coordinates::from_value(Value::Point(vec![139.0, 35.0])), None);
        assert_eq!(
            Coordinates::from_value(Value::LineString(vec![vec![139.0, 35.0], vec![140.0, 36.0]])),
            None
        );
    }

    #[test]
    fn geometries_from_raw_json() {
        let polygon = Coordinates::from_json(json!({
            "type": "Polygon",
            "coordinates": [[[134.0, 34.0], [134.1, 34.0], [134.0, 34.1], [134.0, 34.0]]],
        }))
        .unwrap();
        assert!(matches!(polygon, Some(Coordinates::Polygon(ref p)) if p[0].len() == 4));

        let multi = Coordinates::from_json(json!({
            "type": "MultiPolygon",
            "coordinates": [
                [[[134.0, 34.0], [134.1, 34.0], [134.0, 34.0]]],
                [[[135.0, 34.0], [135.1, 34.0], [135.0, 34.0]]],
            ],
        }))
        .unwrap();
        assert_eq!(multi.map(|c| c.into_polygon_units().len()), Some(2));

        // other geometry types are ignored, known or not
        let point = json!({ "type": "Point", "coordinates": [134.0, 34.0] });
        assert_eq!(Coordinates::from_json(point).unwrap(), None);
        let circle = json!({ "type": "Circle", "coordinates": [134.0, 34.0], "radius": 5 });
        assert_eq!(Coordinates::from_json(circle).unwrap(), None);
    }

    #[test]
    fn unreadable_geometries() {
        let err = Coordinates::from_json(json!({
            "type": "Polygon",
            "coordinates": [[["x", 34.0], [134.1, 34.0], ["x", 34.0]]],
        }))
        .unwrap_err();
        insta::assert_snapshot!(err, @"Malformed geometry: Expected a floating-point value, but got None");

        let err = Coordinates::from_json(json!({ "coordinates": [] })).unwrap_err();
        insta::assert_snapshot!(err, @"Malformed geometry: geometry without a type");

        let err = Coordinates::from_json(json!([134.0, 34.0])).unwrap_err();
        insta::assert_snapshot!(err, @"Malformed geometry: geometry without a type");

        assert!(Coordinates::from_json(json!({ "type": "MultiPolygon" })).is_err());
    }

    #[test]
    fn malformed_structures() {
        let quantizer = Quantizer::default();
        let err = quantizer.position(&[139.0]).unwrap_err();
        insta::assert_snapshot!(err, @"Malformed geometry: position has 1 ordinate(s), expected at least 2");
        let err = quantizer.position(&[f64::NAN, 35.0]).unwrap_err();
        insta::assert_snapshot!(err, @"Malformed geometry: non-finite ordinate `NaN`");
        let err = quantizer.ring(&[]).unwrap_err();
        insta::assert_snapshot!(err, @"Malformed geometry: empty ring");
        let err = quantizer.polygon(&[]).unwrap_err();
        insta::assert_snapshot!(err, @"Malformed geometry: polygon without any ring");
        let err = quantizer.multi_polygon(&[]).unwrap_err();
        insta::assert_snapshot!(err, @"Malformed geometry: multipolygon without any polygon");
        let err = quantizer.polygon(&[vec![vec![139.0, 35.0]], vec![]]).unwrap_err();
        insta::assert_snapshot!(err, @"Malformed geometry: empty ring");
    }
}
