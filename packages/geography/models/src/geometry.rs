//! `GeoJSON` encoding for boundary geometry.
//!
//! Geometries travel to and from the spatial store as `GeoJSON` text.
//! Only polygonal geometry is accepted; anything else (points, lines,
//! an empty collection from a degenerate intersection) decodes to `None`.

use geo::{Geometry, MultiPolygon};
use geojson::GeoJson;

/// SRID all stored geometry and centroid locations use (WGS 84).
pub const STORAGE_SRID: u32 = 4326;

/// Encodes a [`MultiPolygon`] as a `GeoJSON` geometry string.
#[must_use]
pub fn to_geojson(multi_polygon: &MultiPolygon<f64>) -> String {
    geojson::Geometry::new(geojson::Value::from(multi_polygon)).to_string()
}

/// Parses a `GeoJSON` string into a [`MultiPolygon`].
///
/// Accepts bare geometries and single features, `Polygon` and
/// `MultiPolygon`, and geometry collections whose polygonal members are
/// merged.
#[must_use]
pub fn parse_multipolygon(geojson_str: &str) -> Option<MultiPolygon<f64>> {
    let geojson: GeoJson = geojson_str.parse().ok()?;
    let geometry = match geojson {
        GeoJson::Geometry(geometry) => geometry,
        GeoJson::Feature(feature) => feature.geometry?,
        GeoJson::FeatureCollection(_) => return None,
    };
    let geometry: Geometry<f64> = geometry.try_into().ok()?;
    into_multipolygon(geometry)
}

/// Converts any polygonal [`Geometry`] into a [`MultiPolygon`].
#[must_use]
pub fn into_multipolygon(geometry: Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::MultiPolygon(mp) => Some(mp),
        Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
        Geometry::GeometryCollection(collection) => {
            let polygons: Vec<_> = collection
                .into_iter()
                .filter_map(into_multipolygon)
                .flat_map(|mp| mp.0)
                .collect();
            if polygons.is_empty() {
                None
            } else {
                Some(MultiPolygon(polygons))
            }
        }
        _ => None,
    }
}
