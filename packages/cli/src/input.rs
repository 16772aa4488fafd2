//! Readers for geography `GeoJSON` and Census centroid/block CSV files.

use std::io::Read;
use std::path::Path;

use bonus_map_geography_models::geometry::parse_multipolygon;
use bonus_map_geography_models::{
    CensusBlock, CentroidKey, Geography, GeographyKind, PopulationCentroid, SourceMetadata,
};
use serde::Deserialize;

/// Input file errors.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    /// I/O error reading the file.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not a `GeoJSON` feature collection.
    #[error("Invalid GeoJSON in {path}: {message}")]
    GeoJson {
        /// Path to the file.
        path: String,
        /// Description of what went wrong.
        message: String,
    },

    /// CSV parsing error.
    #[error("CSV error in {path}: {source}")]
    Csv {
        /// Path to the CSV file.
        path: String,
        /// Underlying CSV error.
        source: csv::Error,
    },
}

/// Where a geography file came from, attached to every feature.
#[derive(Debug, Clone)]
pub struct GeographyFile<'a> {
    /// Kind of every feature in the file.
    pub kind: GeographyKind,
    /// Dataset label.
    pub dataset: Option<&'a str>,
    /// Dataset vintage.
    pub vintage: Option<&'a str>,
}

fn first_str(props: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match &props[*key] {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn first_count(props: &serde_json::Value, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| {
        let value = &props[*key];
        value
            .as_u64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
    })
}

/// Parses a `GeoJSON` feature collection of polygonal features.
///
/// Ids come from `id`, `GEOID` or `ZCTA5CE20`; names from `name` or
/// `NAME`; FIPS codes from `fips` or `GEOID`; populations from
/// `population` or `POP`. Features without an id or polygonal geometry
/// are skipped.
///
/// # Errors
///
/// Returns [`InputError::GeoJson`] if the text is not a feature collection.
pub fn parse_geographies(
    text: &str,
    file: &GeographyFile<'_>,
    path: &str,
) -> Result<Vec<Geography>, InputError> {
    let json: serde_json::Value = serde_json::from_str(text).map_err(|e| InputError::GeoJson {
        path: path.to_string(),
        message: e.to_string(),
    })?;
    let Some(features) = json["features"].as_array() else {
        return Err(InputError::GeoJson {
            path: path.to_string(),
            message: "missing features array".to_string(),
        });
    };

    let mut geographies = Vec::with_capacity(features.len());
    for feature in features {
        let props = &feature["properties"];
        let Some(id) = first_str(props, &["id", "GEOID", "ZCTA5CE20"])
            .or_else(|| first_str(feature, &["id"]))
        else {
            log::debug!("Skipping {} feature without an id", file.kind);
            continue;
        };

        let geometry = serde_json::to_string(&feature["geometry"]).unwrap_or_default();
        let Some(geometry) = parse_multipolygon(&geometry) else {
            log::warn!("Skipping {} {id}: geometry is not polygonal", file.kind);
            continue;
        };

        geographies.push(Geography {
            name: first_str(props, &["name", "NAME"]).unwrap_or_else(|| id.clone()),
            kind: file.kind,
            fips: first_str(props, &["fips", "GEOID"]),
            geometry,
            population: first_count(props, &["population", "POP"]),
            source: SourceMetadata {
                dataset: file.dataset.map(str::to_string),
                vintage: file.vintage.map(str::to_string),
            },
            id,
        });
    }

    Ok(geographies)
}

/// Reads a `GeoJSON` geography file from disk.
///
/// # Errors
///
/// Returns [`InputError`] if the file cannot be read or parsed.
pub fn read_geographies(path: &Path, file: &GeographyFile<'_>) -> Result<Vec<Geography>, InputError> {
    let display = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|source| InputError::Io {
        path: display.clone(),
        source,
    })?;
    parse_geographies(&text, file, &display)
}

/// Row of the Census population-weighted block group centroid file
/// (`CenPop2020_Mean_BG`).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
struct CentroidRow {
    statefp: String,
    countyfp: String,
    tractce: String,
    blkgrpce: String,
    population: u64,
    latitude: f64,
    longitude: f64,
}

/// Census block row: the block group columns plus `BLOCKCE`, `POP`, `HU`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
struct BlockRow {
    statefp: String,
    countyfp: String,
    tractce: String,
    blkgrpce: String,
    blockce: String,
    pop: u64,
    hu: u64,
    latitude: f64,
    longitude: f64,
}

const fn key(state: String, county: String, tract: String, block_group: String) -> CentroidKey {
    CentroidKey {
        state,
        county,
        tract,
        block_group,
    }
}

fn csv_rows<T: for<'de> Deserialize<'de>>(
    reader: impl Read,
    path: &str,
) -> Result<Vec<T>, InputError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    for result in reader.deserialize::<T>() {
        match result {
            Ok(row) => rows.push(row),
            Err(e) if e.is_io_error() => {
                return Err(InputError::Csv {
                    path: path.to_string(),
                    source: e,
                });
            }
            Err(e) => log::trace!("  skipping malformed row: {e}"),
        }
    }
    Ok(rows)
}

/// Parses population-weighted centroids from CSV.
///
/// # Errors
///
/// Returns [`InputError::Csv`] if the reader fails.
pub fn parse_centroids(reader: impl Read, path: &str) -> Result<Vec<PopulationCentroid>, InputError> {
    Ok(csv_rows::<CentroidRow>(reader, path)?
        .into_iter()
        .map(|r| PopulationCentroid {
            key: key(r.statefp, r.countyfp, r.tractce, r.blkgrpce),
            lat: r.latitude,
            lon: r.longitude,
            population: r.population,
        })
        .collect())
}

/// Parses census blocks from CSV.
///
/// # Errors
///
/// Returns [`InputError::Csv`] if the reader fails.
pub fn parse_blocks(reader: impl Read, path: &str) -> Result<Vec<CensusBlock>, InputError> {
    Ok(csv_rows::<BlockRow>(reader, path)?
        .into_iter()
        .map(|r| CensusBlock {
            key: key(r.statefp, r.countyfp, r.tractce, r.blkgrpce),
            block: r.blockce,
            lat: r.latitude,
            lon: r.longitude,
            population: r.pop,
            housing_units: r.hu,
        })
        .collect())
}

fn open(path: &Path) -> Result<std::fs::File, InputError> {
    std::fs::File::open(path).map_err(|source| InputError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Reads a centroid CSV from disk.
///
/// # Errors
///
/// Returns [`InputError`] if the file cannot be read.
pub fn read_centroids(path: &Path) -> Result<Vec<PopulationCentroid>, InputError> {
    parse_centroids(open(path)?, &path.display().to_string())
}

/// Reads a census block CSV from disk.
///
/// # Errors
///
/// Returns [`InputError`] if the file cannot be read.
pub fn read_blocks(path: &Path) -> Result<Vec<CensusBlock>, InputError> {
    parse_blocks(open(path)?, &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const COUNTIES: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": { "GEOID": "17031", "NAME": "Cook", "POP": "5275541" },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]
                }
            },
            {
                "type": "Feature",
                "properties": { "GEOID": "06037", "NAME": "Los Angeles" },
                "geometry": { "type": "Point", "coordinates": [0, 0] }
            },
            {
                "type": "Feature",
                "properties": { "NAME": "Nameless" },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]
                }
            }
        ]
    }"#;

    fn counties() -> GeographyFile<'static> {
        GeographyFile {
            kind: GeographyKind::County,
            dataset: Some("tiger_counties"),
            vintage: Some("2023"),
        }
    }

    #[test]
    fn keeps_polygonal_features_with_ids() {
        let geographies = parse_geographies(COUNTIES, &counties(), "counties.geojson").unwrap();
        assert_eq!(geographies.len(), 1);

        let cook = &geographies[0];
        assert_eq!(cook.id, "17031");
        assert_eq!(cook.fips.as_deref(), Some("17031"));
        assert_eq!(cook.name, "Cook");
        assert_eq!(cook.population, Some(5_275_541));
        assert_eq!(cook.source.vintage.as_deref(), Some("2023"));
    }

    #[test]
    fn rejects_non_collections() {
        let err = parse_geographies("{\"type\": \"Point\"}", &counties(), "x.geojson").unwrap_err();
        assert!(matches!(err, InputError::GeoJson { .. }));
    }

    #[test]
    fn parses_census_centroids() {
        let csv = "STATEFP,COUNTYFP,TRACTCE,BLKGRPCE,POPULATION,LATITUDE,LONGITUDE\n\
                   17,031,010100,1,1040,+42.021,-87.668\n\
                   17,031,010100,2,bad,+42.019,-87.671\n";
        let centroids = parse_centroids(csv.as_bytes(), "bg.csv").unwrap();

        assert_eq!(centroids.len(), 1, "malformed rows are skipped");
        assert_eq!(centroids[0].key.geoid(), "170310101001");
        assert_eq!(centroids[0].population, 1040);
        assert!((centroids[0].lon + 87.668).abs() < 1e-9);
    }

    #[test]
    fn parses_census_blocks() {
        let csv = "STATEFP,COUNTYFP,TRACTCE,BLKGRPCE,BLOCKCE,POP,HU,LATITUDE,LONGITUDE\n\
                   66,010,950100,1,1001,42,10,13.47,144.75\n";
        let blocks = parse_blocks(csv.as_bytes(), "blocks.csv").unwrap();

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].block, "1001");
        assert_eq!(blocks[0].housing_units, 10);
        assert_eq!(blocks[0].key.prefix(bonus_map_geography_models::fips::FipsLevel::County), "66010");
    }
}
