//! Polygon overlay with validity checks.

use geo::{Area, BooleanOps, MultiPolygon, Validation};

/// A geometry that cannot take part in an overlay.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeometryError {
    /// Input polygon is not valid (self-intersection, bad ring, ...).
    #[error("Invalid geometry for {id}")]
    Invalid {
        /// Identifier of the offending geometry.
        id: String,
    },

    /// Intersection of two geometries could not be represented as a
    /// polygon.
    #[error("Non-polygonal intersection between {left} and {right}")]
    NonPolygonal {
        /// Left-hand geometry id.
        left: String,
        /// Right-hand geometry id.
        right: String,
    },
}

/// Intersects two boundaries after checking both are valid.
///
/// Returns `Ok(None)` when they do not overlap with positive area.
///
/// # Errors
///
/// Returns [`GeometryError::Invalid`] naming the first invalid input.
pub fn overlay(
    left_id: &str,
    left: &MultiPolygon<f64>,
    right_id: &str,
    right: &MultiPolygon<f64>,
) -> Result<Option<MultiPolygon<f64>>, GeometryError> {
    if !left.is_valid() {
        return Err(GeometryError::Invalid {
            id: left_id.to_string(),
        });
    }
    if !right.is_valid() {
        return Err(GeometryError::Invalid {
            id: right_id.to_string(),
        });
    }

    let shared = left.intersection(right);
    if shared.0.is_empty() || shared.unsigned_area() <= 0.0 {
        Ok(None)
    } else {
        Ok(Some(shared))
    }
}
