#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! In-memory spatial indexes for geography matching.
//!
//! Boundaries are bulk-loaded into an R-tree keyed by their bounding box
//! so that overlap and point-in-polygon queries only run exact geometry
//! predicates against envelope candidates. Used by the in-memory stores
//! and by areal interpolation.

pub mod crs;
pub mod overlay;

use geo::{BoundingRect, Contains, MultiPolygon, Point};
use rstar::primitives::GeomWithData;
use rstar::{AABB, RTree, RTreeObject};

pub use overlay::{GeometryError, overlay};

/// A boundary's bounding box stored in the R-tree with its payload.
pub struct BoundaryEntry<T> {
    /// Caller payload (typically an id or a row index).
    pub data: T,
    envelope: AABB<[f64; 2]>,
}

impl<T> RTreeObject for BoundaryEntry<T> {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// R-tree over boundary polygons.
pub struct BoundaryIndex<T> {
    tree: RTree<BoundaryEntry<T>>,
}

impl<T> BoundaryIndex<T> {
    /// Bulk-loads an index from `(payload, polygon)` pairs.
    ///
    /// Polygons without a bounding box (empty geometry) are dropped.
    #[must_use]
    pub fn build(items: impl IntoIterator<Item = (T, MultiPolygon<f64>)>) -> Self {
        let entries: Vec<_> = items
            .into_iter()
            .filter_map(|(data, polygon)| {
                let envelope = envelope_of(&polygon)?;
                Some(BoundaryEntry { data, envelope })
            })
            .collect();

        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Number of indexed boundaries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Returns `true` if nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Boundaries whose bounding box intersects the bounding box of
    /// `polygon`. This is the pre-filter only; callers still run exact
    /// predicates.
    pub fn envelope_candidates<'a>(
        &'a self,
        polygon: &MultiPolygon<f64>,
    ) -> impl Iterator<Item = &'a BoundaryEntry<T>> + 'a {
        let envelope = envelope_of(polygon);
        envelope
            .into_iter()
            .flat_map(move |env| self.tree.locate_in_envelope_intersecting(&env))
    }

}

/// R-tree over weighted points (e.g. population centroids).
pub struct PointIndex {
    tree: RTree<GeomWithData<[f64; 2], u64>>,
}

impl PointIndex {
    /// Bulk-loads `(x, y, weight)` points.
    #[must_use]
    pub fn build(points: impl IntoIterator<Item = (f64, f64, u64)>) -> Self {
        let points: Vec<_> = points
            .into_iter()
            .map(|(x, y, weight)| GeomWithData::new([x, y], weight))
            .collect();
        Self {
            tree: RTree::bulk_load(points),
        }
    }

    /// Number of indexed points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Returns `true` if nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Sums the weights of points strictly inside `polygon`, along with the
    /// number of such points.
    ///
    /// Points on the boundary are not counted.
    #[must_use]
    pub fn sum_within(&self, polygon: &MultiPolygon<f64>) -> (u64, usize) {
        let Some(envelope) = envelope_of(polygon) else {
            return (0, 0);
        };

        self.tree
            .locate_in_envelope(&envelope)
            .filter(|p| {
                let [x, y] = *p.geom();
                polygon.contains(&Point::new(x, y))
            })
            .fold((0u64, 0usize), |(sum, count), p| {
                (sum.saturating_add(p.data), count + 1)
            })
    }
}

/// Bounding box envelope for a [`MultiPolygon`], or `None` when empty.
#[must_use]
pub fn envelope_of(mp: &MultiPolygon<f64>) -> Option<AABB<[f64; 2]>> {
    mp.bounding_rect()
        .map(|rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]))
}

#[cfg(test)]
pub(crate) mod test_shapes {
    use geo::{MultiPolygon, polygon};

    /// Axis-aligned rectangle as a multipolygon.
    pub fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: x0, y: y0),
            (x: x1, y: y0),
            (x: x1, y: y1),
            (x: x0, y: y1),
        ]])
    }
}

#[cfg(test)]
mod tests {
    use super::test_shapes::rect;
    use super::*;

    #[test]
    fn envelope_candidates_prefilter() {
        let index = BoundaryIndex::build(vec![
            ("a", rect(0.0, 0.0, 1.0, 1.0)),
            ("b", rect(5.0, 5.0, 6.0, 6.0)),
        ]);
        let hits: Vec<_> = index
            .envelope_candidates(&rect(0.5, 0.5, 2.0, 2.0))
            .map(|e| e.data)
            .collect();
        assert_eq!(hits, vec!["a"]);
    }

    #[test]
    fn empty_geometry_dropped() {
        let index = BoundaryIndex::build(vec![(1, MultiPolygon::<f64>(vec![]))]);
        assert!(index.is_empty());
    }

    #[test]
    fn point_sums_exclude_outside_and_boundary() {
        let points = PointIndex::build(vec![
            (0.5, 0.5, 10),
            (0.9, 0.1, 5),
            (1.0, 0.5, 100),
            (3.0, 3.0, 1000),
        ]);
        assert_eq!(points.len(), 4);
        assert_eq!(points.sum_within(&rect(0.0, 0.0, 1.0, 1.0)), (15, 2));
        assert_eq!(points.sum_within(&rect(10.0, 10.0, 11.0, 11.0)), (0, 0));
    }
}
