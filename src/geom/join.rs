use geo::{Area, BooleanOps, MultiPolygon, Point, Within};
use rstar::AABB;

use crate::geom::Geometries;

impl Geometries {
    /// For each shape, whether its interior point lies within `mask`.
    /// Shapes without an interior point are dropped.
    pub(crate) fn representative_point_within(&self, mask: &MultiPolygon<f64>) -> Vec<bool> {
        self.interior_points().into_iter()
            .map(|pt| pt.is_some_and(|pt| pt.is_within(mask)))
            .collect()
    }

    /// For each shape, whether at least `min_fraction` of its area overlaps `mask`.
    pub(crate) fn overlap_fraction_at_least(&self, mask: &MultiPolygon<f64>, min_fraction: f64) -> Vec<bool> {
        self.shapes().iter()
            .map(|shape| {
                let area = shape.unsigned_area();
                area > 0.0 && shape.intersection(mask).unsigned_area() / area >= min_fraction
            })
            .collect()
    }

    /// `(point, shape)` index pairs for every point strictly within a shape.
    ///
    /// A point inside several overlapping shapes is paired with each of them.
    /// Pairs are ordered by point, then by shape.
    pub(crate) fn points_within(&self, points: &[Point<f64>]) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        for (i, pt) in points.iter().enumerate() {
            let env = AABB::from_point([pt.x(), pt.y()]);
            let mut hits: Vec<usize> = self.query(&env)
                .filter(|&j| pt.is_within(&self.shapes()[j]))
                .collect();
            hits.sort_unstable();
            pairs.extend(hits.into_iter().map(|j| (i, j)));
        }
        pairs
    }
}
