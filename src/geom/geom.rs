use anyhow::Result;
use geo::{BooleanOps, BoundingRect, InteriorPoint, MultiPolygon, Point, Rect, Simplify};
use rstar::{RTree, AABB};

use super::bbox::merge;
use crate::geom::{BoundingBox, Crs, Transformer};

/// Geometries represents a collection of MultiPolygons in one CRS, indexed for spatial lookup.
#[derive(Debug, Clone)]
pub(crate) struct Geometries {
    shapes: Vec<MultiPolygon<f64>>,
    rtree: RTree<BoundingBox>,
    crs: Crs,
}

impl Geometries {
    /// Construct a Geometries object from a vector of MultiPolygons.
    /// Empty shapes are kept but never returned by spatial queries.
    pub(crate) fn new(shapes: Vec<MultiPolygon<f64>>, crs: Crs) -> Self {
        Self {
            rtree: RTree::bulk_load(
                shapes.iter().enumerate()
                    .filter_map(|(i, shape)| shape.bounding_rect().map(|rect| BoundingBox::new(i, rect)))
                    .collect()
            ),
            shapes,
            crs,
        }
    }

    #[inline] pub(crate) fn len(&self) -> usize { self.shapes.len() }

    #[inline] pub(crate) fn shapes(&self) -> &[MultiPolygon<f64>] { &self.shapes }

    #[inline] pub(crate) fn crs(&self) -> Crs { self.crs }

    /// Indices of shapes whose bounding boxes intersect the given envelope.
    #[inline]
    pub(super) fn query(&self, envelope: &AABB<[f64; 2]>) -> impl Iterator<Item = usize> + '_ {
        self.rtree.locate_in_envelope_intersecting(envelope).map(|bb| bb.idx())
    }

    /// Compute the bounding rectangle of all MultiPolygons.
    pub(crate) fn bounds(&self) -> Option<Rect<f64>> {
        self.shapes.iter()
            .filter_map(|shape| shape.bounding_rect())
            .reduce(merge)
    }

    /// Bounding rectangle of one shape; `None` if it is empty.
    #[inline]
    pub(crate) fn bounds_of(&self, idx: usize) -> Option<Rect<f64>> {
        self.shapes[idx].bounding_rect()
    }

    /// A point guaranteed inside each shape; `None` for empty shapes.
    pub(crate) fn interior_points(&self) -> Vec<Option<Point<f64>>> {
        self.shapes.iter().map(|shape| shape.interior_point()).collect()
    }

    /// Dissolve all shapes into one MultiPolygon.
    ///
    /// Unions pairwise in a balanced tree so that the intermediate shapes stay
    /// small; a left fold over a few hundred regions is much slower.
    pub(crate) fn union(&self) -> Option<MultiPolygon<f64>> {
        let mut level: Vec<MultiPolygon<f64>> = self.shapes.iter()
            .filter(|shape| !shape.0.is_empty())
            .cloned()
            .collect();
        while level.len() > 1 {
            level = level.chunks(2)
                .map(|pair| match pair {
                    [a, b] => a.union(b),
                    [a] => a.clone(),
                    _ => MultiPolygon::new(vec![]),
                })
                .collect();
        }
        level.pop()
    }

    /// Reproject every shape into `to`, returning a new index.
    pub(crate) fn reproject(&self, to: Crs) -> Result<Self> {
        if to == self.crs {
            return Ok(self.clone());
        }
        let transformer = Transformer::new(self.crs, to)?;
        let shapes = self.shapes.iter()
            .map(|shape| transformer.multi_polygon(shape))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(shapes, to))
    }

    /// Subset of shapes by index, in the order given.
    pub(crate) fn select(&self, indices: &[usize]) -> Self {
        Self::new(indices.iter().map(|&i| self.shapes[i].clone()).collect(), self.crs)
    }

    /// Douglas-Peucker simplification for export; `tolerance` is a distance in CRS units.
    pub(crate) fn simplified(&self, tolerance: f64) -> Vec<MultiPolygon<f64>> {
        if tolerance <= 0.0 {
            return self.shapes.clone();
        }
        self.shapes.iter()
            .map(|shape| shape.simplify(&tolerance))
            .collect()
    }

    /// Replace the shapes, rebuilding the index.
    pub(super) fn replace_shapes(&mut self, shapes: Vec<MultiPolygon<f64>>) {
        *self = Self::new(shapes, self.crs);
    }
}
