mod bbox;
mod crs;
mod geom;
mod join;
mod overlay;
mod repair;

use bbox::BoundingBox;
pub(crate) use bbox::{rect_covers, rects_intersect};
pub use crs::{Crs, Transformer};
pub(crate) use geom::Geometries;
#[cfg(test)]
pub(crate) use geom::fixtures;
pub(crate) use overlay::Assignment;
pub(crate) use repair::RepairStats;
