use geo::{BooleanOps, MultiPolygon, Validation};

use crate::geom::Geometries;

/// Invalid-geometry counts around a repair pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RepairStats {
    pub invalid_before: usize,
    pub invalid_after: usize,
}

/// Rebuild a shape by unioning its parts one at a time.
///
/// Boolean ops fill a single MultiPolygon even-odd, so overlapping parts have
/// to enter as separate operands to be merged rather than cut out.
/// Valid shapes are returned unchanged.
fn repair(shape: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    if shape.is_valid() {
        return shape.clone();
    }
    shape.0.iter().fold(MultiPolygon::new(vec![]), |acc, part| {
        acc.union(&MultiPolygon::new(vec![part.clone()]))
    })
}

impl Geometries {
    /// Repair invalid shapes in place. Shapes still invalid afterwards are
    /// kept as they are and only counted.
    pub(crate) fn repair(&mut self) -> RepairStats {
        let mut stats = RepairStats::default();
        let shapes = self.shapes().iter()
            .map(|shape| {
                if shape.is_valid() {
                    return shape.clone();
                }
                stats.invalid_before += 1;
                let fixed = repair(shape);
                if fixed.is_valid() && !fixed.0.is_empty() {
                    fixed
                } else {
                    stats.invalid_after += 1;
                    shape.clone()
                }
            })
            .collect();
        self.replace_shapes(shapes);
        stats
    }
}
