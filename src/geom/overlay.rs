use geo::{Area, BooleanOps, BoundingRect};

use super::bbox::envelope;
use crate::geom::Geometries;

/// The region a unit shares the most area with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Assignment {
    pub region: usize,
    pub area: f64,
}

impl Geometries {
    /// For each shape in `self`, the shape in `regions` with the largest
    /// positive intersection area.
    ///
    /// Region candidates are visited in layer order and only a strictly
    /// larger area replaces the current best, so ties go to the first region.
    /// Zero-area contacts (shared edges) never count.
    pub(crate) fn largest_overlap(&self, regions: &Geometries) -> Vec<Option<Assignment>> {
        self.shapes().iter()
            .map(|shape| {
                let Some(rect) = shape.bounding_rect() else { return None };
                let mut candidates: Vec<usize> = regions.query(&envelope(&rect)).collect();
                candidates.sort_unstable();

                let mut best: Option<Assignment> = None;
                for region in candidates {
                    let area = shape.intersection(&regions.shapes()[region]).unsigned_area();
                    if area > 0.0 && best.is_none_or(|b| area > b.area) {
                        best = Some(Assignment { region, area });
                    }
                }
                best
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::{fixtures::{rect, square}, Crs};
    use approx::assert_relative_eq;

    fn statcan() -> Crs { Crs::from_epsg(3347).unwrap() }

    #[test]
    fn larger_share_wins() {
        let regions = Geometries::new(vec![rect(0.0, 0.0, 6.0, 10.0), rect(6.0, 0.0, 20.0, 10.0)], statcan());
        let units = Geometries::new(vec![rect(2.0, 0.0, 8.0, 1.0)], statcan());

        let hit = units.largest_overlap(&regions)[0].unwrap();
        assert_eq!(hit.region, 0);
        assert_relative_eq!(hit.area, 4.0, epsilon = 1e-9);
    }

    #[test]
    fn tie_goes_to_first_region() {
        let regions = Geometries::new(vec![rect(5.0, 0.0, 10.0, 10.0), rect(0.0, 0.0, 5.0, 10.0)], statcan());
        let units = Geometries::new(vec![rect(3.0, 0.0, 7.0, 1.0)], statcan());
        assert_eq!(units.largest_overlap(&regions)[0].unwrap().region, 0);
    }

    #[test]
    fn edge_contact_is_unassigned() {
        let regions = Geometries::new(vec![square(0.0, 0.0, 1.0)], statcan());
        let units = Geometries::new(vec![square(1.0, 0.0, 1.0), square(5.0, 5.0, 1.0)], statcan());
        assert_eq!(units.largest_overlap(&regions), vec![None, None]);
    }
}
