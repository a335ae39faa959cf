use geo::{BoundingRect, LineString, MultiPolygon};

use crate::io::raster::Raster;

/// Categorical pixel counts inside one footprint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(super) struct ZonalCounts {
    /// Pixels whose value is not nodata.
    pub total: u64,
    /// Pixels per requested class, in request order.
    pub classes: Vec<u64>,
}

/// x coordinates where the rings of `shape` cross the horizontal line `y`.
fn crossings(shape: &MultiPolygon<f64>, y: f64, out: &mut Vec<f64>) {
    let mut visit = |ring: &LineString<f64>| {
        for edge in ring.lines() {
            let (a, b) = (edge.start, edge.end);
            // Half-open rule so a vertex on the line is counted once.
            if (a.y > y) != (b.y > y) {
                out.push(a.x + (y - a.y) * (b.x - a.x) / (b.y - a.y));
            }
        }
    };
    for polygon in &shape.0 {
        visit(polygon.exterior());
        polygon.interiors().iter().for_each(&mut visit);
    }
}

/// Count pixels whose centre lies inside `shape`, using an even-odd scanline
/// through each pixel row's centre.
///
/// `classes` are the codes to count separately; `nodata` pixels are skipped
/// entirely.
pub(super) fn zonal_counts(raster: &Raster, shape: &MultiPolygon<f64>, nodata: u16, classes: &[u16]) -> ZonalCounts {
    let mut counts = ZonalCounts { total: 0, classes: vec![0; classes.len()] };
    let Some(bbox) = shape.bounding_rect() else { return counts };
    let t = &raster.transform;
    let (rows, cols) = (raster.rows() as f64, raster.cols() as f64);

    // Pixel centres sit at half-integer row/col positions.
    let (r0, r1) = {
        let (a, b) = (t.row_of(bbox.min().y), t.row_of(bbox.max().y));
        (a.min(b), a.max(b))
    };
    let row_start = (r0 - 0.5).ceil().clamp(0.0, rows) as usize;
    let row_end = ((r1 - 0.5).floor() + 1.0).clamp(0.0, rows) as usize;

    let mut xs = Vec::new();
    for row in row_start..row_end {
        let y = t.pixel_centre(0, row).y;
        xs.clear();
        crossings(shape, y, &mut xs);
        if xs.len() < 2 {
            continue;
        }
        xs.sort_by(f64::total_cmp);

        for span in xs.chunks_exact(2) {
            let (c0, c1) = {
                let (a, b) = (t.col_of(span[0]), t.col_of(span[1]));
                (a.min(b), a.max(b))
            };
            // Centre c + 0.5 must satisfy c0 <= c + 0.5 < c1.
            let col_start = (c0 - 0.5).ceil().clamp(0.0, cols) as usize;
            let col_end = (c1 - 0.5).ceil().clamp(0.0, cols) as usize;
            for &value in raster.data.row(row).iter().take(col_end).skip(col_start) {
                if value == nodata {
                    continue;
                }
                counts.total += 1;
                if let Some(i) = classes.iter().position(|&code| code == value) {
                    counts.classes[i] += 1;
                }
            }
        }
    }
    counts
}
