//! Stage 4: heat exposure from postal-code land-surface temperature.

mod clean;

use std::{fs::File, io::{BufReader, Read}};

use anyhow::{Context, Result};
use geo::Point;
use polars::prelude::{Column, DataFrame};

use clean::{read_points, read_values, ValuedPoint};

use crate::{
    common::{mean, median, min_max, DebugReport},
    config::{Config, ExposureConfig},
    error::Error,
    geom::{rect_covers, Crs, Transformer},
    io::{csv::write_table, geojson},
    layer::{UnitLayer, ID_COLUMN},
    pack::{AoiPackage, DiskPack},
    pipeline::{Artifacts, Stage},
};

/// Stage 4 outputs held in memory.
pub(crate) struct Exposure {
    pub table: DataFrame,
    /// Points that survived the bounding-box filter, in `geographic` lon/lat.
    pub preview: Vec<ValuedPoint>,
    pub report: DebugReport,
}

/// Aggregate cleaned postal-code values to the units that contain them.
///
/// `values` and `coords` are the two raw tables; coordinates are lon/lat in
/// `geographic`. Units without a contained point get no row.
pub(crate) fn aggregate<V: Read, C: Read>(
    values: V,
    coords: C,
    units: &UnitLayer,
    geographic: Crs,
    config: &ExposureConfig,
) -> Result<Exposure> {
    let postal = read_values(values, config)?;
    if postal.stats.sentinel_removed + postal.stats.out_of_range_removed > 0 {
        tracing::warn!(
            sentinel = postal.stats.sentinel_removed,
            out_of_range = postal.stats.out_of_range_removed,
            "[exposure] nulled invalid measurements"
        );
    }
    let (points, coord_stats) = read_points(coords, &postal, config)?;
    tracing::debug!(rows = coord_stats.rows, matched = coord_stats.matched, "[exposure] merged coordinates");

    let to_units = Transformer::new(geographic, units.crs())?;
    let bounds = units.geoms().bounds()
        .ok_or_else(|| Error::degenerate("the unit layer", "the AOI package has no unit geometry"))?;
    let mut kept = Vec::new();
    let mut projected = Vec::new();
    let mut unprojectable = 0usize;
    for point in points {
        let Ok(xy) = to_units.point(Point::new(point.lon, point.lat)) else {
            unprojectable += 1;
            continue;
        };
        if rect_covers(&bounds, xy.0) {
            projected.push(xy);
            kept.push(point);
        }
    }
    if unprojectable > 0 {
        tracing::warn!(points = unprojectable, to = %units.crs(), "[exposure] dropped points that failed reprojection");
    }

    let pairs = units.geoms().points_within(&projected);
    if pairs.is_empty() {
        return Err(Error::degenerate(
            "the point-in-unit join",
            format!("no postal-code point fell inside a unit; check that coordinates are {geographic} lon/lat"),
        ).into());
    }
    let mut per_unit: Vec<Vec<f64>> = vec![Vec::new(); units.len()];
    for &(point, unit) in &pairs {
        per_unit[unit].push(kept[point].value);
    }

    let mut rows: Vec<usize> = (0..units.len()).filter(|&i| !per_unit[i].is_empty()).collect();
    rows.sort_by(|&a, &b| units.ids()[a].cmp(&units.ids()[b]));
    let means: Vec<Option<f64>> = rows.iter().map(|&i| mean(&per_unit[i])).collect();
    let medians: Vec<Option<f64>> = rows.iter().map(|&i| median(&per_unit[i])).collect();
    let counts: Vec<u32> = rows.iter().map(|&i| per_unit[i].len() as u32).collect();
    let mean_n01 = min_max(&means);
    let median_n01 = min_max(&medians);

    let stats = postal.stats;
    let mut report = DebugReport::new("Stage 4: exposure");
    report.section("values")
        .line("value field", &config.value_field)
        .line("sentinels", format!("{:?}", config.sentinels))
        .line("valid range", format!("{:?}", config.valid_range))
        .line("rows", stats.rows)
        .line("numeric before cleaning", stats.numeric_before)
        .line("sentinel removed", stats.sentinel_removed)
        .line("out-of-range removed", stats.out_of_range_removed)
        .line("valid after cleaning", stats.valid_after)
        .line("postal codes", stats.postal_codes)
        .line("duplicate postal rows", stats.duplicate_rows);
    report.section("points")
        .line("coordinate rows", coord_stats.rows)
        .line("rows with valid coordinates", coord_stats.valid_coords)
        .line("matched to a valid value", coord_stats.matched)
        .line("points failed reprojection", unprojectable)
        .line("points after unit bbox filter", kept.len())
        .line("joined points-in-unit", pairs.len())
        .line("units with exposure", rows.len());
    report.section("distribution")
        .describe("exposure_mean", &means)
        .describe("exposure_median", &medians);

    let ids: Vec<&str> = rows.iter().map(|&i| units.ids()[i].as_str()).collect();
    let table = DataFrame::new(vec![
        Column::new(ID_COLUMN.into(), ids),
        Column::new("exposure_mean".into(), means),
        Column::new("exposure_median".into(), medians),
        Column::new("n_postalcodes".into(), counts),
        Column::new("exposure_mean_n01".into(), mean_n01.clone()),
        Column::new("exposure_median_n01".into(), median_n01),
        Column::new("exposure_index".into(), mean_n01),
    ])?;
    Ok(Exposure { table, preview: kept, report })
}

fn write_preview(path: &std::path::Path, points: &[ValuedPoint], crs: Crs) -> Result<()> {
    let shapes: Vec<Point<f64>> = points.iter().map(|p| Point::new(p.lon, p.lat)).collect();
    let props = DataFrame::new(vec![
        Column::new("postalcode".into(), points.iter().map(|p| p.postal.as_str()).collect::<Vec<_>>()),
        Column::new("value".into(), points.iter().map(|p| p.value).collect::<Vec<_>>()),
    ])?;
    geojson::write_points(path, &shapes, &props, crs)
}

pub(crate) fn run(config: &Config, artifacts: &Artifacts) -> Result<()> {
    let package = AoiPackage::read(&DiskPack::new(artifacts.aoi_package()))?;
    let values_path = config.exposure_values_input()?;
    let coords_path = config.exposure_coords_input()?;
    tracing::info!(values = %values_path.display(), coords = %coords_path.display(), "[exposure] reading postal-code tables");

    let open = |path: &std::path::Path| -> Result<BufReader<File>> {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(BufReader::new(file))
    };
    let geographic = Crs::from_epsg(config.crs.geographic)?;
    let result = aggregate(open(&values_path)?, open(&coords_path)?, &package.units, geographic, &config.exposure)?;

    write_table(&result.table, &artifacts.exposure())?;
    write_preview(&artifacts.exposure_preview(), &result.preview, geographic)?;
    result.report.write(&artifacts.report(Stage::Exposure))?;
    tracing::info!(units = result.table.height(), "[exposure] wrote scores");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::fixtures::rect;
    use approx::assert_relative_eq;

    const VALUES: &str = "postalcode21,wtlst21_06\n\
        A1A1A1,30\n\
        B2B2B2,40\n\
        C3C3C3,-9999\n\
        D4D4D4,45\n\
        E5E5E5,999\n";

    fn lonlat() -> Crs { Crs::from_epsg(4326).unwrap() }

    /// Two 1-degree cells side by side, in lon/lat so no reprojection applies.
    fn units() -> UnitLayer {
        let attrs = DataFrame::new(vec![Column::new(ID_COLUMN.into(), vec!["0002", "0001"])]).unwrap();
        UnitLayer::from_shapes(attrs, vec![rect(-124.0, 49.0, -123.0, 50.0), rect(-123.0, 49.0, -122.0, 50.0)], lonlat()).unwrap()
    }

    fn coords(rows: &[&str]) -> String {
        let mut csv = String::from("POSTALCODE21,LATITUDE_21,LONGITUDE_21\n");
        for row in rows {
            csv.push_str(row);
            csv.push('\n');
        }
        csv
    }

    fn floats(df: &DataFrame, name: &str) -> Vec<Option<f64>> {
        df.column(name).unwrap().cast(&polars::prelude::DataType::Float64).unwrap()
            .f64().unwrap().into_iter().collect()
    }

    #[test]
    fn aggregates_per_unit_and_indexes_the_mean() {
        let coords = coords(&[
            "A1A1A1,49.5,-123.5",
            "B2B2B2,49.6,-123.4",
            "D4D4D4,49.5,-122.5",
            "C3C3C3,49.5,-122.4",
            "E5E5E5,49.5,-122.3",
        ]);
        let result = aggregate(VALUES.as_bytes(), coords.as_bytes(), &units(), lonlat(), &ExposureConfig::default()).unwrap();
        let table = &result.table;

        let ids: Vec<Option<&str>> = table.column(ID_COLUMN).unwrap().str().unwrap().into_iter().collect();
        assert_eq!(ids, vec![Some("0001"), Some("0002")]);
        assert_eq!(floats(table, "n_postalcodes"), vec![Some(1.0), Some(2.0)]);
        assert_eq!(floats(table, "exposure_mean"), vec![Some(45.0), Some(35.0)]);
        assert_eq!(floats(table, "exposure_index"), vec![Some(1.0), Some(0.0)]);
        assert_eq!(floats(table, "exposure_index"), floats(table, "exposure_mean_n01"));
        assert!(result.report.as_str().contains("sentinel removed: 1"));
        assert!(result.report.as_str().contains("out-of-range removed: 1"));
    }

    #[test]
    fn median_uses_midpoint() {
        let values = "postalcode21,wtlst21_06\nA1A1A1,10\nB2B2B2,20\nC3C3C3,60\n";
        let coords = coords(&["A1A1A1,49.5,-123.5", "B2B2B2,49.6,-123.4", "C3C3C3,49.7,-123.3"]);
        let result = aggregate(values.as_bytes(), coords.as_bytes(), &units(), lonlat(), &ExposureConfig::default()).unwrap();
        assert_relative_eq!(floats(&result.table, "exposure_median")[0].unwrap(), 20.0);
        assert_relative_eq!(floats(&result.table, "exposure_mean")[0].unwrap(), 30.0);
        // A single unit has no spread, so its normalized values are null.
        assert_eq!(floats(&result.table, "exposure_index"), vec![None]);
    }

    #[test]
    fn points_outside_every_unit_are_dropped() {
        let coords = coords(&["A1A1A1,49.5,-123.5", "B2B2B2,10.0,10.0"]);
        let result = aggregate(VALUES.as_bytes(), coords.as_bytes(), &units(), lonlat(), &ExposureConfig::default()).unwrap();
        assert_eq!(result.table.height(), 1);
        assert_eq!(result.preview.len(), 1);
    }

    #[test]
    fn unprojectable_points_are_dropped_and_counted() {
        let statcan = Crs::from_epsg(3347).unwrap();
        let to = Transformer::new(lonlat(), statcan).unwrap();
        let cell = to.multi_polygon(&rect(-124.0, 49.0, -123.0, 50.0)).unwrap();
        let attrs = DataFrame::new(vec![Column::new(ID_COLUMN.into(), vec!["0001"])]).unwrap();
        let units = UnitLayer::from_shapes(attrs, vec![cell], statcan).unwrap();

        // The south pole passes the coordinate range check but has no Lambert projection.
        let coords = coords(&["A1A1A1,49.5,-123.5", "B2B2B2,-90.0,-123.5"]);
        let result = aggregate(VALUES.as_bytes(), coords.as_bytes(), &units, lonlat(), &ExposureConfig::default()).unwrap();
        assert_eq!(result.table.height(), 1);
        assert_eq!(floats(&result.table, "exposure_mean"), vec![Some(30.0)]);
        assert!(result.report.as_str().contains("points failed reprojection: 1"));
    }

    #[test]
    fn no_joined_point_is_degenerate() {
        let coords = coords(&["A1A1A1,10.0,10.0"]);
        let err = aggregate(VALUES.as_bytes(), coords.as_bytes(), &units(), lonlat(), &ExposureConfig::default()).err().unwrap();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Degenerate { .. })));
    }
}
