//! Stage 3: adaptive capacity from landcover vegetation fractions.

mod zonal;

use anyhow::Result;
use geo::Area;
use polars::prelude::{Column, DataFrame};

use zonal::zonal_counts;

use crate::{
    common::{min_max, DebugReport},
    config::{AdaptiveConfig, Config},
    error::Error,
    geom::{rects_intersect, Crs},
    io::{csv::write_table, raster::{GeoTiff, Raster}},
    layer::{UnitLayer, ID_COLUMN},
    pack::{AoiPackage, DiskPack},
    pipeline::{Artifacts, Stage},
};

/// Stage 3 outputs held in memory.
pub(crate) struct Adaptive {
    pub table: DataFrame,
    pub report: DebugReport,
}

fn off_raster(crs: Crs) -> Error {
    Error::degenerate(
        "the raster extent filter",
        format!("no unit overlaps the landcover raster; check that the raster CRS ({crs}) is right"),
    )
}

/// Zonal vegetation statistics for every unit overlapping the raster.
///
/// Units outside the raster extent get no row. Units inside it with no
/// valid pixel get a row whose counts, fractions and index are null.
pub(crate) fn aggregate(units: &UnitLayer, raster: &Raster, config: &AdaptiveConfig) -> Result<Adaptive> {
    let units = units.reproject(raster.crs)?;
    let extent = raster.extent();
    let nodata = raster.nodata.unwrap_or(config.nodata);
    let codes: Vec<u16> = config.classes.iter().map(|class| class.code).collect();

    let mut inside: Vec<usize> = (0..units.len())
        .filter(|&i| units.geoms().bounds_of(i).is_some_and(|rect| rects_intersect(&rect, &extent)))
        .collect();
    if inside.is_empty() {
        return Err(off_raster(raster.crs).into());
    }
    inside.sort_by(|&a, &b| units.ids()[a].cmp(&units.ids()[b]));
    tracing::debug!(before = units.len(), after = inside.len(), "[adaptive] extent filter");

    let pixel_area = raster.transform.pixel_area();
    let n = inside.len();
    let mut area = Vec::with_capacity(n);
    let mut total: Vec<Option<u64>> = Vec::with_capacity(n);
    let mut pixels: Vec<Vec<Option<u64>>> = vec![Vec::with_capacity(n); codes.len()];
    for &i in &inside {
        let shape = &units.geoms().shapes()[i];
        area.push(shape.unsigned_area());
        let counts = zonal_counts(raster, shape, nodata, &codes);
        let valid = counts.total > 0;
        total.push(valid.then_some(counts.total));
        for (column, count) in pixels.iter_mut().zip(counts.classes) {
            column.push(valid.then_some(count));
        }
    }

    let fractions: Vec<Vec<Option<f64>>> = pixels.iter()
        .map(|column| column.iter().zip(&total)
            .map(|(count, total)| Some(count.as_ref().copied()? as f64 / total.as_ref().copied()? as f64))
            .collect())
        .collect();
    let green_frac: Vec<Option<f64>> = (0..n)
        .map(|row| fractions.iter().map(|col| col[row]).sum::<Option<f64>>())
        .collect();
    let green_pixels: Vec<Option<u64>> = (0..n)
        .map(|row| pixels.iter().map(|col| col[row]).sum::<Option<u64>>())
        .collect();
    let green_area: Vec<Option<f64>> = green_pixels.iter().map(|p| p.map(|p| p as f64 * pixel_area)).collect();
    let index = min_max(&green_frac);

    let empty = total.iter().filter(|t| t.is_none()).count();
    if empty > 0 {
        tracing::warn!(units = empty, "[adaptive] units with no valid pixel left null");
    }

    let mut report = DebugReport::new("Stage 3: adaptive capacity");
    report.section("raster")
        .line("path", raster.path.display())
        .line("CRS", raster.crs)
        .line("grid size", format!("{} x {}", raster.grid.0, raster.grid.1))
        .line("window size", format!("{} x {}", raster.cols(), raster.rows()))
        .line("pixel size", format!("{} x {}", raster.transform.pixel_width.abs(), raster.transform.pixel_height.abs()))
        .line("pixel area", pixel_area)
        .line("nodata", nodata)
        .line("classes", config.classes.iter().map(|c| format!("{}={}", c.code, c.label)).collect::<Vec<_>>().join(", "));
    report.section("units")
        .line("units in AOI", units.len())
        .line("units overlapping raster", n)
        .line("units with no valid pixel", empty);
    report.section("missingness")
        .missingness("green_frac", &green_frac)
        .missingness("adaptive_capacity_index", &index);
    report.section("distribution").describe("green_frac", &green_frac);
    for (class, fraction) in config.classes.iter().zip(&fractions) {
        report.describe(&format!("frac_{}", class.label), fraction);
    }

    let ids: Vec<&str> = inside.iter().map(|&i| units.ids()[i].as_str()).collect();
    let mut columns = vec![
        Column::new(ID_COLUMN.into(), ids),
        Column::new("da_area_m2".into(), area),
        Column::new("total_pixels".into(), total),
    ];
    for (class, column) in config.classes.iter().zip(pixels) {
        columns.push(Column::new(format!("pixels_{}", class.label).into(), column));
    }
    for (class, column) in config.classes.iter().zip(fractions) {
        columns.push(Column::new(format!("frac_{}", class.label).into(), column));
    }
    columns.extend([
        Column::new("green_frac".into(), green_frac),
        Column::new("green_pixels".into(), green_pixels),
        Column::new("green_area_m2".into(), green_area),
        Column::new("adaptive_capacity_index".into(), index),
    ]);

    Ok(Adaptive { table: DataFrame::new(columns)?, report })
}

pub(crate) fn run(config: &Config, artifacts: &Artifacts) -> Result<()> {
    let package = AoiPackage::read(&DiskPack::new(artifacts.aoi_package()))?;
    let path = config.landcover_input()?;
    tracing::info!(path = %path.display(), "[adaptive] reading landcover raster");
    let tiff = GeoTiff::open(&path, config.crs.raster)?;

    // Decode only the part of the raster under the AOI.
    let units = package.units.reproject(tiff.crs)?;
    let crs = tiff.crs;
    let bounds = units.geoms().bounds()
        .ok_or_else(|| Error::degenerate("the unit layer", "the AOI package has no unit geometry"))?;
    let raster = tiff.read_window(&bounds)?.ok_or_else(|| off_raster(crs))?;

    let result = aggregate(&units, &raster, &config.adaptive)?;
    write_table(&result.table, &artifacts.adaptive())?;
    result.report.write(&artifacts.report(Stage::Adaptive))?;
    tracing::info!(units = result.table.height(), "[adaptive] wrote scores");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{geom::fixtures::rect, io::{csv::read_table, raster::fixtures::{raster, write_geotiff}}};
    use approx::assert_relative_eq;

    fn units(shapes: Vec<geo::MultiPolygon<f64>>) -> UnitLayer {
        let ids: Vec<String> = (0..shapes.len()).map(|i| format!("{:04}", shapes.len() - i)).collect();
        let attrs = DataFrame::new(vec![Column::new(ID_COLUMN.into(), ids)]).unwrap();
        UnitLayer::from_shapes(attrs, shapes, Crs::from_epsg(3979).unwrap()).unwrap()
    }

    fn grid() -> Raster {
        raster(
            vec![
                vec![6, 6, 7, 0],
                vec![6, 1, 7, 0],
                vec![0, 0, 1, 1],
                vec![0, 0, 1, 1],
            ],
            0.0,
            4.0,
        )
    }

    fn floats(df: &DataFrame, name: &str) -> Vec<Option<f64>> {
        df.column(name).unwrap().cast(&polars::prelude::DataType::Float64).unwrap()
            .f64().unwrap().into_iter().collect()
    }

    #[test]
    fn fractions_and_green_share() {
        let config = AdaptiveConfig::default();
        // "0002" covers the top-left 2x2 block, "0001" the right half.
        let layer = units(vec![rect(0.0, 2.0, 2.0, 4.0), rect(2.0, 0.0, 4.0, 4.0)]);
        let result = aggregate(&layer, &grid(), &config).unwrap();
        let table = &result.table;

        let ids: Vec<Option<&str>> = table.column(ID_COLUMN).unwrap().str().unwrap().into_iter().collect();
        assert_eq!(ids, vec![Some("0001"), Some("0002")]);
        assert_eq!(floats(table, "total_pixels"), vec![Some(6.0), Some(4.0)]);
        assert_eq!(floats(table, "pixels_coniferous"), vec![Some(0.0), Some(3.0)]);

        let green = floats(table, "green_frac");
        assert_relative_eq!(green[0].unwrap(), 2.0 / 6.0);
        assert_relative_eq!(green[1].unwrap(), 3.0 / 4.0);
        assert_eq!(floats(table, "adaptive_capacity_index"), vec![Some(0.0), Some(1.0)]);
        assert_eq!(floats(table, "green_area_m2"), vec![Some(2.0), Some(3.0)]);
        assert_eq!(floats(table, "da_area_m2"), vec![Some(8.0), Some(4.0)]);
    }

    #[test]
    fn all_nodata_unit_is_null_not_zero() {
        let layer = units(vec![rect(0.0, 0.0, 2.0, 2.0), rect(0.0, 2.0, 2.0, 4.0)]);
        let result = aggregate(&layer, &grid(), &AdaptiveConfig::default()).unwrap();
        // Sorted: "0001" is the top block, "0002" the all-nodata bottom block.
        assert_eq!(floats(&result.table, "total_pixels"), vec![Some(4.0), None]);
        assert_eq!(floats(&result.table, "green_frac")[1], None);
        assert_eq!(floats(&result.table, "adaptive_capacity_index"), vec![None, None]);
        assert!(result.report.as_str().contains("units with no valid pixel: 1"));
    }

    #[test]
    fn units_off_raster_have_no_row() {
        let layer = units(vec![rect(0.0, 2.0, 2.0, 4.0), rect(100.0, 100.0, 101.0, 101.0)]);
        let result = aggregate(&layer, &grid(), &AdaptiveConfig::default()).unwrap();
        assert_eq!(result.table.height(), 1);
    }

    #[test]
    fn nothing_on_raster_is_degenerate() {
        let layer = units(vec![rect(100.0, 100.0, 101.0, 101.0)]);
        let err = aggregate(&layer, &grid(), &AdaptiveConfig::default()).err().unwrap();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Degenerate { .. })));
    }

    #[test]
    fn stage_reads_landcover_geotiff() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_root(dir.path());
        let artifacts = Artifacts::new(&config);
        crate::pack::fixtures::package().write(&mut DiskPack::new(artifacts.aoi_package())).unwrap();

        // 50 m pixels over the three 100 m fixture units; the file declares 255 as nodata.
        let (x0, y0) = (4_000_000.0, 2_000_100.0);
        let landcover = config.paths.raw().join("landcover");
        std::fs::create_dir_all(&landcover).unwrap();
        let rows: Vec<Vec<u8>> = vec![vec![6, 6, 6, 1, 255, 255], vec![6, 6, 7, 1, 255, 255]];
        write_geotiff(&landcover.join("lc2020.tif"), &rows, (x0, y0), 50.0, 3347, Some("255"));

        run(&config, &artifacts).unwrap();
        let table = read_table(&artifacts.adaptive(), ID_COLUMN).unwrap();
        let ids: Vec<Option<&str>> = table.column(ID_COLUMN).unwrap().str().unwrap().into_iter().collect();
        assert_eq!(ids, vec![Some("A"), Some("B"), Some("C")]);
        assert_eq!(floats(&table, "total_pixels"), vec![Some(4.0), Some(4.0), None]);
        assert_eq!(floats(&table, "green_frac"), vec![Some(1.0), Some(0.5), None]);
        assert_eq!(floats(&table, "adaptive_capacity_index"), vec![Some(1.0), Some(0.0), None]);
        assert_eq!(floats(&table, "green_area_m2"), vec![Some(10_000.0), Some(5_000.0), None]);

        let report = std::fs::read_to_string(artifacts.report(Stage::Adaptive)).unwrap();
        assert!(report.contains("nodata: 255"));
        assert!(report.contains("grid size: 6 x 2"));
    }
}
