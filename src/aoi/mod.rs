//! Stage 1: restrict country-wide units to the metropolitan area of interest.

mod table;

use anyhow::Result;
use geo::Area;

use crate::{
    common::{DebugReport, Resolved},
    config::{Config, Retention},
    error::Error,
    geom::{Crs, Geometries, RepairStats},
    io::{geojson, shp::{self, ShapefileLayer}},
    layer::{RegionLayer, UnitLayer},
    pack::{AoiPackage, DiskPack},
    pipeline::{Artifacts, Stage},
};

/// Counts gathered while building the package.
#[derive(Debug)]
pub(crate) struct AoiSummary {
    pub unit_crs: Crs,
    pub region_crs: Crs,
    pub analysis_crs: Crs,
    pub units_read: usize,
    pub regions_read: usize,
    pub key: Resolved,
    pub null_keys: usize,
    pub duplicate_keys: usize,
    pub unit_repair: RepairStats,
    pub region_repair: RepairStats,
    pub retention: Retention,
    pub mask_area_km2: f64,
    pub retained: usize,
}

impl AoiSummary {
    fn report(&self) -> DebugReport {
        let mut report = DebugReport::new("Stage 1: area of interest");
        report.section("inputs")
            .line("unit CRS", self.unit_crs)
            .line("region CRS", self.region_crs)
            .line("analysis CRS", self.analysis_crs)
            .line("units read", self.units_read)
            .line("regions read", self.regions_read);
        report.section("join key")
            .line("selected column", &self.key.name)
            .line("null keys dropped", self.null_keys)
            .line("duplicate keys dropped", self.duplicate_keys);
        report.section("geometry repair")
            .line("invalid units before repair", self.unit_repair.invalid_before)
            .line("invalid units after repair", self.unit_repair.invalid_after)
            .line("invalid regions before repair", self.region_repair.invalid_before)
            .line("invalid regions after repair", self.region_repair.invalid_after);
        report.section("retention")
            .line("rule", format!("{:?}", self.retention))
            .line("mask area (km2)", format!("{:.3}", self.mask_area_km2))
            .line("units before filter", self.units_read - self.null_keys - self.duplicate_keys)
            .line("units retained", self.retained);
        report
    }
}

/// Build the AOI package from the two boundary layers.
pub(crate) fn build(units: ShapefileLayer, regions: ShapefileLayer, config: &Config) -> Result<(AoiPackage, AoiSummary)> {
    if units.shapes.is_empty() {
        return Err(Error::degenerate("reading the unit shapefile", "the DA boundary file has no features").into());
    }
    if regions.shapes.is_empty() {
        return Err(Error::degenerate("reading the region shapefile", "the boundary file has no features").into());
    }
    let analysis = Crs::from_epsg(config.crs.analysis)?;
    let (unit_crs, region_crs) = (units.crs, regions.crs);
    let (units_read, regions_read) = (units.shapes.len(), regions.shapes.len());

    let keyed = table::unit_table(&units, &config.aoi)?;
    let region_attrs = table::region_table(&regions, &config.aoi)?;

    let shapes = keyed.rows.iter().map(|&i| units.shapes[i].clone()).collect();
    let mut unit_geoms = Geometries::new(shapes, unit_crs).reproject(analysis)?;
    let unit_repair = unit_geoms.repair();
    let mut region_geoms = Geometries::new(regions.shapes, region_crs).reproject(analysis)?;
    let region_repair = region_geoms.repair();
    if unit_repair.invalid_after > 0 || region_repair.invalid_after > 0 {
        tracing::warn!(
            units = unit_repair.invalid_after, regions = region_repair.invalid_after,
            "[aoi] geometries still invalid after repair; keeping them as read"
        );
    }

    let mask = region_geoms.union()
        .filter(|mask| mask.unsigned_area() > 0.0)
        .ok_or_else(|| Error::degenerate("dissolving the regions", "the boundary shapes have no area"))?;

    let keep = match config.aoi.retention {
        Retention::RepresentativePoint => unit_geoms.representative_point_within(&mask),
        Retention::AreaOverlap { min_fraction } => unit_geoms.overlap_fraction_at_least(&mask, min_fraction),
    };
    let kept: Vec<usize> = keep.iter().enumerate().filter(|(_, keep)| **keep).map(|(i, _)| i).collect();
    if kept.is_empty() {
        return Err(Error::degenerate(
            "the area-of-interest filter",
            format!(
                "no unit lies inside the dissolved boundary; check the unit CRS ({unit_crs}) against the \
                 boundary CRS ({region_crs}) and that the boundary file covers the study area"
            ),
        ).into());
    }

    let summary = AoiSummary {
        unit_crs,
        region_crs,
        analysis_crs: analysis,
        units_read,
        regions_read,
        null_keys: keyed.null_keys,
        duplicate_keys: keyed.duplicate_keys,
        unit_repair,
        region_repair,
        retention: config.aoi.retention,
        mask_area_km2: mask.unsigned_area() / 1e6,
        retained: kept.len(),
        key: keyed.key.clone(),
    };
    let package = AoiPackage {
        units: UnitLayer::new(keyed.attrs, unit_geoms)?.select(&kept)?,
        regions: RegionLayer::new(region_attrs, region_geoms)?,
        mask,
        mask_name: config.aoi.mask_name.clone(),
        key_column: keyed.key.name,
    };
    Ok((package, summary))
}

pub(crate) fn run(config: &Config, artifacts: &Artifacts) -> Result<()> {
    let units_path = config.units_input()?;
    let regions_path = config.regions_input()?;
    tracing::info!(units = %units_path.display(), regions = %regions_path.display(), "[aoi] reading boundaries");
    let units = shp::read_polygons(&units_path, config.crs.units)?;
    let regions = shp::read_polygons(&regions_path, config.crs.regions)?;

    let (package, summary) = build(units, regions, config)?;
    tracing::info!(
        retained = summary.retained, of = summary.units_read, key = %summary.key.name,
        "[aoi] units inside {}", package.mask_name
    );

    package.write(&mut DiskPack::new(artifacts.aoi_package()))?;

    let geographic = Crs::from_epsg(config.crs.geographic)?;
    let preview = package.units.reproject(geographic)?;
    geojson::write_polygons(&artifacts.unit_preview(), preview.geoms().shapes(), preview.attrs(), geographic)?;

    summary.report().write(&artifacts.report(Stage::Aoi))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use shapefile::dbase::FieldValue;

    use super::*;
    use crate::{geom::fixtures::rect, types::Dguid};

    const X0: f64 = 4_000_000.0;
    const Y0: f64 = 2_000_000.0;

    fn text(s: &str) -> FieldValue { FieldValue::Character(Some(s.into())) }

    fn layer(shapes: Vec<geo::MultiPolygon<f64>>, records: Vec<Vec<(&str, FieldValue)>>) -> ShapefileLayer {
        let records: Vec<BTreeMap<String, FieldValue>> = records.into_iter()
            .map(|fields| fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
            .collect();
        let mut fields: Vec<String> = records.iter().flat_map(|r| r.keys().cloned()).collect();
        fields.sort();
        fields.dedup();
        ShapefileLayer { shapes, records, fields, crs: Crs::from_epsg(3347).unwrap() }
    }

    fn regions() -> ShapefileLayer {
        layer(
            vec![rect(X0, Y0, X0 + 100.0, Y0 + 100.0), rect(X0 + 100.0, Y0, X0 + 200.0, Y0 + 100.0)],
            vec![
                vec![("FullName", text("West")), ("ShortName", text("W")), ("MunNum", FieldValue::Numeric(Some(1.0)))],
                vec![("FullName", text("East")), ("ShortName", text("E")), ("MunNum", FieldValue::Numeric(Some(2.0)))],
            ],
        )
    }

    fn ids(package: &AoiPackage) -> Vec<&str> {
        package.units.ids().iter().map(Dguid::as_str).collect()
    }

    #[test]
    fn keeps_units_by_representative_point() {
        let units = layer(
            vec![
                rect(X0 + 10.0, Y0 + 10.0, X0 + 50.0, Y0 + 50.0),
                rect(X0 + 150.0, Y0 + 10.0, X0 + 190.0, Y0 + 50.0),
                // Overlaps the mask by a 5 m sliver only.
                rect(X0 + 195.0, Y0 + 10.0, X0 + 400.0, Y0 + 50.0),
            ],
            vec![
                vec![("DGUID", text("2021S051259150001")), ("LANDAREA", FieldValue::Numeric(Some(0.5)))],
                vec![("DGUID", text("2021S051259150002")), ("LANDAREA", FieldValue::Numeric(Some(0.7)))],
                vec![("DGUID", text("2021S051259150003")), ("LANDAREA", FieldValue::Numeric(Some(9.0)))],
            ],
        );
        let (package, summary) = build(units, regions(), &Config::default()).unwrap();
        assert_eq!(ids(&package), vec!["2021S051259150001", "2021S051259150002"]);
        assert_eq!(summary.retained, 2);
        assert_eq!(summary.key.name, "DGUID");
        approx::assert_relative_eq!(summary.mask_area_km2, 0.02);
        let area = package.units.attrs().column("LANDAREA").unwrap();
        assert_eq!(area.f64().unwrap().get(1), Some(0.7));
    }

    #[test]
    fn area_overlap_rule_is_configurable() {
        let units = layer(
            vec![rect(X0 + 150.0, Y0 + 10.0, X0 + 250.0, Y0 + 50.0)],
            vec![vec![("DGUID", text("a"))]],
        );
        let mut config = Config::default();
        config.aoi.retention = Retention::AreaOverlap { min_fraction: 0.4 };
        let (package, _) = build(units, regions(), &config).unwrap();
        assert_eq!(ids(&package), vec!["a"]);
    }

    #[test]
    fn falls_back_to_dauid_and_drops_bad_keys() {
        let square = |x: f64| rect(X0 + x, Y0 + 10.0, X0 + x + 10.0, Y0 + 20.0);
        let units = layer(
            vec![square(10.0), square(30.0), square(50.0), square(70.0)],
            vec![
                vec![("DAUID", text("59150001"))],
                vec![("DAUID", text("  "))],
                vec![("DAUID", text("59150001"))],
                vec![("DAUID", text("59150004"))],
            ],
        );
        let (package, summary) = build(units, regions(), &Config::default()).unwrap();
        assert_eq!(ids(&package), vec!["59150001", "59150004"]);
        assert_eq!((summary.null_keys, summary.duplicate_keys), (1, 1));
        assert_eq!(package.key_column, "DAUID");
        let dauid = package.units.attrs().column("DAUID").unwrap();
        assert_eq!(dauid.str().unwrap().get(1), Some("59150004"));
    }

    #[test]
    fn missing_key_lists_candidates_and_columns() {
        let units = layer(vec![rect(X0, Y0, X0 + 1.0, Y0 + 1.0)], vec![vec![("CODE", text("x"))]]);
        let err = build(units, regions(), &Config::default()).unwrap_err();
        match err.downcast_ref::<Error>() {
            Some(Error::MissingColumn { expected, available, .. }) => {
                assert_eq!(expected[..2], ["DGUID".to_string(), "DAUID".to_string()]);
                assert_eq!(available, &vec!["CODE".to_string()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn nothing_inside_is_degenerate() {
        let units = layer(
            vec![rect(X0 + 1000.0, Y0, X0 + 1100.0, Y0 + 100.0)],
            vec![vec![("DGUID", text("far"))]],
        );
        let err = build(units, regions(), &Config::default()).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Degenerate { .. })));
    }

    #[test]
    fn region_fields_are_canonical() {
        let units = layer(vec![rect(X0 + 10.0, Y0 + 10.0, X0 + 20.0, Y0 + 20.0)], vec![vec![("DGUID", text("a"))]]);
        let (package, _) = build(units, regions(), &Config::default()).unwrap();
        assert_eq!(package.regions.names(), &[Some("West".to_string()), Some("East".to_string())]);
        let code = package.regions.attrs().column("MunNum").unwrap();
        assert_eq!(code.f64().unwrap().get(1), Some(2.0));
    }

    /// Write rectangles with one character field to a shapefile.
    fn write_shapefile(path: &std::path::Path, field: &str, features: &[(&str, (f64, f64, f64, f64))]) {
        use shapefile::{dbase::{FieldName, Record, TableWriterBuilder}, Point, Polygon, PolygonRing};

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let table = TableWriterBuilder::new().add_character_field(FieldName::try_from(field).unwrap(), 40);
        let mut writer = shapefile::Writer::from_path(path, table).unwrap();
        for &(value, (x0, y0, x1, y1)) in features {
            let ring = vec![
                Point::new(x0, y0), Point::new(x0, y1), Point::new(x1, y1), Point::new(x1, y0), Point::new(x0, y0),
            ];
            let mut record = Record::default();
            record.insert(field.to_string(), text(value));
            writer.write_shape_and_record(&Polygon::with_rings(vec![PolygonRing::Outer(ring)]), &record).unwrap();
        }
    }

    #[test]
    fn stage_reads_shapefiles_and_writes_package() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::with_root(dir.path());
        config.crs.units = Some(3347);
        config.crs.regions = Some(3347);
        let artifacts = Artifacts::new(&config);
        let raw = config.paths.raw();

        write_shapefile(&raw.join("da_boundaries/lda_000a21a_e.shp"), "DGUID", &[
            ("2021S051259150001", (X0 + 10.0, Y0 + 10.0, X0 + 50.0, Y0 + 50.0)),
            ("2021S051259150002", (X0 + 150.0, Y0 + 10.0, X0 + 190.0, Y0 + 50.0)),
            ("2021S051259150003", (X0 + 500.0, Y0 + 10.0, X0 + 550.0, Y0 + 50.0)),
        ]);
        write_shapefile(&raw.join("admin_boundaries/regions.shp"), "FullName", &[
            ("West", (X0, Y0, X0 + 100.0, Y0 + 100.0)),
            ("East", (X0 + 100.0, Y0, X0 + 200.0, Y0 + 100.0)),
        ]);

        run(&config, &artifacts).unwrap();
        let package = AoiPackage::read(&DiskPack::new(artifacts.aoi_package())).unwrap();
        assert_eq!(ids(&package), vec!["2021S051259150001", "2021S051259150002"]);
        assert_eq!(package.regions.len(), 2);
        approx::assert_relative_eq!(package.units.geoms().shapes()[0].unsigned_area(), 1600.0, epsilon = 1e-6);
        assert!(artifacts.unit_preview().is_file());
        let report = std::fs::read_to_string(artifacts.report(Stage::Aoi)).unwrap();
        assert!(report.contains("units retained: 2"));
    }
}
