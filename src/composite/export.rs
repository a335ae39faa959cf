use anyhow::Result;

use super::Composite;
use crate::{
    config::Config,
    geom::Crs,
    io::{csv::write_table, geojson::write_polygons},
    pack::AoiPackage,
    pipeline::Artifacts,
};

/// Write the four web-facing exports.
///
/// Geometries are reprojected to the geographic CRS and simplified here only;
/// all scoring happened on the unsimplified analysis geometry.
pub(super) fn write_all(result: &Composite, package: &AoiPackage, config: &Config, artifacts: &Artifacts) -> Result<()> {
    let geographic = Crs::from_epsg(config.crs.geographic)?;

    write_table(&result.units, &artifacts.unit_components())?;
    let units = package.units.reproject(geographic)?;
    let unit_shapes = units.geoms().simplified(config.composite.unit_simplify_tolerance);
    write_polygons(&artifacts.unit_geojson(), &unit_shapes, &result.units, geographic)?;

    write_table(&result.regions, &artifacts.region_components())?;
    let regions = package.regions.reproject(geographic)?;
    let region_shapes = regions.geoms().simplified(config.composite.region_simplify_tolerance);
    write_polygons(&artifacts.region_geojson(), &region_shapes, &result.region_props, geographic)?;
    Ok(())
}
