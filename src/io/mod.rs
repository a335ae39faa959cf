//! Format-specific reading and writing.
//!
//! - `csv` - score tables through polars, with `DGUID` kept as text
//! - `geojson` - FeatureCollections with DataFrame properties
//! - `shp` - polygon shapefiles with their `.prj` CRS
//! - `raster` - single-band categorical GeoTIFFs

pub(crate) mod csv;
pub(crate) mod geojson;
pub(crate) mod raster;
pub(crate) mod shp;
