use anyhow::{bail, Context, Result};
use geo::MultiPolygon;
use polars::prelude::{Column, DataFrame};

use crate::{
    geom::{Crs, Geometries},
    io::geojson,
    layer::{RegionLayer, UnitLayer},
    pack::{Manifest, PackSink, PackSource},
};

const UNITS: &str = "units.geojson";
const REGIONS: &str = "regions.geojson";
const MASK: &str = "mask.geojson";

/// The area-of-interest package: retained units, regions and the dissolved
/// mask, all in the analysis CRS.
#[derive(Debug, Clone)]
pub struct AoiPackage {
    pub units: UnitLayer,
    pub regions: RegionLayer,
    pub mask: MultiPolygon<f64>,
    pub mask_name: String,
    /// Source column the unit ids came from.
    pub key_column: String,
}

impl AoiPackage {
    #[inline] pub fn crs(&self) -> Crs { self.units.crs() }

    /// Write the three layers, then the manifest.
    pub fn write(&self, sink: &mut dyn PackSink) -> Result<()> {
        let crs = self.crs();
        if self.regions.geoms().crs() != crs {
            bail!("[pack] regions are in {}, units in {crs}", self.regions.geoms().crs());
        }

        let mut manifest = Manifest::new(crs, &self.key_column);
        let units = geojson::polygons_to_bytes(self.units.geoms().shapes(), self.units.attrs(), crs)?;
        manifest.put_layer(sink, UNITS, &units, self.units.len())?;

        let regions = geojson::polygons_to_bytes(self.regions.geoms().shapes(), self.regions.attrs(), crs)?;
        manifest.put_layer(sink, REGIONS, &regions, self.regions.len())?;

        let mask_props = DataFrame::new(vec![Column::new("name".into(), vec![self.mask_name.as_str()])])?;
        let mask = geojson::polygons_to_bytes(std::slice::from_ref(&self.mask), &mask_props, crs)?;
        manifest.put_layer(sink, MASK, &mask, 1)?;

        manifest.write(sink)
    }

    /// Read and verify a package written by [`AoiPackage::write`].
    pub fn read(src: &dyn PackSource) -> Result<Self> {
        let manifest = Manifest::from_pack_source(src)?;
        let crs = manifest.crs()?;

        let layer = |rel: &str| -> Result<geojson::PolygonCollection> {
            let bytes = manifest.read_verified(src, rel)?;
            let collection = geojson::polygons_from_bytes(&bytes)
                .with_context(|| format!("Failed to decode {rel}"))?;
            if let Some(found) = collection.crs.filter(|found| *found != crs) {
                bail!("{rel} is in {found}, manifest says {crs}");
            }
            Ok(collection)
        };

        let units = layer(UNITS)?;
        let units = UnitLayer::new(units.props, Geometries::new(units.shapes, crs))?;

        let regions = layer(REGIONS)?;
        let regions = RegionLayer::new(regions.props, Geometries::new(regions.shapes, crs))?;

        let mask = layer(MASK)?;
        let mask_name = mask.props.column("name").ok()
            .and_then(|c| c.str().ok().and_then(|s| s.get(0).map(String::from)))
            .unwrap_or_default();
        let Some(mask_shape) = mask.shapes.into_iter().next() else {
            bail!("{MASK} has no features");
        };

        tracing::debug!(units = units.len(), regions = regions.len(), %crs, "read AOI package");
        Ok(Self { units, regions, mask: mask_shape, mask_name, key_column: manifest.key_column })
    }
}
