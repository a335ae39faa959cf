use anyhow::{bail, Result};
use ahash::AHashMap;
use geo::MultiPolygon;
use polars::prelude::{Column, DataFrame, DataType, IdxCa, IdxSize, NamedFrom};

use crate::{error::Error, geom::{Crs, Geometries}, types::Dguid};

/// Column holding the unit id in every table this crate writes.
pub const ID_COLUMN: &str = "DGUID";

/// Column holding the region name.
pub const REGION_NAME_COLUMN: &str = "FullName";

/// Unit polygons with their ids and carried attributes.
#[derive(Debug, Clone)]
pub struct UnitLayer {
    ids: Vec<Dguid>,
    attrs: DataFrame,
    geoms: Geometries,
}

impl UnitLayer {
    /// `attrs` must have one row per shape and a text `DGUID` column without nulls.
    pub(crate) fn new(attrs: DataFrame, geoms: Geometries) -> Result<Self> {
        if attrs.height() != geoms.len() {
            bail!("[layer] {} attribute rows for {} unit geometries", attrs.height(), geoms.len());
        }
        let ids = text_column(&attrs, ID_COLUMN, "unit layer")?
            .into_iter()
            .enumerate()
            .map(|(i, id)| id.as_deref().and_then(Dguid::parse)
                .ok_or_else(|| anyhow::anyhow!("[layer] unit {i} has no {ID_COLUMN}")))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { ids, attrs, geoms })
    }

    /// Build a layer from polygons in `crs`, one attribute row per shape.
    pub fn from_shapes(attrs: DataFrame, shapes: Vec<MultiPolygon<f64>>, crs: Crs) -> Result<Self> {
        Self::new(attrs, Geometries::new(shapes, crs))
    }

    #[inline] pub fn len(&self) -> usize { self.ids.len() }
    #[inline] pub fn is_empty(&self) -> bool { self.ids.is_empty() }
    #[inline] pub fn ids(&self) -> &[Dguid] { &self.ids }
    #[inline] pub fn attrs(&self) -> &DataFrame { &self.attrs }
    #[inline] pub(crate) fn geoms(&self) -> &Geometries { &self.geoms }
    #[inline] pub fn crs(&self) -> Crs { self.geoms.crs() }

    /// Position of each id.
    pub fn index(&self) -> AHashMap<Dguid, usize> {
        self.ids.iter().cloned().enumerate().map(|(i, id)| (id, i)).collect()
    }

    /// The same units with geometries in `crs`.
    pub(crate) fn reproject(&self, crs: Crs) -> Result<Self> {
        Ok(Self { ids: self.ids.clone(), attrs: self.attrs.clone(), geoms: self.geoms.reproject(crs)? })
    }

    /// Keep the units at `indices`, in that order.
    pub(crate) fn select(&self, indices: &[usize]) -> Result<Self> {
        let idx = IdxCa::new("idx".into(), indices.iter().map(|&i| i as IdxSize).collect::<Vec<_>>());
        Ok(Self {
            ids: indices.iter().map(|&i| self.ids[i].clone()).collect(),
            attrs: self.attrs.take(&idx)?,
            geoms: self.geoms.select(indices),
        })
    }

    /// Ids as a `DGUID` text column.
    pub fn id_column(&self) -> Column {
        Column::new(ID_COLUMN.into(), self.ids.iter().map(Dguid::as_str).collect::<Vec<_>>())
    }
}

/// Administrative regions keyed by `FullName`.
#[derive(Debug, Clone)]
pub struct RegionLayer {
    names: Vec<Option<String>>,
    attrs: DataFrame,
    geoms: Geometries,
}

impl RegionLayer {
    /// `attrs` must have one row per shape and a text `FullName` column.
    pub(crate) fn new(attrs: DataFrame, geoms: Geometries) -> Result<Self> {
        if attrs.height() != geoms.len() {
            bail!("[layer] {} attribute rows for {} region geometries", attrs.height(), geoms.len());
        }
        let names = text_column(&attrs, REGION_NAME_COLUMN, "region layer")?;
        Ok(Self { names, attrs, geoms })
    }

    pub fn from_shapes(attrs: DataFrame, shapes: Vec<MultiPolygon<f64>>, crs: Crs) -> Result<Self> {
        Self::new(attrs, Geometries::new(shapes, crs))
    }

    #[inline] pub fn len(&self) -> usize { self.names.len() }
    #[inline] pub fn is_empty(&self) -> bool { self.names.is_empty() }
    #[inline] pub fn names(&self) -> &[Option<String>] { &self.names }
    #[inline] pub fn attrs(&self) -> &DataFrame { &self.attrs }
    #[inline] pub(crate) fn geoms(&self) -> &Geometries { &self.geoms }

    pub(crate) fn reproject(&self, crs: Crs) -> Result<Self> {
        Ok(Self { names: self.names.clone(), attrs: self.attrs.clone(), geoms: self.geoms.reproject(crs)? })
    }
}

/// A column as trimmed text, or a schema error naming the present columns.
fn text_column(df: &DataFrame, name: &str, context: &str) -> Result<Vec<Option<String>>> {
    let col = df.column(name).map_err(|_| Error::MissingColumn {
        context: context.to_string(),
        expected: vec![name.to_string()],
        available: df.get_column_names().iter().map(|c| c.to_string()).collect(),
    })?;
    let col = col.cast(&DataType::String)?;
    Ok(col.str()?.into_iter()
        .map(|v| v.map(str::trim).filter(|s| !s.is_empty()).map(String::from))
        .collect())
}
