use ahash::AHashSet;
use anyhow::Result;
use polars::prelude::{Column, DataFrame};

use crate::{
    common::{resolve_column, Resolved},
    config::AoiConfig,
    io::shp::{field_number, field_text, is_numeric, ShapefileLayer},
    layer::{ID_COLUMN, REGION_NAME_COLUMN},
};

/// Unit attributes after key resolution.
pub(super) struct KeyedUnits {
    /// `DGUID` column first, then the carried name fields.
    pub attrs: DataFrame,
    /// Source record of each attribute row.
    pub rows: Vec<usize>,
    pub key: Resolved,
    pub null_keys: usize,
    pub duplicate_keys: usize,
}

/// One output column from shapefile field `field` over `rows`.
///
/// Fields whose values are all dBase numbers become floats; anything else is
/// carried as trimmed text.
fn field_column(layer: &ShapefileLayer, rows: &[usize], field: &str, output: &str) -> Column {
    let values: Vec<_> = rows.iter().map(|&i| layer.records[i].get(field)).collect();
    if values.iter().flatten().all(|v| is_numeric(v)) {
        Column::new(output.into(), values.iter().map(|v| v.and_then(field_number)).collect::<Vec<_>>())
    } else {
        Column::new(output.into(), values.iter().map(|v| v.and_then(field_text)).collect::<Vec<_>>())
    }
}

/// Resolve the join key and build the unit attribute table.
///
/// Records with a blank key are dropped; of several records sharing a key
/// only the first is kept.
pub(super) fn unit_table(layer: &ShapefileLayer, config: &AoiConfig) -> Result<KeyedUnits> {
    let key = resolve_column("unit shapefile join key", &config.key_candidates, &layer.fields, false)?;

    let mut seen = AHashSet::new();
    let (mut rows, mut ids) = (Vec::new(), Vec::new());
    let (mut null_keys, mut duplicate_keys) = (0, 0);
    for (i, record) in layer.records.iter().enumerate() {
        let Some(id) = record.get(&key.name).and_then(field_text) else {
            null_keys += 1;
            continue;
        };
        if !seen.insert(id.clone()) {
            duplicate_keys += 1;
            continue;
        }
        rows.push(i);
        ids.push(id);
    }

    let mut columns = vec![Column::new(ID_COLUMN.into(), ids)];
    let carried = config.keep_fields.iter()
        .chain(std::iter::once(&key.name))
        .filter(|field| field.as_str() != ID_COLUMN && layer.fields.contains(field));
    let mut added: Vec<&str> = Vec::new();
    for field in carried {
        if !added.contains(&field.as_str()) {
            columns.push(field_column(layer, &rows, field, field));
            added.push(field);
        }
    }

    if null_keys > 0 || duplicate_keys > 0 {
        tracing::warn!(null_keys, duplicate_keys, key = %key.name, "[aoi] dropped units with blank or repeated keys");
    }
    Ok(KeyedUnits { attrs: DataFrame::new(columns)?, rows, key, null_keys, duplicate_keys })
}

/// Region attributes under their canonical names (`FullName`, `ShortName`, `MunNum`).
pub(super) fn region_table(layer: &ShapefileLayer, config: &AoiConfig) -> Result<DataFrame> {
    let name = resolve_column("region shapefile", std::slice::from_ref(&config.region_name_field), &layer.fields, false)?;
    let rows: Vec<usize> = (0..layer.records.len()).collect();

    let mut columns = vec![field_column(layer, &rows, &name.name, REGION_NAME_COLUMN)];
    for (field, output) in [(&config.region_short_name_field, "ShortName"), (&config.region_code_field, "MunNum")] {
        if layer.fields.contains(field) {
            columns.push(field_column(layer, &rows, field, output));
        }
    }
    Ok(DataFrame::new(columns)?)
}
