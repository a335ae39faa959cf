use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use geo::{Coord, LineString, MultiPolygon, Point, Polygon};
use polars::prelude::{BooleanChunked, Column, DataFrame, DataType, Float64Chunked, StringChunked};
use serde_json::{json, Map, Value};

use crate::{common::write_atomic, geom::Crs};

/// Property column prepared once for per-feature lookup.
enum Property {
    Text(StringChunked),
    Number(Float64Chunked),
    Flag(BooleanChunked),
}

impl Property {
    fn from_column(col: &Column) -> Result<Option<Self>> {
        Ok(Some(match col.dtype() {
            DataType::String => Property::Text(col.str()?.clone()),
            DataType::Boolean => Property::Flag(col.bool()?.clone()),
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64
            | DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64
            | DataType::Float32 | DataType::Float64 => {
                Property::Number(col.cast(&DataType::Float64)?.f64()?.clone())
            }
            _ => return Ok(None),
        }))
    }

    /// Numbers are written as floats; non-finite values become null.
    fn get(&self, idx: usize) -> Value {
        match self {
            Property::Text(s) => s.get(idx).map_or(Value::Null, |s| json!(s)),
            Property::Flag(b) => b.get(idx).map_or(Value::Null, |b| json!(b)),
            Property::Number(v) => v.get(idx)
                .filter(|v| v.is_finite())
                .map_or(Value::Null, |v| json!(v)),
        }
    }
}

fn ring_coords(ring: &LineString<f64>) -> Vec<[f64; 2]> {
    ring.coords().map(|c| [c.x, c.y]).collect()
}

/// GeoJSON geometry for a MultiPolygon (exterior ring first, then holes).
pub(crate) fn multipolygon_to_geojson(mp: &MultiPolygon<f64>) -> Value {
    let polygons: Vec<Vec<Vec<[f64; 2]>>> = mp.0.iter()
        .map(|polygon| std::iter::once(polygon.exterior())
            .chain(polygon.interiors())
            .map(ring_coords)
            .collect())
        .collect();
    json!({ "type": "MultiPolygon", "coordinates": polygons })
}

fn point_to_geojson(pt: &Point<f64>) -> Value {
    json!({ "type": "Point", "coordinates": [pt.x(), pt.y()] })
}

/// Legacy named-CRS member, omitted for WGS84 which GeoJSON assumes.
fn crs_member(crs: Crs) -> Option<Value> {
    (crs.epsg() != 4326).then(|| json!({
        "type": "name",
        "properties": { "name": format!("urn:ogc:def:crs:EPSG::{}", crs.epsg()) },
    }))
}

fn collection(features: Vec<Value>, crs: Crs) -> Value {
    let mut fc = Map::new();
    fc.insert("type".into(), json!("FeatureCollection"));
    if let Some(member) = crs_member(crs) {
        fc.insert("crs".into(), member);
    }
    fc.insert("features".into(), Value::Array(features));
    Value::Object(fc)
}

fn features(geometries: impl Iterator<Item = Value>, props: &DataFrame) -> Result<Vec<Value>> {
    let columns = props.get_columns().iter()
        .map(|col| Ok(Property::from_column(col)?.map(|p| (col.name().to_string(), p))))
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();

    Ok(geometries.enumerate()
        .map(|(idx, geometry)| {
            let properties: Map<String, Value> = columns.iter()
                .map(|(name, prop)| (name.clone(), prop.get(idx)))
                .collect();
            json!({ "type": "Feature", "geometry": geometry, "properties": properties })
        })
        .collect())
}

/// Encode polygons with one property row each.
pub(crate) fn polygons_to_bytes(shapes: &[MultiPolygon<f64>], props: &DataFrame, crs: Crs) -> Result<Vec<u8>> {
    if props.height() != shapes.len() {
        bail!("[io::geojson] {} property rows for {} geometries", props.height(), shapes.len());
    }
    let features = features(shapes.iter().map(multipolygon_to_geojson), props)?;
    serde_json::to_vec(&collection(features, crs)).context("Failed to serialize GeoJSON to bytes")
}

/// Atomically write polygons with properties to `path`.
pub(crate) fn write_polygons(path: &Path, shapes: &[MultiPolygon<f64>], props: &DataFrame, crs: Crs) -> Result<()> {
    write_atomic(path, &polygons_to_bytes(shapes, props, crs)?)?;
    tracing::debug!(path = %path.display(), features = shapes.len(), "wrote GeoJSON");
    Ok(())
}

/// Atomically write points with properties to `path`.
pub(crate) fn write_points(path: &Path, points: &[Point<f64>], props: &DataFrame, crs: Crs) -> Result<()> {
    if props.height() != points.len() {
        bail!("[io::geojson] {} property rows for {} points", props.height(), points.len());
    }
    let features = features(points.iter().map(point_to_geojson), props)?;
    let bytes = serde_json::to_vec(&collection(features, crs)).context("Failed to serialize GeoJSON to bytes")?;
    write_atomic(path, &bytes)?;
    tracing::debug!(path = %path.display(), features = points.len(), "wrote GeoJSON");
    Ok(())
}

/// A decoded polygon FeatureCollection.
pub(crate) struct PolygonCollection {
    pub shapes: Vec<MultiPolygon<f64>>,
    pub props: DataFrame,
    pub crs: Option<Crs>,
}

/// Decode a polygon FeatureCollection.
///
/// Property columns follow first appearance. A column whose non-null values
/// are all numbers becomes Float64, anything else becomes String.
pub(crate) fn polygons_from_bytes(bytes: &[u8]) -> Result<PolygonCollection> {
    let value: Value = serde_json::from_slice(bytes).context("Failed to parse GeoJSON bytes")?;
    let features = value["features"].as_array()
        .ok_or_else(|| anyhow!("[io::geojson] not a FeatureCollection"))?;

    let crs = match value["crs"]["properties"]["name"].as_str() {
        Some(name) => Some(name.rsplit(':').next().unwrap_or(name).parse::<Crs>()?),
        None => None,
    };

    let mut shapes = Vec::with_capacity(features.len());
    let mut names: Vec<String> = Vec::new();
    for (i, feature) in features.iter().enumerate() {
        shapes.push(parse_geometry(&feature["geometry"])
            .with_context(|| format!("[io::geojson] feature {i}"))?);
        if let Some(props) = feature["properties"].as_object() {
            for key in props.keys() {
                if !names.contains(key) {
                    names.push(key.clone());
                }
            }
        }
    }

    let columns = names.iter()
        .map(|name| {
            let values: Vec<&Value> = features.iter().map(|f| &f["properties"][name.as_str()]).collect();
            if values.iter().all(|v| v.is_null() || v.is_number()) {
                Column::new(name.as_str().into(), values.iter().map(|v| v.as_f64()).collect::<Vec<_>>())
            } else {
                let text: Vec<Option<String>> = values.iter()
                    .map(|v| match v {
                        Value::Null => None,
                        Value::String(s) => Some(s.clone()),
                        other => Some(other.to_string()),
                    })
                    .collect();
                Column::new(name.as_str().into(), text)
            }
        })
        .collect::<Vec<_>>();

    let props = if columns.is_empty() {
        DataFrame::empty_with_height(shapes.len())
    } else {
        DataFrame::new(columns)?
    };
    Ok(PolygonCollection { shapes, props, crs })
}

fn parse_geometry(geometry: &Value) -> Result<MultiPolygon<f64>> {
    let coords = geometry["coordinates"].as_array();
    match (geometry["type"].as_str(), coords) {
        (Some("MultiPolygon"), Some(polys)) => polys.iter()
            .map(|poly| parse_polygon(poly))
            .collect::<Result<Vec<_>>>()
            .map(MultiPolygon),
        (Some("Polygon"), Some(_)) => Ok(MultiPolygon(vec![parse_polygon(&geometry["coordinates"])?])),
        (None, _) if geometry.is_null() => Ok(MultiPolygon(vec![])),
        (kind, _) => bail!("unsupported geometry type {kind:?}"),
    }
}

fn parse_polygon(value: &Value) -> Result<Polygon<f64>> {
    let rings = value.as_array()
        .ok_or_else(|| anyhow!("Invalid Polygon: rings must be an array"))?;
    let mut rings = rings.iter().map(parse_ring);
    let exterior = rings.next()
        .ok_or_else(|| anyhow!("Invalid Polygon: missing exterior ring"))??;
    let interiors = rings.collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn parse_ring(value: &Value) -> Result<LineString<f64>> {
    let coords = value.as_array()
        .ok_or_else(|| anyhow!("Invalid ring: coordinates must be an array"))?
        .iter()
        .map(|pair| match (pair[0].as_f64(), pair[1].as_f64()) {
            (Some(x), Some(y)) => Ok(Coord { x, y }),
            _ => bail!("Invalid coordinate: {pair}"),
        })
        .collect::<Result<Vec<_>>>()?;
    // Polygon::new closes open rings.
    Ok(LineString(coords))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::fixtures::square;

    #[test]
    fn numbers_are_coerced_to_floats() {
        let props = DataFrame::new(vec![
            Column::new("DGUID".into(), vec!["b", "a"]),
            Column::new("n".into(), vec![Some(3_i64), None]),
            Column::new("x".into(), vec![f64::NAN, 0.25]),
        ]).unwrap();
        let shapes = vec![square(0.0, 0.0, 1.0), square(1.0, 0.0, 1.0)];
        let bytes = polygons_to_bytes(&shapes, &props, Crs::from_epsg(4326).unwrap()).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        assert!(value.get("crs").is_none());
        let first = &value["features"][0]["properties"];
        assert_eq!(first["DGUID"], json!("b"));
        assert_eq!(first["n"], json!(3.0));
        assert!(first["x"].is_null());
        assert!(value["features"][1]["properties"]["n"].is_null());
    }

    #[test]
    fn reads_back_crs_and_columns() {
        let props = DataFrame::new(vec![
            Column::new("DGUID".into(), vec!["0059", "0060"]),
            Column::new("LANDAREA".into(), vec![1.5, 2.0]),
        ]).unwrap();
        let shapes = vec![square(0.0, 0.0, 1.0), square(1.0, 0.0, 1.0)];
        let crs = Crs::from_epsg(3347).unwrap();
        let bytes = polygons_to_bytes(&shapes, &props, crs).unwrap();

        let back = polygons_from_bytes(&bytes).unwrap();
        assert_eq!(back.crs, Some(crs));
        assert_eq!(back.shapes, shapes);
        assert_eq!(back.props.column("DGUID").unwrap().dtype(), &DataType::String);
        assert_eq!(back.props.column("LANDAREA").unwrap().dtype(), &DataType::Float64);
    }

    #[test]
    fn rejects_row_count_mismatch() {
        let props = DataFrame::new(vec![Column::new("DGUID".into(), vec!["a"])]).unwrap();
        assert!(polygons_to_bytes(&[], &props, Crs::from_epsg(4326).unwrap()).is_err());
    }
}
