use std::{collections::{BTreeMap, BTreeSet, HashMap}, path::Path};

use anyhow::{bail, Context, Result};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use shapefile::{self as shp, dbase::FieldValue, Shape};

use crate::geom::Crs;

/// Polygons and attribute records of one shapefile.
pub(crate) struct ShapefileLayer {
    pub shapes: Vec<MultiPolygon<f64>>,
    pub records: Vec<BTreeMap<String, FieldValue>>,
    /// Field names present in any record, sorted.
    pub fields: Vec<String>,
    /// CRS from the `.prj` sidecar or the override.
    pub crs: Crs,
}

/// Convert shapefile rings to a geo MultiPolygon.
///
/// Shapefiles store each clockwise exterior ring followed by its
/// counter-clockwise holes; a hole before any exterior is dropped.
fn rings_to_geo<'a>(rings: impl Iterator<Item = &'a [shp::Point]>) -> MultiPolygon<f64> {
    /// Get the signed area of a geo::Coord list (negative for clockwise)
    fn signed_area(pts: &[Coord<f64>]) -> f64 {
        pts.windows(2).map(|w| w[0].x * w[1].y - w[1].x * w[0].y).sum::<f64>() / 2.0
    }

    let mut polys = Vec::new();
    let mut exterior: Option<LineString<f64>> = None;
    let mut holes = Vec::new();

    for ring in rings {
        let mut coords: Vec<Coord<f64>> = ring.iter().map(|pt| Coord { x: pt.x, y: pt.y }).collect();
        if coords.len() < 3 {
            continue;
        }
        if coords.first() != coords.last() {
            coords.push(coords[0]);
        }
        if signed_area(&coords) < 0.0 {
            if let Some(ext) = exterior.take() {
                polys.push(Polygon::new(ext, std::mem::take(&mut holes)));
            }
            exterior = Some(LineString(coords));
        } else if exterior.is_some() {
            holes.push(LineString(coords));
        }
    }
    if let Some(ext) = exterior {
        polys.push(Polygon::new(ext, holes));
    }
    MultiPolygon(polys)
}

/// Read every polygon record from `path`.
///
/// The CRS comes from `override_epsg` when set, otherwise from the `.prj`
/// sidecar; a shapefile with neither is rejected.
pub(crate) fn read_polygons(path: &Path, override_epsg: Option<u32>) -> Result<ShapefileLayer> {
    let crs = match override_epsg {
        Some(code) => Crs::from_epsg(code)?,
        None => Crs::from_prj_sidecar(path)?
            .with_context(|| format!("{} has no .prj sidecar; set the CRS in the config", path.display()))?,
    };

    let mut reader = shp::Reader::from_path(path)
        .with_context(|| format!("Failed to open shapefile {}", path.display()))?;

    let mut shapes = Vec::new();
    let mut records = Vec::new();
    let mut fields = BTreeSet::new();
    for (i, item) in reader.iter_shapes_and_records().enumerate() {
        let (shape, record) = item
            .with_context(|| format!("Failed to read record {i} of {}", path.display()))?;
        let shape = match shape {
            Shape::Polygon(p) => rings_to_geo(p.rings().iter().map(|r| r.points())),
            Shape::PolygonZ(p) => {
                let rings: Vec<Vec<shp::Point>> = p.rings().iter()
                    .map(|r| r.points().iter().map(|pt| shp::Point { x: pt.x, y: pt.y }).collect())
                    .collect();
                rings_to_geo(rings.iter().map(Vec::as_slice))
            }
            Shape::PolygonM(p) => {
                let rings: Vec<Vec<shp::Point>> = p.rings().iter()
                    .map(|r| r.points().iter().map(|pt| shp::Point { x: pt.x, y: pt.y }).collect())
                    .collect();
                rings_to_geo(rings.iter().map(Vec::as_slice))
            }
            Shape::NullShape => MultiPolygon(vec![]),
            other => bail!("{}: record {i} is a {:?}, expected polygons", path.display(), other.shapetype()),
        };
        let record: BTreeMap<String, FieldValue> = HashMap::<String, FieldValue>::from(record).into_iter().collect();
        fields.extend(record.keys().cloned());
        shapes.push(shape);
        records.push(record);
    }

    tracing::debug!(path = %path.display(), features = shapes.len(), %crs, "read shapefile");
    Ok(ShapefileLayer { shapes, records, fields: fields.into_iter().collect(), crs })
}

/// Text form of a field; blank text is null.
pub(crate) fn field_text(value: &FieldValue) -> Option<String> {
    let text = match value {
        FieldValue::Character(Some(s)) | FieldValue::Memo(s) => s.trim().to_string(),
        FieldValue::Numeric(Some(n)) | FieldValue::Double(n) | FieldValue::Currency(n) => format_number(*n),
        FieldValue::Float(Some(n)) => format_number(f64::from(*n)),
        FieldValue::Integer(n) => n.to_string(),
        FieldValue::Logical(Some(b)) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Numeric form of a field; numeric text is parsed.
pub(crate) fn field_number(value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Numeric(Some(n)) | FieldValue::Double(n) | FieldValue::Currency(n) => Some(*n),
        FieldValue::Float(Some(n)) => Some(f64::from(*n)),
        FieldValue::Integer(n) => Some(f64::from(*n)),
        FieldValue::Character(Some(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Whether the field holds a number in the dBase sense.
pub(crate) fn is_numeric(value: &FieldValue) -> bool {
    matches!(
        value,
        FieldValue::Numeric(_) | FieldValue::Float(_) | FieldValue::Integer(_) | FieldValue::Double(_) | FieldValue::Currency(_)
    )
}

/// Integral values print without a fractional part so ids stay ids.
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 { format!("{}", n as i64) } else { n.to_string() }
}
