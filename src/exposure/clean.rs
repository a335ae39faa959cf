use std::io::Read;

use anyhow::{Context, Result};
use ahash::AHashMap;
use csv::{ReaderBuilder, StringRecord};

use crate::{common::resolve_column, config::ExposureConfig};

/// Uppercase with all whitespace removed; blank codes are `None`.
pub(super) fn normalize_postal(raw: &str) -> Option<String> {
    let code: String = raw.chars().filter(|c| !c.is_whitespace()).flat_map(char::to_uppercase).collect();
    (!code.is_empty()).then_some(code)
}

fn parse_value(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Counts collected while cleaning the values table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(super) struct ValueStats {
    pub rows: usize,
    pub numeric_before: usize,
    pub sentinel_removed: usize,
    pub out_of_range_removed: usize,
    pub valid_after: usize,
    pub postal_codes: usize,
    pub duplicate_rows: usize,
}

/// One measurement per postal code.
#[derive(Debug, Default)]
pub(super) struct PostalValues {
    pub values: AHashMap<String, Option<f64>>,
    pub stats: ValueStats,
}

fn header_of<R: Read>(reader: &mut csv::Reader<R>, what: &str) -> Result<Vec<String>> {
    let header = reader.headers().with_context(|| format!("Failed to read {what} header"))?;
    Ok(header.iter().map(|name| name.trim_start_matches('\u{feff}').to_string()).collect())
}

/// Read, clean and deduplicate the postal-code values table.
///
/// Sentinels are nulled first, then values outside the valid range. Per
/// postal code the first non-null value in file order wins; a code with no
/// valid value maps to `None`.
pub(super) fn read_values<R: Read>(source: R, config: &ExposureConfig) -> Result<PostalValues> {
    let mut reader = ReaderBuilder::new().flexible(true).from_reader(source);
    let header = header_of(&mut reader, "exposure values")?;
    let postal = resolve_column("exposure values", &[&config.value_postal_field], &header, true)?.index;
    let value = resolve_column("exposure values", &[&config.value_field], &header, true)?.index;
    let [lo, hi] = config.valid_range;

    let mut out = PostalValues::default();
    let mut record = StringRecord::new();
    while reader.read_record(&mut record).context("Failed to read exposure values row")? {
        out.stats.rows += 1;
        let mut v = record.get(value).and_then(parse_value);
        if v.is_some() {
            out.stats.numeric_before += 1;
        }
        if v.is_some_and(|v| config.sentinels.contains(&v)) {
            out.stats.sentinel_removed += 1;
            v = None;
        }
        if v.is_some_and(|v| v < lo || v > hi) {
            out.stats.out_of_range_removed += 1;
            v = None;
        }
        if v.is_some() {
            out.stats.valid_after += 1;
        }

        let Some(code) = record.get(postal).and_then(normalize_postal) else { continue };
        match out.values.get_mut(&code) {
            Some(slot) => {
                out.stats.duplicate_rows += 1;
                if slot.is_none() {
                    *slot = v;
                }
            }
            None => {
                out.values.insert(code, v);
            }
        }
    }
    out.stats.postal_codes = out.values.len();
    Ok(out)
}

/// A postal-code location with a valid measurement.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ValuedPoint {
    pub postal: String,
    pub lon: f64,
    pub lat: f64,
    pub value: f64,
}

/// Counts collected while merging coordinates onto values.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(super) struct CoordStats {
    pub rows: usize,
    /// Rows with both coordinates present and in range.
    pub valid_coords: usize,
    /// Valid-coordinate rows whose postal code has a valid value.
    pub matched: usize,
}

/// Read the coordinate table and attach each row's value (many rows to one value).
///
/// Rows with a missing or out-of-range coordinate, or without a valid value,
/// are dropped.
pub(super) fn read_points<R: Read>(
    source: R,
    values: &PostalValues,
    config: &ExposureConfig,
) -> Result<(Vec<ValuedPoint>, CoordStats)> {
    let mut reader = ReaderBuilder::new().flexible(true).from_reader(source);
    let header = header_of(&mut reader, "exposure coordinates")?;
    let postal = resolve_column("exposure coordinates", &[&config.coord_postal_field], &header, true)?.index;
    let lat = resolve_column("exposure coordinates", &[&config.lat_field], &header, true)?.index;
    let lon = resolve_column("exposure coordinates", &[&config.lon_field], &header, true)?.index;

    let mut stats = CoordStats::default();
    let mut points = Vec::new();
    let mut record = StringRecord::new();
    while reader.read_record(&mut record).context("Failed to read exposure coordinates row")? {
        stats.rows += 1;
        let (Some(y), Some(x)) = (record.get(lat).and_then(parse_value), record.get(lon).and_then(parse_value)) else {
            continue;
        };
        if !(-90.0..=90.0).contains(&y) || !(-180.0..=180.0).contains(&x) {
            continue;
        }
        stats.valid_coords += 1;

        let Some(code) = record.get(postal).and_then(normalize_postal) else { continue };
        let Some(&Some(value)) = values.values.get(&code) else { continue };
        stats.matched += 1;
        points.push(ValuedPoint { postal: code, lon: x, lat: y, value });
    }
    Ok((points, stats))
}
