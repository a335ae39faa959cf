use std::{borrow::Cow, io::Read};

use anyhow::{Context, Result};
use csv::{ByteRecord, Reader, ReaderBuilder};

use crate::{
    common::{require_columns, resolve_column},
    config::SensitivityConfig,
};

/// Positions of the census columns this stage reads.
#[derive(Debug, Clone)]
pub(super) struct CensusColumns {
    pub id: usize,
    pub level: usize,
    pub label: usize,
    pub count: usize,
    pub rate: usize,
    /// Carried into the long debug slice when present.
    pub geo_name: Option<usize>,
    pub characteristic_id: Option<usize>,
}

impl CensusColumns {
    /// Resolve the configured names against a decoded header row.
    pub(super) fn resolve(header: &[String], config: &SensitivityConfig) -> Result<Self> {
        let required = [
            &config.id_column, &config.level_column, &config.label_column,
            &config.count_column, &config.rate_column,
        ];
        let found = require_columns("census profile", &required, header, false)?;
        let optional = |name: &str| resolve_column("census profile", &[name], header, false).ok().map(|r| r.index);
        Ok(Self {
            id: found[0].index,
            level: found[1].index,
            label: found[2].index,
            count: found[3].index,
            rate: found[4].index,
            geo_name: optional("GEO_NAME"),
            characteristic_id: optional("CHARACTERISTIC_ID"),
        })
    }
}

/// Census reader that yields bounded chunks of raw records.
///
/// Fields stay as bytes until a filter asks for them; the profile is
/// Windows-1252, so text is decoded lossily.
pub(super) struct CensusChunks<R: Read> {
    reader: Reader<R>,
    chunk_size: usize,
    done: bool,
}

impl<R: Read> CensusChunks<R> {
    pub(super) fn new(source: R, chunk_size: usize) -> Self {
        let reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(source);
        Self { reader, chunk_size: chunk_size.max(1), done: false }
    }

    /// Header names, trimmed and without a byte-order mark.
    pub(super) fn header(&mut self) -> Result<Vec<String>> {
        let header = self.reader.byte_headers().context("Failed to read census header")?;
        Ok(header.iter()
            .map(|field| decode(field).trim_start_matches('\u{feff}').trim().to_string())
            .collect())
    }
}

impl<R: Read> Iterator for CensusChunks<R> {
    type Item = Result<Vec<ByteRecord>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut chunk = Vec::with_capacity(self.chunk_size.min(65_536));
        while chunk.len() < self.chunk_size {
            let mut record = ByteRecord::new();
            match self.reader.read_byte_record(&mut record) {
                Ok(true) => chunk.push(record),
                Ok(false) => {
                    self.done = true;
                    break;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e).context("Failed to read census record"));
                }
            }
        }
        (!chunk.is_empty()).then_some(Ok(chunk))
    }
}

/// Lossy text of one field.
#[inline]
pub(super) fn decode(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

/// One census record, decoded on demand.
pub(super) struct CensusRow<'r> {
    record: &'r ByteRecord,
    columns: &'r CensusColumns,
}

impl<'r> CensusRow<'r> {
    #[inline]
    pub(super) fn new(record: &'r ByteRecord, columns: &'r CensusColumns) -> Self { Self { record, columns } }

    fn field(&self, idx: usize) -> Cow<'r, str> {
        self.record.get(idx).map_or(Cow::Borrowed(""), decode)
    }

    fn optional(&self, idx: Option<usize>) -> Option<String> {
        idx.map(|i| self.field(i).trim().to_string()).filter(|s| !s.is_empty())
    }

    pub(super) fn id(&self) -> String { self.field(self.columns.id).trim().to_string() }
    pub(super) fn level(&self) -> Cow<'r, str> { self.field(self.columns.level) }
    pub(super) fn label(&self) -> String { self.field(self.columns.label).trim().to_string() }
    pub(super) fn count(&self) -> Option<f64> { parse_number(&self.field(self.columns.count)) }
    pub(super) fn rate(&self) -> Option<f64> { parse_number(&self.field(self.columns.rate)) }
    pub(super) fn geo_name(&self) -> Option<String> { self.optional(self.columns.geo_name) }
    pub(super) fn characteristic_id(&self) -> Option<String> { self.optional(self.columns.characteristic_id) }
}

/// Numeric census cell; suppression markers (`x`, `..`, `F`) and blanks are null.
pub(super) fn parse_number(text: &str) -> Option<f64> {
    text.trim().replace(',', "").parse::<f64>().ok().filter(|v| v.is_finite())
}
