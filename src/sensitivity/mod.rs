//! Stage 2: social sensitivity from the census profile.
//!
//! The profile is a long table (one row per geography and characteristic)
//! far larger than memory, so it is streamed in chunks through a filter
//! cascade and only the matching rows are kept.

mod cascade;
mod census;
mod pivot;

use std::{collections::BTreeMap, fs::File, io::{BufReader, Read}};

use ahash::AHashMap;
use anyhow::{Context, Result};
use csv::ByteRecord;
use polars::prelude::{Column, DataFrame};

use cascade::Cascade;
use census::{CensusChunks, CensusColumns, CensusRow};
use pivot::{Matched, indicator_keys};

use crate::{
    common::DebugReport,
    config::{Config, SensitivityConfig, ValueField},
    error::Error,
    io::csv::write_table,
    layer::ID_COLUMN,
    pack::{AoiPackage, DiskPack},
    pipeline::{Artifacts, Stage},
    types::Dguid,
};

/// Where a matched label goes.
#[derive(Debug, Clone, Copy)]
enum Target {
    Single { slot: usize, field: ValueField },
    Grouped { slot: usize },
}

fn targets(config: &SensitivityConfig) -> AHashMap<String, Target> {
    let grouped = config.indicators.len();
    config.indicators.iter().enumerate()
        .map(|(slot, spec)| (spec.label.trim().to_string(), Target::Single { slot, field: spec.value }))
        .chain(config.grouped.labels.iter().map(|label| (label.trim().to_string(), Target::Grouped { slot: grouped })))
        .collect()
}

/// Rows of the long debug slice, one per matched census row.
#[derive(Debug, Default)]
struct LongSlice {
    ids: Vec<String>,
    levels: Vec<String>,
    geo_names: Vec<Option<String>>,
    characteristic_ids: Vec<Option<String>>,
    labels: Vec<String>,
    counts: Vec<Option<f64>>,
    rates: Vec<Option<f64>>,
    indicators: Vec<String>,
    values: Vec<Option<f64>>,
}

impl LongSlice {
    fn into_frame(self, config: &SensitivityConfig) -> Result<DataFrame> {
        Ok(DataFrame::new(vec![
            Column::new(ID_COLUMN.into(), self.ids),
            Column::new(config.level_column.as_str().into(), self.levels),
            Column::new("GEO_NAME".into(), self.geo_names),
            Column::new("CHARACTERISTIC_ID".into(), self.characteristic_ids),
            Column::new(config.label_column.as_str().into(), self.labels),
            Column::new(config.count_column.as_str().into(), self.counts),
            Column::new(config.rate_column.as_str().into(), self.rates),
            Column::new("indicator".into(), self.indicators),
            Column::new("value".into(), self.values),
        ])?)
    }
}

/// Stage 2 outputs held in memory.
pub(crate) struct Sensitivity {
    /// One row per universe unit, sorted by `DGUID`.
    pub table: DataFrame,
    /// Every census row that passed the cascade.
    pub long: DataFrame,
    pub report: DebugReport,
}

/// Stream `source` and score every unit in `universe`.
pub(crate) fn aggregate<R: Read>(source: R, universe: &[Dguid], config: &SensitivityConfig) -> Result<Sensitivity> {
    let mut chunks = CensusChunks::new(source, config.chunk_size);
    let header = chunks.header()?;
    let columns = CensusColumns::resolve(&header, config)?;

    let mut ids = universe.to_vec();
    ids.sort();
    ids.dedup();
    let index: AHashMap<Dguid, usize> = ids.iter().cloned().enumerate().map(|(i, id)| (id, i)).collect();
    let targets = targets(config);
    let keys = indicator_keys(config);
    let level = config.geo_level.to_lowercase();

    let mut cascade = Cascade::<ByteRecord>::new()
        .stage("geography level", |rec| CensusRow::new(rec, &columns).level().to_lowercase().contains(&level))
        .stage("characteristic label", |rec| targets.contains_key(&CensusRow::new(rec, &columns).label()))
        .stage("unit universe", |rec| index.contains_key(CensusRow::new(rec, &columns).id().as_str()));

    let mut matched = Vec::new();
    let mut long = LongSlice::default();
    let mut by_indicator: BTreeMap<&str, usize> = BTreeMap::new();
    let mut grouped_nulled = 0;
    let mut chunk_count = 0;

    for chunk in chunks {
        let chunk = chunk?;
        chunk_count += 1;
        for record in &chunk {
            if !cascade.admit(record) {
                continue;
            }
            let row = CensusRow::new(record, &columns);
            let (id, label) = (row.id(), row.label());
            let (count, rate) = (row.count(), row.rate());
            let Some(&target) = targets.get(&label) else { continue };
            let (slot, value) = match target {
                Target::Single { slot, field: ValueField::Count } => (slot, count),
                Target::Single { slot, field: ValueField::Rate } => (slot, rate),
                // A count equal to the rate is a rate row mislabelled as a count.
                Target::Grouped { slot } => match count {
                    Some(c) if rate != Some(c) => (slot, Some(c)),
                    _ => {
                        grouped_nulled += 1;
                        (slot, None)
                    }
                },
            };
            *by_indicator.entry(keys[slot].as_str()).or_default() += 1;
            matched.push(Matched { unit: index[id.as_str()], slot, value });

            long.levels.push(row.level().trim().to_string());
            long.geo_names.push(row.geo_name());
            long.characteristic_ids.push(row.characteristic_id());
            long.ids.push(id);
            long.labels.push(label);
            long.counts.push(count);
            long.rates.push(rate);
            long.indicators.push(keys[slot].clone());
            long.values.push(value);
        }
        tracing::debug!(chunk = chunk_count, rows = cascade.seen(), matched = matched.len(), "[sensitivity] chunk done");
    }

    let rejections = cascade.rejections();
    let (seen, passed) = (cascade.seen(), cascade.passed());
    if passed == 0 {
        let summary = rejections.iter().map(|(stage, n)| format!("{stage}: {n}")).collect::<Vec<_>>().join(", ");
        return Err(Error::degenerate(
            "census label matching",
            format!(
                "none of {seen} census rows passed the filters ({summary}); check the GEO_LEVEL text \
                 and the CHARACTERISTIC_NAME labels for drift, and that the AOI units use census DGUIDs"
            ),
        ).into());
    }
    if grouped_nulled > 0 {
        tracing::warn!(rows = grouped_nulled, key = %config.grouped.key, "[sensitivity] nulled missing or rate-like grouped counts");
    }

    let mut pivoted = pivot::pivot(ids.len(), &matched, config);
    let derived = pivot::derive(&mut pivoted, config);
    if derived.grouped_out_of_bounds > 0 {
        tracing::warn!(units = derived.grouped_out_of_bounds, key = %config.grouped.key, "[sensitivity] nulled totals outside [0, population]");
    }

    let mut report = DebugReport::new("Stage 2: sensitivity");
    report.section("input")
        .line("census rows read", seen)
        .line("chunks", chunk_count)
        .line("chunk size", config.chunk_size)
        .line("universe units", ids.len());
    report.section("filter cascade");
    for (stage, rejected) in &rejections {
        report.line(&format!("rejected by {stage}"), rejected);
    }
    report.line("rows kept", passed);
    report.section("matched rows by indicator");
    for key in &keys {
        report.line(key, by_indicator.get(key.as_str()).copied().unwrap_or(0));
    }
    report.section("corrections")
        .line(&format!("{} rows nulled (missing or rate-like)", config.grouped.key), grouped_nulled)
        .line(&format!("{} totals nulled (outside [0, population])", config.grouped.key), derived.grouped_out_of_bounds);
    report.section("missingness");
    for (name, values) in pivoted.names.iter().zip(&pivoted.values) {
        report.missingness(name, values);
    }
    report.section("distribution");
    if let Some(index) = pivoted.get("sensitivity_index") {
        report.describe("sensitivity_index", index);
    }

    let mut table = vec![Column::new(ID_COLUMN.into(), ids.iter().map(Dguid::as_str).collect::<Vec<_>>())];
    table.extend(pivoted.names.iter().zip(pivoted.values)
        .map(|(name, values)| Column::new(name.as_str().into(), values)));

    Ok(Sensitivity { table: DataFrame::new(table)?, long: long.into_frame(config)?, report })
}

pub(crate) fn run(config: &Config, artifacts: &Artifacts) -> Result<()> {
    let package = AoiPackage::read(&DiskPack::new(artifacts.aoi_package()))?;
    let path = config.census_input()?;
    tracing::info!(path = %path.display(), units = package.units.len(), "[sensitivity] streaming census profile");

    let file = File::open(&path).with_context(|| format!("Failed to open census file {}", path.display()))?;
    let result = aggregate(BufReader::new(file), package.units.ids(), &config.sensitivity)?;

    write_table(&result.table, &artifacts.sensitivity())?;
    write_table(&result.long, &artifacts.census_long())?;
    result.report.write(&artifacts.report(Stage::Sensitivity))?;
    tracing::info!(units = result.table.height(), matched = result.long.height(), "[sensitivity] wrote scores");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const HEADER: &str = "DGUID,GEO_LEVEL,GEO_NAME,CHARACTERISTIC_ID,CHARACTERISTIC_NAME,C1_COUNT_TOTAL,C10_RATE_TOTAL\n";

    fn rows(lines: &[&str]) -> String {
        let mut csv = HEADER.to_string();
        for line in lines {
            csv.push_str(line);
            csv.push('\n');
        }
        csv
    }

    fn universe() -> Vec<Dguid> {
        vec![Dguid::from("0002"), Dguid::from("0001")]
    }

    fn column(df: &DataFrame, name: &str) -> Vec<Option<f64>> {
        df.column(name).unwrap().f64().unwrap().into_iter().collect()
    }

    #[test]
    fn cascade_counts_rejections_by_stage() {
        let csv = rows(&[
            "0001,Dissemination area,A,1,\"Population, 2021\",100,",
            "0001,Province,P,1,\"Population, 2021\",5000000,",
            "0001,Dissemination area,A,9,Median age,40,",
            "9999,Dissemination area,Z,1,\"Population, 2021\",50,",
            "0002,DISSEMINATION AREA,B,1,\"Population, 2021\",200,",
        ]);
        let mut config = SensitivityConfig::default();
        config.chunk_size = 2;
        let result = aggregate(csv.as_bytes(), &universe(), &config).unwrap();

        let text = result.report.as_str();
        assert!(text.contains("rejected by geography level: 1"));
        assert!(text.contains("rejected by characteristic label: 1"));
        assert!(text.contains("rejected by unit universe: 1"));
        assert!(text.contains("chunks: 3"));
        assert_eq!(column(&result.table, "pop_total"), vec![Some(100.0), Some(200.0)]);
        assert_eq!(result.long.height(), 2);
    }

    #[test]
    fn table_is_sorted_and_covers_universe() {
        let csv = rows(&["0002,Dissemination area,B,1,\"Population, 2021\",200,"]);
        let result = aggregate(csv.as_bytes(), &universe(), &SensitivityConfig::default()).unwrap();
        let ids: Vec<Option<&str>> = result.table.column(ID_COLUMN).unwrap().str().unwrap().into_iter().collect();
        assert_eq!(ids, vec![Some("0001"), Some("0002")]);
        assert_eq!(column(&result.table, "pop_total"), vec![None, Some(200.0)]);
        assert_eq!(column(&result.table, "sensitivity_index"), vec![None, None]);
    }

    #[test]
    fn seniors_sum_age_bands_and_skip_rate_rows() {
        let csv = rows(&[
            "0001,Dissemination area,A,1,\"Population, 2021\",100,",
            "0001,Dissemination area,A,2,65 to 74 years,10,",
            "0001,Dissemination area,A,3,75 years and over,5,",
            "0002,Dissemination area,B,1,\"Population, 2021\",100,",
            "0002,Dissemination area,B,2,65 to 74 years,12.5,12.5",
            "0002,Dissemination area,B,3,75 years and over,,",
        ]);
        let result = aggregate(csv.as_bytes(), &universe(), &SensitivityConfig::default()).unwrap();
        assert_eq!(column(&result.table, "seniors_65plus_count"), vec![Some(15.0), None]);
        let pct = column(&result.table, "pct_seniors_65plus");
        assert_relative_eq!(pct[0].unwrap(), 15.0);
        assert_eq!(pct[1], None);
        assert!(result.report.as_str().contains("seniors_65plus_count rows nulled (missing or rate-like): 2"));
    }

    #[test]
    fn rates_come_from_rate_column() {
        let csv = rows(&[
            "0001,Dissemination area,A,7,Unemployment rate,999,4.0",
            "0002,Dissemination area,B,7,Unemployment rate,999,8.0",
        ]);
        let result = aggregate(csv.as_bytes(), &universe(), &SensitivityConfig::default()).unwrap();
        assert_eq!(column(&result.table, "unemployment_rate"), vec![Some(4.0), Some(8.0)]);
        assert_eq!(column(&result.table, "unemployment_rate_n01"), vec![Some(0.0), Some(1.0)]);
        assert_eq!(column(&result.table, "sensitivity_index"), vec![Some(0.0), Some(1.0)]);
    }

    #[test]
    fn no_match_is_label_drift() {
        let csv = rows(&["0001,Dissemination area,A,1,Total - Age,100,"]);
        let err = aggregate(csv.as_bytes(), &universe(), &SensitivityConfig::default()).err().unwrap();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Degenerate { .. })));
        assert!(err.to_string().contains("characteristic label: 1"));
    }
}
