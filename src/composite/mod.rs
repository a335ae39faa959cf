//! Stage 5: composite index and regional roll-up.

mod export;
mod region;

use anyhow::Result;
use ahash::AHashMap;
use polars::prelude::{Column, DataFrame, DataType};

use region::{roll_up, RegionScore};

use crate::{
    common::{finite, min_max, DebugReport},
    config::Config,
    error::Error,
    geom::Crs,
    io::csv::read_table,
    layer::{ID_COLUMN, REGION_NAME_COLUMN},
    pack::{AoiPackage, DiskPack},
    pipeline::{Artifacts, Stage},
};

pub(crate) const SENSITIVITY_INDEX: &str = "sensitivity_index";
pub(crate) const ADAPTIVE_INDEX: &str = "adaptive_capacity_index";
pub(crate) const EXPOSURE_INDEX: &str = "exposure_index";

/// The three component score tables, keyed by `DGUID`.
pub(crate) struct Components {
    pub sensitivity: DataFrame,
    pub adaptive: DataFrame,
    pub exposure: DataFrame,
}

/// Stage 5 outputs held in memory.
pub(crate) struct Composite {
    /// One row per AOI unit, in package order.
    pub units: DataFrame,
    /// One row per region with data, sorted by name.
    pub regions: DataFrame,
    /// Every region's attributes with its stats left-joined, in layer order.
    pub region_props: DataFrame,
    pub report: DebugReport,
}

/// Component columns carried into the composite, in output order.
fn carried_columns(config: &Config) -> [(&'static str, Vec<String>); 3] {
    let s = &config.sensitivity;
    let sensitivity = s.indicators.iter().map(|spec| spec.key.clone())
        .chain([s.grouped.key.clone()])
        .chain(s.percents.iter().map(|p| p.output.clone()))
        .chain(s.components.iter().map(|c| format!("{c}_n01")))
        .chain([SENSITIVITY_INDEX.to_string()])
        .collect();
    let adaptive = [ADAPTIVE_INDEX.to_string(), "green_frac".to_string()].into_iter()
        .chain(config.adaptive.classes.iter().map(|c| format!("frac_{}", c.label)))
        .collect();
    let exposure = vec!["exposure_mean".to_string(), EXPOSURE_INDEX.to_string()];
    [("sensitivity", sensitivity), ("adaptive capacity", adaptive), ("exposure", exposure)]
}

/// Rows of `table` for each universe id; `None` where the id is absent.
fn align(table: &DataFrame, context: &str, universe: &[&str]) -> Result<Vec<Option<usize>>> {
    let ids = table.column(ID_COLUMN).map_err(|_| missing(context, ID_COLUMN, table))?;
    let ids = ids.cast(&DataType::String)?;
    let mut rows: AHashMap<&str, usize> = AHashMap::new();
    for (row, id) in ids.str()?.into_iter().enumerate() {
        if let Some(id) = id {
            rows.entry(id).or_insert(row);
        }
    }
    Ok(universe.iter().map(|id| rows.get(id).copied()).collect())
}

fn missing(context: &str, name: &str, table: &DataFrame) -> Error {
    Error::MissingColumn {
        context: context.to_string(),
        expected: vec![name.to_string()],
        available: table.get_column_names().iter().map(|c| c.to_string()).collect(),
    }
}

fn gather(table: &DataFrame, name: &str, rows: &[Option<usize>]) -> Result<Vec<Option<f64>>> {
    let values = table.column(name)?.cast(&DataType::Float64)?;
    let values = values.f64()?;
    Ok(rows.iter().map(|row| row.and_then(|r| values.get(r))).collect())
}

/// Left-join the components onto the AOI units and score units and regions.
pub(crate) fn build(package: &AoiPackage, components: &Components, config: &Config) -> Result<Composite> {
    let units = &package.units;
    let universe: Vec<&str> = units.ids().iter().map(|id| id.as_str()).collect();
    let n = universe.len();

    let tables = [&components.sensitivity, &components.adaptive, &components.exposure];
    let required = [SENSITIVITY_INDEX, ADAPTIVE_INDEX, EXPOSURE_INDEX];
    let mut columns = vec![units.id_column()];
    let mut values: AHashMap<String, Vec<Option<f64>>> = AHashMap::new();
    let mut matched = [0usize; 3];

    for (i, ((context, wanted), table)) in carried_columns(config).into_iter().zip(tables).enumerate() {
        if table.column(required[i]).is_err() {
            return Err(missing(context, required[i], table).into());
        }
        let rows = align(table, context, &universe)?;
        matched[i] = rows.iter().flatten().count();
        for name in wanted {
            if table.column(&name).is_err() || values.contains_key(&name) {
                continue;
            }
            let gathered = gather(table, &name, &rows)?;
            columns.push(Column::new(name.as_str().into(), gathered.clone()));
            values.insert(name, gathered);
        }
    }

    let population_field = &config.composite.population_field;
    let population = match values.get(population_field) {
        Some(pop) => pop.clone(),
        None => return Err(missing("sensitivity", population_field, &components.sensitivity).into()),
    };
    let index = |name: &str| values.get(name).cloned().unwrap_or_else(|| vec![None; n]);
    let (s, a, e) = (index(SENSITIVITY_INDEX), index(ADAPTIVE_INDEX), index(EXPOSURE_INDEX));

    let has = |v: &[Option<f64>]| v.iter().map(|x| finite(*x).is_some()).collect::<Vec<bool>>();
    let (has_s, has_a, has_e) = (has(&s), has(&a), has(&e));
    let complete: Vec<bool> = (0..n).map(|i| has_s[i] && has_a[i] && has_e[i]).collect();
    let hvi_raw: Vec<Option<f64>> = (0..n)
        .map(|i| match (complete[i], s[i], a[i], e[i]) {
            (true, Some(s), Some(a), Some(e)) => finite(Some(e * (s - a))),
            _ => None,
        })
        .collect();
    // Normalized over complete units only; incomplete rows are already null.
    let hvi_n01 = min_max(&hvi_raw);

    let analysis = Crs::from_epsg(config.crs.analysis)?;
    let unit_geoms = units.reproject(analysis)?;
    let regions = package.regions.reproject(analysis)?;
    let assignments = unit_geoms.geoms().largest_overlap(regions.geoms());
    let assigned = assignments.iter().flatten().count();
    if assigned == 0 {
        return Err(Error::degenerate(
            "the unit/region overlay",
            "no unit intersects any region with positive area; the layers may be in different CRSs",
        ).into());
    }
    let region_name: Vec<Option<&str>> = assignments.iter()
        .map(|a| a.and_then(|a| regions.names()[a.region].as_deref()))
        .collect();

    let complete_count = complete.iter().filter(|c| **c).count();
    if complete_count < n {
        tracing::warn!(incomplete = n - complete_count, "[composite] units missing a component have null scores");
    }

    columns.extend([
        Column::new("has_sensitivity".into(), has_s),
        Column::new("has_adaptive".into(), has_a),
        Column::new("has_exposure".into(), has_e),
        Column::new("hvi_complete".into(), complete),
        Column::new("hvi_raw".into(), hvi_raw.clone()),
        Column::new("hvi_index_n01".into(), hvi_n01.clone()),
        Column::new("region_name".into(), region_name),
    ]);
    let unit_table = DataFrame::new(columns)?;

    let scores = roll_up(regions.names(), &assignments, &population, &hvi_raw);
    let region_table = region_table(&scores)?;
    let region_props = region_props(&regions, &scores)?;

    let mut report = DebugReport::new("Stage 5: composite");
    report.section("join coverage")
        .line("units", n)
        .line("sensitivity rows matched", matched[0])
        .line("adaptive rows matched", matched[1])
        .line("exposure rows matched", matched[2])
        .line("hvi_complete", complete_count);
    report.section("missingness")
        .missingness(SENSITIVITY_INDEX, &s)
        .missingness(ADAPTIVE_INDEX, &a)
        .missingness(EXPOSURE_INDEX, &e)
        .missingness("hvi_raw", &hvi_raw);
    report.section("regions")
        .line("regions", regions.len())
        .line("units assigned to a region", assigned)
        .line("regions with a score", scores.len());
    let region_raw: Vec<Option<f64>> = scores.iter().map(|s| Some(s.hvi_raw_pw)).collect();
    report.section("distribution")
        .describe("hvi_raw", &hvi_raw)
        .describe("hvi_index_n01", &hvi_n01)
        .describe("region_hvi_raw_pw", &region_raw);

    Ok(Composite { units: unit_table, regions: region_table, region_props, report })
}

fn region_table(scores: &[RegionScore]) -> Result<DataFrame> {
    Ok(DataFrame::new(vec![
        Column::new(REGION_NAME_COLUMN.into(), scores.iter().map(|s| s.name.as_str()).collect::<Vec<_>>()),
        Column::new("region_hvi_raw_pw".into(), scores.iter().map(|s| s.hvi_raw_pw).collect::<Vec<_>>()),
        Column::new("region_pop_total".into(), scores.iter().map(|s| s.pop_total).collect::<Vec<_>>()),
        Column::new("da_count_used".into(), scores.iter().map(|s| s.units_used as u32).collect::<Vec<_>>()),
        Column::new("region_hvi_n01".into(), scores.iter().map(|s| s.hvi_n01).collect::<Vec<_>>()),
    ])?)
}

/// Region attributes with stats joined by name; regions without data get nulls.
fn region_props(regions: &crate::layer::RegionLayer, scores: &[RegionScore]) -> Result<DataFrame> {
    let by_name: AHashMap<&str, &RegionScore> = scores.iter().map(|s| (s.name.as_str(), s)).collect();
    let hits: Vec<Option<&RegionScore>> = regions.names().iter()
        .map(|name| name.as_deref().and_then(|name| by_name.get(name).copied()))
        .collect();
    let mut props = regions.attrs().clone();
    props.with_column(Column::new("region_hvi_raw_pw".into(), hits.iter().map(|h| h.map(|s| s.hvi_raw_pw)).collect::<Vec<_>>()))?;
    props.with_column(Column::new("region_pop_total".into(), hits.iter().map(|h| h.map(|s| s.pop_total)).collect::<Vec<_>>()))?;
    props.with_column(Column::new("da_count_used".into(), hits.iter().map(|h| h.map(|s| s.units_used as u32)).collect::<Vec<_>>()))?;
    props.with_column(Column::new("region_hvi_n01".into(), hits.iter().map(|h| h.and_then(|s| s.hvi_n01)).collect::<Vec<_>>()))?;
    Ok(props)
}

pub(crate) fn run(config: &Config, artifacts: &Artifacts) -> Result<()> {
    let package = AoiPackage::read(&DiskPack::new(artifacts.aoi_package()))?;
    let components = Components {
        sensitivity: read_table(&artifacts.sensitivity(), ID_COLUMN)?,
        adaptive: read_table(&artifacts.adaptive(), ID_COLUMN)?,
        exposure: read_table(&artifacts.exposure(), ID_COLUMN)?,
    };
    tracing::info!(units = package.units.len(), regions = package.regions.len(), "[composite] joining components");

    let result = build(&package, &components, config)?;
    export::write_all(&result, &package, config, artifacts)?;
    result.report.write(&artifacts.report(Stage::Composite))?;
    tracing::info!(
        units = result.units.height(), regions = result.regions.height(),
        "[composite] wrote exports to {}", artifacts.out.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::fixtures::package;
    use approx::assert_relative_eq;

    fn table(columns: Vec<Column>) -> DataFrame { DataFrame::new(columns).unwrap() }

    fn components() -> Components {
        Components {
            sensitivity: table(vec![
                Column::new(ID_COLUMN.into(), vec!["A", "B", "C"]),
                Column::new("pop_total".into(), vec![Some(50.0), Some(100.0), Some(300.0)]),
                Column::new(SENSITIVITY_INDEX.into(), vec![Some(0.8), Some(0.6), Some(0.9)]),
            ]),
            adaptive: table(vec![
                Column::new(ID_COLUMN.into(), vec!["A", "B", "C"]),
                Column::new(ADAPTIVE_INDEX.into(), vec![Some(0.3), Some(0.2), Some(0.3)]),
            ]),
            exposure: table(vec![
                // "B" has no exposure row; "Z" is not in the AOI.
                Column::new(ID_COLUMN.into(), vec!["A", "C", "Z"]),
                Column::new(EXPOSURE_INDEX.into(), vec![Some(0.5), Some(1.0), Some(1.0)]),
            ]),
        }
    }

    fn floats(df: &DataFrame, name: &str) -> Vec<Option<f64>> {
        df.column(name).unwrap().cast(&DataType::Float64).unwrap().f64().unwrap().into_iter().collect()
    }

    #[test]
    fn gated_composite_over_universe() {
        let result = build(&package(), &components(), &Config::default()).unwrap();
        let units = &result.units;
        let ids: Vec<Option<&str>> = units.column(ID_COLUMN).unwrap().str().unwrap().into_iter().collect();
        assert_eq!(ids, vec![Some("A"), Some("B"), Some("C")]);

        let raw = floats(units, "hvi_raw");
        assert_relative_eq!(raw[0].unwrap(), 0.25);
        assert_eq!(raw[1], None);
        assert_relative_eq!(raw[2].unwrap(), 0.6);
        assert_eq!(floats(units, "hvi_index_n01"), vec![Some(0.0), None, Some(1.0)]);

        let complete: Vec<Option<bool>> = units.column("hvi_complete").unwrap().bool().unwrap().into_iter().collect();
        assert_eq!(complete, vec![Some(true), Some(false), Some(true)]);
    }

    #[test]
    fn units_get_largest_overlap_region() {
        let result = build(&package(), &components(), &Config::default()).unwrap();
        let names: Vec<Option<&str>> = result.units.column("region_name").unwrap().str().unwrap().into_iter().collect();
        assert_eq!(names, vec![Some("West"), Some("East"), Some("East")]);
    }

    #[test]
    fn region_score_is_population_weighted() {
        let mut components = components();
        components.exposure = table(vec![
            Column::new(ID_COLUMN.into(), vec!["A", "B", "C"]),
            Column::new(EXPOSURE_INDEX.into(), vec![Some(0.5), Some(0.5), Some(1.0)]),
        ]);
        components.sensitivity = table(vec![
            Column::new(ID_COLUMN.into(), vec!["A", "B", "C"]),
            Column::new("pop_total".into(), vec![Some(50.0), Some(100.0), Some(300.0)]),
            Column::new(SENSITIVITY_INDEX.into(), vec![Some(0.8), Some(0.6), Some(0.9)]),
        ]);
        let result = build(&package(), &components, &Config::default()).unwrap();
        // East: B raw 0.5 * 0.4 = 0.2 (pop 100), C raw 0.6 (pop 300).
        let regions = &result.regions;
        let names: Vec<Option<&str>> = regions.column(REGION_NAME_COLUMN).unwrap().str().unwrap().into_iter().collect();
        assert_eq!(names, vec![Some("East"), Some("West")]);
        assert_relative_eq!(floats(regions, "region_hvi_raw_pw")[0].unwrap(), 0.5);
        assert_eq!(floats(regions, "region_pop_total")[0], Some(400.0));
        assert_eq!(floats(regions, "da_count_used"), vec![Some(2.0), Some(1.0)]);
        assert_eq!(floats(regions, "region_hvi_n01"), vec![Some(1.0), Some(0.0)]);
    }

    #[test]
    fn regions_without_data_keep_null_stats() {
        let mut components = components();
        components.adaptive = table(vec![
            Column::new(ID_COLUMN.into(), vec!["B", "C"]),
            Column::new(ADAPTIVE_INDEX.into(), vec![Some(0.2), Some(0.3)]),
        ]);
        let result = build(&package(), &components, &Config::default()).unwrap();
        assert_eq!(result.regions.height(), 1);
        assert_eq!(result.region_props.height(), 2);
        assert_eq!(floats(&result.region_props, "region_hvi_raw_pw")[0], None);
    }

    #[test]
    fn missing_index_column_lists_present_columns() {
        let mut components = components();
        components.exposure = table(vec![
            Column::new(ID_COLUMN.into(), vec!["A"]),
            Column::new("exposure_mean".into(), vec![30.0]),
        ]);
        let err = build(&package(), &components, &Config::default()).err().unwrap();
        match err.downcast_ref::<Error>() {
            Some(Error::MissingColumn { expected, available, .. }) => {
                assert_eq!(expected, &vec![EXPOSURE_INDEX.to_string()]);
                assert!(available.contains(&"exposure_mean".to_string()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn disjoint_regions_are_degenerate() {
        let mut pkg = package();
        let far = crate::geom::fixtures::rect(0.0, 0.0, 10.0, 10.0);
        pkg.regions = crate::layer::RegionLayer::from_shapes(
            table(vec![Column::new(REGION_NAME_COLUMN.into(), vec!["Nowhere"])]),
            vec![far],
            pkg.crs(),
        ).unwrap();
        let err = build(&pkg, &components(), &Config::default()).err().unwrap();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Degenerate { .. })));
    }
}
