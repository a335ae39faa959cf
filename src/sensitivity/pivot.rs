use crate::{
    common::{min_max, partial_mean},
    config::SensitivityConfig,
};

/// One accepted census value, already mapped to a unit and an indicator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct Matched {
    /// Row in the sorted unit universe.
    pub unit: usize,
    /// Position in [`indicator_keys`].
    pub slot: usize,
    pub value: Option<f64>,
}

/// Indicator columns in output order: single-source keys, then the grouped key.
pub(super) fn indicator_keys(config: &SensitivityConfig) -> Vec<String> {
    config.indicators.iter()
        .map(|spec| spec.key.clone())
        .chain(std::iter::once(config.grouped.key.clone()))
        .collect()
}

/// Named float columns aligned with the unit universe.
#[derive(Debug, Default)]
pub(super) struct Columns {
    pub names: Vec<String>,
    pub values: Vec<Vec<Option<f64>>>,
}

impl Columns {
    pub(super) fn get(&self, name: &str) -> Option<&[Option<f64>]> {
        self.names.iter().position(|n| n == name).map(|i| self.values[i].as_slice())
    }

    fn push(&mut self, name: impl Into<String>, values: Vec<Option<f64>>) {
        self.names.push(name.into());
        self.values.push(values);
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Vec<Option<f64>>> {
        self.names.iter().position(|n| n == name).map(|i| &mut self.values[i])
    }
}

/// One row per unit: the first non-null value of each single-source
/// indicator, and the sum of the non-null grouped values (null if none).
pub(super) fn pivot(units: usize, matched: &[Matched], config: &SensitivityConfig) -> Columns {
    let keys = indicator_keys(config);
    let grouped = keys.len() - 1;
    let mut values = vec![vec![None; units]; keys.len()];
    for m in matched {
        let Some(value) = m.value else { continue };
        let cell = &mut values[m.slot][m.unit];
        *cell = match (*cell, m.slot == grouped) {
            (None, _) => Some(value),
            (Some(sum), true) => Some(sum + value),
            (Some(first), false) => Some(first),
        };
    }
    let mut columns = Columns::default();
    for (key, values) in keys.into_iter().zip(values) {
        columns.push(key, values);
    }
    columns
}

/// Corrections applied while deriving, for the report.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(super) struct Derived {
    /// Grouped totals nulled for being negative or above the population.
    pub grouped_out_of_bounds: usize,
}

/// Add percentages, `_n01` columns and `sensitivity_index`.
pub(super) fn derive(columns: &mut Columns, config: &SensitivityConfig) -> Derived {
    let mut derived = Derived::default();
    let units = columns.values.first().map_or(0, Vec::len);
    let population: Vec<Option<f64>> = columns.get(&config.population_key)
        .map_or_else(|| vec![None; units], <[_]>::to_vec);

    if let Some(grouped) = columns.get_mut(&config.grouped.key) {
        for (value, pop) in grouped.iter_mut().zip(population.iter().copied()) {
            if let Some(v) = *value {
                if v < 0.0 || pop.is_some_and(|pop| v > pop) {
                    *value = None;
                    derived.grouped_out_of_bounds += 1;
                }
            }
        }
    }

    for spec in &config.percents {
        let numerator = columns.get(&spec.numerator).map(<[_]>::to_vec).unwrap_or_default();
        let pct = (0..units)
            .map(|i| match (numerator.get(i).copied().flatten(), population[i]) {
                (Some(n), Some(pop)) if pop > 0.0 => Some(n / pop * 100.0),
                _ => None,
            })
            .collect();
        columns.push(spec.output.clone(), pct);
    }

    let normalized: Vec<Vec<Option<f64>>> = config.components.iter()
        .map(|name| min_max(columns.get(name).unwrap_or(&[])))
        .collect();
    let index = (0..units)
        .map(|i| partial_mean(normalized.iter().map(|col| col.get(i).copied().flatten())))
        .collect();
    for (name, values) in config.components.iter().zip(normalized) {
        let values = if values.is_empty() { vec![None; units] } else { values };
        columns.push(format!("{name}_n01"), values);
    }
    columns.push("sensitivity_index", index);
    derived
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn slot(config: &SensitivityConfig, key: &str) -> usize {
        indicator_keys(config).iter().position(|k| k == key).unwrap()
    }

    #[test]
    fn first_value_wins_and_groups_sum() {
        let config = SensitivityConfig::default();
        let (pop, seniors) = (slot(&config, "pop_total"), slot(&config, "seniors_65plus_count"));
        let matched = [
            Matched { unit: 0, slot: pop, value: None },
            Matched { unit: 0, slot: pop, value: Some(100.0) },
            Matched { unit: 0, slot: pop, value: Some(999.0) },
            Matched { unit: 0, slot: seniors, value: Some(10.0) },
            Matched { unit: 0, slot: seniors, value: Some(5.0) },
            Matched { unit: 1, slot: seniors, value: None },
        ];
        let columns = pivot(2, &matched, &config);
        assert_eq!(columns.get("pop_total").unwrap(), &[Some(100.0), None]);
        assert_eq!(columns.get("seniors_65plus_count").unwrap(), &[Some(15.0), None]);
    }

    #[test]
    fn percentages_need_positive_population() {
        let config = SensitivityConfig::default();
        let (pop, alone) = (slot(&config, "pop_total"), slot(&config, "living_alone_count"));
        let matched = [
            Matched { unit: 0, slot: pop, value: Some(200.0) },
            Matched { unit: 0, slot: alone, value: Some(50.0) },
            Matched { unit: 1, slot: pop, value: Some(0.0) },
            Matched { unit: 1, slot: alone, value: Some(3.0) },
        ];
        let mut columns = pivot(2, &matched, &config);
        derive(&mut columns, &config);
        assert_eq!(columns.get("pct_living_alone").unwrap(), &[Some(25.0), None]);
    }

    #[test]
    fn grouped_above_population_is_nulled() {
        let config = SensitivityConfig::default();
        let (pop, seniors) = (slot(&config, "pop_total"), slot(&config, "seniors_65plus_count"));
        let matched = [
            Matched { unit: 0, slot: pop, value: Some(100.0) },
            Matched { unit: 0, slot: seniors, value: Some(150.0) },
            Matched { unit: 1, slot: pop, value: Some(100.0) },
            Matched { unit: 1, slot: seniors, value: Some(20.0) },
        ];
        let mut columns = pivot(2, &matched, &config);
        let derived = derive(&mut columns, &config);
        assert_eq!(derived.grouped_out_of_bounds, 1);
        assert_eq!(columns.get("seniors_65plus_count").unwrap(), &[None, Some(20.0)]);
        assert_eq!(columns.get("pct_seniors_65plus").unwrap(), &[None, Some(20.0)]);
    }

    #[test]
    fn index_is_partial_mean_of_normalized() {
        let config = SensitivityConfig::default();
        let (pop, unemployment, low_income) = (
            slot(&config, "pop_total"),
            slot(&config, "unemployment_rate"),
            slot(&config, "low_income_rate"),
        );
        let matched = [
            Matched { unit: 0, slot: pop, value: Some(100.0) },
            Matched { unit: 1, slot: pop, value: Some(100.0) },
            Matched { unit: 2, slot: pop, value: Some(100.0) },
            Matched { unit: 0, slot: unemployment, value: Some(2.0) },
            Matched { unit: 1, slot: unemployment, value: Some(4.0) },
            Matched { unit: 2, slot: unemployment, value: Some(6.0) },
            Matched { unit: 0, slot: low_income, value: Some(10.0) },
            Matched { unit: 2, slot: low_income, value: Some(30.0) },
        ];
        let mut columns = pivot(3, &matched, &config);
        derive(&mut columns, &config);

        let index = columns.get("sensitivity_index").unwrap();
        assert_relative_eq!(index[0].unwrap(), 0.0);
        assert_relative_eq!(index[1].unwrap(), 0.5);
        assert_relative_eq!(index[2].unwrap(), 1.0);
        // Seniors and living-alone shares are all null, so their `_n01` columns are too.
        assert!(columns.get("pct_living_alone_n01").unwrap().iter().all(Option::is_none));
    }
}
