use std::collections::BTreeMap;

use crate::{common::min_max, geom::Assignment};

/// Population-weighted score of one named region.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct RegionScore {
    pub name: String,
    pub hvi_raw_pw: f64,
    pub pop_total: f64,
    pub units_used: usize,
    pub hvi_n01: Option<f64>,
}

/// Roll unit scores up to regions.
///
/// A unit counts toward its assigned region when its population is positive
/// and its raw score is present. Regions sharing a name are pooled. Only
/// regions with at least one counted unit appear, sorted by name.
pub(super) fn roll_up(
    names: &[Option<String>],
    assignments: &[Option<Assignment>],
    population: &[Option<f64>],
    hvi_raw: &[Option<f64>],
) -> Vec<RegionScore> {
    // name -> (sum pop * raw, sum pop, units)
    let mut acc: BTreeMap<&str, (f64, f64, usize)> = BTreeMap::new();
    for ((assignment, pop), raw) in assignments.iter().zip(population).zip(hvi_raw) {
        let (Some(assignment), Some(pop), Some(raw)) = (assignment, *pop, *raw) else { continue };
        if !(pop > 0.0) || !raw.is_finite() {
            continue;
        }
        let Some(name) = names[assignment.region].as_deref() else { continue };
        let entry = acc.entry(name).or_default();
        entry.0 += pop * raw;
        entry.1 += pop;
        entry.2 += 1;
    }

    let mut scores: Vec<RegionScore> = acc.into_iter()
        .map(|(name, (weighted, pop, units))| RegionScore {
            name: name.to_string(),
            hvi_raw_pw: weighted / pop,
            pop_total: pop,
            units_used: units,
            hvi_n01: None,
        })
        .collect();
    let n01 = min_max(&scores.iter().map(|s| Some(s.hvi_raw_pw)).collect::<Vec<_>>());
    for (score, value) in scores.iter_mut().zip(n01) {
        score.hvi_n01 = value;
    }
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn to(region: usize) -> Option<Assignment> { Some(Assignment { region, area: 1.0 }) }

    #[test]
    fn population_weighted_mean() {
        let names = [Some("East".to_string())];
        let scores = roll_up(&names, &[to(0), to(0)], &[Some(100.0), Some(300.0)], &[Some(0.2), Some(0.6)]);
        assert_eq!(scores.len(), 1);
        assert_relative_eq!(scores[0].hvi_raw_pw, 0.5);
        assert_relative_eq!(scores[0].pop_total, 400.0);
        assert_eq!(scores[0].units_used, 2);
        // One region has no spread to normalize over.
        assert_eq!(scores[0].hvi_n01, None);
    }

    #[test]
    fn ineligible_units_are_skipped() {
        let names = [Some("B".to_string()), Some("A".to_string()), Some("Empty".to_string())];
        let scores = roll_up(
            &names,
            &[to(0), to(0), to(0), None, to(1)],
            &[Some(10.0), Some(0.0), None, Some(50.0), Some(20.0)],
            &[Some(0.4), Some(0.9), Some(0.9), Some(0.9), None],
        );
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].name, "B");
        assert_eq!(scores[0].units_used, 1);
        assert_relative_eq!(scores[0].hvi_raw_pw, 0.4);
    }

    #[test]
    fn sorted_by_name_and_normalized() {
        let names = [Some("Zeta".to_string()), Some("Alpha".to_string())];
        let scores = roll_up(&names, &[to(0), to(1)], &[Some(1.0), Some(1.0)], &[Some(0.8), Some(0.2)]);
        let order: Vec<&str> = scores.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(order, vec!["Alpha", "Zeta"]);
        assert_eq!(scores[0].hvi_n01, Some(0.0));
        assert_eq!(scores[1].hvi_n01, Some(1.0));
    }
}
