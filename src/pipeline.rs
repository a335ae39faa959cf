use std::{fmt, path::PathBuf, str::FromStr};

use anyhow::{Context, Result};

use crate::{adaptive, aoi, composite, config::Config, error::Error, exposure, sensitivity};

/// The five pipeline stages, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Aoi,
    Sensitivity,
    Adaptive,
    Exposure,
    Composite,
}

impl Stage {
    pub const ALL: [Stage; 5] = [Stage::Aoi, Stage::Sensitivity, Stage::Adaptive, Stage::Exposure, Stage::Composite];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Aoi => "aoi",
            Stage::Sensitivity => "sensitivity",
            Stage::Adaptive => "adaptive",
            Stage::Exposure => "exposure",
            Stage::Composite => "composite",
        }
    }

    /// One-based position, as used in report file names.
    #[inline] pub fn number(&self) -> usize { *self as usize + 1 }

    /// Upstream artifacts this stage reads, with the stage that writes each.
    pub fn requires(&self, artifacts: &Artifacts) -> Vec<(PathBuf, Stage)> {
        let aoi = (artifacts.aoi_manifest(), Stage::Aoi);
        match self {
            Stage::Aoi => vec![],
            Stage::Sensitivity | Stage::Adaptive | Stage::Exposure => vec![aoi],
            Stage::Composite => vec![
                aoi,
                (artifacts.sensitivity(), Stage::Sensitivity),
                (artifacts.adaptive(), Stage::Adaptive),
                (artifacts.exposure(), Stage::Exposure),
            ],
        }
    }

    /// Fail with the first missing upstream artifact.
    pub fn check_preconditions(&self, artifacts: &Artifacts) -> Result<(), Error> {
        match self.requires(artifacts).into_iter().find(|(path, _)| !path.is_file()) {
            Some((path, producer)) => Err(Error::missing_artifact(path, producer)),
            None => Ok(()),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = String;

    /// Accepts the stage name or its number (`"3"` is `adaptive`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Stage::ALL.into_iter()
            .find(|stage| stage.name() == s || stage.number().to_string() == s)
            .ok_or_else(|| format!(
                "unknown stage {s:?} (expected one of {})",
                Stage::ALL.map(|stage| stage.name()).join(", "),
            ))
    }
}

/// Locations of every file the stages exchange.
#[derive(Debug, Clone)]
pub struct Artifacts {
    pub intermediate: PathBuf,
    pub out: PathBuf,
}

impl Artifacts {
    pub fn new(config: &Config) -> Self {
        Self { intermediate: config.paths.intermediate(), out: config.paths.out() }
    }

    #[inline] pub fn aoi_package(&self) -> PathBuf { self.intermediate.join("aoi") }
    #[inline] pub fn aoi_manifest(&self) -> PathBuf { self.aoi_package().join(crate::pack::MANIFEST) }
    #[inline] pub fn unit_preview(&self) -> PathBuf { self.intermediate.join("da_preview.geojson") }

    #[inline] pub fn sensitivity(&self) -> PathBuf { self.intermediate.join("sensitivity.csv") }
    #[inline] pub fn census_long(&self) -> PathBuf { self.intermediate.join("census_selected_long.csv") }

    #[inline] pub fn adaptive(&self) -> PathBuf { self.intermediate.join("adaptive_capacity.csv") }

    #[inline] pub fn exposure(&self) -> PathBuf { self.intermediate.join("exposure.csv") }
    #[inline] pub fn exposure_preview(&self) -> PathBuf { self.intermediate.join("exposure_points_preview.geojson") }

    #[inline] pub fn unit_components(&self) -> PathBuf { self.out.join("hvi_components.csv") }
    #[inline] pub fn unit_geojson(&self) -> PathBuf { self.out.join("hvi.geojson") }
    #[inline] pub fn region_components(&self) -> PathBuf { self.out.join("hvi_regions_components.csv") }
    #[inline] pub fn region_geojson(&self) -> PathBuf { self.out.join("hvi_regions.geojson") }

    /// `0N_<stage>_debug_report.txt` in the intermediate directory.
    pub fn report(&self, stage: Stage) -> PathBuf {
        self.intermediate.join(format!("{:02}_{}_debug_report.txt", stage.number(), stage.name()))
    }
}

/// Run one stage after checking that its inputs exist.
pub fn run_stage(stage: Stage, config: &Config) -> Result<()> {
    let artifacts = Artifacts::new(config);
    stage.check_preconditions(&artifacts)?;

    tracing::info!(stage = stage.name(), "[pipeline] starting stage {}", stage.number());
    let started = std::time::Instant::now();
    match stage {
        Stage::Aoi => aoi::run(config, &artifacts),
        Stage::Sensitivity => sensitivity::run(config, &artifacts),
        Stage::Adaptive => adaptive::run(config, &artifacts),
        Stage::Exposure => exposure::run(config, &artifacts),
        Stage::Composite => composite::run(config, &artifacts),
    }
    .with_context(|| format!("[pipeline] stage {} ({stage}) failed", stage.number()))?;

    tracing::info!(stage = stage.name(), elapsed_ms = started.elapsed().as_millis() as u64, "[pipeline] stage done");
    Ok(())
}

/// Run every stage in order, stopping at the first failure.
pub fn run_all(config: &Config) -> Result<()> {
    Stage::ALL.into_iter().try_for_each(|stage| run_stage(stage, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_and_numbers() {
        assert_eq!("Exposure".parse::<Stage>().unwrap(), Stage::Exposure);
        assert_eq!("3".parse::<Stage>().unwrap(), Stage::Adaptive);
        assert!("6".parse::<Stage>().is_err());
    }

    #[test]
    fn report_names_are_numbered() {
        let artifacts = Artifacts { intermediate: PathBuf::from("i"), out: PathBuf::from("o") };
        assert_eq!(artifacts.report(Stage::Aoi), PathBuf::from("i/01_aoi_debug_report.txt"));
        assert_eq!(artifacts.report(Stage::Composite), PathBuf::from("i/05_composite_debug_report.txt"));
    }

    #[test]
    fn composite_names_missing_upstream_stage() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_root(dir.path());
        let err = Stage::Composite.check_preconditions(&Artifacts::new(&config)).unwrap_err();
        assert!(matches!(err, Error::MissingInput { rerun: Some(Stage::Aoi), .. }));
        assert!(err.to_string().contains("openhvi run aoi"));
    }

    #[test]
    fn aoi_has_no_upstream() {
        let artifacts = Artifacts { intermediate: PathBuf::from("i"), out: PathBuf::from("o") };
        assert!(Stage::Aoi.check_preconditions(&artifacts).is_ok());
    }
}
