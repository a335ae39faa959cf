//! Pipeline configuration.
//!
//! Every constant the stages depend on (CRS codes, label dictionaries, class
//! codes, sentinel values, file locations) lives in one immutable [`Config`]
//! that is passed into each stage. All sections have defaults for the Metro
//! Vancouver 2021 run, so an empty TOML file is a valid configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{common::first_match, error::Error, geom::Crs};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub crs: CrsConfig,
    pub aoi: AoiConfig,
    pub sensitivity: SensitivityConfig,
    pub adaptive: AdaptiveConfig,
    pub exposure: ExposureConfig,
    pub composite: CompositeConfig,
}

impl Config {
    /// Load a TOML config file; missing sections take their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.paths.root = root.into();
        config
    }

    /// Reject settings no stage could run with.
    pub fn validate(&self) -> Result<()> {
        for code in [self.crs.geographic, self.crs.analysis].into_iter()
            .chain(self.crs.units)
            .chain(self.crs.regions)
            .chain(self.crs.raster)
        {
            Crs::from_epsg(code)?;
        }
        if !Crs::from_epsg(self.crs.geographic)?.is_geographic() {
            return Err(Error::Config(format!("crs.geographic EPSG:{} is not a lon/lat CRS", self.crs.geographic)).into());
        }
        if Crs::from_epsg(self.crs.analysis)?.is_geographic() {
            return Err(Error::Config(format!("crs.analysis EPSG:{} must be projected (metres)", self.crs.analysis)).into());
        }
        if self.aoi.key_candidates.is_empty() {
            return Err(Error::Config("aoi.key_candidates is empty".into()).into());
        }
        if let Retention::AreaOverlap { min_fraction } = self.aoi.retention {
            if !(0.0..=1.0).contains(&min_fraction) {
                return Err(Error::Config(format!("aoi.retention.min_fraction {min_fraction} is outside [0, 1]")).into());
            }
        }
        if self.sensitivity.chunk_size == 0 {
            return Err(Error::Config("sensitivity.chunk_size must be positive".into()).into());
        }
        if self.adaptive.classes.is_empty() {
            return Err(Error::Config("adaptive.classes is empty".into()).into());
        }
        if self.adaptive.classes.iter().any(|class| class.code == self.adaptive.nodata) {
            return Err(Error::Config(format!("adaptive.nodata {} is also a vegetation class", self.adaptive.nodata)).into());
        }
        let [lo, hi] = self.exposure.valid_range;
        if !(lo < hi) {
            return Err(Error::Config(format!("exposure.valid_range [{lo}, {hi}] is empty")).into());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Project layout. Relative directories are resolved against `root`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub root: PathBuf,
    pub raw_dir: PathBuf,
    pub intermediate_dir: PathBuf,
    pub out_dir: PathBuf,

    /// Explicit input files; when unset, inputs are discovered under `raw_dir`.
    pub units: Option<PathBuf>,
    pub regions: Option<PathBuf>,
    pub census: Option<PathBuf>,
    pub exposure_values: Option<PathBuf>,
    pub exposure_coords: Option<PathBuf>,
    pub landcover: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            raw_dir: PathBuf::from("data_raw"),
            intermediate_dir: PathBuf::from("data_intermediate"),
            out_dir: PathBuf::from("data_out"),
            units: None,
            regions: None,
            census: None,
            exposure_values: None,
            exposure_coords: None,
            landcover: None,
        }
    }
}

impl PathsConfig {
    #[inline] pub fn raw(&self) -> PathBuf { self.root.join(&self.raw_dir) }
    #[inline] pub fn intermediate(&self) -> PathBuf { self.root.join(&self.intermediate_dir) }
    #[inline] pub fn out(&self) -> PathBuf { self.root.join(&self.out_dir) }

    fn explicit_or_discover(&self, explicit: &Option<PathBuf>, folder: &str, patterns: &[String], hint: &str) -> Result<PathBuf> {
        if let Some(path) = explicit {
            let path = self.root.join(path);
            if !path.is_file() {
                return Err(Error::missing_raw(path, hint).into());
            }
            return Ok(path);
        }
        let dir = self.raw().join(folder);
        first_match(&dir, patterns)?
            .ok_or_else(|| Error::missing_raw(dir.join(&patterns[0]), hint).into())
    }
}

/// Raw inputs resolved to concrete files.
#[derive(Debug, Clone)]
pub struct Inputs {
    pub units: PathBuf,
    pub regions: PathBuf,
    pub census: PathBuf,
    pub exposure_values: PathBuf,
    pub exposure_coords: PathBuf,
    pub landcover: PathBuf,
}

impl Config {
    pub fn units_input(&self) -> Result<PathBuf> {
        self.paths.explicit_or_discover(&self.paths.units, "da_boundaries",
            &["*.shp".into(), "*.SHP".into()],
            "extract the DA boundary archive (all shapefile parts) into data_raw/da_boundaries/")
    }

    pub fn regions_input(&self) -> Result<PathBuf> {
        self.paths.explicit_or_discover(&self.paths.regions, "admin_boundaries",
            &["*.shp".into(), "*.SHP".into()],
            "copy the administrative boundary shapefile into data_raw/admin_boundaries/")
    }

    pub fn census_input(&self) -> Result<PathBuf> {
        self.paths.explicit_or_discover(&self.paths.census, "census_profile",
            &["*.csv".into(), "*.CSV".into()],
            "copy the census profile CSV into data_raw/census_profile/")
    }

    pub fn exposure_values_input(&self) -> Result<PathBuf> {
        let yy = self.exposure.year_suffix();
        self.paths.explicit_or_discover(&self.paths.exposure_values, "canue_lst",
            &[format!("wtlst_ava_{yy}.csv"), format!("wtlst_ava_{yy}.CSV"), "wtlst_ava_*.csv".into(), "wtlst_ava_*.CSV".into()],
            &format!("copy wtlst_ava_{yy}.csv into data_raw/canue_lst/"))
    }

    pub fn exposure_coords_input(&self) -> Result<PathBuf> {
        let yy = self.exposure.year_suffix();
        self.paths.explicit_or_discover(&self.paths.exposure_coords, "canue_lst",
            &[format!("DMTI_SLI_{yy}.csv"), format!("DMTI_SLI_{yy}.CSV"), "DMTI_SLI_*.csv".into(), "DMTI_SLI_*.CSV".into()],
            &format!("copy DMTI_SLI_{yy}.csv into data_raw/canue_lst/"))
    }

    pub fn landcover_input(&self) -> Result<PathBuf> {
        self.paths.explicit_or_discover(&self.paths.landcover, "landcover",
            &["*.tif".into(), "*.tiff".into(), "*.TIF".into()],
            "export the landcover classification as a GeoTIFF into data_raw/landcover/")
    }

    /// Resolve every raw input at once.
    pub fn resolve_inputs(&self) -> Result<Inputs> {
        Ok(Inputs {
            units: self.units_input()?,
            regions: self.regions_input()?,
            census: self.census_input()?,
            exposure_values: self.exposure_values_input()?,
            exposure_coords: self.exposure_coords_input()?,
            landcover: self.landcover_input()?,
        })
    }
}

// ---------------------------------------------------------------------------
// CRS
// ---------------------------------------------------------------------------

/// EPSG codes for the three CRS roles, plus optional input overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrsConfig {
    /// Lon/lat CRS of web exports and postal-code coordinates.
    pub geographic: u32,
    /// Projected CRS used for all area, overlay and point-in-polygon work.
    pub analysis: u32,
    /// Override for the unit shapefile when its `.prj` is missing or unrecognised.
    pub units: Option<u32>,
    /// Override for the region shapefile.
    pub regions: Option<u32>,
    /// Override for the landcover raster when its GeoKeys are missing.
    pub raster: Option<u32>,
}

impl Default for CrsConfig {
    fn default() -> Self {
        Self { geographic: 4326, analysis: 3347, units: None, regions: None, raster: None }
    }
}

// ---------------------------------------------------------------------------
// Stage 1
// ---------------------------------------------------------------------------

/// How a unit is judged to be inside the regional mask.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Retention {
    /// Keep units whose representative point lies within the mask.
    RepresentativePoint,
    /// Keep units whose overlap with the mask is at least `min_fraction` of their area.
    AreaOverlap { min_fraction: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AoiConfig {
    /// Join-key columns to look for, in priority order.
    pub key_candidates: Vec<String>,
    /// Name fields carried along with each unit when present.
    pub keep_fields: Vec<String>,
    pub retention: Retention,
    /// Label stored on the dissolved mask feature.
    pub mask_name: String,
    pub region_name_field: String,
    pub region_short_name_field: String,
    pub region_code_field: String,
}

impl Default for AoiConfig {
    fn default() -> Self {
        Self {
            key_candidates: ["DGUID", "DAUID", "DAUID_2021", "DAUID21"].map(String::from).to_vec(),
            keep_fields: ["DAUID", "DGUID", "LANDAREA", "PRUID", "PRNAME", "DA_NAME", "NAME", "GEO_NAME"]
                .map(String::from).to_vec(),
            retention: Retention::RepresentativePoint,
            mask_name: "Metro Vancouver".into(),
            region_name_field: "FullName".into(),
            region_short_name_field: "ShortName".into(),
            region_code_field: "MunNum".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Stage 2
// ---------------------------------------------------------------------------

/// Which numeric column of a census row carries an indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueField { Count, Rate }

/// A census characteristic taken from exactly one label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSpec {
    pub label: String,
    pub key: String,
    pub value: ValueField,
}

/// Several count labels summed into one indicator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupedIndicator {
    pub key: String,
    pub labels: Vec<String>,
}

/// `output = numerator / denominator * 100`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PercentSpec {
    pub numerator: String,
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensitivityConfig {
    /// Rows read per chunk from the census file.
    pub chunk_size: usize,
    /// Case-insensitive substring marking the finest geography level.
    pub geo_level: String,
    pub id_column: String,
    pub level_column: String,
    pub label_column: String,
    pub count_column: String,
    pub rate_column: String,
    pub indicators: Vec<IndicatorSpec>,
    pub grouped: GroupedIndicator,
    /// Indicator used as the denominator of every percentage.
    pub population_key: String,
    pub percents: Vec<PercentSpec>,
    /// Columns normalized and averaged into the sensitivity index.
    pub components: Vec<String>,
}

impl Default for SensitivityConfig {
    fn default() -> Self {
        let indicator = |label: &str, key: &str, value| IndicatorSpec { label: label.into(), key: key.into(), value };
        Self {
            chunk_size: 250_000,
            geo_level: "Dissemination area".into(),
            id_column: "DGUID".into(),
            level_column: "GEO_LEVEL".into(),
            label_column: "CHARACTERISTIC_NAME".into(),
            count_column: "C1_COUNT_TOTAL".into(),
            rate_column: "C10_RATE_TOTAL".into(),
            indicators: vec![
                indicator("Population, 2021", "pop_total", ValueField::Count),
                indicator("Unemployment rate", "unemployment_rate", ValueField::Rate),
                indicator(
                    "Prevalence of low income based on the Low-income measure, after tax (LIM-AT) (%)",
                    "low_income_rate",
                    ValueField::Rate,
                ),
                indicator("Living alone", "living_alone_count", ValueField::Count),
            ],
            grouped: GroupedIndicator {
                key: "seniors_65plus_count".into(),
                labels: vec!["65 to 74 years".into(), "75 years and over".into()],
            },
            population_key: "pop_total".into(),
            percents: vec![
                PercentSpec { numerator: "seniors_65plus_count".into(), output: "pct_seniors_65plus".into() },
                PercentSpec { numerator: "living_alone_count".into(), output: "pct_living_alone".into() },
            ],
            components: ["unemployment_rate", "low_income_rate", "pct_seniors_65plus", "pct_living_alone"]
                .map(String::from).to_vec(),
        }
    }
}

// ---------------------------------------------------------------------------
// Stage 3
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VegetationClass {
    pub code: u16,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Pixel value excluded from every zonal total.
    pub nodata: u16,
    /// Classes counted as vegetation, in output column order.
    pub classes: Vec<VegetationClass>,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        let class = |code, label: &str| VegetationClass { code, label: label.into() };
        Self {
            nodata: 0,
            classes: vec![
                class(6, "coniferous"),
                class(7, "deciduous"),
                class(8, "shrub"),
                class(9, "modified_herb"),
                class(10, "natural_herb"),
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Stage 4
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureConfig {
    pub year: u32,
    /// Column holding the exposure measurement in the values table.
    pub value_field: String,
    pub value_postal_field: String,
    pub coord_postal_field: String,
    pub lat_field: String,
    pub lon_field: String,
    /// Values meaning "no measurement".
    pub sentinels: Vec<f64>,
    /// Inclusive sanity window; values outside are nulled.
    pub valid_range: [f64; 2],
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            year: 2021,
            value_field: "wtlst21_06".into(),
            value_postal_field: "postalcode21".into(),
            coord_postal_field: "POSTALCODE21".into(),
            lat_field: "LATITUDE_21".into(),
            lon_field: "LONGITUDE_21".into(),
            sentinels: vec![-9999.0, -999.0],
            valid_range: [-50.0, 80.0],
        }
    }
}

impl ExposureConfig {
    /// Two-digit year used in input file names, e.g. 2021 -> "21".
    pub fn year_suffix(&self) -> String { format!("{:02}", self.year % 100) }
}

// ---------------------------------------------------------------------------
// Stage 5
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeConfig {
    /// Simplification tolerance for exported unit geometries (degrees).
    pub unit_simplify_tolerance: f64,
    /// Simplification tolerance for exported region geometries (degrees).
    pub region_simplify_tolerance: f64,
    /// Population column used as the region weighting.
    pub population_field: String,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            unit_simplify_tolerance: 0.0002,
            region_simplify_tolerance: 0.0005,
            population_field: "pop_total".into(),
        }
    }
}
