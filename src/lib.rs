#![doc = "OpenHVI public API"]
//! Heat vulnerability index for census dissemination areas.
//!
//! Five stages run in order, each reading upstream artifacts from disk:
//! [`Stage::Aoi`] builds the unit universe, the three component stages score
//! it, and [`Stage::Composite`] joins the scores and rolls them up to regions.
mod adaptive;
mod aoi;
mod common;
mod composite;
mod config;
mod error;
mod exposure;
mod geom;
mod io;
mod layer;
mod pack;
mod pipeline;
mod sensitivity;
mod types;

#[doc(inline)]
pub use config::{
    AdaptiveConfig, AoiConfig, CompositeConfig, Config, CrsConfig, ExposureConfig, GroupedIndicator,
    IndicatorSpec, Inputs, PathsConfig, PercentSpec, Retention, SensitivityConfig, ValueField, VegetationClass,
};

#[doc(inline)]
pub use error::Error;

#[doc(inline)]
pub use geom::{Crs, Transformer};

#[doc(inline)]
pub use layer::{RegionLayer, UnitLayer, ID_COLUMN, REGION_NAME_COLUMN};

#[doc(inline)]
pub use pack::{AoiPackage, DiskPack, MemPack, PackSink, PackSource};

#[doc(inline)]
pub use pipeline::{run_all, run_stage, Artifacts, Stage};

#[doc(inline)]
pub use types::Dguid;
