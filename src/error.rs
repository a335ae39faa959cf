use std::path::PathBuf;

use crate::pipeline::Stage;

/// Fatal pipeline failures, grouped the way an operator remediates them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A raw input or an upstream artifact does not exist.
    #[error("missing input {}: {hint}", path.display())]
    MissingInput {
        path: PathBuf,
        /// Stage that produces the artifact, if it is not a raw input.
        rerun: Option<Stage>,
        hint: String,
    },

    /// None of the expected column names are present.
    #[error("{context}: none of {expected:?} found (available columns: {available:?})")]
    MissingColumn {
        context: String,
        expected: Vec<String>,
        available: Vec<String>,
    },

    /// A filter or join produced nothing where rows were required.
    #[error("{what} produced no results; {hint}")]
    Degenerate { what: String, hint: String },

    #[error("unsupported CRS {0} (supported EPSG codes: {supported:?})", supported = crate::geom::Crs::SUPPORTED)]
    UnsupportedCrs(String),

    #[error("raster {}: {message}", path.display())]
    Raster { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Missing artifact that `stage` writes.
    pub fn missing_artifact(path: impl Into<PathBuf>, stage: Stage) -> Self {
        Error::MissingInput {
            path: path.into(),
            rerun: Some(stage),
            hint: format!("run `openhvi run {}` first", stage.name()),
        }
    }

    /// Missing raw input file.
    pub fn missing_raw(path: impl Into<PathBuf>, hint: impl Into<String>) -> Self {
        Error::MissingInput { path: path.into(), rerun: None, hint: hint.into() }
    }

    pub fn degenerate(what: impl Into<String>, hint: impl Into<String>) -> Self {
        Error::Degenerate { what: what.into(), hint: hint.into() }
    }
}
