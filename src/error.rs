use std::path::PathBuf;

use thiserror::Error;

use crate::series::model::SeriesKind;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the processing engine surfaces to its callers.
///
/// Each variant names the offending identifier or parameter together with the
/// operation that was attempted. Nothing in the crate substitutes defaults on
/// failure.
#[derive(Error, Debug)]
pub enum Error {
    // -- Project lookups --
    #[error("unknown incident '{incident}'")]
    UnknownIncident { incident: String },

    #[error("unknown station '{station}' in incident '{incident}'")]
    UnknownStation { incident: String, station: String },

    #[error("unknown processing label '{label}'")]
    UnknownProcessingLabel { label: String },

    #[error("processing label '{label}' already exists")]
    DuplicateLabel { label: String },

    #[error("unknown station filter '{filter}'")]
    UnknownStationFilter { filter: String },

    #[error("invalid metadata for {subject}: {reason}")]
    InvalidMetadata { subject: String, reason: String },

    // -- Processing --
    #[error("unknown processing operation '{operation}'")]
    UnknownOperation { operation: String },

    #[error("invalid parameters for {operation}: {reason}")]
    InvalidFilterParameters { operation: String, reason: String },

    #[error("{operation} is not defined for {kind} series")]
    UnsupportedDerivation {
        kind: SeriesKind,
        operation: String,
    },

    #[error("cannot rotate components at {h1_azimuth}° and {h2_azimuth}°: not orthogonal")]
    InvalidOrientation { h1_azimuth: f64, h2_azimuth: f64 },

    #[error("incompatible sampling for {operation}: {reason}")]
    IncompatibleSampling { operation: String, reason: String },

    #[error("records cannot be compared: {reason}")]
    IncompatibleRecords { reason: String },

    // -- Cache / store --
    #[error("cache entry {key} for {incident}/{station} is stale: {reason}")]
    StaleCacheEntry {
        incident: String,
        station: String,
        key: String,
        reason: String,
    },

    #[error("store at {} is locked by another writer", path.display())]
    StoreLocked { path: PathBuf },

    #[error("no value stored at '{path}'")]
    NotFound { path: String },

    // -- External data --
    #[error("no raw data for station '{station}' in incident '{incident}'")]
    DataNotFound { incident: String, station: String },

    #[error("failed to load {}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("IO error during {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error during {operation}")]
    Serialization {
        operation: String,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    pub(crate) fn invalid_params(operation: &str, reason: impl Into<String>) -> Self {
        Error::InvalidFilterParameters {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            operation: operation.into(),
            source,
        }
    }

    pub(crate) fn serialization(operation: impl Into<String>, source: serde_json::Error) -> Self {
        Error::Serialization {
            operation: operation.into(),
            source,
        }
    }

    /// True for the store's "nothing here" answer, which callers usually treat
    /// as control flow rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
