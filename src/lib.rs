//! Reproducible, cacheable processing of three-component seismic recordings.
//!
//! ```text
//!   Project ──► RecordResolver ──► identity::key_for ──► CacheStore
//!                    │                                     ▲
//!                    │ miss                                │ set
//!                    ▼                                     │
//!              RawDataSource ──► Pipeline (series ops) ────┘
//!
//!   compare(record_a, record_b) ──► residual / overlay
//! ```
//!
//! A processed record is identified purely by its station, its incident and
//! the canonical form of the processing steps applied to it. The same request
//! always maps to the same cache entry, so repeated requests never touch the
//! raw data again.

pub mod compare;
pub mod config;
pub mod error;
pub mod identity;
pub mod pipeline;
pub mod project;
pub mod resolver;
pub mod series;
pub mod source;
pub mod store;

pub use compare::{compare, ComparisonMode, ComparisonOutput, ComparisonResult};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use identity::{key_for, RecordKey};
pub use pipeline::step::{ProcessingStep, ProcessingTrail, Scalar};
pub use pipeline::Pipeline;
pub use project::filter::StationFilter;
pub use project::model::{Incident, IncidentKind, Project, SourceMetadata, StationMetadata};
pub use resolver::{CacheEntry, FasOptions, RecordResolver, ResolverStats, ResponseOptions};
pub use series::model::{Component, Orientation, Record, SeriesKind, TimeSeries};
pub use source::{FileDataSource, RawDataSource};
pub use store::CacheStore;
