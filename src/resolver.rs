//! Record resolution: validate a request against the project, derive its key,
//! and either return the cached result or compute, store and return it.
//!
//! ```text
//!   (incident, station, [label, ...])
//!        │  validate incident → station → labels
//!        ▼
//!   key_for(station, incident, concat(trails))
//!        │
//!        ├── hit  ─► snapshot check ─► CacheEntry
//!        └── miss ─► RawDataSource::load ─► Pipeline ─► store.set ─► CacheEntry
//! ```

use std::collections::BTreeMap;

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::identity::{key_for, spectral_key, RecordKey};
use crate::pipeline::step::{ProcessingTrail, Scalar};
use crate::pipeline::Pipeline;
use crate::project::model::{geometry, Incident, Project, SourceMetadata, StationMetadata};
use crate::series::model::{Component, Record};
use crate::series::spectral::{self, ResponseSpectrum, Spectrum};
use crate::source::RawDataSource;
use crate::store::CacheStore;

const RECORD_FIELD: &str = "record";
const SPECTRA_FIELD: &str = "spectra";

// ---------------------------------------------------------------------------
// Cache entry
// ---------------------------------------------------------------------------

/// Station and source metadata as they were when an entry was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    pub source: SourceMetadata,
    pub station: StationMetadata,
}

/// Everything stored for one processed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: RecordKey,
    pub record: Record,
    pub trail: ProcessingTrail,
    /// Label names the trail was assembled from, in request order.
    pub labels: Vec<String>,
    pub metadata: BTreeMap<String, Scalar>,
    pub snapshot: MetadataSnapshot,
}

/// Scalar metadata stored alongside a processed record.
fn derived_metadata(incident: &Incident, station: &StationMetadata, record: &Record) -> BTreeMap<String, Scalar> {
    let g = geometry(&incident.source, station);
    let mut metadata = BTreeMap::new();
    metadata.insert("epicentral_distance_km".to_string(), g.epicentral_distance_km.into());
    metadata.insert("azimuth_deg".to_string(), g.azimuth_deg.into());
    metadata.insert("back_azimuth_deg".to_string(), g.back_azimuth_deg.into());
    metadata.insert("hypocenter_depth_km".to_string(), incident.source.depth_km.into());
    metadata.insert(
        "magnitude".to_string(),
        incident.source.magnitude.map(Scalar::from).unwrap_or(Scalar::Null),
    );
    metadata.insert("incident_kind".to_string(), incident.kind.to_string().into());
    metadata.insert("kind".to_string(), record.kind().to_string().into());
    metadata.insert("delta_t".to_string(), record.h1.delta_t().into());
    metadata.insert("samples".to_string(), Scalar::Integer(record.h1.len() as i64));
    for component in [Component::H1, Component::H2, Component::Vertical] {
        metadata.insert(
            format!("peak_{component}"),
            record.component(component).peak_abs().into(),
        );
    }
    metadata
}

// ---------------------------------------------------------------------------
// Spectral requests
// ---------------------------------------------------------------------------

/// Band and smoothing of a Fourier amplitude spectrum request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FasOptions {
    pub fmin: f64,
    pub fmax: f64,
    /// Three-point smoothing factor, must exceed 1 (3 gives 0.25/0.5/0.25).
    pub smoothing: f64,
}

impl Default for FasOptions {
    fn default() -> Self {
        FasOptions {
            fmin: 0.05,
            fmax: 20.0,
            smoothing: 3.0,
        }
    }
}

/// Period range and damping of a response spectrum request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResponseOptions {
    pub tmin: f64,
    pub tmax: f64,
    /// Falls back to the configured damping ratio.
    pub damping: Option<f64>,
}

impl Default for ResponseOptions {
    fn default() -> Self {
        ResponseOptions {
            tmin: 0.1,
            tmax: 10.0,
            damping: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Cache hit / miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    pub hits: u64,
    pub misses: u64,
    pub spectral_hits: u64,
    pub spectral_misses: u64,
}

/// Resolves processed records against one store and one raw-data source.
pub struct RecordResolver<'s, D> {
    store: &'s CacheStore,
    source: D,
    pipeline: Pipeline,
    damping_ratio: f64,
    stats: Mutex<ResolverStats>,
}

impl<'s, D: RawDataSource> RecordResolver<'s, D> {
    pub fn new(store: &'s CacheStore, source: D) -> Self {
        Self::with_config(store, source, &EngineConfig::default())
    }

    pub fn with_config(store: &'s CacheStore, source: D, config: &EngineConfig) -> Self {
        RecordResolver {
            store,
            source,
            pipeline: Pipeline::from_config(config),
            damping_ratio: config.damping_ratio,
            stats: Mutex::new(ResolverStats::default()),
        }
    }

    pub fn stats(&self) -> ResolverStats {
        *self.stats.lock()
    }

    pub fn source(&self) -> &D {
        &self.source
    }

    /// The processed record for `labels` applied, in order, to the raw
    /// record of `station_id` in `incident_id`.
    pub fn resolve(
        &self,
        project: &Project,
        incident_id: &str,
        station_id: &str,
        labels: &[&str],
    ) -> Result<Record> {
        self.resolve_entry(project, incident_id, station_id, labels)
            .map(|entry| entry.record)
    }

    /// Like [`RecordResolver::resolve`], returning the whole cache entry.
    ///
    /// The incident, the station and every label are checked before the
    /// store or the data source is touched. A miss writes exactly one entry;
    /// any failure writes nothing.
    pub fn resolve_entry(
        &self,
        project: &Project,
        incident_id: &str,
        station_id: &str,
        labels: &[&str],
    ) -> Result<CacheEntry> {
        let incident = project.incident(incident_id)?;
        let station = incident.station(station_id)?;
        // The trail that is hashed is the trail that runs.
        let trail = project.trail_for(labels)?.canonical();

        let key = key_for(station_id, incident_id, &trail);
        let path = [incident_id, station_id, key.as_str(), RECORD_FIELD];

        match self.store.get::<CacheEntry>(&path) {
            Ok(entry) => {
                check_snapshot(&entry, incident, station)?;
                self.stats.lock().hits += 1;
                debug!("cache hit {incident_id}/{station_id}/{key}");
                return Ok(entry);
            }
            Err(e) if e.is_not_found() => {
                debug!("cache miss {incident_id}/{station_id}/{key}");
            }
            Err(e) => return Err(e),
        }

        let raw = self.source.load(incident, station)?;
        let record = self.pipeline.apply_record(&raw, &trail)?;
        if !record.is_finite() {
            let operation = trail.steps().last().map_or("load", |s| s.operation.as_str());
            return Err(Error::invalid_params(
                operation,
                format!("{incident_id}/{station_id} has non-finite samples"),
            ));
        }
        let entry = CacheEntry {
            key: key.clone(),
            metadata: derived_metadata(incident, station, &record),
            record,
            trail,
            labels: labels.iter().map(|l| l.to_string()).collect(),
            snapshot: MetadataSnapshot {
                source: incident.source.clone(),
                station: station.clone(),
            },
        };
        self.store.set(&path, &entry)?;
        self.stats.lock().misses += 1;
        info!(
            "resolved {incident_id}/{station_id} [{}] → {}",
            labels.join(", "),
            entry.key
        );
        Ok(entry)
    }

    /// Fourier amplitude spectrum of one component, memoized beneath the
    /// record's cache entry.
    pub fn resolve_fas(
        &self,
        project: &Project,
        incident_id: &str,
        station_id: &str,
        labels: &[&str],
        component: Component,
        options: &FasOptions,
    ) -> Result<Spectrum> {
        let entry = self.resolve_entry(project, incident_id, station_id, labels)?;
        let params = BTreeMap::from([
            ("fmin".to_string(), Scalar::from(options.fmin)),
            ("fmax".to_string(), Scalar::from(options.fmax)),
            ("smoothing".to_string(), Scalar::from(options.smoothing)),
        ]);
        let product = spectral_key(&entry.key, component, "fas", &params);
        self.memoize(incident_id, station_id, &entry, &product, || {
            spectral::fas(
                entry.record.component(component),
                options.fmin,
                options.fmax,
                options.smoothing,
            )
        })
    }

    /// Response spectrum of one acceleration component, memoized beneath the
    /// record's cache entry.
    pub fn resolve_response_spectrum(
        &self,
        project: &Project,
        incident_id: &str,
        station_id: &str,
        labels: &[&str],
        component: Component,
        options: &ResponseOptions,
    ) -> Result<ResponseSpectrum> {
        let entry = self.resolve_entry(project, incident_id, station_id, labels)?;
        let damping = options.damping.unwrap_or(self.damping_ratio);
        let params = BTreeMap::from([
            ("tmin".to_string(), Scalar::from(options.tmin)),
            ("tmax".to_string(), Scalar::from(options.tmax)),
            ("damping".to_string(), Scalar::from(damping)),
        ]);
        let product = spectral_key(&entry.key, component, "response_spectrum", &params);
        self.memoize(incident_id, station_id, &entry, &product, || {
            spectral::response_spectrum(
                entry.record.component(component),
                options.tmin,
                options.tmax,
                damping,
            )
        })
    }

    fn memoize<T, F>(
        &self,
        incident_id: &str,
        station_id: &str,
        entry: &CacheEntry,
        product: &str,
        compute: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        let path = [
            incident_id,
            station_id,
            entry.key.as_str(),
            SPECTRA_FIELD,
            product,
        ];
        match self.store.get::<T>(&path) {
            Ok(value) => {
                self.stats.lock().spectral_hits += 1;
                debug!("spectral cache hit {}", path.join("/"));
                return Ok(value);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        let value = compute()?;
        self.store.set(&path, &value)?;
        self.stats.lock().spectral_misses += 1;
        debug!("spectral cache write {}", path.join("/"));
        Ok(value)
    }
}

/// A hit is only valid if the metadata it was computed under still holds.
fn check_snapshot(entry: &CacheEntry, incident: &Incident, station: &StationMetadata) -> Result<()> {
    let reason = if entry.snapshot.source != incident.source {
        Some("incident source metadata changed")
    } else if entry.snapshot.station != *station {
        Some("station metadata changed")
    } else {
        None
    };
    match reason {
        None => Ok(()),
        Some(reason) => {
            warn!(
                "stale cache entry {}/{}/{}: {reason}",
                incident.name, station.id, entry.key
            );
            Err(Error::StaleCacheEntry {
                incident: incident.name.clone(),
                station: station.id.clone(),
                key: entry.key.to_string(),
                reason: reason.to_string(),
            })
        }
    }
}
