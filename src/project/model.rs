use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pipeline::step::{Operation, ProcessingTrail};
use crate::store::CacheStore;

use super::filter::{filtered_stations, StationFilter};

/// Mean Earth radius used for epicentral distances.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentKind {
    Simulated,
    Observed,
}

impl fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncidentKind::Simulated => write!(f, "simulated"),
            IncidentKind::Observed => write!(f, "observed"),
        }
    }
}

/// Hypocenter of an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub latitude: f64,
    pub longitude: f64,
    pub depth_km: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnitude: Option<f64>,
}

impl SourceMetadata {
    pub fn new(latitude: f64, longitude: f64, depth_km: f64) -> Self {
        SourceMetadata {
            latitude,
            longitude,
            depth_km,
            magnitude: None,
        }
    }

    pub fn with_magnitude(mut self, magnitude: f64) -> Self {
        self.magnitude = Some(magnitude);
        self
    }

    fn validate(&self, incident: &str) -> Result<()> {
        let subject = format!("source of incident '{incident}'");
        check_position(&subject, self.latitude, self.longitude, self.depth_km)?;
        if let Some(m) = self.magnitude {
            if !m.is_finite() {
                return Err(invalid(&subject, format!("magnitude {m} is not finite")));
            }
        }
        Ok(())
    }
}

/// A recording station: position plus the azimuths of its two horizontal
/// channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationMetadata {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub depth_km: f64,
    #[serde(default)]
    pub h1_azimuth: f64,
    #[serde(default = "default_h2_azimuth")]
    pub h2_azimuth: f64,
}

fn default_h2_azimuth() -> f64 {
    90.0
}

impl StationMetadata {
    pub fn new(id: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        StationMetadata {
            id: id.into(),
            latitude,
            longitude,
            depth_km: 0.0,
            h1_azimuth: 0.0,
            h2_azimuth: default_h2_azimuth(),
        }
    }

    pub fn with_azimuths(mut self, h1_azimuth: f64, h2_azimuth: f64) -> Self {
        self.h1_azimuth = h1_azimuth;
        self.h2_azimuth = h2_azimuth;
        self
    }

    fn validate(&self, incident: &str) -> Result<()> {
        let subject = format!("station '{}' of incident '{incident}'", self.id);
        if self.id.trim().is_empty() {
            return Err(invalid(&subject, "station id is empty"));
        }
        check_position(&subject, self.latitude, self.longitude, self.depth_km)?;
        for (name, value) in [("h1_azimuth", self.h1_azimuth), ("h2_azimuth", self.h2_azimuth)] {
            if !value.is_finite() {
                return Err(invalid(&subject, format!("{name} {value} is not finite")));
            }
        }
        Ok(())
    }
}

fn invalid(subject: &str, reason: impl Into<String>) -> Error {
    Error::InvalidMetadata {
        subject: subject.to_string(),
        reason: reason.into(),
    }
}

fn check_position(subject: &str, latitude: f64, longitude: f64, depth_km: f64) -> Result<()> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(invalid(subject, format!("latitude {latitude} outside [-90, 90]")));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(invalid(subject, format!("longitude {longitude} outside [-180, 180]")));
    }
    if !depth_km.is_finite() {
        return Err(invalid(subject, format!("depth {depth_km} is not finite")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Geodesy
// ---------------------------------------------------------------------------

/// Great-circle distance in km (haversine).
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Initial bearing from point 1 to point 2, degrees clockwise from north in
/// `[0, 360)`.
pub fn azimuth_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_lambda = (lon2 - lon1).to_radians();
    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();
    y.atan2(x).to_degrees().rem_euclid(360.0)
}

/// Source-to-station geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub epicentral_distance_km: f64,
    /// Bearing from the epicenter to the station.
    pub azimuth_deg: f64,
    /// Bearing from the station back to the epicenter.
    pub back_azimuth_deg: f64,
}

pub fn geometry(source: &SourceMetadata, station: &StationMetadata) -> Geometry {
    Geometry {
        epicentral_distance_km: distance_km(
            source.latitude,
            source.longitude,
            station.latitude,
            station.longitude,
        ),
        azimuth_deg: azimuth_deg(
            source.latitude,
            source.longitude,
            station.latitude,
            station.longitude,
        ),
        back_azimuth_deg: azimuth_deg(
            station.latitude,
            station.longitude,
            source.latitude,
            source.longitude,
        ),
    }
}

// ---------------------------------------------------------------------------
// Incident
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub name: String,
    pub kind: IncidentKind,
    pub source: SourceMetadata,
    #[serde(default)]
    pub stations: BTreeMap<String, StationMetadata>,
}

impl Incident {
    pub fn new(name: impl Into<String>, kind: IncidentKind, source: SourceMetadata) -> Self {
        Incident {
            name: name.into(),
            kind,
            source,
            stations: BTreeMap::new(),
        }
    }

    /// Builder form of [`Incident::add_station`].
    pub fn with_station(mut self, station: StationMetadata) -> Result<Self> {
        self.add_station(station)?;
        Ok(self)
    }

    pub fn add_station(&mut self, station: StationMetadata) -> Result<()> {
        station.validate(&self.name)?;
        self.stations.insert(station.id.clone(), station);
        Ok(())
    }

    pub fn station(&self, id: &str) -> Result<&StationMetadata> {
        self.stations.get(id).ok_or_else(|| Error::UnknownStation {
            incident: self.name.clone(),
            station: id.to_string(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("incident", "incident name is empty"));
        }
        self.source.validate(&self.name)?;
        for (id, station) in &self.stations {
            if *id != station.id {
                return Err(invalid(
                    &format!("incident '{}'", self.name),
                    format!("station listed as '{id}' has id '{}'", station.id),
                ));
            }
            station.validate(&self.name)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

/// Only the part of a cache entry needed for label sweeps.
#[derive(Deserialize)]
struct EntryLabels {
    #[serde(default)]
    labels: Vec<String>,
}

/// Aggregate root: every lookup receives the project explicitly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    #[serde(default)]
    pub incidents: BTreeMap<String, Incident>,
    #[serde(default)]
    pub station_filters: BTreeMap<String, StationFilter>,
    #[serde(default)]
    pub labels: BTreeMap<String, ProcessingTrail>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Project {
            name: name.into(),
            ..Default::default()
        }
    }

    // -- Incidents --

    /// Register an incident, replacing one with the same name.
    pub fn add_incident(&mut self, incident: Incident) -> Result<()> {
        incident.validate()?;
        info!(
            "project '{}': adding {} incident '{}' with {} station(s)",
            self.name,
            incident.kind,
            incident.name,
            incident.stations.len()
        );
        self.incidents.insert(incident.name.clone(), incident);
        Ok(())
    }

    pub fn incident(&self, name: &str) -> Result<&Incident> {
        self.incidents.get(name).ok_or_else(|| Error::UnknownIncident {
            incident: name.to_string(),
        })
    }

    pub fn station(&self, incident: &str, station: &str) -> Result<&StationMetadata> {
        self.incident(incident)?.station(station)
    }

    /// Remove an incident and every cache entry derived from it.
    pub fn remove_incident(&mut self, name: &str, store: &CacheStore) -> Result<Incident> {
        self.incident(name)?;
        store.delete(&[name])?;
        info!("project '{}': removed incident '{name}' and its cache", self.name);
        self.incidents.remove(name).ok_or_else(|| Error::UnknownIncident {
            incident: name.to_string(),
        })
    }

    // -- Station filters --

    /// Register a named filter, returning the one it replaced.
    pub fn add_station_filter(
        &mut self,
        name: impl Into<String>,
        filter: StationFilter,
    ) -> Result<Option<StationFilter>> {
        let name = name.into();
        filter.validate(&name)?;
        info!("project '{}': station filter '{name}' set", self.name);
        Ok(self.station_filters.insert(name, filter))
    }

    pub fn station_filter(&self, name: &str) -> Result<&StationFilter> {
        self.station_filters
            .get(name)
            .ok_or_else(|| Error::UnknownStationFilter {
                filter: name.to_string(),
            })
    }

    /// Filters select stations; they never touch cached data.
    pub fn remove_station_filter(&mut self, name: &str) -> Result<StationFilter> {
        let filter = self
            .station_filters
            .remove(name)
            .ok_or_else(|| Error::UnknownStationFilter {
                filter: name.to_string(),
            })?;
        info!("project '{}': station filter '{name}' removed", self.name);
        Ok(filter)
    }

    /// Stations of `incident` accepted by the named filter, in id order.
    pub fn stations_matching(&self, incident: &str, filter: &str) -> Result<Vec<&StationMetadata>> {
        let incident = self.incident(incident)?;
        let filter = self.station_filter(filter)?;
        Ok(filtered_stations(incident, filter))
    }

    // -- Processing labels --

    /// Register a named trail. Every step must parse as a known operation
    /// with valid parameters; the trail is stored in canonical form.
    pub fn add_label(&mut self, name: impl Into<String>, trail: ProcessingTrail) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(invalid("processing label", "label name is empty"));
        }
        if self.labels.contains_key(&name) {
            return Err(Error::DuplicateLabel { label: name });
        }
        for step in &trail {
            Operation::parse(step)?;
        }
        info!(
            "project '{}': label '{name}' with {} step(s)",
            self.name,
            trail.len()
        );
        self.labels.insert(name, trail.canonical());
        Ok(())
    }

    pub fn label(&self, name: &str) -> Result<&ProcessingTrail> {
        self.labels
            .get(name)
            .ok_or_else(|| Error::UnknownProcessingLabel {
                label: name.to_string(),
            })
    }

    /// Remove a label and every cache entry that was produced through it.
    /// Returns the removed trail and the number of swept entries.
    pub fn remove_label(&mut self, name: &str, store: &CacheStore) -> Result<(ProcessingTrail, usize)> {
        self.label(name)?;
        let mut swept = 0;
        for incident in store.children(&[])? {
            for station in store.children(&[&incident])? {
                for key in store.children(&[&incident, &station])? {
                    let path = [incident.as_str(), station.as_str(), key.as_str(), "record"];
                    if !store.has(&path) {
                        continue;
                    }
                    let entry: EntryLabels = store.get(&path)?;
                    if entry.labels.iter().any(|l| l == name) {
                        debug!("sweeping {incident}/{station}/{key} (label '{name}')");
                        store.delete(&[&incident, &station, &key])?;
                        swept += 1;
                    }
                }
            }
        }
        info!(
            "project '{}': label '{name}' removed, {swept} cache entr{} swept",
            self.name,
            if swept == 1 { "y" } else { "ies" }
        );
        let trail = self
            .labels
            .remove(name)
            .ok_or_else(|| Error::UnknownProcessingLabel {
                label: name.to_string(),
            })?;
        Ok((trail, swept))
    }

    /// Concatenate the trails of `names` in the given order. Every name is
    /// checked before anything is returned.
    pub fn trail_for(&self, names: &[&str]) -> Result<ProcessingTrail> {
        let mut trail = ProcessingTrail::default();
        for name in names {
            trail = trail.concat(self.label(name)?);
        }
        Ok(trail)
    }

    // -- Persistence --

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| Error::serialization(format!("encoding project '{}'", self.name), e))?;
        std::fs::write(path, text)
            .map_err(|e| Error::io(format!("writing project {}", path.display()), e))?;
        info!("project '{}' saved to {}", self.name, path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("reading project {}", path.display()), e))?;
        let mut project: Project = serde_json::from_str(&text)
            .map_err(|e| Error::serialization(format!("decoding project {}", path.display()), e))?;
        for incident in project.incidents.values() {
            incident.validate()?;
        }
        for (name, filter) in &project.station_filters {
            filter.validate(name)?;
        }
        for trail in project.labels.values_mut() {
            for step in trail.iter() {
                Operation::parse(step)?;
            }
            *trail = trail.canonical();
        }
        info!(
            "project '{}' loaded: {} incident(s), {} label(s)",
            project.name,
            project.incidents.len(),
            project.labels.len()
        );
        Ok(project)
    }
}
