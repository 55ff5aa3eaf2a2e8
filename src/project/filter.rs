use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::model::{geometry, Incident, SourceMetadata, StationMetadata};

// ---------------------------------------------------------------------------
// Station predicate: which stations of an incident are selected
// ---------------------------------------------------------------------------

/// Inclusive latitude / longitude box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl BoundingBox {
    fn contains(&self, latitude: f64, longitude: f64) -> bool {
        (self.min_latitude..=self.max_latitude).contains(&latitude)
            && (self.min_longitude..=self.max_longitude).contains(&longitude)
    }
}

/// Conjunction of optional predicates. An absent predicate means "no
/// constraint"; a filter with none set selects every station.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StationFilter {
    /// Allowed station ids. An empty set selects nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station_ids: Option<BTreeSet<String>>,
    /// Inclusive epicentral distance range in km.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<(f64, f64)>,
    /// Source-to-station azimuth range in degrees. `min > max` wraps
    /// through north, e.g. `(330, 30)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azimuth_deg: Option<(f64, f64)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<BoundingBox>,
}

impl StationFilter {
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StationFilter {
            station_ids: Some(ids.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    pub fn with_distance_km(mut self, min: f64, max: f64) -> Self {
        self.distance_km = Some((min, max));
        self
    }

    pub fn with_azimuth_deg(mut self, min: f64, max: f64) -> Self {
        self.azimuth_deg = Some((min, max));
        self
    }

    pub fn with_bounds(mut self, bounds: BoundingBox) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub(crate) fn validate(&self, name: &str) -> Result<()> {
        let invalid = |reason: String| Error::InvalidMetadata {
            subject: format!("station filter '{name}'"),
            reason,
        };
        if let Some((min, max)) = self.distance_km {
            if !(min.is_finite() && max.is_finite()) || min < 0.0 || min > max {
                return Err(invalid(format!("distance range [{min}, {max}] is not valid")));
            }
        }
        if let Some((min, max)) = self.azimuth_deg {
            if !(min.is_finite() && max.is_finite()) {
                return Err(invalid(format!("azimuth range [{min}, {max}] is not finite")));
            }
        }
        if let Some(b) = self.bounds {
            if b.min_latitude > b.max_latitude || b.min_longitude > b.max_longitude {
                return Err(invalid("bounding box has min above max".to_string()));
            }
        }
        Ok(())
    }

    /// Whether `station` passes every active predicate.
    pub fn matches(&self, source: &SourceMetadata, station: &StationMetadata) -> bool {
        if let Some(ids) = &self.station_ids {
            if !ids.contains(&station.id) {
                return false;
            }
        }
        if let Some(b) = &self.bounds {
            if !b.contains(station.latitude, station.longitude) {
                return false;
            }
        }
        if self.distance_km.is_none() && self.azimuth_deg.is_none() {
            return true;
        }

        let g = geometry(source, station);
        if let Some((min, max)) = self.distance_km {
            if !(min..=max).contains(&g.epicentral_distance_km) {
                return false;
            }
        }
        if let Some((min, max)) = self.azimuth_deg {
            let (min, max, az) = (
                min.rem_euclid(360.0),
                max.rem_euclid(360.0),
                g.azimuth_deg,
            );
            let inside = if min <= max {
                (min..=max).contains(&az)
            } else {
                az >= min || az <= max
            };
            if !inside {
                return false;
            }
        }
        true
    }
}

/// Stations of `incident` that pass `filter`, in id order.
pub fn filtered_stations<'a>(incident: &'a Incident, filter: &StationFilter) -> Vec<&'a StationMetadata> {
    incident
        .stations
        .values()
        .filter(|st| filter.matches(&incident.source, st))
        .collect()
}
