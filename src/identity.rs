//! Content-derived identity for processed records.
//!
//! A key is the SHA-256 of a canonical JSON document built from the station,
//! the incident and the ordered, canonicalised steps. Nothing that depends on
//! memory layout or hash-map iteration order goes into it, so keys are stable
//! across runs and platforms.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::pipeline::step::{ProcessingTrail, Scalar};
use crate::series::model::Component;

/// Identifier of a (station, incident, trail) combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(String);

impl RecordKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The document that gets hashed. Field order is fixed by the struct and
/// parameter order by the `BTreeMap`.
#[derive(Serialize)]
struct CanonicalRecord<'a> {
    station: &'a str,
    incident: &'a str,
    steps: Vec<CanonicalStep>,
}

#[derive(Serialize)]
struct CanonicalStep {
    operation: String,
    params: BTreeMap<String, String>,
}

fn canonical_steps(trail: &ProcessingTrail) -> Vec<CanonicalStep> {
    trail
        .canonical()
        .iter()
        .map(|step| CanonicalStep {
            operation: step.operation.clone(),
            params: step
                .params
                .iter()
                .map(|(k, v)| (k.clone(), v.canonical_text()))
                .collect(),
        })
        .collect()
}

fn digest<T: Serialize>(document: &T) -> String {
    // Serializing plain strings and string maps cannot fail.
    let bytes = serde_json::to_vec(document).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

/// The canonical form of a trail. Canonicalising twice changes nothing.
pub fn canonicalize(trail: &ProcessingTrail) -> ProcessingTrail {
    trail.canonical()
}

/// Key for `trail` applied to the raw record of `station_id` in `incident_id`.
pub fn key_for(station_id: &str, incident_id: &str, trail: &ProcessingTrail) -> RecordKey {
    let document = CanonicalRecord {
        station: station_id,
        incident: incident_id,
        steps: canonical_steps(trail),
    };
    RecordKey(digest(&document))
}

/// Key for an auxiliary spectral product of one component of a keyed record.
pub fn spectral_key(
    record: &RecordKey,
    component: Component,
    product: &str,
    params: &BTreeMap<String, Scalar>,
) -> String {
    #[derive(Serialize)]
    struct SpectralDocument<'a> {
        record: &'a str,
        component: String,
        product: &'a str,
        params: BTreeMap<String, String>,
    }

    digest(&SpectralDocument {
        record: record.as_str(),
        component: component.to_string(),
        product,
        params: params
            .iter()
            .map(|(k, v)| (k.clone(), v.canonical_text()))
            .collect(),
    })
}
