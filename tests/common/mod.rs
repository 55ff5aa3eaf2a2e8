#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use tsprocess::source::loader::ComponentData;
use tsprocess::source::raw_record;
use tsprocess::{
    Incident, IncidentKind, ProcessingStep, ProcessingTrail, Project, RawDataSource, Record,
    Result, SourceMetadata, StationMetadata,
};

pub const DELTA_T: f64 = 0.01;
pub const SAMPLES: usize = 2000;

/// Synthetic data source that counts how often it is asked for data.
#[derive(Debug, Default)]
pub struct CountingSource {
    calls: AtomicUsize,
}

impl CountingSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RawDataSource for CountingSource {
    fn load(&self, incident: &Incident, station: &StationMetadata) -> Result<Record> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        synthetic_record(incident, station)
    }
}

/// Deterministic three-component record; differs per incident and station.
pub fn synthetic_record(incident: &Incident, station: &StationMetadata) -> Result<Record> {
    let seed = incident
        .name
        .bytes()
        .chain(station.id.bytes())
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    let phase = (seed % 1000) as f64 / 100.0;
    let wave = |offset: f64| -> Vec<f64> {
        (0..SAMPLES)
            .map(|i| {
                let t = i as f64 * DELTA_T;
                (2.0 * std::f64::consts::PI * 1.3 * t + phase + offset).sin()
                    + 0.4 * (2.0 * std::f64::consts::PI * 17.0 * t + offset).sin()
                    + 0.05 * ((i * 7919 + seed as usize) % 101) as f64 / 101.0
            })
            .collect()
    };
    raw_record(
        &incident.name,
        station,
        ComponentData {
            delta_t: DELTA_T,
            start_time: 0.0,
            h1: wave(0.0),
            h2: wave(0.7),
            vertical: wave(1.9),
        },
    )
}

fn incident(name: &str, kind: IncidentKind) -> Incident {
    Incident::new(name, kind, SourceMetadata::new(34.0, -118.0, 10.0))
        .with_station(StationMetadata::new("S1", 34.1, -118.0))
        .unwrap()
        .with_station(StationMetadata::new("S2", 34.0, -117.7).with_azimuths(10.0, 100.0))
        .unwrap()
}

/// EQ100 (observed) and EQ101 (simulated) at S1 and S2, with labels:
/// `lp` lowpass 10 Hz, `cut` trims 5 s from the end, `vel` integrates,
/// `acc` differentiates.
pub fn sample_project() -> Project {
    let mut project = Project::new("test");
    project.add_incident(incident("EQ100", IncidentKind::Observed)).unwrap();
    project.add_incident(incident("EQ101", IncidentKind::Simulated)).unwrap();
    project
        .add_label("lp", ProcessingTrail::new(vec![ProcessingStep::lowpass(10.0, 4)]))
        .unwrap();
    project
        .add_label(
            "cut",
            ProcessingTrail::new(vec![ProcessingStep::new("cut")
                .with("flag", "end")
                .with("seconds", 5.0)]),
        )
        .unwrap();
    project
        .add_label("vel", ProcessingTrail::new(vec![ProcessingStep::integrate()]))
        .unwrap();
    project
        .add_label("acc", ProcessingTrail::new(vec![ProcessingStep::differentiate()]))
        .unwrap();
    project
}
