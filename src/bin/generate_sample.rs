//! Writes a small synthetic project: two incidents (an observation and a
//! simulation of it) recorded at four stations, one Parquet file per station,
//! plus `project.json` with a few processing labels. Then resolves and
//! compares one record to show the cache at work.
//!
//! Usage: `generate_sample [OUTPUT_DIR]` (default `sample_project`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Float64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use log::info;
use parquet::arrow::ArrowWriter;

use tsprocess::project::model::geometry;
use tsprocess::{
    compare, CacheStore, ComparisonMode, ComparisonOutput, Component, EngineConfig,
    FileDataSource, Incident, IncidentKind, ProcessingStep, ProcessingTrail, Project,
    RecordResolver, SourceMetadata, StationFilter, StationMetadata,
};

const DELTA_T: f64 = 0.01;
const DURATION_S: f64 = 20.0;
const S_WAVE_KM_S: f64 = 3.5;

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5)).rotate_left(7).wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

/// Ricker wavelet centred on `t0` with peak frequency `f`.
fn ricker(t: f64, t0: f64, f: f64) -> f64 {
    let a = (std::f64::consts::PI * f * (t - t0)).powi(2);
    (1.0 - 2.0 * a) * (-a).exp()
}

/// One component: a wavelet arriving at `arrival` plus band-limited noise.
fn waveform(arrival: f64, amplitude: f64, freq: f64, noise: f64, rng: &mut SimpleRng) -> Vec<f64> {
    let n = (DURATION_S / DELTA_T).round() as usize;
    let mut last = 0.0;
    (0..n)
        .map(|i| {
            let t = i as f64 * DELTA_T;
            last = 0.8 * last + rng.gauss(0.0, noise);
            amplitude * ricker(t, arrival, freq) + last
        })
        .collect()
}

fn write_parquet(path: &Path, components: [&[f64]; 3]) -> Result<()> {
    let n = components[0].len();
    let constant = |v: f64| Arc::new(Float64Array::from(vec![v; n])) as ArrayRef;
    let column = |v: &[f64]| Arc::new(Float64Array::from(v.to_vec())) as ArrayRef;

    let schema = Arc::new(Schema::new(
        ["delta_t", "start_time", "h1", "h2", "vertical"]
            .iter()
            .map(|name| Field::new(*name, DataType::Float64, false))
            .collect::<Vec<_>>(),
    ));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            constant(DELTA_T),
            constant(0.0),
            column(components[0]),
            column(components[1]),
            column(components[2]),
        ],
    )
    .context("building record batch")?;

    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

fn stations() -> Vec<StationMetadata> {
    vec![
        StationMetadata::new("S1", 34.10, -118.00),
        StationMetadata::new("S2", 34.00, -117.70).with_azimuths(10.0, 100.0),
        StationMetadata::new("S3", 33.80, -118.20),
        StationMetadata::new("S4", 34.40, -118.50).with_azimuths(355.0, 85.0),
    ]
}

fn build_incident(name: &str, kind: IncidentKind) -> Result<Incident> {
    let mut incident = Incident::new(
        name,
        kind,
        SourceMetadata::new(34.0, -118.0, 10.0).with_magnitude(5.1),
    );
    for station in stations() {
        incident.add_station(station)?;
    }
    Ok(incident)
}

fn write_incident(data_dir: &Path, incident: &Incident, rng: &mut SimpleRng, simulated: bool) -> Result<()> {
    let dir = data_dir.join(&incident.name);
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

    for station in incident.stations.values() {
        let g = geometry(&incident.source, station);
        let arrival = 2.0 + g.epicentral_distance_km / S_WAVE_KM_S;
        let amplitude = 50.0 / (1.0 + g.epicentral_distance_km / 10.0);
        // Simulations are smoother and slightly early.
        let (shift, freq, noise) = if simulated { (-0.15, 1.5, 0.0) } else { (0.0, 2.0, 0.02) };

        let h1 = waveform(arrival + shift, amplitude, freq, noise, rng);
        let h2 = waveform(arrival + shift + 0.05, 0.8 * amplitude, freq, noise, rng);
        let vertical = waveform(arrival + shift - 0.3, 0.4 * amplitude, freq * 1.5, noise, rng);

        let path = dir.join(format!("{}.parquet", station.id));
        write_parquet(&path, [&h1[..], &h2[..], &vertical[..]])?;
        info!("wrote {}", path.display());
    }
    Ok(())
}

fn build_project() -> Result<Project> {
    let mut project = Project::new("sample");
    project.add_incident(build_incident("EQ100", IncidentKind::Observed)?)?;
    project.add_incident(build_incident("EQ101", IncidentKind::Simulated)?)?;

    project.add_label(
        "lowpass_10",
        ProcessingTrail::new(vec![ProcessingStep::lowpass(10.0, 4)]),
    )?;
    project.add_label(
        "bandpass_01_5",
        ProcessingTrail::new(vec![
            ProcessingStep::new("taper").with("flag", "all").with("m", 50),
            ProcessingStep::bandpass(0.1, 5.0, 4),
        ]),
    )?;
    project.add_label(
        "to_acceleration",
        ProcessingTrail::new(vec![ProcessingStep::integrate(), ProcessingStep::differentiate()]),
    )?;
    project.add_label("rotate_rt", ProcessingTrail::new(vec![ProcessingStep::rotate(45.0)]))?;
    project.add_station_filter("near", StationFilter::default().with_distance_km(0.0, 30.0))?;
    Ok(project)
}

fn main() -> Result<()> {
    env_logger::init();

    let out: PathBuf = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("sample_project"));
    let data_dir = out.join("data");

    let project = build_project()?;
    let mut rng = SimpleRng::new(42);
    write_incident(&data_dir, project.incident("EQ100")?, &mut rng, false)?;
    write_incident(&data_dir, project.incident("EQ101")?, &mut rng, true)?;
    project.save(&out.join("project.json"))?;

    let config = EngineConfig {
        store_dir: out.join("cache"),
        ..EngineConfig::default()
    };
    config.to_file(&out.join("engine.toml"))?;

    let store = CacheStore::open(&config.store_dir, config.memory_cache_entries)?;
    let resolver = RecordResolver::with_config(&store, FileDataSource::new(&data_dir), &config);

    let near = project.stations_matching("EQ100", "near")?;
    println!(
        "stations within 30 km of EQ100: {}",
        near.iter().map(|s| s.id.as_str()).collect::<Vec<_>>().join(", ")
    );

    let observed = resolver.resolve(&project, "EQ100", "S1", &["lowpass_10"])?;
    let simulated = resolver.resolve(&project, "EQ101", "S1", &["lowpass_10"])?;
    // Served from the cache.
    resolver.resolve(&project, "EQ100", "S1", &["lowpass_10"])?;

    let result = compare(&observed, &simulated, Component::H1, ComparisonMode::Difference)?;
    if let ComparisonOutput::Difference(residual) = &result.output {
        println!(
            "S1 h1 EQ100 - EQ101: {} samples at dt={}, peak residual {:.3}",
            residual.len(),
            residual.delta_t(),
            residual.peak_abs()
        );
    }

    let stats = resolver.stats();
    println!(
        "Wrote sample project to {} ({} hits, {} misses)",
        out.display(),
        stats.hits,
        stats.misses
    );
    Ok(())
}
