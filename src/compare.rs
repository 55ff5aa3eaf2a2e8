//! Comparison of one component of two records of the same station, usually
//! from two incidents (e.g. a simulation against an observation).

use std::fmt;
use std::str::FromStr;

use log::debug;

use crate::error::{Error, Result};
use crate::series::model::{Component, Record, TimeSeries};

/// Relative tolerance for treating two sample intervals as equal.
const SAME_INTERVAL_TOL: f64 = 1e-9;
/// How close the interval ratio must be to an integer.
const COMMENSURATE_TOL: f64 = 1e-6;
const INDEX_EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonMode {
    /// `a - b` on the common grid.
    Difference,
    /// Both inputs side by side on the common grid.
    Overlay,
}

impl FromStr for ComparisonMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "difference" | "diff" => Ok(ComparisonMode::Difference),
            "overlay" => Ok(ComparisonMode::Overlay),
            other => Err(Error::UnknownOperation {
                operation: format!("comparison mode '{other}'"),
            }),
        }
    }
}

impl fmt::Display for ComparisonMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonMode::Difference => write!(f, "difference"),
            ComparisonMode::Overlay => write!(f, "overlay"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComparisonOutput {
    /// Residual series `a - b`.
    Difference(TimeSeries),
    /// Paired samples on the common grid.
    Overlay {
        times: Vec<f64>,
        a: Vec<f64>,
        b: Vec<f64>,
    },
}

impl ComparisonOutput {
    pub fn len(&self) -> usize {
        match self {
            ComparisonOutput::Difference(series) => series.len(),
            ComparisonOutput::Overlay { times, .. } => times.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonResult {
    pub station: String,
    pub incident_a: String,
    pub incident_b: String,
    pub component: Component,
    pub mode: ComparisonMode,
    /// Common grid: `start_time + i * delta_t`.
    pub start_time: f64,
    pub delta_t: f64,
    pub output: ComparisonOutput,
}

/// Compare `component` of two records of the same station over their common
/// time window. Neither input is modified.
pub fn compare(
    record_a: &Record,
    record_b: &Record,
    component: Component,
    mode: ComparisonMode,
) -> Result<ComparisonResult> {
    if record_a.station != record_b.station {
        return Err(Error::IncompatibleRecords {
            reason: format!(
                "station '{}' of {} differs from station '{}' of {}",
                record_a.station, record_a.incident, record_b.station, record_b.incident
            ),
        });
    }
    let (a, b) = (record_a.component(component), record_b.component(component));
    let grid = common_grid(a, b)?;
    debug!(
        "comparing {} {component}: {} vs {} over {} sample(s) at dt={}",
        record_a.station, record_a.incident, record_b.incident, grid.len, grid.delta_t
    );
    Ok(ComparisonResult {
        station: record_a.station.clone(),
        incident_a: record_a.incident.clone(),
        incident_b: record_b.incident.clone(),
        component,
        mode,
        start_time: grid.start_time,
        delta_t: grid.delta_t,
        output: render(a, b, &grid, mode)?,
    })
}

/// Compare two series directly. Both must have the same kind.
pub fn compare_series(a: &TimeSeries, b: &TimeSeries, mode: ComparisonMode) -> Result<ComparisonOutput> {
    let grid = common_grid(a, b)?;
    render(a, b, &grid, mode)
}

// ---------------------------------------------------------------------------
// Alignment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Grid {
    start_time: f64,
    delta_t: f64,
    len: usize,
}

impl Grid {
    fn time_at(&self, i: usize) -> f64 {
        self.start_time + i as f64 * self.delta_t
    }
}

fn incompatible(reason: String) -> Error {
    Error::IncompatibleSampling {
        operation: "compare".to_string(),
        reason,
    }
}

fn common_grid(a: &TimeSeries, b: &TimeSeries) -> Result<Grid> {
    if a.kind() != b.kind() {
        return Err(Error::IncompatibleRecords {
            reason: format!("cannot compare a {} series with a {} series", a.kind(), b.kind()),
        });
    }

    let (dt_a, dt_b) = (a.delta_t(), b.delta_t());
    let coarse = dt_a.max(dt_b);
    let delta_t = if (dt_a - dt_b).abs() <= SAME_INTERVAL_TOL * coarse {
        dt_a
    } else {
        let ratio = coarse / dt_a.min(dt_b);
        if (ratio - ratio.round()).abs() > COMMENSURATE_TOL {
            return Err(incompatible(format!(
                "sample intervals {dt_a} and {dt_b} are not integer multiples"
            )));
        }
        coarse
    };

    let start_time = a.start_time().max(b.start_time());
    let end_time = a.end_time().min(b.end_time());
    if end_time <= start_time {
        return Err(incompatible(format!(
            "spans [{}, {}) and [{}, {}) do not overlap",
            a.start_time(),
            a.end_time(),
            b.start_time(),
            b.end_time()
        )));
    }
    let len = ((end_time - start_time) / delta_t + INDEX_EPS).floor() as usize;
    if len == 0 {
        return Err(incompatible(format!(
            "overlap of {} s is shorter than one sample",
            end_time - start_time
        )));
    }
    Ok(Grid {
        start_time,
        delta_t,
        len,
    })
}

/// Value of `series` at time `t`, linearly interpolated between samples.
fn sample_at(series: &TimeSeries, t: f64) -> f64 {
    let samples = series.samples();
    let pos = ((t - series.start_time()) / series.delta_t()).max(0.0);
    let i = ((pos + INDEX_EPS).floor() as usize).min(samples.len() - 1);
    let frac = pos - i as f64;
    if frac <= INDEX_EPS || i + 1 >= samples.len() {
        samples[i]
    } else {
        samples[i] + frac * (samples[i + 1] - samples[i])
    }
}

fn resample(series: &TimeSeries, grid: &Grid) -> Vec<f64> {
    (0..grid.len).map(|i| sample_at(series, grid.time_at(i))).collect()
}

fn render(a: &TimeSeries, b: &TimeSeries, grid: &Grid, mode: ComparisonMode) -> Result<ComparisonOutput> {
    let (va, vb) = (resample(a, grid), resample(b, grid));
    Ok(match mode {
        ComparisonMode::Difference => {
            let residual = va.iter().zip(&vb).map(|(x, y)| x - y).collect();
            ComparisonOutput::Difference(TimeSeries::new(
                residual,
                grid.delta_t,
                grid.start_time,
                a.kind(),
                a.orientation(),
            )?)
        }
        ComparisonMode::Overlay => ComparisonOutput::Overlay {
            times: (0..grid.len).map(|i| grid.time_at(i)).collect(),
            a: va,
            b: vb,
        },
    })
}
