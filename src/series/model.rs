use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pipeline::step::ProcessingTrail;

/// Slack used when converting times to sample indices.
const INDEX_EPS: f64 = 1e-9;

// ---------------------------------------------------------------------------
// SeriesKind – physical meaning of the samples
// ---------------------------------------------------------------------------

/// The closed set of series kinds. Derivation rules live here so that every
/// kind answers "what do I integrate / differentiate into" without any runtime
/// type inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SeriesKind {
    Raw,
    Displacement,
    Velocity,
    Acceleration,
    Unitless,
}

impl SeriesKind {
    /// Kind produced by integrating a series of this kind, if defined.
    pub fn integral(self) -> Option<SeriesKind> {
        match self {
            SeriesKind::Raw => Some(SeriesKind::Velocity),
            SeriesKind::Acceleration => Some(SeriesKind::Velocity),
            SeriesKind::Velocity => Some(SeriesKind::Displacement),
            SeriesKind::Displacement | SeriesKind::Unitless => None,
        }
    }

    /// Kind produced by differentiating a series of this kind, if defined.
    pub fn derivative(self) -> Option<SeriesKind> {
        match self {
            SeriesKind::Displacement => Some(SeriesKind::Velocity),
            SeriesKind::Velocity => Some(SeriesKind::Acceleration),
            SeriesKind::Raw | SeriesKind::Acceleration | SeriesKind::Unitless => None,
        }
    }
}

impl fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SeriesKind::Raw => "raw",
            SeriesKind::Displacement => "displacement",
            SeriesKind::Velocity => "velocity",
            SeriesKind::Acceleration => "acceleration",
            SeriesKind::Unitless => "unitless",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Orientation
// ---------------------------------------------------------------------------

/// Sensor component orientation. Horizontal azimuths are degrees clockwise
/// from north.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Orientation {
    Horizontal { azimuth: f64 },
    Vertical,
}

impl Orientation {
    pub fn azimuth(&self) -> Option<f64> {
        match self {
            Orientation::Horizontal { azimuth } => Some(*azimuth),
            Orientation::Vertical => None,
        }
    }
}

// ---------------------------------------------------------------------------
// TimeSeries – one immutable component
// ---------------------------------------------------------------------------

/// An immutable, evenly sampled series.
///
/// Sample count and interval never change after construction: every
/// operation returns a new series. The `trail` records how the series was
/// derived from its raw base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    samples: Vec<f64>,
    delta_t: f64,
    start_time: f64,
    kind: SeriesKind,
    orientation: Orientation,
    #[serde(default)]
    trail: ProcessingTrail,
}

impl TimeSeries {
    /// Build a base series with an empty trail.
    pub fn new(
        samples: Vec<f64>,
        delta_t: f64,
        start_time: f64,
        kind: SeriesKind,
        orientation: Orientation,
    ) -> Result<Self> {
        if !(delta_t.is_finite() && delta_t > 0.0) {
            return Err(Error::IncompatibleSampling {
                operation: "construct series".to_string(),
                reason: format!("sample interval must be positive, got {delta_t}"),
            });
        }
        if !start_time.is_finite() {
            return Err(Error::IncompatibleSampling {
                operation: "construct series".to_string(),
                reason: format!("start time must be finite, got {start_time}"),
            });
        }
        Ok(TimeSeries {
            samples,
            delta_t,
            start_time,
            kind,
            orientation,
            trail: ProcessingTrail::default(),
        })
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn delta_t(&self) -> f64 {
        self.delta_t
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Exclusive end of the covered time span: `start + len * dt`.
    pub fn end_time(&self) -> f64 {
        self.start_time + self.samples.len() as f64 * self.delta_t
    }

    pub fn kind(&self) -> SeriesKind {
        self.kind
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn trail(&self) -> &ProcessingTrail {
        &self.trail
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_rate(&self) -> f64 {
        1.0 / self.delta_t
    }

    pub fn nyquist(&self) -> f64 {
        0.5 / self.delta_t
    }

    /// Time of sample `i`.
    pub fn time_at(&self, i: usize) -> f64 {
        self.start_time + i as f64 * self.delta_t
    }

    /// Peak absolute amplitude (0 for an empty series).
    pub fn peak_abs(&self) -> f64 {
        self.samples.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
    }

    /// True when no sample is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.samples.iter().all(|v| v.is_finite())
    }

    // -- derivation helpers used by the operations --

    /// Same metadata, new samples.
    pub(crate) fn with_samples(&self, samples: Vec<f64>) -> TimeSeries {
        TimeSeries {
            samples,
            ..self.clone_meta()
        }
    }

    pub(crate) fn with_start_time(&self, start_time: f64) -> TimeSeries {
        TimeSeries {
            start_time,
            ..self.clone()
        }
    }

    pub(crate) fn with_orientation(&self, orientation: Orientation) -> TimeSeries {
        TimeSeries {
            orientation,
            ..self.clone()
        }
    }

    pub(crate) fn with_trail(mut self, trail: ProcessingTrail) -> TimeSeries {
        self.trail = trail;
        self
    }

    fn clone_meta(&self) -> TimeSeries {
        TimeSeries {
            samples: Vec::new(),
            delta_t: self.delta_t,
            start_time: self.start_time,
            kind: self.kind,
            orientation: self.orientation,
            trail: self.trail.clone(),
        }
    }

    // -- kind-preserving operations --

    /// Multiply every sample by `factor`.
    pub fn scale(&self, factor: f64) -> Result<TimeSeries> {
        if !factor.is_finite() {
            return Err(Error::invalid_params("scale", format!("factor must be finite, got {factor}")));
        }
        Ok(self.with_samples(self.samples.iter().map(|v| v * factor).collect()))
    }

    /// Move the series in time by `seconds`; samples are untouched.
    pub fn shift(&self, seconds: f64) -> Result<TimeSeries> {
        if !seconds.is_finite() {
            return Err(Error::invalid_params("shift", format!("seconds must be finite, got {seconds}")));
        }
        Ok(self.with_start_time(self.start_time + seconds))
    }

    /// Extract the samples whose times fall in `[t_start, t_end)`.
    pub fn window(&self, t_start: f64, t_end: f64) -> Result<TimeSeries> {
        if !(t_start.is_finite() && t_end.is_finite() && t_start < t_end) {
            return Err(Error::invalid_params(
                "window",
                format!("bounds [{t_start}, {t_end}) are not an increasing interval"),
            ));
        }
        let first = self.index_at_or_after(t_start);
        let last = self.index_at_or_after(t_end);
        if first >= last {
            return Err(Error::invalid_params(
                "window",
                format!(
                    "[{t_start}, {t_end}) does not overlap the series span [{}, {})",
                    self.start_time,
                    self.end_time()
                ),
            ));
        }
        Ok(TimeSeries {
            samples: self.samples[first..last].to_vec(),
            start_time: self.time_at(first),
            ..self.clone_meta()
        })
    }

    /// First sample index whose time is not before `t`, clamped to `[0, len]`.
    fn index_at_or_after(&self, t: f64) -> usize {
        let pos = ((t - self.start_time) / self.delta_t - INDEX_EPS).ceil();
        if pos <= 0.0 {
            0
        } else {
            (pos as usize).min(self.samples.len())
        }
    }

    // -- kind-changing operations --

    /// Rectangle-rule integral: `y[i] = initial + dt * sum(x[0..=i])`.
    pub fn integrate(&self, initial: f64) -> Result<TimeSeries> {
        let kind = self.kind.integral().ok_or_else(|| Error::UnsupportedDerivation {
            kind: self.kind,
            operation: "integrate".to_string(),
        })?;
        if !initial.is_finite() {
            return Err(Error::invalid_params("integrate", format!("initial value must be finite, got {initial}")));
        }
        let mut acc = initial;
        let samples = self
            .samples
            .iter()
            .map(|v| {
                acc += v * self.delta_t;
                acc
            })
            .collect();
        Ok(TimeSeries {
            samples,
            kind,
            ..self.clone_meta()
        })
    }

    /// Backward difference with the signal at rest before the first sample.
    /// Exact inverse of [`TimeSeries::integrate`] with a zero initial value.
    pub fn differentiate(&self) -> Result<TimeSeries> {
        let kind = self.kind.derivative().ok_or_else(|| Error::UnsupportedDerivation {
            kind: self.kind,
            operation: "differentiate".to_string(),
        })?;
        let mut previous = 0.0;
        let samples = self
            .samples
            .iter()
            .map(|&v| {
                let d = (v - previous) / self.delta_t;
                previous = v;
                d
            })
            .collect();
        Ok(TimeSeries {
            samples,
            kind,
            ..self.clone_meta()
        })
    }
}

// ---------------------------------------------------------------------------
// Record – the three components of one station recording
// ---------------------------------------------------------------------------

/// Selects one component of a [`Record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Component {
    H1,
    H2,
    Vertical,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Component::H1 => "h1",
            Component::H2 => "h2",
            Component::Vertical => "vertical",
        };
        f.write_str(name)
    }
}

/// A station recording for one incident: two horizontals and a vertical,
/// all sharing sample interval and length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub incident: String,
    pub station: String,
    pub h1: TimeSeries,
    pub h2: TimeSeries,
    pub vertical: TimeSeries,
}

impl Record {
    pub fn new(
        incident: impl Into<String>,
        station: impl Into<String>,
        h1: TimeSeries,
        h2: TimeSeries,
        vertical: TimeSeries,
    ) -> Result<Self> {
        let record = Record {
            incident: incident.into(),
            station: station.into(),
            h1,
            h2,
            vertical,
        };
        record.check_sampling()?;
        Ok(record)
    }

    pub fn component(&self, component: Component) -> &TimeSeries {
        match component {
            Component::H1 => &self.h1,
            Component::H2 => &self.h2,
            Component::Vertical => &self.vertical,
        }
    }

    /// Kind shared by the components.
    pub fn kind(&self) -> SeriesKind {
        self.h1.kind()
    }

    /// The processing trail this record was derived with.
    pub fn trail(&self) -> &ProcessingTrail {
        self.h1.trail()
    }

    pub fn is_finite(&self) -> bool {
        self.h1.is_finite() && self.h2.is_finite() && self.vertical.is_finite()
    }

    /// Apply `op` to every component, producing a new record.
    pub fn map_components<F>(&self, mut op: F) -> Result<Record>
    where
        F: FnMut(&TimeSeries) -> Result<TimeSeries>,
    {
        Ok(Record {
            incident: self.incident.clone(),
            station: self.station.clone(),
            h1: op(&self.h1)?,
            h2: op(&self.h2)?,
            vertical: op(&self.vertical)?,
        })
    }

    fn check_sampling(&self) -> Result<()> {
        for other in [&self.h2, &self.vertical] {
            if other.delta_t() != self.h1.delta_t() || other.len() != self.h1.len() {
                return Err(Error::IncompatibleSampling {
                    operation: format!("assemble record {}/{}", self.incident, self.station),
                    reason: format!(
                        "components differ: {} samples at {}s vs {} samples at {}s",
                        self.h1.len(),
                        self.h1.delta_t(),
                        other.len(),
                        other.delta_t()
                    ),
                });
            }
        }
        Ok(())
    }
}
