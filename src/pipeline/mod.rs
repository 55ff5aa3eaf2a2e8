//! Processing pipeline: ordered, named steps executed over a series or a
//! whole three-component record.
//!
//! ```text
//!   ProcessingTrail [step, step, ...]
//!        │  Operation::parse (typed, validated)
//!        ▼
//!   ┌──────────┐
//!   │ Pipeline  │  step i: (input, params) → new output, trail extended
//!   └──────────┘
//! ```
//!
//! Nothing here is cached. Suppressing recomputation is the resolver's job.

pub mod step;

use log::{debug, info};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::series::model::{Record, TimeSeries};
use crate::series::{filter, rotate, window};

use step::{Operation, ProcessingStep, ProcessingTrail};

/// Executes processing trails with the engine's numeric limits.
#[derive(Debug, Clone)]
pub struct Pipeline {
    max_filter_order: u32,
    orientation_tolerance_deg: f64,
}

impl Default for Pipeline {
    fn default() -> Self {
        Pipeline::from_config(&EngineConfig::default())
    }
}

impl Pipeline {
    pub fn from_config(config: &EngineConfig) -> Self {
        Pipeline {
            max_filter_order: config.max_filter_order,
            orientation_tolerance_deg: config.orientation_tolerance_deg,
        }
    }

    /// Apply `trail` to a single series. `rotate` needs both horizontals and is
    /// rejected here; use [`Pipeline::apply_record`] for it.
    pub fn apply(&self, series: &TimeSeries, trail: &ProcessingTrail) -> Result<TimeSeries> {
        let mut current = series.clone();
        for step in trail {
            let op = Operation::parse(step)?;
            if let Operation::Rotate { .. } = op {
                return Err(Error::invalid_params(
                    "rotate",
                    "rotation needs a pair of horizontal components",
                ));
            }
            let next = self.apply_operation(&current, &op)?;
            if !next.is_finite() {
                return Err(non_finite(step));
            }
            current = extend_trail(next, &current, step);
        }
        Ok(current)
    }

    /// Apply `trail` to every component of `record`, step by step.
    ///
    /// The input is never modified; on error nothing is returned, so a failing
    /// step cannot leave a half-processed record behind.
    pub fn apply_record(&self, record: &Record, trail: &ProcessingTrail) -> Result<Record> {
        info!(
            "processing {}/{} with {} step(s)",
            record.incident,
            record.station,
            trail.len()
        );
        let mut current = record.clone();
        for step in trail {
            let op = Operation::parse(step)?;
            debug!("{}/{}: {step}", record.incident, record.station);
            let next = match op {
                Operation::Rotate { angle } => {
                    let (h1, h2) = rotate::rotate(
                        &current.h1,
                        &current.h2,
                        angle,
                        self.orientation_tolerance_deg,
                    )?;
                    Record {
                        h1,
                        h2,
                        ..current.clone()
                    }
                }
                _ => current.map_components(|s| self.apply_operation(s, &op))?,
            };
            if !next.is_finite() {
                return Err(non_finite(step));
            }
            let Record {
                incident,
                station,
                h1,
                h2,
                vertical,
            } = next;
            current = Record {
                incident,
                station,
                h1: extend_trail(h1, &current.h1, step),
                h2: extend_trail(h2, &current.h2, step),
                vertical: extend_trail(vertical, &current.vertical, step),
            };
        }
        Ok(current)
    }

    fn apply_operation(&self, series: &TimeSeries, op: &Operation) -> Result<TimeSeries> {
        let max = self.max_filter_order;
        match *op {
            Operation::Lowpass { fc, order } => filter::lowpass(series, fc, order, max),
            Operation::Highpass { fc, order } => filter::highpass(series, fc, order, max),
            Operation::Bandpass {
                fc_low,
                fc_high,
                order,
            } => filter::bandpass(series, fc_low, fc_high, order, max),
            Operation::Scale { factor } => series.scale(factor),
            Operation::Shift { seconds } => series.shift(seconds),
            Operation::Taper { edge, m } => window::taper(series, edge, m),
            Operation::Cut { edge, seconds, m } => window::cut(series, edge, seconds, m),
            Operation::ZeroPad { edge, seconds, m } => window::zero_pad(series, edge, seconds, m),
            Operation::Window { t_start, t_end } => series.window(t_start, t_end),
            Operation::Integrate { initial } => series.integrate(initial),
            Operation::Differentiate => series.differentiate(),
            Operation::Rotate { .. } => Err(Error::invalid_params(
                "rotate",
                "rotation needs a pair of horizontal components",
            )),
        }
    }
}

fn non_finite(step: &ProcessingStep) -> Error {
    Error::invalid_params(&step.operation, "step produced non-finite samples")
}

/// `output` carrying `input`'s trail plus the canonical form of `step`.
fn extend_trail(output: TimeSeries, input: &TimeSeries, step: &ProcessingStep) -> TimeSeries {
    output.with_trail(input.trail().then(step.canonical()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::model::{Orientation, SeriesKind};

    fn record() -> Record {
        let n = 400;
        let make = |phase: f64, orientation| {
            let samples = (0..n)
                .map(|i| (i as f64 * 0.07 + phase).sin() + 0.3 * (i as f64 * 1.9).cos())
                .collect();
            TimeSeries::new(samples, 0.01, 0.0, SeriesKind::Raw, orientation).unwrap()
        };
        Record::new(
            "EQ1",
            "S1",
            make(0.0, Orientation::Horizontal { azimuth: 0.0 }),
            make(1.0, Orientation::Horizontal { azimuth: 90.0 }),
            make(2.0, Orientation::Vertical),
        )
        .unwrap()
    }

    #[test]
    fn trail_accumulates_on_every_component() {
        let trail = ProcessingTrail::new(vec![
            ProcessingStep::integrate(),
            ProcessingStep::lowpass(10.0, 4),
            ProcessingStep::rotate(45.0),
        ]);
        let out = Pipeline::default().apply_record(&record(), &trail).unwrap();

        assert_eq!(out.kind(), SeriesKind::Velocity);
        assert_eq!(out.trail(), &trail.canonical());
        assert_eq!(out.vertical.trail(), &trail.canonical());
        assert_eq!(out.h1.orientation().azimuth(), Some(45.0));
        assert_eq!(out.h2.orientation().azimuth(), Some(135.0));
    }

    #[test]
    fn failing_step_leaves_input_untouched() {
        let base = record();
        let snapshot = base.clone();
        let trail = ProcessingTrail::new(vec![
            ProcessingStep::scale(2.0),
            ProcessingStep::lowpass(80.0, 4),
        ]);
        let err = Pipeline::default().apply_record(&base, &trail).unwrap_err();
        assert!(matches!(err, Error::InvalidFilterParameters { .. }));
        assert_eq!(base, snapshot);
    }

    #[test]
    fn overflowing_step_is_rejected() {
        let trail = ProcessingTrail::new(vec![
            ProcessingStep::scale(1e300),
            ProcessingStep::scale(1e300),
        ]);
        let err = Pipeline::default().apply_record(&record(), &trail).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidFilterParameters { ref operation, .. } if operation == "scale"
        ));
        assert!(Pipeline::default().apply(&record().h1, &trail).is_err());
    }

    #[test]
    fn single_series_rejects_rotation() {
        let base = record();
        let trail = ProcessingTrail::new(vec![ProcessingStep::rotate(10.0)]);
        assert!(Pipeline::default().apply(&base.h1, &trail).is_err());

        let trail = ProcessingTrail::new(vec![ProcessingStep::scale(-1.0)]);
        let flipped = Pipeline::default().apply(&base.h1, &trail).unwrap();
        assert_eq!(flipped.samples()[3], -base.h1.samples()[3]);
        assert_eq!(flipped.trail().len(), 1);
    }

    #[test]
    fn unsupported_derivation_surfaces() {
        let trail = ProcessingTrail::new(vec![ProcessingStep::differentiate()]);
        assert!(matches!(
            Pipeline::default().apply_record(&record(), &trail),
            Err(Error::UnsupportedDerivation { kind: SeriesKind::Raw, .. })
        ));
    }
}
