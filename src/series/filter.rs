use std::f64::consts::PI;

use crate::error::{Error, Result};

use super::model::TimeSeries;

// ---------------------------------------------------------------------------
// Butterworth design – cascaded second-order sections
// ---------------------------------------------------------------------------

/// Filter response shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandType {
    Lowpass,
    Highpass,
}

/// One biquad (first-order sections keep `b2 = a2 = 0`), normalised so a0 = 1.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Section {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Section {
    /// Transposed direct form II over `data`, in place, from rest.
    fn run(&self, data: &mut [f64]) {
        let (mut z1, mut z2) = (0.0, 0.0);
        for x in data.iter_mut() {
            let input = *x;
            let y = self.b0 * input + z1;
            z1 = self.b1 * input - self.a1 * y + z2;
            z2 = self.b2 * input - self.a2 * y;
            *x = y;
        }
    }
}

/// Digital Butterworth sections for `order` at `corner` Hz, via the bilinear
/// transform with pre-warping.
fn design(band: BandType, order: u32, corner: f64, sample_rate: f64) -> Vec<Section> {
    let k = (PI * corner / sample_rate).tan();
    let kk = k * k;
    let mut sections = Vec::with_capacity(order as usize / 2 + 1);

    for i in 0..order / 2 {
        let q = 1.0 / (2.0 * ((2 * i + 1) as f64 * PI / (2 * order) as f64).sin());
        let norm = 1.0 / (1.0 + k / q + kk);
        let a1 = 2.0 * (kk - 1.0) * norm;
        let a2 = (1.0 - k / q + kk) * norm;
        let section = match band {
            BandType::Lowpass => Section {
                b0: kk * norm,
                b1: 2.0 * kk * norm,
                b2: kk * norm,
                a1,
                a2,
            },
            BandType::Highpass => Section {
                b0: norm,
                b1: -2.0 * norm,
                b2: norm,
                a1,
                a2,
            },
        };
        sections.push(section);
    }

    if order % 2 == 1 {
        let a1 = (k - 1.0) / (k + 1.0);
        let section = match band {
            BandType::Lowpass => Section {
                b0: k / (1.0 + k),
                b1: k / (1.0 + k),
                b2: 0.0,
                a1,
                a2: 0.0,
            },
            BandType::Highpass => Section {
                b0: 1.0 / (1.0 + k),
                b1: -1.0 / (1.0 + k),
                b2: 0.0,
                a1,
                a2: 0.0,
            },
        };
        sections.push(section);
    }
    sections
}

/// Zero-phase filtering: forward then backward through every section, with
/// odd reflection padding at both ends to tame edge transients.
fn filtfilt(sections: &[Section], samples: &[f64]) -> Vec<f64> {
    let n = samples.len();
    if n < 2 {
        return samples.to_vec();
    }
    let pad = (3 * (2 * sections.len() + 1)).min(n - 1);

    let first = samples[0];
    let last = samples[n - 1];
    let mut data = Vec::with_capacity(n + 2 * pad);
    data.extend((1..=pad).rev().map(|i| 2.0 * first - samples[i]));
    data.extend_from_slice(samples);
    data.extend((1..=pad).map(|i| 2.0 * last - samples[n - 1 - i]));

    for section in sections {
        section.run(&mut data);
    }
    data.reverse();
    for section in sections {
        section.run(&mut data);
    }
    data.reverse();

    data[pad..pad + n].to_vec()
}

// ---------------------------------------------------------------------------
// Parameter validation
// ---------------------------------------------------------------------------

fn check_order(operation: &str, order: u32, max_order: u32) -> Result<()> {
    if order == 0 || order > max_order {
        return Err(Error::invalid_params(
            operation,
            format!("order must be in 1..={max_order}, got {order}"),
        ));
    }
    Ok(())
}

fn check_corner(operation: &str, name: &str, corner: f64, series: &TimeSeries) -> Result<()> {
    let nyquist = series.nyquist();
    if !(corner.is_finite() && corner > 0.0 && corner < nyquist) {
        return Err(Error::invalid_params(
            operation,
            format!("{name}={corner} Hz must lie in (0, {nyquist}) Hz (Nyquist)"),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Public filters
// ---------------------------------------------------------------------------

/// Zero-phase Butterworth lowpass. Kind and sampling are preserved.
pub fn lowpass(series: &TimeSeries, corner: f64, order: u32, max_order: u32) -> Result<TimeSeries> {
    check_order("lowpass_filter", order, max_order)?;
    check_corner("lowpass_filter", "fc", corner, series)?;
    let sections = design(BandType::Lowpass, order, corner, series.sample_rate());
    Ok(series.with_samples(filtfilt(&sections, series.samples())))
}

/// Zero-phase Butterworth highpass.
pub fn highpass(series: &TimeSeries, corner: f64, order: u32, max_order: u32) -> Result<TimeSeries> {
    check_order("highpass_filter", order, max_order)?;
    check_corner("highpass_filter", "fc", corner, series)?;
    let sections = design(BandType::Highpass, order, corner, series.sample_rate());
    Ok(series.with_samples(filtfilt(&sections, series.samples())))
}

/// Zero-phase bandpass built as a highpass at `low` cascaded with a lowpass at `high`.
pub fn bandpass(
    series: &TimeSeries,
    low: f64,
    high: f64,
    order: u32,
    max_order: u32,
) -> Result<TimeSeries> {
    check_order("bandpass_filter", order, max_order)?;
    check_corner("bandpass_filter", "fc_low", low, series)?;
    check_corner("bandpass_filter", "fc_high", high, series)?;
    if low >= high {
        return Err(Error::invalid_params(
            "bandpass_filter",
            format!("fc_low={low} must be below fc_high={high}"),
        ));
    }
    let rate = series.sample_rate();
    let mut sections = design(BandType::Highpass, order, low, rate);
    sections.extend(design(BandType::Lowpass, order, high, rate));
    Ok(series.with_samples(filtfilt(&sections, series.samples())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::model::{Orientation, SeriesKind};

    fn sine(freq: f64, dt: f64, n: usize) -> TimeSeries {
        let samples = (0..n).map(|i| (2.0 * PI * freq * i as f64 * dt).sin()).collect();
        TimeSeries::new(samples, dt, 0.0, SeriesKind::Velocity, Orientation::Vertical).unwrap()
    }

    /// RMS over the middle half, away from edge effects.
    fn mid_rms(s: &TimeSeries) -> f64 {
        let n = s.len();
        let mid = &s.samples()[n / 4..3 * n / 4];
        (mid.iter().map(|v| v * v).sum::<f64>() / mid.len() as f64).sqrt()
    }

    #[test]
    fn lowpass_keeps_low_and_removes_high() {
        let low = sine(1.0, 0.01, 2000);
        let high = sine(40.0, 0.01, 2000);

        let low_out = lowpass(&low, 10.0, 4, 12).unwrap();
        let high_out = lowpass(&high, 10.0, 4, 12).unwrap();

        assert!((mid_rms(&low_out) / mid_rms(&low) - 1.0).abs() < 0.01);
        assert!(mid_rms(&high_out) < 1e-3);
        assert_eq!(low_out.len(), low.len());
        assert_eq!(low_out.kind(), SeriesKind::Velocity);
    }

    #[test]
    fn highpass_removes_low() {
        let low = sine(0.2, 0.01, 4000);
        let out = highpass(&low, 5.0, 3, 12).unwrap();
        assert!(mid_rms(&out) < 1e-2);
    }

    #[test]
    fn bandpass_passes_centre() {
        let centre = sine(5.0, 0.01, 4000);
        let out = bandpass(&centre, 1.0, 20.0, 4, 12).unwrap();
        assert!((mid_rms(&out) / mid_rms(&centre) - 1.0).abs() < 0.02);
    }

    #[test]
    fn corner_at_or_above_nyquist_is_rejected() {
        let s = sine(1.0, 0.01, 100);
        assert!(matches!(
            lowpass(&s, 50.0, 4, 12),
            Err(Error::InvalidFilterParameters { .. })
        ));
        assert!(lowpass(&s, 10.0, 0, 12).is_err());
        assert!(lowpass(&s, 10.0, 13, 12).is_err());
        assert!(bandpass(&s, 10.0, 5.0, 2, 12).is_err());
    }
}
