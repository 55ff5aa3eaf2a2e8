//! Frequency-domain products. These are auxiliary data derived from a series,
//! never a new time-domain series.

use std::f64::consts::PI;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::model::{SeriesKind, TimeSeries};

/// Number of log-spaced periods in a response spectrum.
const RESPONSE_PERIODS: usize = 20;

/// Fourier amplitude spectrum over a frequency band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    pub frequencies: Vec<f64>,
    pub amplitudes: Vec<f64>,
}

/// Peak oscillator acceleration per natural period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSpectrum {
    pub damping: f64,
    pub periods: Vec<f64>,
    pub accelerations: Vec<f64>,
}

/// Smallest power of two strictly greater than `n`.
pub fn transform_points(n: usize) -> usize {
    let mut points = 1;
    while points <= n {
        points <<= 1;
    }
    points
}

/// In-place three-point smoothing, `factor = 3` giving weights 0.25/0.5/0.25.
fn smooth(data: &mut [f64], factor: f64) {
    let c = 0.5 / (factor - 1.0);
    for i in 1..data.len().saturating_sub(1) {
        data[i] = 0.5 * data[i] + c * data[i - 1] + c * data[i + 1];
    }
}

/// Fourier amplitude spectrum `|DFT(x, N)| * dt` for the bins in `[fmin, fmax]`.
///
/// `N` is the next power of two above the sample count (zero padded). Bins are
/// evaluated in parallel and collected in frequency order.
pub fn fas(series: &TimeSeries, fmin: f64, fmax: f64, smoothing: f64) -> Result<Spectrum> {
    if !(fmin.is_finite() && fmax.is_finite() && fmin >= 0.0 && fmin < fmax) {
        return Err(Error::invalid_params(
            "fas",
            format!("frequency band [{fmin}, {fmax}] is not increasing and non-negative"),
        ));
    }
    if fmax > series.nyquist() {
        return Err(Error::invalid_params(
            "fas",
            format!("fmax={fmax} exceeds Nyquist {}", series.nyquist()),
        ));
    }
    if !(smoothing.is_finite() && smoothing > 1.0) {
        return Err(Error::invalid_params(
            "fas",
            format!("smoothing factor must exceed 1, got {smoothing}"),
        ));
    }
    if series.is_empty() {
        return Err(Error::invalid_params("fas", "series has no samples"));
    }

    let dt = series.delta_t();
    let points = transform_points(series.len());
    let delta_f = 1.0 / (dt * points as f64);
    let first = (fmin / delta_f).floor() as usize;
    let last = ((fmax / delta_f).floor() as usize).min(points / 2);

    let samples = series.samples();
    let mut amplitudes: Vec<f64> = (first..=last)
        .into_par_iter()
        .map(|bin| {
            let (mut re, mut im) = (0.0, 0.0);
            for (j, x) in samples.iter().enumerate() {
                // reduce the phase index first so large products stay exact
                let phase = ((j * bin) % points) as f64 * 2.0 * PI / points as f64;
                re += x * phase.cos();
                im -= x * phase.sin();
            }
            (re * re + im * im).sqrt() * dt
        })
        .collect();
    smooth(&mut amplitudes, smoothing);

    let frequencies = (first..=last).map(|bin| bin as f64 * delta_f).collect();
    Ok(Spectrum {
        frequencies,
        amplitudes,
    })
}

/// Log-spaced periods between `tmin` and `tmax` inclusive.
pub fn periods(tmin: f64, tmax: f64) -> Vec<f64> {
    let (a, b) = (tmin.log10(), tmax.log10());
    (0..RESPONSE_PERIODS)
        .map(|i| 10f64.powf(a + (b - a) * i as f64 / (RESPONSE_PERIODS - 1) as f64))
        .collect()
}

/// Peak absolute acceleration of a damped single-degree-of-freedom
/// oscillator driven by `acc`, starting at rest. Uses the exact recurrence for
/// piecewise-linear excitation.
fn peak_oscillator_acceleration(acc: &[f64], dt: f64, damping: f64, period: f64) -> f64 {
    if acc.is_empty() {
        return 0.0;
    }
    let w = 2.0 * PI / period;
    let ww = w * w;
    let csi = damping;
    let csicsi = csi * csi;
    let dcsiw = 2.0 * csi * w;

    let rcsi = (1.0 - csicsi).sqrt();
    let csircs = csi / rcsi;
    let wd = w * rcsi;
    let ueskdt = -1.0 / (ww * dt);
    let dcsiew = 2.0 * csi / w;
    let um2csi = (1.0 - 2.0 * csicsi) / wd;
    let e = (-w * dt * csi).exp();
    let s = (wd * dt).sin();
    let c0 = (wd * dt).cos();

    let ca = e * (csircs * s + c0);
    let cb = e * s / wd;
    let cc = (e * ((um2csi - csircs * dt) * s - (dcsiew + dt) * c0) + dcsiew) * ueskdt;
    let cd = (e * (-um2csi * s + dcsiew * c0) + dt - dcsiew) * ueskdt;
    let cap = -cb * ww;
    let cbp = e * (c0 - csircs * s);
    let ccp = (e * ((w * dt / rcsi + csircs) * s + c0) - 1.0) * ueskdt;
    let cdp = (1.0 - ca) * ueskdt;

    let (mut d, mut v) = (0.0, 0.0);
    let mut peak = 0.0_f64;
    for i in 1..acc.len() {
        let nd = ca * d + cb * v + cc * acc[i - 1] + cd * acc[i];
        let nv = cap * d + cbp * v + ccp * acc[i - 1] + cdp * acc[i];
        d = nd;
        v = nv;
        peak = peak.max((-ww * d - dcsiw * v).abs());
    }
    peak
}

/// Response spectrum of an acceleration series over `[tmin, tmax]` seconds.
pub fn response_spectrum(
    series: &TimeSeries,
    tmin: f64,
    tmax: f64,
    damping: f64,
) -> Result<ResponseSpectrum> {
    if series.kind() != SeriesKind::Acceleration {
        return Err(Error::UnsupportedDerivation {
            kind: series.kind(),
            operation: "response_spectrum".to_string(),
        });
    }
    if !(tmin.is_finite() && tmax.is_finite() && tmin > 0.0 && tmin < tmax) {
        return Err(Error::invalid_params(
            "response_spectrum",
            format!("period range [{tmin}, {tmax}] must be positive and increasing"),
        ));
    }
    if !(damping > 0.0 && damping < 1.0) {
        return Err(Error::invalid_params(
            "response_spectrum",
            format!("damping ratio must be in (0, 1), got {damping}"),
        ));
    }

    let periods = periods(tmin, tmax);
    let accelerations = periods
        .par_iter()
        .map(|&p| peak_oscillator_acceleration(series.samples(), series.delta_t(), damping, p))
        .collect();
    Ok(ResponseSpectrum {
        damping,
        periods,
        accelerations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::model::Orientation;

    fn sine(kind: SeriesKind, freq: f64, dt: f64, n: usize) -> TimeSeries {
        let samples = (0..n).map(|i| (2.0 * PI * freq * i as f64 * dt).sin()).collect();
        TimeSeries::new(samples, dt, 0.0, kind, Orientation::Vertical).unwrap()
    }

    #[test]
    fn points_is_next_power_of_two() {
        assert_eq!(transform_points(1000), 1024);
        assert_eq!(transform_points(1024), 2048);
        assert_eq!(transform_points(1), 2);
    }

    #[test]
    fn periods_match_log_spacing() {
        let p = periods(0.1, 10.0);
        assert_eq!(p.len(), 20);
        assert!((p[0] - 0.1).abs() < 1e-12);
        assert!((p[19] - 10.0).abs() < 1e-9);
        assert!((p[2] - 0.16237767).abs() < 1e-8);
    }

    #[test]
    fn fas_peaks_at_signal_frequency() {
        let s = sine(SeriesKind::Velocity, 5.0, 0.01, 1024);
        let spectrum = fas(&s, 0.5, 20.0, 3.0).unwrap();
        let (idx, _) = spectrum
            .amplitudes
            .iter()
            .enumerate()
            .fold((0, f64::MIN), |best, (i, &a)| if a > best.1 { (i, a) } else { best });
        assert!((spectrum.frequencies[idx] - 5.0).abs() < 0.2);
        assert_eq!(spectrum.frequencies.len(), spectrum.amplitudes.len());
    }

    #[test]
    fn fas_rejects_band_above_nyquist() {
        let s = sine(SeriesKind::Velocity, 5.0, 0.01, 128);
        assert!(fas(&s, 1.0, 60.0, 3.0).is_err());
        assert!(fas(&s, 10.0, 1.0, 3.0).is_err());
    }

    #[test]
    fn response_spectrum_requires_acceleration() {
        let vel = sine(SeriesKind::Velocity, 1.0, 0.01, 500);
        assert!(matches!(
            response_spectrum(&vel, 0.1, 5.0, 0.05),
            Err(Error::UnsupportedDerivation { .. })
        ));

        let acc = sine(SeriesKind::Acceleration, 1.0, 0.01, 2000);
        let rs = response_spectrum(&acc, 0.1, 5.0, 0.05).unwrap();
        assert_eq!(rs.periods.len(), 20);
        // a very stiff oscillator follows the ground: peak ≈ input peak
        assert!((rs.accelerations[0] - 1.0).abs() < 0.1);
    }
}
