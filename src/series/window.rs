use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

use super::model::TimeSeries;

/// Kaiser shape parameter used for every taper.
const KAISER_BETA: f64 = 14.0;

/// Which edge(s) of a series an edge operation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Front,
    End,
    All,
}

impl FromStr for Edge {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "front" => Ok(Edge::Front),
            "end" => Ok(Edge::End),
            "all" => Ok(Edge::All),
            other => Err(format!("unknown edge flag '{other}' (expected front, end or all)")),
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Edge::Front => "front",
            Edge::End => "end",
            Edge::All => "all",
        })
    }
}

/// Zeroth-order modified Bessel function of the first kind (power series).
fn bessel_i0(x: f64) -> f64 {
    let half = x / 2.0;
    let mut term = 1.0;
    let mut sum = 1.0;
    for k in 1..200 {
        let f = half / k as f64;
        term *= f * f;
        sum += term;
        if term < sum * 1e-17 {
            break;
        }
    }
    sum
}

/// Symmetric Kaiser window of `len` points.
fn kaiser(len: usize, beta: f64) -> Vec<f64> {
    if len == 1 {
        return vec![1.0];
    }
    let denom = bessel_i0(beta);
    let m = (len - 1) as f64;
    (0..len)
        .map(|i| {
            let r = 2.0 * i as f64 / m - 1.0;
            bessel_i0(beta * (1.0 - r * r).max(0.0).sqrt()) / denom
        })
        .collect()
}

/// Multiplicative window over `n` samples tapering `m` samples at `edge`.
fn taper_window(edge: Edge, m: usize, n: usize) -> Vec<f64> {
    let full = kaiser(2 * m + 1, KAISER_BETA);
    let mut window = vec![1.0; n];
    if matches!(edge, Edge::Front | Edge::All) {
        window[..m].copy_from_slice(&full[..m]);
    }
    if matches!(edge, Edge::End | Edge::All) {
        window[n - m..].copy_from_slice(&full[m + 1..]);
    }
    window
}

/// Upper bound on the samples a cut or zero pad may span.
const MAX_EDGE_SAMPLES: usize = 1 << 24;

fn samples_for(operation: &str, seconds: f64, series: &TimeSeries) -> Result<usize> {
    if !(seconds.is_finite() && seconds >= 0.0) {
        return Err(Error::invalid_params(
            operation,
            format!("seconds must be a non-negative number, got {seconds}"),
        ));
    }
    let count = (seconds / series.delta_t() + 1e-9).floor();
    if count > MAX_EDGE_SAMPLES as f64 {
        return Err(Error::invalid_params(
            operation,
            format!(
                "{seconds} s is {count} samples at dt={}, limit is {MAX_EDGE_SAMPLES}",
                series.delta_t()
            ),
        ));
    }
    Ok(count as usize)
}

/// Apply a Kaiser taper over `m` samples at `edge`.
pub fn taper(series: &TimeSeries, edge: Edge, m: usize) -> Result<TimeSeries> {
    if m == 0 {
        return Ok(series.clone());
    }
    let needed = if edge == Edge::All { 2 * m } else { m };
    if needed > series.len() {
        return Err(Error::invalid_params(
            "taper",
            format!("{needed} taper samples exceed series length {}", series.len()),
        ));
    }
    let window = taper_window(edge, m, series.len());
    Ok(series.with_samples(
        series.samples().iter().zip(&window).map(|(v, w)| v * w).collect(),
    ))
}

/// Drop `seconds` of data at `edge`, then taper `m` samples at the new edge.
pub fn cut(series: &TimeSeries, edge: Edge, seconds: f64, m: usize) -> Result<TimeSeries> {
    if edge == Edge::All {
        return Err(Error::invalid_params("cut", "edge must be front or end"));
    }
    let num = samples_for("cut", seconds, series)?;
    if num == 0 {
        return Ok(series.clone());
    }
    if num >= series.len() {
        return Err(Error::invalid_params(
            "cut",
            format!("cutting {num} samples leaves nothing of {}", series.len()),
        ));
    }
    let n = series.len();
    let trimmed = match edge {
        Edge::Front => series
            .with_samples(series.samples()[num..].to_vec())
            .with_start_time(series.time_at(num)),
        _ => series.with_samples(series.samples()[..n - num].to_vec()),
    };
    taper(&trimmed, edge, m)
}

/// Taper `m` samples at `edge`, then append `seconds` of zeros there.
pub fn zero_pad(series: &TimeSeries, edge: Edge, seconds: f64, m: usize) -> Result<TimeSeries> {
    if edge == Edge::All {
        return Err(Error::invalid_params("zero_pad", "edge must be front or end"));
    }
    let num = samples_for("zero_pad", seconds, series)?;
    let tapered = taper(series, edge, m)?;
    let zeros = std::iter::repeat(0.0).take(num);
    Ok(match edge {
        Edge::Front => tapered
            .with_samples(zeros.chain(tapered.samples().iter().copied()).collect())
            .with_start_time(series.start_time() - num as f64 * series.delta_t()),
        _ => tapered.with_samples(tapered.samples().iter().copied().chain(zeros).collect()),
    })
}
