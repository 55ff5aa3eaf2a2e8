use crate::error::{Error, Result};

use super::model::{Orientation, TimeSeries};

/// Degrees to radians for an azimuth difference.
fn cos_deg(deg: f64) -> f64 {
    deg.to_radians().cos()
}

/// Azimuth normalised into `[0, 360)`.
fn normalize(deg: f64) -> f64 {
    let r = deg.rem_euclid(360.0);
    if r >= 360.0 {
        0.0
    } else {
        r
    }
}

/// Whether two azimuths are perpendicular within `tolerance` degrees.
pub fn orthogonal(a: f64, b: f64, tolerance: f64) -> bool {
    let diff = (b - a).rem_euclid(360.0);
    (diff - 90.0).abs() <= tolerance || (diff - 270.0).abs() <= tolerance
}

/// Rotate a pair of horizontal components so the first points at `target`
/// degrees and the second at `target + 90`.
///
/// Each output is the projection of the ground motion onto its new azimuth:
/// `r(θ) = h1·cos(θ − a1) + h2·cos(θ − a2)`.
pub fn rotate(
    h1: &TimeSeries,
    h2: &TimeSeries,
    target: f64,
    tolerance: f64,
) -> Result<(TimeSeries, TimeSeries)> {
    if !target.is_finite() {
        return Err(Error::invalid_params("rotate", format!("angle must be finite, got {target}")));
    }
    let (a1, a2) = match (h1.orientation(), h2.orientation()) {
        (Orientation::Horizontal { azimuth: a1 }, Orientation::Horizontal { azimuth: a2 }) => (a1, a2),
        _ => {
            return Err(Error::invalid_params(
                "rotate",
                "both components must be horizontal",
            ))
        }
    };
    if !orthogonal(a1, a2, tolerance) {
        return Err(Error::InvalidOrientation {
            h1_azimuth: a1,
            h2_azimuth: a2,
        });
    }
    if h1.len() != h2.len() || h1.delta_t() != h2.delta_t() {
        return Err(Error::IncompatibleSampling {
            operation: "rotate".to_string(),
            reason: format!(
                "{} samples at {}s vs {} samples at {}s",
                h1.len(),
                h1.delta_t(),
                h2.len(),
                h2.delta_t()
            ),
        });
    }
    if h1.kind() != h2.kind() {
        return Err(Error::invalid_params(
            "rotate",
            format!("components have different kinds ({} and {})", h1.kind(), h2.kind()),
        ));
    }

    let first = normalize(target);
    let second = normalize(target + 90.0);
    let project = |theta: f64| -> Vec<f64> {
        let (c1, c2) = (cos_deg(theta - a1), cos_deg(theta - a2));
        h1.samples()
            .iter()
            .zip(h2.samples())
            .map(|(x, y)| x * c1 + y * c2)
            .collect()
    };

    let r1 = h1
        .with_samples(project(first))
        .with_orientation(Orientation::Horizontal { azimuth: first });
    let r2 = h2
        .with_samples(project(second))
        .with_orientation(Orientation::Horizontal { azimuth: second });
    Ok((r1, r2))
}
