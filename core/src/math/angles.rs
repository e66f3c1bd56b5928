/// Wraps an angle or angle difference into [-180, 180].
pub fn wrap_deg(angle: f64) -> f64 {
    if (-180.0..=180.0).contains(&angle) {
        angle
    } else {
        (angle + 180.0).rem_euclid(360.0) - 180.0
    }
}

pub fn normalize_deg(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

pub fn diff_deg(from: f64, to: f64) -> f64 {
    wrap_deg(to - from)
}

/// Position of `t` inside `[t0, t1]`. A degenerate span resolves to the
/// later endpoint so the result is never NaN.
pub fn time_fraction(t: f64, t0: f64, t1: f64) -> f64 {
    let span = t1 - t0;
    if span > 0.0 && span.is_finite() {
        (t - t0) / span
    } else {
        1.0
    }
}

/// Interpolates along the shortest path from `prev` to `latest`. The delta
/// is wrapped before scaling, the result wrapped again.
pub fn interpolate_deg(prev: f64, latest: f64, fraction: f64) -> f64 {
    wrap_deg(prev + diff_deg(prev, latest) * fraction)
}
