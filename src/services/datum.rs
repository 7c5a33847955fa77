// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! GCJ-02 to WGS-84 datum conversion.
//!
//! The NIU API reports positions in GCJ-02, the obfuscated datum used by
//! mainland-China map providers. Traccar expects WGS-84. The forward
//! distortion has no closed-form inverse, so [`gcj_to_wgs`] inverts it
//! by fixed-point iteration.

use std::f64::consts::PI;

/// Krasovsky 1940 semi-major axis used by the GCJ-02 distortion.
const SEMI_MAJOR_AXIS: f64 = 6_378_245.0;
/// Krasovsky 1940 first eccentricity squared.
const ECCENTRICITY_SQ: f64 = 0.006_693_421_622_965_943_23;

/// Residual (degrees) below which the inverse is considered converged.
pub const CONVERGENCE_TOLERANCE: f64 = 1e-7;
/// Iteration budget for the inverse.
pub const MAX_ITERATIONS: usize = 10;

/// Returns true outside the region where GCJ-02 differs from WGS-84.
pub fn out_of_china(lat: f64, lon: f64) -> bool {
    !(0.8293 < lat && lat < 55.8271 && 72.004 < lon && lon < 137.8347)
}

fn transform_lat(x: f64, y: f64) -> f64 {
    let mut ret = -100.0 + 2.0 * x + 3.0 * y + 0.2 * y * y + 0.1 * x * y + 0.2 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (y * PI).sin() + 40.0 * (y / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (160.0 * (y / 12.0 * PI).sin() + 320.0 * (y * PI / 30.0).sin()) * 2.0 / 3.0;
    ret
}

fn transform_lon(x: f64, y: f64) -> f64 {
    let mut ret = 300.0 + x + 2.0 * y + 0.1 * x * x + 0.1 * x * y + 0.1 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (x * PI).sin() + 40.0 * (x / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (150.0 * (x / 12.0 * PI).sin() + 300.0 * (x / 30.0 * PI).sin()) * 2.0 / 3.0;
    ret
}

/// Offset (degrees) that GCJ-02 adds to a WGS-84 point.
fn offset(lat: f64, lon: f64) -> (f64, f64) {
    let d_lat = transform_lat(lon - 105.0, lat - 35.0);
    let d_lon = transform_lon(lon - 105.0, lat - 35.0);

    let rad_lat = lat / 180.0 * PI;
    let magic = 1.0 - ECCENTRICITY_SQ * rad_lat.sin().powi(2);
    let sqrt_magic = magic.sqrt();

    let d_lat = (d_lat * 180.0)
        / ((SEMI_MAJOR_AXIS * (1.0 - ECCENTRICITY_SQ)) / (magic * sqrt_magic) * PI);
    let d_lon = (d_lon * 180.0) / (SEMI_MAJOR_AXIS / sqrt_magic * rad_lat.cos() * PI);
    (d_lat, d_lon)
}

/// Forward WGS-84 to GCJ-02 distortion.
pub fn wgs_to_gcj(lat: f64, lon: f64) -> (f64, f64) {
    if out_of_china(lat, lon) {
        return (lat, lon);
    }
    let (d_lat, d_lon) = offset(lat, lon);
    (lat + d_lat, lon + d_lon)
}

/// Inverse GCJ-02 to WGS-84 conversion.
///
/// Starts from the GCJ point and repeatedly corrects the estimate by
/// the residual of the forward transform. Stops once both residuals are
/// below [`CONVERGENCE_TOLERANCE`] or after [`MAX_ITERATIONS`]; the best
/// estimate is returned either way.
pub fn gcj_to_wgs(lat_gcj: f64, lon_gcj: f64) -> (f64, f64) {
    gcj_to_wgs_counted(lat_gcj, lon_gcj).0
}

/// [`gcj_to_wgs`] that also reports how many iterations it ran.
pub fn gcj_to_wgs_counted(lat_gcj: f64, lon_gcj: f64) -> ((f64, f64), usize) {
    if out_of_china(lat_gcj, lon_gcj) {
        return ((lat_gcj, lon_gcj), 0);
    }

    let (mut lat, mut lon) = (lat_gcj, lon_gcj);
    let mut iterations = 0;
    while iterations < MAX_ITERATIONS {
        iterations += 1;
        let (est_lat, est_lon) = wgs_to_gcj(lat, lon);
        let d_lat = lat_gcj - est_lat;
        let d_lon = lon_gcj - est_lon;
        lat += d_lat;
        lon += d_lon;
        if d_lat.abs() < CONVERGENCE_TOLERANCE && d_lon.abs() < CONVERGENCE_TOLERANCE {
            break;
        }
    }
    ((lat, lon), iterations)
}
