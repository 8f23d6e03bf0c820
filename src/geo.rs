//! Geodetic primitives: validated coordinates and ellipsoidal distance.
//!
//! Distances are measured on the WGS84 ellipsoid with Vincenty's inverse
//! formula, which is what PostGIS uses for `geography` columns. For nearly
//! antipodal points the iteration may not converge; those fall back to a
//! great-circle (haversine) distance on the mean Earth radius.

use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// WGS84 semi-major axis in meters.
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// IUGG mean Earth radius in meters (haversine fallback).
pub const MEAN_EARTH_RADIUS_M: f64 = 6_371_008.8;

const VINCENTY_MAX_ITERATIONS: usize = 200;
const VINCENTY_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// Build a coordinate pair, rejecting non-finite or out-of-range values.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, AppError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(AppError::validation(format!(
                "latitude must be within [-90, 90], got {}",
                latitude
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(AppError::validation(format!(
                "longitude must be within [-180, 180], got {}",
                longitude
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

/// Geodetic distance between two points in meters.
pub fn distance_meters(from: Coordinates, to: Coordinates) -> f64 {
    vincenty_inverse(from, to).unwrap_or_else(|| haversine_meters(from, to))
}

/// Great-circle distance on a sphere of the mean Earth radius.
pub fn haversine_meters(from: Coordinates, to: Coordinates) -> f64 {
    let phi1 = from.latitude.to_radians();
    let phi2 = to.latitude.to_radians();
    let d_phi = (to.latitude - from.latitude).to_radians();
    let d_lambda = (to.longitude - from.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * MEAN_EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Vincenty inverse on WGS84. Returns `None` when the iteration fails to converge.
fn vincenty_inverse(from: Coordinates, to: Coordinates) -> Option<f64> {
    let a = WGS84_A;
    let f = WGS84_F;
    let b = a * (1.0 - f);

    let l = (to.longitude - from.longitude).to_radians();
    let u1 = ((1.0 - f) * from.latitude.to_radians().tan()).atan();
    let u2 = ((1.0 - f) * to.latitude.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    for _ in 0..VINCENTY_MAX_ITERATIONS {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        let sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();
        if sin_sigma == 0.0 {
            // coincident points
            return Some(0.0);
        }
        let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        let sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        // equatorial line: cos²α = 0
        let cos_2sigma_m = if cos_sq_alpha == 0.0 {
            0.0
        } else {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        };
        let c = f / 16.0 * cos_sq_alpha * (4.0 + f * (4.0 - 3.0 * cos_sq_alpha));

        let lambda_prev = lambda;
        lambda = l
            + (1.0 - c)
                * f
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)));

        if (lambda - lambda_prev).abs() < VINCENTY_TOLERANCE {
            let u_sq = cos_sq_alpha * (a * a - b * b) / (b * b);
            let big_a =
                1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
            let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
            let delta_sigma = big_b
                * sin_sigma
                * (cos_2sigma_m
                    + big_b / 4.0
                        * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)
                            - big_b / 6.0
                                * cos_2sigma_m
                                * (-3.0 + 4.0 * sin_sigma * sin_sigma)
                                * (-3.0 + 4.0 * cos_2sigma_m * cos_2sigma_m)));
            return Some(b * big_a * (sigma - delta_sigma));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dms(deg: f64, min: f64, sec: f64) -> f64 {
        deg.signum() * (deg.abs() + min / 60.0 + sec / 3600.0)
    }

    #[test]
    fn test_vincenty_reference_geodesic() {
        // Flinders Peak -> Buninyong, the classic Vincenty test line.
        let flinders = Coordinates::new(dms(-37.0, 57.0, 3.72030), dms(144.0, 25.0, 29.52440)).unwrap();
        let buninyong = Coordinates::new(dms(-37.0, 39.0, 10.15610), dms(143.0, 55.0, 35.38390)).unwrap();
        let d = distance_meters(flinders, buninyong);
        assert!((d - 54_972.271).abs() < 0.01, "got {}", d);
    }

    #[test]
    fn test_equatorial_distance_is_semi_major_arc() {
        let origin = Coordinates::new(0.0, 0.0).unwrap();
        let east = Coordinates::new(0.0, 0.05).unwrap();
        let expected = WGS84_A * 0.05_f64.to_radians();
        assert!((distance_meters(origin, east) - expected).abs() < 1e-3);
    }

    #[test]
    fn test_coincident_points() {
        let p = Coordinates::new(14.5995, 120.9842).unwrap();
        assert_eq!(distance_meters(p, p), 0.0);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let manila = Coordinates::new(14.5995, 120.9842).unwrap();
        let makati = Coordinates::new(14.5547, 121.0244).unwrap();
        let there = distance_meters(manila, makati);
        let back = distance_meters(makati, manila);
        assert!((there - back).abs() < 1e-6);
        // ellipsoid vs sphere stay within half a percent at city scale
        let sphere = haversine_meters(manila, makati);
        assert!((there - sphere).abs() / there < 0.005);
    }

    #[test]
    fn test_near_antipodal_falls_back_to_finite_distance() {
        let a = Coordinates::new(0.0, 0.0).unwrap();
        let b = Coordinates::new(0.5, 179.7).unwrap();
        let d = distance_meters(a, b);
        assert!(d.is_finite());
        assert!(d > 19_000_000.0 && d < 20_100_000.0, "got {}", d);
    }

    #[test]
    fn test_coordinate_validation() {
        assert!(Coordinates::new(90.0, 180.0).is_ok());
        assert!(Coordinates::new(-90.0, -180.0).is_ok());
        assert!(matches!(Coordinates::new(91.0, 0.0), Err(AppError::Validation(_))));
        assert!(matches!(Coordinates::new(0.0, -180.5), Err(AppError::Validation(_))));
        assert!(matches!(Coordinates::new(f64::NAN, 0.0), Err(AppError::Validation(_))));
        assert!(matches!(Coordinates::new(0.0, f64::INFINITY), Err(AppError::Validation(_))));
    }
}
