//! Geographic coordinate type and geodesic distance.
//!
//! `GeoPoint` uses `f64` longitude (`x`) / latitude (`y`) in degrees.  Sailing
//! legs are computed from the ellipsoidal (WGS-84) inverse geodesic so that
//! travel times agree with nautical charts to well under a metre.

/// WGS-84 semi-major axis, metres.
const WGS84_A: f64 = 6_378_137.0;
/// WGS-84 flattening.
const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// Mean Earth radius for the spherical fallback, metres.
const MEAN_RADIUS_M: f64 = 6_371_008.8;

const MAX_ITERATIONS: usize = 200;
const CONVERGENCE: f64 = 1e-12;

/// A WGS-84 coordinate: `x` is longitude, `y` is latitude (degrees).
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GeoPoint {
    pub x: f64,
    pub y: f64,
}

impl GeoPoint {
    #[inline]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Ellipsoidal distance to `other` in metres.
    #[inline]
    pub fn distance_m(self, other: GeoPoint) -> f64 {
        inverse_distance_m(self.x, self.y, other.x, other.y)
    }

    /// `true` when `other` lies within `tolerance_m` metres.
    #[inline]
    pub fn is_within(self, other: GeoPoint, tolerance_m: f64) -> bool {
        self.distance_m(other) <= tolerance_m
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "POINT ({:.6} {:.6})", self.x, self.y)
    }
}

/// Inverse geodesic problem on the WGS-84 ellipsoid (Vincenty).
///
/// Arguments are longitude/latitude pairs in degrees; the result is the
/// distance in metres.  Nearly antipodal pairs, where the iteration does not
/// converge, fall back to the great-circle distance on the mean sphere.
pub fn inverse_distance_m(x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
    let b = (1.0 - WGS84_F) * WGS84_A;

    let l = (x2 - x1).to_radians();
    let u1 = ((1.0 - WGS84_F) * y1.to_radians().tan()).atan();
    let u2 = ((1.0 - WGS84_F) * y2.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    let mut converged = false;

    let (mut sin_sigma, mut cos_sigma, mut sigma) = (0.0, 0.0, 0.0);
    let (mut cos_sq_alpha, mut cos_2sigma_m) = (0.0, 0.0);

    for _ in 0..MAX_ITERATIONS {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        let t1 = cos_u2 * sin_lambda;
        let t2 = cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda;
        sin_sigma = (t1 * t1 + t2 * t2).sqrt();
        if sin_sigma == 0.0 {
            return 0.0; // coincident points
        }
        cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        sigma = sin_sigma.atan2(cos_sigma);

        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        cos_2sigma_m = if cos_sq_alpha != 0.0 {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        } else {
            0.0 // equatorial line
        };

        let c = WGS84_F / 16.0 * cos_sq_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos_sq_alpha));
        let previous = lambda;
        lambda = l
            + (1.0 - c)
                * WGS84_F
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)));

        if (lambda - previous).abs() < CONVERGENCE {
            converged = true;
            break;
        }
    }

    if !converged {
        return haversine_m(x1, y1, x2, y2);
    }

    let u_sq = cos_sq_alpha * (WGS84_A * WGS84_A - b * b) / (b * b);
    let big_a = 1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
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

    b * big_a * (sigma - delta_sigma)
}

fn haversine_m(x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
    let d_lat = (y2 - y1).to_radians();
    let d_lon = (x2 - x1).to_radians();
    let a = (d_lat * 0.5).sin().powi(2)
        + y1.to_radians().cos() * y2.to_radians().cos() * (d_lon * 0.5).sin().powi(2);
    2.0 * MEAN_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}
