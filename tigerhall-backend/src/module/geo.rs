//! Great-circle distance on a spherical Earth.

/// Mean Earth radius used by the haversine formula
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance in kilometres between two (lat, lon) points in degrees.
///
/// Inputs are not range-checked; out-of-range coordinates still produce a
/// defined (if meaningless) distance. Validation happens before this is called.
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_point_is_zero() {
        for (lat, lon) in [(10.0, 20.0), (-33.86, 151.21), (89.9, -179.9), (-45.0, 0.5)] {
            assert_eq!(distance_km(lat, lon, lat, lon), 0.0);
        }
    }

    #[test]
    fn test_symmetric() {
        let pairs = [
            ((10.0, 20.0), (10.05, 20.0)),
            ((51.5074, -0.1278), (48.8566, 2.3522)),
            ((-33.86, 151.21), (35.68, 139.69)),
        ];
        for ((a_lat, a_lon), (b_lat, b_lon)) in pairs {
            let ab = distance_km(a_lat, a_lon, b_lat, b_lon);
            let ba = distance_km(b_lat, b_lon, a_lat, a_lon);
            assert!((ab - ba).abs() < 1e-9, "{} != {}", ab, ba);
        }
    }

    #[test]
    fn test_known_distances() {
        // 0.05 degrees of latitude
        let d = distance_km(10.0, 20.0, 10.05, 20.0);
        assert!((d - 5.56).abs() < 0.01, "got {}", d);

        // London -> Paris, roughly 344 km
        let d = distance_km(51.5074, -0.1278, 48.8566, 2.3522);
        assert!((d - 343.5).abs() < 1.0, "got {}", d);
    }

    #[test]
    fn test_out_of_range_inputs_still_defined() {
        let d = distance_km(120.0, 400.0, -95.0, -200.0);
        assert!(d.is_finite());
        assert!(d >= 0.0);
    }
}
