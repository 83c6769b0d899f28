//! Duplicate-sighting gate based on distance from the last known position.

use tigerhall_common::Sighting;

use super::geo::distance_km;

/// New sightings closer than this to the previous one are rejected
pub const MIN_SIGHTING_DISTANCE_KM: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Accept,
    Reject { distance_km: f64 },
}

impl Admission {
    pub fn is_accept(&self) -> bool {
        matches!(self, Admission::Accept)
    }
}

/// Decide whether `new` is far enough from `last` to be recorded.
/// A tiger with no prior sighting always passes.
pub fn admit(last: Option<&Sighting>, new: &Sighting) -> Admission {
    let Some(last) = last else {
        return Admission::Accept;
    };

    let distance = distance_km(last.lat, last.lon, new.lat, new.lon);
    tracing::debug!(
        tiger_id = new.tiger_id,
        last_lat = last.lat,
        last_lon = last.lon,
        new_lat = new.lat,
        new_lon = new.lon,
        distance_km = distance,
        "Proximity check"
    );

    if distance < MIN_SIGHTING_DISTANCE_KM {
        Admission::Reject { distance_km: distance }
    } else {
        Admission::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sighting_at(lat: f64, lon: f64) -> Sighting {
        Sighting {
            id: 1,
            user_id: 1,
            tiger_id: 7,
            lat,
            lon,
            timestamp: Utc::now(),
            image_path: "img.jpg".to_string(),
        }
    }

    #[test]
    fn test_no_prior_sighting_always_accepts() {
        for (lat, lon) in [(10.0, 20.0), (-89.0, 179.0), (0.001, -0.001)] {
            assert_eq!(admit(None, &sighting_at(lat, lon)), Admission::Accept);
        }
    }

    #[test]
    fn test_same_point_rejected() {
        let last = sighting_at(10.0, 20.0);
        match admit(Some(&last), &sighting_at(10.0, 20.0)) {
            Admission::Reject { distance_km } => assert_eq!(distance_km, 0.0),
            other => panic!("expected reject, got {:?}", other),
        }
    }

    #[test]
    fn test_just_inside_threshold_rejected() {
        let last = sighting_at(10.0, 20.0);
        assert!(!admit(Some(&last), &sighting_at(10.04, 20.0)).is_accept());
    }

    #[test]
    fn test_far_enough_accepted() {
        let last = sighting_at(10.0, 20.0);
        assert!(admit(Some(&last), &sighting_at(10.05, 20.0)).is_accept());
        assert!(admit(Some(&last), &sighting_at(-10.0, -20.0)).is_accept());
    }
}
