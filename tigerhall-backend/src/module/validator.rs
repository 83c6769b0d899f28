//! Structural checks on an inbound sighting report.
//!
//! Rules run in a fixed order and the first violation wins; a report with
//! several problems has to be resubmitted once per problem.

use chrono::{DateTime, Utc};
use tigerhall_common::{ErrorCode, Sighting, SightingReport};

/// Seconds from 0001-01-01T00:00:00Z to the Unix epoch. Clients that leave a
/// timestamp unset commonly send that instant instead of omitting the field.
const ZERO_TIME_UNIX_SECONDS: i64 = -62_135_596_800;

/// First rule a report violated
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ValidationError {
    pub code: ErrorCode,
    pub message: String,
}

impl ValidationError {
    fn new(code: ErrorCode, message: &str) -> Self {
        Self {
            code,
            message: message.to_string(),
        }
    }
}

fn is_zero_time(timestamp: &DateTime<Utc>) -> bool {
    timestamp.timestamp() == ZERO_TIME_UNIX_SECONDS && timestamp.timestamp_subsec_nanos() == 0
}

/// Zero means "unset" for coordinates, so it is rejected along with
/// out-of-range values. NaN fails the range check.
fn coordinate_ok(value: f64, bound: f64) -> bool {
    (-bound..=bound).contains(&value) && value != 0.0
}

/// Validate a report and turn it into an unpersisted [`Sighting`]
/// (`id` 0, empty `image_path`).
pub fn validate(report: &SightingReport) -> Result<Sighting, ValidationError> {
    let Some(timestamp) = report.timestamp.filter(|ts| !is_zero_time(ts)) else {
        return Err(ValidationError::new(
            ErrorCode::InvalidTimestamp,
            "Timestamp is required and must be a valid date.",
        ));
    };

    if !coordinate_ok(report.lat, 90.0) {
        return Err(ValidationError::new(
            ErrorCode::InvalidLatitude,
            "Latitude must be between -90 and 90 and not zero.",
        ));
    }

    if !coordinate_ok(report.lon, 180.0) {
        return Err(ValidationError::new(
            ErrorCode::InvalidLongitude,
            "Longitude must be between -180 and 180 and not zero.",
        ));
    }

    if report.user_id <= 0 {
        return Err(ValidationError::new(ErrorCode::InvalidUserId, "UserID is invalid."));
    }

    if report.tiger_id <= 0 {
        return Err(ValidationError::new(ErrorCode::InvalidTigerId, "TigerID is invalid."));
    }

    Ok(Sighting {
        id: 0,
        user_id: report.user_id,
        tiger_id: report.tiger_id,
        lat: report.lat,
        lon: report.lon,
        timestamp,
        image_path: String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn valid_report() -> SightingReport {
        SightingReport {
            user_id: 1,
            tiger_id: 1,
            lat: 10.0,
            lon: 20.0,
            timestamp: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
        }
    }

    fn code_of(report: &SightingReport) -> Option<ErrorCode> {
        validate(report).err().map(|e| e.code)
    }

    #[test]
    fn test_valid_report_becomes_sighting() {
        let sighting = validate(&valid_report()).unwrap();
        assert_eq!(sighting.id, 0);
        assert_eq!(sighting.user_id, 1);
        assert_eq!(sighting.tiger_id, 1);
        assert_eq!(sighting.lat, 10.0);
        assert!(sighting.image_path.is_empty());
    }

    #[test]
    fn test_single_invalid_field() {
        let mut r = valid_report();
        r.timestamp = None;
        assert_eq!(code_of(&r), Some(ErrorCode::InvalidTimestamp));

        r.timestamp = Some(Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(code_of(&r), Some(ErrorCode::InvalidTimestamp));

        for lat in [0.0, 90.5, -91.0, f64::NAN] {
            let mut r = valid_report();
            r.lat = lat;
            assert_eq!(code_of(&r), Some(ErrorCode::InvalidLatitude), "lat {}", lat);
        }

        for lon in [0.0, 180.01, -181.0] {
            let mut r = valid_report();
            r.lon = lon;
            assert_eq!(code_of(&r), Some(ErrorCode::InvalidLongitude), "lon {}", lon);
        }

        for user_id in [0, -4] {
            let mut r = valid_report();
            r.user_id = user_id;
            assert_eq!(code_of(&r), Some(ErrorCode::InvalidUserId));
        }

        for tiger_id in [0, -1] {
            let mut r = valid_report();
            r.tiger_id = tiger_id;
            assert_eq!(code_of(&r), Some(ErrorCode::InvalidTigerId));
        }
    }

    #[test]
    fn test_zero_time_on_the_wire_is_rejected() {
        let report: SightingReport = serde_json::from_str(
            r#"{"user_id":1,"tiger_id":2,"lat":10.5,"lon":20.25,"timestamp":"0001-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        let err = validate(&report).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidTimestamp);

        // one second later is a real, if unlikely, instant
        let mut r = valid_report();
        r.timestamp = Some(Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 1).unwrap());
        assert!(validate(&r).is_ok());
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        let mut r = valid_report();
        r.lat = -90.0;
        r.lon = 180.0;
        assert!(validate(&r).is_ok());
    }

    #[test]
    fn test_first_violation_wins() {
        let everything_wrong = SightingReport::default();
        assert_eq!(code_of(&everything_wrong), Some(ErrorCode::InvalidTimestamp));

        let mut r = valid_report();
        r.lon = 0.0;
        r.user_id = 0;
        r.tiger_id = 0;
        assert_eq!(code_of(&r), Some(ErrorCode::InvalidLongitude));

        r.lon = 20.0;
        assert_eq!(code_of(&r), Some(ErrorCode::InvalidUserId));
    }
}
