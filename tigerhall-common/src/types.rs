use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inbound sighting descriptor as posted by a client.
///
/// Every field is optional on the wire; missing values decode to their
/// "unset" form (zero / `None`) and are reported by the validator instead of
/// the JSON decoder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SightingReport {
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub tiger_id: i64,
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lon: f64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// One recorded observation of a tiger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    /// Assigned by storage, 0 until persisted
    pub id: i64,
    pub user_id: i64,
    pub tiger_id: i64,
    pub lat: f64,
    pub lon: f64,
    pub timestamp: DateTime<Utc>,
    /// Opaque reference returned by the image store
    pub image_path: String,
}

/// Denormalized last-known position of a tiger
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TigerLastSeen {
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
}

/// Fan-out unit: one tiger, every observer that should hear about it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub tiger_id: i64,
    pub observer_ids: Vec<i64>,
}

/// Machine-readable error codes returned to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidTimestamp,
    InvalidLatitude,
    InvalidLongitude,
    InvalidUserId,
    InvalidTigerId,
    TooCloseToPreviousSighting,
    InvalidRequest,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidTimestamp => "INVALID_TIMESTAMP",
            ErrorCode::InvalidLatitude => "INVALID_LATITUDE",
            ErrorCode::InvalidLongitude => "INVALID_LONGITUDE",
            ErrorCode::InvalidUserId => "INVALID_USER_ID",
            ErrorCode::InvalidTigerId => "INVALID_TIGER_ID",
            ErrorCode::TooCloseToPreviousSighting => "TOO_CLOSE_TO_PREVIOUS_SIGHTING",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ErrorCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INVALID_TIMESTAMP" => Ok(ErrorCode::InvalidTimestamp),
            "INVALID_LATITUDE" => Ok(ErrorCode::InvalidLatitude),
            "INVALID_LONGITUDE" => Ok(ErrorCode::InvalidLongitude),
            "INVALID_USER_ID" => Ok(ErrorCode::InvalidUserId),
            "INVALID_TIGER_ID" => Ok(ErrorCode::InvalidTigerId),
            "TOO_CLOSE_TO_PREVIOUS_SIGHTING" => Ok(ErrorCode::TooCloseToPreviousSighting),
            "INVALID_REQUEST" => Ok(ErrorCode::InvalidRequest),
            "INTERNAL_ERROR" => Ok(ErrorCode::InternalError),
            _ => Err(format!("Unknown error code: {}", s)),
        }
    }
}

/// JSON body for every non-2xx response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
