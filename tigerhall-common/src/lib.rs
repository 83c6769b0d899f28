//! Types shared between the sighting service and its clients.

mod types;

pub use types::{
    ErrorCode, ErrorResponse, NotificationMessage, Sighting, SightingReport, TigerLastSeen,
};
