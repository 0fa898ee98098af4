//! Error taxonomy for the bridge.
//!
//! Per-tick failures (`ResolveError`, `WriteFailed`) are handled at the tick
//! boundary by the navigation loop; session-level failures (`DeviceNotPaired`,
//! `ConnectionFailed`, geocode errors) abort session start and are surfaced
//! as user-visible status messages.

use thiserror::Error;

/// Failures of the Bluetooth link to the HUD.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("no bonded device named \"{0}\"")]
    DeviceNotPaired(String),

    #[error("bluetooth connection failed: {0}")]
    ConnectionFailed(String),

    #[error("write to HUD failed: {0}")]
    WriteFailed(#[source] std::io::Error),

    #[error("invalid service uuid \"{0}\"")]
    InvalidUuid(String),
}

impl From<bluer::Error> for LinkError {
    fn from(err: bluer::Error) -> Self {
        LinkError::ConnectionFailed(err.to_string())
    }
}

/// Failures of the mapping service (geocode and directions).
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The service answered but found nothing for the query.
    #[error("no results")]
    NoResults,

    /// Non-OK service status or HTTP transport failure.
    #[error("mapping service error: {0}")]
    ServiceError(String),

    /// The response did not have the expected JSON shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl From<reqwest::Error> for ResolveError {
    fn from(err: reqwest::Error) -> Self {
        ResolveError::ServiceError(err.to_string())
    }
}

impl ResolveError {
    /// Transport-level failures are worth a bounded retry; the rest are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, ResolveError::ServiceError(_))
    }
}

/// Failures of the location source.
#[derive(Debug, Error)]
pub enum LocationError {
    #[error("location unavailable: {0}")]
    Unavailable(String),

    #[error("gpsd connection error: {0}")]
    Io(#[from] std::io::Error),
}
