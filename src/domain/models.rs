use std::time::SystemTime;

/// Mean Earth radius in meters, used for great-circle distance.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A single GPS fix. Immutable once emitted by the location source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    /// Time the fix was acquired (receive time of the gpsd report).
    pub timestamp: SystemTime,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp: SystemTime::now(),
        }
    }

    /// Great-circle distance to another position in meters (haversine).
    pub fn displacement_m(&self, other: &Position) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_M * c
    }
}

/// A resolved destination. Snapshotted into the session context once per
/// navigation session; never shared as process-wide mutable state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.latitude, self.longitude)
    }
}

/// The next maneuver for the current route. Transient, not cached
/// across ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationInstruction {
    /// Distance-to-maneuver text as reported by the mapping service,
    /// e.g. "0.1 mi".
    pub distance: String,
    /// Maneuver description, already reduced to plain text.
    pub instruction: String,
}

impl NavigationInstruction {
    /// The exact payload sent to the HUD (without the trailing newline).
    pub fn line(&self) -> String {
        format!("{} {}", self.distance, self.instruction)
    }
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    LinkStatus(LinkStatus),
    RouteStatus(StatusMessage),
    /// Line most recently written to the HUD.
    InstructionSent(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>, severity: MessageSeverity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
