//! gpsd location source
//!
//! Connects to the local gpsd socket, enables JSON watch mode, and turns TPV
//! reports into `Position` samples. The subscription applies the session
//! cadence (5 s period or 5 m displacement) before samples reach the
//! navigation loop.

use crate::domain::models::Position;
use crate::domain::settings::Settings;
use crate::error::LocationError;
use serde::Deserialize;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";

#[derive(Debug, Clone)]
pub struct GpsdConfig {
    pub host: String,
    pub port: u16,
    pub fix_timeout: Duration,
    pub min_interval: Duration,
    pub min_displacement_m: f64,
}

impl GpsdConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            host: settings.gpsd_host.clone(),
            port: settings.gpsd_port,
            fix_timeout: Duration::from_secs(settings.fix_timeout_secs),
            min_interval: Duration::from_secs(settings.update_interval_secs),
            min_displacement_m: settings.min_displacement_m,
        }
    }
}

pub struct GpsdSource {
    config: GpsdConfig,
}

impl GpsdSource {
    pub fn new(config: GpsdConfig) -> Self {
        Self { config }
    }

    /// One-shot fix: first usable TPV report, bounded by the fix timeout.
    pub async fn current_position(&self) -> Result<Position, LocationError> {
        let mut reader = self.open().await?;
        let deadline = tokio::time::sleep(self.config.fix_timeout);
        tokio::pin!(deadline);

        let mut line = String::new();
        loop {
            line.clear();
            tokio::select! {
                _ = &mut deadline => {
                    return Err(LocationError::Unavailable(format!(
                        "no fix within {:?}", self.config.fix_timeout
                    )));
                }
                read = reader.read_line(&mut line) => {
                    if read? == 0 {
                        return Err(LocationError::Unavailable(
                            "gpsd closed the connection".to_string(),
                        ));
                    }
                    if let Some(position) = parse_tpv(&line) {
                        return Ok(position);
                    }
                }
            }
        }
    }

    /// Stream filtered samples into `tx` until gpsd disconnects or the
    /// receiver is dropped. Run as a background task owned by the session.
    pub async fn stream(self, tx: mpsc::UnboundedSender<Position>) -> Result<(), LocationError> {
        let mut reader = self.open().await?;
        let mut filter = SampleFilter::new(self.config.min_interval, self.config.min_displacement_m);

        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                warn!("gpsd closed the connection, position stream ended");
                return Ok(());
            }
            let Some(position) = parse_tpv(&line) else {
                continue;
            };
            if !filter.admit(&position) {
                debug!("sample suppressed by cadence filter");
                continue;
            }
            if tx.send(position).is_err() {
                // Session ended; stop consuming fixes.
                return Ok(());
            }
        }
    }

    async fn open(&self) -> Result<BufReader<TcpStream>, LocationError> {
        let endpoint = format!("{}:{}", self.config.host, self.config.port);
        let mut stream = TcpStream::connect(&endpoint).await?;
        stream.write_all(WATCH_COMMAND).await?;
        info!("connected to gpsd at {endpoint}");
        Ok(BufReader::new(stream))
    }
}

/// Admits the first sample, then any sample at least `min_interval` after or
/// `min_displacement_m` away from the last admitted one.
pub struct SampleFilter {
    min_interval: Duration,
    min_displacement_m: f64,
    last_admitted: Option<Position>,
}

impl SampleFilter {
    pub fn new(min_interval: Duration, min_displacement_m: f64) -> Self {
        Self {
            min_interval,
            min_displacement_m,
            last_admitted: None,
        }
    }

    pub fn admit(&mut self, sample: &Position) -> bool {
        let admitted = match &self.last_admitted {
            None => true,
            Some(last) => {
                let elapsed = sample
                    .timestamp
                    .duration_since(last.timestamp)
                    .unwrap_or(Duration::ZERO);
                elapsed >= self.min_interval
                    || last.displacement_m(sample) >= self.min_displacement_m
            }
        };
        if admitted {
            self.last_admitted = Some(*sample);
        }
        admitted
    }
}

#[derive(Debug, Deserialize)]
struct TpvReport {
    class: String,
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
}

/// Parse one gpsd JSON line. Returns a position only for TPV reports with a
/// 2D fix or better; VERSION/DEVICES/WATCH and fixless TPVs yield `None`.
fn parse_tpv(line: &str) -> Option<Position> {
    let report: TpvReport = serde_json::from_str(line).ok()?;
    if report.class != "TPV" || report.mode < 2 {
        return None;
    }
    Some(Position::new(report.lat?, report.lon?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn sample_at(lat: f64, lon: f64, offset: Duration) -> Position {
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        Position {
            latitude: lat,
            longitude: lon,
            timestamp: base + offset,
        }
    }

    #[test]
    fn test_parse_tpv_with_fix() {
        let line = r#"{"class":"TPV","device":"/dev/ttyACM0","mode":3,"time":"2026-08-30T12:00:00.000Z","lat":37.4219,"lon":-122.0847,"alt":12.0,"speed":3.2}"#;
        let pos = parse_tpv(line).unwrap();
        assert!((pos.latitude - 37.4219).abs() < 1e-9);
        assert!((pos.longitude + 122.0847).abs() < 1e-9);
    }

    #[test]
    fn test_parse_tpv_without_fix() {
        assert!(parse_tpv(r#"{"class":"TPV","mode":1}"#).is_none());
        assert!(parse_tpv(r#"{"class":"TPV","mode":3,"lat":37.0}"#).is_none());
    }

    #[test]
    fn test_parse_ignores_other_classes() {
        assert!(parse_tpv(r#"{"class":"VERSION","release":"3.25"}"#).is_none());
        assert!(parse_tpv(r#"{"class":"WATCH","enable":true,"json":true}"#).is_none());
        assert!(parse_tpv("garbage").is_none());
    }

    #[test]
    fn test_filter_admits_first_sample() {
        let mut filter = SampleFilter::new(Duration::from_secs(5), 5.0);
        assert!(filter.admit(&sample_at(37.0, -122.0, Duration::ZERO)));
    }

    #[test]
    fn test_filter_suppresses_nearby_recent_sample() {
        let mut filter = SampleFilter::new(Duration::from_secs(5), 5.0);
        assert!(filter.admit(&sample_at(37.0, -122.0, Duration::ZERO)));
        // 1 s later, ~1 m away: neither threshold reached.
        assert!(!filter.admit(&sample_at(37.000009, -122.0, Duration::from_secs(1))));
    }

    #[test]
    fn test_filter_admits_after_interval() {
        let mut filter = SampleFilter::new(Duration::from_secs(5), 5.0);
        assert!(filter.admit(&sample_at(37.0, -122.0, Duration::ZERO)));
        assert!(filter.admit(&sample_at(37.0, -122.0, Duration::from_secs(5))));
    }

    #[test]
    fn test_filter_admits_after_displacement() {
        let mut filter = SampleFilter::new(Duration::from_secs(5), 5.0);
        assert!(filter.admit(&sample_at(37.0, -122.0, Duration::ZERO)));
        // 1 s later but ~11 m north.
        assert!(filter.admit(&sample_at(37.0001, -122.0, Duration::from_secs(1))));
    }

    #[test]
    fn test_filter_measures_from_last_admitted() {
        let mut filter = SampleFilter::new(Duration::from_secs(5), 5.0);
        assert!(filter.admit(&sample_at(37.0, -122.0, Duration::ZERO)));
        // Two suppressed creeps of ~2 m each...
        assert!(!filter.admit(&sample_at(37.00002, -122.0, Duration::from_secs(1))));
        assert!(!filter.admit(&sample_at(37.00004, -122.0, Duration::from_secs(2))));
        // ...accumulate past 5 m relative to the last admitted sample.
        assert!(filter.admit(&sample_at(37.00006, -122.0, Duration::from_secs(3))));
    }
}
