use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "motorhud_bridge".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // HUD link
    #[serde(default = "default_device_name")]
    pub hud_device_name: String,
    #[serde(default = "default_spp_uuid")]
    pub spp_service_uuid: String,

    // Location source (gpsd)
    #[serde(default = "default_gpsd_host")]
    pub gpsd_host: String,
    #[serde(default = "default_gpsd_port")]
    pub gpsd_port: u16,
    /// Seconds to wait for the first fix before giving up.
    #[serde(default = "default_fix_timeout_secs")]
    pub fix_timeout_secs: u64,

    // Sample cadence
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,
    #[serde(default = "default_min_displacement_m")]
    pub min_displacement_m: f64,

    // Mapping service
    #[serde(default = "default_geocode_url")]
    pub geocode_url: String,
    #[serde(default = "default_directions_url")]
    pub directions_url: String,
    #[serde(default)]
    pub maps_api_key: String,
    #[serde(default = "default_travel_mode")]
    pub travel_mode: String,

    // Failure policy
    #[serde(default = "default_write_failure_limit")]
    pub write_failure_limit: u32,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,

    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hud_device_name: default_device_name(),
            spp_service_uuid: default_spp_uuid(),
            gpsd_host: default_gpsd_host(),
            gpsd_port: default_gpsd_port(),
            fix_timeout_secs: default_fix_timeout_secs(),
            update_interval_secs: default_update_interval_secs(),
            min_displacement_m: default_min_displacement_m(),
            geocode_url: default_geocode_url(),
            directions_url: default_directions_url(),
            maps_api_key: String::new(),
            travel_mode: default_travel_mode(),
            write_failure_limit: default_write_failure_limit(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            log_settings: LogSettings::default(),
        }
    }
}

fn default_device_name() -> String {
    "ESP32_HUD".to_string()
}
fn default_spp_uuid() -> String {
    // Well-known Serial Port Profile UUID.
    "00001101-0000-1000-8000-00805f9b34fb".to_string()
}
fn default_gpsd_host() -> String {
    "127.0.0.1".to_string()
}
fn default_gpsd_port() -> u16 {
    2947
}
fn default_fix_timeout_secs() -> u64 {
    30
}
fn default_update_interval_secs() -> u64 {
    5
}
fn default_min_displacement_m() -> f64 {
    5.0
}
fn default_geocode_url() -> String {
    "https://maps.googleapis.com/maps/api/geocode/json".to_string()
}
fn default_directions_url() -> String {
    "https://maps.googleapis.com/maps/api/directions/json".to_string()
}
fn default_travel_mode() -> String {
    "driving".to_string()
}
fn default_write_failure_limit() -> u32 {
    2
}
fn default_retry_max_attempts() -> u32 {
    3
}
fn default_retry_initial_delay_ms() -> u64 {
    500
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();

        let service = Self {
            settings,
            settings_path,
        };
        if !service.settings_path.exists() {
            // First run: write a template the user can put the API key into.
            service.save()?;
        }
        Ok(service)
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("MotorHudBridge");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &PathBuf) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_hud_contract() {
        let s = Settings::default();
        assert_eq!(s.hud_device_name, "ESP32_HUD");
        assert_eq!(s.spp_service_uuid, "00001101-0000-1000-8000-00805f9b34fb");
        assert_eq!(s.update_interval_secs, 5);
        assert_eq!(s.min_displacement_m, 5.0);
        assert_eq!(s.write_failure_limit, 2);
    }

    #[test]
    fn test_partial_settings_fill_in_defaults() {
        let s: Settings = serde_json::from_str(r#"{"maps_api_key":"abc"}"#).unwrap();
        assert_eq!(s.maps_api_key, "abc");
        assert_eq!(s.gpsd_port, 2947);
        assert_eq!(s.travel_mode, "driving");
        assert_eq!(s.log_settings.level, "info");
    }
}
