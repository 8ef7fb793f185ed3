//! `devices.json`/`config.json` loading. Mirrors the load-then-validate
//! pattern `cli::Source::from_str` uses for CLI sources, but for JSON
//! config: deserialize with `serde_json`, then check cross-references
//! (observer names) that serde can't express.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("device {device:?} lists unknown observer {observer:?}")]
    UnknownObserver { device: String, observer: String },
}

// Variant names double as the wire values of `devices.json`'s `type`
// field, so they keep the shared `Device` suffix clippy would rather drop.
#[allow(clippy::enum_variant_names)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    NMEADevice,
    SeatalkDevice,
    SetTimeDevice,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DeviceIoConfig {
    TCPServer { port: u16 },
    TCPClient { host: String, port: u16 },
    File { path: String },
    FileRewriter { path: String },
    Serial { port: String, baud: Option<u32> },
    SeatalkSerial { port: String },
    StdOutPrinter,
    /// `SetTimeDevice` has no real transport.
    IO,
}

fn default_auto_flush() -> u32 {
    0
}

fn default_max_item_age() -> u32 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    pub device_io: DeviceIoConfig,
    #[serde(default)]
    pub observers: Vec<String>,
    #[serde(default = "default_auto_flush")]
    pub auto_flush: u32,
    #[serde(default = "default_max_item_age")]
    pub max_item_age: u32,
}

pub type DevicesConfig = HashMap<String, DeviceConfig>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggerConfig {
    pub dir: Option<String>,
    pub max_bytes: Option<u64>,
    pub backup_count: Option<usize>,
}

fn default_watchdog_timeout() -> Option<u64> {
    Some(16)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default = "default_watchdog_timeout")]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub max_resets: u32,
    #[serde(default)]
    pub previous_resets: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        WatchdogConfig {
            enable: false,
            timeout: default_watchdog_timeout(),
            max_resets: 0,
            previous_resets: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default, rename = "Logger")]
    pub logger: LoggerConfig,
    #[serde(default, rename = "Watchdog")]
    pub watchdog: WatchdogConfig,
}

/// Load and cross-validate `devices.json`: every observer name must name
/// another device in the same file.
pub fn load_devices(path: &Path) -> Result<DevicesConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let devices: DevicesConfig =
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

    for (name, device) in &devices {
        for observer in &device.observers {
            if !devices.contains_key(observer) {
                return Err(ConfigError::UnknownObserver {
                    device: name.clone(),
                    observer: observer.clone(),
                });
            }
        }
    }

    Ok(devices)
}

/// Load `config.json`, defaulting to an all-disabled config when the
/// file doesn't exist (watchdog and custom log directory are optional).
pub fn load_app_config(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Persist `Watchdog.PreviousResets` via open→write→fsync→rename onto
/// `config.json`, so a crash mid-write never leaves a truncated file.
pub fn persist_app_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    let tmp_path = path.with_extension("json.tmp");
    let text = serde_json::to_string_pretty(config).expect("AppConfig always serializes");
    {
        use std::io::Write;
        let mut file = std::fs::File::create(&tmp_path).map_err(|source| ConfigError::Io {
            path: tmp_path.display().to_string(),
            source,
        })?;
        file.write_all(text.as_bytes())
            .map_err(|source| ConfigError::Io {
                path: tmp_path.display().to_string(),
                source,
            })?;
        file.sync_all().map_err(|source| ConfigError::Io {
            path: tmp_path.display().to_string(),
            source,
        })?;
    }
    std::fs::rename(&tmp_path, path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_unknown_observer() {
        let json = r#"{
            "A": {"type": "NMEADevice", "device_io": {"type": "StdOutPrinter"}, "observers": ["B"]}
        }"#;
        let dir = std::env::temp_dir().join("mux-daemon-test-unknown-observer.json");
        std::fs::write(&dir, json).unwrap();
        let err = load_devices(&dir).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownObserver { .. }));
        let _ = std::fs::remove_file(&dir);
    }

    #[test]
    fn loads_valid_devices() {
        let json = r#"{
            "A": {"type": "NMEADevice", "device_io": {"type": "File", "path": "/tmp/a.log"}, "observers": ["B"]},
            "B": {"type": "SeatalkDevice", "device_io": {"type": "StdOutPrinter"}, "observers": []}
        }"#;
        let dir = std::env::temp_dir().join("mux-daemon-test-valid-devices.json");
        std::fs::write(&dir, json).unwrap();
        let devices = load_devices(&dir).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices["A"].observers, vec!["B".to_string()]);
        let _ = std::fs::remove_file(&dir);
    }

    #[test]
    fn missing_app_config_defaults() {
        let config = load_app_config(Path::new("/nonexistent/config.json")).unwrap();
        assert!(!config.watchdog.enable);
    }
}
