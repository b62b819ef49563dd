use std::{fmt, fs, path::Path, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::GpioError;
use crate::pinmap::Revision;

pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";

/// Edge trigger written to a line's sysfs `edge` attribute.
///
/// Raw codes follow the Arduino interrupt constants: `1` CHANGE, `2` FALLING,
/// `3` RISING, `4` NONE.
#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeDetect {
    #[default]
    None,
    Rising,
    Falling,
    Both,
}

impl EdgeDetect {
    pub fn as_sysfs_str(&self) -> &'static str {
        match self {
            EdgeDetect::None => "none",
            EdgeDetect::Rising => "rising",
            EdgeDetect::Falling => "falling",
            EdgeDetect::Both => "both",
        }
    }
}

impl fmt::Display for EdgeDetect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sysfs_str())
    }
}

impl TryFrom<i32> for EdgeDetect {
    type Error = GpioError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(EdgeDetect::Both),
            2 => Ok(EdgeDetect::Falling),
            3 => Ok(EdgeDetect::Rising),
            4 => Ok(EdgeDetect::None),
            other => Err(GpioError::InvalidMode(other.to_string())),
        }
    }
}

impl FromStr for EdgeDetect {
    type Err = GpioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "both" | "change" => Ok(EdgeDetect::Both),
            "falling" => Ok(EdgeDetect::Falling),
            "rising" => Ok(EdgeDetect::Rising),
            "none" => Ok(EdgeDetect::None),
            other => Err(GpioError::InvalidMode(other.to_string())),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BoardConfig {
    pub revision: Revision,
    /// SCHED_RR priority for watcher threads; only honoured when running as root.
    #[serde(default)]
    pub watcher_priority: Option<i32>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SysfsConfig {
    pub root: PathBuf,
    pub export_timeout_ms: u64,
    pub export_poll_ms: u64,
}

impl Default for SysfsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            export_timeout_ms: 1000,
            export_poll_ms: 10,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchConfig {
    pub pin: u8,
    pub edge: EdgeDetect,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub board: BoardConfig,
    #[serde(default)]
    pub sysfs: SysfsConfig,
    #[serde(default)]
    pub watch: Vec<WatchConfig>,
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, GpioError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| GpioError::Config(format!("Failed to read config: {e}")))?;
        serde_json::from_str(&contents)
            .map_err(|e| GpioError::Config(format!("Invalid config json: {e}")))
    }
}
