use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default UDP port for presence broadcasts.
pub const DEFAULT_DISCOVERY_PORT: u16 = 47700;
/// Default TCP port for the inventory service.
pub const DEFAULT_INVENTORY_PORT: u16 = 47701;
/// Default TCP port for the file transfer service.
pub const DEFAULT_DATA_PORT: u16 = 47702;

/// Everything a peer needs to run, passed in at construction.
///
/// Read-only once the peer is started. Can be loaded from a JSON file or
/// built from CLI arguments; the binary merges the two.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name broadcast to other machines on the LAN.
    pub advertised_name: String,
    /// Directory whose contents are offered to peers.
    pub outbox: PathBuf,
    /// Directory that pulled files are written into.
    pub inbox: PathBuf,
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    #[serde(default = "default_inventory_port")]
    pub inventory_port: u16,
    #[serde(default = "default_data_port")]
    pub data_port: u16,
}

fn default_discovery_port() -> u16 {
    DEFAULT_DISCOVERY_PORT
}

fn default_inventory_port() -> u16 {
    DEFAULT_INVENTORY_PORT
}

fn default_data_port() -> u16 {
    DEFAULT_DATA_PORT
}

impl Config {
    pub fn new(advertised_name: impl Into<String>, outbox: PathBuf, inbox: PathBuf) -> Self {
        Self {
            advertised_name: advertised_name.into(),
            outbox,
            inbox,
            discovery_port: DEFAULT_DISCOVERY_PORT,
            inventory_port: DEFAULT_INVENTORY_PORT,
            data_port: DEFAULT_DATA_PORT,
        }
    }

    /// Loads a config from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::InvalidConfig(format!("reading {}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::InvalidConfig(format!("parsing {}: {}", path.display(), e)))
    }

    /// The hostname this machine advertises by default.
    pub fn system_hostname() -> String {
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown-host".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::new("atlas", dir.path().join("out"), dir.path().join("in"));
        let path = dir.path().join("lancopy.json");
        fs::write(&path, serde_json::to_string_pretty(&cfg).unwrap()).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.advertised_name, "atlas");
        assert_eq!(loaded.discovery_port, DEFAULT_DISCOVERY_PORT);
    }

    #[test]
    fn ports_default_when_absent_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lancopy.json");
        fs::write(
            &path,
            r#"{"advertised_name":"atlas","outbox":"/tmp/out","inbox":"/tmp/in"}"#,
        )
        .unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.inventory_port, DEFAULT_INVENTORY_PORT);
        assert_eq!(loaded.data_port, DEFAULT_DATA_PORT);
    }
}
