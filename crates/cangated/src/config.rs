//! Daemon configuration
//!
//! Loaded from TOML; every section and field is optional. Command-line
//! options are applied on top by the binary.
//!
//! ```toml
//! [server]
//! listen = "127.0.0.1"
//! port = 28600
//! interfaces = ["can0", "vcan0"]
//!
//! [endpoint]
//! type = "bcm"
//!
//! [beacon]
//! enabled = true
//! description = "lab bench"
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use cangate_proto::DEFAULT_MAX_FRAME_LEN;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub endpoint: EndpointConfig,

    #[serde(default)]
    pub wildcard: WildcardConfig,

    #[serde(default)]
    pub beacon: BeaconConfig,

    #[serde(default)]
    pub statistics: StatisticsConfig,
}

impl DaemonConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_frame_len < 2 {
            return Err(ConfigError::Invalid(
                "server.max_frame_len must hold at least '<>'".into(),
            ));
        }
        if self.wildcard.sweep_chunk == 0 {
            return Err(ConfigError::Invalid(
                "wildcard.sweep_chunk must be positive".into(),
            ));
        }
        if self.wildcard.extended_limit > EXTENDED_ID_SPACE {
            return Err(ConfigError::Invalid(format!(
                "wildcard.extended_limit exceeds 0x{EXTENDED_ID_SPACE:X}"
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Server
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bound of one wire frame, delimiters included
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,

    /// Buses clients may open
    #[serde(default)]
    pub interfaces: Vec<String>,
}

pub const DEFAULT_PORT: u16 = 28600;

fn default_listen() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
            max_frame_len: default_max_frame_len(),
            interfaces: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen, self.port)
    }
}

// =============================================================================
// Endpoint
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    /// Kernel broadcast manager
    #[default]
    Bcm,
    /// In-process scheduler, no CAN hardware needed
    Mock,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(rename = "type", default)]
    pub kind: EndpointKind,
}

// =============================================================================
// Wildcard filters
// =============================================================================

/// Size of the 29-bit extended id space
pub const EXTENDED_ID_SPACE: u32 = 0x2000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WildcardConfig {
    /// Dispatches issued per scheduling round of a sweep
    #[serde(default = "default_sweep_chunk")]
    pub sweep_chunk: usize,

    /// Extended ids `0..extended_limit` are covered by the extended wildcard
    #[serde(default = "default_extended_limit")]
    pub extended_limit: u32,
}

fn default_sweep_chunk() -> usize {
    256
}

fn default_extended_limit() -> u32 {
    EXTENDED_ID_SPACE
}

impl Default for WildcardConfig {
    fn default() -> Self {
        Self {
            sweep_chunk: default_sweep_chunk(),
            extended_limit: default_extended_limit(),
        }
    }
}

// =============================================================================
// Beacon
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_beacon_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_beacon_port")]
    pub port: u16,

    #[serde(default = "default_description")]
    pub description: String,
}

fn default_true() -> bool {
    true
}

fn default_beacon_interval_ms() -> u64 {
    2000
}

fn default_beacon_port() -> u16 {
    42000
}

fn default_description() -> String {
    "cangate".to_string()
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_ms: default_beacon_interval_ms(),
            port: default_beacon_port(),
            description: default_description(),
        }
    }
}

impl BeaconConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsConfig {
    #[serde(default = "default_statistics_interval_ms")]
    pub interval_ms: u64,
}

fn default_statistics_interval_ms() -> u64 {
    1000
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_statistics_interval_ms(),
        }
    }
}

impl StatisticsConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config: DaemonConfig = toml::from_str("").unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.server.port, 28600);
        assert_eq!(config.server.max_frame_len, 4000);
        assert_eq!(config.endpoint.kind, EndpointKind::Bcm);
        assert_eq!(config.wildcard.extended_limit, 0x2000_0000);
        assert_eq!(config.beacon.interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_full_file() {
        let config: DaemonConfig = toml::from_str(
            r#"
            [server]
            listen = "0.0.0.0"
            port = 29536
            max_frame_len = 512
            interfaces = ["can0", "vcan0"]

            [endpoint]
            type = "mock"

            [wildcard]
            sweep_chunk = 64
            extended_limit = 0x1000

            [beacon]
            enabled = false

            [statistics]
            interval_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.server.socket_addr().to_string(), "0.0.0.0:29536");
        assert_eq!(config.server.interfaces, vec!["can0", "vcan0"]);
        assert_eq!(config.endpoint.kind, EndpointKind::Mock);
        assert_eq!(config.wildcard.sweep_chunk, 64);
        assert_eq!(config.wildcard.extended_limit, 0x1000);
        assert!(!config.beacon.enabled);
        assert_eq!(config.beacon.port, 42000);
        assert_eq!(config.statistics.interval(), Duration::from_millis(250));
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cangated.toml");
        std::fs::write(&path, "[server]\nport = 1234\n").unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.server.port, 1234);

        let missing = DaemonConfig::load(dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = DaemonConfig::default();
        config.wildcard.sweep_chunk = 0;
        assert!(config.validate().is_err());

        let mut config = DaemonConfig::default();
        config.wildcard.extended_limit = 0x4000_0000;
        assert!(config.validate().is_err());

        let mut config = DaemonConfig::default();
        config.server.max_frame_len = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_endpoint_type() {
        let result: Result<DaemonConfig, _> = toml::from_str("[endpoint]\ntype = \"serial\"\n");
        assert!(result.is_err());
    }
}
