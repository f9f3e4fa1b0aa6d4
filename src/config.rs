//! Analyzer configuration.
//!
//! A YAML file configures the local relay endpoint used by the capture
//! corrector, the source-address prefixes that classify a flow onto an
//! access interface, the external tool names, and plotting thresholds.
//! Every field has a default so a missing file yields a usable analyzer.

use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::Interface;

/// Errors found while validating a configuration
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid relay configuration: {0}")]
    InvalidRelay(String),

    #[error("invalid interface rules: {0}")]
    InvalidInterfaces(String),

    #[error("invalid tool configuration: {0}")]
    InvalidTools(String),
}

/// Top-level analyzer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub interfaces: InterfaceRules,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub plot: PlotConfig,
}

impl Config {
    /// Load a configuration file, falling back to defaults when the path
    /// does not exist.
    pub fn load(path: &Path) -> color_eyre::Result<Self> {
        use color_eyre::eyre::WrapErr;

        if !path.exists() {
            log::debug!("No config file at {}, using defaults", path.display());
            return Ok(Config::default());
        }
        let content = fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file '{}'", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .wrap_err_with(|| format!("Failed to parse config file '{}'", path.display()))?;
        config
            .validate()
            .wrap_err_with(|| format!("Invalid config file '{}'", path.display()))?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.relay.port == 0 {
            return Err(ValidationError::InvalidRelay(
                "relay port cannot be 0".to_string(),
            ));
        }

        let all_prefixes = self
            .interfaces
            .wifi_prefixes
            .iter()
            .chain(&self.interfaces.cellular_prefixes);
        for prefix in all_prefixes {
            if prefix.is_empty() {
                return Err(ValidationError::InvalidInterfaces(
                    "address prefixes cannot be empty".to_string(),
                ));
            }
        }

        for (name, value) in [
            ("connection_report", &self.tools.connection_report),
            ("multipath_report", &self.tools.multipath_report),
            ("packet_filter", &self.tools.packet_filter),
            ("header_rewrite", &self.tools.header_rewrite),
            ("capture_merge", &self.tools.capture_merge),
            ("decompress", &self.tools.decompress),
        ] {
            if value.is_empty() {
                return Err(ValidationError::InvalidTools(format!(
                    "tool name '{name}' cannot be empty"
                )));
            }
        }

        Ok(())
    }
}

/// Local relay endpoint the corrector looks for (a SOCKS-style proxy that
/// splits one connection into two unidirectional halves)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_addr")]
    pub addr: IpAddr,
    #[serde(default = "default_relay_port")]
    pub port: u16,
}

fn default_relay_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_relay_port() -> u16 {
    1080
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            addr: default_relay_addr(),
            port: default_relay_port(),
        }
    }
}

impl RelayConfig {
    /// The relay as an (address, port) endpoint
    pub fn endpoint(&self) -> (IpAddr, u16) {
        (self.addr, self.port)
    }
}

/// Source-address prefixes mapping a flow onto an access interface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceRules {
    #[serde(default = "default_wifi_prefixes")]
    pub wifi_prefixes: Vec<String>,
    #[serde(default = "default_cellular_prefixes")]
    pub cellular_prefixes: Vec<String>,
}

fn default_wifi_prefixes() -> Vec<String> {
    vec!["192.168.".to_string()]
}

fn default_cellular_prefixes() -> Vec<String> {
    vec!["10.".to_string()]
}

impl Default for InterfaceRules {
    fn default() -> Self {
        Self {
            wifi_prefixes: default_wifi_prefixes(),
            cellular_prefixes: default_cellular_prefixes(),
        }
    }
}

impl InterfaceRules {
    /// Classify a source address onto an interface. Addresses matching no
    /// configured prefix classify as cellular.
    pub fn classify(&self, addr: &IpAddr) -> Interface {
        let text = addr.to_string();
        if self.wifi_prefixes.iter().any(|p| text.starts_with(p.as_str())) {
            Interface::Wifi
        } else if self
            .cellular_prefixes
            .iter()
            .any(|p| text.starts_with(p.as_str()))
        {
            Interface::Cellular
        } else {
            log::debug!("No interface prefix matches {text}, assuming cellular");
            Interface::Cellular
        }
    }
}

/// Names (or paths) of the external trace and capture tools
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// TCP connection-report tool (tcptrace-compatible CSV output)
    #[serde(default = "default_connection_report")]
    pub connection_report: String,
    /// Multipath report tool (per-connection sequence CSV output)
    #[serde(default = "default_multipath_report")]
    pub multipath_report: String,
    /// Packet filter used to split captures
    #[serde(default = "default_packet_filter")]
    pub packet_filter: String,
    /// Header rewrite tool used to remap endpoints
    #[serde(default = "default_header_rewrite")]
    pub header_rewrite: String,
    /// Capture merge tool
    #[serde(default = "default_capture_merge")]
    pub capture_merge: String,
    /// Decompressor for gzipped input traces
    #[serde(default = "default_decompress")]
    pub decompress: String,
}

fn default_connection_report() -> String {
    "tcptrace".to_string()
}

fn default_multipath_report() -> String {
    "mptcptrace".to_string()
}

fn default_packet_filter() -> String {
    "tshark".to_string()
}

fn default_header_rewrite() -> String {
    "tcprewrite".to_string()
}

fn default_capture_merge() -> String {
    "mergecap".to_string()
}

fn default_decompress() -> String {
    "gunzip".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            connection_report: default_connection_report(),
            multipath_report: default_multipath_report(),
            packet_filter: default_packet_filter(),
            header_rewrite: default_header_rewrite(),
            capture_merge: default_capture_merge(),
            decompress: default_decompress(),
        }
    }
}

/// Plot series thresholds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlotConfig {
    /// Minimum unique bytes in the resolved direction for a flow to get
    /// its own plot series
    #[serde(default)]
    pub min_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.relay.port, 1080);
        assert!(config.relay.addr.is_loopback());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = "relay:\n  port: 9050\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.relay.port, 9050);
        // Unspecified sections keep their defaults
        assert_eq!(config.tools.connection_report, "tcptrace");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_relay_port_rejected() {
        let yaml = "relay:\n  port: 0\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidRelay(_))
        ));
    }

    #[test]
    fn test_empty_tool_name_rejected() {
        let yaml = "tools:\n  packet_filter: \"\"\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidTools(_))
        ));
    }

    #[test]
    fn test_interface_classification() {
        let rules = InterfaceRules::default();
        assert_eq!(
            rules.classify(&"192.168.1.20".parse().unwrap()),
            Interface::Wifi
        );
        assert_eq!(
            rules.classify(&"10.12.0.7".parse().unwrap()),
            Interface::Cellular
        );
        // Unknown prefixes fall back to cellular
        assert_eq!(
            rules.classify(&"203.0.113.5".parse().unwrap()),
            Interface::Cellular
        );
    }
}
