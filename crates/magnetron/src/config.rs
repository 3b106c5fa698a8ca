// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tracker configuration.
//!
//! Files are YAML unless the extension is `.json`. Keys are PascalCase:
//!
//! ```yaml
//! ClientHost: 0.0.0.0:5498
//! ServerHost: 0.0.0.0:5499
//! ServerExpirationSecs: 300
//! StaticEntries:
//!   - Name: My Server
//!     Description: Always listed first
//!     Address: 203.0.113.7:5500
//! TrackerFederation:
//!   Enabled: true
//!   Header: "-------- Federated --------"
//!   TrackerEntries:
//!     - Name: Peer
//!       Address: 198.51.100.2:5498
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default port for static server entries without an explicit port.
pub const DEFAULT_SERVER_PORT: u16 = 5500;

/// Default port for tracker entries without an explicit port.
pub const DEFAULT_TRACKER_PORT: u16 = 5498;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn read_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    if is_json(path) {
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_yaml::from_str(&content)?)
    }
}

fn write_file<T: Serialize>(value: &T, path: &Path) -> Result<(), ConfigError> {
    let content = if is_json(path) {
        serde_json::to_string_pretty(value)?
    } else {
        serde_yaml::to_string(value)?
    };
    std::fs::write(path, content)?;
    Ok(())
}

/// Split `host[:port]`, falling back to `default_port`.
pub fn split_address(address: &str, default_port: u16) -> Result<(String, u16), ConfigError> {
    let address = address.trim();
    match address.rsplit_once(':') {
        None => {
            if address.is_empty() {
                return Err(ConfigError::Invalid("empty address".into()));
            }
            Ok((address.to_string(), default_port))
        }
        Some((host, port)) => {
            if host.is_empty() {
                return Err(ConfigError::Invalid(format!("missing host in {}", address)));
            }
            let port: u16 = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("invalid port in {}", address)))?;
            if port == 0 {
                return Err(ConfigError::Invalid(format!("port cannot be 0 in {}", address)));
            }
            Ok((host.to_string(), port))
        }
    }
}

/// Tracker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TrackerConfig {
    /// TCP address clients (and peer trackers) connect to
    #[serde(default = "default_client_host")]
    pub client_host: String,

    /// UDP address servers send registrations to
    #[serde(default = "default_server_host")]
    pub server_host: String,

    /// How long a registered server may stay silent before it is removed
    #[serde(default = "default_server_expiration")]
    pub server_expiration_secs: u64,

    /// Interval between expiration sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Require a valid password on every registration
    #[serde(default)]
    pub enable_passwords: bool,

    /// Password configuration file (required when passwords are enabled)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_file: Option<PathBuf>,

    /// Reject handshake headers with a foreign magic or version
    #[serde(default)]
    pub strict_header: bool,

    /// SQLite database; the registry is kept in memory when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    /// Servers always listed first, in this order
    #[serde(default)]
    pub static_entries: Vec<ListingEntry>,

    /// Peer trackers to pull listings from
    #[serde(default)]
    pub tracker_federation: FederationConfig,
}

/// A configured server or peer tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListingEntry {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// `host[:port]`
    pub address: String,

    #[serde(default)]
    pub user_count: u16,
}

impl ListingEntry {
    pub fn server_address(&self) -> Result<(String, u16), ConfigError> {
        split_address(&self.address, DEFAULT_SERVER_PORT)
    }

    pub fn tracker_address(&self) -> Result<(String, u16), ConfigError> {
        split_address(&self.address, DEFAULT_TRACKER_PORT)
    }
}

/// Tracker federation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FederationConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Label of the separator row placed before federated listings
    #[serde(default = "default_federation_header")]
    pub header: String,

    #[serde(default = "default_poll_frequency")]
    pub poll_frequency_secs: u64,

    /// Upper bound on one poll of one peer
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// How long a federated server may go unseen before it is removed
    #[serde(default = "default_federation_expiration")]
    pub expiration_secs: u64,

    /// List each peer tracker's own row before its servers
    #[serde(default)]
    pub show_tracker_entries: bool,

    #[serde(default)]
    pub tracker_entries: Vec<ListingEntry>,
}

fn default_client_host() -> String {
    "0.0.0.0:5498".to_string()
}

fn default_server_host() -> String {
    "0.0.0.0:5499".to_string()
}

fn default_server_expiration() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_federation_header() -> String {
    "-------- Federated Servers --------".to_string()
}

fn default_poll_frequency() -> u64 {
    300
}

fn default_poll_timeout() -> u64 {
    10
}

fn default_federation_expiration() -> u64 {
    900
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            header: default_federation_header(),
            poll_frequency_secs: default_poll_frequency(),
            poll_timeout_secs: default_poll_timeout(),
            expiration_secs: default_federation_expiration(),
            show_tracker_entries: false,
            tracker_entries: Vec::new(),
        }
    }
}

impl FederationConfig {
    pub fn poll_frequency(&self) -> Duration {
        Duration::from_secs(self.poll_frequency_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_secs)
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            client_host: default_client_host(),
            server_host: default_server_host(),
            server_expiration_secs: default_server_expiration(),
            sweep_interval_secs: default_sweep_interval(),
            enable_passwords: false,
            password_file: None,
            strict_header: false,
            database_path: None,
            static_entries: Vec::new(),
            tracker_federation: FederationConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Load configuration from a YAML or JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        read_file(path)
    }

    /// Save configuration to a YAML or JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        write_file(self, path)
    }

    /// Render the effective configuration as YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn client_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.client_host
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("invalid ClientHost {}", self.client_host)))
    }

    pub fn server_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server_host
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("invalid ServerHost {}", self.server_host)))
    }

    /// Get server expiration as Duration.
    pub fn server_expiration(&self) -> Duration {
        Duration::from_secs(self.server_expiration_secs)
    }

    /// Get sweep interval as Duration.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.client_addr()?;
        self.server_addr()?;

        if self.server_expiration_secs == 0 {
            return Err(ConfigError::Invalid(
                "ServerExpirationSecs cannot be 0".into(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("SweepIntervalSecs cannot be 0".into()));
        }
        if self.enable_passwords && self.password_file.is_none() {
            return Err(ConfigError::Invalid(
                "PasswordFile required when EnablePasswords is set".into(),
            ));
        }

        let mut seen = HashSet::new();
        for entry in &self.static_entries {
            let (host, port) = entry.server_address()?;
            if !seen.insert((host, port)) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate static entry address {}",
                    entry.address
                )));
            }
        }

        let fed = &self.tracker_federation;
        let mut seen = HashSet::new();
        for entry in &fed.tracker_entries {
            let (host, port) = entry.tracker_address()?;
            if !seen.insert((host, port)) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate tracker entry address {}",
                    entry.address
                )));
            }
        }
        if fed.enabled {
            if fed.poll_frequency_secs == 0 {
                return Err(ConfigError::Invalid(
                    "TrackerFederation.PollFrequencySecs cannot be 0".into(),
                ));
            }
            if fed.poll_timeout_secs == 0 {
                return Err(ConfigError::Invalid(
                    "TrackerFederation.PollTimeoutSecs cannot be 0".into(),
                ));
            }
            if fed.expiration_secs == 0 {
                return Err(ConfigError::Invalid(
                    "TrackerFederation.ExpirationSecs cannot be 0".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Accepted registration passwords.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PasswordConfig {
    #[serde(default)]
    pub password_entries: Vec<PasswordEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PasswordEntry {
    /// A helpful name
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// bcrypt hash
    pub password: String,
}

impl PasswordConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        read_file(path)
    }

    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        write_file(self, path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.password_entries.is_empty() {
            return Err(ConfigError::Invalid(
                "password configuration has no entries".into(),
            ));
        }
        if let Some(entry) = self
            .password_entries
            .iter()
            .find(|e| e.password.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "password entry {:?} has no password",
                entry.name
            )));
        }
        Ok(())
    }
}
