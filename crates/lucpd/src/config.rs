// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Daemon configuration.
//!
//! Values are loaded over compiled-in defaults; an unreadable file or an
//! out-of-range value keeps the default and logs a warning. Ranges:
//!
//! | key | range |
//! |---|---|
//! | `network.max_clients` | 1..=100 |
//! | `network.recv_timeout_ms` / `send_timeout_ms` | 100..=10000 |
//! | `protocol.rate_limit_ms` | 1000..=60000 |
//! | `protocol.session_timeout_ms` | 1000..=30000 |
//! | `file.file_retention_min` | 5..=1440 |

use lucp_config::ConfigFile;
use std::path::Path;
use tracing::{debug, warn};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/lucpd.conf";

pub const DEFAULT_IP: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 32100;
pub const DEFAULT_MAX_CLIENTS: u32 = 10;
pub const DEFAULT_RECV_TIMEOUT_MS: u32 = 1000;
pub const DEFAULT_SEND_TIMEOUT_MS: u32 = 1000;
pub const DEFAULT_RATE_LIMIT_MS: u32 = 3000;
pub const DEFAULT_SESSION_TIMEOUT_MS: u32 = 2000;

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub ip: String,
    pub port: u16,
    pub max_clients: u32,
    pub recv_timeout_ms: u32,
    pub send_timeout_ms: u32,
}

#[derive(Debug, Clone)]
pub struct ProtocolSettings {
    /// Parsed and validated, not enforced at the accept boundary.
    pub rate_limit_ms: u32,
    pub session_timeout_ms: u32,
    pub validate_version: bool,
    /// Reserved: the wire format carries no CRC field.
    pub validate_crc16: bool,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_level: String,
    /// Empty means stdout.
    pub log_file: String,
}

#[derive(Debug, Clone)]
pub struct FileConfig {
    pub tmp_dir: String,
    pub file_retention_min: u32,
}

#[derive(Debug, Clone)]
pub struct LucpdConfig {
    pub network: NetworkConfig,
    pub protocol: ProtocolSettings,
    pub logging: LoggingConfig,
    pub file: FileConfig,
}

impl Default for LucpdConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig {
                ip: DEFAULT_IP.to_string(),
                port: DEFAULT_PORT,
                max_clients: DEFAULT_MAX_CLIENTS,
                recv_timeout_ms: DEFAULT_RECV_TIMEOUT_MS,
                send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            },
            protocol: ProtocolSettings {
                rate_limit_ms: DEFAULT_RATE_LIMIT_MS,
                session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
                validate_version: true,
                validate_crc16: true,
            },
            logging: LoggingConfig {
                log_level: "DEBUG".to_string(),
                log_file: String::new(),
            },
            file: FileConfig {
                tmp_dir: "/tmp/lucp".to_string(),
                file_retention_min: 30,
            },
        }
    }
}

impl LucpdConfig {
    /// Load the file over defaults. A missing or unparseable file keeps
    /// the full defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let mut config = LucpdConfig::default();
        let path = path.as_ref();

        let store = match ConfigFile::open(path) {
            Ok(store) => store,
            Err(e) => {
                warn!("cannot load config {}: {}, using defaults", path.display(), e);
                return config;
            }
        };
        config.apply(&store);
        debug!("loaded configuration from {}", path.display());
        config
    }

    /// Overlay values from an already-parsed store.
    pub fn apply(&mut self, store: &ConfigFile) {
        if let Ok(ip) = store.get_string("network", "ip") {
            debug!("network.ip = {}", ip);
            self.network.ip = ip;
        }
        if let Ok(port) = store.get_uint16("network", "port") {
            debug!("network.port = {}", port);
            self.network.port = port;
        }
        if let Ok(max_clients) = store.get_int32("network", "max_clients") {
            if (1..=100).contains(&max_clients) {
                self.network.max_clients = max_clients as u32;
            } else {
                warn!("invalid network.max_clients {}", max_clients);
            }
        }
        if let Ok(timeout) = store.get_int32("network", "recv_timeout_ms") {
            if (100..=10_000).contains(&timeout) {
                self.network.recv_timeout_ms = timeout as u32;
            } else {
                warn!("invalid network.recv_timeout_ms {}", timeout);
            }
        }
        if let Ok(timeout) = store.get_int32("network", "send_timeout_ms") {
            if (100..=10_000).contains(&timeout) {
                self.network.send_timeout_ms = timeout as u32;
            } else {
                warn!("invalid network.send_timeout_ms {}", timeout);
            }
        }

        if let Ok(limit) = store.get_int32("protocol", "rate_limit_ms") {
            if (1_000..=60_000).contains(&limit) {
                self.protocol.rate_limit_ms = limit as u32;
            } else {
                warn!("invalid protocol.rate_limit_ms {}", limit);
            }
        }
        if let Ok(timeout) = store.get_int32("protocol", "session_timeout_ms") {
            if (1_000..=30_000).contains(&timeout) {
                self.protocol.session_timeout_ms = timeout as u32;
            } else {
                warn!("invalid protocol.session_timeout_ms {}", timeout);
            }
        }
        if let Ok(validate) = store.get_bool("protocol", "validate_version") {
            debug!("protocol.validate_version = {}", validate);
            self.protocol.validate_version = validate;
        }
        if let Ok(validate) = store.get_bool("protocol", "validate_crc16") {
            debug!("protocol.validate_crc16 = {}", validate);
            self.protocol.validate_crc16 = validate;
        }

        if let Ok(level) = store.get_string("logging", "log_level") {
            self.logging.log_level = level;
        }
        if let Ok(file) = store.get_string("logging", "log_file") {
            self.logging.log_file = file;
        }

        if let Ok(dir) = store.get_string("file", "tmp_dir") {
            self.file.tmp_dir = dir;
        }
        if let Ok(retention) = store.get_int32("file", "file_retention_min") {
            if (5..=1_440).contains(&retention) {
                self.file.file_retention_min = retention as u32;
            } else {
                warn!("invalid file.file_retention_min {}", retention);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = LucpdConfig::default();
        assert_eq!(config.network.port, DEFAULT_PORT);
        assert_eq!(config.network.max_clients, DEFAULT_MAX_CLIENTS);
        assert!(config.protocol.validate_version);
    }

    #[test]
    fn test_load_overlays_and_validates_ranges() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "[network]\n\
             ip = 0.0.0.0\n\
             port = 40000\n\
             max_clients = 250\n\
             recv_timeout_ms = 500\n\
             [protocol]\n\
             session_timeout_ms = 5000\n\
             validate_version = false\n\
             [file]\n\
             file_retention_min = 2\n"
        )
        .unwrap();

        let config = LucpdConfig::load(file.path());
        assert_eq!(config.network.ip, "0.0.0.0");
        assert_eq!(config.network.port, 40000);
        // Out of range: default kept.
        assert_eq!(config.network.max_clients, DEFAULT_MAX_CLIENTS);
        assert_eq!(config.network.recv_timeout_ms, 500);
        assert_eq!(config.protocol.session_timeout_ms, 5000);
        assert!(!config.protocol.validate_version);
        assert_eq!(config.file.file_retention_min, 30);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = LucpdConfig::load("/nonexistent/lucpd.conf");
        assert_eq!(config.network.port, DEFAULT_PORT);
    }
}
