// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed log-level configuration: general defaults plus per-application
//! overrides.
//!
//! The configuration file is the INI dialect parsed by `lucp-config`.
//! `[general]` carries the server endpoint, the default threshold, the
//! storage locations and per-level destination modes; every other
//! section is an application identifier carrying the same key set. The
//! registry is a plain value passed by reference -- there are no
//! process-wide globals.

use crate::level::{Level, LogMode};
use lucp_config::{ConfigError, ConfigFile};
use parking_lot::Mutex;
use std::path::Path;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/logMgr.cfg";

/// Default server endpoint.
pub const DEFAULT_SERVER_IP: &str = "0.0.0.0";
pub const DEFAULT_SERVER_PORT: u16 = 32123;

/// Documented ceiling on configured applications.
pub const MAX_APPS: usize = 20;

/// Per-level mode keys, indexable by severity.
const LEVEL_MODE_KEYS: [(Level, &str); 6] = [
    (Level::Fatal, "fatal.mode"),
    (Level::Error, "error.mode"),
    (Level::Warn, "warning.mode"),
    (Level::Info, "info.mode"),
    (Level::Debug, "debug.mode"),
    (Level::Verbose, "verbose.mode"),
];

/// `[general]` section contents.
#[derive(Debug, Clone)]
pub struct GeneralConfig {
    pub server_ip: String,
    pub server_port: u16,
    pub threshold: Level,
    pub persistent_dir: String,
    pub volatile_dir: String,
    pub max_file_size: u64,
    pub max_backup_files: u32,
    pub log_format: String,
    pub date_format: String,
    /// Destination modes indexed by `Level as usize`.
    pub modes: [LogMode; 7],
}

impl Default for GeneralConfig {
    fn default() -> Self {
        let mut modes = [LogMode::NONE; 7];
        modes[Level::Fatal as usize] = LogMode::CONSOLE.union(LogMode::PERSISTENT);
        modes[Level::Error as usize] = LogMode::CONSOLE.union(LogMode::PERSISTENT);
        modes[Level::Warn as usize] = LogMode::VOLATILE;
        modes[Level::Info as usize] = LogMode::VOLATILE;
        modes[Level::Debug as usize] = LogMode::VOLATILE;
        modes[Level::Verbose as usize] = LogMode::VOLATILE;
        Self {
            server_ip: DEFAULT_SERVER_IP.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            threshold: Level::Debug,
            persistent_dir: "/var/log/logMgr".to_string(),
            volatile_dir: "/tmp/log/logMgr".to_string(),
            max_file_size: 10 * 1024 * 1024,
            max_backup_files: 10,
            log_format: "%Y-%m-%d %H:%M:%S - %(name)s - %(levelname)s - %(message)s".to_string(),
            date_format: "%Y-%m-%d %H:%M:%S".to_string(),
            modes,
        }
    }
}

/// Per-application overrides.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_id: String,
    pub threshold: Level,
    /// Destination modes indexed by `Level as usize`. Levels without a
    /// `<level>.mode` key stay at `LogMode::NONE`.
    pub modes: [LogMode; 7],
}

struct RegistryInner {
    general: GeneralConfig,
    apps: Vec<AppConfig>,
}

/// Thread-safe registry of general + per-app log configuration.
pub struct LevelRegistry {
    inner: Mutex<RegistryInner>,
}

impl Default for LevelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LevelRegistry {
    /// Registry with compiled-in defaults and no applications.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                general: GeneralConfig::default(),
                apps: Vec::new(),
            }),
        }
    }

    /// Load (or reload) from a configuration file. The general section
    /// starts from defaults and the application list is rebuilt.
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let store = ConfigFile::open(path)?;
        self.load_store(&store);
        Ok(())
    }

    /// Load from an already-parsed store.
    pub fn load_store(&self, store: &ConfigFile) {
        let mut general = GeneralConfig::default();

        if let Ok(ip) = store.get_string("general", "ip") {
            general.server_ip = ip;
        }
        if let Ok(port) = store.get_uint16("general", "port") {
            general.server_port = port;
        }
        if let Ok(name) = store.get_string("general", "threshold_level") {
            match Level::from_name(&name) {
                Some(level) => general.threshold = level,
                None => log::warn!("unknown threshold_level {:?}, keeping default", name),
            }
        }
        if let Ok(dir) = store.get_string("general", "log_persistent_storage_dir") {
            general.persistent_dir = dir;
        }
        if let Ok(dir) = store.get_string("general", "log_volatile_storage_dir") {
            general.volatile_dir = dir;
        }
        if let Ok(size) = store.get_uint64("general", "max_file_size") {
            general.max_file_size = size;
        }
        if let Ok(count) = store.get_uint32("general", "max_backup_files") {
            general.max_backup_files = count;
        }
        if let Ok(format) = store.get_string("general", "log_format") {
            general.log_format = format;
        }
        if let Ok(format) = store.get_string("general", "date_format") {
            general.date_format = format;
        }
        for (level, key) in LEVEL_MODE_KEYS {
            if let Ok(spec) = store.get_string("general", key) {
                general.modes[level as usize] = LogMode::from_spec(&spec);
            }
        }

        let mut apps = Vec::new();
        for section in store.get_sections() {
            if section.eq_ignore_ascii_case("general") {
                continue;
            }
            if apps.len() >= MAX_APPS {
                log::warn!("more than {} application sections, ignoring the rest", MAX_APPS);
                break;
            }

            let mut app = AppConfig {
                app_id: section.clone(),
                threshold: general.threshold,
                modes: [LogMode::NONE; 7],
            };
            if let Ok(name) = store.get_string(&section, "threshold_level") {
                if let Some(level) = Level::from_name(&name) {
                    app.threshold = level;
                }
            }
            for (level, key) in LEVEL_MODE_KEYS {
                if let Ok(spec) = store.get_string(&section, key) {
                    app.modes[level as usize] = LogMode::from_spec(&spec);
                }
            }
            apps.push(app);
        }

        let mut inner = self.inner.lock();
        inner.general = general;
        inner.apps = apps;
    }

    /// Snapshot of the general configuration.
    pub fn general(&self) -> GeneralConfig {
        self.inner.lock().general.clone()
    }

    /// Per-application configuration, exact id match.
    pub fn app(&self, app_id: &str) -> Option<AppConfig> {
        self.inner
            .lock()
            .apps
            .iter()
            .find(|app| app.app_id == app_id)
            .cloned()
    }

    /// Number of configured applications.
    pub fn app_count(&self) -> usize {
        self.inner.lock().apps.len()
    }
}
