// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-client protocol configuration.

use crate::frame::DEFAULT_MAX_FRAME_SIZE;
use crate::level::Level;
use std::time::Duration;

/// Default server endpoint, overridable via `DLT_SERVER_IP` /
/// `DLT_SERVER_PORT`.
pub const DEFAULT_SERVER_IP: &str = "127.0.0.1";
pub const DEFAULT_SERVER_PORT: u16 = 5000;

/// Default socket timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Plain-data configuration for one protocol endpoint.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    pub server_ip: String,
    pub server_port: u16,
    pub app_id: String,
    /// Initial threshold; the live value is cached on the client handle.
    pub threshold: Level,
    /// Connect / read / write timeout.
    pub timeout: Duration,
    pub max_frame_size: usize,
    pub auto_reconnect: bool,
}

impl ProtocolConfig {
    pub fn new(server_ip: &str, server_port: u16, app_id: &str, threshold: Level) -> Self {
        Self {
            server_ip: server_ip.to_string(),
            server_port,
            app_id: app_id.to_string(),
            threshold,
            timeout: DEFAULT_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            auto_reconnect: true,
        }
    }

    /// Build a configuration from the environment, falling back to the
    /// compiled-in defaults.
    pub fn from_env(app_id: &str, threshold: Level) -> Self {
        let server_ip =
            std::env::var("DLT_SERVER_IP").unwrap_or_else(|_| DEFAULT_SERVER_IP.to_string());
        let server_port = std::env::var("DLT_SERVER_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_SERVER_PORT);
        Self::new(&server_ip, server_port, app_id, threshold)
    }
}
