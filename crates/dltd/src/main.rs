// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DLT log server daemon.
//!
//! Loads the level registry, serves the log-collection protocol and
//! answers per-application registration handshakes.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: /etc/logMgr.cfg, port from the config file
//! dltd
//!
//! # Explicit config and port override
//! dltd -c ./logMgr.cfg -p 32123
//! ```

use clap::Parser;
use dlt::registry::DEFAULT_CONFIG_PATH;
use dlt::LevelRegistry;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod server;

use server::DltServer;

/// DLT log server - central collector for application log telemetry.
#[derive(Parser, Debug)]
#[command(name = "dltd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Listening port, overrides the config file
    #[arg(short = 'p', long = "port", value_parser = clap::value_parser!(u16).range(1..))]
    port: Option<u16>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let registry = Arc::new(LevelRegistry::new());
    if let Err(e) = registry.load(&args.config) {
        warn!("cannot load config {}: {}, using defaults", args.config, e);
    }

    let general = registry.general();
    let port = args.port.unwrap_or(general.server_port);
    let server = DltServer::bind(registry, (general.server_ip.as_str(), port))?;
    info!("dltd starting on {}:{}", general.server_ip, port);

    let stop = server.stop_handle();
    ctrlc::set_handler(move || {
        info!("shutdown signal received");
        stop.stop();
    })?;

    server.run();
    info!("dltd stopped");
    Ok(())
}
