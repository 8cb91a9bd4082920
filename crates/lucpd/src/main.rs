// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! LUCP session daemon.
//!
//! Accepts device connections and drives the log-upload workflow per
//! connection on its own thread. Shutdown is cooperative: SIGINT/SIGTERM
//! flip a shared flag observed by the accept loop and every session.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: /etc/lucpd.conf, port from the config file
//! lucpd
//!
//! # Explicit config and port override
//! lucpd -c ./lucpd.conf -p 32100
//! ```
//!
//! Malformed command-line arguments emit a warning and the daemon
//! continues with defaults.

use clap::Parser;
use lucp::session::{LogPreparer, PrepOutcome, Session, SessionConfig};
use lucp::{frame::status, Connection};
use socket2::{SockRef, TcpKeepalive};
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::LucpdConfig;

/// LUCP daemon - session coordinator for remote log uploads.
#[derive(Parser, Debug)]
#[command(name = "lucpd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long = "config", default_value = config::DEFAULT_CONFIG_PATH)]
    config: String,

    /// Listening port, overrides the config file
    #[arg(short = 'p', long = "port", value_parser = clap::value_parser!(u16).range(1..))]
    port: Option<u16>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            config: config::DEFAULT_CONFIG_PATH.to_string(),
            port: None,
        }
    }
}

/// Simulated log-preparation collaborator: 80% success, 10% archive
/// failure, 10% FTP upload failure, with 700 ms of simulated work.
struct SimulatedLogPrep;

impl LogPreparer for SimulatedLogPrep {
    fn prepare(&self) -> PrepOutcome {
        thread::sleep(Duration::from_millis(700));
        match fastrand::u32(0..10) {
            0..=7 => PrepOutcome {
                status: status::SUCCESS,
                detail: "demo_logfile_20250925.log".to_string(),
            },
            8 => PrepOutcome {
                status: status::ARCHIVE_FAILED,
                detail: "Archive failed: disk full".to_string(),
            },
            _ => PrepOutcome {
                status: status::FTP_UPLOAD_FAILED,
                detail: "FTP upload failed: connection timeout".to_string(),
            },
        }
    }
}

/// Writer handed to the tracing subscriber when a log file is
/// configured. One shared file, serialized writes.
#[derive(Clone)]
struct FileWriter(Arc<std::sync::Mutex<std::fs::File>>);

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut file = self.0.lock().unwrap_or_else(|e| e.into_inner());
        file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut file = self.0.lock().unwrap_or_else(|e| e.into_inner());
        file.flush()
    }
}

fn init_tracing(config: &LucpdConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.log_level.to_lowercase()));

    if config.logging.log_file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return;
    }

    match std::fs::File::create(&config.logging.log_file) {
        Ok(file) => {
            let writer = FileWriter(Arc::new(std::sync::Mutex::new(file)));
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(move || writer.clone())
                .init();
        }
        Err(e) => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            warn!(
                "cannot open log file {}: {}, logging to stdout",
                config.logging.log_file, e
            );
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Bad arguments are a warning, not a hard failure.
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e)
            if e.kind() == clap::error::ErrorKind::DisplayHelp
                || e.kind() == clap::error::ErrorKind::DisplayVersion =>
        {
            e.exit()
        }
        Err(e) => {
            eprintln!("argument parse error: {}, continuing with defaults", e);
            Args::default()
        }
    };

    let mut cfg = LucpdConfig::load(&args.config);
    if let Some(port) = args.port {
        cfg.network.port = port;
    }
    init_tracing(&cfg);

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            running.store(false, Ordering::Relaxed);
        })?;
    }

    let listener = TcpListener::bind((cfg.network.ip.as_str(), cfg.network.port))?;
    listener.set_nonblocking(true)?;
    info!(
        "listening on {}:{} (max_clients={})",
        cfg.network.ip, cfg.network.port, cfg.network.max_clients
    );
    debug!(
        "protocol: session_timeout={}ms rate_limit={}ms validate_version={} validate_crc16={}",
        cfg.protocol.session_timeout_ms,
        cfg.protocol.rate_limit_ms,
        cfg.protocol.validate_version,
        cfg.protocol.validate_crc16
    );
    debug!(
        "file: tmp_dir={} retention={}min",
        cfg.file.tmp_dir, cfg.file.file_retention_min
    );

    serve(listener, cfg, running);

    info!("exiting main loop");
    // Give detached session threads a moment to observe the flag.
    thread::sleep(Duration::from_secs(1));
    Ok(())
}

fn serve(listener: TcpListener, cfg: LucpdConfig, running: Arc<AtomicBool>) {
    let active_sessions = Arc::new(AtomicUsize::new(0));
    let session_config = SessionConfig {
        session_timeout: Duration::from_millis(cfg.protocol.session_timeout_ms as u64),
        validate_version: cfg.protocol.validate_version,
    };

    while running.load(Ordering::Relaxed) {
        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(100));
                continue;
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("accept failed: {}", e);
                break;
            }
        };

        if active_sessions.load(Ordering::Relaxed) >= cfg.network.max_clients as usize {
            warn!("max clients reached, rejecting {}", peer);
            continue; // stream drops, closing the connection
        }

        if let Err(e) = configure_session_socket(&stream, &cfg) {
            warn!("cannot configure socket for {}: {}", peer, e);
            continue;
        }

        debug!("session accepted from {}", peer);
        active_sessions.fetch_add(1, Ordering::Relaxed);
        let active = active_sessions.clone();
        let running = running.clone();
        let session_config = session_config.clone();
        thread::spawn(move || {
            let mut session =
                Session::new(Connection::new(stream), session_config, running);
            let final_state = session.run(&SimulatedLogPrep);
            debug!("session from {} finished: {:?}", peer, final_state);
            active.fetch_sub(1, Ordering::Relaxed);
        });
    }
}

fn configure_session_socket(stream: &TcpStream, cfg: &LucpdConfig) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(Duration::from_millis(
        cfg.network.recv_timeout_ms as u64,
    )))?;
    stream.set_write_timeout(Some(Duration::from_millis(
        cfg.network.send_timeout_ms as u64,
    )))?;
    let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(30));
    SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    Ok(())
}
