// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Log server: accepts client connections, answers registration
//! handshakes from the level registry, and forwards received log
//! records to the configured destinations.
//!
//! One thread per client, up to [`MAX_CLIENTS`] concurrent connections.
//! An unregistered application receives a `PureStatus` reply and its
//! connection is closed (server policy).

use chrono::{Local, TimeZone};
use dlt::transport::{recv_frame, send_frame};
use dlt::{
    AppConfig, Level, LevelRegistry, LogFrame, LogMode, LogTimestamp, MessageType, Tlv, TlvType,
};
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Concurrent client connection ceiling.
pub const MAX_CLIENTS: usize = 20;

/// Per-client socket read timeout; bounds how long a client thread
/// blocks before re-checking the shutdown flag.
const CLIENT_POLL: Duration = Duration::from_secs(1);

/// Destinations for received log records, built from the general
/// configuration.
struct LogSink {
    date_format: String,
    persistent_dir: PathBuf,
    volatile_dir: PathBuf,
}

impl LogSink {
    fn emit(&self, app_id: &str, level: Level, timestamp: LogTimestamp, message: &str, mode: LogMode) {
        let when = self.format_timestamp(timestamp);

        if mode.contains(LogMode::CONSOLE) {
            match level {
                Level::Fatal | Level::Error => {
                    tracing::error!(app = %app_id, %when, "{}", message)
                }
                Level::Warn => tracing::warn!(app = %app_id, %when, "{}", message),
                Level::Info => tracing::info!(app = %app_id, %when, "{}", message),
                Level::Debug => tracing::debug!(app = %app_id, %when, "{}", message),
                Level::Verbose => tracing::trace!(app = %app_id, %when, "{}", message),
                Level::Disabled => {}
            }
        }

        let line = format!("{} [{}] {}: {}\n", when, level, app_id, message);
        if mode.contains(LogMode::PERSISTENT) {
            if let Err(e) = append_line(&self.persistent_dir, app_id, &line) {
                warn!("persistent log write failed for {}: {}", app_id, e);
            }
        }
        if mode.contains(LogMode::VOLATILE) {
            if let Err(e) = append_line(&self.volatile_dir, app_id, &line) {
                warn!("volatile log write failed for {}: {}", app_id, e);
            }
        }
    }

    fn format_timestamp(&self, timestamp: LogTimestamp) -> String {
        match Local.timestamp_opt(timestamp.seconds, 0).single() {
            Some(when) => format!(
                "{}.{:03}",
                when.format(&self.date_format),
                timestamp.milliseconds
            ),
            None => format!("{}.{:03}", timestamp.seconds, timestamp.milliseconds),
        }
    }
}

fn append_line(dir: &Path, app_id: &str, line: &str) -> io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(format!("{}.log", app_id)))?;
    file.write_all(line.as_bytes())
}

/// The log collection server.
pub struct DltServer {
    listener: TcpListener,
    registry: Arc<LevelRegistry>,
    sink: Arc<LogSink>,
    max_frame_size: usize,
    running: Arc<AtomicBool>,
    active_clients: Arc<AtomicUsize>,
    client_streams: Arc<Mutex<Vec<TcpStream>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Clonable handle to stop a running server from another thread.
#[derive(Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
    client_streams: Arc<Mutex<Vec<TcpStream>>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        // Force client threads out of blocking receives.
        if let Ok(streams) = self.client_streams.lock() {
            for stream in streams.iter() {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
    }
}

impl DltServer {
    /// Bind the listening socket.
    pub fn bind<A: ToSocketAddrs>(registry: Arc<LevelRegistry>, addr: A) -> io::Result<DltServer> {
        let general = registry.general();
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;

        Ok(DltServer {
            listener,
            registry,
            sink: Arc::new(LogSink {
                date_format: general.date_format.clone(),
                persistent_dir: PathBuf::from(&general.persistent_dir),
                volatile_dir: PathBuf::from(&general.volatile_dir),
            }),
            max_frame_size: dlt::frame::DEFAULT_MAX_FRAME_SIZE,
            running: Arc::new(AtomicBool::new(true)),
            active_clients: Arc::new(AtomicUsize::new(0)),
            client_streams: Arc::new(Mutex::new(Vec::new())),
            handles: Mutex::new(Vec::new()),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: self.running.clone(),
            client_streams: self.client_streams.clone(),
        }
    }

    /// Accept loop; returns once the server has been stopped and every
    /// client thread has been joined.
    pub fn run(&self) {
        info!(
            "log server listening on {:?} (max_clients={})",
            self.listener.local_addr().ok(),
            MAX_CLIENTS
        );

        while self.running.load(Ordering::Relaxed) {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(100));
                    continue;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    break;
                }
            };

            if self.active_clients.load(Ordering::Relaxed) >= MAX_CLIENTS {
                warn!("max clients reached, rejecting {}", peer);
                continue;
            }

            if stream.set_nonblocking(false).is_err()
                || stream.set_read_timeout(Some(CLIENT_POLL)).is_err()
            {
                continue;
            }
            if let Ok(clone) = stream.try_clone() {
                if let Ok(mut streams) = self.client_streams.lock() {
                    streams.push(clone);
                }
            }

            info!("client connected from {}", peer);
            self.active_clients.fetch_add(1, Ordering::Relaxed);
            let handle = {
                let registry = self.registry.clone();
                let sink = self.sink.clone();
                let running = self.running.clone();
                let active = self.active_clients.clone();
                let max_frame_size = self.max_frame_size;
                thread::spawn(move || {
                    handle_client(stream, peer, registry, sink, running, max_frame_size);
                    active.fetch_sub(1, Ordering::Relaxed);
                })
            };
            if let Ok(mut handles) = self.handles.lock() {
                handles.push(handle);
            }
        }

        if let Ok(mut handles) = self.handles.lock() {
            for handle in handles.drain(..) {
                let _ = handle.join();
            }
        }
        info!("log server stopped");
    }
}

fn handle_client(
    mut stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<LevelRegistry>,
    sink: Arc<LogSink>,
    running: Arc<AtomicBool>,
    max_frame_size: usize,
) {
    let mut app_id = String::new();

    while running.load(Ordering::Relaxed) {
        let frame = match recv_frame(&mut stream, max_frame_size) {
            Ok(frame) => frame,
            Err(dlt::ProtocolError::Io(ref e))
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                continue
            }
            Err(dlt::ProtocolError::Io(_)) => break,
            Err(e) => {
                debug!("dropping malformed frame from {}: {}", peer, e);
                continue;
            }
        };

        match frame.msg_type {
            MessageType::RequestConfig => {
                if !handle_init_request(&mut stream, &frame, &registry, &mut app_id) {
                    break;
                }
            }
            MessageType::SingleLog => handle_single_log(&frame, &registry, &sink),
            MessageType::MultipleLogs => handle_batch_log(&frame, &registry, &sink),
            other => {
                debug!("ignoring message type {:?} from {}", other, peer);
            }
        }
    }

    debug!("client {} ({}) disconnected", peer, app_id);
}

/// Answer a registration handshake. Returns `false` when the connection
/// must be closed (unregistered application or send failure).
fn handle_init_request(
    stream: &mut TcpStream,
    request: &LogFrame,
    registry: &LevelRegistry,
    app_id: &mut String,
) -> bool {
    let Some(requested) = request.find_tlv(TlvType::AppId).and_then(Tlv::as_str) else {
        return false;
    };
    *app_id = requested.to_string();

    match registry.app(requested) {
        Some(app_cfg) => match config_status_reply(&app_cfg, request) {
            Ok(reply) => {
                if let Err(e) = send_frame(stream, &reply) {
                    warn!("config reply to {} failed: {}", requested, e);
                    return false;
                }
                info!("application {} registered", requested);
                true
            }
            Err(e) => {
                warn!("cannot build config reply for {}: {}", requested, e);
                false
            }
        },
        None => {
            info!("application {} is not registered, closing", requested);
            if let Ok(reply) = pure_status_reply(requested, request) {
                let _ = send_frame(stream, &reply);
            }
            false
        }
    }
}

fn config_status_reply(app_cfg: &AppConfig, request: &LogFrame) -> dlt::ProtocolResult<LogFrame> {
    let mut reply = LogFrame::new(
        MessageType::ConfigStatus,
        request.sequence,
        0,
        request.max_frame_size(),
    );
    reply.add_string_tlv(TlvType::StatusMessage, "OK")?;
    reply.add_string_tlv(TlvType::AppId, &app_cfg.app_id)?;
    reply.add_level_tlv(TlvType::ThresholdLevel, app_cfg.threshold)?;
    for (tlv_type, level) in [
        (TlvType::FatalMode, Level::Fatal),
        (TlvType::ErrorMode, Level::Error),
        (TlvType::WarningMode, Level::Warn),
        (TlvType::InfoMode, Level::Info),
        (TlvType::DebugMode, Level::Debug),
        (TlvType::VerboseMode, Level::Verbose),
    ] {
        let enabled = !app_cfg.modes[level as usize].is_none();
        reply.add_u8_tlv(tlv_type, enabled as u8)?;
    }
    reply.serialize()?;
    Ok(reply)
}

fn pure_status_reply(app_id: &str, request: &LogFrame) -> dlt::ProtocolResult<LogFrame> {
    let mut reply = LogFrame::new(
        MessageType::PureStatus,
        request.sequence,
        0,
        request.max_frame_size(),
    );
    reply.add_string_tlv(TlvType::AppId, app_id)?;
    reply.add_string_tlv(TlvType::StatusMessage, "Application not registered")?;
    reply.serialize()?;
    Ok(reply)
}

/// Route one record through the app's (or general) policy.
fn forward_record(
    registry: &LevelRegistry,
    sink: &LogSink,
    app_id: &str,
    level: Level,
    timestamp: LogTimestamp,
    message: &str,
) {
    let (threshold, mode) = match registry.app(app_id) {
        Some(app_cfg) => (app_cfg.threshold, app_cfg.modes[level as usize]),
        None => {
            let general = registry.general();
            (general.threshold, general.modes[level as usize])
        }
    };
    if level == Level::Disabled || level > threshold || mode.is_none() {
        return;
    }
    sink.emit(app_id, level, timestamp, message, mode);
}

fn handle_single_log(frame: &LogFrame, registry: &LevelRegistry, sink: &LogSink) {
    let app_id = frame.find_tlv(TlvType::AppId).and_then(Tlv::as_str);
    let level = frame.find_tlv(TlvType::EntryLevel).and_then(Tlv::as_level);
    let timestamp = frame.find_tlv(TlvType::Timestamp).and_then(Tlv::as_timestamp);
    let message = frame.find_tlv(TlvType::LogMessage).and_then(Tlv::as_str);

    if let (Some(app_id), Some(level), Some(timestamp), Some(message)) =
        (app_id, level, timestamp, message)
    {
        forward_record(registry, sink, app_id, level, timestamp, message);
    }
}

fn handle_batch_log(frame: &LogFrame, registry: &LevelRegistry, sink: &LogSink) {
    let tlvs = frame.tlvs();
    let Some(app_id) = tlvs.first().and_then(Tlv::as_str) else {
        return;
    };
    for triple in tlvs[1..].chunks(3) {
        if triple.len() != 3 {
            break;
        }
        let level = triple[0].as_level();
        let timestamp = triple[1].as_timestamp();
        let message = triple[2].as_str();
        if let (Some(level), Some(timestamp), Some(message)) = (level, timestamp, message) {
            forward_record(registry, sink, app_id, level, timestamp, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlt::{Client, ClientError, ProtocolConfig};
    use lucp_config::ConfigFile;
    use std::io::Cursor;

    fn test_registry(volatile_dir: &Path) -> Arc<LevelRegistry> {
        let text = format!(
            "[general]\n\
             threshold_level = debug\n\
             log_volatile_storage_dir = {}\n\
             [svc]\n\
             threshold_level = debug\n\
             fatal.mode = console\n\
             error.mode = console\n\
             warning.mode = console\n\
             info.mode = volatile\n\
             debug.mode = console\n",
            volatile_dir.display()
        );
        let store = ConfigFile::from_reader(Cursor::new(text)).unwrap();
        let registry = Arc::new(LevelRegistry::new());
        registry.load_store(&store);
        registry
    }

    fn start_server(registry: Arc<LevelRegistry>) -> (SocketAddr, StopHandle, thread::JoinHandle<()>) {
        let server = DltServer::bind(registry, "127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();
        let stop = server.stop_handle();
        let runner = thread::spawn(move || server.run());
        (addr, stop, runner)
    }

    fn client_config(addr: SocketAddr, app_id: &str) -> ProtocolConfig {
        let mut config =
            ProtocolConfig::new(&addr.ip().to_string(), addr.port(), app_id, Level::Info);
        config.timeout = Duration::from_secs(5);
        config
    }

    #[test]
    fn test_registered_handshake_and_forwarding() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = test_registry(tmp.path());
        let (addr, stop, runner) = start_server(registry);

        let client = Client::init_with_config(client_config(addr, "svc")).unwrap();
        let policy = client.policy();
        assert_eq!(policy.threshold, Level::Debug);
        assert!(policy.debug);
        // Verbose has no mode key configured for svc.
        assert!(!policy.verbose);

        // Info is routed to the volatile store; wait for the flush
        // thread to deliver and the server to append.
        client.info("stored line").unwrap();
        let log_path = tmp.path().join("svc.log");
        let mut contents = String::new();
        for _ in 0..50 {
            thread::sleep(Duration::from_millis(100));
            contents = std::fs::read_to_string(&log_path).unwrap_or_default();
            if !contents.is_empty() {
                break;
            }
        }
        assert!(
            contents.contains("stored line"),
            "expected forwarded record, got {:?}",
            contents
        );

        client.close();
        stop.stop();
        runner.join().unwrap();
    }

    #[test]
    fn test_unregistered_client_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = test_registry(tmp.path());
        let (addr, stop, runner) = start_server(registry);

        let result = Client::init_with_config(client_config(addr, "ghost"));
        assert!(matches!(result, Err(ClientError::NotRegistered(_))));

        stop.stop();
        runner.join().unwrap();
    }
}
