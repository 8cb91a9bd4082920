// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-application client handle.
//!
//! `Client::init` performs a synchronous registration handshake with the
//! log server, caches the pushed log policy, and spawns two background
//! threads:
//!
//! - the **flush** thread merges buffered single-log frames into
//!   `MultipleLogs` batches (at most 100 records each) and sends them
//!   over a pooled connection;
//! - the **receiver** thread polls a pooled connection and applies any
//!   server-initiated policy frame to the cached policy.
//!
//! A log call classifies against the cached policy without I/O, builds a
//! frame from the pool, and enqueues it. When the queue is saturated the
//! record is sent synchronously instead of being dropped.

use crate::config::ProtocolConfig;
use crate::error::{ClientError, ProtocolResult};
use crate::frame::{LogFrame, LogTimestamp, MessageType, Tlv, TlvType};
use crate::level::Level;
use crate::pool::{ConnectionPool, FramePool};
use crate::queue::LogQueue;
use crate::transport;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Connections kept per client.
const CONNECTION_POOL_CAPACITY: usize = 3;

/// Single-log frames merged into one batch frame.
const BATCH_MAX_LOGS: usize = 100;

/// Flush thread pause when the buffer is empty.
const FLUSH_IDLE: Duration = Duration::from_millis(100);

/// Receiver thread read-timeout per poll.
const RECEIVER_POLL: Duration = Duration::from_secs(1);

/// Cached log policy: threshold plus per-severity enable flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelPolicy {
    pub threshold: Level,
    pub fatal: bool,
    pub error: bool,
    pub warn: bool,
    pub info: bool,
    pub debug: bool,
    pub verbose: bool,
}

impl Default for LevelPolicy {
    fn default() -> Self {
        Self {
            threshold: Level::Info,
            fatal: true,
            error: true,
            warn: true,
            info: true,
            debug: false,
            verbose: false,
        }
    }
}

impl LevelPolicy {
    /// Should a record at `level` be forwarded?
    pub fn allows(&self, level: Level) -> bool {
        if level == Level::Disabled || level > self.threshold {
            return false;
        }
        match level {
            Level::Fatal => self.fatal,
            Level::Error => self.error,
            Level::Warn => self.warn,
            Level::Info => self.info,
            Level::Debug => self.debug,
            Level::Verbose => self.verbose,
            Level::Disabled => false,
        }
    }

    /// Overlay the policy TLVs present in `frame`; absent TLVs leave the
    /// current values untouched.
    pub fn apply_frame(&mut self, frame: &LogFrame) {
        if let Some(threshold) = frame.find_tlv(TlvType::ThresholdLevel).and_then(Tlv::as_level)
        {
            self.threshold = threshold;
        }
        let slots: [(&mut bool, TlvType); 6] = [
            (&mut self.fatal, TlvType::FatalMode),
            (&mut self.error, TlvType::ErrorMode),
            (&mut self.warn, TlvType::WarningMode),
            (&mut self.info, TlvType::InfoMode),
            (&mut self.debug, TlvType::DebugMode),
            (&mut self.verbose, TlvType::VerboseMode),
        ];
        for (slot, tlv_type) in slots {
            if let Some(enabled) = frame.find_tlv(tlv_type).and_then(Tlv::as_u8) {
                *slot = enabled != 0;
            }
        }
    }
}

/// A registered per-application logging handle.
pub struct Client {
    config: Arc<ProtocolConfig>,
    conn_pool: Arc<ConnectionPool>,
    frame_pool: Arc<FramePool>,
    queue: Arc<LogQueue>,
    policy: Arc<Mutex<LevelPolicy>>,
    running: Arc<AtomicBool>,
    sequence: Arc<AtomicU16>,
    flush_thread: Option<JoinHandle<()>>,
    recv_thread: Option<JoinHandle<()>>,
}

impl Client {
    /// Register `app_id` with the server named by `DLT_SERVER_IP` /
    /// `DLT_SERVER_PORT` (or the defaults).
    pub fn init(app_id: &str) -> Result<Client, ClientError> {
        let policy = LevelPolicy::default();
        Self::init_with_config(ProtocolConfig::from_env(app_id, policy.threshold))
    }

    /// Register with an explicit protocol configuration.
    pub fn init_with_config(config: ProtocolConfig) -> Result<Client, ClientError> {
        let config = Arc::new(config);
        let mut policy = LevelPolicy::default();

        // Synchronous handshake: the handle only exists once the server
        // has answered, so no log call can race the registration.
        let mut stream = transport::connect(&config)?;
        let request = LogFrame::config_request(&config.app_id, 1, config.max_frame_size)?;
        transport::send_frame(&mut stream, &request)?;
        let reply = transport::recv_frame(&mut stream, config.max_frame_size)?;
        drop(stream);

        match reply.msg_type {
            MessageType::ConfigStatus => policy.apply_frame(&reply),
            MessageType::PureStatus => {
                return Err(ClientError::NotRegistered(config.app_id.clone()))
            }
            other => return Err(ClientError::UnexpectedReply(other as u8)),
        }

        let conn_pool = Arc::new(ConnectionPool::new(
            CONNECTION_POOL_CAPACITY,
            (*config).clone(),
        ));
        let frame_pool = Arc::new(FramePool::new());
        let queue = Arc::new(LogQueue::new());
        let policy = Arc::new(Mutex::new(policy));
        let running = Arc::new(AtomicBool::new(true));
        let sequence = Arc::new(AtomicU16::new(2));

        let flush_thread = {
            let running = running.clone();
            let queue = queue.clone();
            let frame_pool = frame_pool.clone();
            let conn_pool = conn_pool.clone();
            let config = config.clone();
            let sequence = sequence.clone();
            thread::spawn(move || {
                flush_loop(running, queue, frame_pool, conn_pool, config, sequence)
            })
        };
        let recv_thread = {
            let running = running.clone();
            let conn_pool = conn_pool.clone();
            let policy = policy.clone();
            let config = config.clone();
            thread::spawn(move || receiver_loop(running, conn_pool, policy, config))
        };

        Ok(Client {
            config,
            conn_pool,
            frame_pool,
            queue,
            policy,
            running,
            sequence,
            flush_thread: Some(flush_thread),
            recv_thread: Some(recv_thread),
        })
    }

    /// Application identifier this handle logs under.
    pub fn app_id(&self) -> &str {
        &self.config.app_id
    }

    /// Snapshot of the cached policy.
    pub fn policy(&self) -> LevelPolicy {
        *self.policy.lock()
    }

    pub fn fatal(&self, message: &str) -> Result<(), ClientError> {
        self.log(Level::Fatal, message)
    }

    pub fn error(&self, message: &str) -> Result<(), ClientError> {
        self.log(Level::Error, message)
    }

    pub fn warn(&self, message: &str) -> Result<(), ClientError> {
        self.log(Level::Warn, message)
    }

    pub fn info(&self, message: &str) -> Result<(), ClientError> {
        self.log(Level::Info, message)
    }

    pub fn debug(&self, message: &str) -> Result<(), ClientError> {
        self.log(Level::Debug, message)
    }

    pub fn verbose(&self, message: &str) -> Result<(), ClientError> {
        self.log(Level::Verbose, message)
    }

    fn log(&self, level: Level, message: &str) -> Result<(), ClientError> {
        if !self.policy.lock().allows(level) {
            // Classified out: no frame, no I/O.
            return Ok(());
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let mut frame = self.frame_pool.acquire(
            self.config.max_frame_size,
            MessageType::SingleLog,
            sequence,
            0,
        );
        if let Err(e) = fill_single_log(&mut frame, &self.config.app_id, level, message) {
            self.frame_pool.release(frame);
            return Err(e.into());
        }

        match self.queue.enqueue(frame) {
            Ok(()) => Ok(()),
            Err(frame) => {
                // Saturated buffer: one synchronous send instead of a drop.
                let mut stream = self.conn_pool.acquire()?;
                let sent = transport::send_frame(&mut stream, &frame);
                self.conn_pool.release(stream);
                self.frame_pool.release(frame);
                sent?;
                Ok(())
            }
        }
    }

    /// Stop both background threads and drop buffered frames.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if !self.running.swap(false, Ordering::Relaxed) {
            return;
        }
        self.queue.close();
        if let Some(handle) = self.flush_thread.take() {
            if handle.join().is_err() {
                log::error!("flush thread panicked");
            }
        }
        if let Some(handle) = self.recv_thread.take() {
            if handle.join().is_err() {
                log::error!("receiver thread panicked");
            }
        }
        while self.queue.try_dequeue().is_some() {}
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn fill_single_log(
    frame: &mut LogFrame,
    app_id: &str,
    level: Level,
    message: &str,
) -> ProtocolResult<()> {
    frame.add_string_tlv(TlvType::AppId, app_id)?;
    frame.add_level_tlv(TlvType::EntryLevel, level)?;
    frame.add_timestamp_tlv(LogTimestamp::now())?;
    frame.add_string_tlv(TlvType::LogMessage, message)?;
    frame.serialize()
}

/// Merge up to [`BATCH_MAX_LOGS`] buffered single-log frames into one
/// serialized batch frame. Returns `None` when the buffer was empty.
pub(crate) fn drain_batch(
    queue: &LogQueue,
    frame_pool: &FramePool,
    app_id: &str,
    sequence: u16,
    max_frame_size: usize,
) -> ProtocolResult<Option<LogFrame>> {
    let mut batch: Option<LogFrame> = None;
    let mut merged = 0usize;

    while merged < BATCH_MAX_LOGS {
        let Some(single) = queue.try_dequeue() else {
            break;
        };

        let level = single.find_tlv(TlvType::EntryLevel).and_then(Tlv::as_level);
        let timestamp = single.find_tlv(TlvType::Timestamp).and_then(Tlv::as_timestamp);
        let message = single
            .find_tlv(TlvType::LogMessage)
            .and_then(Tlv::as_str)
            .map(str::to_string);

        if let (Some(level), Some(timestamp), Some(message)) = (level, timestamp, message) {
            if batch.is_none() {
                batch = Some(LogFrame::batch(app_id, sequence, max_frame_size)?);
            }
            if let Some(ref mut frame) = batch {
                frame.add_batch_log(level, &message, timestamp)?;
                merged += 1;
            }
        }
        frame_pool.release(single);
    }

    if let Some(ref mut frame) = batch {
        frame.serialize()?;
    }
    Ok(batch)
}

fn flush_loop(
    running: Arc<AtomicBool>,
    queue: Arc<LogQueue>,
    frame_pool: Arc<FramePool>,
    conn_pool: Arc<ConnectionPool>,
    config: Arc<ProtocolConfig>,
    sequence: Arc<AtomicU16>,
) {
    while running.load(Ordering::Relaxed) {
        let seq = sequence.fetch_add(1, Ordering::Relaxed);
        let batch = match drain_batch(
            &queue,
            &frame_pool,
            &config.app_id,
            seq,
            config.max_frame_size,
        ) {
            Ok(Some(batch)) => batch,
            Ok(None) => {
                thread::sleep(FLUSH_IDLE);
                continue;
            }
            Err(e) => {
                log::warn!("batch assembly failed: {}", e);
                thread::sleep(FLUSH_IDLE);
                continue;
            }
        };

        match conn_pool.acquire() {
            Ok(mut stream) => match transport::send_frame(&mut stream, &batch) {
                Ok(()) => conn_pool.release(stream),
                Err(e) => {
                    log::warn!("batch send failed: {}", e);
                    // Dead connection: drop it, the pool will reopen.
                }
            },
            Err(e) => {
                log::warn!("no connection for batch, records dropped: {}", e);
            }
        }
    }
}

fn receiver_loop(
    running: Arc<AtomicBool>,
    conn_pool: Arc<ConnectionPool>,
    policy: Arc<Mutex<LevelPolicy>>,
    config: Arc<ProtocolConfig>,
) {
    while running.load(Ordering::Relaxed) {
        let mut stream = match conn_pool.acquire() {
            Ok(stream) => stream,
            Err(_) => {
                thread::sleep(Duration::from_secs(1));
                continue;
            }
        };
        if stream.set_read_timeout(Some(RECEIVER_POLL)).is_err() {
            continue; // broken socket: drop it
        }

        match transport::recv_frame(&mut stream, config.max_frame_size) {
            Ok(frame) => {
                match frame.msg_type {
                    MessageType::ConfigStatus
                    | MessageType::PureStatus
                    | MessageType::UpdateConfig => {
                        policy.lock().apply_frame(&frame);
                        log::debug!("applied server policy update");
                    }
                    _ => {}
                }
                conn_pool.release(stream);
            }
            Err(crate::error::ProtocolError::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                // Idle poll: nothing pushed.
                conn_pool.release(stream);
            }
            Err(_) => {
                // Parse or hard I/O failure: discard this connection.
            }
        }
    }
}
