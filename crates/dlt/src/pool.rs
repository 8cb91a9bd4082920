// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-capacity LIFO pools for connections and frames.
//!
//! Both pools follow the same discipline: `acquire` pops the most
//! recently released resource or creates a fresh one, `release` pushes
//! back while there is room and otherwise lets the resource drop. The
//! mutex is held only around the stack operation.

use crate::config::ProtocolConfig;
use crate::frame::{LogFrame, MessageType};
use crate::transport;
use parking_lot::Mutex;
use std::io;
use std::net::TcpStream;

/// Frame pool capacity.
pub const FRAME_POOL_CAPACITY: usize = 32;

/// LIFO stack of idle connections to the configured server.
pub struct ConnectionPool {
    sockets: Mutex<Vec<TcpStream>>,
    capacity: usize,
    config: ProtocolConfig,
}

impl ConnectionPool {
    pub fn new(capacity: usize, config: ProtocolConfig) -> Self {
        Self {
            sockets: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            config,
        }
    }

    /// Pop an idle connection, or open a new one.
    pub fn acquire(&self) -> io::Result<TcpStream> {
        if let Some(stream) = self.sockets.lock().pop() {
            return Ok(stream);
        }
        transport::connect(&self.config)
    }

    /// Return a connection; closed when the pool is full.
    pub fn release(&self, stream: TcpStream) {
        let mut sockets = self.sockets.lock();
        if sockets.len() < self.capacity {
            sockets.push(stream);
        }
        // Otherwise the stream drops here, closing the socket.
    }

    /// Number of idle pooled connections.
    pub fn idle(&self) -> usize {
        self.sockets.lock().len()
    }
}

/// LIFO stack of reusable frame skeletons.
///
/// Released frames keep their TLV slot vector allocation; values are
/// freed. A saturated pool drops the frame outright.
#[derive(Default)]
pub struct FramePool {
    frames: Mutex<Vec<LogFrame>>,
}

impl FramePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a recycled frame re-stamped for `msg_type`, or build a new one.
    pub fn acquire(
        &self,
        max_frame_size: usize,
        msg_type: MessageType,
        sequence: u16,
        status: u8,
    ) -> LogFrame {
        if let Some(mut frame) = self.frames.lock().pop() {
            frame.reset(msg_type, sequence, status);
            return frame;
        }
        LogFrame::new(msg_type, sequence, status, max_frame_size)
    }

    /// Recycle a frame, clearing its contents.
    pub fn release(&self, mut frame: LogFrame) {
        frame.reset(frame.msg_type, 0, 0);
        let mut frames = self.frames.lock();
        if frames.len() < FRAME_POOL_CAPACITY {
            frames.push(frame);
        }
    }

    /// Number of pooled frames.
    pub fn idle(&self) -> usize {
        self.frames.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{TlvType, DEFAULT_MAX_FRAME_SIZE};
    use crate::level::Level;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_frame_pool_recycles() {
        let pool = FramePool::new();
        let mut frame =
            pool.acquire(DEFAULT_MAX_FRAME_SIZE, MessageType::SingleLog, 1, 0);
        frame.add_string_tlv(TlvType::AppId, "svc").unwrap();
        pool.release(frame);
        assert_eq!(pool.idle(), 1);

        let frame = pool.acquire(DEFAULT_MAX_FRAME_SIZE, MessageType::MultipleLogs, 7, 0);
        assert_eq!(pool.idle(), 0);
        assert_eq!(frame.msg_type, MessageType::MultipleLogs);
        assert_eq!(frame.sequence, 7);
        assert!(frame.tlvs().is_empty());
        assert!(frame.raw().is_none());
    }

    #[test]
    fn test_frame_pool_caps_at_capacity() {
        let pool = FramePool::new();
        for _ in 0..FRAME_POOL_CAPACITY + 5 {
            pool.release(LogFrame::new(
                MessageType::SingleLog,
                0,
                0,
                DEFAULT_MAX_FRAME_SIZE,
            ));
        }
        assert_eq!(pool.idle(), FRAME_POOL_CAPACITY);
    }

    #[test]
    fn test_connection_pool_reuses_sockets() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let acceptor = thread::spawn(move || {
            let mut accepted = Vec::new();
            // Only one physical connection should ever be opened.
            let (stream, _) = listener.accept().unwrap();
            accepted.push(stream);
            accepted
        });

        let config = ProtocolConfig::new(
            &addr.ip().to_string(),
            addr.port(),
            "svc",
            Level::Info,
        );
        let pool = ConnectionPool::new(3, config);

        let first = pool.acquire().unwrap();
        pool.release(first);
        assert_eq!(pool.idle(), 1);
        let _second = pool.acquire().unwrap();
        assert_eq!(pool.idle(), 0);

        acceptor.join().unwrap();
    }

    #[test]
    fn test_connection_pool_closes_overflow() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let acceptor = thread::spawn(move || {
            let mut streams = Vec::new();
            for _ in 0..2 {
                let (stream, _) = listener.accept().unwrap();
                streams.push(stream);
            }
            streams
        });

        let config = ProtocolConfig::new(
            &addr.ip().to_string(),
            addr.port(),
            "svc",
            Level::Info,
        );
        let pool = ConnectionPool::new(1, config);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        pool.release(a);
        pool.release(b); // over capacity: closed

        assert_eq!(pool.idle(), 1);
        let mut server_streams = acceptor.join().unwrap();
        // The second accepted stream was closed by the overflow release.
        let mut buf = [0u8; 1];
        server_streams[1]
            .set_read_timeout(Some(std::time::Duration::from_secs(2)))
            .unwrap();
        assert_eq!(server_streams[1].read(&mut buf).unwrap(), 0);
    }
}
