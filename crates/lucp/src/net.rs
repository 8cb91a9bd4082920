// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection framing for LUCP over TCP.
//!
//! TCP is a stream protocol: a single read may deliver half a frame or
//! several frames stuck together. [`Connection`] keeps a reassembly
//! buffer per socket and hands out exactly one decoded frame per
//! [`Connection::recv`] call.

use crate::frame::{self, Frame, PackError, Unpacked, HEADER_SIZE, MAX_PAYLOAD};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;
use thiserror::Error;

/// Reassembly buffer size per connection.
pub const RECV_BUFFER_SIZE: usize = 2048;

/// Errors from connection-level operations.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("codec error: {0}")]
    Pack(#[from] PackError),

    #[error("peer closed the connection")]
    ConnectionClosed,

    #[error("corrupt frame in stream")]
    Corrupt,

    #[error("reassembly buffer overflow")]
    BufferOverflow,

    #[error("timed out waiting for data")]
    Timeout,

    #[error("no matching reply after {0} attempts")]
    RetriesExhausted(u32),
}

/// A LUCP connection: socket plus reassembly state.
pub struct Connection {
    stream: TcpStream,
    rbuf: Box<[u8; RECV_BUFFER_SIZE]>,
    rlen: usize,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            rbuf: Box::new([0u8; RECV_BUFFER_SIZE]),
            rlen: 0,
        }
    }

    /// Underlying socket, e.g. for timeout configuration.
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Encode and send one frame. Short writes and peer resets error out.
    pub fn send(&mut self, frame: &Frame) -> Result<(), NetError> {
        let mut scratch = [0u8; HEADER_SIZE + MAX_PAYLOAD];
        let written = frame::pack(frame, &mut scratch)?;
        self.stream.write_all(&scratch[..written])?;
        Ok(())
    }

    /// Receive exactly one frame, reading from the socket as needed.
    ///
    /// Buffered surplus bytes are kept for the next call. A corrupt
    /// stream clears the buffer. A socket read timeout surfaces as
    /// [`NetError::Timeout`] with buffered partial data preserved.
    pub fn recv(&mut self) -> Result<Frame, NetError> {
        loop {
            match frame::unpack(&self.rbuf[..self.rlen]) {
                Unpacked::Complete { frame, consumed } => {
                    self.rbuf.copy_within(consumed..self.rlen, 0);
                    self.rlen -= consumed;
                    return Ok(frame);
                }
                Unpacked::Corrupt => {
                    self.rlen = 0;
                    return Err(NetError::Corrupt);
                }
                Unpacked::Incomplete => {
                    if self.rlen == self.rbuf.len() {
                        self.rlen = 0;
                        return Err(NetError::BufferOverflow);
                    }
                    let read = match self.stream.read(&mut self.rbuf[self.rlen..]) {
                        Ok(0) => return Err(NetError::ConnectionClosed),
                        Ok(n) => n,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e)
                            if e.kind() == io::ErrorKind::WouldBlock
                                || e.kind() == io::ErrorKind::TimedOut =>
                        {
                            return Err(NetError::Timeout)
                        }
                        Err(e) => return Err(NetError::Io(e)),
                    };
                    self.rlen += read;
                }
            }
        }
    }

    /// Send `request` and wait for a reply of type `expect_type` carrying
    /// the request's sequence number.
    ///
    /// Each attempt waits up to `timeout` for readability. Frames with a
    /// different type or sequence are consumed and ignored; a timed-out
    /// attempt resends the request. Errors out once `n_retries` attempts
    /// are exhausted.
    pub fn send_with_retries(
        &mut self,
        request: &Frame,
        expect_type: u8,
        n_retries: u32,
        timeout: Duration,
    ) -> Result<Frame, NetError> {
        for _ in 0..n_retries {
            self.send(request)?;

            let previous = self.stream.read_timeout()?;
            self.stream.set_read_timeout(Some(timeout))?;
            let received = self.recv();
            self.stream.set_read_timeout(previous)?;

            match received {
                Ok(reply)
                    if reply.msg_type == expect_type && reply.sequence == request.sequence =>
                {
                    return Ok(reply)
                }
                Ok(other) => {
                    log::debug!(
                        "ignoring unrelated frame (type {:#04x}, seq {})",
                        other.msg_type,
                        other.sequence
                    );
                }
                Err(NetError::Timeout) => {}
                Err(e) => return Err(e),
            }
        }
        Err(NetError::RetriesExhausted(n_retries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{msg, status};
    use std::net::TcpListener;
    use std::thread;

    fn pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (Connection::new(server), client)
    }

    fn encode(frame: &Frame) -> Vec<u8> {
        let mut buf = vec![0u8; frame.encoded_len()];
        frame::pack(frame, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_send_recv_roundtrip() {
        let (mut conn, mut peer) = pair();
        let frame = Frame::new(42, msg::UPLOAD_REQUEST, 0, b"hello");
        peer.write_all(&encode(&frame)).unwrap();
        assert_eq!(conn.recv().unwrap(), frame);

        let reply = Frame::new(42, msg::ACK_START, status::SUCCESS, &[]);
        conn.send(&reply).unwrap();
        let mut buf = vec![0u8; reply.encoded_len()];
        peer.read_exact(&mut buf).unwrap();
        match frame::unpack(&buf) {
            Unpacked::Complete { frame, .. } => assert_eq!(frame, reply),
            other => panic!("expected Complete, got {:?}", other),
        }
    }

    #[test]
    fn test_recv_reassembles_fragments() {
        let (mut conn, mut peer) = pair();
        let frame = Frame::new(7, msg::NOTIFY_DONE, status::SUCCESS, b"fragmented payload");
        let bytes = encode(&frame);
        let split = HEADER_SIZE - 3;
        let (head, tail) = bytes.split_at(split);
        let tail = tail.to_vec();
        peer.write_all(head).unwrap();
        peer.flush().unwrap();
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            peer.write_all(&tail).unwrap();
            peer
        });
        assert_eq!(conn.recv().unwrap(), frame);
        writer.join().unwrap();
    }

    #[test]
    fn test_recv_handles_sticky_frames() {
        let (mut conn, mut peer) = pair();
        let first = Frame::new(1, msg::FTP_LOGIN_RESULT, status::SUCCESS, &[]);
        let second = Frame::new(1, msg::FTP_DOWNLOAD_RESULT, status::SUCCESS, &[]);
        let mut bytes = encode(&first);
        bytes.extend_from_slice(&encode(&second));
        peer.write_all(&bytes).unwrap();
        assert_eq!(conn.recv().unwrap(), first);
        assert_eq!(conn.recv().unwrap(), second);
    }

    #[test]
    fn test_recv_corrupt_clears_buffer() {
        let (mut conn, mut peer) = pair();
        peer.write_all(&[0u8; HEADER_SIZE]).unwrap();
        assert!(matches!(conn.recv(), Err(NetError::Corrupt)));
        assert_eq!(conn.rlen, 0);
    }

    #[test]
    fn test_recv_peer_close() {
        let (mut conn, peer) = pair();
        drop(peer);
        assert!(matches!(conn.recv(), Err(NetError::ConnectionClosed)));
    }

    #[test]
    fn test_send_with_retries_matches_sequence() {
        let (mut conn, mut peer) = pair();
        let request = Frame::new(100, msg::UPLOAD_REQUEST, 0, b"req");

        let responder = thread::spawn(move || {
            let mut discard = [0u8; 256];
            let _ = peer.read(&mut discard).unwrap();
            // Wrong sequence first, then the real reply.
            let stale = Frame::new(99, msg::ACK_START, status::SUCCESS, &[]);
            let good = Frame::new(100, msg::ACK_START, status::SUCCESS, &[]);
            peer.write_all(&encode(&stale)).unwrap();
            peer.write_all(&encode(&good)).unwrap();
            peer
        });

        let reply = conn
            .send_with_retries(&request, msg::ACK_START, 3, Duration::from_secs(2))
            .unwrap();
        assert_eq!(reply.sequence, 100);
        responder.join().unwrap();
    }

    #[test]
    fn test_send_with_retries_exhausts() {
        let (mut conn, peer) = pair();
        let request = Frame::new(5, msg::UPLOAD_REQUEST, 0, &[]);
        let result =
            conn.send_with_retries(&request, msg::ACK_START, 2, Duration::from_millis(50));
        assert!(matches!(result, Err(NetError::RetriesExhausted(2))));
        drop(peer);
    }
}
