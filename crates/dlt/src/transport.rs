// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Length-prefix framing over blocking TCP.
//!
//! Each frame on the wire is preceded by a 4-byte big-endian length
//! giving the exact encoded frame byte count. The receiver reads exactly
//! that many bytes and then parses; lengths of zero or above the
//! configured maximum are rejected before any payload read.

use crate::config::ProtocolConfig;
use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::LogFrame;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

/// Open a connection to the configured server with the configured
/// connect/read/write timeouts applied.
pub fn connect(config: &ProtocolConfig) -> io::Result<TcpStream> {
    let addrs = (config.server_ip.as_str(), config.server_port).to_socket_addrs()?;
    let mut last_err = io::Error::new(io::ErrorKind::AddrNotAvailable, "no address resolved");
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, config.timeout) {
            Ok(stream) => {
                stream.set_read_timeout(Some(config.timeout))?;
                stream.set_write_timeout(Some(config.timeout))?;
                return Ok(stream);
            }
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

/// Send one serialized frame. The frame must carry its raw bytes
/// (built by `serialize` or retained by `parse`).
pub fn send_frame(stream: &mut TcpStream, frame: &LogFrame) -> ProtocolResult<()> {
    let raw = frame.raw().ok_or(ProtocolError::NotSerialized)?;
    stream.write_all(&(raw.len() as u32).to_be_bytes())?;
    stream.write_all(raw)?;
    Ok(())
}

/// Receive one frame: length prefix, exact body read, then parse.
pub fn recv_frame(stream: &mut TcpStream, max_frame_size: usize) -> ProtocolResult<LogFrame> {
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix)?;
    let length = u32::from_be_bytes(prefix) as usize;

    if length == 0 {
        return Err(ProtocolError::InvalidFrame("zero-length frame"));
    }
    if length > max_frame_size {
        return Err(ProtocolError::FrameTooLarge {
            size: length,
            max: max_frame_size,
        });
    }

    let mut body = vec![0u8; length];
    stream.read_exact(&mut body)?;
    LogFrame::parse(&body, max_frame_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::DEFAULT_MAX_FRAME_SIZE;
    use crate::level::Level;
    use std::net::TcpListener;

    fn stream_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn test_send_recv_roundtrip() {
        let (mut client, mut server) = stream_pair();
        let frame =
            LogFrame::single_log("svc", 9, Level::Error, "boom", DEFAULT_MAX_FRAME_SIZE).unwrap();
        send_frame(&mut client, &frame).unwrap();

        let received = recv_frame(&mut server, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(received.sequence, 9);
        assert_eq!(received.raw(), frame.raw());
    }

    #[test]
    fn test_send_requires_serialized_frame() {
        let (mut client, _server) = stream_pair();
        let frame = LogFrame::batch("svc", 1, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert!(matches!(
            send_frame(&mut client, &frame),
            Err(ProtocolError::NotSerialized)
        ));
    }

    #[test]
    fn test_recv_rejects_zero_length() {
        let (mut client, mut server) = stream_pair();
        client.write_all(&0u32.to_be_bytes()).unwrap();
        assert!(matches!(
            recv_frame(&mut server, DEFAULT_MAX_FRAME_SIZE),
            Err(ProtocolError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_recv_rejects_oversize_length() {
        let (mut client, mut server) = stream_pair();
        client
            .write_all(&(DEFAULT_MAX_FRAME_SIZE as u32 + 1).to_be_bytes())
            .unwrap();
        assert!(matches!(
            recv_frame(&mut server, DEFAULT_MAX_FRAME_SIZE),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_recv_peer_close_is_io_error() {
        let (client, mut server) = stream_pair();
        drop(client);
        assert!(matches!(
            recv_frame(&mut server, DEFAULT_MAX_FRAME_SIZE),
            Err(ProtocolError::Io(_))
        ));
    }
}
