// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! LUCP frame codec.
//!
//! The frame is modeled as a pure value type; encoding and decoding are
//! explicit big-endian routines over byte slices. Wire layout:
//!
//! ```text
//! offset  size  field
//! 0       4     magic          0x4C554350 ("LUCP")
//! 4       1     version_major
//! 5       1     version_minor
//! 6       4     sequence
//! 10      1     msg_type
//! 11      1     status
//! 12      2     text_len       0..=1010
//! 14      n     payload        raw bytes, not NUL-terminated
//! ```

use thiserror::Error;

/// Protocol magic, ASCII `LUCP`.
pub const LUCP_MAGIC: u32 = 0x4C55_4350;

/// Current protocol version.
pub const VERSION_MAJOR: u8 = 1;
pub const VERSION_MINOR: u8 = 0;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 14;

/// Maximum payload length in bytes.
pub const MAX_PAYLOAD: usize = 1010;

/// Message types.
pub mod msg {
    /// Device asks the coordinator to prepare a log upload.
    pub const UPLOAD_REQUEST: u8 = 0x01;
    /// Coordinator acknowledges the workflow start.
    pub const ACK_START: u8 = 0x02;
    /// Coordinator reports the log-preparation outcome.
    pub const NOTIFY_DONE: u8 = 0x03;
    /// Device reports the FTP login outcome.
    pub const FTP_LOGIN_RESULT: u8 = 0x04;
    /// Device reports the FTP download outcome.
    pub const FTP_DOWNLOAD_RESULT: u8 = 0x05;
    /// Device reports the cloud upload outcome.
    pub const CLOUD_UPLOAD_RESULT: u8 = 0x06;
}

/// Status codes carried in the frame header.
pub mod status {
    pub const FAILED: u8 = 0x00;
    pub const SUCCESS: u8 = 0x01;
    pub const ARCHIVE_FAILED: u8 = 0x10;
    pub const FTP_UPLOAD_FAILED: u8 = 0x11;
    pub const FTP_LOGIN_FAILED: u8 = 0x20;
    pub const FTP_DOWNLOAD_FAILED: u8 = 0x21;
    pub const CLOUD_UPLOAD_FAILED: u8 = 0x30;
    /// Start of the client-defined error band (`0xF0..=0xFF`).
    pub const CLIENT_ERROR_BASE: u8 = 0xF0;
}

/// A decoded LUCP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version_major: u8,
    pub version_minor: u8,
    pub sequence: u32,
    pub msg_type: u8,
    pub status: u8,
    payload: Vec<u8>,
}

impl Frame {
    /// Build a frame with the current protocol version.
    ///
    /// Payloads longer than [`MAX_PAYLOAD`] are truncated with a warning;
    /// truncation is not an error.
    pub fn new(sequence: u32, msg_type: u8, status: u8, payload: &[u8]) -> Self {
        let payload = if payload.len() > MAX_PAYLOAD {
            log::warn!(
                "LUCP payload truncated from {} to {} bytes",
                payload.len(),
                MAX_PAYLOAD
            );
            payload[..MAX_PAYLOAD].to_vec()
        } else {
            payload.to_vec()
        };
        Self {
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            sequence,
            msg_type,
            status,
            payload,
        }
    }

    /// Raw payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload interpreted as UTF-8 text, lossily.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Total encoded size: `HEADER_SIZE + text_len`.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Errors from [`pack`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PackError {
    #[error("output buffer too small: need {need} bytes, got {got}")]
    BufferTooSmall { need: usize, got: usize },
    #[error("payload exceeds {MAX_PAYLOAD} bytes: {len}")]
    PayloadTooLarge { len: usize },
}

/// Outcome of [`unpack`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unpacked {
    /// A complete frame was decoded; `consumed` bytes were used.
    Complete { frame: Frame, consumed: usize },
    /// More bytes are needed before a frame can be decoded.
    Incomplete,
    /// The buffer cannot be a frame boundary: bad magic or an impossible
    /// declared length. The connection's buffered bytes are unusable.
    Corrupt,
}

/// Encode `frame` into `buf`. Returns the number of bytes written.
pub fn pack(frame: &Frame, buf: &mut [u8]) -> Result<usize, PackError> {
    let text_len = frame.payload.len();
    if text_len > MAX_PAYLOAD {
        return Err(PackError::PayloadTooLarge { len: text_len });
    }
    let need = HEADER_SIZE + text_len;
    if buf.len() < need {
        return Err(PackError::BufferTooSmall {
            need,
            got: buf.len(),
        });
    }

    buf[0..4].copy_from_slice(&LUCP_MAGIC.to_be_bytes());
    buf[4] = frame.version_major;
    buf[5] = frame.version_minor;
    buf[6..10].copy_from_slice(&frame.sequence.to_be_bytes());
    buf[10] = frame.msg_type;
    buf[11] = frame.status;
    buf[12..14].copy_from_slice(&(text_len as u16).to_be_bytes());
    buf[14..14 + text_len].copy_from_slice(&frame.payload);

    Ok(need)
}

/// Decode one frame from the front of `buf`.
pub fn unpack(buf: &[u8]) -> Unpacked {
    if buf.len() < HEADER_SIZE {
        return Unpacked::Incomplete;
    }

    let magic = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if magic != LUCP_MAGIC {
        return Unpacked::Corrupt;
    }

    let text_len = u16::from_be_bytes([buf[12], buf[13]]) as usize;
    if text_len > MAX_PAYLOAD {
        return Unpacked::Corrupt;
    }
    if buf.len() < HEADER_SIZE + text_len {
        return Unpacked::Incomplete;
    }

    let frame = Frame {
        version_major: buf[4],
        version_minor: buf[5],
        sequence: u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]),
        msg_type: buf[10],
        status: buf[11],
        payload: buf[HEADER_SIZE..HEADER_SIZE + text_len].to_vec(),
    };

    Unpacked::Complete {
        frame,
        consumed: HEADER_SIZE + text_len,
    }
}
