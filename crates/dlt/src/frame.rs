// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Log frame: fixed header plus a TLV payload.
//!
//! Wire layout (all multi-byte fields big-endian):
//!
//! ```text
//! offset  size  field
//! 0       4     magic           0xDEADBEEF
//! 4       1     major_version
//! 5       1     minor_version
//! 6       2     sequence
//! 8       8     timestamp_sec   signed seconds since the epoch
//! 16      2     timestamp_ms
//! 18      1     msg_type
//! 19      1     status
//! 20      2     payload_len
//! 22      n     payload         sequence of TLVs
//! ```
//!
//! Each TLV is `type (1) | length (2, BE) | value (length)`. A single TLV
//! value is capped at 32 KiB; the whole frame at the configured maximum
//! (64 KiB by default). Unknown TLV types are skipped during parsing.
//!
//! Which TLVs a frame must carry depends on its message type; see
//! [`LogFrame::validate`].

use crate::error::{ProtocolError, ProtocolResult};
use crate::level::Level;
use std::time::{SystemTime, UNIX_EPOCH};

/// Frame magic.
pub const LOG_MAGIC: u32 = 0xDEAD_BEEF;

/// Current protocol version. The major version must match exactly on
/// both ends; minor versions may differ.
pub const VERSION_MAJOR: u8 = 1;
pub const VERSION_MINOR: u8 = 0;

/// Fixed header size in bytes.
pub const FRAME_HEADER_SIZE: usize = 22;

/// Default whole-frame size cap (64 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 65536;

/// Single TLV value size cap (32 KiB).
pub const MAX_TLV_SIZE: usize = 32768;

/// TLV slots preallocated per frame.
pub const TLV_PREALLOC: usize = 8;

/// TLV type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TlvType {
    StatusMessage = 0x00,
    AppId = 0x01,
    LogMessage = 0x02,
    ThresholdLevel = 0x03,
    EntryLevel = 0x04,
    Timestamp = 0x05,
    FatalMode = 0x21,
    ErrorMode = 0x22,
    WarningMode = 0x23,
    InfoMode = 0x24,
    DebugMode = 0x25,
    VerboseMode = 0x26,
}

impl TlvType {
    /// Decode a wire byte; `None` for unknown types.
    pub fn from_u8(value: u8) -> Option<TlvType> {
        match value {
            0x00 => Some(TlvType::StatusMessage),
            0x01 => Some(TlvType::AppId),
            0x02 => Some(TlvType::LogMessage),
            0x03 => Some(TlvType::ThresholdLevel),
            0x04 => Some(TlvType::EntryLevel),
            0x05 => Some(TlvType::Timestamp),
            0x21 => Some(TlvType::FatalMode),
            0x22 => Some(TlvType::ErrorMode),
            0x23 => Some(TlvType::WarningMode),
            0x24 => Some(TlvType::InfoMode),
            0x25 => Some(TlvType::DebugMode),
            0x26 => Some(TlvType::VerboseMode),
            _ => None,
        }
    }
}

/// Application-level message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Client -> server: request the per-app configuration.
    RequestConfig = 0x01,
    /// Server -> client: configuration reply for a registered app.
    ConfigStatus = 0x02,
    /// Server -> client: bare status, e.g. "not registered".
    PureStatus = 0x03,
    /// Server -> client: configuration push.
    UpdateConfig = 0x04,
    /// Client -> server: one log record.
    SingleLog = 0x05,
    /// Client -> server: batched log records.
    MultipleLogs = 0x06,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<MessageType> {
        match value {
            0x01 => Some(MessageType::RequestConfig),
            0x02 => Some(MessageType::ConfigStatus),
            0x03 => Some(MessageType::PureStatus),
            0x04 => Some(MessageType::UpdateConfig),
            0x05 => Some(MessageType::SingleLog),
            0x06 => Some(MessageType::MultipleLogs),
            _ => None,
        }
    }
}

/// Wall-clock timestamp as carried in the header and `Timestamp` TLVs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogTimestamp {
    pub seconds: i64,
    pub milliseconds: u16,
}

impl LogTimestamp {
    /// Current wall clock.
    pub fn now() -> Self {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => Self {
                seconds: elapsed.as_secs() as i64,
                milliseconds: elapsed.subsec_millis() as u16,
            },
            // Clock before the epoch: encode the negative offset.
            Err(err) => Self {
                seconds: -(err.duration().as_secs() as i64),
                milliseconds: 0,
            },
        }
    }
}

/// One type-length-value element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub tlv_type: TlvType,
    pub value: Vec<u8>,
}

impl Tlv {
    /// String payload. Requires NUL termination; the NUL is stripped.
    pub fn as_str(&self) -> Option<&str> {
        if self.value.last() != Some(&0) {
            return None;
        }
        std::str::from_utf8(&self.value[..self.value.len() - 1]).ok()
    }

    /// Single-byte payload.
    pub fn as_u8(&self) -> Option<u8> {
        if self.value.len() == 1 {
            Some(self.value[0])
        } else {
            None
        }
    }

    /// Single-byte payload decoded as a severity level.
    pub fn as_level(&self) -> Option<Level> {
        Level::from_u8(self.as_u8()?)
    }

    /// 10-byte payload decoded as seconds + milliseconds.
    pub fn as_timestamp(&self) -> Option<LogTimestamp> {
        if self.value.len() != 10 {
            return None;
        }
        let seconds = i64::from_be_bytes(self.value[0..8].try_into().ok()?);
        let milliseconds = u16::from_be_bytes(self.value[8..10].try_into().ok()?);
        Some(LogTimestamp {
            seconds,
            milliseconds,
        })
    }
}

/// A complete log frame.
#[derive(Debug, Clone)]
pub struct LogFrame {
    pub sequence: u16,
    pub timestamp: LogTimestamp,
    pub msg_type: MessageType,
    pub status: u8,
    payload_len: u16,
    tlvs: Vec<Tlv>,
    /// Serialized wire bytes, filled by `serialize` or `parse`.
    raw: Option<Vec<u8>>,
    max_frame_size: usize,
}

impl LogFrame {
    /// Fresh frame stamped with the current wall clock.
    pub fn new(
        msg_type: MessageType,
        sequence: u16,
        status: u8,
        max_frame_size: usize,
    ) -> Self {
        Self {
            sequence,
            timestamp: LogTimestamp::now(),
            msg_type,
            status,
            payload_len: 0,
            tlvs: Vec::with_capacity(TLV_PREALLOC),
            raw: None,
            max_frame_size,
        }
    }

    /// Re-stamp a recycled frame. TLV values are dropped but the slot
    /// vector keeps its allocation.
    pub fn reset(&mut self, msg_type: MessageType, sequence: u16, status: u8) {
        self.sequence = sequence;
        self.timestamp = LogTimestamp::now();
        self.msg_type = msg_type;
        self.status = status;
        self.payload_len = 0;
        self.tlvs.clear();
        self.raw = None;
    }

    pub fn tlvs(&self) -> &[Tlv] {
        &self.tlvs
    }

    /// Serialized bytes, if `serialize` (or `parse`) has run.
    pub fn raw(&self) -> Option<&[u8]> {
        self.raw.as_deref()
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Total encoded size: header plus payload.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload_len as usize
    }

    /// First TLV of the given type.
    pub fn find_tlv(&self, tlv_type: TlvType) -> Option<&Tlv> {
        self.tlvs.iter().find(|tlv| tlv.tlv_type == tlv_type)
    }

    /// Append a raw TLV. Enforces the per-TLV and whole-frame caps.
    pub fn add_tlv(&mut self, tlv_type: TlvType, value: &[u8]) -> ProtocolResult<()> {
        if value.len() > MAX_TLV_SIZE {
            return Err(ProtocolError::TlvTooLarge(value.len()));
        }
        let new_payload_len = self.payload_len as usize + 3 + value.len();
        if FRAME_HEADER_SIZE + new_payload_len > self.max_frame_size
            || new_payload_len > u16::MAX as usize
        {
            return Err(ProtocolError::FrameTooLarge {
                size: FRAME_HEADER_SIZE + new_payload_len,
                max: self.max_frame_size,
            });
        }
        self.tlvs.push(Tlv {
            tlv_type,
            value: value.to_vec(),
        });
        self.payload_len = new_payload_len as u16;
        self.raw = None;
        Ok(())
    }

    /// Append a NUL-terminated string TLV.
    pub fn add_string_tlv(&mut self, tlv_type: TlvType, text: &str) -> ProtocolResult<()> {
        if text.len() + 1 > MAX_TLV_SIZE {
            return Err(ProtocolError::TlvTooLarge(text.len() + 1));
        }
        let mut value = Vec::with_capacity(text.len() + 1);
        value.extend_from_slice(text.as_bytes());
        value.push(0);
        self.add_tlv(tlv_type, &value)
    }

    /// Append a single-byte TLV.
    pub fn add_u8_tlv(&mut self, tlv_type: TlvType, value: u8) -> ProtocolResult<()> {
        self.add_tlv(tlv_type, &[value])
    }

    /// Append a severity TLV. `Disabled` is not a valid wire level.
    pub fn add_level_tlv(&mut self, tlv_type: TlvType, level: Level) -> ProtocolResult<()> {
        if level == Level::Disabled {
            return Err(ProtocolError::InvalidLevel(level as u8));
        }
        self.add_u8_tlv(tlv_type, level as u8)
    }

    /// Append a 10-byte timestamp TLV.
    pub fn add_timestamp_tlv(&mut self, timestamp: LogTimestamp) -> ProtocolResult<()> {
        let mut value = [0u8; 10];
        value[0..8].copy_from_slice(&timestamp.seconds.to_be_bytes());
        value[8..10].copy_from_slice(&timestamp.milliseconds.to_be_bytes());
        self.add_tlv(TlvType::Timestamp, &value)
    }

    /// Check the TLV set against the message type's schema.
    pub fn validate(&self) -> ProtocolResult<()> {
        let required: &[TlvType] = match self.msg_type {
            MessageType::RequestConfig => &[TlvType::AppId],
            MessageType::ConfigStatus => &[
                TlvType::StatusMessage,
                TlvType::AppId,
                TlvType::ThresholdLevel,
                TlvType::FatalMode,
                TlvType::ErrorMode,
                TlvType::WarningMode,
                TlvType::InfoMode,
                TlvType::DebugMode,
                TlvType::VerboseMode,
            ],
            MessageType::PureStatus => &[TlvType::AppId, TlvType::StatusMessage],
            MessageType::UpdateConfig => &[
                TlvType::AppId,
                TlvType::ThresholdLevel,
                TlvType::FatalMode,
                TlvType::ErrorMode,
                TlvType::WarningMode,
                TlvType::InfoMode,
                TlvType::DebugMode,
                TlvType::VerboseMode,
            ],
            MessageType::SingleLog => &[
                TlvType::AppId,
                TlvType::EntryLevel,
                TlvType::Timestamp,
                TlvType::LogMessage,
            ],
            MessageType::MultipleLogs => {
                // AppId first, then (EntryLevel, Timestamp, LogMessage)
                // triples in that exact interleaving.
                if self.tlvs.first().map(|t| t.tlv_type) != Some(TlvType::AppId) {
                    return Err(ProtocolError::MissingTlv(TlvType::AppId));
                }
                if (self.tlvs.len() - 1) % 3 != 0 {
                    return Err(ProtocolError::InvalidFrame(
                        "batch payload is not a sequence of (level, timestamp, message) triples",
                    ));
                }
                for triple in self.tlvs[1..].chunks(3) {
                    if triple[0].tlv_type != TlvType::EntryLevel
                        || triple[1].tlv_type != TlvType::Timestamp
                        || triple[2].tlv_type != TlvType::LogMessage
                    {
                        return Err(ProtocolError::InvalidFrame(
                            "batch triple out of order",
                        ));
                    }
                }
                &[]
            }
        };

        for tlv_type in required {
            if self.find_tlv(*tlv_type).is_none() {
                return Err(ProtocolError::MissingTlv(*tlv_type));
            }
        }

        for tlv in &self.tlvs {
            match tlv.tlv_type {
                TlvType::Timestamp => {
                    if tlv.value.len() != 10 {
                        return Err(ProtocolError::InvalidTlv(tlv.tlv_type));
                    }
                }
                TlvType::ThresholdLevel
                | TlvType::EntryLevel
                | TlvType::FatalMode
                | TlvType::ErrorMode
                | TlvType::WarningMode
                | TlvType::InfoMode
                | TlvType::DebugMode
                | TlvType::VerboseMode => {
                    if tlv.value.len() != 1 {
                        return Err(ProtocolError::InvalidTlv(tlv.tlv_type));
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Validate and build the wire bytes.
    pub fn serialize(&mut self) -> ProtocolResult<()> {
        self.validate()?;

        let total = FRAME_HEADER_SIZE + self.payload_len as usize;
        if total > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: total,
                max: self.max_frame_size,
            });
        }

        let mut raw = Vec::with_capacity(total);
        raw.extend_from_slice(&LOG_MAGIC.to_be_bytes());
        raw.push(VERSION_MAJOR);
        raw.push(VERSION_MINOR);
        raw.extend_from_slice(&self.sequence.to_be_bytes());
        raw.extend_from_slice(&self.timestamp.seconds.to_be_bytes());
        raw.extend_from_slice(&self.timestamp.milliseconds.to_be_bytes());
        raw.push(self.msg_type as u8);
        raw.push(self.status);
        raw.extend_from_slice(&self.payload_len.to_be_bytes());

        for tlv in &self.tlvs {
            raw.push(tlv.tlv_type as u8);
            raw.extend_from_slice(&(tlv.value.len() as u16).to_be_bytes());
            raw.extend_from_slice(&tlv.value);
        }

        self.raw = Some(raw);
        Ok(())
    }

    /// Decode and validate a frame from `data`.
    ///
    /// Unknown TLV types are skipped. The raw bytes are retained so the
    /// frame can be forwarded without re-encoding.
    pub fn parse(data: &[u8], max_frame_size: usize) -> ProtocolResult<LogFrame> {
        if data.len() > max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: data.len(),
                max: max_frame_size,
            });
        }
        if data.len() < FRAME_HEADER_SIZE {
            return Err(ProtocolError::InvalidFrame("truncated header"));
        }

        let magic = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        if magic != LOG_MAGIC {
            return Err(ProtocolError::BadMagic(magic));
        }
        check_version(data[4], data[5])?;

        let sequence = u16::from_be_bytes([data[6], data[7]]);
        let seconds = i64::from_be_bytes(
            data[8..16]
                .try_into()
                .map_err(|_| ProtocolError::InvalidFrame("truncated header"))?,
        );
        let milliseconds = u16::from_be_bytes([data[16], data[17]]);
        let msg_type = MessageType::from_u8(data[18])
            .ok_or(ProtocolError::InvalidFrame("unknown message type"))?;
        let status = data[19];
        let payload_len = u16::from_be_bytes([data[20], data[21]]) as usize;

        if data.len() != FRAME_HEADER_SIZE + payload_len {
            return Err(ProtocolError::InvalidFrame("length mismatch"));
        }

        let mut frame = LogFrame {
            sequence,
            timestamp: LogTimestamp {
                seconds,
                milliseconds,
            },
            msg_type,
            status,
            payload_len: 0,
            tlvs: Vec::with_capacity(TLV_PREALLOC),
            raw: None,
            max_frame_size,
        };

        let payload = &data[FRAME_HEADER_SIZE..];
        let mut offset = 0usize;
        while offset < payload.len() {
            if offset + 3 > payload.len() {
                return Err(ProtocolError::InvalidFrame("truncated TLV header"));
            }
            let type_byte = payload[offset];
            let length =
                u16::from_be_bytes([payload[offset + 1], payload[offset + 2]]) as usize;
            offset += 3;

            if length > payload.len() - offset {
                return Err(ProtocolError::InvalidFrame("truncated TLV value"));
            }
            if length > MAX_TLV_SIZE {
                return Err(ProtocolError::TlvTooLarge(length));
            }

            match TlvType::from_u8(type_byte) {
                Some(tlv_type) => {
                    frame.add_tlv(tlv_type, &payload[offset..offset + length])?;
                }
                None => {
                    log::debug!("skipping unknown TLV type {:#04x}", type_byte);
                }
            }
            offset += length;
        }

        frame.validate()?;
        frame.raw = Some(data.to_vec());
        Ok(frame)
    }

    // ------------------------------------------------------------------
    // Convenience constructors
    // ------------------------------------------------------------------

    /// Serialized `RequestConfig` frame carrying the app id.
    pub fn config_request(
        app_id: &str,
        sequence: u16,
        max_frame_size: usize,
    ) -> ProtocolResult<LogFrame> {
        let mut frame = LogFrame::new(MessageType::RequestConfig, sequence, 0, max_frame_size);
        frame.add_string_tlv(TlvType::AppId, app_id)?;
        frame.serialize()?;
        Ok(frame)
    }

    /// Serialized `SingleLog` frame stamped with the current wall clock.
    pub fn single_log(
        app_id: &str,
        sequence: u16,
        level: Level,
        message: &str,
        max_frame_size: usize,
    ) -> ProtocolResult<LogFrame> {
        let mut frame = LogFrame::new(MessageType::SingleLog, sequence, 0, max_frame_size);
        frame.add_string_tlv(TlvType::AppId, app_id)?;
        frame.add_level_tlv(TlvType::EntryLevel, level)?;
        frame.add_timestamp_tlv(LogTimestamp::now())?;
        frame.add_string_tlv(TlvType::LogMessage, message)?;
        frame.serialize()?;
        Ok(frame)
    }

    /// Unserialized `MultipleLogs` frame with the leading app id.
    pub fn batch(app_id: &str, sequence: u16, max_frame_size: usize) -> ProtocolResult<LogFrame> {
        let mut frame = LogFrame::new(MessageType::MultipleLogs, sequence, 0, max_frame_size);
        frame.add_string_tlv(TlvType::AppId, app_id)?;
        Ok(frame)
    }

    /// Append one `(level, timestamp, message)` triple to a batch frame.
    pub fn add_batch_log(
        &mut self,
        level: Level,
        message: &str,
        timestamp: LogTimestamp,
    ) -> ProtocolResult<()> {
        if self.msg_type != MessageType::MultipleLogs {
            return Err(ProtocolError::InvalidFrame(
                "batch logs can only be added to a MultipleLogs frame",
            ));
        }
        self.add_level_tlv(TlvType::EntryLevel, level)?;
        self.add_timestamp_tlv(timestamp)?;
        self.add_string_tlv(TlvType::LogMessage, message)
    }
}

/// Version compatibility: major must match, minor may differ.
pub fn check_version(major: u8, minor: u8) -> ProtocolResult<()> {
    if major != VERSION_MAJOR {
        return Err(ProtocolError::VersionMismatch { major, minor });
    }
    if minor != VERSION_MINOR {
        log::warn!(
            "protocol minor version mismatch (local {}, remote {})",
            VERSION_MINOR,
            minor
        );
    }
    Ok(())
}
