// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Protocol and client error types.

use crate::frame::{TlvType, MAX_TLV_SIZE};
use std::io;
use thiserror::Error;

/// Errors from frame construction, validation and transport.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),

    #[error("required TLV {0:?} missing")]
    MissingTlv(TlvType),

    #[error("malformed TLV {0:?}")]
    InvalidTlv(TlvType),

    #[error("TLV value exceeds {MAX_TLV_SIZE} bytes: {0}")]
    TlvTooLarge(usize),

    #[error("frame exceeds size limit: {size} > {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("bad magic: {0:#010x}")]
    BadMagic(u32),

    #[error("incompatible protocol version {major}.{minor}")]
    VersionMismatch { major: u8, minor: u8 },

    #[error("invalid log level {0}")]
    InvalidLevel(u8),

    #[error("frame has not been serialized")]
    NotSerialized,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors surfaced by the per-application client handle.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("application {0:?} is not registered with the log server")]
    NotRegistered(String),

    #[error("unexpected handshake reply type {0:#04x}")]
    UnexpectedReply(u8),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
