// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Server-side LUCP session state machine.
//!
//! One session per accepted connection, driven to completion on its own
//! thread. State flow:
//!
//! ```text
//! Init -> WaitingUploadRequest -> WaitingFtpLoginResult
//!      -> WaitingFtpDownloadResult -> Completed
//! ```
//!
//! Any socket error, bad status, or timeout diverts to `Error`. Frames
//! with unexpected message types are dropped silently. The session
//! expects the caller to configure a read timeout on the socket so that
//! blocking receives return periodically and the session-timeout and
//! shutdown checks can run.

use crate::frame::{msg, status, Frame, VERSION_MAJOR};
use crate::net::{Connection, NetError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    WaitingUploadRequest,
    WaitingFtpLoginResult,
    WaitingFtpDownloadResult,
    Completed,
    Error,
}

/// Outcome of the external log-preparation step.
#[derive(Debug, Clone)]
pub struct PrepOutcome {
    /// One of `status::SUCCESS`, `status::ARCHIVE_FAILED`,
    /// `status::FTP_UPLOAD_FAILED`.
    pub status: u8,
    /// Short human-readable detail; on success, the prepared file name.
    pub detail: String,
}

/// External collaborator that archives logs and stages them for upload.
pub trait LogPreparer: Send + Sync {
    fn prepare(&self) -> PrepOutcome;
}

/// Per-session tunables, sourced from the daemon configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub session_timeout: Duration,
    pub validate_version: bool,
}

/// A single upload-workflow session over one connection.
pub struct Session {
    conn: Connection,
    state: SessionState,
    sequence: u32,
    last_active: Instant,
    config: SessionConfig,
    running: Arc<AtomicBool>,
}

impl Session {
    pub fn new(conn: Connection, config: SessionConfig, running: Arc<AtomicBool>) -> Self {
        Self {
            conn,
            state: SessionState::Init,
            sequence: 0,
            last_active: Instant::now(),
            config,
            running,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session until `Completed`, `Error`, or shutdown.
    pub fn run(&mut self, preparer: &dyn LogPreparer) -> SessionState {
        self.last_active = Instant::now();

        while self.running.load(Ordering::Relaxed) {
            if self.last_active.elapsed() > self.config.session_timeout {
                log::debug!("session timed out in state {:?}", self.state);
                self.state = SessionState::Error;
            }

            match self.state {
                SessionState::Init => self.on_init(),
                SessionState::WaitingUploadRequest => self.on_prepare(preparer),
                SessionState::WaitingFtpLoginResult => {
                    self.on_peer_result(msg::FTP_LOGIN_RESULT, SessionState::WaitingFtpDownloadResult)
                }
                SessionState::WaitingFtpDownloadResult => {
                    self.on_peer_result(msg::FTP_DOWNLOAD_RESULT, SessionState::Completed)
                }
                SessionState::Completed | SessionState::Error => break,
            }
        }

        log::debug!("session finished in state {:?}", self.state);
        self.state
    }

    fn on_init(&mut self) {
        let frame = match self.conn.recv() {
            Ok(frame) => frame,
            Err(NetError::Timeout) => return,
            Err(e) => {
                log::debug!("session recv failed in Init: {}", e);
                self.state = SessionState::Error;
                return;
            }
        };

        if frame.msg_type != msg::UPLOAD_REQUEST {
            // Unexpected type, drop and keep waiting.
            return;
        }

        if self.config.validate_version && frame.version_major != VERSION_MAJOR {
            let reply = Frame::new(
                frame.sequence,
                msg::ACK_START,
                status::FAILED,
                b"Bad version",
            );
            let _ = self.conn.send(&reply);
            self.state = SessionState::Error;
            return;
        }

        self.sequence = frame.sequence;
        let reply = Frame::new(self.sequence, msg::ACK_START, status::SUCCESS, &[]);
        if self.conn.send(&reply).is_err() {
            self.state = SessionState::Error;
            return;
        }
        self.state = SessionState::WaitingUploadRequest;
        self.last_active = Instant::now();
    }

    fn on_prepare(&mut self, preparer: &dyn LogPreparer) {
        let outcome = preparer.prepare();
        let reply = Frame::new(
            self.sequence,
            msg::NOTIFY_DONE,
            outcome.status,
            outcome.detail.as_bytes(),
        );
        if self.conn.send(&reply).is_err() {
            self.state = SessionState::Error;
            return;
        }
        self.state = if outcome.status == status::SUCCESS {
            SessionState::WaitingFtpLoginResult
        } else {
            SessionState::Error
        };
        self.last_active = Instant::now();
    }

    fn on_peer_result(&mut self, expect_type: u8, next: SessionState) {
        let frame = match self.conn.recv() {
            Ok(frame) => frame,
            Err(NetError::Timeout) => return,
            Err(e) => {
                log::debug!("session recv failed: {}", e);
                self.state = SessionState::Error;
                return;
            }
        };

        if frame.msg_type != expect_type {
            return;
        }

        self.state = if frame.status == status::SUCCESS {
            next
        } else {
            SessionState::Error
        };
        self.last_active = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    struct FixedPrep {
        status: u8,
        detail: &'static str,
    }

    impl LogPreparer for FixedPrep {
        fn prepare(&self) -> PrepOutcome {
            PrepOutcome {
                status: self.status,
                detail: self.detail.to_string(),
            }
        }
    }

    fn session_pair(timeout: Duration, validate_version: bool) -> (Session, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        let session = Session::new(
            Connection::new(server),
            SessionConfig {
                session_timeout: timeout,
                validate_version,
            },
            Arc::new(AtomicBool::new(true)),
        );
        (session, client)
    }

    fn write_frame(stream: &mut TcpStream, frame: &Frame) {
        let mut buf = vec![0u8; frame.encoded_len()];
        frame::pack(frame, &mut buf).unwrap();
        stream.write_all(&buf).unwrap();
    }

    fn read_frame(stream: &mut TcpStream) -> Frame {
        let mut header = [0u8; frame::HEADER_SIZE];
        stream.read_exact(&mut header).unwrap();
        let text_len = u16::from_be_bytes([header[12], header[13]]) as usize;
        let mut rest = vec![0u8; text_len];
        stream.read_exact(&mut rest).unwrap();
        let mut whole = header.to_vec();
        whole.extend_from_slice(&rest);
        match frame::unpack(&whole) {
            frame::Unpacked::Complete { frame, .. } => frame,
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn test_happy_path_completes() {
        let (mut session, mut client) = session_pair(Duration::from_secs(10), true);

        let driver = thread::spawn(move || {
            write_frame(
                &mut client,
                &Frame::new(10001, msg::UPLOAD_REQUEST, 0, b"Request log preparation"),
            );

            let ack = read_frame(&mut client);
            assert_eq!(ack.msg_type, msg::ACK_START);
            assert_eq!(ack.status, status::SUCCESS);
            assert_eq!(ack.sequence, 10001);

            let done = read_frame(&mut client);
            assert_eq!(done.msg_type, msg::NOTIFY_DONE);
            assert_eq!(done.status, status::SUCCESS);
            assert_eq!(done.text(), "demo_logfile_20250925.log");

            write_frame(
                &mut client,
                &Frame::new(10001, msg::FTP_LOGIN_RESULT, status::SUCCESS, &[]),
            );
            write_frame(
                &mut client,
                &Frame::new(10001, msg::FTP_DOWNLOAD_RESULT, status::SUCCESS, &[]),
            );
        });

        let prep = FixedPrep {
            status: status::SUCCESS,
            detail: "demo_logfile_20250925.log",
        };
        let final_state = session.run(&prep);
        assert_eq!(final_state, SessionState::Completed);
        driver.join().unwrap();
    }

    #[test]
    fn test_version_rejection() {
        let (mut session, mut client) = session_pair(Duration::from_secs(10), true);

        let driver = thread::spawn(move || {
            let mut bad = Frame::new(1, msg::UPLOAD_REQUEST, 0, &[]);
            bad.version_major = 2;
            write_frame(&mut client, &bad);

            let reply = read_frame(&mut client);
            assert_eq!(reply.msg_type, msg::ACK_START);
            assert_eq!(reply.status, status::FAILED);
            assert_eq!(reply.text(), "Bad version");
        });

        let prep = FixedPrep {
            status: status::SUCCESS,
            detail: "",
        };
        assert_eq!(session.run(&prep), SessionState::Error);
        driver.join().unwrap();
    }

    #[test]
    fn test_prepare_failure_ends_session() {
        let (mut session, mut client) = session_pair(Duration::from_secs(10), false);

        let driver = thread::spawn(move || {
            write_frame(&mut client, &Frame::new(2, msg::UPLOAD_REQUEST, 0, &[]));
            let _ack = read_frame(&mut client);
            let done = read_frame(&mut client);
            assert_eq!(done.status, status::ARCHIVE_FAILED);
        });

        let prep = FixedPrep {
            status: status::ARCHIVE_FAILED,
            detail: "Archive failed: disk full",
        };
        assert_eq!(session.run(&prep), SessionState::Error);
        driver.join().unwrap();
    }

    #[test]
    fn test_failed_login_status_errors() {
        let (mut session, mut client) = session_pair(Duration::from_secs(10), false);

        let driver = thread::spawn(move || {
            write_frame(&mut client, &Frame::new(3, msg::UPLOAD_REQUEST, 0, &[]));
            let _ack = read_frame(&mut client);
            let _done = read_frame(&mut client);
            write_frame(
                &mut client,
                &Frame::new(3, msg::FTP_LOGIN_RESULT, status::FTP_LOGIN_FAILED, &[]),
            );
        });

        let prep = FixedPrep {
            status: status::SUCCESS,
            detail: "log.tar.gz",
        };
        assert_eq!(session.run(&prep), SessionState::Error);
        driver.join().unwrap();
    }

    #[test]
    fn test_session_timeout() {
        let (mut session, _client) = session_pair(Duration::from_millis(200), false);
        let prep = FixedPrep {
            status: status::SUCCESS,
            detail: "",
        };
        // Client never sends anything; the session must time out.
        assert_eq!(session.run(&prep), SessionState::Error);
    }

    #[test]
    fn test_unexpected_frames_are_dropped() {
        let (mut session, mut client) = session_pair(Duration::from_secs(10), false);

        let driver = thread::spawn(move || {
            // Noise first, then the real opener.
            write_frame(
                &mut client,
                &Frame::new(9, msg::CLOUD_UPLOAD_RESULT, status::SUCCESS, &[]),
            );
            write_frame(&mut client, &Frame::new(4, msg::UPLOAD_REQUEST, 0, &[]));
            let ack = read_frame(&mut client);
            assert_eq!(ack.sequence, 4);
            let _done = read_frame(&mut client);
            write_frame(
                &mut client,
                &Frame::new(4, msg::FTP_LOGIN_RESULT, status::SUCCESS, &[]),
            );
            write_frame(
                &mut client,
                &Frame::new(4, msg::FTP_DOWNLOAD_RESULT, status::SUCCESS, &[]),
            );
        });

        let prep = FixedPrep {
            status: status::SUCCESS,
            detail: "f.log",
        };
        assert_eq!(session.run(&prep), SessionState::Completed);
        driver.join().unwrap();
    }
}
