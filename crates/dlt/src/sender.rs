// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Background sender: drains the log queue onto a TCP connection.
//!
//! Delivery contract: frames leave in enqueue order; a frame that fails
//! to send is dropped, never requeued, so the server observes a gap but
//! no duplicates or reordering. Send failures close the connection so
//! the next iteration reconnects.

use crate::config::ProtocolConfig;
use crate::frame::LogFrame;
use crate::queue::LogQueue;
use crate::transport;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Pause between reconnect attempts.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Handle to the sender thread and its queue.
pub struct AsyncSender {
    queue: Arc<LogQueue>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AsyncSender {
    /// Create the queue and spawn the sender thread.
    pub fn start(config: Arc<ProtocolConfig>) -> Self {
        let queue = Arc::new(LogQueue::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = {
            let queue = queue.clone();
            let shutdown = shutdown.clone();
            thread::spawn(move || sender_loop(config, queue, shutdown))
        };
        Self {
            queue,
            shutdown,
            handle: Some(handle),
        }
    }

    /// The queue feeding this sender.
    pub fn queue(&self) -> Arc<LogQueue> {
        self.queue.clone()
    }

    /// Non-blocking enqueue; hands the frame back when saturated.
    pub fn enqueue(&self, frame: LogFrame) -> Result<(), LogFrame> {
        self.queue.enqueue(frame)
    }

    /// Signal shutdown, join the thread and drop any leftover frames.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.queue.close();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("log sender thread panicked");
            }
        }
        while self.queue.try_dequeue().is_some() {}
    }
}

impl Drop for AsyncSender {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sender_loop(config: Arc<ProtocolConfig>, queue: Arc<LogQueue>, shutdown: Arc<AtomicBool>) {
    let mut stream: Option<TcpStream> = if config.auto_reconnect {
        transport::connect(&config).ok()
    } else {
        None
    };

    while !shutdown.load(Ordering::Relaxed) {
        let Some(frame) = queue.dequeue() else {
            break; // queue closed and drained
        };

        if stream.is_none() && config.auto_reconnect {
            match transport::connect(&config) {
                Ok(connected) => stream = Some(connected),
                Err(e) => {
                    log::warn!("log server unreachable, dropping frame: {}", e);
                    thread::sleep(RECONNECT_BACKOFF);
                    continue;
                }
            }
        }

        if let Some(connected) = stream.as_mut() {
            if let Err(e) = transport::send_frame(connected, &frame) {
                log::warn!("send failed, closing connection: {}", e);
                stream = None;
            }
        }
        // The frame drops here regardless of the outcome.
    }
}
