// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded log queue: mutex + condition variable.
//!
//! Producers never block: a saturated queue hands the frame straight
//! back so the caller can fall back to a synchronous send or drop it.
//! The consumer blocks until a frame arrives or the queue is closed;
//! after close, remaining frames drain in FIFO order before `None`.

use crate::frame::LogFrame;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// Queue capacity in frames.
pub const QUEUE_CAPACITY: usize = 1024;

struct Inner {
    frames: VecDeque<LogFrame>,
    shutdown: bool,
}

/// Bounded FIFO of serialized log frames.
pub struct LogQueue {
    inner: Mutex<Inner>,
    available: Condvar,
}

impl Default for LogQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl LogQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(QUEUE_CAPACITY),
                shutdown: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Non-blocking enqueue. Returns the frame back when the queue is
    /// full so the caller decides its fate.
    pub fn enqueue(&self, frame: LogFrame) -> Result<(), LogFrame> {
        let mut inner = self.inner.lock();
        if inner.frames.len() >= QUEUE_CAPACITY {
            return Err(frame);
        }
        inner.frames.push_back(frame);
        drop(inner);
        self.available.notify_one();
        Ok(())
    }

    /// Blocking dequeue. Returns `None` once the queue has been closed
    /// and fully drained.
    pub fn dequeue(&self) -> Option<LogFrame> {
        let mut inner = self.inner.lock();
        while inner.frames.is_empty() && !inner.shutdown {
            self.available.wait(&mut inner);
        }
        inner.frames.pop_front()
    }

    /// Non-blocking dequeue.
    pub fn try_dequeue(&self) -> Option<LogFrame> {
        self.inner.lock().frames.pop_front()
    }

    /// Close the queue, waking every blocked consumer.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.shutdown = true;
        drop(inner);
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().shutdown
    }

    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().frames.is_empty()
    }
}
