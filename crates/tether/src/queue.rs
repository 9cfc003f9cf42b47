//! Bounded frame queue with drop-oldest backpressure
//!
//! Sits between the transport reader and the decoder. `push` never blocks:
//! when the queue is full the oldest frame is displaced so the decoder
//! always races toward the freshest frame instead of working through a
//! backlog. `pop_timeout` suspends on a condvar while empty so the decoder
//! burns no CPU between frames and can still observe shutdown.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::frame::CompressedFrame;

struct Inner {
    frames: VecDeque<CompressedFrame>,
    closed: bool,
}

/// Bounded single-producer single-consumer frame queue
pub(crate) struct FrameQueue {
    inner: Mutex<Inner>,
    available: Condvar,
    capacity: usize,
}

impl FrameQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Enqueue a frame without blocking.
    ///
    /// Returns the displaced oldest frame when the queue was full, so the
    /// caller can count the drop.
    pub(crate) fn push(&self, frame: CompressedFrame) -> Option<CompressedFrame> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            // Session tearing down, the frame has nowhere to go
            return Some(frame);
        }

        let displaced = if inner.frames.len() >= self.capacity {
            inner.frames.pop_front()
        } else {
            None
        };

        inner.frames.push_back(frame);
        drop(inner);
        self.available.notify_one();
        displaced
    }

    /// Dequeue the next frame, suspending up to `timeout` while empty.
    ///
    /// Returns `None` on timeout or once the queue is closed and drained.
    pub(crate) fn pop_timeout(&self, timeout: Duration) -> Option<CompressedFrame> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(frame) = inner.frames.pop_front() {
                return Some(frame);
            }
            if inner.closed {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self.available.wait_timeout(inner, deadline - now).unwrap();
            inner = guard;
        }
    }

    /// Close the queue, waking any suspended consumer
    pub(crate) fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        drop(inner);
        self.available.notify_all();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap().frames.len()
    }
}
