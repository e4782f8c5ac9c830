//! # Frame Buffer
//!
//! Single slot broadcast of the latest frame. Publishing never waits on readers, and readers
//! always get whole frames since frames are shared by reference count rather than copied in place.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A published frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Sequence number, starting at 1 and increasing by one per publish
    pub seq: u64,

    /// Encoded image bytes
    pub data: Arc<Vec<u8>>,
}

#[derive(Default)]
pub struct FrameBuffer {
    slot: Mutex<Option<Frame>>,
    ready: Condvar,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame and wake every waiting reader, returning the new sequence number.
    pub fn publish(&self, data: Vec<u8>) -> u64 {
        let mut slot = self.lock();

        let seq = slot.as_ref().map(|f| f.seq).unwrap_or(0) + 1;
        *slot = Some(Frame {
            seq,
            data: Arc::new(data),
        });
        drop(slot);

        self.ready.notify_all();
        seq
    }

    /// The most recent frame, if any has been published.
    pub fn latest(&self) -> Option<Frame> {
        self.lock().clone()
    }

    /// Wait for a frame newer than `last_seq`.
    ///
    /// Returns the newest frame, so any published in between are skipped. Returns `None` if no
    /// newer frame arrives within the timeout.
    pub fn wait_newer(&self, last_seq: u64, timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();

        loop {
            if let Some(frame) = slot.as_ref() {
                if frame.seq > last_seq {
                    return Some(frame.clone());
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }

            slot = match self.ready.wait_timeout(slot, deadline - now) {
                Ok((s, _)) => s,
                Err(e) => e.into_inner().0,
            };
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Frame>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
