//! Per-transfer retransmission timer
//!
//! Each transfer owns one [`RetryTimer`]. Arming always cancels whatever was
//! pending first, so a transfer never has more than one live timer. Every
//! arm gets a new generation number; a firing whose generation is no longer
//! current is reported as stale and must be ignored by the caller.

use std::future::Future;
use std::time::Duration;

use tokio::task::AbortHandle;

/// What the owner should do when the timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireAction {
    /// Resend the last unacknowledged packet and rearm
    Retry,
    /// Budget exhausted; give up on the peer
    GiveUp,
}

/// Single-slot retransmission timer with a bounded retry budget
#[derive(Debug)]
pub struct RetryTimer {
    interval: Duration,
    max_retries: u32,
    tracked_block: u16,
    retries_remaining: u32,
    generation: u64,
    pending: Option<AbortHandle>,
}

impl RetryTimer {
    pub fn new(interval: Duration, max_retries: u32) -> Self {
        Self {
            interval,
            max_retries,
            tracked_block: 0,
            retries_remaining: max_retries,
            generation: 0,
            pending: None,
        }
    }

    /// Arm a one-shot timer
    ///
    /// `on_fire` receives the generation of this arm and builds the future
    /// that runs once the interval elapses. That future is expected to lock
    /// the transfer and call [`RetryTimer::on_fire`] with the same generation.
    pub fn start<F, Fut>(&mut self, on_fire: F)
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.generation = self.generation.wrapping_add(1);

        let fire = on_fire(self.generation);
        let interval = self.interval;
        let task = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            fire.await;
        });
        self.pending = Some(task.abort_handle());
    }

    /// Cancel the pending timer, if any
    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    /// Track a new block with a full retry budget; cancels any pending timer
    pub fn reset(&mut self, block: u16) {
        self.cancel();
        self.tracked_block = block;
        self.retries_remaining = self.max_retries;
    }

    /// Account for a firing of the arm identified by `generation`
    ///
    /// Returns `None` for a stale firing (the arm was cancelled or superseded).
    /// Otherwise the slot is now empty and the caller must act on the
    /// returned [`FireAction`]; after [`FireAction::Retry`] it rearms with
    /// [`RetryTimer::start`].
    pub fn on_fire(&mut self, generation: u64) -> Option<FireAction> {
        if generation != self.generation || self.pending.is_none() {
            return None;
        }

        // Already running, so no abort
        self.pending = None;

        if self.retries_remaining == 0 {
            Some(FireAction::GiveUp)
        } else {
            self.retries_remaining -= 1;
            Some(FireAction::Retry)
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn tracked_block(&self) -> u16 {
        self.tracked_block
    }

    pub fn retries_remaining(&self) -> u32 {
        self.retries_remaining
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for RetryTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
