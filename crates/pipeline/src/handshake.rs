//! Cross-engine handshake.
//!
//! Each scratch slot has a pair of binary tokens. The source engine raises
//! `produced[s]` after filling slot `s`; the sink engine waits on it, drains
//! the slot and raises `consumed[s]`; the source waits on `consumed[s]`
//! before refilling. With two slots this gives the alternation
//!
//! ```text
//! Source[k] ─▶ P[k%2] ─▶ Sink[k] ─▶ C[k%2] ─▶ Source[k+2]
//! ```
//!
//! `consumed` starts raised for every slot so the first `SLOTS` fragments go
//! out without waiting. Every wait is bounded by a timeout, and [`abort`]
//! wakes both engines so a failure on one side never strands the other.
//!
//! [`abort`]: Handshake::abort

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration};

/// Handshake wait failures.
#[derive(thiserror_no_std::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HandshakeError {
    /// Token not raised within the timeout.
    #[error("handshake timed out")]
    Timeout,
    /// The frame was aborted while waiting.
    #[error("frame aborted")]
    Aborted,
    /// Slot index out of range.
    #[error("no handshake slot {0}")]
    NoSuchSlot(usize),
}

/// Produced/consumed token pairs for `SLOTS` scratch slots.
pub struct Handshake<M: RawMutex, const SLOTS: usize> {
    produced: [Signal<M, ()>; SLOTS],
    consumed: [Signal<M, ()>; SLOTS],
    aborted: AtomicBool,
    timeout: Duration,
}

impl<M: RawMutex, const SLOTS: usize> Handshake<M, SLOTS> {
    /// Handshake with all slots free and `timeout` on every wait.
    pub fn new(timeout: Duration) -> Self {
        let handshake = Self {
            produced: core::array::from_fn(|_| Signal::new()),
            consumed: core::array::from_fn(|_| Signal::new()),
            aborted: AtomicBool::new(false),
            timeout,
        };
        handshake.arm_consumed();
        handshake
    }

    fn arm_consumed(&self) {
        for c in &self.consumed {
            c.signal(());
        }
    }

    fn produced(&self, slot: usize) -> Result<&Signal<M, ()>, HandshakeError> {
        self.produced
            .get(slot)
            .ok_or(HandshakeError::NoSuchSlot(slot))
    }

    fn consumed(&self, slot: usize) -> Result<&Signal<M, ()>, HandshakeError> {
        self.consumed
            .get(slot)
            .ok_or(HandshakeError::NoSuchSlot(slot))
    }

    /// Raise "slot produced".
    pub fn signal_produced(&self, slot: usize) -> Result<(), HandshakeError> {
        self.produced(slot)?.signal(());
        Ok(())
    }

    /// Raise "slot consumed".
    pub fn signal_consumed(&self, slot: usize) -> Result<(), HandshakeError> {
        self.consumed(slot)?.signal(());
        Ok(())
    }

    /// Wait until `slot` has been produced, then lower the token.
    pub async fn wait_produced(&self, slot: usize) -> Result<(), HandshakeError> {
        self.wait(self.produced(slot)?).await
    }

    /// Wait until `slot` has been consumed, then lower the token.
    pub async fn wait_consumed(&self, slot: usize) -> Result<(), HandshakeError> {
        self.wait(self.consumed(slot)?).await
    }

    async fn wait(&self, token: &Signal<M, ()>) -> Result<(), HandshakeError> {
        if self.is_aborted() {
            return Err(HandshakeError::Aborted);
        }
        match with_timeout(self.timeout, token.wait()).await {
            Ok(()) if self.is_aborted() => Err(HandshakeError::Aborted),
            Ok(()) => Ok(()),
            Err(_) => Err(HandshakeError::Timeout),
        }
    }

    /// Abort the frame: every current and future wait fails until [`reset`].
    ///
    /// [`reset`]: Self::reset
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        for token in self.produced.iter().chain(self.consumed.iter()) {
            token.signal(());
        }
    }

    /// True once [`abort`](Self::abort) has been called for this frame.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Start a new frame: lower every `produced`, raise every `consumed`,
    /// clear the abort flag.
    pub fn reset(&self) {
        for token in &self.produced {
            token.reset();
        }
        self.arm_consumed();
        self.aborted.store(false, Ordering::Release);
    }

    /// Configured wait timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
