//! Ping-pong scratch buffer pool.
//!
//! `SLOTS` fixed, cache-line aligned buffers of `SIZE` bytes sit between the
//! source engine and the sink engine. Every slot walks a strict cycle:
//!
//! ```text
//!   Free ──acquire_write──▶ Writing ──publish──▶ Ready ──acquire_read──▶ Reading
//!    ▲                         │                                          │
//!    └─────── drop (abort) ────┘◀──────────────── release / drop ─────────┘
//! ```
//!
//! Any call that does not match the slot's state fails with a [`PoolError`]
//! instead of stalling, so a protocol violation shows up as an error at the
//! call site. The handshake decides *when* a call is made; the pool checks
//! that it was allowed.

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use platform::dma::ScratchBuffer;

/// Buffer pool protocol violations.
#[derive(thiserror_no_std::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PoolError {
    /// Slot index out of range.
    #[error("no slot {slot}")]
    NoSuchSlot {
        /// Requested slot.
        slot: usize,
    },
    /// Write acquire on a slot that has not been released.
    #[error("slot {slot} is still in use")]
    SlotBusy {
        /// Requested slot.
        slot: usize,
    },
    /// Read acquire on a slot that holds no published fragment.
    #[error("slot {slot} holds no published fragment")]
    NotReady {
        /// Requested slot.
        slot: usize,
    },
    /// Read acquire found a different fragment than expected.
    #[error("slot {slot} holds fragment {found}, expected {expected}")]
    OutOfOrder {
        /// Requested slot.
        slot: usize,
        /// Fragment the reader expected.
        expected: u16,
        /// Fragment actually published.
        found: u16,
    },
    /// Fragment longer than the slot.
    #[error("{len} bytes do not fit a {capacity}-byte slot")]
    TooLarge {
        /// Requested length.
        len: usize,
        /// Slot capacity.
        capacity: usize,
    },
}

/// Ownership state of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotState {
    /// Available to the producer.
    Free,
    /// Held by the producer.
    Writing,
    /// Holds a published fragment.
    Ready {
        /// Fragment index.
        index: u16,
        /// Valid bytes.
        len: usize,
    },
    /// Held by the consumer.
    Reading {
        /// Fragment index.
        index: u16,
    },
}

struct Slot<M: RawMutex, const SIZE: usize> {
    state: BlockingMutex<M, Cell<SlotState>>,
    data: Mutex<M, ScratchBuffer<SIZE>>,
}

impl<M: RawMutex, const SIZE: usize> Slot<M, SIZE> {
    fn new() -> Self {
        Self {
            state: BlockingMutex::new(Cell::new(SlotState::Free)),
            data: Mutex::new(ScratchBuffer::zeroed()),
        }
    }

    fn state(&self) -> SlotState {
        self.state.lock(Cell::get)
    }

    fn set(&self, state: SlotState) {
        self.state.lock(|s| s.set(state));
    }

    /// Atomically move to `next` if `check` accepts the current state.
    fn transition<E>(
        &self,
        check: impl FnOnce(SlotState) -> Result<SlotState, E>,
    ) -> Result<SlotState, E> {
        self.state.lock(|s| {
            let current = s.get();
            let next = check(current)?;
            s.set(next);
            Ok(current)
        })
    }
}

/// Fixed pool of `SLOTS` scratch buffers of `SIZE` bytes.
pub struct PingPongPool<M: RawMutex, const SLOTS: usize, const SIZE: usize> {
    slots: [Slot<M, SIZE>; SLOTS],
}

impl<M: RawMutex, const SLOTS: usize, const SIZE: usize> Default for PingPongPool<M, SLOTS, SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex, const SLOTS: usize, const SIZE: usize> PingPongPool<M, SLOTS, SIZE> {
    /// All slots free.
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| Slot::new()),
        }
    }

    /// Number of slots.
    pub const fn slots(&self) -> usize {
        SLOTS
    }

    /// Bytes per slot.
    pub const fn slot_size(&self) -> usize {
        SIZE
    }

    /// Current state of `slot`.
    pub fn state(&self, slot: usize) -> Result<SlotState, PoolError> {
        Ok(self.slot(slot)?.state())
    }

    fn slot(&self, slot: usize) -> Result<&Slot<M, SIZE>, PoolError> {
        self.slots.get(slot).ok_or(PoolError::NoSuchSlot { slot })
    }

    /// Claim `slot` for writing. Fails unless the slot is `Free`.
    pub fn try_acquire_write(&self, slot: usize) -> Result<WriteSlot<'_, M, SIZE>, PoolError> {
        let s = self.slot(slot)?;
        s.transition(|current| match current {
            SlotState::Free => Ok(SlotState::Writing),
            _ => Err(PoolError::SlotBusy { slot }),
        })?;
        match s.data.try_lock() {
            Ok(data) => Ok(WriteSlot {
                slot,
                owner: s,
                data: Some(data),
                published: false,
            }),
            Err(_) => {
                s.set(SlotState::Free);
                Err(PoolError::SlotBusy { slot })
            }
        }
    }

    /// Claim `slot` for reading fragment `expected`. Fails unless the slot
    /// holds exactly that published fragment.
    pub fn try_acquire_read(
        &self,
        slot: usize,
        expected: u16,
    ) -> Result<ReadSlot<'_, M, SIZE>, PoolError> {
        let s = self.slot(slot)?;
        let previous = s.transition(|current| match current {
            SlotState::Ready { index, .. } if index == expected => {
                Ok(SlotState::Reading { index })
            }
            SlotState::Ready { index, .. } => Err(PoolError::OutOfOrder {
                slot,
                expected,
                found: index,
            }),
            _ => Err(PoolError::NotReady { slot }),
        })?;
        let len = match previous {
            SlotState::Ready { len, .. } => len,
            _ => 0,
        };
        match s.data.try_lock() {
            Ok(data) => Ok(ReadSlot {
                slot,
                index: expected,
                len,
                owner: s,
                data,
            }),
            Err(_) => {
                s.set(previous);
                Err(PoolError::NotReady { slot })
            }
        }
    }

    /// Return every slot to `Free`. Only call with no guards alive.
    pub fn reset(&self) {
        for slot in &self.slots {
            slot.set(SlotState::Free);
        }
    }
}

/// Exclusive write access to one slot.
///
/// Dropping without [`publish`](Self::publish) returns the slot to `Free`.
pub struct WriteSlot<'a, M: RawMutex, const SIZE: usize> {
    slot: usize,
    owner: &'a Slot<M, SIZE>,
    data: Option<MutexGuard<'a, M, ScratchBuffer<SIZE>>>,
    published: bool,
}

impl<'a, M: RawMutex, const SIZE: usize> WriteSlot<'a, M, SIZE> {
    /// Slot index.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// First `len` bytes of the slot.
    pub fn buf_mut(&mut self, len: usize) -> Result<&mut [u8], PoolError> {
        self.data
            .as_mut()
            .and_then(|d| d.prefix_mut(len))
            .ok_or(PoolError::TooLarge {
                len,
                capacity: SIZE,
            })
    }

    /// Hand the first `len` bytes to the consumer as fragment `index`.
    pub fn publish(mut self, index: u16, len: usize) -> Result<(), PoolError> {
        if len > SIZE {
            return Err(PoolError::TooLarge {
                len,
                capacity: SIZE,
            });
        }
        // Unlock the bytes before the state flips so a reader never sees
        // `Ready` with the data still locked.
        drop(self.data.take());
        self.owner.set(SlotState::Ready { index, len });
        self.published = true;
        Ok(())
    }
}

impl<M: RawMutex, const SIZE: usize> Drop for WriteSlot<'_, M, SIZE> {
    fn drop(&mut self) {
        if !self.published {
            drop(self.data.take());
            self.owner.set(SlotState::Free);
        }
    }
}

/// Exclusive read access to one published fragment.
///
/// Dropping (or [`release`](Self::release)) returns the slot to `Free`.
pub struct ReadSlot<'a, M: RawMutex, const SIZE: usize> {
    slot: usize,
    index: u16,
    len: usize,
    owner: &'a Slot<M, SIZE>,
    data: MutexGuard<'a, M, ScratchBuffer<SIZE>>,
}

impl<M: RawMutex, const SIZE: usize> ReadSlot<'_, M, SIZE> {
    /// Slot index.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Fragment index.
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Published bytes.
    pub fn bytes(&self) -> &[u8] {
        self.data.prefix(self.len).unwrap_or(&[])
    }

    /// Give the slot back to the producer.
    pub fn release(self) {}
}

impl<M: RawMutex, const SIZE: usize> Drop for ReadSlot<'_, M, SIZE> {
    fn drop(&mut self) {
        self.owner.set(SlotState::Free);
    }
}
