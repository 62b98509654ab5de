//! Descriptor ring.
//!
//! # Slot state machine
//! ```text
//!   EMPTY ──fill()──> FILLED ──post()──> POSTED ──device done──> COMPLETED
//!     ▲                 ▲                                           │
//!     │                 └─────────── recycle() ◄────────────────────┤
//!     └──────────────────────────── retire() ◄──────────────────────┘
//! ```
//!
//! # Cursors
//! ```text
//!   next_to_clean ──> [POSTED ... POSTED] <── next_to_use
//!   next_to_use   ──> [FILLED ... FILLED] <── next_to_alloc   (recycled, not yet posted)
//!   one slot before next_to_clean is always left unposted
//! ```
//!
//! `capacity_unused = (next_to_clean - next_to_use - 1) mod N`. The reserved
//! slot keeps a full ring distinguishable from an empty one.

use alloc::vec::Vec;
use core::fmt;

use log::warn;

use crate::config::check_ring_size;
use crate::desc::{Completion, Descriptor};
use crate::error::{Result, RingError};
use crate::hw::DescriptorPort;

/// Smallest usable ring (one postable slot plus the reserved one).
pub const MIN_RING_SIZE: usize = 2;

/// Largest ring the index type and hardware FIFO support.
pub const MAX_RING_SIZE: usize = 4096;

/// Ownership tag of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// No buffer.
    Empty,
    /// Software-owned buffer waiting to be posted.
    Filled,
    /// Device-owned; DMA may be in flight.
    Posted,
    /// Device finished; buffer is with the completion path.
    Completed,
}

impl SlotState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_become(self, next: SlotState) -> bool {
        use SlotState::*;
        matches!(
            (self, next),
            (Empty, Filled) | (Filled, Posted) | (Posted, Completed) | (Completed, Empty)
                | (Completed, Filled)
        )
    }
}

struct Slot<B> {
    state: SlotState,
    buffer: Option<B>,
}

/// A slot the device has finished with.
///
/// The buffer travels with the token; hand the token back through
/// [`DescriptorRing::retire`] or [`DescriptorRing::recycle`].
pub struct Completed<B> {
    index: u16,
    completion: Completion,
    buffer: B,
}

impl<B> Completed<B> {
    /// Slot the buffer came from.
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Device report.
    pub fn completion(&self) -> Completion {
        self.completion
    }

    /// The buffer.
    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    /// The buffer, mutably (e.g. to flip its active half).
    pub fn buffer_mut(&mut self) -> &mut B {
        &mut self.buffer
    }
}

impl<B: fmt::Debug> fmt::Debug for Completed<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completed")
            .field("index", &self.index)
            .field("completion", &self.completion)
            .field("buffer", &self.buffer)
            .finish()
    }
}

/// A rejected post; the caller gets its buffer back.
pub struct PostError<B> {
    /// Why the post failed.
    pub kind: RingError,
    buffer: B,
}

impl<B> PostError<B> {
    /// Recover the buffer.
    pub fn into_buffer(self) -> B {
        self.buffer
    }
}

impl<B> fmt::Debug for PostError<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostError").field("kind", &self.kind).finish()
    }
}

/// Fixed-capacity ring of descriptors shared with a device.
pub struct DescriptorRing<B, P: DescriptorPort> {
    slots: Vec<Slot<B>>,
    port: P,
    next_to_use: u16,
    next_to_clean: u16,
    next_to_alloc: u16,
    /// Completions read from the device and not yet reclaimed.
    pending: u32,
    /// Over-reported completions still queued behind the real ones.
    stale: u32,
    anomalies: u64,
    warned: bool,
}

impl<B, P: DescriptorPort> DescriptorRing<B, P> {
    /// Create a ring of `capacity` slots; all cursors start at zero.
    pub fn new(capacity: usize, port: P) -> Result<Self> {
        check_ring_size(capacity)?;
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot {
            state: SlotState::Empty,
            buffer: None,
        });
        Ok(Self {
            slots,
            port,
            next_to_use: 0,
            next_to_clean: 0,
            next_to_alloc: 0,
            pending: 0,
            stale: 0,
            anomalies: 0,
            warned: false,
        })
    }

    /// Total slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots software may still post.
    #[inline]
    pub fn capacity_unused(&self) -> usize {
        let n = self.capacity();
        (self.next_to_clean as usize + n - self.next_to_use as usize - 1) % n
    }

    /// Slots posted and not yet reclaimed.
    #[inline]
    pub fn outstanding(&self) -> usize {
        let n = self.capacity();
        (self.next_to_use as usize + n - self.next_to_clean as usize) % n
    }

    /// Next slot software will post.
    #[inline]
    pub fn next_to_use(&self) -> u16 {
        self.next_to_use
    }

    /// Next slot software will reclaim.
    #[inline]
    pub fn next_to_clean(&self) -> u16 {
        self.next_to_clean
    }

    /// Next slot a recycled buffer will be placed in.
    #[inline]
    pub fn next_to_alloc(&self) -> u16 {
        self.next_to_alloc
    }

    /// Ownership tag of slot `index`.
    pub fn slot_state(&self, index: u16) -> Option<SlotState> {
        self.slots.get(index as usize).map(|slot| slot.state)
    }

    /// Whether the slot at `next_to_use` already holds a recycled buffer.
    #[inline]
    pub fn next_is_filled(&self) -> bool {
        self.slots[self.next_to_use as usize].state == SlotState::Filled
    }

    /// Times the device reported more completions than were outstanding.
    #[inline]
    pub fn anomalies(&self) -> u64 {
        self.anomalies
    }

    /// The hardware port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// The hardware port, mutably.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    #[inline]
    fn wrap(&self, index: u16) -> u16 {
        if index as usize + 1 == self.capacity() {
            0
        } else {
            index + 1
        }
    }

    fn invalid(&self, index: u16) -> RingError {
        RingError::InvalidSlotState {
            index,
            state: self.slots[index as usize].state,
        }
    }

    /// Place `buffer` in the slot at `next_to_use` without posting it.
    pub fn fill(&mut self, buffer: B) -> core::result::Result<u16, PostError<B>> {
        let index = self.next_to_use;
        if self.capacity_unused() == 0 {
            return Err(PostError {
                kind: RingError::Full,
                buffer,
            });
        }
        if self.slots[index as usize].state != SlotState::Empty {
            return Err(PostError {
                kind: self.invalid(index),
                buffer,
            });
        }

        let slot = &mut self.slots[index as usize];
        slot.buffer = Some(buffer);
        slot.state = SlotState::Filled;
        Ok(index)
    }

    /// Fill and post the slot at `next_to_use` in one step.
    ///
    /// Fails with [`RingError::Full`] when `capacity_unused() == 0`; the
    /// in-flight slot is never overwritten.
    pub fn post(&mut self, buffer: B, desc: Descriptor) -> core::result::Result<u16, PostError<B>> {
        self.fill(buffer)?;
        // fill() checked capacity and state, so the post cannot fail.
        let index = self.commit(&desc);
        Ok(index)
    }

    /// Post the already-filled slot at `next_to_use` with `desc`.
    pub fn post_filled(&mut self, desc: Descriptor) -> Result<u16> {
        self.post_filled_with(|_| Ok(desc))
    }

    /// Post the already-filled slot at `next_to_use`; `describe` builds the
    /// descriptor from its buffer.
    pub fn post_filled_with<F>(&mut self, describe: F) -> Result<u16>
    where
        F: FnOnce(&B) -> Result<Descriptor>,
    {
        let index = self.next_to_use;
        if self.capacity_unused() == 0 {
            return Err(RingError::Full);
        }
        let slot = &self.slots[index as usize];
        let desc = match (slot.state, slot.buffer.as_ref()) {
            (SlotState::Filled, Some(buffer)) => describe(buffer)?,
            _ => return Err(self.invalid(index)),
        };
        Ok(self.commit(&desc))
    }

    /// Push the descriptor for the filled slot at `next_to_use` and advance.
    fn commit(&mut self, desc: &Descriptor) -> u16 {
        let index = self.next_to_use;
        debug_assert!(self.slots[index as usize].state.can_become(SlotState::Posted));

        self.port.push(index, desc);
        self.slots[index as usize].state = SlotState::Posted;

        let next = self.wrap(index);
        if self.next_to_alloc == index {
            self.next_to_alloc = next;
        }
        self.next_to_use = next;
        index
    }

    /// Take the slot at `next_to_clean` if the device has completed it.
    ///
    /// The device's completion count is clamped to the outstanding count.
    /// The excess is counted as one anomaly and its entries are popped and
    /// discarded once the real ones are consumed, so they never reclaim a
    /// slot posted later.
    pub fn reclaim(&mut self) -> Option<Completed<B>> {
        if self.pending == 0 {
            let mut reported = self.port.completions();
            if self.stale > 0 {
                let skip = self.stale.min(reported);
                for _ in 0..skip {
                    self.port.pop_completion();
                }
                self.stale -= skip;
                reported -= skip;
            }
            if reported == 0 {
                return None;
            }
            let outstanding = self.outstanding() as u32;
            if reported > outstanding {
                self.anomalies += 1;
                self.stale += reported - outstanding;
                if !self.warned {
                    warn!(
                        "ring: device reported {} completions with {} outstanding, clamping",
                        reported, outstanding
                    );
                    self.warned = true;
                }
            }
            self.pending = reported.min(outstanding);
            if self.pending == 0 {
                return None;
            }
        }

        let index = self.next_to_clean;
        let slot = &mut self.slots[index as usize];
        let buffer = match (slot.state, slot.buffer.take()) {
            (SlotState::Posted, Some(buffer)) => buffer,
            (state, buffer) => {
                slot.buffer = buffer;
                warn!("ring: slot {} at next_to_clean is {:?}, not posted", index, state);
                return None;
            }
        };
        slot.state = SlotState::Completed;

        let completion = self.port.pop_completion();
        self.pending -= 1;
        self.next_to_clean = self.wrap(index);

        Some(Completed {
            index,
            completion,
            buffer,
        })
    }

    /// Finish with a completed slot and take its buffer (`COMPLETED -> EMPTY`).
    pub fn retire(&mut self, done: Completed<B>) -> B {
        let slot = &mut self.slots[done.index as usize];
        debug_assert_eq!(slot.state, SlotState::Completed);
        slot.state = SlotState::Empty;
        done.buffer
    }

    /// Return a completed buffer to the ring for reposting.
    ///
    /// The buffer lands in the slot at `next_to_alloc`, ahead of the next
    /// post. If no such slot is free the buffer is handed back for release.
    pub fn recycle(&mut self, done: Completed<B>) -> core::result::Result<(), B> {
        let n = self.capacity();
        let buffer = self.retire(done);

        let target = self.next_to_alloc;
        let ahead = (target as usize + n - self.next_to_use as usize) % n;
        if ahead >= self.capacity_unused() {
            return Err(buffer);
        }
        let slot = &mut self.slots[target as usize];
        if slot.state != SlotState::Empty {
            return Err(buffer);
        }

        slot.buffer = Some(buffer);
        slot.state = SlotState::Filled;
        self.next_to_alloc = self.wrap(target);
        Ok(())
    }

    /// Tear the ring down: every buffer still held comes back, all slots
    /// become empty and the cursors return to zero.
    ///
    /// Tokens from [`reclaim`](Self::reclaim) that were never returned keep
    /// their own buffers.
    pub fn drain(&mut self) -> Vec<B> {
        let mut buffers = Vec::new();
        for slot in self.slots.iter_mut() {
            if let Some(buffer) = slot.buffer.take() {
                buffers.push(buffer);
            }
            slot.state = SlotState::Empty;
        }
        self.next_to_use = 0;
        self.next_to_clean = 0;
        self.next_to_alloc = 0;
        self.pending = 0;
        self.stale = 0;
        buffers
    }
}
