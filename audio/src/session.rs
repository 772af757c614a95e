//! Fixed-capacity session arena.
//!
//! Sessions live in a pool of `N` slots scanned linearly. A live slot
//! carries [`SESSION_MAGIC`]; closing a session zeroes the tag and bumps the
//! slot generation, so a handle kept past close no longer resolves and
//! every lookup through it fails with [`AudioError::Fault`].

use bitflags::bitflags;

use crate::error::{AudioError, Result};
use crate::hal::DmaIrq;
use crate::klog::klog_error;

/// Tag stamped into a slot while its session is open
pub const SESSION_MAGIC: u32 = 0x1a2b_3c4d;

bitflags! {
    /// Lifecycle of a session.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SessionFlags: u8 {
        const OPEN = 1 << 0;
        /// Hardware enabled (input) or DMA configured (output)
        const CONFIG = 1 << 1;
        const START = 1 << 2;
    }
}

/// Completion callback: `(cb_data, reason)`.
///
/// Runs from [`AudioDevice::dispatch_dma_events`](crate::device::AudioDevice::dispatch_dma_events)
/// with no driver lock held. It must not block.
pub type DmaCallback = fn(usize, DmaIrq);

/// Ring buffer the DMA re-arms on its own.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReloadBuffer {
    pub addr: usize,
    pub len: u32,
}

/// Typed reference to one open session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    index: u8,
    generation: u16,
}

impl SessionHandle {
    pub const fn index(&self) -> usize {
        self.index as usize
    }

    pub const fn generation(&self) -> u16 {
        self.generation
    }

    /// Compact form carried through the DMA callback token.
    pub const fn token(&self) -> u32 {
        ((self.generation as u32) << 8) | self.index as u32
    }

    pub const fn from_token(token: u32) -> Self {
        Self {
            index: (token & 0xFF) as u8,
            generation: ((token >> 8) & 0xFFFF) as u16,
        }
    }
}

/// What the pool needs to know about a stored session.
pub trait PooledSession {
    /// Channel-type bits the session claims
    fn channel_bits(&self) -> u16;
    fn is_open(&self) -> bool;
}

struct Slot<T> {
    magic: u32,
    generation: u16,
    session: Option<T>,
}

pub struct SessionPool<T, const N: usize> {
    slots: [Slot<T>; N],
}

impl<T: PooledSession, const N: usize> SessionPool<T, N> {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| Slot {
                magic: 0,
                generation: 0,
                session: None,
            }),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Open sessions whose channel type overlaps `bits`.
    pub fn count_open(&self, bits: u16) -> usize {
        self.slots
            .iter()
            .filter_map(|slot| slot.session.as_ref())
            .filter(|s| s.is_open() && s.channel_bits() & bits != 0)
            .count()
    }

    /// Place `session` in the first free slot.
    pub fn insert(&mut self, session: T) -> Option<SessionHandle> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.session.is_none())?;
        slot.magic = SESSION_MAGIC;
        slot.session = Some(session);
        Some(SessionHandle {
            index: index as u8,
            generation: slot.generation,
        })
    }

    fn slot(&self, handle: SessionHandle) -> Result<&Slot<T>> {
        match self.slots.get(handle.index()) {
            Some(slot) if slot.magic == SESSION_MAGIC && slot.generation == handle.generation => Ok(slot),
            _ => {
                klog_error("session", &alloc::format!("stale session handle {:?}", handle));
                Err(AudioError::Fault)
            }
        }
    }

    fn slot_mut(&mut self, handle: SessionHandle) -> Result<&mut Slot<T>> {
        match self.slots.get_mut(handle.index()) {
            Some(slot) if slot.magic == SESSION_MAGIC && slot.generation == handle.generation => Ok(slot),
            _ => {
                klog_error("session", &alloc::format!("stale session handle {:?}", handle));
                Err(AudioError::Fault)
            }
        }
    }

    pub fn get(&self, handle: SessionHandle) -> Result<&T> {
        self.slot(handle)?.session.as_ref().ok_or(AudioError::Fault)
    }

    pub fn get_mut(&mut self, handle: SessionHandle) -> Result<&mut T> {
        self.slot_mut(handle)?.session.as_mut().ok_or(AudioError::Fault)
    }

    /// Free the slot and hand the session back.
    pub fn remove(&mut self, handle: SessionHandle) -> Result<T> {
        let slot = self.slot_mut(handle)?;
        slot.magic = 0;
        slot.generation = slot.generation.wrapping_add(1);
        slot.session.take().ok_or(AudioError::Fault)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SessionHandle, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.session.as_ref().map(|s| {
                (
                    SessionHandle {
                        index: index as u8,
                        generation: slot.generation,
                    },
                    s,
                )
            })
        })
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.session.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: PooledSession, const N: usize> Default for SessionPool<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
