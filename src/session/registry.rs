//! Session arena
//!
//! Sessions live in a fixed-capacity slot table. A [`SessionId`] carries the
//! slot index and the generation the slot had when the session was created,
//! so ids of removed sessions never reach a newer occupant of the slot.

use super::engine::Session;
use super::link::Link;
use super::timer::{TimerFired, TimerService};
use crate::{Error, Result};
use std::fmt;
use tracing::{debug, info};

/// Handle to a session in a [`SessionRegistry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId {
    index: u32,
    generation: u32,
}

impl SessionId {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ppp{}", self.index)
    }
}

#[derive(Debug)]
struct Slot<L: Link> {
    generation: u32,
    session: Option<Session<L>>,
}

/// Bounded set of live sessions
#[derive(Debug)]
pub struct SessionRegistry<L: Link> {
    slots: Vec<Slot<L>>,
    capacity: usize,
    len: usize,
}

impl<L: Link> SessionRegistry<L> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            capacity,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Create a session in a free slot
    pub fn insert(&mut self, build: impl FnOnce(SessionId) -> Session<L>) -> Result<SessionId> {
        let index = match self.slots.iter().position(|slot| slot.session.is_none()) {
            Some(index) => index,
            None if self.slots.len() < self.capacity => {
                self.slots.push(Slot {
                    generation: 0,
                    session: None,
                });
                self.slots.len() - 1
            }
            None => {
                return Err(Error::RegistryFull {
                    capacity: self.capacity,
                })
            }
        };

        let slot = &mut self.slots[index];
        slot.generation = slot.generation.wrapping_add(1);
        let id = SessionId::new(index as u32, slot.generation);
        slot.session = Some(build(id));
        self.len += 1;
        info!(session = %id, "session created");
        Ok(id)
    }

    pub fn get(&self, id: SessionId) -> Result<&Session<L>> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.session.as_ref())
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    pub fn get_mut(&mut self, id: SessionId) -> Result<&mut Session<L>> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.session.as_mut())
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    /// Remove a session, cancelling its timers first
    pub fn remove(&mut self, id: SessionId, timers: &mut dyn TimerService) -> Result<Session<L>> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        let mut session = slot
            .session
            .take()
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        session.release(timers);
        self.len -= 1;
        info!(session = %id, status = %session.status(), "session removed");
        Ok(session)
    }

    /// Deliver a timer expiry to its session. Expiries for removed sessions
    /// are dropped.
    pub fn timer_fired(&mut self, fired: TimerFired, ctx: &mut super::Context<'_>) {
        match self.get_mut(fired.session) {
            Ok(session) => session.timer_fired(fired.purpose, fired.handle, ctx),
            Err(_) => debug!(session = %fired.session, purpose = ?fired.purpose, "timer for unknown session"),
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.session
                .as_ref()
                .map(|_| SessionId::new(index as u32, slot.generation))
        })
    }
}
