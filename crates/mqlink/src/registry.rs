//! Handle registry.
//!
//! Fixed-capacity table of live sessions behind one global lock. Besides
//! handle lookup it answers the reverse question, which handle owns a given
//! engine context, for packets reported by a protocol engine.
//!
//! Lock order: a thread holding a session lock may take the registry lock.
//! The registry never takes a session lock.

use std::fmt;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::engine::EngineContext;
use crate::error::{ClientError, Result};
use crate::session::Session;

/// Opaque reference to one client session.
///
/// The generation makes a handle stale once its slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    index: u32,
    generation: u32,
}

impl SessionHandle {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Registry slot index. Unique among live sessions.
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}.{}", self.index, self.generation)
    }
}

struct Entry {
    context: EngineContext,
    session: Arc<Session>,
}

#[derive(Default)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

pub(crate) struct Registry {
    slots: Mutex<Vec<Slot>>,
}

impl Registry {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new((0..capacity).map(|_| Slot::default()).collect()),
        }
    }

    /// Install a session in the first free slot. Fails closed when full.
    pub(crate) fn register(
        &self,
        context: EngineContext,
        session: Arc<Session>,
    ) -> Result<SessionHandle> {
        let mut slots = self.slots.lock();
        let capacity = slots.len();
        let (index, slot) = slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.entry.is_none())
            .ok_or_else(|| {
                ClientError::Internal(format!("session registry full ({} entries)", capacity))
            })?;
        slot.entry = Some(Entry { context, session });
        let handle = SessionHandle::new(index as u32, slot.generation);
        debug!("Registered {} ({:?})", handle, context);
        Ok(handle)
    }

    pub(crate) fn lookup(&self, handle: SessionHandle) -> Result<Arc<Session>> {
        let slots = self.slots.lock();
        match slots.get(handle.index as usize) {
            Some(Slot {
                generation,
                entry: Some(entry),
            }) if *generation == handle.generation => Ok(entry.session.clone()),
            _ => Err(ClientError::ObjectNotInitialized),
        }
    }

    /// Linear scan for the session driving `context`.
    pub(crate) fn lookup_by_engine_context(&self, context: EngineContext) -> Option<SessionHandle> {
        let slots = self.slots.lock();
        slots.iter().enumerate().find_map(|(index, slot)| match &slot.entry {
            Some(entry) if entry.context == context => {
                Some(SessionHandle::new(index as u32, slot.generation))
            }
            _ => None,
        })
    }

    /// Detach a session. Its handle becomes stale.
    pub(crate) fn deregister(&self, handle: SessionHandle) -> Result<Arc<Session>> {
        let mut slots = self.slots.lock();
        let slot = slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .ok_or(ClientError::ObjectNotInitialized)?;
        let entry = slot.entry.take().ok_or(ClientError::ObjectNotInitialized)?;
        slot.generation = slot.generation.wrapping_add(1);
        debug!("Deregistered {}", handle);
        Ok(entry.session)
    }

    pub(crate) fn handles(&self) -> Vec<SessionHandle> {
        self.slots
            .lock()
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.entry.is_some())
            .map(|(index, slot)| SessionHandle::new(index as u32, slot.generation))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots
            .lock()
            .iter()
            .filter(|slot| slot.entry.is_some())
            .count()
    }
}
