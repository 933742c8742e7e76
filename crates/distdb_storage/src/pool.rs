//! Capacity-bounded pool of engine handles.

use crate::engine::EnginePoolConfig;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::sync::Arc;

/// Kind of handle slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// The dedicated writer slot.
    Writer,
    /// One of the reader slots.
    Reader,
}

#[derive(Debug, Default)]
struct Slots {
    writers: usize,
    readers: usize,
}

/// Bounds how many reads and writes run against one engine at a time.
///
/// Acquisition never blocks: when every slot of a kind is taken the caller
/// gets `Busy` and the sync layer retries later.
#[derive(Debug, Clone)]
pub struct HandlePool {
    config: EnginePoolConfig,
    in_use: Arc<Mutex<Slots>>,
}

impl HandlePool {
    /// Creates a pool with the given capacity.
    pub fn new(config: EnginePoolConfig) -> Self {
        Self {
            config,
            in_use: Arc::new(Mutex::new(Slots::default())),
        }
    }

    /// Takes a slot of `kind`, released when the guard drops.
    ///
    /// # Errors
    ///
    /// Returns `Busy` if no slot of that kind is free.
    pub fn acquire(&self, kind: HandleKind) -> StorageResult<HandleGuard> {
        let mut slots = self.in_use.lock();
        let (used, cap) = match kind {
            HandleKind::Writer => (&mut slots.writers, self.config.writers),
            HandleKind::Reader => (&mut slots.readers, self.config.readers),
        };
        if *used >= cap {
            return Err(StorageError::busy(format!("no free {kind:?} handle")));
        }
        *used += 1;
        Ok(HandleGuard {
            kind,
            in_use: Arc::clone(&self.in_use),
        })
    }

    /// Slots of `kind` currently taken.
    pub fn in_use(&self, kind: HandleKind) -> usize {
        let slots = self.in_use.lock();
        match kind {
            HandleKind::Writer => slots.writers,
            HandleKind::Reader => slots.readers,
        }
    }
}

/// A taken pool slot.
#[derive(Debug)]
pub struct HandleGuard {
    kind: HandleKind,
    in_use: Arc<Mutex<Slots>>,
}

impl HandleGuard {
    /// Kind of slot held.
    pub fn kind(&self) -> HandleKind {
        self.kind
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        let mut slots = self.in_use.lock();
        match self.kind {
            HandleKind::Writer => slots.writers = slots.writers.saturating_sub(1),
            HandleKind::Reader => slots.readers = slots.readers.saturating_sub(1),
        }
    }
}
