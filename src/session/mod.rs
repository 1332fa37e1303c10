//! Exclusive-writer gate for one test system.
//!
//! Every operation that mutates the store, the partition or the relay
//! counters runs inside a session. At most one session is open at a time;
//! a second writer is turned away with [`Error::Busy`] instead of queueing
//! behind the first. Readers never take the gate.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Opaque session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// What a session was opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Batch,
    Planned,
    Reset,
}

#[derive(Debug, Default)]
pub struct SessionGate {
    /// Id of the open session, 0 when the gate is free.
    holder: AtomicU64,
    next_id: AtomicU64,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session, or fail immediately if one is already open.
    pub fn try_acquire(&self, kind: SessionKind) -> Result<SessionGuard<'_>> {
        let current = self.holder.load(Ordering::Acquire);
        if current != 0 {
            return Err(Error::Busy { holder: current });
        }
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        if let Err(holder) = self.holder.compare_exchange(0, id.0, Ordering::Acquire, Ordering::Acquire) {
            return Err(Error::Busy { holder });
        }
        tracing::debug!(session = %id, ?kind, "session opened");
        Ok(SessionGuard { gate: self, id, kind })
    }

    pub fn is_busy(&self) -> bool {
        self.holder.load(Ordering::Acquire) != 0
    }

    /// Id of the open session, if any.
    pub fn holder(&self) -> Option<SessionId> {
        match self.holder.load(Ordering::Acquire) {
            0 => None,
            id => Some(SessionId(id)),
        }
    }
}

/// Open session; closes on drop.
#[derive(Debug)]
pub struct SessionGuard<'g> {
    gate: &'g SessionGate,
    id: SessionId,
    kind: SessionKind,
}

impl SessionGuard<'_> {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.gate.holder.store(0, Ordering::Release);
        tracing::debug!(session = %self.id, "session closed");
    }
}
