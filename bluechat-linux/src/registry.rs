//! Session registry: active sessions keyed by peer address and the pending (discovered,
//! not yet resolved) list, behind one lock. Callers only get snapshots.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bluechat_core::{Peer, PeerAddr};

use crate::session::{lock, Session};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("peer {0} already has an active session")]
    DuplicatePeer(PeerAddr),
    #[error("session for {0} is not pending")]
    NotPending(PeerAddr),
}

#[derive(Debug, Default)]
struct Inner {
    active: HashMap<PeerAddr, Arc<Session>>,
    pending: Vec<Arc<Session>>,
}

#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a discovered session. Returns false if its address is already active or pending.
    pub fn add_pending(&self, session: Arc<Session>) -> bool {
        let mut inner = lock(&self.inner);
        if inner.active.contains_key(session.addr())
            || inner.pending.iter().any(|s| s.addr() == session.addr())
        {
            return false;
        }
        inner.pending.push(session);
        true
    }

    /// Pending sessions in discovery order.
    pub fn pending(&self) -> Vec<Arc<Session>> {
        lock(&self.inner).pending.clone()
    }

    /// Move a pending session to the active set in one step.
    pub fn promote(&self, session: &Arc<Session>) -> Result<(), RegistryError> {
        let mut inner = lock(&self.inner);
        let idx = inner
            .pending
            .iter()
            .position(|s| Arc::ptr_eq(s, session))
            .ok_or_else(|| RegistryError::NotPending(session.addr().clone()))?;
        if inner.active.contains_key(session.addr()) {
            return Err(RegistryError::DuplicatePeer(session.addr().clone()));
        }
        let session = inner.pending.remove(idx);
        inner.active.insert(session.addr().clone(), session);
        Ok(())
    }

    /// Insert an inbound session directly into the active set.
    pub fn insert_active(&self, session: Arc<Session>) -> Result<(), RegistryError> {
        let mut inner = lock(&self.inner);
        if inner.active.contains_key(session.addr()) {
            return Err(RegistryError::DuplicatePeer(session.addr().clone()));
        }
        inner.pending.retain(|s| s.addr() != session.addr());
        inner.active.insert(session.addr().clone(), session);
        Ok(())
    }

    pub fn contains_active(&self, addr: &PeerAddr) -> bool {
        lock(&self.inner).active.contains_key(addr)
    }

    /// Remove exactly this session instance, close it, and stop its workers.
    /// Returns false if it was not active (already removed, or replaced).
    pub fn remove(&self, session: &Arc<Session>) -> bool {
        let removed = {
            let mut inner = lock(&self.inner);
            match inner.active.get(session.addr()) {
                Some(current) if Arc::ptr_eq(current, session) => {
                    inner.active.remove(session.addr());
                    true
                }
                _ => false,
            }
        };
        session.close();
        removed
    }

    /// Drop every pending session; they never matched the service.
    pub fn clear_pending(&self) -> usize {
        let dropped = std::mem::take(&mut lock(&self.inner).pending);
        for session in &dropped {
            session.close();
        }
        dropped.len()
    }

    pub fn active(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<_> = lock(&self.inner).active.values().cloned().collect();
        sessions.sort_by(|a, b| a.addr().cmp(b.addr()));
        sessions
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.active().iter().map(|s| s.peer()).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
