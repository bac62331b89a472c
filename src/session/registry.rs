// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The session registry: id allocation by rolling linear probe, the
//! active-session map, and the pending-cookie set. Sole owner of every
//! `Session` — timer callbacks and AAA responses address a session by
//! `SessionKey`/id and must tolerate it being gone by the time they run.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    time::{Duration, Instant},
};

use tracing::warn;

use crate::{
    error::CoreError,
    session::{PendingKey, Session, SessionKey},
};

const PENDING_TIMEOUT: Duration = Duration::from_secs(10);
const DEALLOC_ANOMALY_WINDOW: Duration = Duration::from_secs(10);
const DEALLOC_ANOMALY_THRESHOLD: usize = 10;

pub struct SessionRegistry {
    active: HashMap<SessionKey, Session>,
    id_index: HashMap<u16, SessionKey>,
    used_ids: HashSet<u16>,
    pending: HashMap<PendingKey, Instant>,
    pending_timeout: Duration,
    next_id_hint: u16,
    recent_deallocations: VecDeque<Instant>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_pending_timeout(PENDING_TIMEOUT)
    }

    /// Builds a registry whose pending-cookie entries expire after
    /// `pending_timeout` instead of the default ten seconds, per the
    /// config's `PendingCookieTimeout` knob.
    pub fn with_pending_timeout(pending_timeout: Duration) -> Self {
        Self {
            active: HashMap::new(),
            id_index: HashMap::new(),
            used_ids: HashSet::new(),
            pending: HashMap::new(),
            pending_timeout,
            next_id_hint: 1,
            recent_deallocations: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Rolling linear probe from the advisory hint; the hint is never
    /// load-bearing for correctness, only for spreading ids out.
    fn allocate_id(&mut self) -> Result<u16, CoreError> {
        let start = if self.next_id_hint == 0 { 1 } else { self.next_id_hint };
        let mut candidate = start;
        loop {
            if !self.used_ids.contains(&candidate) {
                self.next_id_hint = if candidate == u16::MAX { 1 } else { candidate + 1 };
                return Ok(candidate);
            }
            candidate = if candidate == u16::MAX { 1 } else { candidate + 1 };
            if candidate == start {
                return Err(CoreError::Exhausted);
            }
        }
    }

    /// Allocates an id and inserts `make_session(id)`'s result atomically:
    /// rolls `used_ids` back if the active-map insert somehow collides.
    pub fn allocate_and_insert(
        &mut self,
        key_for: impl FnOnce(u16) -> SessionKey,
        make_session: impl FnOnce(u16) -> Session,
    ) -> Result<u16, CoreError> {
        let id = self.allocate_id()?;
        self.used_ids.insert(id);
        let key = key_for(id);

        if self.active.contains_key(&key) {
            self.used_ids.remove(&id);
            return Err(CoreError::UnexpectedSession);
        }
        debug_assert!(!self.id_index.contains_key(&id), "allocate_id handed out an id still present in id_index");

        self.active.insert(key, make_session(id));
        self.id_index.insert(id, key);
        debug_assert_eq!(self.active.len(), self.id_index.len(), "active/id_index fell out of sync");
        Ok(id)
    }

    pub fn get_by_key_mut(&mut self, key: &SessionKey) -> Option<&mut Session> {
        self.active.get_mut(key)
    }

    pub fn get_by_id_mut(&mut self, id: u16) -> Option<&mut Session> {
        let key = *self.id_index.get(&id)?;
        self.active.get_mut(&key)
    }

    pub fn key_for_id(&self, id: u16) -> Option<SessionKey> {
        self.id_index.get(&id).copied()
    }

    /// Removes a session by id, tracking the deallocation for the
    /// anomaly-rate check (more than ten removals in ten seconds is logged).
    pub fn remove_by_id(&mut self, id: u16) -> Option<Session> {
        let key = self.id_index.remove(&id)?;
        let was_used = self.used_ids.remove(&id);
        debug_assert!(was_used, "id {id} was indexed but not marked used: registry invariant violation");
        let session = self.active.remove(&key);
        debug_assert!(session.is_some(), "id {id} was indexed but had no active session: double-free of a session id");

        let now = Instant::now();
        self.recent_deallocations.push_back(now);
        while let Some(&oldest) = self.recent_deallocations.front() {
            if now.duration_since(oldest) > DEALLOC_ANOMALY_WINDOW {
                self.recent_deallocations.pop_front();
            } else {
                break;
            }
        }
        if self.recent_deallocations.len() > DEALLOC_ANOMALY_THRESHOLD {
            warn!(
                target: "session",
                count = self.recent_deallocations.len(),
                "deallocation rate anomaly: more than {DEALLOC_ANOMALY_THRESHOLD} sessions torn down in {DEALLOC_ANOMALY_WINDOW:?}"
            );
        }

        session
    }

    pub fn add_pending(&mut self, key: PendingKey) {
        self.pending.insert(key, Instant::now() + self.pending_timeout);
    }

    /// Consumes a pending entry if present and not yet expired. An
    /// expired-but-not-yet-swept entry is treated as absent.
    pub fn consume_pending(&mut self, key: &PendingKey) -> Option<()> {
        let expiry = self.pending.remove(key)?;
        if Instant::now() <= expiry {
            Some(())
        } else {
            None
        }
    }

    /// Drops pending entries whose 10-second window elapsed; the reactor
    /// calls this on a periodic sweep tick.
    pub fn sweep_pending(&mut self) {
        let now = Instant::now();
        self.pending.retain(|_, expiry| now <= *expiry);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Global shutdown: drains every active session (dropping it cancels
    /// its timers) and clears the allocator state.
    pub fn clear_all(&mut self) -> Vec<Session> {
        let sessions: Vec<Session> = self.active.drain().map(|(_, s)| s).collect();
        self.id_index.clear();
        self.used_ids.clear();
        self.pending.clear();
        sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fsm::{ipcp::IpcpPolicy, lcp::LcpPolicy},
        session::Encap,
    };

    fn encap(mac: [u8; 6]) -> Encap {
        Encap { src_mac: mac, dst_mac: [0xff; 6], outer_vlan: 200, inner_vlan: 0, ethertype: 0x8863 }
    }

    fn make_session(id: u16, mac: [u8; 6]) -> Session {
        Session::new(
            id,
            encap(mac),
            LcpPolicy::new(1492, true, false),
            IpcpPolicy::new("100.64.0.10".parse().expect("addr"), None, None),
            true,
            false,
        )
    }

    #[test]
    fn allocates_ids_starting_from_one() {
        let mut reg = SessionRegistry::new();
        let mac = [0xaa; 6];
        let id = reg
            .allocate_and_insert(|id| SessionKey::new(mac, id, 200, 0), |id| make_session(id, mac))
            .expect("allocate");
        assert_eq!(id, 1);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn removal_frees_the_id_for_reuse() {
        let mut reg = SessionRegistry::new();
        let mac = [0xaa; 6];
        let id = reg
            .allocate_and_insert(|id| SessionKey::new(mac, id, 200, 0), |id| make_session(id, mac))
            .expect("allocate");
        assert!(reg.remove_by_id(id).is_some());
        assert_eq!(reg.len(), 0);

        let id2 = reg
            .allocate_and_insert(|id| SessionKey::new(mac, id, 200, 0), |id| make_session(id, mac))
            .expect("allocate");
        assert_eq!(id2, 1);
    }

    #[test]
    fn pending_entry_is_consumed_exactly_once() {
        let mut reg = SessionRegistry::new();
        let key = PendingKey { mac: [1; 6], outer_vlan: 200, inner_vlan: 0, ac_cookie: vec![9; 16] };
        reg.add_pending(key.clone());
        assert_eq!(reg.pending_len(), 1);
        assert!(reg.consume_pending(&key).is_some());
        assert!(reg.consume_pending(&key).is_none());
    }
}
