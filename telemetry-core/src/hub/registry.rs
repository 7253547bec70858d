//! Bookkeeping for the viewer sessions the hub currently serves.

use std::{collections::HashMap, sync::Arc};

use crate::{
    error::{Result, TelemetryError},
    hub::session::{Session, SessionHandle, SessionId, SessionState},
    model::BroadcastEvent,
};

/// The set of live viewer sessions, in registration order.
///
/// Owned by the hub's coordination loop; every mutation happens on that
/// loop, so no locking is needed here.
#[derive(Debug)]
pub struct SessionRegistry {
    order: Vec<SessionId>,
    sessions: HashMap<SessionId, Session>,
    max_sessions: usize,
}

impl SessionRegistry {
    /// An empty registry holding at most `max_sessions` (at least one).
    pub fn new(max_sessions: usize) -> Self {
        Self {
            order: Vec::new(),
            sessions: HashMap::new(),
            max_sessions: max_sessions.max(1),
        }
    }

    /// Registered sessions, including ones whose viewer has gone away but
    /// that have not been pruned yet.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True when no session is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Admit `session` and mark it active. A full registry refuses with
    /// [`TelemetryError::CapacityExceeded`] and closes the session.
    pub fn register(&mut self, session: Session) -> Result<SessionHandle> {
        self.prune_closed();
        if self.sessions.len() >= self.max_sessions {
            session.close_quietly();
            return Err(TelemetryError::CapacityExceeded {
                limit: self.max_sessions,
            });
        }

        session.activate();
        let handle = session.handle();
        self.order.push(session.id());
        self.sessions.insert(session.id(), session);
        Ok(handle)
    }

    /// Remove a session. Removing an unknown or already removed session is a
    /// no-op.
    pub fn unregister(&mut self, id: SessionId) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        self.order.retain(|existing| *existing != id);
        Some(session)
    }

    /// Live sessions in registration order.
    pub fn snapshot(&self) -> Vec<SessionHandle> {
        self.order
            .iter()
            .filter_map(|id| self.sessions.get(id))
            .filter(|session| session.state().accepts_events())
            .map(Session::handle)
            .collect()
    }

    /// Try to place `event` on the session's queue without waiting.
    ///
    /// Returns false only when the session cannot take the event: its queue
    /// is full, its viewer is gone, or it is no longer accepting events.
    /// Events the session's live filter rejects are not a failure.
    pub fn enqueue(&self, handle: &SessionHandle, event: &Arc<BroadcastEvent>) -> bool {
        let Some(session) = self.sessions.get(&handle.id()) else {
            return true;
        };
        if !session.wants(&event.record) {
            return true;
        }
        session.try_deliver(event)
    }

    /// Drop sessions whose viewer has gone away.
    pub fn prune_closed(&mut self) -> usize {
        let closed: Vec<SessionId> = self
            .order
            .iter()
            .filter(|id| {
                self.sessions
                    .get(id)
                    .is_some_and(|session| session.state() == SessionState::Closed)
            })
            .copied()
            .collect();
        for id in &closed {
            self.unregister(*id);
        }
        closed.len()
    }

    /// Close every session and empty the registry.
    pub fn close_all(&mut self) -> usize {
        let count = self.sessions.len();
        for (_, session) in self.sessions.drain() {
            session.close();
        }
        self.order.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TelemetryRecord;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn event(sequence: u64) -> Arc<BroadcastEvent> {
        Arc::new(BroadcastEvent {
            sequence,
            published_at: Utc::now(),
            record: Arc::new(TelemetryRecord {
                id: sequence as i64,
                value: "temp=42".into(),
                arch: "arm64".into(),
                captured_at: Utc::now(),
                metadata: BTreeMap::new(),
            }),
        })
    }

    #[test]
    fn register_enforces_capacity() {
        let mut registry = SessionRegistry::new(2);
        let (a, _sa) = Session::open(4, None);
        let (b, _sb) = Session::open(4, None);
        let (c, sc) = Session::open(4, None);

        registry.register(a).unwrap();
        registry.register(b).unwrap();
        assert!(matches!(
            registry.register(c),
            Err(TelemetryError::CapacityExceeded { limit: 2 })
        ));
        assert_eq!(sc.state(), SessionState::Closed);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn unregister_is_idempotent() {
        let mut registry = SessionRegistry::new(4);
        let (session, _sub) = Session::open(4, None);
        let handle = registry.register(session).unwrap();

        assert!(registry.unregister(handle.id()).is_some());
        assert!(registry.unregister(handle.id()).is_none());
        assert!(registry.snapshot().is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn close_all_closes_every_session() {
        let mut registry = SessionRegistry::new(4);
        let (a, sa) = Session::open(2, None);
        let (b, sb) = Session::open(2, None);
        registry.register(a).unwrap();
        registry.register(b).unwrap();
        assert!(!registry.is_empty());

        assert_eq!(registry.close_all(), 2);
        assert!(registry.is_empty());
        assert_eq!(sa.state(), SessionState::Closed);
        assert_eq!(sb.state(), SessionState::Closed);
    }

    #[test]
    fn snapshot_preserves_registration_order() {
        let mut registry = SessionRegistry::new(8);
        let mut subs = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let (session, sub) = Session::open(4, None);
            ids.push(registry.register(session).unwrap().id());
            subs.push(sub);
        }
        registry.unregister(ids[1]);
        ids.remove(1);

        let snapshot: Vec<SessionId> = registry.snapshot().iter().map(SessionHandle::id).collect();
        assert_eq!(snapshot, ids);
    }

    #[test]
    fn enqueue_reports_a_full_queue() {
        let mut registry = SessionRegistry::new(4);
        let (session, _sub) = Session::open(2, None);
        let handle = registry.register(session).unwrap();

        assert!(registry.enqueue(&handle, &event(1)));
        assert!(registry.enqueue(&handle, &event(2)));
        assert!(!registry.enqueue(&handle, &event(3)));
    }

    #[test]
    fn dropped_subscriptions_are_pruned() {
        let mut registry = SessionRegistry::new(1);
        let (session, sub) = Session::open(2, None);
        registry.register(session).unwrap();
        drop(sub);

        assert!(registry.snapshot().is_empty());
        let (replacement, _sub) = Session::open(2, None);
        assert!(registry.register(replacement).is_ok(), "closed session frees its slot");
    }
}
