//! One viewer session: its id, lifecycle state and bounded outbound queue.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use crate::{
    filter::FilterCriteria,
    model::{BroadcastEvent, TelemetryRecord},
};

/// Identifies one viewer session for its whole life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// A fresh, time-ordered id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// The underlying UUIDv7.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Viewer session lifecycle. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionState {
    /// Created but not yet admitted by the registry.
    Connecting = 0,
    /// Registered and receiving events.
    Active = 1,
    /// Evicted; the transport close has not completed yet.
    Draining = 2,
    /// The viewer is gone.
    Closed = 3,
}

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SessionState::Connecting,
            1 => SessionState::Active,
            2 => SessionState::Draining,
            _ => SessionState::Closed,
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Active) | (Active, Draining) | (Connecting | Active | Draining, Closed)
        )
    }

    /// Whether the hub may still enqueue events for this session.
    pub fn accepts_events(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Active)
    }
}

/// Session state shared between the registry entry and the viewer's
/// [`Subscription`].
#[derive(Debug, Clone)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(SessionState::Connecting as u8)))
    }

    pub(crate) fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `next` if the lifecycle allows it. Returns false when the
    /// transition is refused, including when another holder got there first.
    pub(crate) fn advance(&self, next: SessionState) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if !SessionState::from_u8(current).can_transition_to(next) {
                return false;
            }
            match self.0.compare_exchange(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Registry-side view of a connected viewer. Owns the only sender of the
/// viewer's outbound queue, so dropping it ends the viewer's stream.
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    live_filter: Option<FilterCriteria>,
    sender: mpsc::Sender<Arc<BroadcastEvent>>,
    state: StateCell,
    evicted: CancellationToken,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("state", &self.state.get())
            .field("live_filter", &self.live_filter)
            .field("queued", &(self.sender.max_capacity() - self.sender.capacity()))
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session with a bounded outbound queue and the subscription
    /// its viewer reads from.
    pub fn open(queue_capacity: usize, live_filter: Option<FilterCriteria>) -> (Session, Subscription) {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let id = SessionId::new();
        let state = StateCell::new();
        let evicted = CancellationToken::new();

        let session = Session {
            id,
            created_at: Utc::now(),
            live_filter: live_filter.filter(|criteria| !criteria.is_empty()),
            sender,
            state: state.clone(),
            evicted: evicted.clone(),
        };
        let subscription = Subscription {
            id,
            receiver,
            state,
            evicted,
        };
        (session, subscription)
    }

    /// The session's id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// When the session was opened.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub(crate) fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id,
            state: self.state.clone(),
        }
    }

    pub(crate) fn wants(&self, record: &TelemetryRecord) -> bool {
        self.live_filter
            .as_ref()
            .is_none_or(|criteria| criteria.matches(record))
    }

    pub(crate) fn try_deliver(&self, event: &Arc<BroadcastEvent>) -> bool {
        self.state().accepts_events() && self.sender.try_send(Arc::clone(event)).is_ok()
    }

    pub(crate) fn activate(&self) -> bool {
        self.state.advance(SessionState::Active)
    }

    /// Stop delivery and tell the viewer side it has been dropped.
    pub(crate) fn evict(&self) {
        self.state.advance(SessionState::Draining);
        self.evicted.cancel();
    }

    pub(crate) fn close(&self) {
        self.state.advance(SessionState::Closed);
        self.evicted.cancel();
    }

    pub(crate) fn close_quietly(&self) {
        self.state.advance(SessionState::Closed);
    }
}

/// Cheap reference to a registered session, valid for iteration by the hub.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    state: StateCell,
}

impl SessionHandle {
    /// The session's id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state.get()
    }
}

/// The viewer's end of a session.
///
/// Dropping a subscription marks the session closed; the hub prunes it on
/// its next pass.
#[derive(Debug)]
pub struct Subscription {
    id: SessionId,
    receiver: mpsc::Receiver<Arc<BroadcastEvent>>,
    state: StateCell,
    evicted: CancellationToken,
}

impl Subscription {
    /// The session's id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current lifecycle state, as seen by the viewer.
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Next event for this viewer. Returns `None` once the session has been
    /// evicted, left or the hub has stopped.
    pub async fn recv(&mut self) -> Option<Arc<BroadcastEvent>> {
        tokio::select! {
            biased;
            _ = self.evicted.cancelled() => None,
            event = self.receiver.recv() => event,
        }
    }

    /// Resolves when the hub drops this session, either for falling behind
    /// or because the hub is stopping.
    pub fn evicted(&self) -> WaitForCancellationFuture<'_> {
        self.evicted.cancelled()
    }

    /// True once the hub has dropped this session for any reason.
    pub fn is_evicted(&self) -> bool {
        self.evicted.is_cancelled()
    }

    /// True when the hub dropped the session for not keeping up.
    pub fn is_slow_consumer(&self) -> bool {
        self.state.get() == SessionState::Draining
    }

    /// Mark the transport as finished. Returns false when the session was
    /// already closed, e.g. by the hub stopping.
    pub fn close(self) -> bool {
        self.state.advance(SessionState::Closed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.state.advance(SessionState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions_are_validated() {
        use SessionState::*;
        assert!(Connecting.can_transition_to(Active));
        assert!(Active.can_transition_to(Draining));
        assert!(Draining.can_transition_to(Closed));
        assert!(Connecting.can_transition_to(Closed));
        assert!(!Connecting.can_transition_to(Draining));
        assert!(!Draining.can_transition_to(Active));
        assert!(!Closed.can_transition_to(Active));
        assert!(!Closed.can_transition_to(Closed));
    }

    #[test]
    fn closed_is_terminal() {
        let cell = StateCell::new();
        assert!(cell.advance(SessionState::Active));
        assert!(cell.advance(SessionState::Closed));
        assert!(!cell.advance(SessionState::Active));
        assert!(!cell.advance(SessionState::Draining));
        assert_eq!(cell.get(), SessionState::Closed);
    }

    #[test]
    fn session_ids_are_unique_and_time_ordered() {
        let first = SessionId::new();
        let second = SessionId::new();
        assert_ne!(first, second);
        assert_eq!(first.as_uuid().get_version_num(), 7);
    }

    #[tokio::test]
    async fn dropping_the_subscription_closes_the_session() {
        let (session, subscription) = Session::open(4, None);
        assert!(session.activate());
        drop(subscription);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn close_after_eviction_finishes_the_session() {
        let (session, subscription) = Session::open(4, None);
        session.activate();
        session.evict();
        assert_eq!(session.state(), SessionState::Draining);

        assert!(subscription.close());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn close_is_a_no_op_once_the_hub_closed_the_session() {
        let (session, subscription) = Session::open(4, None);
        session.activate();
        session.close();

        assert!(!subscription.close());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn eviction_ends_the_stream_and_signals_the_viewer() {
        let (session, mut subscription) = Session::open(4, None);
        session.activate();
        session.evict();

        assert!(subscription.is_evicted());
        assert!(subscription.is_slow_consumer());
        assert!(subscription.recv().await.is_none());
    }
}
