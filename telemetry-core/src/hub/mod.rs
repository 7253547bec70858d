//! Live fan-out of newly stored records to connected viewers.
//!
//! A single coordination loop owns the [`SessionRegistry`] and processes
//! [`HubEvent`]s from one bounded inbound channel in arrival order. Producers
//! (ingestion, viewer connects and disconnects) only ever talk to the loop
//! through a [`HubHandle`]. Delivery into a viewer's queue never waits: a
//! viewer whose queue is full is evicted so it cannot stall ingestion or
//! other viewers.

pub mod registry;
pub mod session;

use std::{fmt, sync::Arc};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::{Result, TelemetryError},
    filter::FilterCriteria,
    model::{BroadcastEvent, TelemetryRecord},
};

pub use registry::SessionRegistry;
pub use session::{Session, SessionHandle, SessionId, SessionState, Subscription};

/// What `publish` does when the hub's inbound channel is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PublishPolicy {
    /// Wait for capacity.
    #[default]
    Block,
    /// Fail with [`TelemetryError::HubSaturated`].
    FailFast,
}

impl std::str::FromStr for PublishPolicy {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(PublishPolicy::Block),
            "fail-fast" | "fail_fast" | "failfast" => Ok(PublishPolicy::FailFast),
            other => Err(format!(
                "unknown publish policy `{other}` (expected `block` or `fail-fast`)"
            )),
        }
    }
}

/// Sizing and back-pressure settings for the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Events buffered between producers and the coordination loop.
    pub inbound_capacity: usize,
    /// Events buffered per viewer before it counts as a slow consumer.
    pub session_queue_capacity: usize,
    /// Concurrent viewers the hub admits.
    pub max_sessions: usize,
    /// Behaviour of `publish` when the inbound channel is full.
    pub publish_policy: PublishPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: 1024,
            session_queue_capacity: 256,
            max_sessions: 512,
            publish_policy: PublishPolicy::Block,
        }
    }
}

/// Counters reported by the coordination loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Sessions currently registered.
    pub sessions: usize,
    /// Records fanned out since start.
    pub published: u64,
    /// Sessions dropped for falling behind.
    pub evicted: u64,
    /// Sequence number of the most recent event; 0 before the first.
    pub last_sequence: u64,
}

/// Messages accepted by the coordination loop.
#[derive(Debug)]
pub enum HubEvent {
    /// A stored record to fan out.
    NewRecord(Arc<TelemetryRecord>),
    /// A viewer asks to be registered.
    SessionJoined {
        /// The session to register.
        session: Session,
        /// Receives the registration outcome.
        reply: oneshot::Sender<Result<SessionHandle>>,
    },
    /// A viewer went away.
    SessionLeft(SessionId),
    /// Request for the current counters.
    Stats(oneshot::Sender<HubStats>),
    /// Request for the live session ids.
    Snapshot(oneshot::Sender<Vec<SessionId>>),
}

/// Entry point that spawns the coordination loop.
#[derive(Debug)]
pub struct BroadcastHub;

impl BroadcastHub {
    /// Spawn the coordination loop on the current tokio runtime.
    pub fn start(config: HubConfig) -> HubHandle {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let shutdown = CancellationToken::new();
        let stopped = CancellationToken::new();

        let hub_loop = HubLoop {
            registry: SessionRegistry::new(config.max_sessions),
            stats: HubStats::default(),
        };
        tokio::spawn(hub_loop.run(inbound_rx, shutdown.clone(), stopped.clone()));

        info!(
            inbound_capacity = config.inbound_capacity,
            session_queue_capacity = config.session_queue_capacity,
            max_sessions = config.max_sessions,
            publish_policy = ?config.publish_policy,
            "Broadcast hub started"
        );

        HubHandle {
            inner: Arc::new(HubShared {
                inbound: inbound_tx,
                config,
                shutdown,
                stopped,
            }),
        }
    }
}

struct HubShared {
    inbound: mpsc::Sender<HubEvent>,
    config: HubConfig,
    shutdown: CancellationToken,
    stopped: CancellationToken,
}

/// Clonable handle to a running hub.
#[derive(Clone)]
pub struct HubHandle {
    inner: Arc<HubShared>,
}

impl fmt::Debug for HubHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubHandle")
            .field("config", &self.inner.config)
            .field("stopped", &self.inner.stopped.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl HubHandle {
    /// Settings the hub was started with.
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// False once `stop` has been requested or the loop has exited.
    pub fn is_running(&self) -> bool {
        !self.inner.shutdown.is_cancelled() && !self.inner.stopped.is_cancelled()
    }

    /// Hand a stored record to the hub for fan-out. Returns once the hub has
    /// accepted the record; viewer delivery happens later.
    pub async fn publish(&self, record: impl Into<Arc<TelemetryRecord>>) -> Result<()> {
        let event = HubEvent::NewRecord(record.into());
        match self.inner.config.publish_policy {
            PublishPolicy::Block => self.send(event).await,
            PublishPolicy::FailFast => {
                if !self.is_running() {
                    return Err(TelemetryError::HubClosed);
                }
                self.inner.inbound.try_send(event).map_err(|err| match err {
                    mpsc::error::TrySendError::Full(_) => TelemetryError::HubSaturated,
                    mpsc::error::TrySendError::Closed(_) => TelemetryError::HubClosed,
                })
            }
        }
    }

    /// Register a new viewer session, optionally restricted to records
    /// matching `live_filter`.
    pub async fn join(&self, live_filter: Option<FilterCriteria>) -> Result<Subscription> {
        let (session, subscription) =
            Session::open(self.inner.config.session_queue_capacity, live_filter);
        let (reply, response) = oneshot::channel();
        self.send(HubEvent::SessionJoined { session, reply }).await?;
        response.await.map_err(|_| TelemetryError::HubClosed)??;
        Ok(subscription)
    }

    /// Remove a session. Leaving twice, or after eviction or stop, is a no-op.
    pub async fn leave(&self, id: SessionId) {
        if self.send(HubEvent::SessionLeft(id)).await.is_err() {
            debug!(session_id = %id, "hub not running; nothing to leave");
        }
    }

    /// Current counters, after pruning sessions whose viewer went away.
    pub async fn stats(&self) -> Result<HubStats> {
        let (reply, response) = oneshot::channel();
        self.send(HubEvent::Stats(reply)).await?;
        response.await.map_err(|_| TelemetryError::HubClosed)
    }

    /// Ids of the live sessions in registration order.
    pub async fn snapshot(&self) -> Result<Vec<SessionId>> {
        let (reply, response) = oneshot::channel();
        self.send(HubEvent::Snapshot(reply)).await?;
        response.await.map_err(|_| TelemetryError::HubClosed)
    }

    /// Stop the loop, closing every session, and wait for it to exit.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        self.inner.stopped.cancelled().await;
    }

    async fn send(&self, event: HubEvent) -> Result<()> {
        if !self.is_running() {
            return Err(TelemetryError::HubClosed);
        }
        tokio::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => Err(TelemetryError::HubClosed),
            sent = self.inner.inbound.send(event) => sent.map_err(|_| TelemetryError::HubClosed),
        }
    }
}

struct HubLoop {
    registry: SessionRegistry,
    stats: HubStats,
}

impl HubLoop {
    async fn run(
        mut self,
        mut inbound: mpsc::Receiver<HubEvent>,
        shutdown: CancellationToken,
        stopped: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = inbound.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
            }
        }

        inbound.close();
        let closed = self.registry.close_all();
        info!(
            closed_sessions = closed,
            published = self.stats.published,
            evicted = self.stats.evicted,
            "Broadcast hub stopped"
        );
        stopped.cancel();
    }

    fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::NewRecord(record) => self.fan_out(record),
            HubEvent::SessionJoined { session, reply } => {
                let id = session.id();
                let result = self.registry.register(session);
                match &result {
                    Ok(_) => debug!(session_id = %id, sessions = self.registry.len(), "Session joined"),
                    Err(err) => warn!(session_id = %id, error = %err, "Session refused"),
                }
                // A dropped reply means the joiner gave up; the closed
                // subscription is pruned on the next pass.
                let _ = reply.send(result);
            }
            HubEvent::SessionLeft(id) => {
                if let Some(session) = self.registry.unregister(id) {
                    session.close_quietly();
                    debug!(session_id = %id, sessions = self.registry.len(), "Session left");
                }
            }
            HubEvent::Stats(reply) => {
                self.registry.prune_closed();
                let _ = reply.send(HubStats {
                    sessions: self.registry.len(),
                    ..self.stats
                });
            }
            HubEvent::Snapshot(reply) => {
                self.registry.prune_closed();
                let ids = self
                    .registry
                    .snapshot()
                    .iter()
                    .map(SessionHandle::id)
                    .collect();
                let _ = reply.send(ids);
            }
        }
    }

    fn fan_out(&mut self, record: Arc<TelemetryRecord>) {
        let sequence = self.stats.last_sequence.saturating_add(1);
        self.stats.last_sequence = sequence;
        self.stats.published = self.stats.published.saturating_add(1);

        let event = Arc::new(BroadcastEvent {
            sequence,
            published_at: Utc::now(),
            record,
        });

        let mut failed = Vec::new();
        for handle in self.registry.snapshot() {
            if !self.registry.enqueue(&handle, &event) {
                failed.push(handle);
            }
        }

        for handle in failed {
            let Some(session) = self.registry.unregister(handle.id()) else {
                continue;
            };
            if session.state() == SessionState::Closed {
                debug!(session_id = %handle.id(), "Viewer went away; session removed");
                continue;
            }
            session.evict();
            self.stats.evicted = self.stats.evicted.saturating_add(1);
            warn!(
                session_id = %handle.id(),
                sequence,
                record_id = event.record.id,
                "DeliveryDropped: outbound queue full, evicting slow consumer"
            );
        }
    }
}
