use std::time::{Duration, Instant};

use axum::{
    body::Bytes,
    extract::ws::{Message, WebSocket},
};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use telemetry_config::WebSocketConfig;
use telemetry_core::{HubHandle, SessionId, Subscription};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::messages::{self, ServerFrame};

/// Book-keeping for one live viewer transport.
#[derive(Debug)]
pub struct ViewerConnection {
    /// The hub session this transport serves.
    pub id: SessionId,
    /// When the upgrade completed.
    pub connected_at: DateTime<Utc>,
    last_seen: Instant,
}

impl ViewerConnection {
    /// Start tracking a freshly upgraded transport.
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            connected_at: Utc::now(),
            last_seen: Instant::now(),
        }
    }

    /// Record that the peer sent something (pong, text, anything).
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Time since the peer last sent anything.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.elapsed()
    }
}

/// Why a viewer loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerExit {
    /// The viewer closed or dropped the socket.
    ClientClosed,
    /// The hub dropped the viewer for falling behind.
    Evicted,
    /// The hub shut down.
    HubStopped,
    /// No frame from the viewer within the idle timeout.
    IdleTimeout,
    /// Reading or writing the socket failed.
    TransportError,
}

type WsSink = SplitSink<WebSocket, Message>;

/// Pump hub events to one viewer until either side goes away, then leave
/// the hub.
pub async fn run_viewer(
    socket: WebSocket,
    mut subscription: Subscription,
    hub: HubHandle,
    settings: WebSocketConfig,
) -> ViewerExit {
    let mut connection = ViewerConnection::new(subscription.id());
    let (mut sender, mut receiver) = socket.split();

    let exit = if send_frame(&mut sender, &ServerFrame::welcome(connection.id))
        .await
        .is_err()
    {
        ViewerExit::TransportError
    } else {
        let mut ping = tokio::time::interval(settings.ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ping.tick().await;

        loop {
            tokio::select! {
                event = subscription.recv() => match event {
                    Some(event) => {
                        if send_frame(&mut sender, &ServerFrame::from(event.as_ref())).await.is_err() {
                            break ViewerExit::TransportError;
                        }
                    }
                    None if subscription.is_slow_consumer() => break ViewerExit::Evicted,
                    None => break ViewerExit::HubStopped,
                },
                incoming = receiver.next() => match incoming {
                    Some(Ok(Message::Close(_))) | None => break ViewerExit::ClientClosed,
                    // Viewers have nothing to say; any frame only proves liveness.
                    Some(Ok(_)) => connection.touch(),
                    Some(Err(err)) => {
                        debug!(session_id = %connection.id, error = %err, "viewer transport error");
                        break ViewerExit::TransportError;
                    }
                },
                _ = ping.tick() => {
                    if connection.idle_for() >= settings.idle_timeout {
                        break ViewerExit::IdleTimeout;
                    }
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break ViewerExit::TransportError;
                    }
                }
            }
        }
    };

    let close = match exit {
        ViewerExit::Evicted => {
            warn!(session_id = %connection.id, "closing live channel of slow consumer");
            Some(messages::slow_consumer_close())
        }
        ViewerExit::HubStopped => Some(messages::going_away_close()),
        ViewerExit::IdleTimeout => {
            info!(
                session_id = %connection.id,
                idle_secs = connection.idle_for().as_secs(),
                "closing idle live channel"
            );
            Some(messages::idle_close())
        }
        ViewerExit::ClientClosed | ViewerExit::TransportError => None,
    };
    if let Some(close) = close {
        let _ = sender.send(close).await;
    }
    let _ = sender.close().await;

    subscription.close();
    hub.leave(connection.id).await;

    debug!(
        session_id = %connection.id,
        connected_for_secs = (Utc::now() - connection.connected_at).num_seconds(),
        reason = ?exit,
        "viewer disconnected"
    );
    exit
}

async fn send_frame(sender: &mut WsSink, frame: &ServerFrame) -> Result<(), axum::Error> {
    let message = match messages::frame_to_websocket(frame) {
        Ok(message) => message,
        Err(err) => {
            warn!(error = %err, "failed to encode live frame");
            return Ok(());
        }
    };
    sender.send(message).await
}
