use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::HubError;
use crate::hub::protocol::{ClientEvent, ServerEvent};
use crate::hub::rate_limit::EphemeralRateLimiter;
use crate::hub::router::MessageRouter;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared half of a live connection: identity plus the producer side of the
/// bounded outbound queue.
///
/// Any task may enqueue. Only the session's own outbound loop dequeues.
#[derive(Debug)]
pub struct SessionHandle {
    id: Uuid,
    user_id: String,
    display_name: String,
    outbound: mpsc::Sender<ServerEvent>,
    shutdown: watch::Sender<bool>,
}

impl SessionHandle {
    pub fn new(
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<ServerEvent>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        let handle = Arc::new(Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            display_name: display_name.into(),
            outbound,
            shutdown,
        });
        (handle, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Non-blocking enqueue. A full queue means the peer stopped draining, so
    /// the session is closed rather than left to stall its producers.
    pub fn enqueue(&self, event: ServerEvent) -> Result<(), HubError> {
        if self.is_closed() {
            return Err(HubError::SessionClosed { user_id: self.user_id.clone() });
        }

        match self.outbound.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    "Outbound queue full for user {} (session {}), dropping {} and closing",
                    self.user_id, self.id, event.kind()
                );
                self.close();
                Err(HubError::QueueFull { user_id: self.user_id.clone() })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(HubError::SessionClosed { user_id: self.user_id.clone() })
            }
        }
    }

    /// Signals both loops to stop. Idempotent.
    pub fn close(&self) {
        if !self.shutdown.send_replace(true) {
            debug!("Closing session {} for user {}", self.id, self.user_id);
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

async fn wait_closed(signal: &mut watch::Receiver<bool>) {
    // The sender lives in the handle the caller holds, so this only returns
    // once the flag flips.
    let _ = signal.wait_for(|closed| *closed).await;
}

/// Drains the outbound queue in FIFO order onto the connection's write half.
///
/// Ephemeral events that arrive inside the rate-limit window are dropped.
/// On exit the session is closed, a close frame is sent best-effort and the
/// sink is released.
pub async fn run_outbound<Si>(
    handle: Arc<SessionHandle>,
    mut queue: mpsc::Receiver<ServerEvent>,
    mut sink: Si,
    mut limiter: EphemeralRateLimiter,
) where
    Si: Sink<Message> + Unpin,
    Si::Error: Display + Send,
{
    let mut closed = handle.closed_signal();

    loop {
        let event = tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => break,
            event = queue.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        if event.is_ephemeral() && !limiter.check() {
            debug!("Throttled {} for user {}", event.kind(), handle.user_id());
            continue;
        }

        let text = match event.encode() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize {} for user {}: {}", event.kind(), handle.user_id(), e);
                continue;
            }
        };

        // A peer that stopped reading must not pin this task once the
        // session is closed.
        let sent = tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => break,
            sent = sink.send(Message::Text(text)) => sent,
        };
        if let Err(e) = sent {
            error!("Error sending WebSocket message to user {}: {}", handle.user_id(), e);
            break;
        }
    }

    handle.close();
    queue.close();

    let farewell = async {
        if let Err(e) = sink.send(Message::Close(None)).await {
            debug!("Close frame not delivered to user {}: {}", handle.user_id(), e);
        }
        if let Err(e) = sink.close().await {
            debug!("Error closing WebSocket connection for user {}: {}", handle.user_id(), e);
        }
    };
    if timeout(CLOSE_TIMEOUT, farewell).await.is_err() {
        warn!("Timed out closing connection for user {}", handle.user_id());
    }
    info!("Outbound loop finished for session {} (user {})", handle.id(), handle.user_id());
}

/// Reads frames until the transport closes, errors, or the session is closed
/// by the hub. Undecodable frames are skipped; a read failure ends the loop
/// with `HubError::Transport`.
pub async fn run_inbound<St>(
    handle: &Arc<SessionHandle>,
    mut stream: St,
    router: &MessageRouter,
) -> Result<(), HubError>
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let mut closed = handle.closed_signal();

    loop {
        let frame = tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => {
                info!("Session {} for user {} closed by hub", handle.id(), handle.user_id());
                break;
            }
            frame = stream.next() => frame,
        };

        let raw = match frame {
            None => {
                info!("Connection for user {} ended", handle.user_id());
                break;
            }
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Binary(bytes))) => bytes,
            Some(Ok(Message::Close(reason))) => {
                info!("User {} closed the connection: {:?}", handle.user_id(), reason);
                break;
            }
            // Ping and pong are answered by the transport.
            Some(Ok(_)) => continue,
        };

        match ClientEvent::decode(&raw) {
            Ok(event) => router.dispatch(handle, event).await,
            Err(e) => warn!("Skipping frame from user {}: {}", handle.user_id(), e),
        }
    }
    Ok(())
}
