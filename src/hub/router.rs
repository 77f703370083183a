use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::db::MessageStore;
use crate::hub::protocol::{ChatMessage, ClientEvent, ServerEvent, TypingSignal};
use crate::hub::registry::ConnectionRegistry;
use crate::hub::roster::RosterBroadcaster;
use crate::hub::session::SessionHandle;

/// Dispatches decoded inbound events on behalf of an authenticated session.
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn MessageStore>,
    roster: RosterBroadcaster,
}

impl MessageRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Arc<dyn MessageStore>,
        roster: RosterBroadcaster,
    ) -> Self {
        Self {
            registry,
            store,
            roster,
        }
    }

    pub async fn dispatch(&self, origin: &Arc<SessionHandle>, event: ClientEvent) {
        match event {
            ClientEvent::Message { receiver_id, content } => {
                self.relay_message(origin, receiver_id, content).await;
            }
            ClientEvent::Typing { receiver_id } => {
                let signal = self.typing_signal(origin, receiver_id);
                self.relay_ephemeral(ServerEvent::Typing(signal)).await;
            }
            ClientEvent::StopTyping { receiver_id } => {
                let signal = self.typing_signal(origin, receiver_id);
                self.relay_ephemeral(ServerEvent::StopTyping(signal)).await;
            }
            ClientEvent::UserListRequest => {
                self.roster.send_to(origin).await;
            }
            ClientEvent::Unknown(kind) => {
                warn!("Unknown message type from user {}: {}", origin.user_id(), kind);
            }
        }
    }

    /// Persists first, then relays to the receiver (if connected) and echoes
    /// back to the sender. A storage failure drops the message entirely.
    async fn relay_message(&self, origin: &Arc<SessionHandle>, receiver_id: String, content: String) {
        let stored = match self
            .store
            .insert_message(origin.user_id(), &receiver_id, &content)
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                error!("DB insert error for message from {} to {}: {}", origin.user_id(), receiver_id, e);
                return;
            }
        };

        let message = ChatMessage {
            id: stored.id,
            sender_id: origin.user_id().to_string(),
            sender_name: origin.display_name().to_string(),
            receiver_id,
            content,
            created_at: stored.created_at,
        };

        if message.receiver_id != message.sender_id {
            match self.registry.lookup(&message.receiver_id).await {
                Some(receiver) => {
                    debug!("Sending message {} to receiver {}", message.id, receiver.user_id());
                    let delivered = receiver
                        .enqueue(ServerEvent::Message(message.clone()))
                        .and_then(|_| receiver.enqueue(ServerEvent::notification_for(&message)));
                    if let Err(e) = delivered {
                        warn!("Live delivery of message {} failed: {}", message.id, e);
                    }
                }
                None => info!("Receiver not connected: {}", message.receiver_id),
            }
        }

        if let Err(e) = origin.enqueue(ServerEvent::Message(message)) {
            warn!("Echo to user {} failed: {}", origin.user_id(), e);
        }
    }

    fn typing_signal(&self, origin: &SessionHandle, receiver_id: String) -> TypingSignal {
        TypingSignal {
            sender_id: origin.user_id().to_string(),
            sender_name: Some(origin.display_name().to_string()),
            receiver_id,
        }
    }

    async fn relay_ephemeral(&self, event: ServerEvent) {
        let receiver_id = match &event {
            ServerEvent::Typing(signal) | ServerEvent::StopTyping(signal) => signal.receiver_id.clone(),
            _ => return,
        };

        if let Some(receiver) = self.registry.lookup(&receiver_id).await {
            let kind = event.kind();
            if let Err(e) = receiver.enqueue(event) {
                debug!("Dropped {} for user {}: {}", kind, receiver_id, e);
            }
        }
    }
}
