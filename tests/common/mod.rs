#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use presence_hub::config::HubConfig;
use presence_hub::db::{KnownUser, MessageStore, StoredMessage, UserDirectory};
use presence_hub::error::DatabaseError;
use presence_hub::{Authenticator, ChatHub};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub const JWT_SECRET: &str = "integration_secret";

#[derive(Debug, Clone)]
pub struct SavedMessage {
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// In-memory stand-in for the Postgres collaborators.
#[derive(Default)]
pub struct MemoryBackend {
    users: Mutex<Vec<KnownUser>>,
    messages: Mutex<Vec<SavedMessage>>,
    offline_delay: Mutex<Option<Duration>>,
}

impl MemoryBackend {
    pub fn with_users(users: &[(&str, &str)]) -> Arc<Self> {
        let backend = Self::default();
        *backend.users.lock().unwrap() = users
            .iter()
            .map(|(id, nickname)| KnownUser::new(*id, *nickname, false))
            .collect();
        Arc::new(backend)
    }

    /// Delays every offline write, as a slow database would.
    pub fn set_offline_delay(&self, delay: Duration) {
        *self.offline_delay.lock().unwrap() = Some(delay);
    }

    pub fn messages(&self) -> Vec<SavedMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.users
            .lock()
            .unwrap()
            .iter()
            .any(|u| u.id == user_id && u.is_online)
    }
}

#[async_trait]
impl MessageStore for MemoryBackend {
    async fn insert_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<StoredMessage, DatabaseError> {
        let mut messages = self.messages.lock().unwrap();
        let created_at = Utc::now();
        messages.push(SavedMessage {
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            content: content.to_string(),
            created_at,
        });
        Ok(StoredMessage { id: messages.len() as i64, created_at })
    }
}

#[async_trait]
impl UserDirectory for MemoryBackend {
    async fn resolve_name(&self, user_id: &str) -> Result<String, DatabaseError> {
        self.users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.id == user_id)
            .map(|u| u.nickname.clone())
            .ok_or(DatabaseError::NotFound)
    }

    async fn set_online(&self, user_id: &str, online: bool) -> Result<(), DatabaseError> {
        let delay = *self.offline_delay.lock().unwrap();
        if let (false, Some(delay)) = (online, delay) {
            tokio::time::sleep(delay).await;
        }
        for user in self.users.lock().unwrap().iter_mut() {
            if user.id == user_id {
                user.is_online = online;
            }
        }
        Ok(())
    }

    async fn list_known_users(&self) -> Result<Vec<KnownUser>, DatabaseError> {
        Ok(self.users.lock().unwrap().clone())
    }

    async fn last_contact(
        &self,
        viewer_id: &str,
    ) -> Result<HashMap<String, DateTime<Utc>>, DatabaseError> {
        let mut contacts: HashMap<String, DateTime<Utc>> = HashMap::new();
        for message in self.messages.lock().unwrap().iter() {
            let peer = if message.sender_id == viewer_id {
                &message.receiver_id
            } else if message.receiver_id == viewer_id {
                &message.sender_id
            } else {
                continue;
            };
            let entry = contacts.entry(peer.clone()).or_insert(message.created_at);
            if message.created_at > *entry {
                *entry = message.created_at;
            }
        }
        Ok(contacts)
    }
}

pub struct TestHub {
    pub hub: Arc<ChatHub>,
    pub backend: Arc<MemoryBackend>,
    pub authenticator: Authenticator,
    pub addr: SocketAddr,
}

impl TestHub {
    pub async fn start(users: &[(&str, &str)]) -> Self {
        let backend = MemoryBackend::with_users(users);
        let hub = Arc::new(ChatHub::new(
            HubConfig::default(),
            backend.clone(),
            backend.clone(),
            Arc::new(Authenticator::new(JWT_SECRET.to_string(), 1)),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(hub.clone().serve(listener));

        Self {
            hub,
            backend,
            authenticator: Authenticator::new(JWT_SECRET.to_string(), 1),
            addr,
        }
    }

    pub async fn connect(&self, user_id: &str) -> Client {
        let token = self.authenticator.issue_token(user_id).unwrap();
        let url = format!("ws://{}/ws?token={}", self.addr, token);
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        Client { ws }
    }

    /// Polls until the registry holds `expected` sessions.
    pub async fn wait_for_sessions(&self, expected: usize) {
        let registry = self.hub.registry();
        timeout(Duration::from_secs(5), async {
            while registry.len().await != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("registry never reached expected size");
    }
}

pub struct Client {
    pub ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Client {
    pub async fn send_json(&mut self, value: Value) {
        use futures::SinkExt;
        self.ws.send(Message::Text(value.to_string())).await.unwrap();
    }

    /// Next JSON text event, or `None` once the server closes the socket.
    pub async fn next_event(&mut self, wait: Duration) -> Option<Value> {
        next_event(&mut self.ws, wait).await
    }

    pub async fn next_non_roster(&mut self, wait: Duration) -> Option<Value> {
        loop {
            let event = self.next_event(wait).await?;
            if event["type"] != "user_list" {
                return Some(event);
            }
        }
    }

    pub async fn next_of_type(&mut self, kind: &str, wait: Duration) -> Option<Value> {
        loop {
            let event = self.next_event(wait).await?;
            if event["type"] == kind {
                return Some(event);
            }
        }
    }
}

async fn next_event<S>(stream: &mut S, wait: Duration) -> Option<Value>
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match timeout(wait, stream.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return serde_json::from_str(&text).ok(),
            Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) | Ok(None) | Err(_) => return None,
            Ok(Some(Ok(_))) => continue,
        }
    }
}
