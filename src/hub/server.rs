use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::{Sink, Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

use crate::auth::Authenticator;
use crate::config::HubConfig;
use crate::db::{MessageStore, UserDirectory};
use crate::hub::rate_limit::EphemeralRateLimiter;
use crate::hub::registry::ConnectionRegistry;
use crate::hub::roster::RosterBroadcaster;
use crate::hub::router::MessageRouter;
use crate::hub::session::{run_inbound, run_outbound, SessionHandle};

/// Owns the registry and wires each accepted connection into a session.
pub struct ChatHub {
    config: HubConfig,
    registry: Arc<ConnectionRegistry>,
    directory: Arc<dyn UserDirectory>,
    roster: RosterBroadcaster,
    router: MessageRouter,
    authenticator: Arc<Authenticator>,
}

impl ChatHub {
    pub fn new(
        config: HubConfig,
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn UserDirectory>,
        authenticator: Arc<Authenticator>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let roster = RosterBroadcaster::new(registry.clone(), directory.clone());
        let router = MessageRouter::new(registry.clone(), store, roster.clone());

        Self {
            config,
            registry,
            directory,
            roster,
            router,
            authenticator,
        }
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    /// Accept loop for the websocket listener.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let hub = self.clone();
                    tokio::spawn(async move {
                        hub.handle_connection(stream, addr).await;
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
        }
    }

    /// Performs the upgrade, rejecting requests without a valid identity
    /// with 401, and then runs the session to completion.
    pub async fn handle_connection(self: Arc<Self>, raw_stream: TcpStream, addr: SocketAddr) {
        info!("New WebSocket connection from: {}", addr);

        let mut user_id: Option<String> = None;
        let authenticator = self.authenticator.clone();
        let resolved = &mut user_id;
        let callback = move |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
            match authenticator.authenticate_request(req) {
                Ok(id) => {
                    *resolved = Some(id);
                    Ok(response)
                }
                Err(e) => {
                    warn!("Rejecting WebSocket upgrade from {}: {}", addr, e);
                    let mut rejection = ErrorResponse::new(Some("Unauthorized".to_string()));
                    *rejection.status_mut() = StatusCode::UNAUTHORIZED;
                    Err(rejection)
                }
            }
        };

        let ws_stream = match tokio_tungstenite::accept_hdr_async(raw_stream, callback).await {
            Ok(ws) => ws,
            Err(e) => {
                error!("Error during WebSocket handshake with {}: {}", addr, e);
                return;
            }
        };

        let Some(user_id) = user_id else {
            return;
        };

        let (ws_sink, ws_stream) = ws_stream.split();
        self.run_session(user_id, ws_stream, ws_sink).await;
    }

    /// Full lifecycle of one authenticated connection: register, run both
    /// loops, tear down.
    pub async fn run_session<St, Si>(self: Arc<Self>, user_id: String, stream: St, sink: Si)
    where
        St: Stream<Item = Result<Message, WsError>> + Unpin,
        Si: Sink<Message> + Unpin + Send + 'static,
        Si::Error: Display + Send,
    {
        let display_name = match self.directory.resolve_name(&user_id).await {
            Ok(name) => name,
            Err(e) => {
                warn!("Error fetching nickname for {}: {}", user_id, e);
                user_id.clone()
            }
        };

        let (handle, queue) = SessionHandle::new(user_id.clone(), display_name, self.config.outbound_capacity);

        if let Some(evicted) = self.registry.register(handle.clone()).await {
            info!("Evicting previous session {} for user {}", evicted.id(), user_id);
            evicted.close();
        }

        self.record_presence(&user_id, true).await;
        self.roster.broadcast_all().await;

        let limiter = EphemeralRateLimiter::new(self.config.ephemeral_interval());
        let writer = tokio::spawn(run_outbound(handle.clone(), queue, sink, limiter));

        if let Err(e) = run_inbound(&handle, stream, &self.router).await {
            warn!("Connection for user {} failed: {}", user_id, e);
        }

        self.teardown(&handle).await;
        if let Err(e) = writer.await {
            error!("Outbound task for user {} failed: {}", user_id, e);
        }
        info!("Session {} for user {} closed", handle.id(), user_id);
    }

    async fn teardown(&self, handle: &Arc<SessionHandle>) {
        handle.close();

        // An evicted session must not mark its replacement offline.
        if self.registry.unregister(handle).await {
            self.record_presence(handle.user_id(), false).await;

            // A reconnect can register while the offline write is in flight.
            if self.registry.lookup(handle.user_id()).await.is_some() {
                debug!("User {} reconnected during teardown, restoring online flag", handle.user_id());
                self.record_presence(handle.user_id(), true).await;
            }
        }
        self.roster.broadcast_all().await;
    }

    async fn record_presence(&self, user_id: &str, online: bool) {
        if let Err(e) = self.directory.set_online(user_id, online).await {
            error!("Error updating online status for {}: {}", user_id, e);
        }
    }

    /// Closes every live session. Each session's own teardown flips its
    /// user offline.
    pub async fn shutdown(&self) {
        let sessions = self.registry.snapshot().await;
        for session in &sessions {
            session.close();
        }
        info!("Closed {} sessions on shutdown", sessions.len());
    }
}
