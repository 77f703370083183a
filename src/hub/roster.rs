use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::db::{KnownUser, UserDirectory};
use crate::hub::protocol::ServerEvent;
use crate::hub::registry::ConnectionRegistry;
use crate::hub::session::SessionHandle;

/// One row of a viewer's roster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RosterEntry {
    pub id: String,
    pub nickname: String,
    pub is_online: bool,
    #[serde(skip)]
    pub last_contact: Option<DateTime<Utc>>,
}

fn roster_order(a: &RosterEntry, b: &RosterEntry) -> Ordering {
    b.is_online
        .cmp(&a.is_online)
        .then_with(|| match (a.last_contact, b.last_contact) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.nickname.to_lowercase().cmp(&b.nickname.to_lowercase()))
        .then_with(|| a.id.cmp(&b.id))
}

/// Builds `viewer_id`'s roster: everyone but the viewer, online first, then
/// most recent contact, then nickname ignoring case.
pub fn build_roster(
    viewer_id: &str,
    users: Vec<KnownUser>,
    contacts: &HashMap<String, DateTime<Utc>>,
) -> Vec<RosterEntry> {
    let mut entries: Vec<RosterEntry> = users
        .into_iter()
        .filter(|user| user.id != viewer_id)
        .map(|user| RosterEntry {
            last_contact: contacts.get(&user.id).copied(),
            id: user.id,
            nickname: user.nickname,
            is_online: user.is_online,
        })
        .collect();
    entries.sort_by(roster_order);
    entries
}

/// Recomputes rosters and pushes them as `user_list` events.
#[derive(Clone)]
pub struct RosterBroadcaster {
    registry: Arc<ConnectionRegistry>,
    directory: Arc<dyn UserDirectory>,
}

impl RosterBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>, directory: Arc<dyn UserDirectory>) -> Self {
        Self { registry, directory }
    }

    /// Fans out one task per registered viewer. The handles are returned so
    /// callers that care (tests, shutdown) can wait for delivery.
    pub async fn broadcast_all(&self) -> Vec<JoinHandle<()>> {
        let viewers = self.registry.snapshot().await;
        debug!("Broadcasting roster to {} sessions", viewers.len());

        viewers
            .into_iter()
            .map(|viewer| {
                let broadcaster = self.clone();
                tokio::spawn(async move { broadcaster.send_to(&viewer).await })
            })
            .collect()
    }

    /// Pushes a fresh roster to a single viewer.
    pub async fn send_to(&self, viewer: &Arc<SessionHandle>) {
        let Some(entries) = self.compute(viewer.user_id()).await else {
            return;
        };

        let content = match serde_json::to_string(&entries) {
            Ok(content) => content,
            Err(e) => {
                error!("Failed to serialize roster for user {}: {}", viewer.user_id(), e);
                return;
            }
        };

        // A full queue closes the viewer's session inside enqueue.
        if let Err(e) = viewer.enqueue(ServerEvent::UserList { content }) {
            warn!("Roster not delivered to user {}: {}", viewer.user_id(), e);
        }
    }

    pub async fn compute(&self, viewer_id: &str) -> Option<Vec<RosterEntry>> {
        let users = match self.directory.list_known_users().await {
            Ok(users) => users,
            Err(e) => {
                error!("User fetch error for roster of {}: {}", viewer_id, e);
                return None;
            }
        };

        let contacts = self.directory.last_contact(viewer_id).await.unwrap_or_else(|e| {
            warn!("Contact history unavailable for {}: {}", viewer_id, e);
            HashMap::new()
        });

        // The stored flag can lag a reconnect; the registry cannot.
        let online = self.registry.online_user_ids().await;
        let users = users
            .into_iter()
            .map(|mut user| {
                user.is_online = online.contains(&user.id);
                user
            })
            .collect();

        Some(build_roster(viewer_id, users, &contacts))
    }
}
