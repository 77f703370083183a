use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::hub::session::SessionHandle;

/// Maps each online user to their single live session.
///
/// Writers are serialized by the lock; lookups and snapshots share it.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `session` for its user and returns the session it replaced.
    /// The caller is responsible for closing the evicted session.
    pub async fn register(&self, session: Arc<SessionHandle>) -> Option<Arc<SessionHandle>> {
        let user_id = session.user_id().to_string();
        let evicted = self.sessions.write().await.insert(user_id.clone(), session);
        match &evicted {
            Some(old) => info!("Replaced session {} for user {}", old.id(), user_id),
            None => info!("Registered session for user {}", user_id),
        }
        evicted
    }

    /// Removes the entry only if it still belongs to `session`, so a stale
    /// teardown cannot remove the session that replaced it.
    pub async fn unregister(&self, session: &SessionHandle) -> bool {
        let mut sessions = self.sessions.write().await;
        let owned = sessions
            .get(session.user_id())
            .map_or(false, |current| current.id() == session.id());
        if owned {
            sessions.remove(session.user_id());
            info!("Unregistered session {} for user {}", session.id(), session.user_id());
        }
        owned
    }

    pub async fn lookup(&self, user_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(user_id).cloned()
    }

    pub async fn snapshot(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Ids of every user with a live session. This, not the directory's
    /// stored flag, is what presence is reported from.
    pub async fn online_user_ids(&self) -> HashSet<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
