//! In-memory session store

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use super::session::Session;
use crate::error::{KeelError, Result};

/// Per-session state.
///
/// `exec` serializes stage execution; `session` is only write-locked briefly
/// to record results, so status reads proceed while a stage is in flight.
pub(crate) struct SessionSlot {
    pub(crate) exec: Mutex<()>,
    pub(crate) session: RwLock<Session>,
    pub(crate) token: CancellationToken,
}

impl SessionSlot {
    fn new(session: Session) -> Self {
        Self {
            exec: Mutex::new(()),
            session: RwLock::new(session),
            token: CancellationToken::new(),
        }
    }
}

/// Map from session id to session state
#[derive(Default)]
pub(crate) struct SessionStore {
    slots: RwLock<HashMap<String, Arc<SessionSlot>>>,
}

impl SessionStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn insert(&self, session: Session) -> String {
        let id = session.session_id.clone();
        self.slots
            .write()
            .await
            .insert(id.clone(), Arc::new(SessionSlot::new(session)));
        id
    }

    pub(crate) async fn get(&self, session_id: &str) -> Result<Arc<SessionSlot>> {
        self.slots
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| KeelError::SessionNotFound(session_id.to_string()))
    }

    pub(crate) async fn remove(&self, session_id: &str) -> Result<Arc<SessionSlot>> {
        self.slots
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| KeelError::SessionNotFound(session_id.to_string()))
    }

    pub(crate) async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    /// Drop sessions untouched for longer than `ttl`. Sessions with a stage
    /// in flight are kept. Returns the evicted ids.
    pub(crate) async fn evict_idle(&self, ttl: Duration) -> Vec<String> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        let now = Utc::now();
        let mut slots = self.slots.write().await;

        let expired: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| {
                let Ok(_guard) = slot.exec.try_lock() else {
                    return false;
                };
                slot.session
                    .try_read()
                    .is_ok_and(|session| now - session.updated_at > ttl)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(slot) = slots.remove(id) {
                slot.token.cancel();
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::session::{ManualEntry, SessionInput};

    fn session() -> Session {
        Session::new(SessionInput::manual(ManualEntry::new("Boston Whaler", "Outrage 23")))
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let store = SessionStore::new();
        let id = store.insert(session()).await;

        assert!(store.get(&id).await.is_ok());
        assert_eq!(store.len().await, 1);
        store.remove(&id).await.unwrap();
        assert!(matches!(
            store.get(&id).await,
            Err(KeelError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_evict_idle() {
        let store = SessionStore::new();
        let mut stale = session();
        stale.updated_at = Utc::now() - chrono::Duration::hours(2);
        let stale_id = store.insert(stale).await;
        let fresh_id = store.insert(session()).await;

        let evicted = store.evict_idle(Duration::from_secs(3600)).await;
        assert_eq!(evicted, vec![stale_id.clone()]);
        assert!(store.get(&stale_id).await.is_err());
        assert!(store.get(&fresh_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_evict_skips_busy_sessions() {
        let store = SessionStore::new();
        let mut stale = session();
        stale.updated_at = Utc::now() - chrono::Duration::hours(2);
        let id = store.insert(stale).await;

        let slot = store.get(&id).await.unwrap();
        let _busy = slot.exec.lock().await;
        assert!(store.evict_idle(Duration::from_secs(60)).await.is_empty());
    }
}
