//! Session persistence layer
//!
//! Sessions live behind the `SessionStore` trait so the in-memory map can be
//! swapped for a bounded or external store without touching the flows.

use crate::models::Session;
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Trait for session persistence
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, user_identifier: &str) -> Result<Option<Session>>;
    async fn put(&self, session: Session) -> Result<()>;
    /// Returns whether a session was removed
    async fn delete(&self, user_identifier: &str) -> Result<bool>;
    /// Drop every expired session, returning how many went
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
}

/// Decides when an idle session is dropped
pub trait ExpiryPolicy: Send + Sync {
    fn is_expired(&self, last_touched: DateTime<Utc>, now: DateTime<Utc>) -> bool;
}

/// Keep sessions for the lifetime of the process
pub struct NeverExpire;

impl ExpiryPolicy for NeverExpire {
    fn is_expired(&self, _last_touched: DateTime<Utc>, _now: DateTime<Utc>) -> bool {
        false
    }
}

/// Drop sessions untouched for longer than the timeout
pub struct IdleTimeout(pub Duration);

impl ExpiryPolicy for IdleTimeout {
    fn is_expired(&self, last_touched: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.0) {
            Ok(timeout) => now.signed_duration_since(last_touched) > timeout,
            Err(_) => false,
        }
    }
}

struct StoredSession {
    session: Session,
    last_touched: DateTime<Utc>,
}

/// In-memory session store
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, StoredSession>>>,
    expiry: Arc<dyn ExpiryPolicy>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::with_expiry(Arc::new(NeverExpire))
    }

    pub fn with_expiry(expiry: Arc<dyn ExpiryPolicy>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            expiry,
        }
    }

    /// Build from an optional idle timeout
    pub fn from_idle_timeout(timeout: Option<Duration>) -> Self {
        match timeout {
            Some(timeout) => Self::with_expiry(Arc::new(IdleTimeout(timeout))),
            None => Self::new(),
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, user_identifier: &str) -> Result<Option<Session>> {
        let now = Utc::now();

        {
            let sessions = self.sessions.read().await;
            match sessions.get(user_identifier) {
                None => return Ok(None),
                Some(stored) if !self.expiry.is_expired(stored.last_touched, now) => {
                    return Ok(Some(stored.session.clone()));
                }
                Some(_) => {}
            }
        }

        let mut sessions = self.sessions.write().await;
        if let Some(stored) = sessions.get(user_identifier) {
            if self.expiry.is_expired(stored.last_touched, now) {
                debug!(user = %user_identifier, "Session expired");
                sessions.remove(user_identifier);
                return Ok(None);
            }
            return Ok(Some(stored.session.clone()));
        }

        Ok(None)
    }

    async fn put(&self, session: Session) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            session.user_identifier.clone(),
            StoredSession {
                session,
                last_touched: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, user_identifier: &str) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.remove(user_identifier).is_some())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, stored| !self.expiry.is_expired(stored.last_touched, now));
        let purged = before - sessions.len();
        if purged > 0 {
            debug!(purged, "Purged expired sessions");
        }
        Ok(purged)
    }
}
