//! In-memory session bookkeeping.
//!
//! Sessions live for the lifetime of the process. Every browser connection
//! uses the same static session, so concurrent connections end up sharing
//! one; the registry counts attachments and warns when that happens.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

/// Identifies a session within an application
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.app_name, self.user_id, self.session_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub key: SessionKey,
    pub created_at: DateTime<Utc>,
    /// Number of live connections currently attached
    pub connections: usize,
}

#[derive(Debug, Default)]
pub struct InMemorySessionService {
    sessions: Mutex<HashMap<SessionKey, Session>>,
}

impl InMemorySessionService {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionKey, Session>> {
        // the map stays consistent even if a holder panicked
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get_session(&self, key: &SessionKey) -> Option<Session> {
        self.sessions().get(key).cloned()
    }

    /// Create a session, or return the existing one for `key`
    pub fn create_session(&self, key: &SessionKey) -> Session {
        self.sessions()
            .entry(key.clone())
            .or_insert_with(|| {
                log::info!("🆕 Created session {}", key);
                Session {
                    key: key.clone(),
                    created_at: Utc::now(),
                    connections: 0,
                }
            })
            .clone()
    }

    /// Attach a connection, creating the session on first use.
    ///
    /// Returns the number of connections attached after this one.
    pub fn attach(&self, key: &SessionKey) -> usize {
        let mut sessions = self.sessions();
        let session = sessions.entry(key.clone()).or_insert_with(|| {
            log::info!("🆕 Created session {}", key);
            Session {
                key: key.clone(),
                created_at: Utc::now(),
                connections: 0,
            }
        });
        session.connections += 1;

        if session.connections > 1 {
            log::warn!(
                "⚠️  Session {} is now shared by {} connections",
                key,
                session.connections
            );
        }
        session.connections
    }

    /// Detach a connection. The session itself is kept.
    pub fn release(&self, key: &SessionKey) {
        if let Some(session) = self.sessions().get_mut(key) {
            session.connections = session.connections.saturating_sub(1);
            log::debug!(
                "Released session {} ({} connections left)",
                key,
                session.connections
            );
        }
    }
}
