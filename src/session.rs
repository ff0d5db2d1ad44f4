//! Session registry: maps opaque client-supplied tokens to stable
//! identities that survive reconnects on any protocol.

use crate::types::{BrowserSession, Role, SessionToken};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct SessionState {
    user_id_counter: u64,
    admin_assigned: bool,
    sessions: HashMap<SessionToken, BrowserSession>,
}

/// Process-lifetime registry of browser sessions. Sessions are never
/// deleted; liveness of connections is tracked separately.
///
/// The admin check-and-set happens under a synchronous mutex so that two
/// first-contact handshakes racing across task boundaries can never both
/// be granted admin.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    state: Mutex<SessionState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a token to its session, creating one on first sighting.
    /// Re-sighting a known token only updates `last_ip`.
    pub fn resolve(&self, token: &str, ip: &str) -> BrowserSession {
        let mut state = self.state.lock().expect("session registry poisoned");

        if let Some(session) = state.sessions.get_mut(token) {
            session.last_ip = ip.to_string();
            return session.clone();
        }

        state.user_id_counter += 1;
        let user_id = format!("user_{}", state.user_id_counter);
        let role = if state.admin_assigned {
            Role::User
        } else {
            state.admin_assigned = true;
            tracing::info!(
                "Assigning admin role to first browser session: {} (user id: {})",
                token,
                user_id
            );
            Role::Admin
        };

        let session = BrowserSession {
            user_id,
            role,
            first_seen: chrono::Utc::now().to_rfc3339(),
            last_ip: ip.to_string(),
        };
        state.sessions.insert(token.to_string(), session.clone());
        session
    }

    pub fn lookup(&self, token: &str) -> Option<BrowserSession> {
        self.state
            .lock()
            .expect("session registry poisoned")
            .sessions
            .get(token)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .expect("session registry poisoned")
            .sessions
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn admin_assigned(&self) -> bool {
        self.state
            .lock()
            .expect("session registry poisoned")
            .admin_assigned
    }
}
