//! Signed sessions, one per (address, scope).
//!
//! A session is created and signed on first use, then reused for every
//! decrypt until the wall clock says it has expired. Key servers enforce
//! expiry with their own clocks; the wall clock here only decides when to
//! stop offering a session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use tiergate_core::{Address, Clock, Keypair, ScopeId};
use tiergate_seal::SessionKey;

use crate::error::Result;

/// Cache of signed sessions.
pub struct SessionManager {
    ttl_minutes: u32,
    wall_clock: Arc<dyn Clock>,
    sessions: Mutex<HashMap<(Address, ScopeId), Arc<SessionKey>>>,
    created: AtomicU64,
}

impl SessionManager {
    pub fn new(ttl_minutes: u32, wall_clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl_minutes,
            wall_clock,
            sessions: Mutex::new(HashMap::new()),
            created: AtomicU64::new(0),
        }
    }

    /// A signed, locally unexpired session for `user` in `scope`.
    pub async fn session(&self, user: &Keypair, scope: ScopeId) -> Result<Arc<SessionKey>> {
        let key = (user.address(), scope);
        let now = self.wall_clock.now_ms();

        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(&key) {
            if !existing.is_expired(now) {
                return Ok(existing.clone());
            }
            debug!(address = %key.0, "session expired locally");
        }

        let session = Arc::new(self.sign_new(user, scope, now)?);
        sessions.insert(key, session.clone());
        Ok(session)
    }

    /// Replace the session for `user` in `scope` with a fresh one.
    pub async fn refresh(&self, user: &Keypair, scope: ScopeId) -> Result<Arc<SessionKey>> {
        let now = self.wall_clock.now_ms();
        let session = Arc::new(self.sign_new(user, scope, now)?);
        self.sessions
            .lock()
            .await
            .insert((user.address(), scope), session.clone());
        Ok(session)
    }

    /// Drop every cached session.
    pub async fn clear(&self) {
        self.sessions.lock().await.clear();
    }

    /// Sessions signed so far.
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    fn sign_new(&self, user: &Keypair, scope: ScopeId, now: i64) -> Result<SessionKey> {
        let mut session = SessionKey::new(user.public_key(), scope, self.ttl_minutes, now)?;
        session.attach_signature(user.sign(&session.personal_message()))?;
        self.created.fetch_add(1, Ordering::Relaxed);
        debug!(
            address = %user.address(),
            ttl_minutes = self.ttl_minutes,
            expires_at = session.expires_at(),
            "signed new session"
        );
        Ok(session)
    }
}
