//! Opaque session ids and the SSO claims attached to them.
//!
//! Anonymous sessions live only in the sealed `doorgate_session` cookie; the
//! store holds sessions that completed an OIDC login. Authenticating never
//! mutates a session in place: the old id is discarded and a new one is minted.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use dashmap::DashMap;
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to generate session id")]
pub struct SessionIdError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedSession {
    pub session_id: String,
    pub subject: String,
    pub display_name: String,
    pub groups: Vec<String>,
    pub issued_at: i64,
    pub id_token_exp: i64,
}

impl AuthenticatedSession {
    #[must_use]
    pub const fn is_expired(&self, now: i64) -> bool {
        self.id_token_exp <= now
    }
}

/// Verified identity handed over by the OIDC engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionClaims {
    pub subject: String,
    pub display_name: String,
    pub groups: Vec<String>,
    pub id_token_exp: i64,
}

/// Create a new random session id (32 bytes, base64url).
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn generate_session_id() -> Result<String, SessionIdError> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|_| SessionIdError)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

#[derive(Debug)]
pub struct SessionStore {
    ttl_seconds: i64,
    sessions: DashMap<String, AuthenticatedSession>,
}

impl SessionStore {
    #[must_use]
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            ttl_seconds,
            sessions: DashMap::new(),
        }
    }

    #[must_use]
    pub const fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    /// Discard `old_session_id` and issue a new session carrying `claims`.
    ///
    /// # Errors
    /// Returns an error if a new session id cannot be generated.
    pub fn authenticate(
        &self,
        old_session_id: &str,
        claims: SessionClaims,
        now: i64,
    ) -> Result<AuthenticatedSession, SessionIdError> {
        self.sessions.remove(old_session_id);

        let mut session_id = generate_session_id()?;
        while session_id == old_session_id || self.sessions.contains_key(&session_id) {
            session_id = generate_session_id()?;
        }

        let session = AuthenticatedSession {
            session_id: session_id.clone(),
            subject: claims.subject,
            display_name: claims.display_name,
            groups: claims.groups,
            issued_at: now,
            id_token_exp: claims.id_token_exp,
        };
        self.sessions.insert(session_id, session.clone());
        Ok(session)
    }

    /// Claims for `session_id`, if it is authenticated and still within TTL.
    #[must_use]
    pub fn get(&self, session_id: &str, now: i64) -> Option<AuthenticatedSession> {
        let session = self.sessions.get(session_id)?.clone();
        if now - session.issued_at >= self.ttl_seconds {
            self.sessions.remove(session_id);
            return None;
        }
        Some(session)
    }

    pub fn invalidate(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn evict_expired(&self, now: i64) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| now - session.issued_at < self.ttl_seconds);
        before.saturating_sub(self.sessions.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
