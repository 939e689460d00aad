use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

/// Login started but not yet completed. Single use.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OidcPendingAuth {
    pub state: String,
    pub nonce: String,
    pub code_verifier: String,
    pub created_at: i64,
}

impl OidcPendingAuth {
    #[must_use]
    pub const fn is_expired(&self, now: i64, ttl_seconds: i64) -> bool {
        now - self.created_at >= ttl_seconds
    }
}

/// Pending logins keyed by the session that started them.
#[derive(Debug)]
pub struct PendingAuthStore {
    ttl_seconds: i64,
    pending: Mutex<HashMap<String, OidcPendingAuth>>,
}

impl PendingAuthStore {
    #[must_use]
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            ttl_seconds,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Store `auth` for `session_id`, replacing any earlier attempt.
    pub async fn store(&self, session_id: &str, auth: OidcPendingAuth) {
        let mut pending = self.pending.lock().await;
        let ttl = self.ttl_seconds;
        let now = auth.created_at;
        pending.retain(|_, entry| !entry.is_expired(now, ttl));
        if pending.insert(session_id.to_string(), auth).is_some() {
            debug!("replaced an unfinished login for this session");
        }
    }

    /// Remove and return the record for `session_id`.
    ///
    /// The record is gone after this call whatever the outcome, so a replayed
    /// callback never finds it. Expired records are reported as absent.
    pub async fn take(&self, session_id: &str, now: i64) -> Option<OidcPendingAuth> {
        let auth = self.pending.lock().await.remove(session_id)?;
        if auth.is_expired(now, self.ttl_seconds) {
            debug!("pending login expired");
            return None;
        }
        Some(auth)
    }

    pub async fn evict_expired(&self, now: i64) -> usize {
        let mut pending = self.pending.lock().await;
        let before = pending.len();
        let ttl = self.ttl_seconds;
        pending.retain(|_, entry| !entry.is_expired(now, ttl));
        before.saturating_sub(pending.len())
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const NOW: i64 = 1_700_000_000;

    fn auth(state: &str, created_at: i64) -> OidcPendingAuth {
        OidcPendingAuth {
            state: state.to_string(),
            nonce: format!("nonce-{state}"),
            code_verifier: format!("verifier-{state}"),
            created_at,
        }
    }

    #[tokio::test]
    async fn take_is_single_use() {
        let store = PendingAuthStore::new(600);
        store.store("sid", auth("s1", NOW)).await;
        assert_eq!(store.take("sid", NOW + 1).await, Some(auth("s1", NOW)));
        assert_eq!(store.take("sid", NOW + 2).await, None);
    }

    #[tokio::test]
    async fn new_login_replaces_previous() {
        let store = PendingAuthStore::new(600);
        store.store("sid", auth("s1", NOW)).await;
        store.store("sid", auth("s2", NOW + 5)).await;
        assert_eq!(store.len().await, 1);
        assert_eq!(
            store.take("sid", NOW + 6).await.map(|a| a.state),
            Some("s2".to_string())
        );
    }

    #[tokio::test]
    async fn expired_record_is_absent_and_removed() {
        let store = PendingAuthStore::new(600);
        store.store("sid", auth("s1", NOW)).await;
        assert_eq!(store.take("sid", NOW + 600).await, None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn evict_drops_only_expired() {
        let store = PendingAuthStore::new(600);
        store.store("old", auth("s1", NOW)).await;
        store.store("new", auth("s2", NOW + 500)).await;
        assert_eq!(store.evict_expired(NOW + 700).await, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_takes_yield_one_winner() -> anyhow::Result<()> {
        let store = Arc::new(PendingAuthStore::new(600));
        store.store("sid", auth("s1", NOW)).await;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.take("sid", NOW + 1).await }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await?.is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        Ok(())
    }
}
