//! Cached issuer signing keys.

use crate::gate::GateError;
use oidc_token::Jwks;
use reqwest::Client;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{Instrument, info, info_span, warn};

// Refresh on stale cache or unknown kid; keep the last good set if a refresh fails.
const JWKS_CACHE_TTL_SECONDS: u64 = 300;
const JWKS_REFRESH_COOLDOWN_SECONDS: i64 = 30;

#[derive(Debug, Clone)]
struct KeysCache {
    jwks: Jwks,
    fetched_at: Option<Instant>,
}

impl KeysCache {
    fn is_fresh(&self) -> bool {
        self.fetched_at
            .is_some_and(|at| at.elapsed() < Duration::from_secs(JWKS_CACHE_TTL_SECONDS))
    }
}

#[derive(Debug)]
pub struct JwksCache {
    client: Client,
    uri: String,
    cache: RwLock<KeysCache>,
    last_refresh_unix: AtomicI64,
}

impl JwksCache {
    /// Empty cache; the first [`JwksCache::snapshot`] fetches.
    #[must_use]
    pub fn new(client: Client, uri: String) -> Self {
        Self {
            client,
            uri,
            cache: RwLock::new(KeysCache {
                jwks: Jwks::default(),
                fetched_at: None,
            }),
            last_refresh_unix: AtomicI64::new(i64::MIN),
        }
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Current keys, refreshed first when stale.
    ///
    /// # Errors
    /// Returns `UpstreamUnavailable` only when there is no cached set to fall back on.
    pub async fn snapshot(&self) -> Result<Jwks, GateError> {
        let (cached, fresh, empty) = {
            let cache = self.cache.read().await;
            (cache.jwks.clone(), cache.is_fresh(), cache.fetched_at.is_none())
        };
        if fresh {
            return Ok(cached);
        }
        match self.refresh().await {
            Ok(jwks) => Ok(jwks),
            Err(err) if !empty => {
                warn!(error = %err, url = %self.uri, "failed to refresh jwks cache");
                Ok(cached)
            }
            Err(err) => Err(err),
        }
    }

    /// Refetch after a token named an unknown `kid`, at most once per cooldown.
    ///
    /// Returns `Ok(None)` when the cooldown suppressed the refresh.
    ///
    /// # Errors
    /// Returns `UpstreamUnavailable` if the refresh fails.
    pub async fn refresh_on_unknown_kid(&self, now: i64) -> Result<Option<Jwks>, GateError> {
        let last = self.last_refresh_unix.load(Ordering::Relaxed);
        if now.saturating_sub(last) < JWKS_REFRESH_COOLDOWN_SECONDS {
            return Ok(None);
        }
        self.last_refresh_unix.store(now, Ordering::Relaxed);
        self.refresh().await.map(Some)
    }

    async fn refresh(&self) -> Result<Jwks, GateError> {
        let jwks = fetch_jwks(&self.client, &self.uri).await?;
        let mut cache = self.cache.write().await;
        cache.jwks = jwks.clone();
        cache.fetched_at = Some(Instant::now());
        info!(keys = cache.jwks.keys.len(), "jwks cache refreshed");
        Ok(jwks)
    }
}

async fn fetch_jwks(client: &Client, uri: &str) -> Result<Jwks, GateError> {
    let span = info_span!("oidc.jwks.fetch", http.method = "GET", url = %uri);
    async {
        let response = client
            .get(uri)
            .send()
            .await
            .map_err(|err| GateError::UpstreamUnavailable(format!("jwks request: {err}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| GateError::UpstreamUnavailable(format!("jwks body: {err}")))?;
        if !status.is_success() {
            return Err(GateError::UpstreamUnavailable(format!(
                "jwks fetch returned {status}"
            )));
        }
        Jwks::from_json(&body)
            .map_err(|err| GateError::UpstreamUnavailable(format!("jwks document invalid: {err}")))
    }
    .instrument(span)
    .await
}
