//! SSO that is configured but whose issuer may not be reachable yet.
//!
//! Discovery runs on the first request that needs the issuer and is retried
//! after a short pause while it keeps failing. Until it succeeds, sign-in
//! requests fail with `UpstreamUnavailable`; SSO is never reported as off.

use super::{OidcConfig, OidcEngine};
use crate::gate::{Clock, GateError, SessionStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Pause between discovery attempts while the issuer is unreachable.
pub const DISCOVERY_RETRY_SECONDS: i64 = 10;

const NEVER: i64 = i64::MIN;

#[derive(Debug)]
pub struct OidcProvider {
    config: OidcConfig,
    sessions: Arc<SessionStore>,
    clock: Arc<dyn Clock>,
    engine: OnceCell<Arc<OidcEngine>>,
    last_failure: AtomicI64,
}

impl OidcProvider {
    /// Validate `config`; discovery is deferred to [`OidcProvider::engine`].
    ///
    /// # Errors
    /// Returns `Configuration` when the settings are invalid or SSO is disabled.
    pub fn new(
        config: OidcConfig,
        sessions: Arc<SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, GateError> {
        if !config.enabled() {
            return Err(GateError::Configuration("oidc is disabled".to_string()));
        }
        config.validate()?;
        Ok(Self {
            config,
            sessions,
            clock,
            engine: OnceCell::new(),
            last_failure: AtomicI64::new(NEVER),
        })
    }

    /// Wrap an engine whose issuer has already been discovered.
    #[must_use]
    pub fn ready(engine: OidcEngine) -> Self {
        let engine = Arc::new(engine);
        Self {
            config: engine.config().clone(),
            sessions: Arc::clone(engine.sessions_handle()),
            clock: Arc::clone(engine.clock_handle()),
            engine: OnceCell::new_with(Some(engine)),
            last_failure: AtomicI64::new(NEVER),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &OidcConfig {
        &self.config
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// The engine if discovery already succeeded.
    #[must_use]
    pub fn current(&self) -> Option<&Arc<OidcEngine>> {
        self.engine.get()
    }

    /// The engine, discovering the issuer first when needed.
    ///
    /// # Errors
    /// Returns `UpstreamUnavailable` while the issuer cannot be discovered,
    /// without asking it again until the retry pause has passed.
    pub async fn engine(&self) -> Result<&Arc<OidcEngine>, GateError> {
        if let Some(engine) = self.engine.get() {
            return Ok(engine);
        }
        let now = self.clock.now_unix();
        let last_failure = self.last_failure.load(Ordering::Acquire);
        if last_failure != NEVER && now < last_failure.saturating_add(DISCOVERY_RETRY_SECONDS) {
            return Err(GateError::UpstreamUnavailable(format!(
                "issuer {} unreachable, next discovery attempt in {}s",
                self.config.issuer(),
                last_failure + DISCOVERY_RETRY_SECONDS - now
            )));
        }

        self.engine
            .get_or_try_init(|| async {
                match OidcEngine::discover(
                    self.config.clone(),
                    Arc::clone(&self.sessions),
                    Arc::clone(&self.clock),
                )
                .await
                {
                    Ok(engine) => {
                        info!(issuer = %self.config.issuer(), "oidc ready");
                        Ok(Arc::new(engine))
                    }
                    Err(err) => {
                        warn!("oidc discovery failed: {err}");
                        self.last_failure
                            .store(self.clock.now_unix(), Ordering::Release);
                        Err(match err {
                            GateError::UpstreamUnavailable(_) => err,
                            other => GateError::UpstreamUnavailable(format!("discovery: {other}")),
                        })
                    }
                }
            })
            .await
    }

    /// Drop expired pending logins and sessions.
    pub async fn evict_expired(&self, now: i64) -> usize {
        match self.engine.get() {
            Some(engine) => engine.evict_expired(now).await,
            None => self.sessions.evict_expired(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::ManualClock;
    use secrecy::SecretString;

    const NOW: i64 = 1_700_000_000;

    async fn closed_port() -> anyhow::Result<std::net::SocketAddr> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        drop(listener);
        Ok(addr)
    }

    fn provider(issuer: String, clock: Arc<ManualClock>) -> Result<OidcProvider, GateError> {
        OidcProvider::new(
            OidcConfig::new(
                issuer,
                "doorgate",
                SecretString::from("s3cret"),
                "http://localhost:8080/callback",
            ),
            Arc::new(SessionStore::new(3600)),
            clock,
        )
    }

    #[test]
    fn disabled_or_invalid_settings_are_configuration_errors() {
        let clock = Arc::new(ManualClock::new(NOW));
        assert!(matches!(
            OidcProvider::new(
                OidcConfig::disabled(),
                Arc::new(SessionStore::new(3600)),
                clock.clone()
            ),
            Err(GateError::Configuration(_))
        ));
        assert!(matches!(
            provider(String::new(), clock),
            Err(GateError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_issuer_is_upstream_unavailable_until_retry() -> anyhow::Result<()> {
        let clock = Arc::new(ManualClock::new(NOW));
        let provider = provider(format!("http://{}", closed_port().await?), clock.clone())?;

        assert!(matches!(
            provider.engine().await,
            Err(GateError::UpstreamUnavailable(_))
        ));
        assert!(provider.current().is_none());

        // Inside the pause the issuer is not asked again.
        clock.advance(DISCOVERY_RETRY_SECONDS - 1);
        match provider.engine().await {
            Err(GateError::UpstreamUnavailable(detail)) => {
                assert!(detail.contains("next discovery attempt in 1s"), "{detail}");
            }
            other => anyhow::bail!("unexpected {other:?}"),
        }

        clock.advance(1);
        match provider.engine().await {
            Err(GateError::UpstreamUnavailable(detail)) => {
                assert!(!detail.contains("next discovery attempt"), "{detail}");
            }
            other => anyhow::bail!("unexpected {other:?}"),
        }
        Ok(())
    }
}
