//! OpenID Connect authorization code flow with PKCE.
//!
//! State machine per browser session:
//!
//! ```text
//! Unauthenticated --begin_login--> PendingCallback --handle_callback--> Authenticated
//!        ^                                |
//!        +------------ failure -----------+
//! ```
//!
//! The pending record is removed the moment a callback arrives, whatever the
//! outcome, so a replayed or forged callback always lands back in
//! `Unauthenticated`.

pub mod config;
pub mod discovery;
pub mod keys;
pub mod pending;
pub mod pkce;
pub mod provider;

pub use self::config::OidcConfig;
pub use self::provider::OidcProvider;
pub use self::discovery::ProviderMetadata;
pub use self::pending::{OidcPendingAuth, PendingAuthStore};

use crate::gate::{AuthenticatedSession, Clock, GateError, SessionClaims, SessionStore};
use keys::JwksCache;
use oidc_token::{IdTokenClaims, Validation};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{Instrument, debug, info, info_span, instrument, warn};
use url::Url;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    id_token: Option<String>,
}

#[derive(Debug)]
pub struct OidcEngine {
    config: OidcConfig,
    metadata: ProviderMetadata,
    client: Client,
    keys: JwksCache,
    pending: PendingAuthStore,
    sessions: Arc<SessionStore>,
    clock: Arc<dyn Clock>,
}

impl OidcEngine {
    /// Validate `config` and load the issuer's discovery document.
    ///
    /// # Errors
    /// `Configuration` for invalid or disabled settings, `UpstreamUnavailable`
    /// when the discovery document cannot be loaded.
    pub async fn discover(
        config: OidcConfig,
        sessions: Arc<SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, GateError> {
        config.validate()?;
        if !config.enabled() {
            return Err(GateError::Configuration("oidc is disabled".to_string()));
        }
        let client = http_client(&config)?;
        let metadata = discovery::fetch(&client, config.issuer()).await?;
        info!(
            issuer = %metadata.issuer,
            end_session = metadata.end_session_endpoint.is_some(),
            "oidc provider discovered"
        );
        Self::with_metadata(config, metadata, client, sessions, clock)
    }

    /// Build from already known provider metadata.
    ///
    /// # Errors
    /// Returns `Configuration` if `config` is invalid or an endpoint is not a URL.
    pub fn with_metadata(
        config: OidcConfig,
        metadata: ProviderMetadata,
        client: Client,
        sessions: Arc<SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, GateError> {
        config.validate()?;
        for endpoint in [
            &metadata.authorization_endpoint,
            &metadata.token_endpoint,
            &metadata.jwks_uri,
        ] {
            Url::parse(endpoint).map_err(|err| {
                GateError::Configuration(format!("invalid provider endpoint {endpoint}: {err}"))
            })?;
        }
        let keys = JwksCache::new(client.clone(), metadata.jwks_uri.clone());
        let pending = PendingAuthStore::new(config.pending_ttl_seconds());
        Ok(Self {
            config,
            metadata,
            client,
            keys,
            pending,
            sessions,
            clock,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &OidcConfig {
        &self.config
    }

    #[must_use]
    pub const fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub(crate) const fn sessions_handle(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub(crate) const fn clock_handle(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Start a login for `session_id` and return the authorization URL.
    ///
    /// # Errors
    /// Returns an error if random material cannot be generated or the
    /// authorization endpoint is not a URL.
    #[instrument(skip_all)]
    pub async fn begin_login(&self, session_id: &str) -> Result<Url, GateError> {
        let entropy = |err: pkce::EntropyError| GateError::UpstreamUnavailable(err.to_string());
        let auth = OidcPendingAuth {
            state: pkce::random_token().map_err(entropy)?,
            nonce: pkce::random_token().map_err(entropy)?,
            code_verifier: pkce::random_token().map_err(entropy)?,
            created_at: self.clock.now_unix(),
        };

        let mut url = Url::parse(&self.metadata.authorization_endpoint).map_err(|err| {
            GateError::Configuration(format!("invalid authorization endpoint: {err}"))
        })?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", self.config.client_id())
            .append_pair("redirect_uri", self.config.redirect_uri())
            .append_pair("scope", self.config.scopes())
            .append_pair("state", &auth.state)
            .append_pair("nonce", &auth.nonce)
            .append_pair("code_challenge", &pkce::code_challenge(&auth.code_verifier))
            .append_pair("code_challenge_method", "S256");

        self.pending.store(session_id, auth).await;
        debug!("login started");
        Ok(url)
    }

    /// Complete a login: consume the pending record, redeem `code`, verify the
    /// ID token and rotate the session.
    ///
    /// # Errors
    /// `Protocol` for unknown or mismatched state, rejected codes and invalid ID
    /// tokens; `UpstreamUnavailable` when the issuer cannot be reached.
    #[instrument(skip_all)]
    pub async fn handle_callback(
        &self,
        session_id: &str,
        state: &str,
        code: &str,
    ) -> Result<AuthenticatedSession, GateError> {
        let now = self.clock.now_unix();
        let pending = self
            .pending
            .take(session_id, now)
            .await
            .ok_or_else(|| GateError::Protocol("no pending login for this session".to_string()))?;
        if !pkce::tokens_match(&pending.state, state) {
            return Err(GateError::Protocol("state mismatch".to_string()));
        }

        let id_token = self.exchange_code(code, &pending.code_verifier).await?;
        let claims = self.verify_id_token(&id_token, &pending.nonce).await?;

        let session_claims = SessionClaims {
            display_name: display_name_from(&claims),
            subject: claims.sub,
            groups: claims.groups,
            id_token_exp: claims.exp,
        };
        let session = self
            .sessions
            .authenticate(session_id, session_claims, self.clock.now_unix())
            .map_err(|err| GateError::UpstreamUnavailable(err.to_string()))?;
        info!(subject = %session.subject, "oidc login completed");
        Ok(session)
    }

    /// Drop the pending login of `session_id` after a callback that cannot be
    /// completed (provider error, missing parameters).
    pub async fn cancel_login(&self, session_id: &str) -> bool {
        self.pending
            .take(session_id, self.clock.now_unix())
            .await
            .is_some()
    }

    /// Where to send the browser to end the provider session.
    ///
    /// # Errors
    /// Returns `Configuration` when the issuer publishes no end-session endpoint.
    pub fn logout_url(&self) -> Result<Url, GateError> {
        let endpoint = self.metadata.end_session_endpoint.as_deref().ok_or_else(|| {
            GateError::Configuration("issuer publishes no end_session_endpoint".to_string())
        })?;
        let mut url = Url::parse(endpoint).map_err(|err| {
            GateError::Configuration(format!("invalid end_session_endpoint: {err}"))
        })?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", self.config.client_id());
            if let Some(redirect) = self.config.post_logout_redirect_uri() {
                query.append_pair("post_logout_redirect_uri", redirect);
            }
        }
        Ok(url)
    }

    /// Forget the local session and return the provider logout URL.
    ///
    /// # Errors
    /// Same as [`OidcEngine::logout_url`]; the local session is dropped regardless.
    pub fn logout(&self, session_id: &str) -> Result<Url, GateError> {
        if self.sessions.invalidate(session_id) {
            debug!("session invalidated");
        }
        self.logout_url()
    }

    /// Drop expired pending logins and sessions.
    pub async fn evict_expired(&self, now: i64) -> usize {
        self.pending.evict_expired(now).await + self.sessions.evict_expired(now)
    }

    async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<String, GateError> {
        let span = info_span!(
            "oidc.token_exchange",
            http.method = "POST",
            url = %self.metadata.token_endpoint
        );
        async {
            let form = [
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri()),
                ("client_id", self.config.client_id()),
                ("code_verifier", code_verifier),
                (
                    "client_secret",
                    secrecy::ExposeSecret::expose_secret(self.config.client_secret()),
                ),
            ];
            let response = self
                .client
                .post(&self.metadata.token_endpoint)
                .form(&form)
                .send()
                .await
                .map_err(|err| {
                    if err.is_timeout() {
                        GateError::UpstreamUnavailable("token exchange timed out".to_string())
                    } else {
                        GateError::UpstreamUnavailable(format!("token exchange: {err}"))
                    }
                })?;

            let status = response.status();
            if status.is_server_error() {
                return Err(GateError::UpstreamUnavailable(format!(
                    "token endpoint returned {status}"
                )));
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                warn!(%status, "token endpoint rejected the code");
                return Err(GateError::Protocol(format!(
                    "token endpoint returned {status}: {body}"
                )));
            }
            let token: TokenResponse = response
                .json()
                .await
                .map_err(|err| GateError::Protocol(format!("token response invalid: {err}")))?;
            token
                .id_token
                .filter(|token| !token.is_empty())
                .ok_or_else(|| GateError::Protocol("token response has no id_token".to_string()))
        }
        .instrument(span)
        .await
    }

    /// Verify with the cached keys; on an unknown `kid` refresh once and retry.
    async fn verify_id_token(&self, token: &str, nonce: &str) -> Result<IdTokenClaims, GateError> {
        let now = self.clock.now_unix();
        let validation = Validation {
            issuer: &self.metadata.issuer,
            client_id: self.config.client_id(),
            nonce,
            now_unix_seconds: now,
            leeway_seconds: self.config.leeway_seconds(),
        };
        let rejected = |err: oidc_token::Error| GateError::Protocol(format!("id token rejected: {err}"));

        let jwks = self.keys.snapshot().await?;
        match oidc_token::verify_rs256(token, &jwks, &validation) {
            Ok(claims) => Ok(claims),
            Err(oidc_token::Error::UnknownKid(kid)) => {
                debug!(kid = %kid, "unknown signing key, refreshing jwks");
                match self.keys.refresh_on_unknown_kid(now).await? {
                    Some(jwks) => oidc_token::verify_rs256(token, &jwks, &validation).map_err(rejected),
                    None => Err(rejected(oidc_token::Error::UnknownKid(kid))),
                }
            }
            Err(err) => Err(rejected(err)),
        }
    }
}

fn http_client(config: &OidcConfig) -> Result<Client, GateError> {
    Client::builder()
        .user_agent(crate::APP_USER_AGENT)
        .timeout(config.exchange_timeout())
        .build()
        .map_err(|err| GateError::Configuration(format!("failed to build http client: {err}")))
}

/// `name`, then `preferred_username`, then `email`, then `sub`.
fn display_name_from(claims: &IdTokenClaims) -> String {
    [&claims.name, &claims.preferred_username, &claims.email]
        .into_iter()
        .flatten()
        .find(|value| !value.trim().is_empty())
        .cloned()
        .unwrap_or_else(|| claims.sub.clone())
}
