//! HTTP surface.

use crate::{
    api::handlers::health,
    gate::{AccessDecisionEngine, Actuator, AdminGate, JsonLinesAuditSink, SessionStore},
    oidc::OidcProvider,
};
use anyhow::Result;
use axum::{
    Extension, Router,
    body::Body,
    http::{
        HeaderName, HeaderValue, Request,
        header::{
            CONTENT_SECURITY_POLICY, REFERRER_POLICY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
            X_XSS_PROTECTION,
        },
    },
    response::Json,
    routing::{get, options},
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer,
    set_header::{SetRequestHeaderLayer, SetResponseHeaderLayer},
    trace::TraceLayer,
};
use tracing::{Span, debug, debug_span, error, info};
use ulid::Ulid;

pub mod client;
pub mod cookies;
pub mod handlers;
pub mod openapi;

use self::client::TrustedProxies;
use self::cookies::CookieCodec;

const EVICTION_INTERVAL_SECONDS: u64 = 60;

const CONTENT_SECURITY_POLICY_VALUE: &str = "default-src 'self'; script-src 'self' 'unsafe-inline'; \
     style-src 'self' 'unsafe-inline'; img-src 'self' data:; font-src 'self'";

/// Shared by every handler through an `Extension`.
pub struct AppState {
    engine: AccessDecisionEngine,
    actuator: Arc<dyn Actuator>,
    /// `None` when SSO is disabled; present even while the issuer is unreachable.
    oidc: Option<Arc<OidcProvider>>,
    sessions: Arc<SessionStore>,
    cookies: CookieCodec,
    trusted_proxies: TrustedProxies,
    /// `None` when no admin password is configured.
    admin: Option<AdminGate>,
    audit_log: Option<JsonLinesAuditSink>,
}

impl AppState {
    /// `sessions` must be the store the OIDC engine authenticates into.
    #[must_use]
    pub fn new(
        engine: AccessDecisionEngine,
        actuator: Arc<dyn Actuator>,
        sessions: Arc<SessionStore>,
        cookies: CookieCodec,
    ) -> Self {
        Self {
            engine,
            actuator,
            oidc: None,
            sessions,
            cookies,
            trusted_proxies: TrustedProxies::default(),
            admin: None,
            audit_log: None,
        }
    }

    #[must_use]
    pub fn with_oidc(mut self, oidc: Option<Arc<OidcProvider>>) -> Self {
        self.oidc = oidc;
        self
    }

    #[must_use]
    pub fn with_trusted_proxies(mut self, trusted_proxies: TrustedProxies) -> Self {
        self.trusted_proxies = trusted_proxies;
        self
    }

    #[must_use]
    pub fn with_admin(mut self, admin: Option<AdminGate>) -> Self {
        self.admin = admin;
        self
    }

    /// The audit file served by `/admin/logs`.
    #[must_use]
    pub fn with_audit_log(mut self, audit_log: Option<JsonLinesAuditSink>) -> Self {
        self.audit_log = audit_log;
        self
    }

    #[must_use]
    pub const fn engine(&self) -> &AccessDecisionEngine {
        &self.engine
    }

    /// Sweep expired ledger entries, sessions and pending logins.
    pub async fn evict_expired(&self) -> usize {
        let now = self.engine.clock().now_unix();
        let mut evicted = self.engine.block_state().ledger().evict_expired(now);
        if let Some(admin) = &self.admin {
            evicted += admin.ledger().evict_expired(now);
        }
        evicted
            + match &self.oidc {
                Some(oidc) => oidc.evict_expired(now).await,
                None => self.sessions.evict_expired(now),
            }
    }
}

/// Application router with the security header, request id and trace layers.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    let (router, openapi) = openapi::api_router().split_for_parts();
    let openapi = Arc::new(openapi);

    router
        .route(
            "/openapi.json",
            get(move || {
                let openapi = Arc::clone(&openapi);
                async move { Json(openapi.as_ref().clone()) }
            }),
        )
        .route("/health", options(health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(SetResponseHeaderLayer::overriding(
                    X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    X_FRAME_OPTIONS,
                    HeaderValue::from_static("DENY"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    X_XSS_PROTECTION,
                    HeaderValue::from_static("1; mode=block"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    REFERRER_POLICY,
                    HeaderValue::from_static("strict-origin-when-cross-origin"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    CONTENT_SECURITY_POLICY,
                    HeaderValue::from_static(CONTENT_SECURITY_POLICY_VALUE),
                ))
                .layer(Extension(state)),
        )
}

/// Serve until ctrl-c, sweeping expired state in the background.
///
/// # Errors
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn serve(port: u16, state: Arc<AppState>) -> Result<()> {
    let app = router(Arc::clone(&state));
    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    let sweeper = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(EVICTION_INTERVAL_SECONDS));
        loop {
            interval.tick().await;
            let evicted = state.evict_expired().await;
            if evicted > 0 {
                debug!(evicted, "expired entries evicted");
            }
        }
    });

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for shutdown signal: {err}");
        }
        info!("Gracefully shutdown");
    })
    .await?;

    sweeper.abort();
    Ok(())
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let request_id = headers
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", path, ?headers, request_id)
}
