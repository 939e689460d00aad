use crate::{
    api::{self, AppState, cookies::CookieCodec},
    cli::commands::{actuator, gate, oidc},
    gate::{
        AccessDecisionEngine, Actuator, AdminGate, AttemptLedger, AuditSink, BlockState,
        CapsuleSealer, Clock, FanoutAuditSink, GateError, HomeAssistantActuator,
        JsonLinesAuditSink, MemoryUserStore, SessionStore, SimulatedActuator, SystemClock,
        TracingAuditSink, UserStore,
    },
    oidc::OidcProvider,
};
use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub public_base_url: String,
    pub gate: gate::Options,
    pub oidc: oidc::Options,
    pub actuator: actuator::Options,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is unusable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);
    let port = args.port;
    let state = build_state(args).await?;
    api::serve(port, Arc::new(state)).await
}

/// Wire the decision engine, SSO, admin and actuator from resolved arguments.
///
/// SSO problems never abort startup. Invalid settings disable sign-in; an
/// unreachable issuer leaves it enabled and is retried on the next sign-in.
///
/// # Errors
/// Returns an error for an unusable signing key, audit log or actuator URL.
pub async fn build_state(args: Args) -> Result<AppState> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let now = clock.now_unix();
    let config = args.gate.config;

    let sealer = match &args.gate.secret_key {
        Some(key) => CapsuleSealer::new(key.expose_secret().as_bytes())
            .context("invalid DOORGATE_SECRET_KEY")?,
        None => {
            warn!(
                "no secret key configured, using a random one: cookies will not survive a restart and every worker must share one key"
            );
            CapsuleSealer::random().context("failed to generate a secret key")?
        }
    };
    let sealer = Arc::new(sealer);

    let users = MemoryUserStore::seeded(args.gate.pins, now);
    if users.list().is_empty() {
        warn!("no PIN holders configured");
    }
    let users: Arc<dyn UserStore> = Arc::new(users);

    let audit_log = match &args.gate.audit_log {
        Some(path) => Some(
            JsonLinesAuditSink::open(path)
                .with_context(|| format!("could not open audit log {path}"))?,
        ),
        None => None,
    };
    let audit: Arc<dyn AuditSink> = match &audit_log {
        Some(file) => Arc::new(FanoutAuditSink::new(vec![
            Box::new(TracingAuditSink),
            Box::new(file.clone()),
        ])),
        None => Arc::new(TracingAuditSink),
    };

    let sessions = Arc::new(SessionStore::new(config.session_ttl_seconds()));
    let oidc = if args.oidc.config.enabled() {
        match OidcProvider::new(args.oidc.config, Arc::clone(&sessions), Arc::clone(&clock)) {
            Ok(provider) => {
                if let Err(err) = provider.engine().await {
                    warn!("SSO enabled but unavailable, retrying on demand: {err}");
                }
                Some(Arc::new(provider))
            }
            Err(err @ GateError::Configuration(_)) => {
                error!("SSO disabled: {err}");
                None
            }
            Err(err) => return Err(err.into()),
        }
    } else {
        None
    };
    let pinless = oidc
        .as_ref()
        .and_then(|provider| provider.config().pinless_policy());

    let actuator: Arc<dyn Actuator> = match args.actuator {
        actuator::Options::Simulated => {
            warn!("test mode: the door actuator is simulated");
            Arc::new(SimulatedActuator)
        }
        actuator::Options::HomeAssistant {
            url,
            token,
            entity_id,
            battery_entity,
        } => Arc::new(
            HomeAssistantActuator::new(&url, token, entity_id)
                .context("invalid Home Assistant settings")?
                .with_battery_entity(battery_entity),
        ),
    };

    let session_ttl = config.session_ttl_seconds();
    let admin = args
        .gate
        .admin_password
        .map(|password| AdminGate::new(password, config.clone(), Arc::clone(&sealer)));
    if admin.is_none() {
        info!("no admin password configured, /admin is disabled");
    }
    let ledger = Arc::new(AttemptLedger::new(config));
    let blocks = BlockState::new(ledger, Arc::clone(&sealer));
    let engine = AccessDecisionEngine::new(blocks, users, audit, clock).with_pinless_policy(pinless);
    let cookies = CookieCodec::new(sealer, &args.public_base_url, session_ttl);

    Ok(AppState::new(engine, actuator, sessions, cookies)
        .with_oidc(oidc)
        .with_trusted_proxies(args.gate.trusted_proxies)
        .with_admin(admin)
        .with_audit_log(audit_log))
}

fn log_startup_args(args: &Args) {
    let config = &args.gate.config;
    let oidc = &args.oidc.config;
    let actuator = match &args.actuator {
        actuator::Options::Simulated => "simulated (test mode)".to_string(),
        actuator::Options::HomeAssistant {
            url,
            entity_id,
            battery_entity,
            ..
        } => format!(
            "home assistant {url} ({entity_id}, battery {})",
            battery_entity.as_deref().unwrap_or("default")
        ),
    };
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("public_base_url", args.public_base_url.clone()),
        ("pin_holders", args.gate.pins.len().to_string()),
        ("secret_key_set", args.gate.secret_key.is_some().to_string()),
        ("max_attempts", config.max_attempts().to_string()),
        (
            "session_max_attempts",
            config.session_max_attempts().to_string(),
        ),
        (
            "max_global_attempts_per_hour",
            config.max_global_attempts_per_hour().to_string(),
        ),
        ("block_time_minutes", config.block_time_minutes().to_string()),
        (
            "audit_log",
            args.gate
                .audit_log
                .clone()
                .unwrap_or_else(|| "none".to_string()),
        ),
        (
            "trusted_proxies",
            if args.gate.trusted_proxies.is_empty() {
                "none".to_string()
            } else {
                format!("{:?}", args.gate.trusted_proxies)
            },
        ),
        (
            "admin_enabled",
            args.gate.admin_password.is_some().to_string(),
        ),
        ("oidc_enabled", oidc.enabled().to_string()),
        (
            "oidc_issuer",
            if oidc.enabled() {
                oidc.issuer().to_string()
            } else {
                "n/a".to_string()
            },
        ),
        ("oidc_require_pin", oidc.require_pin().to_string()),
        ("actuator", actuator),
    ];
    log_entries("Startup configuration", &entries);
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\n{title}:", doorgate_banner());
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn doorgate_banner() -> String {
    let short_hash = short_commit(crate::GIT_COMMIT_HASH);
    DOORGATE_BANNER.replace(
        "{VERSION}",
        &format!(" - {} - {}", env!("CARGO_PKG_VERSION"), short_hash),
    )
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    if trimmed.len() > 7 {
        trimmed[..7].to_string()
    } else {
        trimmed.to_string()
    }
}

const DOORGATE_BANNER: &str = r"
  +--------+
  |  +--+  |
  |  |  |  |
  |  | o|  |  D O O R G A T E {VERSION}
  |  |  |  |
  |  +--+  |
  +--------+";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::TrustedProxies;
    use crate::gate::GateConfig;
    use crate::oidc::OidcConfig;
    use axum::{body::Body, http::Request, http::StatusCode};
    use secrecy::SecretString;
    use tower::ServiceExt;

    fn args() -> Args {
        Args {
            port: 8080,
            public_base_url: "http://localhost:8080".to_string(),
            gate: gate::Options {
                config: GateConfig::new(),
                pins: vec![("alice".to_string(), "1234".to_string())],
                secret_key: None,
                audit_log: None,
                trusted_proxies: TrustedProxies::default(),
                admin_password: None,
            },
            oidc: oidc::Options {
                config: OidcConfig::disabled(),
            },
            actuator: actuator::Options::Simulated,
        }
    }

    #[test]
    fn short_commit_truncates() {
        assert_eq!(short_commit("0123456789abcdef"), "0123456");
        assert_eq!(short_commit(" abc "), "abc");
    }

    #[tokio::test]
    async fn builds_state_without_sso() -> Result<()> {
        let state = build_state(args()).await?;
        assert!(state.engine().pinless_policy().is_none());
        assert_eq!(
            state.engine().users().find_by_pin("1234").as_deref(),
            Some("alice")
        );
        Ok(())
    }

    #[tokio::test]
    async fn short_secret_key_is_rejected() {
        let mut args = args();
        args.gate.secret_key = Some(SecretString::from("short"));
        assert!(build_state(args).await.is_err());
    }

    #[tokio::test]
    async fn unreachable_issuer_keeps_sso_enabled_but_unavailable() -> Result<()> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        drop(listener);

        let mut args = args();
        args.oidc.config = OidcConfig::new(
            format!("http://{addr}"),
            "doorgate",
            SecretString::from("s3cret"),
            "http://localhost:8080/callback",
        );
        let state = build_state(args).await?;
        assert!(state.engine().pinless_policy().is_some());

        let router = api::router(Arc::new(state));
        let response = router
            .clone()
            .oneshot(Request::builder().uri("/login").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let response = router
            .oneshot(Request::builder().uri("/auth/status").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_sso_settings_disable_sso() -> Result<()> {
        let mut args = args();
        args.oidc.config = OidcConfig::new(
            "not a url",
            "doorgate",
            SecretString::from("s3cret"),
            "http://localhost:8080/callback",
        );
        let state = build_state(args).await?;
        let response = api::router(Arc::new(state))
            .oneshot(Request::builder().uri("/login").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        Ok(())
    }

    async fn admin_check_status(state: AppState) -> Result<StatusCode> {
        let response = api::router(Arc::new(state))
            .oneshot(Request::builder().uri("/admin/check-auth").body(Body::empty())?)
            .await?;
        Ok(response.status())
    }

    #[tokio::test]
    async fn admin_is_enabled_by_a_password() -> Result<()> {
        let state = build_state(args()).await?;
        assert_eq!(admin_check_status(state).await?, StatusCode::NOT_FOUND);

        let mut args = args();
        args.gate.admin_password = Some(SecretString::from("hunter22"));
        let state = build_state(args).await?;
        assert_eq!(admin_check_status(state).await?, StatusCode::OK);
        Ok(())
    }
}
