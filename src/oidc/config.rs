use crate::gate::{GateError, PinlessPolicy};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use url::Url;

pub const DEFAULT_SCOPES: &str = "openid profile email";
pub const DEFAULT_PENDING_TTL_SECONDS: i64 = 600;
pub const DEFAULT_EXCHANGE_TIMEOUT_SECONDS: u64 = 10;

/// Resolved OpenID Connect settings.
#[derive(Clone, Debug)]
pub struct OidcConfig {
    enabled: bool,
    issuer: String,
    client_id: String,
    client_secret: SecretString,
    redirect_uri: String,
    post_logout_redirect_uri: Option<String>,
    scopes: String,
    allowed_groups: Vec<String>,
    require_pin: bool,
    pending_ttl_seconds: i64,
    exchange_timeout: Duration,
    leeway_seconds: i64,
}

impl OidcConfig {
    /// Enabled configuration with defaults for everything but the client identity.
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            enabled: true,
            issuer: issuer.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            client_secret,
            redirect_uri: redirect_uri.into(),
            post_logout_redirect_uri: None,
            scopes: DEFAULT_SCOPES.to_string(),
            allowed_groups: Vec::new(),
            require_pin: false,
            pending_ttl_seconds: DEFAULT_PENDING_TTL_SECONDS,
            exchange_timeout: Duration::from_secs(DEFAULT_EXCHANGE_TIMEOUT_SECONDS),
            leeway_seconds: oidc_token::DEFAULT_LEEWAY_SECONDS,
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new("", "", SecretString::from(String::new()), "")
        }
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: impl Into<String>) -> Self {
        self.scopes = scopes.into();
        self
    }

    /// Comma separated group allow-list. Empty means any authenticated subject.
    #[must_use]
    pub fn with_user_group(mut self, groups: &str) -> Self {
        self.allowed_groups = groups
            .split(',')
            .map(str::trim)
            .filter(|group| !group.is_empty())
            .map(ToString::to_string)
            .collect();
        self
    }

    #[must_use]
    pub fn with_require_pin(mut self, require_pin: bool) -> Self {
        self.require_pin = require_pin;
        self
    }

    #[must_use]
    pub fn with_post_logout_redirect_uri(mut self, uri: Option<String>) -> Self {
        self.post_logout_redirect_uri = uri;
        self
    }

    #[must_use]
    pub fn with_pending_ttl_seconds(mut self, seconds: i64) -> Self {
        self.pending_ttl_seconds = seconds.max(1);
        self
    }

    #[must_use]
    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout.max(Duration::from_secs(1));
        self
    }

    #[must_use]
    pub fn with_leeway_seconds(mut self, seconds: i64) -> Self {
        self.leeway_seconds = seconds.max(0);
        self
    }

    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub const fn client_secret(&self) -> &SecretString {
        &self.client_secret
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    #[must_use]
    pub fn post_logout_redirect_uri(&self) -> Option<&str> {
        self.post_logout_redirect_uri.as_deref()
    }

    #[must_use]
    pub fn scopes(&self) -> &str {
        &self.scopes
    }

    #[must_use]
    pub fn allowed_groups(&self) -> &[String] {
        &self.allowed_groups
    }

    #[must_use]
    pub const fn require_pin(&self) -> bool {
        self.require_pin
    }

    #[must_use]
    pub const fn pending_ttl_seconds(&self) -> i64 {
        self.pending_ttl_seconds
    }

    #[must_use]
    pub const fn exchange_timeout(&self) -> Duration {
        self.exchange_timeout
    }

    #[must_use]
    pub const fn leeway_seconds(&self) -> i64 {
        self.leeway_seconds
    }

    /// Policy handed to the decision engine, `None` when OIDC is off.
    #[must_use]
    pub fn pinless_policy(&self) -> Option<PinlessPolicy> {
        self.enabled.then(|| PinlessPolicy {
            require_pin: self.require_pin,
            allowed_groups: self.allowed_groups.clone(),
        })
    }

    /// Check an enabled configuration is usable. Disabled configs always pass.
    ///
    /// # Errors
    /// Returns `GateError::Configuration` naming the first offending setting.
    pub fn validate(&self) -> Result<(), GateError> {
        if !self.enabled {
            return Ok(());
        }
        let issuer = Url::parse(&self.issuer)
            .map_err(|err| GateError::Configuration(format!("invalid oidc issuer: {err}")))?;
        if !matches!(issuer.scheme(), "http" | "https") {
            return Err(GateError::Configuration(format!(
                "oidc issuer must be http(s): {}",
                self.issuer
            )));
        }
        if self.client_id.trim().is_empty() {
            return Err(GateError::Configuration(
                "oidc client id is required".to_string(),
            ));
        }
        if self.client_secret.expose_secret().is_empty() {
            return Err(GateError::Configuration(
                "oidc client secret is required".to_string(),
            ));
        }
        Url::parse(&self.redirect_uri)
            .map_err(|err| GateError::Configuration(format!("invalid oidc redirect uri: {err}")))?;
        if !self.scopes.split_whitespace().any(|scope| scope == "openid") {
            return Err(GateError::Configuration(
                "oidc scopes must include openid".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OidcConfig {
        OidcConfig::new(
            "https://sso.example.test/realms/home/",
            "doorgate",
            SecretString::from("s3cret"),
            "https://door.example.test/callback",
        )
    }

    #[test]
    fn defaults() {
        let config = config();
        assert!(config.enabled());
        assert_eq!(config.issuer(), "https://sso.example.test/realms/home");
        assert_eq!(config.scopes(), DEFAULT_SCOPES);
        assert_eq!(config.pending_ttl_seconds(), 600);
        assert_eq!(config.exchange_timeout(), Duration::from_secs(10));
        assert_eq!(config.leeway_seconds(), 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn user_group_is_a_comma_list() {
        let config = config().with_user_group(" door-users, ,admins ");
        assert_eq!(config.allowed_groups(), ["door-users", "admins"]);
        assert_eq!(
            config.pinless_policy(),
            Some(PinlessPolicy {
                require_pin: false,
                allowed_groups: vec!["door-users".to_string(), "admins".to_string()],
            })
        );
    }

    #[test]
    fn disabled_has_no_policy_and_validates() {
        let config = OidcConfig::disabled();
        assert!(!config.enabled());
        assert_eq!(config.pinless_policy(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_incomplete_settings() {
        let missing_secret = OidcConfig::new(
            "https://sso.example.test",
            "doorgate",
            SecretString::from(String::new()),
            "https://door.example.test/callback",
        );
        assert!(matches!(
            missing_secret.validate(),
            Err(GateError::Configuration(_))
        ));

        let bad_issuer = OidcConfig::new(
            "sso.example.test",
            "doorgate",
            SecretString::from("s"),
            "https://door.example.test/callback",
        );
        assert!(matches!(bad_issuer.validate(), Err(GateError::Configuration(_))));

        let no_openid = config().with_scopes("profile email");
        assert!(matches!(no_openid.validate(), Err(GateError::Configuration(_))));

        let no_client = OidcConfig::new(
            "https://sso.example.test",
            " ",
            SecretString::from("s"),
            "https://door.example.test/callback",
        );
        assert!(matches!(no_client.validate(), Err(GateError::Configuration(_))));
    }
}
