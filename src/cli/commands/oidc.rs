use crate::oidc::OidcConfig;
use clap::{Arg, ArgAction, ArgMatches, Command, builder::BoolishValueParser};
use secrecy::SecretString;

pub const ARG_OIDC_ENABLED: &str = "oidc-enabled";
pub const ARG_OIDC_ISSUER: &str = "oidc-issuer";
pub const ARG_OIDC_CLIENT_ID: &str = "oidc-client-id";
pub const ARG_OIDC_CLIENT_SECRET: &str = "oidc-client-secret";
pub const ARG_OIDC_REDIRECT_URI: &str = "oidc-redirect-uri";
pub const ARG_OIDC_POST_LOGOUT_REDIRECT_URI: &str = "oidc-post-logout-redirect-uri";
pub const ARG_OIDC_SCOPES: &str = "oidc-scopes";
pub const ARG_OIDC_USER_GROUP: &str = "oidc-user-group";
pub const ARG_OIDC_REQUIRE_PIN: &str = "oidc-require-pin";

#[derive(Debug, Clone)]
pub struct Options {
    pub config: OidcConfig,
}

impl Options {
    /// Resolve the OIDC settings. The redirect URI defaults to
    /// `{public_base_url}/callback`.
    ///
    /// Incomplete settings are not rejected here; `OidcConfig::validate` decides
    /// at startup and SSO stays off when it fails.
    #[must_use]
    pub fn parse(matches: &ArgMatches, public_base_url: &str) -> Self {
        if !matches.get_flag(ARG_OIDC_ENABLED) {
            return Self {
                config: OidcConfig::disabled(),
            };
        }

        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let redirect_uri = get_non_empty(ARG_OIDC_REDIRECT_URI).unwrap_or_else(|| {
            format!("{}/callback", public_base_url.trim_end_matches('/'))
        });
        let post_logout = get_non_empty(ARG_OIDC_POST_LOGOUT_REDIRECT_URI)
            .or_else(|| Some(format!("{}/", public_base_url.trim_end_matches('/'))));

        let mut config = OidcConfig::new(
            get_non_empty(ARG_OIDC_ISSUER).unwrap_or_default(),
            get_non_empty(ARG_OIDC_CLIENT_ID).unwrap_or_default(),
            SecretString::from(get_non_empty(ARG_OIDC_CLIENT_SECRET).unwrap_or_default()),
            redirect_uri,
        )
        .with_post_logout_redirect_uri(post_logout)
        .with_require_pin(matches.get_flag(ARG_OIDC_REQUIRE_PIN));

        if let Some(scopes) = get_non_empty(ARG_OIDC_SCOPES) {
            config = config.with_scopes(scopes);
        }
        if let Some(groups) = get_non_empty(ARG_OIDC_USER_GROUP) {
            config = config.with_user_group(&groups);
        }

        Self { config }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_OIDC_ENABLED)
                .long(ARG_OIDC_ENABLED)
                .help("Enable sign-in with an OpenID Connect provider")
                .env("DOORGATE_OIDC_ENABLED")
                .action(ArgAction::SetTrue)
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new(ARG_OIDC_ISSUER)
                .long(ARG_OIDC_ISSUER)
                .help("Issuer URL; discovery is loaded from /.well-known/openid-configuration")
                .env("DOORGATE_OIDC_ISSUER"),
        )
        .arg(
            Arg::new(ARG_OIDC_CLIENT_ID)
                .long(ARG_OIDC_CLIENT_ID)
                .help("OIDC client id")
                .env("DOORGATE_OIDC_CLIENT_ID"),
        )
        .arg(
            Arg::new(ARG_OIDC_CLIENT_SECRET)
                .long(ARG_OIDC_CLIENT_SECRET)
                .help("OIDC client secret")
                .env("DOORGATE_OIDC_CLIENT_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_OIDC_REDIRECT_URI)
                .long(ARG_OIDC_REDIRECT_URI)
                .help("Callback URL registered with the provider (default: <public-base-url>/callback)")
                .env("DOORGATE_OIDC_REDIRECT_URI"),
        )
        .arg(
            Arg::new(ARG_OIDC_POST_LOGOUT_REDIRECT_URI)
                .long(ARG_OIDC_POST_LOGOUT_REDIRECT_URI)
                .help("Where the provider returns after logout (default: <public-base-url>/)")
                .env("DOORGATE_OIDC_POST_LOGOUT_REDIRECT_URI"),
        )
        .arg(
            Arg::new(ARG_OIDC_SCOPES)
                .long(ARG_OIDC_SCOPES)
                .help("Requested scopes (default: openid profile email)")
                .env("DOORGATE_OIDC_SCOPES"),
        )
        .arg(
            Arg::new(ARG_OIDC_USER_GROUP)
                .long(ARG_OIDC_USER_GROUP)
                .help("Groups allowed to open without a PIN, comma separated (default: any signed-in user)")
                .env("DOORGATE_OIDC_USER_GROUP"),
        )
        .arg(
            Arg::new(ARG_OIDC_REQUIRE_PIN)
                .long(ARG_OIDC_REQUIRE_PIN)
                .help("Require a PIN even for signed-in users")
                .env("DOORGATE_OIDC_REQUIRE_PIN")
                .action(ArgAction::SetTrue)
                .value_parser(BoolishValueParser::new()),
        )
}
