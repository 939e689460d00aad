//! Rate limiting thresholds, PIN holders, the capsule signing key, trusted
//! proxies and the admin password.

use crate::api::client::TrustedProxies;
use crate::gate::GateConfig;
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_PINS: &str = "pins";
pub const ARG_SECRET_KEY: &str = "secret-key";
pub const ARG_MAX_ATTEMPTS: &str = "max-attempts";
pub const ARG_SESSION_MAX_ATTEMPTS: &str = "session-max-attempts";
pub const ARG_MAX_GLOBAL_ATTEMPTS_PER_HOUR: &str = "max-global-attempts-per-hour";
pub const ARG_BLOCK_TIME_MINUTES: &str = "block-time-minutes";
pub const ARG_SESSION_TTL: &str = "session-ttl";
pub const ARG_AUDIT_LOG: &str = "audit-log";
pub const ARG_TRUSTED_PROXIES: &str = "trusted-proxies";
pub const ARG_ADMIN_PASSWORD: &str = "admin-password";

#[derive(Debug)]
pub struct Options {
    pub config: GateConfig,
    /// `(name, pin)` pairs from `--pins`.
    pub pins: Vec<(String, String)>,
    pub secret_key: Option<SecretString>,
    pub audit_log: Option<String>,
    /// Peers whose forwarded client address headers are believed.
    pub trusted_proxies: TrustedProxies,
    /// `None` disables the admin endpoints.
    pub admin_password: Option<SecretString>,
}

impl Options {
    /// Parse gate arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a `--pins` entry is not `name=pin` or a trusted
    /// proxy is neither an address nor a network.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };
        let get_u32 = |id: &str| matches.get_one::<u32>(id).copied();

        let mut config = GateConfig::new();
        if let Some(attempts) = get_u32(ARG_MAX_ATTEMPTS) {
            config = config.with_max_attempts(attempts);
        }
        if let Some(attempts) = get_u32(ARG_SESSION_MAX_ATTEMPTS) {
            config = config.with_session_max_attempts(attempts);
        }
        if let Some(attempts) = get_u32(ARG_MAX_GLOBAL_ATTEMPTS_PER_HOUR) {
            config = config.with_max_global_attempts_per_hour(attempts);
        }
        if let Some(minutes) = matches.get_one::<i64>(ARG_BLOCK_TIME_MINUTES).copied() {
            config = config.with_block_time_minutes(minutes);
        }
        if let Some(seconds) = matches.get_one::<i64>(ARG_SESSION_TTL).copied() {
            config = config.with_session_ttl_seconds(seconds);
        }

        let pins = match get_non_empty(ARG_PINS) {
            Some(pins) => parse_pins(&pins)?,
            None => Vec::new(),
        };

        let trusted_proxies = match get_non_empty(ARG_TRUSTED_PROXIES) {
            Some(proxies) => TrustedProxies::parse(&proxies).map_err(anyhow::Error::msg)?,
            None => TrustedProxies::default(),
        };

        Ok(Self {
            config,
            pins,
            secret_key: get_non_empty(ARG_SECRET_KEY).map(SecretString::from),
            audit_log: get_non_empty(ARG_AUDIT_LOG),
            trusted_proxies,
            admin_password: get_non_empty(ARG_ADMIN_PASSWORD).map(SecretString::from),
        })
    }
}

/// Parse `alice=1234,bob=5678`.
///
/// # Errors
/// Returns an error naming the first entry without a `=`.
pub fn parse_pins(value: &str) -> anyhow::Result<Vec<(String, String)>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, pin) = entry
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("invalid --{ARG_PINS} entry (expected name=pin)"))?;
            Ok((name.trim().to_string(), pin.trim().to_string()))
        })
        .collect()
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PINS)
                .long(ARG_PINS)
                .help("PIN holders as name=pin pairs, comma separated")
                .env("DOORGATE_PINS")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_SECRET_KEY)
                .long(ARG_SECRET_KEY)
                .help("Key (32+ bytes) signing session and block cookies")
                .long_help(
                    "Key (at least 32 bytes) signing the session and block cookies.\n\nWhen unset a random key is generated at startup: cookies then stop verifying after a restart and are not shared between workers.",
                )
                .env("DOORGATE_SECRET_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_MAX_ATTEMPTS)
                .long(ARG_MAX_ATTEMPTS)
                .help("Failed attempts per client IP before a lockout")
                .env("DOORGATE_MAX_ATTEMPTS")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_SESSION_MAX_ATTEMPTS)
                .long(ARG_SESSION_MAX_ATTEMPTS)
                .help("Failed attempts per browser session before a lockout")
                .env("DOORGATE_SESSION_MAX_ATTEMPTS")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_MAX_GLOBAL_ATTEMPTS_PER_HOUR)
                .long(ARG_MAX_GLOBAL_ATTEMPTS_PER_HOUR)
                .help("Failed attempts across all clients per hour before a global lockout")
                .env("DOORGATE_MAX_GLOBAL_ATTEMPTS_PER_HOUR")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_BLOCK_TIME_MINUTES)
                .long(ARG_BLOCK_TIME_MINUTES)
                .help("Lockout duration in minutes")
                .env("DOORGATE_BLOCK_TIME_MINUTES")
                .value_parser(clap::value_parser!(i64).range(0..)),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL)
                .long(ARG_SESSION_TTL)
                .help("Browser session lifetime in seconds")
                .env("DOORGATE_SESSION_TTL")
                .value_parser(clap::value_parser!(i64).range(60..)),
        )
        .arg(
            Arg::new(ARG_AUDIT_LOG)
                .long(ARG_AUDIT_LOG)
                .help("Append audit events as JSON lines to this file")
                .env("DOORGATE_AUDIT_LOG")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new(ARG_TRUSTED_PROXIES)
                .long(ARG_TRUSTED_PROXIES)
                .help("Reverse proxies (addresses or CIDR networks, comma separated) whose X-Forwarded-For is believed")
                .long_help(
                    "Reverse proxies, as addresses or CIDR networks separated by commas.\n\nX-Forwarded-For and X-Real-IP are only read from these peers; the client is the rightmost forwarded hop that is not itself a trusted proxy. When unset, the socket peer is the client.",
                )
                .env("DOORGATE_TRUSTED_PROXIES"),
        )
        .arg(
            Arg::new(ARG_ADMIN_PASSWORD)
                .long(ARG_ADMIN_PASSWORD)
                .help("Password for the /admin endpoints; they are disabled when unset")
                .env("DOORGATE_ADMIN_PASSWORD")
                .hide_env_values(true),
        )
}
