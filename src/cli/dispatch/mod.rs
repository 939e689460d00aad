use crate::cli::{
    actions::{Action, server::Args},
    commands::{ARG_PORT, ARG_PUBLIC_BASE_URL, actuator, gate, oidc},
};
use anyhow::{Context, Result};

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let public_base_url = matches
        .get_one::<String>(ARG_PUBLIC_BASE_URL)
        .cloned()
        .filter(|url| !url.trim().is_empty())
        .context("missing required argument: --public-base-url")?;
    url::Url::parse(&public_base_url).context("invalid DOORGATE_PUBLIC_BASE_URL")?;

    let gate = gate::Options::parse(matches)?;
    let oidc = oidc::Options::parse(matches, &public_base_url);
    let actuator = actuator::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        public_base_url,
        gate,
        oidc,
        actuator,
    }))
}
