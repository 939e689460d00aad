//! Who is calling: address resolution and scripted-client screening.

use axum::http::{HeaderMap, header::USER_AGENT};
use ipnetwork::IpNetwork;
use std::net::{IpAddr, SocketAddr};

const MIN_USER_AGENT_LEN: usize = 8;

/// Substrings (lowercase) of user-agents sent by scripted HTTP clients.
const SCRIPTED_AGENTS: &[&str] = &[
    "curl",
    "wget",
    "python-requests",
    "python-urllib",
    "aiohttp",
    "httpie",
    "libwww-perl",
    "go-http-client",
    "okhttp",
    "java/",
    "scrapy",
    "postman",
];

/// Peers whose `X-Forwarded-For` and `X-Real-IP` headers are believed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrustedProxies {
    networks: Vec<IpNetwork>,
}

impl TrustedProxies {
    /// Parse `10.0.0.0/8, 127.0.0.1`. A bare address is a single host.
    ///
    /// # Errors
    /// Returns the first entry that is neither an address nor a network.
    pub fn parse(value: &str) -> Result<Self, String> {
        let networks = value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                entry
                    .parse::<IpNetwork>()
                    .map_err(|err| format!("invalid trusted proxy {entry:?}: {err}"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { networks })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    #[must_use]
    pub fn contains(&self, addr: IpAddr) -> bool {
        self.networks.iter().any(|network| network.contains(addr))
    }
}

/// Client address for rate limiting.
///
/// Proxy headers count only when the socket peer is a trusted proxy. The
/// `X-Forwarded-For` chain is then walked from the right and the first hop that
/// is not itself a trusted proxy is the client; a client cannot pick its own
/// address by prepending hops.
#[must_use]
pub fn client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted: &TrustedProxies,
) -> String {
    let Some(peer) = peer.map(|addr| addr.ip()) else {
        return "unknown".to_string();
    };
    if !trusted.contains(peer) {
        return peer.to_string();
    }
    forwarded_client(headers, trusted)
        .or_else(|| real_ip(headers))
        .unwrap_or_else(|| peer.to_string())
}

/// Rightmost untrusted `X-Forwarded-For` hop, or the leftmost when every hop is trusted.
fn forwarded_client(headers: &HeaderMap, trusted: &TrustedProxies) -> Option<String> {
    let hops: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .collect();
    hops.iter()
        .rev()
        .find(|hop| hop.parse::<IpAddr>().ok().is_none_or(|addr| !trusted.contains(addr)))
        .or_else(|| hops.first())
        .map(|hop| (*hop).to_string())
}

fn real_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[must_use]
pub fn user_agent(headers: &HeaderMap) -> Option<&str> {
    headers.get(USER_AGENT).and_then(|value| value.to_str().ok())
}

/// Refuse requests that do not look like they come from a browser.
///
/// # Errors
/// Returns the audit detail describing why the request was screened out.
pub fn screen(user_agent: Option<&str>) -> Result<(), String> {
    let Some(user_agent) = user_agent.map(str::trim).filter(|ua| !ua.is_empty()) else {
        return Err("Missing user-agent".to_string());
    };
    if user_agent.len() < MIN_USER_AGENT_LEN {
        return Err(format!("Suspicious short user-agent: {user_agent}"));
    }
    let lowered = user_agent.to_ascii_lowercase();
    if let Some(agent) = SCRIPTED_AGENTS.iter().find(|agent| lowered.contains(*agent)) {
        return Err(format!("Scripted client ({agent}): {user_agent}"));
    }
    Ok(())
}
