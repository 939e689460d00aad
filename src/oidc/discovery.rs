//! OpenID Provider metadata (`/.well-known/openid-configuration`).

use crate::gate::GateError;
use reqwest::Client;
use serde::Deserialize;
use tracing::{Instrument, info_span};

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

#[must_use]
pub fn discovery_url(issuer: &str) -> String {
    format!(
        "{}/.well-known/openid-configuration",
        issuer.trim_end_matches('/')
    )
}

/// Fetch and check the issuer's metadata.
///
/// # Errors
/// `UpstreamUnavailable` when the document cannot be fetched or parsed,
/// `Configuration` when it describes a different issuer.
pub async fn fetch(client: &Client, issuer: &str) -> Result<ProviderMetadata, GateError> {
    let url = discovery_url(issuer);
    let span = info_span!("oidc.discovery", http.method = "GET", url = %url);
    async {
        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|err| GateError::UpstreamUnavailable(format!("discovery request: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(GateError::UpstreamUnavailable(format!(
                "discovery returned {status}"
            )));
        }
        let metadata: ProviderMetadata = response.json().await.map_err(|err| {
            GateError::UpstreamUnavailable(format!("discovery document invalid: {err}"))
        })?;

        if metadata.issuer.trim_end_matches('/') != issuer.trim_end_matches('/') {
            return Err(GateError::Configuration(format!(
                "discovery issuer {} does not match configured issuer {issuer}",
                metadata.issuer
            )));
        }
        Ok(metadata)
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_url_ignores_trailing_slash() {
        assert_eq!(
            discovery_url("https://sso.example.test/realms/home/"),
            "https://sso.example.test/realms/home/.well-known/openid-configuration"
        );
    }

    #[test]
    fn end_session_endpoint_is_optional() -> anyhow::Result<()> {
        let metadata: ProviderMetadata = serde_json::from_str(
            r#"{
                "issuer": "https://sso.example.test",
                "authorization_endpoint": "https://sso.example.test/auth",
                "token_endpoint": "https://sso.example.test/token",
                "jwks_uri": "https://sso.example.test/certs",
                "response_types_supported": ["code"]
            }"#,
        )?;
        assert_eq!(metadata.end_session_endpoint, None);
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_issuer_is_upstream_unavailable() -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        drop(listener);
        let result = fetch(&Client::new(), &format!("http://{addr}")).await;
        assert!(matches!(result, Err(GateError::UpstreamUnavailable(_))));
        Ok(())
    }
}
