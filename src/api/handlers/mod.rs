pub mod admin;
pub mod battery;
pub mod door;
pub mod health;
pub mod oidc;
pub mod status;

use crate::api::client::{self, TrustedProxies};
use crate::gate::{ClientIdentity, CredentialFailure, GateError, fingerprint};
use axum::{
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{ACCEPT_LANGUAGE, RETRY_AFTER},
    },
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::net::SocketAddr;
use tracing::{error, warn};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Debug)]
pub struct ErrorBody {
    error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// HTTP status for a gate error.
#[must_use]
pub const fn status_for(err: &GateError) -> StatusCode {
    match err {
        GateError::InvalidCredential {
            failure: CredentialFailure::MissingPin,
            ..
        } => StatusCode::BAD_REQUEST,
        GateError::InvalidCredential { .. } | GateError::Protocol(_) => StatusCode::UNAUTHORIZED,
        GateError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        GateError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
        GateError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// `Retry-After` for rate limited responses.
pub(crate) fn retry_after(headers: &mut HeaderMap, seconds: i64) {
    if let Ok(value) = HeaderValue::from_str(&seconds.max(1).to_string()) {
        headers.insert(RETRY_AFTER, value);
    }
}

/// Log the detail, answer with the public message.
pub(crate) fn gate_error_response(err: &GateError) -> Response {
    let status = status_for(err);
    if status.is_server_error() {
        error!("{err}");
    } else {
        warn!("{err}");
    }

    let mut headers = HeaderMap::new();
    if let GateError::RateLimited {
        retry_after_seconds,
        ..
    } = err
    {
        retry_after(&mut headers, *retry_after_seconds);
    }
    (status, headers, Json(ErrorBody::new(err.public_message()))).into_response()
}

/// Rate limiter identity for a request bound to browser session `sid`.
pub(crate) fn client_identity(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted: &TrustedProxies,
    sid: &str,
) -> ClientIdentity {
    let accept_language = headers
        .get(ACCEPT_LANGUAGE)
        .and_then(|value| value.to_str().ok());
    ClientIdentity::new(
        client::client_ip(headers, peer, trusted),
        Some(sid.to_string()),
        fingerprint(client::user_agent(headers), accept_language),
    )
}

pub(crate) fn internal_error(detail: &dyn std::fmt::Display) -> Response {
    error!("internal error: {detail}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody::new("Internal server error")),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{BlockReason, ScopeKind};
    use anyhow::Result;
    use axum::body::to_bytes;

    #[test]
    fn statuses() {
        let missing = GateError::InvalidCredential {
            failure: CredentialFailure::MissingPin,
            block: None,
            reason: "PIN is required".to_string(),
        };
        let unknown = GateError::InvalidCredential {
            failure: CredentialFailure::UnknownPin,
            block: None,
            reason: "Invalid PIN. 4 attempts remaining".to_string(),
        };
        assert_eq!(status_for(&missing), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&unknown), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_for(&GateError::Protocol("x".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_for(&GateError::UpstreamUnavailable("x".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&GateError::Configuration("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn rate_limited_carries_retry_after() -> Result<()> {
        let err = GateError::RateLimited {
            scope: ScopeKind::Ip,
            reason: BlockReason::HardLockout,
            blocked_until: 1_700_000_300,
            retry_after_seconds: 300,
        };
        let response = gate_error_response(&err);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(RETRY_AFTER).and_then(|v| v.to_str().ok()),
            Some("300")
        );
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let body: serde_json::Value = serde_json::from_slice(&body)?;
        assert_eq!(
            body["error"],
            "Too many failed attempts. Please try again later."
        );
        Ok(())
    }
}
