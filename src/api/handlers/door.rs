use crate::api::{
    AppState, client,
    cookies::{BLOCK_COOKIE_NAME, cookie_value},
    handlers::{client_identity, internal_error, retry_after},
};
use crate::gate::{AccessOutcome, AccessRequest, AuthMethod, CredentialFailure, display_name};
use axum::{
    body::Bytes,
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Debug, Default)]
pub struct OpenDoorRequest {
    #[serde(default)]
    pin: Option<String>,
}

#[derive(ToSchema, Serialize, Debug, Default)]
pub struct OpenDoorResponse {
    allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    blocked_until: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_seconds: Option<i64>,
}

impl OpenDoorResponse {
    fn denied(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

#[utoipa::path(
    post,
    path= "/open-door",
    request_body = OpenDoorRequest,
    responses (
        (status = 200, description = "Door open command sent", body = OpenDoorResponse),
        (status = 400, description = "PIN missing", body = OpenDoorResponse),
        (status = 401, description = "Invalid PIN", body = OpenDoorResponse),
        (status = 403, description = "Request screened out", body = OpenDoorResponse),
        (status = 429, description = "Blocked after too many failed attempts", body = OpenDoorResponse),
        (status = 502, description = "Actuator unavailable", body = OpenDoorResponse),
    ),
    tag = "door",
)]
/// Decide and, when allowed, trigger the actuator.
///
/// The body is optional: an SSO session eligible for pinless opening needs no PIN.
#[instrument(skip_all)]
pub async fn open_door(
    state: Extension<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let now = state.engine.clock().now_unix();
    let (session, fresh) = match state.cookies.session_or_new(&headers, now) {
        Ok(session) => session,
        Err(err) => return internal_error(&err),
    };
    let identity = client_identity(
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
        &state.trusted_proxies,
        &session.sid,
    );

    let mut response_headers = HeaderMap::new();
    if fresh {
        match state.cookies.session_set_cookie(&session) {
            Ok(cookie) => {
                response_headers.append(SET_COOKIE, cookie);
            }
            Err(err) => return internal_error(&err),
        }
    }

    if let Err(details) = client::screen(client::user_agent(&headers)) {
        warn!(ip = %identity.ip, "request screened out: {details}");
        state.engine.record_suspicious(&identity, &details);
        return (
            StatusCode::FORBIDDEN,
            response_headers,
            Json(OpenDoorResponse::denied("Access denied")),
        )
            .into_response();
    }

    // A missing or unparsable body is treated as "no PIN".
    let request: OpenDoorRequest = serde_json::from_slice(&body).unwrap_or_default();
    let authenticated = state.sessions.get(&session.sid, now);
    let decision = state.engine.evaluate(&AccessRequest {
        identity: identity.clone(),
        pin: request.pin.as_deref(),
        session: authenticated,
        block_token: cookie_value(&headers, BLOCK_COOKIE_NAME),
    });

    if let Some(token) = &decision.block_token {
        let max_age = state
            .engine
            .block_state()
            .ledger()
            .config()
            .block_time_seconds();
        match state.cookies.block_set_cookie(token, max_age) {
            Ok(cookie) => {
                response_headers.append(SET_COOKIE, cookie);
            }
            Err(err) => warn!("failed to set block cookie: {err}"),
        }
    }

    match decision.outcome {
        AccessOutcome::Allow { user, method } => {
            if let Err(err) = state.actuator.trigger().await {
                error!(user = %user, "actuator failed: {err}");
                state
                    .engine
                    .record_actuator_failure(&identity, &user, &err.to_string());
                return (
                    StatusCode::BAD_GATEWAY,
                    response_headers,
                    Json(OpenDoorResponse::denied(
                        "Door controller unavailable. Please try again later.",
                    )),
                )
                    .into_response();
            }
            info!(user = %user, method = ?method, "door opened");
            let body = OpenDoorResponse {
                allowed: true,
                message: Some(welcome_message(
                    &user,
                    method,
                    state.actuator.is_simulated(),
                )),
                user: Some(user),
                ..OpenDoorResponse::default()
            };
            (StatusCode::OK, response_headers, Json(body)).into_response()
        }
        AccessOutcome::DenyBlocked {
            blocked_until,
            retry_after_seconds,
            ..
        } => {
            debug!(blocked_until, "request blocked");
            retry_after(&mut response_headers, retry_after_seconds);
            let body = OpenDoorResponse {
                blocked_until: Some(blocked_until),
                retry_after_seconds: Some(retry_after_seconds),
                ..OpenDoorResponse::denied(decision.reason)
            };
            (StatusCode::TOO_MANY_REQUESTS, response_headers, Json(body)).into_response()
        }
        AccessOutcome::DenyInvalidCredential { failure, block } => {
            let status = if failure == CredentialFailure::MissingPin {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::UNAUTHORIZED
            };
            debug!(%failure, "invalid credential");
            let mut body = OpenDoorResponse::denied(decision.reason);
            if let Some(block) = block {
                let retry = block.blocked_until.saturating_sub(now).max(0);
                retry_after(&mut response_headers, retry);
                body.blocked_until = Some(block.blocked_until);
                body.retry_after_seconds = Some(retry);
            }
            (status, response_headers, Json(body)).into_response()
        }
    }
}

fn welcome_message(user: &str, method: AuthMethod, simulated: bool) -> String {
    let name = match method {
        AuthMethod::Pin => display_name(user),
        AuthMethod::Sso => user.to_string(),
    };
    let marker = if simulated { " (TEST MODE)" } else { "" };
    format!("Door open command sent{marker}.\nWelcome home, {name}!")
}
