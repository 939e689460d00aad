//! Browser endpoints of the OIDC login flow.

use crate::api::{
    AppState,
    cookies::SessionCookie,
    handlers::{ErrorBody, gate_error_response, internal_error},
};
use crate::gate::GateError;
use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Json, Redirect, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::IntoParams;

#[derive(Deserialize, Debug, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

fn sso_disabled() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody::new("SSO is not enabled")),
    )
        .into_response()
}

#[utoipa::path(
    get,
    path= "/login",
    responses (
        (status = 303, description = "Redirect to the identity provider"),
        (status = 404, description = "SSO is not enabled", body = ErrorBody),
        (status = 502, description = "Identity provider unavailable", body = ErrorBody),
    ),
    tag = "oidc",
)]
#[instrument(skip_all)]
pub async fn login(state: Extension<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(provider) = state.oidc.as_ref() else {
        return sso_disabled();
    };
    let oidc = match provider.engine().await {
        Ok(oidc) => oidc,
        Err(err) => return gate_error_response(&err),
    };
    let now = state.engine.clock().now_unix();
    let (session, fresh) = match state.cookies.session_or_new(&headers, now) {
        Ok(session) => session,
        Err(err) => return internal_error(&err),
    };

    let url = match oidc.begin_login(&session.sid).await {
        Ok(url) => url,
        Err(err) => return gate_error_response(&err),
    };

    let mut response_headers = HeaderMap::new();
    if fresh {
        match state.cookies.session_set_cookie(&session) {
            Ok(cookie) => {
                response_headers.append(SET_COOKIE, cookie);
            }
            Err(err) => return internal_error(&err),
        }
    }
    (response_headers, Redirect::to(url.as_str())).into_response()
}

#[utoipa::path(
    get,
    path= "/callback",
    params(CallbackParams),
    responses (
        (status = 303, description = "Signed in, redirect to the front page"),
        (status = 401, description = "Login could not be completed", body = ErrorBody),
        (status = 404, description = "SSO is not enabled", body = ErrorBody),
        (status = 502, description = "Identity provider unavailable", body = ErrorBody),
    ),
    tag = "oidc",
)]
#[instrument(skip_all)]
pub async fn callback(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Response {
    let Some(provider) = state.oidc.as_ref() else {
        return sso_disabled();
    };
    let oidc = match provider.engine().await {
        Ok(oidc) => oidc,
        Err(err) => return gate_error_response(&err),
    };
    let now = state.engine.clock().now_unix();
    let Some(session) = state.cookies.read_session(&headers, now) else {
        return gate_error_response(&GateError::Protocol(
            "callback without a session cookie".to_string(),
        ));
    };

    let (code, callback_state) = match (params.error, params.code, params.state) {
        (Some(error), _, _) => {
            oidc.cancel_login(&session.sid).await;
            let description = params.error_description.unwrap_or_default();
            return gate_error_response(&GateError::Protocol(format!(
                "provider returned {error}: {description}"
            )));
        }
        (None, Some(code), Some(callback_state)) => (code, callback_state),
        _ => {
            oidc.cancel_login(&session.sid).await;
            return gate_error_response(&GateError::Protocol(
                "callback without code or state".to_string(),
            ));
        }
    };

    let authenticated = match oidc
        .handle_callback(&session.sid, &callback_state, &code)
        .await
    {
        Ok(authenticated) => authenticated,
        Err(err) => return gate_error_response(&err),
    };

    let rotated = SessionCookie {
        sid: authenticated.session_id,
        iat: now,
    };
    let cookie = match state.cookies.session_set_cookie(&rotated) {
        Ok(cookie) => cookie,
        Err(err) => return internal_error(&err),
    };
    let mut response_headers = HeaderMap::new();
    response_headers.append(SET_COOKIE, cookie);
    (response_headers, Redirect::to("/")).into_response()
}

#[utoipa::path(
    get,
    path= "/logout",
    responses (
        (status = 303, description = "Redirect to the identity provider's logout"),
        (status = 500, description = "Identity provider publishes no logout endpoint", body = ErrorBody),
        (status = 502, description = "Identity provider unavailable, signed out locally", body = ErrorBody),
    ),
    tag = "oidc",
)]
/// Forget the local session, then end the provider session.
#[instrument(skip_all)]
pub async fn logout(state: Extension<Arc<AppState>>, headers: HeaderMap) -> Response {
    let now = state.engine.clock().now_unix();
    let session = state.cookies.read_session(&headers, now);

    let mut response_headers = HeaderMap::new();
    match state.cookies.clear_session_cookie() {
        Ok(cookie) => {
            response_headers.append(SET_COOKIE, cookie);
        }
        Err(err) => warn!("failed to build session cookie: {err}"),
    }

    let oidc = match state.oidc.as_ref() {
        Some(provider) => provider.engine().await,
        None => {
            if let Some(session) = &session {
                state.sessions.invalidate(&session.sid);
            }
            return (response_headers, Redirect::to("/")).into_response();
        }
    };

    let result = oidc.and_then(|oidc| match &session {
        Some(session) => oidc.logout(&session.sid),
        None => oidc.logout_url(),
    });
    if result.is_err()
        && let Some(session) = &session
    {
        state.sessions.invalidate(&session.sid);
    }
    match result {
        Ok(url) => {
            info!("signed out");
            (response_headers, Redirect::to(url.as_str())).into_response()
        }
        Err(err) => {
            let mut response = gate_error_response(&err);
            response.headers_mut().extend(response_headers);
            response
        }
    }
}
