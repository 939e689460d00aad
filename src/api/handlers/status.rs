use crate::api::AppState;
use axum::{
    extract::Extension,
    http::HeaderMap,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
pub struct AuthStatus {
    pub oidc_enabled: bool,
    pub oidc_authenticated: bool,
    pub user: Option<String>,
    pub groups: Vec<String>,
    /// The current session may open without a PIN.
    pub pinless_open: bool,
    pub require_pin: bool,
}

#[utoipa::path(
    get,
    path= "/auth/status",
    responses (
        (status = 200, description = "Sign-in state of the calling browser", body = AuthStatus)
    ),
    tag = "oidc",
)]
pub async fn auth_status(state: Extension<Arc<AppState>>, headers: HeaderMap) -> impl IntoResponse {
    let now = state.engine.clock().now_unix();
    let mut status = AuthStatus {
        oidc_enabled: state.oidc.is_some(),
        require_pin: state
            .oidc
            .as_ref()
            .is_none_or(|provider| provider.config().require_pin()),
        ..AuthStatus::default()
    };

    let authenticated = state
        .cookies
        .read_session(&headers, now)
        .and_then(|session| state.sessions.get(&session.sid, now));
    if let Some(session) = authenticated {
        status.oidc_authenticated = true;
        status.pinless_open = state.engine.pinless_eligible(&session);
        status.user = Some(session.display_name);
        status.groups = session.groups;
    }

    Json(status)
}
