//! Administration: PIN holders and the audit log, behind the admin password.

use crate::api::{
    AppState,
    handlers::{ErrorBody, client_identity, internal_error, retry_after},
};
use crate::gate::{AdminDenied, AuditStatus, User, UserStoreError};
use axum::{
    extract::{ConnectInfo, Extension, Path},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Debug)]
pub struct AdminLogin {
    password: String,
}

#[derive(ToSchema, Serialize, Debug, Default)]
pub struct AdminAuthResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attempts_remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_seconds: Option<i64>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct AdminCheck {
    authenticated: bool,
}

#[derive(ToSchema, Serialize, Debug, PartialEq, Eq)]
pub struct UserView {
    name: String,
    active: bool,
    created_at: i64,
    updated_at: i64,
    last_used_at: Option<i64>,
    times_used: u64,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            name: user.name,
            active: user.active,
            created_at: user.created_at,
            updated_at: user.updated_at,
            last_used_at: user.last_used_at,
            times_used: user.times_used,
        }
    }
}

#[derive(ToSchema, Serialize, Debug)]
pub struct UserList {
    users: Vec<UserView>,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct CreateUser {
    username: String,
    pin: String,
    #[serde(default = "default_active")]
    active: bool,
}

const fn default_active() -> bool {
    true
}

#[derive(ToSchema, Deserialize, Debug, Default)]
pub struct UpdateUser {
    #[serde(default)]
    pin: Option<String>,
    #[serde(default)]
    active: Option<bool>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct LogEntry {
    timestamp: i64,
    ip: String,
    /// `null` when nobody was identified.
    user: Option<String>,
    #[schema(value_type = String)]
    status: AuditStatus,
    details: String,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct LogList {
    logs: Vec<LogEntry>,
}

fn admin_disabled() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody::new("Administration is not enabled")),
    )
        .into_response()
}

/// `Err` carries the response for a request without a valid admin cookie.
fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    if state.admin.is_none() {
        return Err(admin_disabled());
    }
    let now = state.engine.clock().now_unix();
    if state.cookies.is_admin(headers, now) {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody::new("Admin authentication required")),
        )
            .into_response())
    }
}

fn user_error(err: &UserStoreError) -> Response {
    let status = match err {
        UserStoreError::InvalidUsername | UserStoreError::InvalidPin => StatusCode::BAD_REQUEST,
        UserStoreError::AlreadyExists => StatusCode::CONFLICT,
        UserStoreError::NotFound => StatusCode::NOT_FOUND,
    };
    (status, Json(ErrorBody::new(err.to_string()))).into_response()
}

#[utoipa::path(
    post,
    path= "/admin/auth",
    request_body = AdminLogin,
    responses (
        (status = 200, description = "Signed in as admin", body = AdminAuthResponse),
        (status = 403, description = "Invalid admin password", body = AdminAuthResponse),
        (status = 404, description = "Administration is not enabled", body = ErrorBody),
        (status = 429, description = "Blocked after too many failed attempts", body = AdminAuthResponse),
    ),
    tag = "admin",
)]
/// Failed passwords are rate limited per IP, session and globally, like PINs.
#[instrument(skip_all)]
pub async fn auth(
    state: Extension<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(login): Json<AdminLogin>,
) -> Response {
    let Some(admin) = state.admin.as_ref() else {
        return admin_disabled();
    };
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

    match admin.authenticate(&identity, &login.password, now) {
        Ok(()) => match state.cookies.admin_set_cookie(now) {
            Ok(cookie) => {
                response_headers.append(SET_COOKIE, cookie);
                let body = AdminAuthResponse {
                    status: "success".to_string(),
                    ..AdminAuthResponse::default()
                };
                (StatusCode::OK, response_headers, Json(body)).into_response()
            }
            Err(err) => internal_error(&err),
        },
        Err(AdminDenied::WrongPassword { attempts_remaining }) => {
            let body = AdminAuthResponse {
                status: "error".to_string(),
                message: Some("Invalid admin password".to_string()),
                attempts_remaining: Some(attempts_remaining),
                ..AdminAuthResponse::default()
            };
            (StatusCode::FORBIDDEN, response_headers, Json(body)).into_response()
        }
        Err(AdminDenied::Blocked(verdict)) => {
            let retry = verdict.retry_after_seconds(now);
            warn!(ip = %identity.ip, scope = %verdict.scope, "admin sign-in blocked");
            retry_after(&mut response_headers, retry);
            let body = AdminAuthResponse {
                status: "error".to_string(),
                message: Some("Too many failed attempts. Please try again later.".to_string()),
                retry_after_seconds: Some(retry),
                ..AdminAuthResponse::default()
            };
            (StatusCode::TOO_MANY_REQUESTS, response_headers, Json(body)).into_response()
        }
    }
}

#[utoipa::path(
    get,
    path= "/admin/check-auth",
    responses (
        (status = 200, description = "Whether the browser holds an admin sign-in", body = AdminCheck),
        (status = 404, description = "Administration is not enabled", body = ErrorBody),
    ),
    tag = "admin",
)]
pub async fn check_auth(state: Extension<Arc<AppState>>, headers: HeaderMap) -> Response {
    if state.admin.is_none() {
        return admin_disabled();
    }
    let now = state.engine.clock().now_unix();
    Json(AdminCheck {
        authenticated: state.cookies.is_admin(&headers, now),
    })
    .into_response()
}

#[utoipa::path(
    post,
    path= "/admin/logout",
    responses (
        (status = 200, description = "Admin sign-in cleared", body = AdminAuthResponse),
    ),
    tag = "admin",
)]
pub async fn logout(state: Extension<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    match state.cookies.clear_admin_cookie() {
        Ok(cookie) => {
            headers.append(SET_COOKIE, cookie);
        }
        Err(err) => return internal_error(&err),
    }
    let body = AdminAuthResponse {
        status: "success".to_string(),
        ..AdminAuthResponse::default()
    };
    (headers, Json(body)).into_response()
}

#[utoipa::path(
    get,
    path= "/admin/users",
    responses (
        (status = 200, description = "PIN holders, without their PINs", body = UserList),
        (status = 401, description = "Admin authentication required", body = ErrorBody),
    ),
    tag = "admin",
)]
pub async fn list_users(state: Extension<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(response) = require_admin(&state, &headers) {
        return response;
    }
    let users = state
        .engine
        .users()
        .list()
        .into_iter()
        .map(UserView::from)
        .collect();
    Json(UserList { users }).into_response()
}

#[utoipa::path(
    post,
    path= "/admin/users",
    request_body = CreateUser,
    responses (
        (status = 201, description = "User created", body = UserView),
        (status = 400, description = "Invalid username or PIN", body = ErrorBody),
        (status = 401, description = "Admin authentication required", body = ErrorBody),
        (status = 409, description = "User already exists", body = ErrorBody),
    ),
    tag = "admin",
)]
#[instrument(skip_all)]
pub async fn create_user(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateUser>,
) -> Response {
    if let Err(response) = require_admin(&state, &headers) {
        return response;
    }
    let now = state.engine.clock().now_unix();
    let users = state.engine.users();
    let name = request.username.trim();
    if let Err(err) = users.create(name, request.pin.trim(), request.active, now) {
        return user_error(&err);
    }
    info!(user = name, "user created");
    match users.get(name) {
        Some(user) => (StatusCode::CREATED, Json(UserView::from(user))).into_response(),
        None => user_error(&UserStoreError::NotFound),
    }
}

#[utoipa::path(
    put,
    path= "/admin/users/{name}",
    params(("name" = String, Path, description = "User name")),
    request_body = UpdateUser,
    responses (
        (status = 200, description = "User updated", body = UserView),
        (status = 400, description = "Invalid PIN", body = ErrorBody),
        (status = 401, description = "Admin authentication required", body = ErrorBody),
        (status = 404, description = "User not found", body = ErrorBody),
    ),
    tag = "admin",
)]
#[instrument(skip_all)]
pub async fn update_user(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(request): Json<UpdateUser>,
) -> Response {
    if let Err(response) = require_admin(&state, &headers) {
        return response;
    }
    let now = state.engine.clock().now_unix();
    let users = state.engine.users();
    let pin = request.pin.as_deref().map(str::trim);
    if let Err(err) = users.update(&name, pin, request.active, now) {
        return user_error(&err);
    }
    info!(user = %name, pin_changed = pin.is_some(), active = ?request.active, "user updated");
    match users.get(&name) {
        Some(user) => Json(UserView::from(user)).into_response(),
        None => user_error(&UserStoreError::NotFound),
    }
}

#[utoipa::path(
    delete,
    path= "/admin/users/{name}",
    params(("name" = String, Path, description = "User name")),
    responses (
        (status = 204, description = "User deleted"),
        (status = 401, description = "Admin authentication required", body = ErrorBody),
        (status = 404, description = "User not found", body = ErrorBody),
    ),
    tag = "admin",
)]
#[instrument(skip_all)]
pub async fn delete_user(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Response {
    if let Err(response) = require_admin(&state, &headers) {
        return response;
    }
    match state.engine.users().delete(&name) {
        Ok(()) => {
            info!(user = %name, "user deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => user_error(&err),
    }
}

#[utoipa::path(
    get,
    path= "/admin/logs",
    responses (
        (status = 200, description = "Audit events, oldest first; empty without an audit file", body = LogList),
        (status = 401, description = "Admin authentication required", body = ErrorBody),
        (status = 500, description = "Audit file unreadable", body = LogList),
    ),
    tag = "admin",
)]
pub async fn logs(state: Extension<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(response) = require_admin(&state, &headers) {
        return response;
    }
    let Some(audit_log) = state.audit_log.as_ref() else {
        return Json(LogList { logs: Vec::new() }).into_response();
    };
    match audit_log.read_events().await {
        Ok(events) => {
            let logs = events
                .into_iter()
                .map(|event| LogEntry {
                    user: event.known_user().map(ToString::to_string),
                    timestamp: event.timestamp,
                    ip: event.ip,
                    status: event.status,
                    details: event.details,
                })
                .collect();
            Json(LogList { logs }).into_response()
        }
        Err(err) => {
            error!("failed to read audit log: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(LogList { logs: Vec::new() }),
            )
                .into_response()
        }
    }
}
