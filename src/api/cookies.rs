//! `doorgate_session`, `doorgate_block` and `doorgate_admin` cookies.

use crate::gate::{CapsuleError, CapsuleSealer, generate_session_id};
use axum::http::{
    HeaderMap, HeaderValue,
    header::{COOKIE, InvalidHeaderValue},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub const SESSION_COOKIE_NAME: &str = "doorgate_session";
pub const BLOCK_COOKIE_NAME: &str = "doorgate_block";
pub const ADMIN_COOKIE_NAME: &str = "doorgate_admin";
const SESSION_PURPOSE: &str = "doorgate.session";
const ADMIN_PURPOSE: &str = "doorgate.admin";

/// Browser session id sealed into `doorgate_session`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionCookie {
    pub sid: String,
    pub iat: i64,
}

/// Marks a browser that passed the admin password.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
struct AdminCookie {
    iat: i64,
}

#[derive(Clone, Debug)]
pub struct CookieCodec {
    sealer: Arc<CapsuleSealer>,
    secure: bool,
    session_ttl_seconds: i64,
}

impl CookieCodec {
    /// Cookies are marked `Secure` when `public_base_url` is HTTPS.
    #[must_use]
    pub fn new(sealer: Arc<CapsuleSealer>, public_base_url: &str, session_ttl_seconds: i64) -> Self {
        Self {
            sealer,
            secure: public_base_url.starts_with("https://"),
            session_ttl_seconds,
        }
    }

    #[must_use]
    pub const fn secure(&self) -> bool {
        self.secure
    }

    /// The session carried by the request, if its capsule verifies.
    #[must_use]
    pub fn read_session(&self, headers: &HeaderMap, now: i64) -> Option<SessionCookie> {
        let value = cookie_value(headers, SESSION_COOKIE_NAME)?;
        match self.sealer.open::<SessionCookie>(SESSION_PURPOSE, value, now) {
            Ok(session) => Some(session),
            Err(err) => {
                debug!("ignoring session cookie: {err}");
                None
            }
        }
    }

    /// The request's session, or a fresh anonymous one that must be set on the response.
    ///
    /// # Errors
    /// Returns an error if a new session id cannot be generated.
    pub fn session_or_new(
        &self,
        headers: &HeaderMap,
        now: i64,
    ) -> Result<(SessionCookie, bool), CapsuleError> {
        if let Some(session) = self.read_session(headers, now) {
            return Ok((session, false));
        }
        let sid = generate_session_id().map_err(|_| CapsuleError::Rng)?;
        Ok((SessionCookie { sid, iat: now }, true))
    }

    /// `Set-Cookie` value for `session`.
    ///
    /// # Errors
    /// Returns an error if the capsule cannot be sealed or is not a valid header.
    pub fn session_set_cookie(&self, session: &SessionCookie) -> anyhow::Result<HeaderValue> {
        let expires_at = session.iat.saturating_add(self.session_ttl_seconds);
        let sealed = self.sealer.seal(SESSION_PURPOSE, session, expires_at)?;
        Ok(self.cookie(SESSION_COOKIE_NAME, &sealed, self.session_ttl_seconds)?)
    }

    /// # Errors
    /// Returns an error if the value is not a valid header.
    pub fn clear_session_cookie(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        self.cookie(SESSION_COOKIE_NAME, "", 0)
    }

    /// Does the request carry a valid admin capsule?
    #[must_use]
    pub fn is_admin(&self, headers: &HeaderMap, now: i64) -> bool {
        cookie_value(headers, ADMIN_COOKIE_NAME).is_some_and(|value| {
            self.sealer
                .open::<AdminCookie>(ADMIN_PURPOSE, value, now)
                .map_err(|err| debug!("ignoring admin cookie: {err}"))
                .is_ok()
        })
    }

    /// `Set-Cookie` value for an admin sign-in at `now`, valid for the session lifetime.
    ///
    /// # Errors
    /// Returns an error if the capsule cannot be sealed or is not a valid header.
    pub fn admin_set_cookie(&self, now: i64) -> anyhow::Result<HeaderValue> {
        let sealed = self.sealer.seal(
            ADMIN_PURPOSE,
            &AdminCookie { iat: now },
            now.saturating_add(self.session_ttl_seconds),
        )?;
        Ok(self.cookie(ADMIN_COOKIE_NAME, &sealed, self.session_ttl_seconds)?)
    }

    /// # Errors
    /// Returns an error if the value is not a valid header.
    pub fn clear_admin_cookie(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        self.cookie(ADMIN_COOKIE_NAME, "", 0)
    }

    /// `Set-Cookie` value persisting a sealed block token until it expires.
    ///
    /// # Errors
    /// Returns an error if the value is not a valid header.
    pub fn block_set_cookie(
        &self,
        token: &str,
        max_age_seconds: i64,
    ) -> Result<HeaderValue, InvalidHeaderValue> {
        self.cookie(BLOCK_COOKIE_NAME, token, max_age_seconds.max(1))
    }

    fn cookie(
        &self,
        name: &str,
        value: &str,
        max_age_seconds: i64,
    ) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie =
            format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_seconds}");
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }
}

/// Value of cookie `name` from the `Cookie` header.
#[must_use]
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                continue;
            };
            if key.trim() == name {
                return Some(val.trim());
            }
        }
    }
    None
}
