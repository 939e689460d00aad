//! Rate limiting scopes and the client identity they are derived from.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex characters kept from the SHA-256 of the browser headers.
const FINGERPRINT_LEN: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Ip,
    Session,
    Global,
}

impl ScopeKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Session => "session",
            Self::Global => "global",
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bucket that failures are counted against.
///
/// The fingerprint is carried for audit purposes only; it is not part of the
/// ledger key, so a client cannot escape a lockout by changing its user-agent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Scope {
    Ip { addr: String, fingerprint: String },
    Session { id: String, fingerprint: String },
    Global,
}

impl Scope {
    #[must_use]
    pub const fn kind(&self) -> ScopeKind {
        match self {
            Self::Ip { .. } => ScopeKind::Ip,
            Self::Session { .. } => ScopeKind::Session,
            Self::Global => ScopeKind::Global,
        }
    }

    /// Ledger key for this scope.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Ip { addr, .. } => format!("ip:{addr}"),
            Self::Session { id, .. } => format!("session:{id}"),
            Self::Global => "global".to_string(),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Session { id, .. } => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip { addr, fingerprint } => write!(f, "ip:{addr}#{fingerprint}"),
            // Session ids are bearer material; only a prefix goes to logs.
            Self::Session { id, fingerprint } => {
                let prefix: String = id.chars().take(8).collect();
                write!(f, "session:{prefix}…#{fingerprint}")
            }
            Self::Global => f.write_str("global"),
        }
    }
}

/// Who is asking, as far as the rate limiter can tell.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientIdentity {
    pub ip: String,
    pub session_id: Option<String>,
    pub fingerprint: String,
}

impl ClientIdentity {
    #[must_use]
    pub fn new(ip: impl Into<String>, session_id: Option<String>, fingerprint: String) -> Self {
        Self {
            ip: ip.into(),
            session_id,
            fingerprint,
        }
    }

    /// Scopes in evaluation order: IP, session (when there is one), global.
    #[must_use]
    pub fn scopes(&self) -> Vec<Scope> {
        let mut scopes = Vec::with_capacity(3);
        scopes.push(Scope::Ip {
            addr: self.ip.clone(),
            fingerprint: self.fingerprint.clone(),
        });
        if let Some(id) = &self.session_id {
            scopes.push(Scope::Session {
                id: id.clone(),
                fingerprint: self.fingerprint.clone(),
            });
        }
        scopes.push(Scope::Global);
        scopes
    }
}

/// Advisory browser fingerprint from the user-agent and accept-language headers.
#[must_use]
pub fn fingerprint(user_agent: Option<&str>, accept_language: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_agent.unwrap_or_default().as_bytes());
    hasher.update(b"\n");
    hasher.update(accept_language.unwrap_or_default().as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(FINGERPRINT_LEN);
    for byte in digest.iter().take(FINGERPRINT_LEN / 2) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_are_ordered_ip_session_global() {
        let identity = ClientIdentity::new("10.0.0.1", Some("sid-1".to_string()), "fp".into());
        let kinds: Vec<ScopeKind> = identity.scopes().iter().map(Scope::kind).collect();
        assert_eq!(
            kinds,
            vec![ScopeKind::Ip, ScopeKind::Session, ScopeKind::Global]
        );
    }

    #[test]
    fn session_scope_is_skipped_without_session() {
        let identity = ClientIdentity::new("10.0.0.1", None, "fp".into());
        let keys: Vec<String> = identity.scopes().iter().map(Scope::key).collect();
        assert_eq!(keys, vec!["ip:10.0.0.1".to_string(), "global".to_string()]);
    }

    #[test]
    fn fingerprint_does_not_change_the_key() {
        let a = Scope::Ip {
            addr: "10.0.0.1".into(),
            fingerprint: fingerprint(Some("Mozilla/5.0"), None),
        };
        let b = Scope::Ip {
            addr: "10.0.0.1".into(),
            fingerprint: fingerprint(Some("Other/1.0"), Some("de")),
        };
        assert_eq!(a.key(), b.key());
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_is_truncated_hex() {
        let fp = fingerprint(Some("Mozilla/5.0"), Some("en-US"));
        assert_eq!(fp.len(), FINGERPRINT_LEN);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp, fingerprint(Some("Mozilla/5.0"), Some("en-US")));
    }

    #[test]
    fn session_display_hides_full_id() {
        let scope = Scope::Session {
            id: "abcdefghijklmnop".into(),
            fingerprint: "fp".into(),
        };
        let shown = scope.to_string();
        assert!(shown.starts_with("session:abcdefgh"));
        assert!(!shown.contains("ijklmnop"));
    }
}
