use super::decision::CredentialFailure;
use super::ledger::{BlockReason, BlockRecord};
use super::scope::ScopeKind;
use thiserror::Error;

/// Everything that can stop a door-open or a login.
///
/// `InvalidCredential` and `RateLimited` carry what a client needs to render a
/// countdown. `Protocol`, `UpstreamUnavailable` and `Configuration` carry detail
/// for logs only; clients get a generic message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("invalid credential: {failure}")]
    InvalidCredential {
        failure: CredentialFailure,
        block: Option<BlockRecord>,
        reason: String,
    },
    #[error("rate limited by {scope} scope until {blocked_until}")]
    RateLimited {
        scope: ScopeKind,
        reason: BlockReason,
        blocked_until: i64,
        retry_after_seconds: i64,
    },
    #[error("oidc protocol error: {0}")]
    Protocol(String),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl GateError {
    /// Message safe to show to a client.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidCredential { reason, .. } => reason.clone(),
            Self::RateLimited { .. } => {
                "Too many failed attempts. Please try again later.".to_string()
            }
            Self::Protocol(_) => "Sign-in failed. Please try again.".to_string(),
            Self::UpstreamUnavailable(_) => {
                "The identity provider is unavailable. Please try again later.".to_string()
            }
            Self::Configuration(_) => "Sign-in is not available.".to_string(),
        }
    }
}
