//! # Doorgate (Door Opener Access Gate)
//!
//! `doorgate` guards a single privileged action, triggering a door actuator,
//! behind two independent proofs of identity: a shared-secret PIN or a federated
//! SSO session obtained through the OpenID Connect authorization code flow with
//! PKCE.
//!
//! ## Access Decision Core
//!
//! - **Attempt ledger:** failures are tracked per scope (client IP, browser
//!   session, and a global bucket) in trailing windows. Below the scope threshold
//!   each failure adds a progressive delay (`1s, 2s, 4s, 8s, 16s`); at the
//!   threshold the scope is hard-locked for `block_time_minutes`.
//! - **Block persistence:** a session-scope lockout is also sealed into a signed,
//!   expiring cookie so that any worker honours it. IP and global lockouts are
//!   process-local.
//! - **OIDC:** login is an explicit state machine. The pending record (`state`,
//!   `nonce`, `code_verifier`) is single use, and a successful login always
//!   issues a new session id.
//! - **Decision engine:** blocks are checked first, so a correct credential never
//!   bypasses an active lockout. Every outcome is audited.

pub mod api;
pub mod cli;
pub mod gate;
pub mod oidc;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
