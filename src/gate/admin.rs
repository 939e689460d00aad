//! Password check for the administration endpoints.
//!
//! Failed passwords are counted in a ledger of their own, so guessing the
//! admin password neither consumes nor is excused by the door's budget.

use super::block::{BlockState, BlockVerdict};
use super::capsule::CapsuleSealer;
use super::config::GateConfig;
use super::ledger::AttemptLedger;
use super::scope::{ClientIdentity, ScopeKind};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdminDenied {
    /// Too many failures; nothing was compared.
    Blocked(BlockVerdict),
    WrongPassword { attempts_remaining: u32 },
}

#[derive(Debug)]
pub struct AdminGate {
    password: SecretString,
    sealer: Arc<CapsuleSealer>,
    blocks: BlockState,
}

impl AdminGate {
    #[must_use]
    pub fn new(password: SecretString, config: GateConfig, sealer: Arc<CapsuleSealer>) -> Self {
        let ledger = Arc::new(AttemptLedger::new(config));
        Self {
            password,
            blocks: BlockState::new(ledger, Arc::clone(&sealer)),
            sealer,
        }
    }

    #[must_use]
    pub fn ledger(&self) -> &AttemptLedger {
        self.blocks.ledger()
    }

    /// Check `password` for `identity`.
    ///
    /// # Errors
    /// `Blocked` while a lockout or delay is running, `WrongPassword` otherwise.
    pub fn authenticate(
        &self,
        identity: &ClientIdentity,
        password: &str,
        now: i64,
    ) -> Result<(), AdminDenied> {
        let reservation = self
            .blocks
            .reserve(identity, now)
            .map_err(AdminDenied::Blocked)?;

        if self
            .sealer
            .secrets_match(self.password.expose_secret(), password.trim())
        {
            self.blocks.settle_success(reservation);
            info!(ip = %identity.ip, "admin signed in");
            return Ok(());
        }

        let threshold = self.ledger().config().threshold(ScopeKind::Ip);
        let failures = reservation.failure_count(ScopeKind::Ip).unwrap_or(threshold);
        warn!(ip = %identity.ip, failures, "invalid admin password");
        Err(AdminDenied::WrongPassword {
            attempts_remaining: threshold.saturating_sub(failures),
        })
    }
}
