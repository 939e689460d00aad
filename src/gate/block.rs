//! Block state across all scopes, including the client-held session block token.

use super::capsule::CapsuleSealer;
use super::ledger::{AttemptLedger, AttemptRecord, BlockReason, BlockRecord};
use super::scope::{ClientIdentity, Scope, ScopeKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

const BLOCK_TOKEN_PURPOSE: &str = "doorgate.block";

/// Session-scope lockout sealed into a cookie so any worker can enforce it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedBlockToken {
    pub sid: String,
    pub blocked_until: i64,
    pub issued_at: i64,
}

/// The answer to "may this client attempt now?"
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockVerdict {
    /// First blocking scope in IP, session, global order.
    pub scope: ScopeKind,
    pub reason: BlockReason,
    /// Furthest-future end across all blocking scopes.
    pub blocked_until: i64,
}

impl BlockVerdict {
    #[must_use]
    pub fn retry_after_seconds(&self, now: i64) -> i64 {
        (self.blocked_until - now).max(0)
    }
}

/// One admitted attempt, already counted as a failure on every scope.
#[derive(Debug)]
#[must_use]
pub struct Reservation {
    at: i64,
    records: Vec<(Scope, AttemptRecord)>,
}

impl Reservation {
    /// Failure count of `kind` including this attempt.
    #[must_use]
    pub fn failure_count(&self, kind: ScopeKind) -> Option<u32> {
        self.records
            .iter()
            .find(|(scope, _)| scope.kind() == kind)
            .map(|(_, record)| record.failure_count)
    }
}

#[derive(Debug)]
pub struct BlockState {
    ledger: Arc<AttemptLedger>,
    sealer: Arc<CapsuleSealer>,
}

impl BlockState {
    #[must_use]
    pub fn new(ledger: Arc<AttemptLedger>, sealer: Arc<CapsuleSealer>) -> Self {
        Self { ledger, sealer }
    }

    #[must_use]
    pub fn ledger(&self) -> &AttemptLedger {
        &self.ledger
    }

    /// Combine ledger blocks with the persisted token.
    ///
    /// A token that fails to verify asserts nothing; it can add a session block
    /// but never removes one the ledger holds.
    #[must_use]
    pub fn check(
        &self,
        identity: &ClientIdentity,
        block_token: Option<&str>,
        now: i64,
    ) -> Option<BlockVerdict> {
        let persisted = block_token.and_then(|token| self.verify_token(identity, token, now));

        let mut verdict: Option<BlockVerdict> = None;
        for scope in identity.scopes() {
            let mut block = self.ledger.block_record(&scope, now);
            if scope.kind() == ScopeKind::Session
                && let Some(until) = persisted
            {
                block = Some(match block {
                    Some(b) if b.blocked_until >= until => b,
                    _ => BlockRecord {
                        scope: ScopeKind::Session,
                        blocked_until: until,
                        reason: BlockReason::HardLockout,
                    },
                });
            }
            if let Some(block) = block {
                verdict = Some(match verdict {
                    None => BlockVerdict {
                        scope: block.scope,
                        reason: block.reason,
                        blocked_until: block.blocked_until,
                    },
                    Some(first) => BlockVerdict {
                        blocked_until: first.blocked_until.max(block.blocked_until),
                        ..first
                    },
                });
            }
        }
        verdict
    }

    /// Admit an attempt on every scope of `identity`, or on none.
    ///
    /// # Errors
    /// Returns the verdict when any scope refuses; reservations already taken on
    /// earlier scopes are refunded.
    pub fn reserve(&self, identity: &ClientIdentity, now: i64) -> Result<Reservation, BlockVerdict> {
        let mut records = Vec::with_capacity(3);
        for scope in identity.scopes() {
            match self.ledger.try_reserve(&scope, now) {
                Ok(record) => records.push((scope, record)),
                Err(block) => {
                    for (taken, _) in &records {
                        self.ledger.refund(taken, now);
                    }
                    debug!(scope = %scope, "attempt refused by a concurrent failure");
                    return Err(self.check(identity, None, now).unwrap_or(BlockVerdict {
                        scope: block.scope,
                        reason: block.reason,
                        blocked_until: block.blocked_until,
                    }));
                }
            }
        }
        Ok(Reservation { at: now, records })
    }

    /// The attempt was good: reset the IP and session scopes and give back the
    /// global reservation. The global count only ever tracks failures.
    pub fn settle_success(&self, reservation: Reservation) {
        for (scope, _) in &reservation.records {
            if scope.kind() == ScopeKind::Global {
                self.ledger.refund(scope, reservation.at);
            } else {
                self.ledger.record_success(scope);
            }
        }
    }

    /// Seal a token for a session-scope hard lockout.
    #[must_use]
    pub fn issue_token(&self, sid: &str, blocked_until: i64, now: i64) -> Option<String> {
        let token = PersistedBlockToken {
            sid: sid.to_string(),
            blocked_until,
            issued_at: now,
        };
        match self.sealer.seal(BLOCK_TOKEN_PURPOSE, &token, blocked_until) {
            Ok(sealed) => Some(sealed),
            Err(err) => {
                debug!("failed to seal block token: {err}");
                None
            }
        }
    }

    /// `blocked_until` asserted by a valid token bound to this session.
    fn verify_token(&self, identity: &ClientIdentity, token: &str, now: i64) -> Option<i64> {
        let sid = identity.session_id.as_deref()?;
        let persisted: PersistedBlockToken = match self.sealer.open(BLOCK_TOKEN_PURPOSE, token, now)
        {
            Ok(persisted) => persisted,
            Err(err) => {
                debug!("ignoring block token: {err}");
                return None;
            }
        };
        if persisted.sid != sid {
            debug!("ignoring block token bound to another session");
            return None;
        }
        (persisted.blocked_until > now).then_some(persisted.blocked_until)
    }
}
