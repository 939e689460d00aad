//! The access decision engine.
//!
//! Order of evaluation is fixed: blocks first, then an eligible SSO session,
//! then the PIN. A correct credential never bypasses an active block.

use super::audit::{AuditEvent, AuditSink, AuditStatus, UNKNOWN_USER};
use super::block::{BlockState, BlockVerdict};
use super::clock::Clock;
use super::error::GateError;
use super::ledger::{BlockReason, BlockRecord};
use super::scope::{ClientIdentity, Scope, ScopeKind};
use super::session::AuthenticatedSession;
use super::users::{UserStore, valid_pin};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};


#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialFailure {
    MissingPin,
    MalformedPin,
    UnknownPin,
}

impl fmt::Display for CredentialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MissingPin => "missing pin",
            Self::MalformedPin => "malformed pin",
            Self::UnknownPin => "unknown pin",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Pin,
    Sso,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessOutcome {
    Allow {
        user: String,
        method: AuthMethod,
    },
    DenyInvalidCredential {
        failure: CredentialFailure,
        block: Option<BlockRecord>,
    },
    DenyBlocked {
        scope: ScopeKind,
        reason: BlockReason,
        blocked_until: i64,
        retry_after_seconds: i64,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    pub outcome: AccessOutcome,
    /// Sealed session block token the caller must persist in the client cookie.
    pub block_token: Option<String>,
    pub reason: String,
}

impl Decision {
    /// `Ok(user, method)` on allow, otherwise the matching [`GateError`].
    ///
    /// # Errors
    /// Returns `InvalidCredential` or `RateLimited` for the two deny outcomes.
    pub fn into_result(self) -> Result<(String, AuthMethod), GateError> {
        match self.outcome {
            AccessOutcome::Allow { user, method } => Ok((user, method)),
            AccessOutcome::DenyInvalidCredential { failure, block } => {
                Err(GateError::InvalidCredential {
                    failure,
                    block,
                    reason: self.reason,
                })
            }
            AccessOutcome::DenyBlocked {
                scope,
                reason,
                blocked_until,
                retry_after_seconds,
            } => Err(GateError::RateLimited {
                scope,
                reason,
                blocked_until,
                retry_after_seconds,
            }),
        }
    }
}

/// When an SSO session may open without a PIN.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PinlessPolicy {
    pub require_pin: bool,
    /// Empty means any authenticated subject.
    pub allowed_groups: Vec<String>,
}

impl PinlessPolicy {
    #[must_use]
    pub fn eligible(&self, session: &AuthenticatedSession, now: i64) -> bool {
        if self.require_pin || session.is_expired(now) {
            return false;
        }
        self.allowed_groups.is_empty()
            || session
                .groups
                .iter()
                .any(|group| self.allowed_groups.contains(group))
    }
}

#[derive(Clone, Debug, Default)]
pub struct AccessRequest<'a> {
    pub identity: ClientIdentity,
    pub pin: Option<&'a str>,
    /// Authenticated SSO session bound to the request, if any.
    pub session: Option<AuthenticatedSession>,
    /// Raw `doorgate_block` cookie value.
    pub block_token: Option<&'a str>,
}

pub struct AccessDecisionEngine {
    blocks: BlockState,
    users: Arc<dyn UserStore>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    /// `None` when SSO is disabled.
    pinless: Option<PinlessPolicy>,
}

impl AccessDecisionEngine {
    #[must_use]
    pub fn new(
        blocks: BlockState,
        users: Arc<dyn UserStore>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            blocks,
            users,
            audit,
            clock,
            pinless: None,
        }
    }

    #[must_use]
    pub fn with_pinless_policy(mut self, policy: Option<PinlessPolicy>) -> Self {
        self.pinless = policy;
        self
    }

    #[must_use]
    pub fn pinless_policy(&self) -> Option<&PinlessPolicy> {
        self.pinless.as_ref()
    }

    #[must_use]
    pub fn block_state(&self) -> &BlockState {
        &self.blocks
    }

    #[must_use]
    pub fn users(&self) -> &dyn UserStore {
        self.users.as_ref()
    }

    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Would this session open without a PIN right now?
    #[must_use]
    pub fn pinless_eligible(&self, session: &AuthenticatedSession) -> bool {
        self.pinless
            .as_ref()
            .is_some_and(|policy| policy.eligible(session, self.clock.now_unix()))
    }

    pub fn evaluate(&self, request: &AccessRequest<'_>) -> Decision {
        let now = self.clock.now_unix();
        let identity = &request.identity;

        if let Some(verdict) = self.blocks.check(identity, request.block_token, now) {
            return self.deny_blocked(identity, verdict, now);
        }

        if let Some(session) = &request.session
            && self.pinless_eligible(session)
        {
            let decision = Decision {
                outcome: AccessOutcome::Allow {
                    user: session.display_name.clone(),
                    method: AuthMethod::Sso,
                },
                block_token: None,
                reason: "SSO session".to_string(),
            };
            self.audit(identity, &session.subject, AuditStatus::Success, &decision, now);
            return decision;
        }

        let pin = request.pin.map(str::trim).filter(|pin| !pin.is_empty());
        let Some(pin) = pin else {
            // Not counted: an empty form is not a guess.
            let decision = Decision {
                outcome: AccessOutcome::DenyInvalidCredential {
                    failure: CredentialFailure::MissingPin,
                    block: None,
                },
                block_token: None,
                reason: "PIN is required".to_string(),
            };
            self.audit(identity, UNKNOWN_USER, AuditStatus::Failure, &decision, now);
            return decision;
        };

        // Counted before the lookup: a burst of parallel guesses is admitted one
        // reservation at a time, exactly as if the guesses had been sequential.
        let reservation = match self.blocks.reserve(identity, now) {
            Ok(reservation) => reservation,
            Err(verdict) => return self.deny_blocked(identity, verdict, now),
        };

        let matched = if valid_pin(pin) {
            self.users.find_by_pin(pin).ok_or(CredentialFailure::UnknownPin)
        } else {
            Err(CredentialFailure::MalformedPin)
        };

        match matched {
            Ok(user) => {
                self.blocks.settle_success(reservation);
                self.users.touch(&user, now);
                let decision = Decision {
                    outcome: AccessOutcome::Allow {
                        user: user.clone(),
                        method: AuthMethod::Pin,
                    },
                    block_token: None,
                    reason: "Door opened".to_string(),
                };
                self.audit(identity, &user, AuditStatus::Success, &decision, now);
                decision
            }
            Err(failure) => {
                let ip_failures = reservation.failure_count(ScopeKind::Ip).unwrap_or(0);
                self.deny_credential(identity, failure, ip_failures, now)
            }
        }
    }

    fn deny_blocked(&self, identity: &ClientIdentity, verdict: BlockVerdict, now: i64) -> Decision {
        let retry_after_seconds = verdict.retry_after_seconds(now);
        let reason = format!(
            "{} scope blocked for {retry_after_seconds} more seconds",
            verdict.scope
        );
        let decision = Decision {
            outcome: AccessOutcome::DenyBlocked {
                scope: verdict.scope,
                reason: verdict.reason,
                blocked_until: verdict.blocked_until,
                retry_after_seconds,
            },
            block_token: self.session_block_token(identity, now),
            reason,
        };
        self.audit(identity, UNKNOWN_USER, AuditStatus::Blocked, &decision, now);
        decision
    }

    /// Audit a request refused before credential evaluation.
    pub fn record_suspicious(&self, identity: &ClientIdentity, details: &str) {
        self.record_event(identity, UNKNOWN_USER, AuditStatus::Suspicious, details);
    }

    /// Audit an allowed request whose actuator call failed.
    pub fn record_actuator_failure(&self, identity: &ClientIdentity, user: &str, details: &str) {
        self.record_event(identity, user, AuditStatus::Failure, details);
    }

    fn record_event(
        &self,
        identity: &ClientIdentity,
        user: &str,
        status: AuditStatus,
        details: &str,
    ) {
        let event = AuditEvent {
            timestamp: self.clock.now_unix(),
            ip: identity.ip.clone(),
            user: user.to_string(),
            status,
            details: details.to_string(),
            scopes: Vec::new(),
        };
        self.write_audit(&event);
    }

    fn deny_credential(
        &self,
        identity: &ClientIdentity,
        failure: CredentialFailure,
        ip_failures: u32,
        now: i64,
    ) -> Decision {
        let block = self.blocks.check(identity, None, now).map(|verdict| BlockRecord {
            scope: verdict.scope,
            blocked_until: verdict.blocked_until,
            reason: verdict.reason,
        });

        let config = self.blocks.ledger().config();
        let prefix = match failure {
            CredentialFailure::MalformedPin => "PIN must be 4-8 digits",
            _ => "Invalid PIN",
        };
        let reason = match block {
            Some(BlockRecord {
                reason: BlockReason::HardLockout,
                scope,
                ..
            }) => format!(
                "{prefix}. {scope} scope blocked for {} minutes after {} failed attempts",
                config.block_time_minutes(),
                config.threshold(scope)
            ),
            _ => {
                let remaining = config.max_attempts().saturating_sub(ip_failures);
                format!("{prefix}. {remaining} attempts remaining")
            }
        };

        let decision = Decision {
            outcome: AccessOutcome::DenyInvalidCredential { failure, block },
            block_token: self.session_block_token(identity, now),
            reason,
        };
        self.audit(identity, UNKNOWN_USER, AuditStatus::Failure, &decision, now);
        decision
    }

    fn session_block_token(&self, identity: &ClientIdentity, now: i64) -> Option<String> {
        let sid = identity.session_id.as_deref()?;
        let scope = Scope::Session {
            id: sid.to_string(),
            fingerprint: identity.fingerprint.clone(),
        };
        let block = self.blocks.ledger().block_record(&scope, now)?;
        if block.reason != BlockReason::HardLockout {
            return None;
        }
        debug!(scope = %scope, blocked_until = block.blocked_until, "issuing session block token");
        self.blocks.issue_token(sid, block.blocked_until, now)
    }

    fn audit(
        &self,
        identity: &ClientIdentity,
        user: &str,
        status: AuditStatus,
        decision: &Decision,
        now: i64,
    ) {
        let event = AuditEvent {
            timestamp: now,
            ip: identity.ip.clone(),
            user: user.to_string(),
            status,
            details: decision.reason.clone(),
            scopes: identity.scopes().iter().map(ToString::to_string).collect(),
        };
        self.write_audit(&event);
    }

    fn write_audit(&self, event: &AuditEvent) {
        if let Err(err) = self.audit.record(event) {
            warn!("failed to write audit event: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::audit::AuditError;
    use crate::gate::capsule::CapsuleSealer;
    use crate::gate::clock::ManualClock;
    use crate::gate::config::GateConfig;
    use crate::gate::ledger::AttemptLedger;
    use crate::gate::users::MemoryUserStore;
    use std::sync::Mutex;

    const NOW: i64 = 1_700_000_000;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<AuditEvent>>,
    }

    impl AuditSink for RecordingSink {
        fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
            self.events
                .lock()
                .map_err(|_| AuditError::WriterStopped)?
                .push(event.clone());
            Ok(())
        }
    }

    struct BrokenSink;

    impl AuditSink for BrokenSink {
        fn record(&self, _event: &AuditEvent) -> Result<(), AuditError> {
            Err(AuditError::Io(std::io::Error::other("disk full")))
        }
    }

    struct Harness {
        engine: AccessDecisionEngine,
        clock: Arc<ManualClock>,
        sink: Arc<RecordingSink>,
    }

    fn harness(config: GateConfig) -> anyhow::Result<Harness> {
        let clock = Arc::new(ManualClock::new(NOW));
        let sink = Arc::new(RecordingSink::default());
        let blocks = BlockState::new(
            Arc::new(AttemptLedger::new(config)),
            Arc::new(CapsuleSealer::new(b"0123456789abcdef0123456789abcdef")?),
        );
        let users = Arc::new(MemoryUserStore::seeded([("alice", "1234")], NOW));
        let engine = AccessDecisionEngine::new(blocks, users, sink.clone(), clock.clone());
        Ok(Harness {
            engine,
            clock,
            sink,
        })
    }

    fn anonymous(ip: &str) -> ClientIdentity {
        ClientIdentity::new(ip, None, "fp".to_string())
    }

    fn with_session(ip: &str, sid: &str) -> ClientIdentity {
        ClientIdentity::new(ip, Some(sid.to_string()), "fp".to_string())
    }

    fn pin_request<'a>(identity: &ClientIdentity, pin: &'a str) -> AccessRequest<'a> {
        AccessRequest {
            identity: identity.clone(),
            pin: Some(pin),
            ..AccessRequest::default()
        }
    }

    fn sso_session(groups: &[&str], exp: i64) -> AuthenticatedSession {
        AuthenticatedSession {
            session_id: "sso-sid".to_string(),
            subject: "alice".to_string(),
            display_name: "Alice".to_string(),
            groups: groups.iter().map(ToString::to_string).collect(),
            issued_at: NOW,
            id_token_exp: exp,
        }
    }

    #[test]
    fn correct_pin_is_allowed_and_audited() -> anyhow::Result<()> {
        let h = harness(GateConfig::default())?;
        let decision = h.engine.evaluate(&pin_request(&anonymous("10.0.0.1"), "1234"));
        assert_eq!(
            decision.outcome,
            AccessOutcome::Allow {
                user: "alice".to_string(),
                method: AuthMethod::Pin,
            }
        );
        let events = h.sink.events.lock().map_err(|e| anyhow::anyhow!("{e}"))?;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, AuditStatus::Success);
        assert_eq!(events[0].user, "alice");
        assert_eq!(h.engine.users().get("alice").map(|u| u.times_used), Some(1));
        Ok(())
    }

    #[test]
    fn missing_pin_is_not_counted() -> anyhow::Result<()> {
        let h = harness(GateConfig::default())?;
        let identity = anonymous("10.0.0.1");
        let request = AccessRequest {
            identity: identity.clone(),
            ..AccessRequest::default()
        };
        let decision = h.engine.evaluate(&request);
        assert!(matches!(
            decision.outcome,
            AccessOutcome::DenyInvalidCredential {
                failure: CredentialFailure::MissingPin,
                ..
            }
        ));
        let scopes = identity.scopes();
        let ledger = h.engine.block_state().ledger();
        assert_eq!(ledger.attempt_record(&scopes[0], NOW).failure_count, 0);
        Ok(())
    }

    #[test]
    fn malformed_pin_is_counted_on_every_scope() -> anyhow::Result<()> {
        let h = harness(GateConfig::default())?;
        let identity = with_session("10.0.0.1", "sid-1");
        let decision = h.engine.evaluate(&pin_request(&identity, "12ab"));
        assert!(matches!(
            decision.outcome,
            AccessOutcome::DenyInvalidCredential {
                failure: CredentialFailure::MalformedPin,
                ..
            }
        ));
        for scope in identity.scopes() {
            assert_eq!(
                h.engine.block_state().ledger().attempt_record(&scope, NOW).failure_count,
                1,
                "scope {scope}"
            );
        }
        Ok(())
    }

    #[test]
    fn five_wrong_pins_lock_the_ip_even_for_the_right_pin() -> anyhow::Result<()> {
        let h = harness(GateConfig::default())?;
        let identity = anonymous("10.0.0.1");
        let mut fifth_failure_at = NOW;
        for n in 0..5 {
            fifth_failure_at = h.clock.now_unix();
            let decision = h.engine.evaluate(&pin_request(&identity, "9999"));
            assert!(
                matches!(decision.outcome, AccessOutcome::DenyInvalidCredential { .. }),
                "attempt {n} was {:?}",
                decision.outcome
            );
            // Wait out the progressive delay before the next guess.
            h.clock.advance(20);
        }

        let decision = h.engine.evaluate(&pin_request(&identity, "1234"));
        assert_eq!(
            decision.outcome,
            AccessOutcome::DenyBlocked {
                scope: ScopeKind::Ip,
                reason: BlockReason::HardLockout,
                blocked_until: fifth_failure_at + 300,
                retry_after_seconds: 280,
            }
        );
        assert!(matches!(
            decision.into_result(),
            Err(GateError::RateLimited { .. })
        ));
        Ok(())
    }

    #[test]
    fn progressive_delay_refuses_early_retry() -> anyhow::Result<()> {
        let h = harness(GateConfig::default())?;
        let identity = anonymous("10.0.0.1");
        h.engine.evaluate(&pin_request(&identity, "9999"));
        h.engine.evaluate(&pin_request(&identity, "9999")); // refused, not counted
        let decision = h.engine.evaluate(&pin_request(&identity, "1234"));
        assert!(matches!(
            decision.outcome,
            AccessOutcome::DenyBlocked {
                reason: BlockReason::ProgressiveDelay,
                retry_after_seconds: 1,
                ..
            }
        ));

        h.clock.advance(1);
        let decision = h.engine.evaluate(&pin_request(&identity, "1234"));
        assert!(matches!(decision.outcome, AccessOutcome::Allow { .. }));
        Ok(())
    }

    #[test]
    fn fifty_distributed_failures_lock_the_global_scope() -> anyhow::Result<()> {
        let h = harness(GateConfig::default())?;
        for n in 0..50 {
            let decision = h
                .engine
                .evaluate(&pin_request(&anonymous(&format!("10.1.0.{n}")), "9999"));
            assert!(matches!(
                decision.outcome,
                AccessOutcome::DenyInvalidCredential { .. }
            ));
            h.clock.advance(10);
        }
        let decision = h.engine.evaluate(&pin_request(&anonymous("192.0.2.1"), "1234"));
        assert!(matches!(
            decision.outcome,
            AccessOutcome::DenyBlocked {
                scope: ScopeKind::Global,
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn session_lockout_emits_block_token_honoured_elsewhere() -> anyhow::Result<()> {
        let h = harness(GateConfig::default())?;
        let mut token = None;
        for n in 0..3 {
            // A new IP each time so only the session scope accumulates.
            let identity = with_session(&format!("10.2.0.{n}"), "sid-1");
            token = h.engine.evaluate(&pin_request(&identity, "9999")).block_token;
            h.clock.advance(20);
        }
        let token = token.ok_or_else(|| anyhow::anyhow!("expected a block token"))?;

        // A second worker with an empty ledger but the same sealing key.
        let other = harness(GateConfig::default())?;
        other.clock.set(h.clock.now_unix());
        let request = AccessRequest {
            identity: with_session("10.2.0.9", "sid-1"),
            pin: Some("1234"),
            session: None,
            block_token: Some(&token),
        };
        let decision = other.engine.evaluate(&request);
        assert!(matches!(
            decision.outcome,
            AccessOutcome::DenyBlocked {
                scope: ScopeKind::Session,
                reason: BlockReason::HardLockout,
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn success_resets_ip_and_session_but_not_global() -> anyhow::Result<()> {
        let h = harness(GateConfig::default())?;
        let identity = with_session("10.0.0.1", "sid-1");
        h.engine.evaluate(&pin_request(&identity, "9999"));
        h.clock.advance(5);
        h.engine.evaluate(&pin_request(&identity, "1234"));

        let ledger = h.engine.block_state().ledger();
        let now = h.clock.now_unix();
        let scopes = identity.scopes();
        assert_eq!(ledger.attempt_record(&scopes[0], now).failure_count, 0);
        assert_eq!(ledger.attempt_record(&scopes[1], now).failure_count, 0);
        assert_eq!(ledger.attempt_record(&scopes[2], now).failure_count, 1);
        Ok(())
    }

    #[test]
    fn sso_session_opens_without_pin_when_eligible() -> anyhow::Result<()> {
        let h = harness(GateConfig::default())?;
        let engine = h.engine.with_pinless_policy(Some(PinlessPolicy {
            require_pin: false,
            allowed_groups: vec!["door-users".to_string()],
        }));
        let request = AccessRequest {
            identity: with_session("10.0.0.1", "sso-sid"),
            session: Some(sso_session(&["staff", "door-users"], NOW + 600)),
            ..AccessRequest::default()
        };
        assert_eq!(
            engine.evaluate(&request).outcome,
            AccessOutcome::Allow {
                user: "Alice".to_string(),
                method: AuthMethod::Sso,
            }
        );
        Ok(())
    }

    #[test]
    fn sso_session_needs_pin_when_not_eligible() -> anyhow::Result<()> {
        let policy = PinlessPolicy {
            require_pin: false,
            allowed_groups: vec!["door-users".to_string()],
        };
        assert!(!policy.eligible(&sso_session(&["staff"], NOW + 600), NOW));
        assert!(!policy.eligible(&sso_session(&["door-users"], NOW), NOW));
        let forced = PinlessPolicy {
            require_pin: true,
            allowed_groups: Vec::new(),
        };
        assert!(!forced.eligible(&sso_session(&["door-users"], NOW + 600), NOW));
        let open = PinlessPolicy::default();
        assert!(open.eligible(&sso_session(&[], NOW + 600), NOW));

        // Disabled SSO: the session is ignored and the PIN path runs.
        let h = harness(GateConfig::default())?;
        let request = AccessRequest {
            identity: with_session("10.0.0.1", "sso-sid"),
            session: Some(sso_session(&["door-users"], NOW + 600)),
            ..AccessRequest::default()
        };
        assert!(matches!(
            h.engine.evaluate(&request).outcome,
            AccessOutcome::DenyInvalidCredential {
                failure: CredentialFailure::MissingPin,
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn sso_session_does_not_bypass_a_block() -> anyhow::Result<()> {
        let h = harness(GateConfig::default())?;
        let engine = h.engine.with_pinless_policy(Some(PinlessPolicy::default()));
        let identity = with_session("10.0.0.1", "sso-sid");
        engine.evaluate(&pin_request(&identity, "0000"));
        let request = AccessRequest {
            identity,
            session: Some(sso_session(&[], NOW + 600)),
            ..AccessRequest::default()
        };
        assert!(matches!(
            engine.evaluate(&request).outcome,
            AccessOutcome::DenyBlocked { .. }
        ));
        Ok(())
    }

    #[test]
    fn audit_failures_do_not_change_the_decision() -> anyhow::Result<()> {
        let clock = Arc::new(ManualClock::new(NOW));
        let blocks = BlockState::new(
            Arc::new(AttemptLedger::new(GateConfig::default())),
            Arc::new(CapsuleSealer::random()?),
        );
        let users = Arc::new(MemoryUserStore::seeded([("alice", "1234")], NOW));
        let engine = AccessDecisionEngine::new(blocks, users, Arc::new(BrokenSink), clock);
        let decision = engine.evaluate(&pin_request(&anonymous("10.0.0.1"), "1234"));
        assert!(matches!(decision.outcome, AccessOutcome::Allow { .. }));
        Ok(())
    }

    /// A user store slow enough that parallel guesses overlap inside it.
    struct SlowUsers(MemoryUserStore);

    impl UserStore for SlowUsers {
        fn find_by_pin(&self, pin: &str) -> Option<String> {
            std::thread::sleep(std::time::Duration::from_millis(5));
            self.0.find_by_pin(pin)
        }

        fn touch(&self, name: &str, now: i64) {
            self.0.touch(name, now);
        }

        fn get(&self, name: &str) -> Option<crate::gate::users::User> {
            self.0.get(name)
        }

        fn list(&self) -> Vec<crate::gate::users::User> {
            self.0.list()
        }

        fn create(
            &self,
            name: &str,
            pin: &str,
            active: bool,
            now: i64,
        ) -> Result<(), crate::gate::users::UserStoreError> {
            self.0.create(name, pin, active, now)
        }

        fn update(
            &self,
            name: &str,
            pin: Option<&str>,
            active: Option<bool>,
            now: i64,
        ) -> Result<(), crate::gate::users::UserStoreError> {
            self.0.update(name, pin, active, now)
        }

        fn delete(&self, name: &str) -> Result<(), crate::gate::users::UserStoreError> {
            self.0.delete(name)
        }
    }

    #[test]
    fn parallel_guesses_from_one_ip_are_evaluated_one_at_a_time() -> anyhow::Result<()> {
        let blocks = BlockState::new(
            Arc::new(AttemptLedger::new(GateConfig::default())),
            Arc::new(CapsuleSealer::random()?),
        );
        let users = Arc::new(SlowUsers(MemoryUserStore::seeded([("alice", "1234")], NOW)));
        let engine = AccessDecisionEngine::new(
            blocks,
            users,
            Arc::new(RecordingSink::default()),
            Arc::new(ManualClock::new(NOW)),
        );

        let identity = anonymous("10.0.0.1");
        let barrier = std::sync::Barrier::new(32);
        let outcomes = Mutex::new(Vec::new());
        std::thread::scope(|threads| {
            for _ in 0..32 {
                let (engine, identity, barrier, outcomes) = (&engine, &identity, &barrier, &outcomes);
                threads.spawn(move || {
                    barrier.wait();
                    let decision = engine.evaluate(&pin_request(identity, "9999"));
                    if let Ok(mut outcomes) = outcomes.lock() {
                        outcomes.push(decision.outcome);
                    }
                });
            }
        });

        let outcomes = outcomes.into_inner().map_err(|e| anyhow::anyhow!("{e}"))?;
        assert_eq!(outcomes.len(), 32);
        let evaluated = outcomes
            .iter()
            .filter(|outcome| !matches!(outcome, AccessOutcome::DenyBlocked { .. }))
            .count();
        assert_eq!(evaluated, 1, "{outcomes:?}");
        let ledger = engine.block_state().ledger();
        assert_eq!(ledger.attempt_record(&identity.scopes()[0], NOW).failure_count, 1);
        Ok(())
    }

    #[test]
    fn invalid_pin_reason_counts_down() -> anyhow::Result<()> {
        let h = harness(GateConfig::default())?;
        let decision = h.engine.evaluate(&pin_request(&anonymous("10.0.0.1"), "9999"));
        assert_eq!(decision.reason, "Invalid PIN. 4 attempts remaining");
        match decision.into_result() {
            Err(GateError::InvalidCredential { block, .. }) => {
                assert_eq!(block.map(|b| b.reason), Some(BlockReason::ProgressiveDelay));
            }
            other => anyhow::bail!("unexpected {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn changing_browser_headers_does_not_reset_the_count() -> anyhow::Result<()> {
        let h = harness(GateConfig::new().with_max_delay_seconds(0))?;
        for n in 0..5 {
            let identity = ClientIdentity::new("10.0.0.1", None, format!("browser-{n}"));
            let decision = h.engine.evaluate(&pin_request(&identity, "9999"));
            assert!(
                matches!(decision.outcome, AccessOutcome::DenyInvalidCredential { .. }),
                "{:?}",
                decision.outcome
            );
        }
        let fresh = ClientIdentity::new("10.0.0.1", None, "browser-new".to_string());
        let decision = h.engine.evaluate(&pin_request(&fresh, "1234"));
        assert!(
            matches!(
                decision.outcome,
                AccessOutcome::DenyBlocked {
                    scope: ScopeKind::Ip,
                    ..
                }
            ),
            "{:?}",
            decision.outcome
        );
        Ok(())
    }
}
