//! Per-scope failure ledger with progressive delay and hard lockout.
//!
//! Each scope key holds a sliding log of failure timestamps. The log is capped at
//! the scope threshold, so memory per key is bounded, and all mutations for one
//! key happen under that key's shard lock. Unrelated clients never contend on a
//! single global lock.

use super::config::GateConfig;
use super::scope::{Scope, ScopeKind};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    ProgressiveDelay,
    HardLockout,
}

impl BlockReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProgressiveDelay => "progressive_delay",
            Self::HardLockout => "hard_lockout",
        }
    }
}

/// Snapshot of a scope's failures within its trailing window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttemptRecord {
    pub scope: ScopeKind,
    pub window_start: i64,
    pub failure_count: u32,
    pub last_failure_at: Option<i64>,
}

/// A scope that currently refuses attempts. Always derived, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockRecord {
    pub scope: ScopeKind,
    pub blocked_until: i64,
    pub reason: BlockReason,
}

#[derive(Debug, Default)]
struct FailureLog {
    failures: VecDeque<i64>,
}

impl FailureLog {
    fn prune(&mut self, cutoff: i64) {
        while self.failures.front().is_some_and(|&at| at <= cutoff) {
            self.failures.pop_front();
        }
    }

    fn live(&self, cutoff: i64) -> impl Iterator<Item = &i64> {
        self.failures.iter().filter(move |&&at| at > cutoff)
    }
}

#[derive(Debug)]
pub struct AttemptLedger {
    config: GateConfig,
    logs: DashMap<String, FailureLog>,
}

impl AttemptLedger {
    #[must_use]
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            logs: DashMap::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Record a failed attempt and return the updated snapshot.
    pub fn record_failure(&self, scope: &Scope, now: i64) -> AttemptRecord {
        let kind = scope.kind();
        let window_start = now - self.config.window_seconds(kind);
        let threshold = usize::try_from(self.config.threshold(kind)).unwrap_or(usize::MAX);

        let mut log = self.logs.entry(scope.key()).or_default();
        log.prune(window_start);
        log.failures.push_back(now);
        while log.failures.len() > threshold {
            log.failures.pop_front();
        }

        snapshot(kind, &log.failures, window_start)
    }

    /// Admit one attempt on `scope` by logging it as a failure up front.
    ///
    /// The block check and the provisional failure happen under the key's shard
    /// lock, so concurrent attempts are admitted one at a time and each sees the
    /// failures of those admitted before it. Call [`AttemptLedger::refund`] when
    /// the attempt turns out to be good.
    ///
    /// # Errors
    /// Returns the block that refuses the attempt; nothing is recorded then.
    pub fn try_reserve(&self, scope: &Scope, now: i64) -> Result<AttemptRecord, BlockRecord> {
        let kind = scope.kind();
        let window_start = now - self.config.window_seconds(kind);
        let threshold = usize::try_from(self.config.threshold(kind)).unwrap_or(usize::MAX);

        let mut log = self.logs.entry(scope.key()).or_default();
        log.prune(window_start);
        if let Some(block) = self.block_for(kind, &log.failures, now) {
            return Err(block);
        }
        log.failures.push_back(now);
        while log.failures.len() > threshold {
            log.failures.pop_front();
        }

        Ok(snapshot(kind, &log.failures, window_start))
    }

    /// Withdraw the failure reserved at `at`.
    pub fn refund(&self, scope: &Scope, at: i64) {
        if let Some(mut log) = self.logs.get_mut(&scope.key())
            && let Some(position) = log.failures.iter().rposition(|&failed_at| failed_at == at)
        {
            log.failures.remove(position);
        }
    }

    /// Forget all failures for `scope`.
    pub fn record_success(&self, scope: &Scope) {
        self.logs.remove(&scope.key());
    }

    #[must_use]
    pub fn attempt_record(&self, scope: &Scope, now: i64) -> AttemptRecord {
        let kind = scope.kind();
        let window_start = now - self.config.window_seconds(kind);
        match self.logs.get(&scope.key()) {
            Some(log) => {
                let live: VecDeque<i64> = log.live(window_start).copied().collect();
                snapshot(kind, &live, window_start)
            }
            None => snapshot(kind, &VecDeque::new(), window_start),
        }
    }

    /// Delay that the current failure count imposes between attempts.
    ///
    /// Zero when there are no failures, for the global scope, and once the
    /// scope has reached its hard threshold.
    #[must_use]
    pub fn current_delay(&self, scope: &Scope, now: i64) -> Duration {
        let record = self.attempt_record(scope, now);
        let seconds = self.delay_seconds(scope.kind(), record.failure_count);
        Duration::from_secs(u64::try_from(seconds).unwrap_or(0))
    }

    #[must_use]
    pub fn is_hard_blocked(&self, scope: &Scope, now: i64) -> bool {
        self.block_record(scope, now)
            .is_some_and(|block| block.reason == BlockReason::HardLockout)
    }

    /// The block currently active on `scope`, if any.
    #[must_use]
    pub fn block_record(&self, scope: &Scope, now: i64) -> Option<BlockRecord> {
        let kind = scope.kind();
        let window_start = now - self.config.window_seconds(kind);
        let log = self.logs.get(&scope.key())?;
        let live: VecDeque<i64> = log.live(window_start).copied().collect();
        self.block_for(kind, &live, now)
    }

    /// Block implied by `failures`, which must already be limited to the window.
    fn block_for(&self, kind: ScopeKind, failures: &VecDeque<i64>, now: i64) -> Option<BlockRecord> {
        let last_failure_at = *failures.back()?;
        let failure_count = u32::try_from(failures.len()).unwrap_or(u32::MAX);

        if failure_count >= self.config.threshold(kind) {
            let blocked_until = last_failure_at + self.config.block_time_seconds();
            return (now < blocked_until).then_some(BlockRecord {
                scope: kind,
                blocked_until,
                reason: BlockReason::HardLockout,
            });
        }

        let delay = self.delay_seconds(kind, failure_count);
        let retry_at = last_failure_at + delay;
        (delay > 0 && now < retry_at).then_some(BlockRecord {
            scope: kind,
            blocked_until: retry_at,
            reason: BlockReason::ProgressiveDelay,
        })
    }

    /// Drop logs with no failure inside their window and no active lockout.
    pub fn evict_expired(&self, now: i64) -> usize {
        let before = self.logs.len();
        let block_time = self.config.block_time_seconds();
        self.logs.retain(|key, log| {
            let kind = kind_from_key(key);
            let horizon = self.config.window_seconds(kind).max(block_time);
            log.failures.back().is_some_and(|&last| last > now - horizon)
        });
        before.saturating_sub(self.logs.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.logs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    fn delay_seconds(&self, kind: ScopeKind, failure_count: u32) -> i64 {
        if kind == ScopeKind::Global
            || failure_count == 0
            || failure_count >= self.config.threshold(kind)
        {
            return 0;
        }
        progressive_delay_seconds(failure_count, self.config.max_delay_seconds())
    }
}

/// `min(2^(n-1), cap)` for `n > 0`.
#[must_use]
pub fn progressive_delay_seconds(failure_count: u32, cap: i64) -> i64 {
    if failure_count == 0 {
        return 0;
    }
    let exponent = (failure_count - 1).min(62);
    (1_i64 << exponent).min(cap)
}

fn snapshot(kind: ScopeKind, failures: &VecDeque<i64>, window_start: i64) -> AttemptRecord {
    AttemptRecord {
        scope: kind,
        window_start: failures.front().copied().unwrap_or(window_start),
        failure_count: u32::try_from(failures.len()).unwrap_or(u32::MAX),
        last_failure_at: failures.back().copied(),
    }
}

fn kind_from_key(key: &str) -> ScopeKind {
    if key.starts_with("ip:") {
        ScopeKind::Ip
    } else if key.starts_with("session:") {
        ScopeKind::Session
    } else {
        ScopeKind::Global
    }
}
