//! Resolved rate limiting and session settings.

use super::scope::ScopeKind;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_SESSION_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_MAX_GLOBAL_ATTEMPTS_PER_HOUR: u32 = 50;
const DEFAULT_BLOCK_TIME_MINUTES: i64 = 5;
const DEFAULT_MAX_DELAY_SECONDS: i64 = 16;
const DEFAULT_FAILURE_WINDOW_SECONDS: i64 = 60 * 60;
const GLOBAL_WINDOW_SECONDS: i64 = 60 * 60;
const DEFAULT_SESSION_TTL_SECONDS: i64 = 12 * 60 * 60;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GateConfig {
    max_attempts: u32,
    session_max_attempts: u32,
    max_global_attempts_per_hour: u32,
    block_time_minutes: i64,
    max_delay_seconds: i64,
    failure_window_seconds: i64,
    session_ttl_seconds: i64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl GateConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            session_max_attempts: DEFAULT_SESSION_MAX_ATTEMPTS,
            max_global_attempts_per_hour: DEFAULT_MAX_GLOBAL_ATTEMPTS_PER_HOUR,
            block_time_minutes: DEFAULT_BLOCK_TIME_MINUTES,
            max_delay_seconds: DEFAULT_MAX_DELAY_SECONDS,
            failure_window_seconds: DEFAULT_FAILURE_WINDOW_SECONDS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_session_max_attempts(mut self, attempts: u32) -> Self {
        self.session_max_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_max_global_attempts_per_hour(mut self, attempts: u32) -> Self {
        self.max_global_attempts_per_hour = attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_block_time_minutes(mut self, minutes: i64) -> Self {
        self.block_time_minutes = minutes.max(0);
        self
    }

    #[must_use]
    pub fn with_max_delay_seconds(mut self, seconds: i64) -> Self {
        self.max_delay_seconds = seconds.max(0);
        self
    }

    #[must_use]
    pub fn with_failure_window_seconds(mut self, seconds: i64) -> Self {
        self.failure_window_seconds = seconds.max(1);
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds.max(60);
        self
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub const fn session_max_attempts(&self) -> u32 {
        self.session_max_attempts
    }

    #[must_use]
    pub const fn max_global_attempts_per_hour(&self) -> u32 {
        self.max_global_attempts_per_hour
    }

    #[must_use]
    pub const fn block_time_minutes(&self) -> i64 {
        self.block_time_minutes
    }

    #[must_use]
    pub const fn block_time_seconds(&self) -> i64 {
        self.block_time_minutes * 60
    }

    #[must_use]
    pub const fn max_delay_seconds(&self) -> i64 {
        self.max_delay_seconds
    }

    #[must_use]
    pub const fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    /// Failures at or above this count hard-lock the scope.
    #[must_use]
    pub const fn threshold(&self, kind: ScopeKind) -> u32 {
        match kind {
            ScopeKind::Ip => self.max_attempts,
            ScopeKind::Session => self.session_max_attempts,
            ScopeKind::Global => self.max_global_attempts_per_hour,
        }
    }

    /// Trailing window failures are counted in.
    #[must_use]
    pub const fn window_seconds(&self, kind: ScopeKind) -> i64 {
        match kind {
            ScopeKind::Ip | ScopeKind::Session => self.failure_window_seconds,
            ScopeKind::Global => GLOBAL_WINDOW_SECONDS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = GateConfig::default();
        assert_eq!(config.threshold(ScopeKind::Ip), 5);
        assert_eq!(config.threshold(ScopeKind::Session), 3);
        assert_eq!(config.threshold(ScopeKind::Global), 50);
        assert_eq!(config.block_time_seconds(), 300);
        assert_eq!(config.max_delay_seconds(), 16);
        assert_eq!(config.window_seconds(ScopeKind::Global), 3600);
    }

    #[test]
    fn thresholds_never_drop_to_zero() {
        let config = GateConfig::new()
            .with_max_attempts(0)
            .with_session_max_attempts(0)
            .with_max_global_attempts_per_hour(0);
        assert_eq!(config.threshold(ScopeKind::Ip), 1);
        assert_eq!(config.threshold(ScopeKind::Session), 1);
        assert_eq!(config.threshold(ScopeKind::Global), 1);
    }
}
