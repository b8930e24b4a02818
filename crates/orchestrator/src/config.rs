use std::time::Duration;

/// Engine tuning knobs. Defaults are sane for production; tests shrink the
/// timeouts.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long to wait for a named advisory lock before giving up.
    pub lock_wait: Duration,
    /// Backstop expiry for a held advisory lock.
    pub lock_hold: Duration,
    /// Grace period for a remote worker to acknowledge a cancellation
    /// before the node is aborted locally.
    pub abort_grace_ms: i64,
    /// Intervention deadline applied when an adviser does not set one.
    pub default_intervention_timeout_ms: i64,
    /// Cadence of the deadline monitor.
    pub sweep_interval: Duration,
    /// Hard ceiling on retries regardless of per-node policy.
    pub max_retry_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_secs(10),
            lock_hold: Duration::from_secs(30),
            abort_grace_ms: 30_000,
            default_intervention_timeout_ms: 24 * 60 * 60 * 1000,
            sweep_interval: Duration::from_secs(5),
            max_retry_attempts: 10,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    pub fn with_lock_hold(mut self, hold: Duration) -> Self {
        self.lock_hold = hold;
        self
    }

    pub fn with_abort_grace_ms(mut self, grace_ms: i64) -> Self {
        self.abort_grace_ms = grace_ms;
        self
    }

    pub fn with_default_intervention_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.default_intervention_timeout_ms = timeout_ms;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }
}
