//! Per-run tuning knobs.

use std::time::Duration;

use crate::models::NodeDefinition;

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Bounded exponential backoff for a node's executor calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total executor invocations allowed, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// The policy for `node`: every field it sets overrides `self`.
    /// `max_attempts == 0` is read as a single attempt.
    pub fn for_node(&self, node: &NodeDefinition) -> Self {
        Self {
            max_attempts: node.max_attempts.unwrap_or(self.max_attempts).max(1),
            initial_delay: node
                .initial_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(self.initial_delay),
            max_delay: node.max_delay_ms.map(Duration::from_millis).unwrap_or(self.max_delay),
        }
    }

    /// Sleep before attempt `attempt + 1`:
    /// `min(initial_delay * 2^(attempt-1), max_delay)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

// ---------------------------------------------------------------------------
// Execution options
// ---------------------------------------------------------------------------

/// Options accepted by `ExecutionManager::execute` and friends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Ceiling on concurrently running nodes within one wave. `None` lets
    /// the whole wave run at once.
    pub max_concurrency: Option<usize>,
    /// Deadline for the whole run.
    pub timeout: Option<Duration>,
    /// Applied to nodes that omit their own retry fields.
    pub default_retry: RetryPolicy,
}

impl ExecutionOptions {
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = policy;
        self
    }
}

/// Engine-wide defaults: unbounded waves, no deadline, single attempt.
pub fn default_execution_options() -> ExecutionOptions {
    ExecutionOptions::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(200), Duration::from_millis(500));
    }

    #[test]
    fn node_fields_override_defaults() {
        let defaults = default_execution_options().default_retry;
        let plain = NodeDefinition::new("a", "mock", Value::Null);
        assert_eq!(defaults.for_node(&plain), defaults);

        let tuned = NodeDefinition::new("b", "mock", Value::Null).with_retry(3, 10, 40);
        let policy = defaults.for_node(&tuned);
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_millis(10));
        assert_eq!(policy.max_delay, Duration::from_millis(40));

        let mut zero = plain.clone();
        zero.max_attempts = Some(0);
        assert_eq!(defaults.for_node(&zero).max_attempts, 1);
    }
}
