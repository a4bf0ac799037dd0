// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded restart policy for the supervisor.

use std::time::Duration;

/// How [`Supervisor::restart`](crate::Supervisor::restart) retries a failed
/// session.
///
/// Sessions never reconnect on their own. A restart call makes one start
/// attempt and, while the policy is enabled, up to `max_attempts - 1` more,
/// waiting `initial_delay * backoff_factor^n` (capped at `max_delay`)
/// between them.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use mqtt_sensor_lib::RestartPolicy;
///
/// let policy = RestartPolicy::new()
///     .with_max_attempts(5)
///     .with_initial_delay(Duration::from_millis(500))
///     .with_max_delay(Duration::from_secs(10));
///
/// assert!(policy.should_retry(4));
/// assert!(!policy.should_retry(5));
/// assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Whether attempts beyond the first are made.
    pub enabled: bool,
    /// Start attempts per restart call, the first one included.
    pub max_attempts: u32,
    /// Wait after the first failed attempt.
    pub initial_delay: Duration,
    /// Cap on any single wait.
    pub max_delay: Duration,
    /// Integer growth factor between consecutive waits; 1 keeps them flat.
    pub backoff_factor: u32,
}

impl RestartPolicy {
    /// Creates a policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a policy that makes a single attempt per restart.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Sets the number of attempts per restart call.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the wait after the first failed attempt.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the cap on any single wait.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the growth factor between waits.
    #[must_use]
    pub fn with_backoff_factor(mut self, factor: u32) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Returns the wait after failed attempt number `attempt` (zero-based).
    ///
    /// Saturates instead of overflowing, so large attempt numbers simply
    /// yield `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1).saturating_pow(attempt);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Returns true if attempt number `attempt` (zero-based) may be made.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.enabled && attempt < self.max_attempts
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy() {
        let policy = RestartPolicy::default();
        assert!(policy.enabled);
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.backoff_factor, 2);
    }

    #[test]
    fn disabled_policy_never_retries() {
        let policy = RestartPolicy::disabled();
        assert!(!policy.should_retry(0));
    }

    #[test]
    fn exponential_delays_are_capped() {
        let policy = RestartPolicy::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(10));

        let delays: Vec<_> = (0..5).map(|n| policy.delay_for_attempt(n)).collect();
        assert_eq!(
            delays,
            [1, 2, 4, 8, 10].map(Duration::from_secs).to_vec()
        );
    }

    #[test]
    fn flat_backoff() {
        let policy = RestartPolicy::new()
            .with_initial_delay(Duration::from_millis(250))
            .with_backoff_factor(1);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(7), Duration::from_millis(250));

        // Zero is treated as flat rather than collapsing to no wait
        let zero = policy.with_backoff_factor(0);
        assert_eq!(zero.delay_for_attempt(3), Duration::from_millis(250));
    }

    #[test]
    fn huge_attempt_numbers_saturate() {
        let policy = RestartPolicy::new().with_max_delay(Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn attempts_are_bounded() {
        let policy = RestartPolicy::new().with_max_attempts(2);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }
}
