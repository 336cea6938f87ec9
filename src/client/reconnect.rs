use std::time::Duration;

use crate::config::ReconnectConfig;

/// Bounded exponential backoff applied to failed connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
	/// Whether connection attempts are retried at all.
	///
	/// True by default.
	pub enabled: bool,
	/// Attempts made after a transport is lost, and retries allowed for the
	/// initial connection.
	pub max_attempts: u32,
	pub initial_backoff: Duration,
	/// Upper bound of a single delay.
	pub max_backoff: Duration,
}

impl ReconnectPolicy {
	/// A policy which never retries.
	pub fn disabled() -> Self {
		Self {
			enabled: false,
			..Default::default()
		}
	}

	/// Number of attempts made, the first one included, when reconnecting.
	pub fn attempts(&self) -> u32 {
		match self.enabled {
			true => self.max_attempts,
			false => 0,
		}
	}

	/// Delay before the `attempt`-th retry, counted from one.
	pub fn delay(&self, attempt: u32) -> Duration {
		let exponent = attempt.saturating_sub(1).min(16);
		self.initial_backoff.saturating_mul(1 << exponent).min(self.max_backoff)
	}
}

impl From<&ReconnectConfig> for ReconnectPolicy {
	fn from(config: &ReconnectConfig) -> Self {
		Self {
			enabled: config.enabled,
			max_attempts: config.max_attempts,
			initial_backoff: Duration::from_millis(config.initial_backoff_ms),
			max_backoff: Duration::from_millis(config.max_backoff_ms),
		}
	}
}

impl Default for ReconnectPolicy {
	fn default() -> Self { Self::from(&ReconnectConfig::default()) }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn backoff_doubles_until_capped() {
		let policy = ReconnectPolicy {
			enabled: true,
			max_attempts: 10,
			initial_backoff: Duration::from_millis(100),
			max_backoff: Duration::from_millis(700),
		};

		let delays: Vec<u64> = (1..=5).map(|attempt| policy.delay(attempt).as_millis() as u64).collect();
		assert_eq!(delays, vec![100, 200, 400, 700, 700]);
		assert_eq!(policy.delay(u32::MAX), Duration::from_millis(700));
	}

	#[test]
	fn disabled_policy_makes_no_attempts() {
		assert_eq!(ReconnectPolicy::disabled().attempts(), 0);
		assert_eq!(ReconnectPolicy::default().attempts(), 3);
	}
}
