use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Shape of the request traffic a fetcher drives through its coalescer.
///
/// Each round fires `concurrent_requests` calls at once, so all of them but the first
/// normally join the first call's in-flight request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrafficConfig {
    /// Number of calls fired concurrently in each round.
    ///
    /// Default: 3
    #[serde(default = "default_concurrent_requests")]
    pub concurrent_requests: usize,

    /// Number of rounds to run.
    ///
    /// Default: 1
    #[serde(default = "default_rounds")]
    pub rounds: u32,

    /// Pause between two rounds.
    ///
    /// Specified in milliseconds for serialization compatibility.
    /// Default: 1000ms (1 second)
    #[serde(default = "default_round_interval_ms")]
    pub round_interval_ms: u64,
}

fn default_concurrent_requests() -> usize {
    3
}

fn default_rounds() -> u32 {
    1
}

fn default_round_interval_ms() -> u64 {
    1000
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            concurrent_requests: default_concurrent_requests(),
            rounds: default_rounds(),
            round_interval_ms: default_round_interval_ms(),
        }
    }
}

impl TrafficConfig {
    /// Returns the pause between two rounds as a [`Duration`].
    pub fn round_interval(&self) -> Duration {
        Duration::from_millis(self.round_interval_ms)
    }

    /// Validates the traffic configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.concurrent_requests == 0 {
            return Err(ValidationError::ConcurrentRequestsZero);
        }

        if self.rounds == 0 {
            return Err(ValidationError::RoundsZero);
        }

        Ok(())
    }
}
