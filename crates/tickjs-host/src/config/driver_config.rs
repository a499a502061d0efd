use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What the driver does when no engine job is ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdleStrategy {
    /// Sleep until the soonest timer deadline (bounded by `max_block_ms`)
    #[default]
    Block,
    /// Never block; poll the substrate in a tight cycle
    BusyPoll,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default)]
    pub idle: IdleStrategy,

    /// Upper bound on a single blocking poll in milliseconds (default: 50ms)
    #[serde(default = "default_max_block_ms")]
    pub max_block_ms: u64,

    /// Stop after this many cycles even if work remains (0 = unbounded)
    #[serde(default)]
    pub max_cycles: u64,
}

fn default_max_block_ms() -> u64 {
    50
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            idle: IdleStrategy::Block,
            max_block_ms: default_max_block_ms(),
            max_cycles: 0,
        }
    }
}

impl DriverConfig {
    pub fn max_block(&self) -> Duration {
        Duration::from_millis(self.max_block_ms)
    }

    pub fn cycle_limit(&self) -> Option<u64> {
        (self.max_cycles > 0).then_some(self.max_cycles)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Maximum number of simultaneously live timers (0 = unlimited)
    #[serde(default = "default_max_live_timers")]
    pub max_live_timers: usize,
}

fn default_max_live_timers() -> usize {
    65536
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            max_live_timers: default_max_live_timers(),
        }
    }
}

impl TimerConfig {
    pub fn live_limit(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_live_timers).unwrap_or(NonZeroUsize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_means_unbounded() {
        let driver = DriverConfig {
            max_cycles: 0,
            ..DriverConfig::default()
        };
        assert_eq!(driver.cycle_limit(), None);

        let timers = TimerConfig { max_live_timers: 0 };
        assert_eq!(timers.live_limit(), NonZeroUsize::MAX);
    }

    #[test]
    fn test_cycle_limit() {
        let driver = DriverConfig {
            max_cycles: 3,
            ..DriverConfig::default()
        };
        assert_eq!(driver.cycle_limit(), Some(3));
        assert_eq!(driver.max_block(), Duration::from_millis(50));
    }
}
