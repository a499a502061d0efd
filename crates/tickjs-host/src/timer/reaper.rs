use tracing::{error, trace};

use super::registry::{HandleState, TimerHandle};
use super::slab::TimerKey;

/// Why a handle was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// One-shot timer fired and returned
    Completed,
    /// Canceled by the script
    Cancelled,
    /// Host torn down while the handle was still live
    Shutdown,
}

/// Counters of closed handles, per reason
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReaperStats {
    pub completed: u64,
    pub cancelled: u64,
    pub shutdown: u64,
    pub closures_released: u64,
}

impl ReaperStats {
    pub fn total_closed(&self) -> u64 {
        self.completed + self.cancelled + self.shutdown
    }
}

/// The only place a handle and its closure are released.
///
/// `reap` consumes the handle, so a closed handle cannot be reaped twice.
#[derive(Debug, Default)]
pub struct Reaper {
    stats: ReaperStats,
}

impl Reaper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Release `handle` and the closure it owns.
    ///
    /// While a handle is firing its closure lives in the invocation frame, which hands it back
    /// through `returned`.
    pub fn reap<C>(
        &mut self,
        key: TimerKey,
        handle: TimerHandle<C>,
        returned: Option<C>,
        reason: CloseReason,
    ) {
        let closure = match handle.state {
            HandleState::Armed(closure) => {
                if returned.is_some() {
                    error!(target: "timers", "timer {} returned a second closure while armed", key);
                }
                Some(closure)
            }
            HandleState::Firing { .. } => returned,
        };

        match reason {
            CloseReason::Completed => self.stats.completed += 1,
            CloseReason::Cancelled => self.stats.cancelled += 1,
            CloseReason::Shutdown => self.stats.shutdown += 1,
        }

        match closure {
            Some(closure) => {
                drop(closure);
                self.stats.closures_released += 1;
                trace!(target: "timers", "timer {} closed ({:?})", key, reason);
            }
            None => {
                // Only reachable when shutdown races an in-flight invocation; the frame hands
                // the closure back later through `release_orphan`.
                trace!(
                    target: "timers",
                    "timer {} closed ({:?}) while its closure was in flight",
                    key,
                    reason
                );
            }
        }
    }

    /// Release a closure whose handle was closed while it was being invoked
    pub fn release_orphan<C>(&mut self, key: TimerKey, closure: C) {
        drop(closure);
        self.stats.closures_released += 1;
        trace!(target: "timers", "released in-flight closure of closed timer {}", key);
    }

    pub fn stats(&self) -> ReaperStats {
        self.stats
    }
}
