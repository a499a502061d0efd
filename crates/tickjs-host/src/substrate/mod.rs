//! External event substrate: the poller that reports timer expirations to the driver.
//!
//! The substrate never calls into the engine itself. A poll returns the keys that became due
//! and the driver fires them on its own thread, after the handle table borrow is released.

mod clock;
mod queue;

use std::time::Duration;

use crate::timer::TimerKey;

pub use clock::{Clock, ClockHandle, ManualClock, MonotonicClock};
pub use queue::TimerQueue;

pub trait EventSubstrate {
    /// Arm `key` to expire after `delay`, then every `repeat` if given. Re-arming an armed key
    /// replaces its schedule.
    fn arm(&mut self, key: TimerKey, delay: Duration, repeat: Option<Duration>);

    /// Stop future expirations of `key`; returns whether it was armed
    fn disarm(&mut self, key: TimerKey) -> bool;

    /// Collect due keys in expiration order. With `wait = None` this never blocks; with
    /// `Some(cap)` it may block until the earliest deadline, but never longer than `cap`.
    fn poll(&mut self, wait: Option<Duration>) -> Vec<TimerKey>;

    /// Whether any armed key or other external work remains
    fn is_alive(&self) -> bool;

    /// Time until the earliest armed deadline, `Duration::ZERO` if one is already due
    fn next_deadline(&self) -> Option<Duration>;
}
