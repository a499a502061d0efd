use std::num::NonZeroUsize;
use std::time::Duration;

use tracing::{debug, error, warn};

use super::reaper::{CloseReason, Reaper, ReaperStats};
use super::slab::{Slab, TimerKey};
use crate::error::TimerError;
use crate::substrate::EventSubstrate;

/// One-shot or repeating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Once,
    Repeating { period: Duration },
}

/// Observable lifecycle of a timer identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Armed,
    Firing,
    /// Terminal; also reported for identities the registry never issued
    Closed,
}

/// Where the closure lives. There is no `Closed` variant: a closed handle is removed from the
/// table, which is what makes its identity unrecognizable.
pub(crate) enum HandleState<C> {
    Armed(C),
    /// Closure is owned by the invocation frame
    Firing { cancel_requested: bool },
}

/// Record of one scheduled activity
pub struct TimerHandle<C> {
    kind: TimerKind,
    pub(crate) state: HandleState<C>,
}

impl<C> TimerHandle<C> {
    pub fn lifecycle(&self) -> Lifecycle {
        match self.state {
            HandleState::Armed(_) => Lifecycle::Armed,
            HandleState::Firing { .. } => Lifecycle::Firing,
        }
    }
}

/// What happened to a handle once its invocation returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Rearmed,
    Closed(CloseReason),
}

/// Handle table plus the substrate that arms it.
///
/// Every transition out of `Armed`/`Firing` funnels through `close`, which hands the handle
/// to the reaper.
pub struct TimerRegistry<C> {
    handles: Slab<TimerHandle<C>>,
    substrate: Box<dyn EventSubstrate>,
    reaper: Reaper,
    fatal: Option<TimerError>,
    scheduled: u64,
}

impl<C> TimerRegistry<C> {
    pub fn new(substrate: Box<dyn EventSubstrate>, max_live_timers: NonZeroUsize) -> Self {
        Self {
            handles: Slab::with_limit(max_live_timers),
            substrate,
            reaper: Reaper::new(),
            fatal: None,
            scheduled: 0,
        }
    }

    /// Schedule `closure` to run once after `delay`
    pub fn schedule_once(&mut self, closure: C, delay: Duration) -> Result<TimerKey, TimerError> {
        self.schedule(closure, TimerKind::Once, delay)
    }

    /// Schedule `closure` to run every `period` until canceled; a zero period is rejected
    pub fn schedule_repeating(
        &mut self,
        closure: C,
        period: Duration,
    ) -> Result<TimerKey, TimerError> {
        if period.is_zero() {
            return Err(TimerError::InvalidDelay(
                "repeating period must be positive".to_string(),
            ));
        }
        self.schedule(closure, TimerKind::Repeating { period }, period)
    }

    fn schedule(
        &mut self,
        closure: C,
        kind: TimerKind,
        delay: Duration,
    ) -> Result<TimerKey, TimerError> {
        let handle = TimerHandle {
            kind,
            state: HandleState::Armed(closure),
        };
        let Some(key) = self.handles.insert(handle) else {
            let err = TimerError::CapacityExhausted(self.handles.limit());
            error!(target: "timers", "cannot allocate timer handle: {}", err);
            self.fatal.get_or_insert_with(|| err.clone());
            return Err(err);
        };

        let repeat = match kind {
            TimerKind::Once => None,
            TimerKind::Repeating { period } => Some(period),
        };
        self.substrate.arm(key, delay, repeat);
        self.scheduled += 1;
        debug!(target: "timers", "scheduled timer {} ({:?}, delay {:?})", key, kind, delay);
        Ok(key)
    }

    /// Cancel a live timer.
    ///
    /// An armed handle is disarmed and closed immediately. A firing handle is disarmed and
    /// closes when its invocation returns. Anything else is `InvalidHandle`.
    pub fn cancel(&mut self, key: TimerKey) -> Result<(), TimerError> {
        let Some(handle) = self.handles.get_mut(key) else {
            return Err(TimerError::InvalidHandle);
        };

        match &mut handle.state {
            HandleState::Armed(_) => {
                self.substrate.disarm(key);
                self.close(key, None, CloseReason::Cancelled);
                Ok(())
            }
            HandleState::Firing { cancel_requested } => {
                if *cancel_requested {
                    return Err(TimerError::InvalidHandle);
                }
                *cancel_requested = true;
                self.substrate.disarm(key);
                debug!(
                    target: "timers",
                    "cancel of timer {} deferred until its callback returns",
                    key
                );
                Ok(())
            }
        }
    }

    /// Move an armed handle to `Firing` and lend its closure to the caller.
    ///
    /// Returns `None` when the key no longer resolves to an armed handle, e.g. because an
    /// earlier callback in the same poll batch canceled it.
    pub fn begin_fire(&mut self, key: TimerKey) -> Option<C> {
        let handle = self.handles.get_mut(key)?;
        if !matches!(handle.state, HandleState::Armed(_)) {
            return None;
        }
        match std::mem::replace(
            &mut handle.state,
            HandleState::Firing {
                cancel_requested: false,
            },
        ) {
            HandleState::Armed(closure) => Some(closure),
            HandleState::Firing { .. } => None,
        }
    }

    /// Return the closure after its invocation and settle the handle
    pub fn finish_fire(&mut self, key: TimerKey, closure: C) -> FireOutcome {
        let reason = match self.handles.get(key) {
            None => {
                warn!(target: "timers", "timer {} closed while its callback was running", key);
                self.reaper.release_orphan(key, closure);
                return FireOutcome::Closed(CloseReason::Shutdown);
            }
            Some(handle) => match (&handle.state, handle.kind) {
                (HandleState::Firing { cancel_requested: true }, _) => Some(CloseReason::Cancelled),
                (HandleState::Firing { .. }, TimerKind::Once) => Some(CloseReason::Completed),
                (HandleState::Firing { .. }, TimerKind::Repeating { .. }) => None,
                (HandleState::Armed(_), _) => {
                    error!(target: "timers", "timer {} finished firing without being fired", key);
                    self.reaper.release_orphan(key, closure);
                    return FireOutcome::Rearmed;
                }
            },
        };

        match reason {
            Some(reason) => {
                self.close(key, Some(closure), reason);
                FireOutcome::Closed(reason)
            }
            None => {
                if let Some(handle) = self.handles.get_mut(key) {
                    handle.state = HandleState::Armed(closure);
                }
                FireOutcome::Rearmed
            }
        }
    }

    fn close(&mut self, key: TimerKey, returned: Option<C>, reason: CloseReason) -> bool {
        match self.handles.remove(key) {
            Some(handle) => {
                self.reaper.reap(key, handle, returned, reason);
                true
            }
            None => {
                if let Some(closure) = returned {
                    self.reaper.release_orphan(key, closure);
                }
                false
            }
        }
    }

    /// Poll the substrate for due keys; see [`EventSubstrate::poll`]
    pub fn poll(&mut self, wait: Option<Duration>) -> Vec<TimerKey> {
        self.substrate.poll(wait)
    }

    /// Whether the substrate still has armed work
    pub fn is_alive(&self) -> bool {
        self.substrate.is_alive()
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.substrate.next_deadline()
    }

    pub fn lifecycle(&self, key: TimerKey) -> Lifecycle {
        self.handles
            .get(key)
            .map_or(Lifecycle::Closed, TimerHandle::lifecycle)
    }

    /// Take the unrecoverable failure recorded by a schedule call, if any
    pub fn take_fatal(&mut self) -> Option<TimerError> {
        self.fatal.take()
    }

    pub fn live_count(&self) -> usize {
        self.handles.len()
    }

    /// Total handles ever scheduled
    pub fn scheduled_count(&self) -> u64 {
        self.scheduled
    }

    pub fn stats(&self) -> ReaperStats {
        self.reaper.stats()
    }

    /// Close every live handle. Returns how many were closed.
    pub fn shutdown(&mut self) -> usize {
        if self.handles.is_empty() {
            return 0;
        }
        let keys = self.handles.keys();
        for key in &keys {
            self.substrate.disarm(*key);
            self.close(*key, None, CloseReason::Shutdown);
        }
        debug!(target: "timers", "closed {} live timers on shutdown", keys.len());
        keys.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::{ManualClock, TimerQueue};
    use std::cell::Cell;
    use std::rc::Rc;

    /// Closure stand-in that counts how often it is dropped
    struct Tracked(Rc<Cell<u32>>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    fn registry(limit: usize) -> (Rc<ManualClock>, TimerRegistry<Tracked>) {
        let clock = Rc::new(ManualClock::new(0));
        let queue = TimerQueue::new(clock.clone());
        let registry = TimerRegistry::new(Box::new(queue), NonZeroUsize::new(limit).unwrap());
        (clock, registry)
    }

    fn tracked() -> (Rc<Cell<u32>>, Tracked) {
        let drops = Rc::new(Cell::new(0));
        (drops.clone(), Tracked(drops))
    }

    fn fire_all(registry: &mut TimerRegistry<Tracked>) -> Vec<(TimerKey, FireOutcome)> {
        let mut outcomes = Vec::new();
        for key in registry.poll(None) {
            if let Some(closure) = registry.begin_fire(key) {
                outcomes.push((key, registry.finish_fire(key, closure)));
            }
        }
        outcomes
    }

    #[test]
    fn test_one_shot_fires_once_then_invalid() {
        let (clock, mut registry) = registry(8);
        let (drops, closure) = tracked();
        let key = registry.schedule_once(closure, Duration::from_millis(5)).unwrap();

        clock.advance(5);
        let outcomes = fire_all(&mut registry);
        assert_eq!(outcomes, vec![(key, FireOutcome::Closed(CloseReason::Completed))]);
        assert_eq!(drops.get(), 1);
        assert_eq!(registry.lifecycle(key), Lifecycle::Closed);
        assert_eq!(registry.cancel(key), Err(TimerError::InvalidHandle));

        clock.advance(100);
        assert!(fire_all(&mut registry).is_empty());
        assert!(!registry.is_alive());
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_cancel_twice() {
        let (_clock, mut registry) = registry(8);
        let (drops, closure) = tracked();
        let key = registry.schedule_once(closure, Duration::from_secs(10)).unwrap();

        assert_eq!(registry.cancel(key), Ok(()));
        assert_eq!(drops.get(), 1);
        assert_eq!(registry.cancel(key), Err(TimerError::InvalidHandle));
        assert_eq!(drops.get(), 1);
        assert_eq!(registry.live_count(), 0);
        assert!(!registry.is_alive());
    }

    #[test]
    fn test_cancel_before_poll_never_fires() {
        let (_clock, mut registry) = registry(8);
        let (_drops, closure) = tracked();
        let key = registry.schedule_once(closure, Duration::ZERO).unwrap();
        registry.cancel(key).unwrap();
        assert!(fire_all(&mut registry).is_empty());
        assert_eq!(registry.stats().cancelled, 1);
        assert_eq!(registry.stats().completed, 0);
    }

    #[test]
    fn test_repeating_cancel_after_n_fires() {
        for n in 0..4u64 {
            let (clock, mut registry) = registry(8);
            let (drops, closure) = tracked();
            let key = registry
                .schedule_repeating(closure, Duration::from_millis(10))
                .unwrap();

            let mut fired = 0;
            for _ in 0..n {
                clock.advance(10);
                fired += fire_all(&mut registry).len() as u64;
            }
            assert_eq!(fired, n);
            assert_eq!(drops.get(), 0);

            registry.cancel(key).unwrap();
            clock.advance(1000);
            assert!(fire_all(&mut registry).is_empty(), "fire {} after cancel", n + 1);
            assert_eq!(drops.get(), 1);
        }
    }

    #[test]
    fn test_zero_period_rejected() {
        let (_clock, mut registry) = registry(8);
        let (drops, closure) = tracked();
        let err = registry
            .schedule_repeating(closure, Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, TimerError::InvalidDelay(_)));
        assert_eq!(drops.get(), 1, "rejected closure is not retained");
        assert!(!registry.is_alive());
        assert_eq!(registry.scheduled_count(), 0);
    }

    #[test]
    fn test_cancel_while_firing_is_deferred() {
        let (clock, mut registry) = registry(8);
        let (drops, closure) = tracked();
        let key = registry
            .schedule_repeating(closure, Duration::from_millis(10))
            .unwrap();

        clock.advance(10);
        let due = registry.poll(None);
        assert_eq!(due, vec![key]);
        let closure = registry.begin_fire(key).unwrap();
        assert_eq!(registry.lifecycle(key), Lifecycle::Firing);

        // The callback clears its own interval.
        assert_eq!(registry.cancel(key), Ok(()));
        assert_eq!(registry.cancel(key), Err(TimerError::InvalidHandle));
        assert_eq!(drops.get(), 0, "in-flight closure must not be released");

        assert_eq!(
            registry.finish_fire(key, closure),
            FireOutcome::Closed(CloseReason::Cancelled)
        );
        assert_eq!(drops.get(), 1);
        assert!(!registry.is_alive());
    }

    #[test]
    fn test_begin_fire_skips_canceled_in_same_batch() {
        let (clock, mut registry) = registry(8);
        let (_a_drops, a) = tracked();
        let (b_drops, b) = tracked();
        let first = registry.schedule_once(a, Duration::from_millis(1)).unwrap();
        let second = registry.schedule_once(b, Duration::from_millis(1)).unwrap();

        clock.advance(1);
        let due = registry.poll(None);
        assert_eq!(due, vec![first, second]);

        let closure = registry.begin_fire(first).unwrap();
        registry.cancel(second).unwrap();
        registry.finish_fire(first, closure);

        assert!(registry.begin_fire(second).is_none());
        assert_eq!(b_drops.get(), 1);
    }

    #[test]
    fn test_capacity_exhaustion_is_fatal() {
        let (_clock, mut registry) = registry(1);
        let (_a, a) = tracked();
        let (b_drops, b) = tracked();
        registry.schedule_once(a, Duration::ZERO).unwrap();
        let err = registry.schedule_once(b, Duration::ZERO).unwrap_err();
        assert_eq!(err, TimerError::CapacityExhausted(1));
        assert_eq!(b_drops.get(), 1);
        assert_eq!(registry.take_fatal(), Some(TimerError::CapacityExhausted(1)));
        assert_eq!(registry.take_fatal(), None);
    }

    #[test]
    fn test_shutdown_releases_everything_once() {
        let (_clock, mut registry) = registry(8);
        let mut counters = Vec::new();
        for delay in [0, 10, 1000] {
            let (drops, closure) = tracked();
            registry
                .schedule_once(closure, Duration::from_millis(delay))
                .unwrap();
            counters.push(drops);
        }
        let (drops, closure) = tracked();
        registry
            .schedule_repeating(closure, Duration::from_millis(5))
            .unwrap();
        counters.push(drops);

        assert_eq!(registry.shutdown(), 4);
        assert!(counters.iter().all(|c| c.get() == 1));
        assert!(!registry.is_alive());
        assert_eq!(registry.shutdown(), 0);

        let stats = registry.stats();
        assert_eq!(stats.shutdown, 4);
        assert_eq!(stats.closures_released, 4);
        assert_eq!(stats.total_closed(), registry.scheduled_count());
    }

    #[test]
    fn test_forged_key_is_invalid() {
        let (_clock, mut registry) = registry(8);
        let (_drops, closure) = tracked();
        let key = registry.schedule_once(closure, Duration::ZERO).unwrap();
        let forged = TimerKey::from_parts(key.slot(), key.generation() + 1);
        assert_eq!(registry.cancel(forged), Err(TimerError::InvalidHandle));
        assert_eq!(registry.lifecycle(key), Lifecycle::Armed);
    }
}
