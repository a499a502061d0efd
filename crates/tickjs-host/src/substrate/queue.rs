use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use tracing::trace;

use super::{ClockHandle, EventSubstrate};
use crate::timer::TimerKey;

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at_ms: u64,
    seq: u64,
    key: TimerKey,
}

// Sequence numbers are unique, so (deadline, seq) is a total order that keeps arm order for ties.
impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.at_ms, self.seq).cmp(&(other.at_ms, other.seq))
    }
}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Deadline {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Deadline {}

#[derive(Debug, Clone, Copy)]
struct Armed {
    seq: u64,
    repeat_ms: Option<u64>,
}

/// Deadline heap with lazy invalidation.
///
/// A heap entry is live only while `armed[key].seq` matches it; disarming or re-arming leaves
/// the old entry behind and it is discarded when it reaches the top.
pub struct TimerQueue {
    clock: ClockHandle,
    seq: u64,
    heap: BinaryHeap<Reverse<Deadline>>,
    armed: HashMap<TimerKey, Armed>,
}

impl TimerQueue {
    pub fn new(clock: ClockHandle) -> Self {
        Self {
            clock,
            seq: 0,
            heap: BinaryHeap::new(),
            armed: HashMap::new(),
        }
    }

    fn next_seq(&mut self) -> u64 {
        let current = self.seq;
        self.seq = self.seq.wrapping_add(1);
        current
    }

    fn push(&mut self, key: TimerKey, at_ms: u64, repeat_ms: Option<u64>) {
        let seq = self.next_seq();
        self.armed.insert(key, Armed { seq, repeat_ms });
        self.heap.push(Reverse(Deadline { at_ms, seq, key }));
    }

    fn is_live(&self, deadline: &Deadline) -> bool {
        self.armed
            .get(&deadline.key)
            .is_some_and(|armed| armed.seq == deadline.seq)
    }

    // Keeps the heap top live so `next_deadline` can peek.
    fn prune_stale(&mut self) {
        while let Some(Reverse(top)) = self.heap.peek() {
            if self.is_live(top) {
                break;
            }
            self.heap.pop();
        }
    }
}

impl EventSubstrate for TimerQueue {
    fn arm(&mut self, key: TimerKey, delay: Duration, repeat: Option<Duration>) {
        let at_ms = self.clock.now_ms().saturating_add(duration_ms(delay));
        trace!(target: "timers", "arm {} at {}ms (repeat {:?})", key, at_ms, repeat);
        self.push(key, at_ms, repeat.map(duration_ms));
        self.prune_stale();
    }

    fn disarm(&mut self, key: TimerKey) -> bool {
        let was_armed = self.armed.remove(&key).is_some();
        self.prune_stale();
        was_armed
    }

    fn poll(&mut self, wait: Option<Duration>) -> Vec<TimerKey> {
        if let (Some(cap), Some(until)) = (wait, self.next_deadline()) {
            let wait_ms = duration_ms(until.min(cap));
            if wait_ms > 0 {
                trace!(target: "timers", "blocking poll for {}ms", wait_ms);
                self.clock.sleep_ms(wait_ms);
            }
        }

        let now = self.clock.now_ms();
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|Reverse(d)| d.at_ms <= now) {
            let Some(Reverse(entry)) = self.heap.pop() else {
                break;
            };
            let Some(armed) = self.armed.get(&entry.key).copied() else {
                continue;
            };
            if armed.seq != entry.seq {
                continue;
            }

            match armed.repeat_ms {
                // Period is never zero here, so the next deadline is strictly after `now`
                // and cannot be collected twice by this poll.
                Some(period) => self.push(entry.key, now.saturating_add(period), Some(period)),
                None => {
                    self.armed.remove(&entry.key);
                }
            }
            due.push(entry.key);
        }
        self.prune_stale();
        due
    }

    fn is_alive(&self) -> bool {
        !self.armed.is_empty()
    }

    fn next_deadline(&self) -> Option<Duration> {
        let Reverse(top) = self.heap.peek()?;
        let now = self.clock.now_ms();
        Some(Duration::from_millis(top.at_ms.saturating_sub(now)))
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::{Clock, ManualClock};
    use std::rc::Rc;

    fn queue() -> (Rc<ManualClock>, TimerQueue) {
        let clock = Rc::new(ManualClock::new(0));
        let queue = TimerQueue::new(clock.clone());
        (clock, queue)
    }

    fn key(slot: u32) -> TimerKey {
        TimerKey::from_parts(slot, 0)
    }

    #[test]
    fn test_fires_in_deadline_then_arm_order() {
        let (clock, mut q) = queue();
        q.arm(key(1), Duration::from_millis(20), None);
        q.arm(key(2), Duration::from_millis(10), None);
        q.arm(key(3), Duration::from_millis(10), None);

        clock.advance(20);
        assert_eq!(q.poll(None), vec![key(2), key(3), key(1)]);
        assert!(!q.is_alive());
    }

    #[test]
    fn test_not_due_yet() {
        let (clock, mut q) = queue();
        q.arm(key(1), Duration::from_millis(5), None);
        clock.advance(4);
        assert!(q.poll(None).is_empty());
        assert!(q.is_alive());
        assert_eq!(q.next_deadline(), Some(Duration::from_millis(1)));
    }

    #[test]
    fn test_zero_delay_due_on_first_poll() {
        let (_clock, mut q) = queue();
        q.arm(key(1), Duration::ZERO, None);
        assert_eq!(q.poll(None), vec![key(1)]);
    }

    #[test]
    fn test_disarm_prevents_fire() {
        let (clock, mut q) = queue();
        q.arm(key(1), Duration::ZERO, None);
        assert!(q.disarm(key(1)));
        assert!(!q.disarm(key(1)));
        clock.advance(1);
        assert!(q.poll(None).is_empty());
        assert!(!q.is_alive());
        assert_eq!(q.next_deadline(), None);
    }

    #[test]
    fn test_repeating_rearms_from_fire_time() {
        let (clock, mut q) = queue();
        q.arm(key(1), Duration::from_millis(10), Some(Duration::from_millis(10)));

        clock.advance(10);
        assert_eq!(q.poll(None), vec![key(1)]);
        // Late poll: next expiration is measured from the fire, not the original schedule.
        clock.advance(15);
        assert_eq!(q.poll(None), vec![key(1)]);
        clock.advance(9);
        assert!(q.poll(None).is_empty());
        clock.advance(1);
        assert_eq!(q.poll(None), vec![key(1)]);
        assert!(q.is_alive());
    }

    #[test]
    fn test_repeating_fires_once_per_poll() {
        let (clock, mut q) = queue();
        q.arm(key(1), Duration::from_millis(1), Some(Duration::from_millis(1)));
        clock.advance(100);
        assert_eq!(q.poll(None), vec![key(1)]);
    }

    #[test]
    fn test_rearm_replaces_schedule() {
        let (clock, mut q) = queue();
        q.arm(key(1), Duration::from_millis(5), None);
        q.arm(key(1), Duration::from_millis(50), None);
        clock.advance(5);
        assert!(q.poll(None).is_empty());
        clock.advance(45);
        assert_eq!(q.poll(None), vec![key(1)]);
    }

    #[test]
    fn test_blocking_poll_waits_for_deadline() {
        let (clock, mut q) = queue();
        q.arm(key(1), Duration::from_millis(30), None);
        assert_eq!(q.poll(Some(Duration::from_millis(1000))), vec![key(1)]);
        assert_eq!(clock.now_ms(), 30);
    }

    #[test]
    fn test_blocking_poll_respects_cap() {
        let (clock, mut q) = queue();
        q.arm(key(1), Duration::from_millis(30), None);
        assert!(q.poll(Some(Duration::from_millis(10))).is_empty());
        assert_eq!(clock.now_ms(), 10);
    }

    #[test]
    fn test_blocking_poll_without_timers_returns_immediately() {
        let (clock, mut q) = queue();
        assert!(q.poll(Some(Duration::from_millis(10))).is_empty());
        assert_eq!(clock.now_ms(), 0);
    }
}
