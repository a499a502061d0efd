//! Generational slab backing the timer handle table.

use std::fmt;
use std::num::NonZeroUsize;

/// Opaque identity of one scheduled timer: slot index plus the generation the slot had when
/// the handle was allocated. A retired identity never resolves again, even after its slot is
/// reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey {
    slot: u32,
    generation: u32,
}

impl TimerKey {
    /// Rebuild a key from its parts (e.g. from a script token). The result is only meaningful
    /// if the registry still recognizes it.
    pub fn from_parts(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    pub fn slot(self) -> u32 {
        self.slot
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.slot, self.generation)
    }
}

enum Entry<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
    /// Generation space exhausted; the slot is never handed out again
    Retired,
}

/// Growable slab with an intrusive free list and a hard upper bound on live entries
pub struct Slab<T> {
    entries: Vec<Entry<T>>,
    free_head: Option<u32>,
    len: usize,
    limit: usize,
}

impl<T> Slab<T> {
    /// Create an empty slab that will hold at most `limit` live entries.
    ///
    /// The limit is clamped to the addressable slot range.
    pub fn with_limit(limit: NonZeroUsize) -> Self {
        Self {
            entries: Vec::new(),
            free_head: None,
            len: 0,
            limit: limit.get().min(u32::MAX as usize),
        }
    }

    /// Store `value`, reusing a free slot when one exists.
    ///
    /// Returns `None` when the limit is reached.
    pub fn insert(&mut self, value: T) -> Option<TimerKey> {
        if self.len >= self.limit {
            return None;
        }

        let key = match self.free_head {
            Some(slot) => {
                let entry = &mut self.entries[slot as usize];
                let (generation, next_free) = match entry {
                    Entry::Vacant {
                        generation,
                        next_free,
                    } => (*generation, *next_free),
                    Entry::Occupied { .. } | Entry::Retired => {
                        unreachable!("free_head must point to a vacant slot")
                    }
                };
                self.free_head = next_free;
                *entry = Entry::Occupied { generation, value };
                TimerKey { slot, generation }
            }
            None => {
                let slot = u32::try_from(self.entries.len()).ok()?;
                self.entries.push(Entry::Occupied {
                    generation: 0,
                    value,
                });
                TimerKey {
                    slot,
                    generation: 0,
                }
            }
        };

        self.len += 1;
        Some(key)
    }

    pub fn get(&self, key: TimerKey) -> Option<&T> {
        match self.entries.get(key.slot as usize)? {
            Entry::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: TimerKey) -> Option<&mut T> {
        match self.entries.get_mut(key.slot as usize)? {
            Entry::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    /// Move the value out and retire the key. The slot's generation is bumped so `key` is never
    /// recognized again; a slot whose generation would wrap is retired for good instead.
    pub fn remove(&mut self, key: TimerKey) -> Option<T> {
        let entry = self.entries.get_mut(key.slot as usize)?;
        match entry {
            Entry::Occupied { generation, .. } if *generation == key.generation => {}
            _ => return None,
        }

        let next = match key.generation.checked_add(1) {
            Some(generation) => Entry::Vacant {
                generation,
                next_free: self.free_head,
            },
            None => Entry::Retired,
        };
        let reusable = matches!(next, Entry::Vacant { .. });
        let value = match std::mem::replace(entry, next) {
            Entry::Occupied { value, .. } => value,
            Entry::Vacant { .. } | Entry::Retired => {
                unreachable!("entry was checked to be occupied")
            }
        };
        if reusable {
            self.free_head = Some(key.slot);
        }
        self.len -= 1;
        Some(value)
    }

    /// Keys of all live entries, in slot order
    pub fn keys(&self) -> Vec<TimerKey> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| match entry {
                Entry::Occupied { generation, .. } => Some(TimerKey {
                    slot: slot as u32,
                    generation: *generation,
                }),
                Entry::Vacant { .. } | Entry::Retired => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slab(limit: usize) -> Slab<&'static str> {
        Slab::with_limit(NonZeroUsize::new(limit).unwrap())
    }

    #[test]
    fn test_stale_key_rejected_after_reuse() {
        let mut slab = slab(1);
        let first = slab.insert("a").unwrap();
        assert_eq!(slab.remove(first), Some("a"));

        let second = slab.insert("b").unwrap();
        assert_eq!(first.slot(), second.slot());
        assert_ne!(first.generation(), second.generation());

        assert!(slab.get(first).is_none());
        assert!(slab.remove(first).is_none());
        assert_eq!(slab.get(second), Some(&"b"));
    }

    #[test]
    fn test_remove_is_single_shot() {
        let mut slab = slab(4);
        let key = slab.insert("a").unwrap();
        assert!(slab.remove(key).is_some());
        assert!(slab.remove(key).is_none());
        assert!(slab.is_empty());
    }

    #[test]
    fn test_limit_enforced() {
        let mut slab = slab(2);
        let a = slab.insert("a").unwrap();
        slab.insert("b").unwrap();
        assert!(slab.insert("c").is_none(), "should fail when the slab is full");

        slab.remove(a);
        assert!(slab.insert("c").is_some());
        assert_eq!(slab.len(), 2);
    }

    #[test]
    fn test_forged_key_out_of_range() {
        let mut slab = slab(2);
        slab.insert("a").unwrap();
        assert!(slab.get(TimerKey::from_parts(17, 0)).is_none());
        assert!(slab.get_mut(TimerKey::from_parts(0, 9)).is_none());
    }

    #[test]
    fn test_exhausted_slot_is_retired() {
        let mut slab = slab(2);
        slab.entries.push(Entry::Vacant {
            generation: u32::MAX,
            next_free: None,
        });
        slab.free_head = Some(0);

        let last = slab.insert("a").unwrap();
        assert_eq!(last.generation(), u32::MAX);
        assert_eq!(slab.remove(last), Some("a"));

        // The slot never comes back, so no later key can alias the old one.
        let next = slab.insert("b").unwrap();
        assert_eq!(next.slot(), 1);
        assert!(slab.get(last).is_none());
        assert!(slab.get(TimerKey::from_parts(0, 0)).is_none());
        assert_eq!(slab.keys(), vec![next]);
        assert_eq!(slab.len(), 1);
    }

    #[test]
    fn test_keys_lists_live_entries() {
        let mut slab = slab(3);
        let a = slab.insert("a").unwrap();
        let b = slab.insert("b").unwrap();
        let c = slab.insert("c").unwrap();
        slab.remove(b);
        assert_eq!(slab.keys(), vec![a, c]);
    }
}
