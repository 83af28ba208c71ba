//! Eviction scoring
//!
//! Priority-weighted LRU: a slot becomes a better eviction candidate the
//! longer it sits unused and the lower its priority is. Locked slots are
//! never candidates.

use std::cmp::Ordering;

use texslot_scheduler::Timestamp;

use crate::slot::{Slot, SlotIndex, SlotTable};

/// Where a cache miss should land
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Victim {
    /// An empty slot is free to take
    Empty(SlotIndex),
    /// The occupant of this slot should be evicted
    Evict(SlotIndex),
    /// Nothing may be displaced for the incoming priority
    Exhausted,
}

/// Priority-weighted LRU scoring
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvictionPolicy {
    decay_rate: f64,
}

impl EvictionPolicy {
    /// Create a policy where each idle millisecond adds `decay_rate` to the
    /// eviction score
    pub fn new(decay_rate: f64) -> Self {
        Self { decay_rate }
    }

    /// Idle-time weight per millisecond
    pub fn decay_rate(&self) -> f64 {
        self.decay_rate
    }

    /// Eviction desirability of `slot`; higher means evict sooner
    ///
    /// `None` for empty or locked slots, which are never evicted.
    pub fn score(&self, slot: &Slot, now: Timestamp) -> Option<f64> {
        if !slot.is_evictable() {
            return None;
        }
        Some(-f64::from(slot.priority()) + slot.idle_for(now) as f64 * self.decay_rate)
    }

    /// Pick the slot a miss at `incoming` priority should use
    ///
    /// An empty slot wins outright. Otherwise the highest-scoring unlocked
    /// slot whose priority is strictly below `incoming` is chosen, ties going
    /// to the lowest index. A request never displaces something at least as
    /// important as itself.
    pub fn select_victim(&self, table: &SlotTable, incoming: f32, now: Timestamp) -> Victim {
        if let Some(index) = table.first_empty(table.pool_range()) {
            return Victim::Empty(index);
        }

        let mut best: Option<(SlotIndex, f64)> = None;
        for slot in table.pool() {
            if incoming.partial_cmp(&slot.priority()) != Some(Ordering::Greater) {
                continue;
            }
            let Some(score) = self.score(slot, now) else {
                continue;
            };
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((slot.index(), score));
            }
        }

        match best {
            Some((index, _)) => Victim::Evict(index),
            None => Victim::Exhausted,
        }
    }

    /// Unlocked occupied slot with the oldest `last_used`, ignoring priority
    ///
    /// Ties go to the lowest index.
    pub fn least_recently_used(&self, table: &SlotTable) -> Option<SlotIndex> {
        table
            .pool()
            .iter()
            .filter(|slot| slot.is_evictable())
            .min_by_key(|slot| (slot.last_used(), slot.index()))
            .map(Slot::index)
    }
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::new(0.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::TextureHandle;

    fn full_table(priorities: &[(f32, Timestamp)]) -> SlotTable {
        let mut table = SlotTable::new(priorities.len() + 1, 1).unwrap();
        for (offset, &(priority, last_used)) in priorities.iter().enumerate() {
            table.occupy(
                offset + 1,
                TextureHandle::new(offset as u64),
                priority,
                last_used,
            );
        }
        table
    }

    #[test]
    fn test_empty_slot_preferred() {
        let mut table = SlotTable::new(4, 1).unwrap();
        table.occupy(1, TextureHandle::new(1), 0.1, 0);

        let policy = EvictionPolicy::default();
        assert_eq!(policy.select_victim(&table, 0.0, 1000), Victim::Empty(2));
    }

    #[test]
    fn test_score_weighs_age_against_priority() {
        let table = full_table(&[(1.0, 0), (1.0, 900)]);
        let policy = EvictionPolicy::new(0.1);

        let old = policy.score(table.slot(1).unwrap(), 1000).unwrap();
        let fresh = policy.score(table.slot(2).unwrap(), 1000).unwrap();
        assert!((old - 99.0).abs() < 1e-9);
        assert!((fresh - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_oldest_lowest_priority_is_victim() {
        let table = full_table(&[(1.0, 500), (1.0, 100), (1.0, 300)]);
        let policy = EvictionPolicy::default();
        assert_eq!(policy.select_victim(&table, 2.0, 1000), Victim::Evict(2));
    }

    #[test]
    fn test_incoming_must_strictly_exceed() {
        let table = full_table(&[(1.0, 0), (1.5, 0)]);
        let policy = EvictionPolicy::default();

        assert_eq!(policy.select_victim(&table, 1.0, 10_000), Victim::Exhausted);
        assert_eq!(policy.select_victim(&table, 1.2, 10_000), Victim::Evict(1));
    }

    #[test]
    fn test_ineligible_high_score_does_not_block() {
        // Slot 1 scores highest thanks to its age but outranks the request;
        // slot 2 is lower priority and still eligible.
        let table = full_table(&[(2.0, 0), (0.5, 9_000)]);
        let policy = EvictionPolicy::default();
        assert_eq!(policy.select_victim(&table, 1.0, 10_000), Victim::Evict(2));
    }

    #[test]
    fn test_locked_never_selected() {
        let mut table = full_table(&[(0.1, 0), (0.1, 0)]);
        table.set_locked(1, true);
        table.set_locked(2, true);

        let policy = EvictionPolicy::default();
        assert_eq!(policy.select_victim(&table, 100.0, 1_000_000), Victim::Exhausted);
        assert_eq!(policy.least_recently_used(&table), None);
        assert_eq!(policy.score(table.slot(1).unwrap(), 0), None);
    }

    #[test]
    fn test_least_recently_used_ignores_priority() {
        let table = full_table(&[(9.0, 10), (0.1, 20)]);
        let policy = EvictionPolicy::default();
        assert_eq!(policy.least_recently_used(&table), Some(1));
    }

    #[test]
    fn test_ties_go_to_lowest_index() {
        let table = full_table(&[(1.0, 0), (1.0, 0), (1.0, 0)]);
        let policy = EvictionPolicy::default();
        assert_eq!(policy.select_victim(&table, 2.0, 0), Victim::Evict(1));
        assert_eq!(policy.least_recently_used(&table), Some(1));
    }
}
