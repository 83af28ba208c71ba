//! Texture unit allocation
//!
//! Binds handles to slots: the hit path refreshes an existing binding, the
//! miss path takes an empty unit or evicts the occupant chosen by the
//! [`EvictionPolicy`]. The allocator never talks to the GPU; evicted handles
//! are returned so the owner can release them.

use tracing::{debug, trace};

use texslot_scheduler::Timestamp;

use crate::error::CacheError;
use crate::eviction::{EvictionPolicy, Victim};
use crate::slot::{Slot, SlotIndex, SlotTable, TextureHandle};
use crate::stats::StatsCollector;

/// Result of a successful bind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindOutcome {
    /// Unit now holding the texture
    pub slot: SlotIndex,
    /// The texture was already resident
    pub hit: bool,
    /// Texture displaced to make room; its GPU resource must be released
    pub evicted: Option<TextureHandle>,
}

/// Slot allocator combining the slot table with an eviction policy
#[derive(Debug, Clone)]
pub struct Allocator {
    table: SlotTable,
    policy: EvictionPolicy,
}

impl Allocator {
    /// Create an allocator over `table`
    pub fn new(table: SlotTable, policy: EvictionPolicy) -> Self {
        Self { table, policy }
    }

    /// The underlying slot table
    pub fn table(&self) -> &SlotTable {
        &self.table
    }

    /// The eviction policy in use
    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    /// Unit currently holding `handle`
    pub fn slot_of(&self, handle: TextureHandle) -> Option<SlotIndex> {
        self.table.slot_for(handle)
    }

    /// Bind `handle` at `priority`
    ///
    /// A resident handle has its `last_used` refreshed and its priority raised
    /// to the highest seen. Otherwise an empty unit is used, or the victim
    /// picked by the policy is evicted. Fails with
    /// [`CacheError::ResourceExhausted`] when every candidate is locked or at
    /// least as important as `priority`; the caller decides whether to sweep
    /// and retry.
    ///
    /// A NaN priority is treated as the lowest possible priority.
    pub fn bind(
        &mut self,
        handle: TextureHandle,
        priority: f32,
        now: Timestamp,
        stats: &mut StatsCollector,
    ) -> Result<BindOutcome, CacheError> {
        let priority = if priority.is_nan() {
            f32::NEG_INFINITY
        } else {
            priority
        };
        stats.bind_calls += 1;

        if let Some(slot) = self.table.slot_for(handle) {
            self.table.touch(slot, priority, now);
            stats.cache_hits += 1;
            trace!(?handle, slot, "texture unit hit");
            return Ok(BindOutcome {
                slot,
                hit: true,
                evicted: None,
            });
        }

        stats.cache_misses += 1;

        let (slot, evicted) = match self.policy.select_victim(&self.table, priority, now) {
            Victim::Empty(slot) => (slot, None),
            Victim::Evict(slot) => {
                let evicted = self.table.vacate(slot);
                stats.evictions += 1;
                debug!(?handle, ?evicted, slot, priority, "evicted texture unit occupant");
                (slot, evicted)
            }
            Victim::Exhausted => {
                return Err(CacheError::ResourceExhausted { handle, priority });
            }
        };

        self.table.occupy(slot, handle, priority, now);
        Ok(BindOutcome {
            slot,
            hit: false,
            evicted,
        })
    }

    /// Remove `handle` without counting an eviction
    pub fn unbind(&mut self, handle: TextureHandle) -> Option<SlotIndex> {
        let slot = self.table.slot_for(handle)?;
        self.table.vacate(slot);
        Some(slot)
    }

    /// Pin `handle` against every eviction path
    ///
    /// Returns `false` if the handle is not bound.
    pub fn lock(&mut self, handle: TextureHandle) -> bool {
        self.set_locked(handle, true)
    }

    /// Make `handle` evictable again
    ///
    /// Returns `false` if the handle is not bound.
    pub fn unlock(&mut self, handle: TextureHandle) -> bool {
        self.set_locked(handle, false)
    }

    fn set_locked(&mut self, handle: TextureHandle, locked: bool) -> bool {
        match self.table.slot_for(handle) {
            Some(slot) => {
                self.table.set_locked(slot, locked);
                true
            }
            None => false,
        }
    }

    /// Whether `handle` is bound and pinned
    pub fn is_locked(&self, handle: TextureHandle) -> bool {
        self.table
            .slot_for(handle)
            .and_then(|slot| self.table.slot(slot))
            .is_some_and(Slot::is_locked)
    }

    /// Evict the unlocked occupant with the oldest `last_used`, regardless
    /// of priority
    pub fn evict_least_recently_used(
        &mut self,
        stats: &mut StatsCollector,
    ) -> Option<(SlotIndex, TextureHandle)> {
        let slot = self.policy.least_recently_used(&self.table)?;
        let handle = self.table.vacate(slot)?;
        stats.evictions += 1;
        debug!(?handle, slot, "evicted least recently used texture");
        Some((slot, handle))
    }

    /// Evict every unlocked occupant matching `predicate`
    pub fn evict_where(
        &mut self,
        stats: &mut StatsCollector,
        predicate: impl Fn(&Slot) -> bool,
    ) -> Vec<TextureHandle> {
        let victims: Vec<SlotIndex> = self
            .table
            .pool()
            .iter()
            .filter(|slot| slot.is_evictable() && predicate(slot))
            .map(Slot::index)
            .collect();

        let evicted: Vec<TextureHandle> = victims
            .into_iter()
            .filter_map(|slot| self.table.vacate(slot))
            .collect();
        stats.evictions += evicted.len() as u64;
        evicted
    }

    /// Vacate every unit, locked ones included
    pub fn evict_all(&mut self) -> Vec<TextureHandle> {
        self.table
            .pool_range()
            .filter_map(|slot| self.table.vacate(slot))
            .collect()
    }

    /// Re-seat resident textures by descending priority from the lowest
    /// allocatable unit
    ///
    /// Residency, priorities, lock state and usage history are preserved;
    /// only unit assignment changes. Equal priorities keep their relative
    /// order. Returns the textures that moved with their new units.
    pub fn optimize(&mut self) -> Vec<(SlotIndex, TextureHandle)> {
        let mut residents: Vec<Slot> = self.table.residents().cloned().collect();
        residents.sort_by(|a, b| b.priority().total_cmp(&a.priority()));

        for resident in &residents {
            self.table.vacate(resident.index());
        }

        let mut moved = Vec::new();
        for (target, resident) in self.table.pool_range().zip(residents.iter()) {
            self.table.restore(target, resident);
            if target == resident.index() {
                continue;
            }
            if let Some(handle) = resident.occupant() {
                moved.push((target, handle));
            }
        }

        debug_assert!(self.table.is_consistent());
        moved
    }
}
