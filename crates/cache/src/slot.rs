//! Texture unit slot table
//!
//! Fixed-size array of binding slots plus the reverse index from texture
//! handle to slot. This module holds state only; deciding which slot to use
//! is the job of the [`Allocator`](crate::Allocator) and
//! [`EvictionPolicy`](crate::EvictionPolicy).

use std::collections::HashMap;
use std::ops::Range;

use texslot_scheduler::Timestamp;

use crate::error::CacheError;

/// Index of a hardware texture unit
pub type SlotIndex = usize;

/// Opaque identifier of a GPU texture
///
/// Handles are compared for equality only; they carry no ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(u64);

impl TextureHandle {
    /// Wrap a backend-specific texture id
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The backend-specific texture id
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// One hardware binding point
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    index: SlotIndex,
    occupant: Option<TextureHandle>,
    last_used: Timestamp,
    priority: f32,
    locked: bool,
    bind_count: u64,
}

impl Slot {
    fn empty(index: SlotIndex) -> Self {
        Self {
            index,
            occupant: None,
            last_used: 0,
            priority: 0.0,
            locked: false,
            bind_count: 0,
        }
    }

    /// Position of this slot in the table
    pub fn index(&self) -> SlotIndex {
        self.index
    }

    /// Texture currently bound here
    pub fn occupant(&self) -> Option<TextureHandle> {
        self.occupant
    }

    /// Last time the occupant was bound
    pub fn last_used(&self) -> Timestamp {
        self.last_used
    }

    /// Highest priority the occupant has been bound with
    pub fn priority(&self) -> f32 {
        self.priority
    }

    /// Whether the occupant is pinned
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Number of bind calls since the occupant arrived
    pub fn bind_count(&self) -> u64 {
        self.bind_count
    }

    /// Whether a texture is bound here
    pub fn is_occupied(&self) -> bool {
        self.occupant.is_some()
    }

    /// Occupied and not locked
    pub fn is_evictable(&self) -> bool {
        self.occupant.is_some() && !self.locked
    }

    /// Milliseconds since the occupant was last bound
    pub fn idle_for(&self, now: Timestamp) -> u64 {
        now.saturating_sub(self.last_used)
    }
}

/// Fixed set of texture units and the handle index kept in sync with it
///
/// Slots `[0, reserved)` belong to the host (render targets, lookup tables)
/// and are never handed out. Slots `[reserved, total)` form the allocatable
/// pool.
///
/// Invariant: `slots[i].occupant == Some(h)` if and only if
/// `active[h] == i`.
#[derive(Debug, Clone)]
pub struct SlotTable {
    slots: Vec<Slot>,
    reserved: usize,
    active: HashMap<TextureHandle, SlotIndex>,
}

impl SlotTable {
    /// Create a table of `total` units with the first `reserved` held back
    ///
    /// Fails when no allocatable unit would remain.
    pub fn new(total: usize, reserved: usize) -> Result<Self, CacheError> {
        if reserved >= total {
            return Err(CacheError::CapacityMisconfiguration { reserved, total });
        }

        Ok(Self {
            slots: (0..total).map(Slot::empty).collect(),
            reserved,
            active: HashMap::with_capacity(total - reserved),
        })
    }

    /// Total number of units, reserved included
    pub fn total(&self) -> usize {
        self.slots.len()
    }

    /// Number of units held back from allocation
    pub fn reserved(&self) -> usize {
        self.reserved
    }

    /// Number of allocatable units
    pub fn available(&self) -> usize {
        self.slots.len() - self.reserved
    }

    /// Index range of the allocatable pool
    pub fn pool_range(&self) -> Range<SlotIndex> {
        self.reserved..self.slots.len()
    }

    /// Slots of the allocatable pool
    pub fn pool(&self) -> &[Slot] {
        &self.slots[self.reserved..]
    }

    /// Every slot, reserved included
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Slot at `index`
    pub fn slot(&self, index: SlotIndex) -> Option<&Slot> {
        self.slots.get(index)
    }

    /// Slot holding `handle`, if bound
    pub fn slot_for(&self, handle: TextureHandle) -> Option<SlotIndex> {
        self.active.get(&handle).copied()
    }

    /// First empty, unlocked slot inside `range`
    pub fn first_empty(&self, range: Range<SlotIndex>) -> Option<SlotIndex> {
        let end = range.end.min(self.slots.len());
        let start = range.start.min(end);
        self.slots[start..end]
            .iter()
            .find(|slot| !slot.is_occupied() && !slot.locked)
            .map(Slot::index)
    }

    /// Bind `handle` into the empty slot at `index`
    pub fn occupy(&mut self, index: SlotIndex, handle: TextureHandle, priority: f32, now: Timestamp) {
        debug_assert!(index >= self.reserved, "occupying reserved unit {index}");
        debug_assert!(
            !self.active.contains_key(&handle),
            "{handle:?} is already bound"
        );

        let slot = &mut self.slots[index];
        debug_assert!(slot.occupant.is_none(), "unit {index} is occupied");
        slot.occupant = Some(handle);
        slot.last_used = now;
        slot.priority = priority;
        slot.locked = false;
        slot.bind_count = 1;
        self.active.insert(handle, index);
    }

    /// Re-seat a previously resident slot's state at `index`
    ///
    /// Used by compaction, which keeps every attribute of the occupant.
    pub(crate) fn restore(&mut self, index: SlotIndex, resident: &Slot) {
        if let Some(handle) = resident.occupant {
            self.occupy(index, handle, resident.priority, resident.last_used);
            let slot = &mut self.slots[index];
            slot.locked = resident.locked;
            slot.bind_count = resident.bind_count;
        }
    }

    /// Record a cache hit on the slot at `index`
    pub fn touch(&mut self, index: SlotIndex, priority: f32, now: Timestamp) {
        let slot = &mut self.slots[index];
        slot.last_used = now;
        slot.priority = slot.priority.max(priority);
        slot.bind_count += 1;
    }

    /// Pin or unpin the slot at `index`
    pub fn set_locked(&mut self, index: SlotIndex, locked: bool) {
        self.slots[index].locked = locked;
    }

    /// Empty the slot at `index`, returning its former occupant
    pub fn vacate(&mut self, index: SlotIndex) -> Option<TextureHandle> {
        let slot = &mut self.slots[index];
        let handle = slot.occupant.take()?;
        slot.locked = false;
        slot.priority = 0.0;
        slot.bind_count = 0;
        self.active.remove(&handle);
        Some(handle)
    }

    /// Number of bound textures
    pub fn in_use(&self) -> usize {
        self.active.len()
    }

    /// Number of locked slots
    pub fn locked_count(&self) -> usize {
        self.pool().iter().filter(|slot| slot.locked).count()
    }

    /// Occupied slots of the pool in index order
    pub fn residents(&self) -> impl Iterator<Item = &Slot> {
        self.pool().iter().filter(|slot| slot.is_occupied())
    }

    /// Check the handle index against slot occupancy
    pub fn is_consistent(&self) -> bool {
        let occupied = self.slots.iter().filter(|slot| slot.is_occupied()).count();
        occupied == self.active.len()
            && occupied <= self.available()
            && self.active.iter().all(|(handle, &index)| {
                index >= self.reserved && self.slots[index].occupant == Some(*handle)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: u64) -> TextureHandle {
        TextureHandle::new(id)
    }

    #[test]
    fn test_new_partitions_pool() {
        let table = SlotTable::new(16, 2).unwrap();
        assert_eq!(table.total(), 16);
        assert_eq!(table.reserved(), 2);
        assert_eq!(table.available(), 14);
        assert_eq!(table.pool_range(), 2..16);
        assert_eq!(table.pool().len(), 14);
        assert_eq!(table.slot(5).unwrap().index(), 5);
    }

    #[test]
    fn test_reserved_must_leave_room() {
        assert_eq!(
            SlotTable::new(4, 4).unwrap_err(),
            CacheError::CapacityMisconfiguration {
                reserved: 4,
                total: 4
            }
        );
        assert!(SlotTable::new(0, 0).is_err());
        assert!(SlotTable::new(1, 0).is_ok());
    }

    #[test]
    fn test_occupy_and_vacate() {
        let mut table = SlotTable::new(4, 1).unwrap();

        table.occupy(2, handle(7), 0.5, 100);
        assert_eq!(table.slot_for(handle(7)), Some(2));
        let slot = table.slot(2).unwrap();
        assert_eq!(slot.occupant(), Some(handle(7)));
        assert_eq!(slot.last_used(), 100);
        assert_eq!(slot.bind_count(), 1);
        assert!(table.is_consistent());

        assert_eq!(table.vacate(2), Some(handle(7)));
        assert_eq!(table.slot_for(handle(7)), None);
        assert!(!table.slot(2).unwrap().is_occupied());
        assert_eq!(table.vacate(2), None);
        assert!(table.is_consistent());
    }

    #[test]
    fn test_first_empty_respects_range() {
        let mut table = SlotTable::new(5, 1).unwrap();
        assert_eq!(table.first_empty(table.pool_range()), Some(1));

        table.occupy(1, handle(1), 1.0, 0);
        table.occupy(2, handle(2), 1.0, 0);
        assert_eq!(table.first_empty(table.pool_range()), Some(3));
        assert_eq!(table.first_empty(1..3), None);
        assert_eq!(table.first_empty(3..99), Some(3));
    }

    #[test]
    fn test_touch_raises_priority_only() {
        let mut table = SlotTable::new(3, 0).unwrap();
        table.occupy(0, handle(1), 0.8, 10);

        table.touch(0, 0.2, 20);
        let slot = table.slot(0).unwrap();
        assert_eq!(slot.priority(), 0.8);
        assert_eq!(slot.last_used(), 20);
        assert_eq!(slot.bind_count(), 2);

        table.touch(0, 1.5, 30);
        assert_eq!(table.slot(0).unwrap().priority(), 1.5);
    }

    #[test]
    fn test_vacate_clears_lock() {
        let mut table = SlotTable::new(3, 0).unwrap();
        table.occupy(1, handle(1), 1.0, 0);
        table.set_locked(1, true);
        assert_eq!(table.locked_count(), 1);
        assert!(!table.slot(1).unwrap().is_evictable());

        table.vacate(1);
        assert_eq!(table.locked_count(), 0);
        assert!(!table.slot(1).unwrap().is_locked());
    }

    #[test]
    fn test_restore_keeps_attributes() {
        let mut table = SlotTable::new(4, 0).unwrap();
        table.occupy(3, handle(9), 0.7, 42);
        table.touch(3, 0.7, 50);
        table.set_locked(3, true);
        let resident = table.slot(3).unwrap().clone();

        table.vacate(3);
        table.restore(0, &resident);

        let slot = table.slot(0).unwrap();
        assert_eq!(slot.occupant(), Some(handle(9)));
        assert_eq!(slot.last_used(), 50);
        assert_eq!(slot.bind_count(), 2);
        assert!(slot.is_locked());
        assert_eq!(table.slot_for(handle(9)), Some(0));
    }

    #[test]
    fn test_idle_for_saturates() {
        let mut table = SlotTable::new(2, 0).unwrap();
        table.occupy(0, handle(1), 1.0, 500);
        let slot = table.slot(0).unwrap();
        assert_eq!(slot.idle_for(1500), 1000);
        assert_eq!(slot.idle_for(100), 0);
    }
}
