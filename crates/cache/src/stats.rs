//! Cache counters and snapshots

use crate::memory_budget::{MemoryPressure, MemoryStats};
use crate::slot::SlotTable;

/// Running counters updated by every cache operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsCollector {
    /// Calls to `bind`, hits and misses alike
    pub bind_calls: u64,
    /// Binds that found the texture already resident
    pub cache_hits: u64,
    /// Binds that had to place the texture
    pub cache_misses: u64,
    /// Occupants removed to make room or reclaim memory
    pub evictions: u64,
    /// Textures delivered by the streaming loader
    pub streaming_loads: u64,
    /// Preload requests dropped because the queue was full
    pub queue_overflows: u64,
    /// Preload requests whose load failed
    pub loader_failures: u64,
    /// Garbage collection sweeps run
    pub gc_sweeps: u64,
    /// Memory checks that found the cache over its pressure threshold
    pub pressure_events: u64,
}

impl StatsCollector {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

/// Snapshot returned by `TextureUnitCache::stats`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub bind_calls: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evictions: u64,
    pub streaming_loads: u64,
    pub queue_overflows: u64,
    pub loader_failures: u64,
    pub gc_sweeps: u64,
    pub pressure_events: u64,

    /// Hardware units, reserved included
    pub units_total: usize,
    /// Units held back from allocation
    pub units_reserved: usize,
    /// Units with a texture bound
    pub units_in_use: usize,
    /// Units pinned against eviction
    pub units_locked: usize,

    /// Pending preload requests
    pub queue_length: usize,

    pub memory_allocated_bytes: u64,
    pub memory_used_bytes: u64,
    pub memory_utilization_pct: f64,
    pub memory_pressure: MemoryPressure,
}

impl CacheStats {
    pub(crate) fn collect(
        counters: &StatsCollector,
        table: &SlotTable,
        queue_length: usize,
        memory: &MemoryStats,
    ) -> Self {
        Self {
            bind_calls: counters.bind_calls,
            cache_hits: counters.cache_hits,
            cache_misses: counters.cache_misses,
            evictions: counters.evictions,
            streaming_loads: counters.streaming_loads,
            queue_overflows: counters.queue_overflows,
            loader_failures: counters.loader_failures,
            gc_sweeps: counters.gc_sweeps,
            pressure_events: counters.pressure_events,
            units_total: table.total(),
            units_reserved: table.reserved(),
            units_in_use: table.in_use(),
            units_locked: table.locked_count(),
            queue_length,
            memory_allocated_bytes: memory.allocated_bytes,
            memory_used_bytes: memory.used_bytes,
            memory_utilization_pct: memory.utilization_pct(),
            memory_pressure: memory.pressure(),
        }
    }

    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Allocatable units without a texture
    pub fn units_free(&self) -> usize {
        (self.units_total - self.units_reserved).saturating_sub(self.units_in_use)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_budget::MemoryMonitor;
    use crate::slot::TextureHandle;

    #[test]
    fn test_hit_rate() {
        let mut stats = StatsCollector::default();
        assert_eq!(stats.hit_rate(), 0.0);

        stats.cache_hits = 1;
        stats.cache_misses = 2;
        assert!((stats.hit_rate() - 0.333).abs() < 0.01);
    }

    #[test]
    fn test_collect_snapshot() {
        let mut table = SlotTable::new(8, 2).unwrap();
        table.occupy(2, TextureHandle::new(1), 1.0, 0);
        table.occupy(3, TextureHandle::new(2), 1.0, 0);
        table.set_locked(3, true);

        let mut monitor = MemoryMonitor::new(1_000, 0.85);
        monitor.record_size(TextureHandle::new(1), 250);
        let memory = monitor.sample(table.in_use());

        let counters = StatsCollector {
            bind_calls: 3,
            cache_hits: 1,
            cache_misses: 2,
            ..Default::default()
        };

        let stats = CacheStats::collect(&counters, &table, 4, &memory);
        assert_eq!(stats.units_total, 8);
        assert_eq!(stats.units_reserved, 2);
        assert_eq!(stats.units_in_use, 2);
        assert_eq!(stats.units_locked, 1);
        assert_eq!(stats.units_free(), 4);
        assert_eq!(stats.queue_length, 4);
        assert_eq!(stats.memory_used_bytes, 500);
        assert!((stats.memory_utilization_pct - 50.0).abs() < 1e-9);
        assert_eq!(stats.memory_pressure, MemoryPressure::Moderate);
        assert_eq!(stats.bind_calls, 3);
    }
}
