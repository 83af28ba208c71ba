//! Periodic reclamation sweeps
//!
//! Two sweeps remove occupants without an incoming request to compare
//! against, so neither applies the allocator's "must outrank" rule:
//!
//! - [`GcSweeper`]: routine removal of textures idle longer than a limit.
//! - [`PressureSweeper`]: emergency removal of low-priority textures when
//!   estimated video memory crosses the pressure threshold.
//!
//! Locked slots are skipped by both. Sweeps only remove, so they cannot fail.

use std::time::Duration;

use tracing::debug;

use texslot_scheduler::Timestamp;

use crate::allocator::Allocator;
use crate::slot::TextureHandle;
use crate::stats::StatsCollector;

/// Evicts textures that have not been bound for too long
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcSweeper {
    max_idle: Duration,
}

impl GcSweeper {
    /// Create a sweeper evicting textures idle for more than `max_idle`
    pub fn new(max_idle: Duration) -> Self {
        Self { max_idle }
    }

    /// Idle limit
    pub fn max_idle(&self) -> Duration {
        self.max_idle
    }

    /// Evict every unlocked texture idle strictly longer than the limit
    pub fn sweep(
        &self,
        allocator: &mut Allocator,
        now: Timestamp,
        stats: &mut StatsCollector,
    ) -> Vec<TextureHandle> {
        let max_idle = u64::try_from(self.max_idle.as_millis()).unwrap_or(u64::MAX);
        let evicted = allocator.evict_where(stats, |slot| slot.idle_for(now) > max_idle);
        stats.gc_sweeps += 1;
        debug!(evicted = evicted.len(), now, "texture unit gc sweep");
        evicted
    }
}

/// Evicts low-priority textures under memory pressure
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureSweeper {
    priority_cutoff: f32,
}

impl PressureSweeper {
    /// Create a sweeper evicting textures below `priority_cutoff`
    pub fn new(priority_cutoff: f32) -> Self {
        Self { priority_cutoff }
    }

    /// Priority below which textures are evicted
    pub fn priority_cutoff(&self) -> f32 {
        self.priority_cutoff
    }

    /// Evict every unlocked texture with priority below the cutoff, in one
    /// pass and irrespective of age
    pub fn sweep(
        &self,
        allocator: &mut Allocator,
        stats: &mut StatsCollector,
    ) -> Vec<TextureHandle> {
        let cutoff = self.priority_cutoff;
        allocator.evict_where(stats, |slot| slot.priority() < cutoff)
    }
}
