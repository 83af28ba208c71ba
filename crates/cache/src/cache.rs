//! Texture unit cache
//!
//! [`TextureUnitCache`] owns the slot table and every policy around it, and
//! drives the renderer's [`GraphicsContext`]. It is created by the rendering
//! context and passed by reference to whatever needs to bind textures.
//!
//! All state lives behind a single `RefCell` and every operation, timer
//! callback and streaming step borrows it for a bounded, non-suspending
//! stretch. The cache is single-threaded: timers fire from the thread that
//! pumps the [`Clock`] and streaming runs on a local executor.

use std::cell::RefCell;
use std::rc::Rc;

use futures::task::LocalSpawn;
use tracing::{debug, error, info, trace};

use texslot_scheduler::{CancellationToken, Clock, PreloadQueue, TimerId, Timestamp};

use crate::allocator::{Allocator, BindOutcome};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::eviction::EvictionPolicy;
use crate::gpu::{GraphicsContext, Limit, Loader};
use crate::memory_budget::{MemoryMonitor, MemoryStats, TextureFormat};
use crate::slot::{Slot, SlotIndex, SlotTable, TextureHandle};
use crate::stats::{CacheStats, StatsCollector};
use crate::streaming::StreamingDriver;
use crate::sweep::{GcSweeper, PressureSweeper};

/// Mutable cache state
pub(crate) struct CacheState<P> {
    pub(crate) config: CacheConfig,
    pub(crate) allocator: Allocator,
    pub(crate) monitor: MemoryMonitor,
    pub(crate) gc: GcSweeper,
    pub(crate) pressure: PressureSweeper,
    pub(crate) stats: StatsCollector,
    pub(crate) queue: PreloadQueue<P>,
    pub(crate) streaming: StreamingDriver,
    pub(crate) timers: Vec<TimerId>,
}

impl<P> CacheState<P> {
    pub(crate) fn bind(
        &mut self,
        handle: TextureHandle,
        priority: f32,
        now: Timestamp,
    ) -> Result<BindOutcome, CacheError> {
        let outcome = self.allocator.bind(handle, priority, now, &mut self.stats)?;
        if let Some(evicted) = outcome.evicted {
            self.monitor.release(evicted);
        }
        Ok(outcome)
    }

    pub(crate) fn evict_least_recently_used(&mut self) -> Option<TextureHandle> {
        let (_, handle) = self.allocator.evict_least_recently_used(&mut self.stats)?;
        self.monitor.release(handle);
        Some(handle)
    }

    pub(crate) fn sample_memory(&mut self) -> MemoryStats {
        let in_use = self.allocator.table().in_use();
        self.monitor.sample(in_use)
    }

    fn forget(&mut self, handles: &[TextureHandle]) {
        for handle in handles {
            self.monitor.release(*handle);
        }
    }
}

/// State shared between the cache handle, its timers and the streaming task
pub(crate) struct Shared<P> {
    pub(crate) state: RefCell<CacheState<P>>,
    pub(crate) clock: Rc<dyn Clock>,
    pub(crate) graphics: Rc<dyn GraphicsContext>,
    pub(crate) loader: Rc<dyn Loader<P>>,
    pub(crate) spawner: Rc<dyn LocalSpawn>,
    pub(crate) shutdown: CancellationToken,
}

impl<P: 'static> Shared<P> {
    pub(crate) fn release(&self, handles: &[TextureHandle]) {
        for &handle in handles {
            trace!(?handle, "releasing texture");
            self.graphics.destroy_resource(handle);
        }
    }

    pub(crate) fn apply_bind(&self, handle: TextureHandle, outcome: BindOutcome) {
        if let Some(evicted) = outcome.evicted {
            self.release(&[evicted]);
        }
        if !outcome.hit {
            self.graphics.bind_to_slot(outcome.slot, handle);
        }
    }

    fn bind(&self, handle: TextureHandle, priority: f32) -> Result<SlotIndex, CacheError> {
        let now = self.clock.now();
        let outcome = self.state.borrow_mut().bind(handle, priority, now)?;
        self.apply_bind(handle, outcome);
        Ok(outcome.slot)
    }

    fn collect_garbage(&self) -> usize {
        let now = self.clock.now();
        let evicted = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let evicted = state.gc.sweep(&mut state.allocator, now, &mut state.stats);
            state.forget(&evicted);
            evicted
        };
        self.release(&evicted);
        evicted.len()
    }

    fn check_memory(self: &Rc<Self>) -> usize {
        let evicted = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let memory = state.sample_memory();
            if !state.monitor.is_under_pressure() {
                trace!(utilization = memory.utilization(), "texture memory check");
                return 0;
            }

            state.stats.pressure_events += 1;
            let evicted = state.pressure.sweep(&mut state.allocator, &mut state.stats);
            state.forget(&evicted);
            info!(
                utilization = memory.utilization(),
                threshold = state.monitor.pressure_threshold(),
                evicted = evicted.len(),
                "texture memory pressure sweep"
            );
            evicted
        };

        self.release(&evicted);
        // An active drain resamples memory itself after every load
        let draining = self.state.borrow().streaming.is_draining();
        if !evicted.is_empty() && !draining {
            self.schedule_resume();
        }
        evicted.len()
    }

    fn destroy(&self) {
        if !self.shutdown.cancel() {
            return;
        }

        let (timers, evicted, discarded) = {
            let mut state = self.state.borrow_mut();
            let mut timers = std::mem::take(&mut state.timers);
            timers.extend(state.streaming.stop());
            let discarded = state.queue.clear();
            let evicted = state.allocator.evict_all();
            state.monitor.reset();
            (timers, evicted, discarded)
        };

        for timer in timers {
            self.clock.cancel(timer);
        }
        self.release(&evicted);
        info!(
            released = evicted.len(),
            discarded, "texture unit cache destroyed"
        );
    }
}

/// Bounded cache of hardware texture units
///
/// # Example
///
/// ```
/// use std::rc::Rc;
/// use futures::executor::LocalPool;
/// use futures::future::{self, FutureExt};
/// use texslot_cache::{
///     CacheConfig, GraphicsContext, Limit, LoadError, LoadedTexture, SlotIndex,
///     TextureFormat, TextureHandle, TextureUnitCache,
/// };
/// use texslot_scheduler::VirtualClock;
///
/// struct Gpu;
///
/// impl GraphicsContext for Gpu {
///     fn create_resource(&self) -> TextureHandle { TextureHandle::new(0) }
///     fn destroy_resource(&self, _handle: TextureHandle) {}
///     fn bind_to_slot(&self, _slot: SlotIndex, _handle: TextureHandle) {}
///     fn query_limit(&self, limit: Limit) -> u64 {
///         match limit {
///             Limit::MaxTextureUnits => 16,
///             Limit::VideoMemoryBytes => 512 * 1024 * 1024,
///         }
///     }
/// }
///
/// let pool = LocalPool::new();
/// let loader = |id: u64| {
///     future::ready(Ok::<_, LoadError>(LoadedTexture {
///         handle: TextureHandle::new(id),
///         width: 256,
///         height: 256,
///         format: TextureFormat::Rgba8,
///     }))
///     .boxed_local()
/// };
///
/// let cache: TextureUnitCache<u64> = TextureUnitCache::new(
///     CacheConfig::default(),
///     Rc::new(Gpu),
///     Rc::new(loader),
///     Rc::new(VirtualClock::new()),
///     Rc::new(pool.spawner()),
/// )
/// .unwrap();
///
/// let unit = cache.bind(TextureHandle::new(42), 1.0).unwrap();
/// assert_eq!(cache.slot_of(TextureHandle::new(42)), Some(unit));
/// assert_eq!(cache.stats().cache_misses, 1);
/// ```
pub struct TextureUnitCache<P: 'static> {
    shared: Rc<Shared<P>>,
}

impl<P: 'static> TextureUnitCache<P> {
    /// Create a cache sized from the GPU's texture unit limit
    ///
    /// Starts the garbage collection and memory check timers on `clock`.
    /// Fails with [`CacheError::CapacityMisconfiguration`] when the reserved
    /// units would leave nothing to allocate.
    pub fn new(
        config: CacheConfig,
        graphics: Rc<dyn GraphicsContext>,
        loader: Rc<dyn Loader<P>>,
        clock: Rc<dyn Clock>,
        spawner: Rc<dyn LocalSpawn>,
    ) -> Result<Self, CacheError> {
        let total = usize::try_from(graphics.query_limit(Limit::MaxTextureUnits)).unwrap_or(0);
        let reserved = config.reserved_for(total);
        let table = SlotTable::new(total, reserved)?;

        let capacity = match graphics.query_limit(Limit::VideoMemoryBytes) {
            0 => config.fallback_capacity_bytes,
            bytes => bytes,
        };

        let state = CacheState {
            allocator: Allocator::new(table, EvictionPolicy::new(config.priority_decay_rate)),
            monitor: MemoryMonitor::new(capacity, config.pressure_threshold),
            gc: GcSweeper::new(config.gc_max_idle()),
            pressure: PressureSweeper::new(config.pressure_priority_cutoff),
            stats: StatsCollector::default(),
            queue: PreloadQueue::new(config.max_queue_size),
            streaming: StreamingDriver::default(),
            timers: Vec::new(),
            config,
        };

        let shared = Rc::new(Shared {
            state: RefCell::new(state),
            clock,
            graphics,
            loader,
            spawner,
            shutdown: CancellationToken::new(),
        });

        let (gc_interval, memory_interval) = {
            let state = shared.state.borrow();
            (state.config.gc_interval(), state.config.memory_check_interval())
        };

        let weak = Rc::downgrade(&shared);
        let gc_timer = shared.clock.schedule_repeating(
            gc_interval,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.collect_garbage();
                }
            }),
        );

        let weak = Rc::downgrade(&shared);
        let memory_timer = shared.clock.schedule_repeating(
            memory_interval,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.check_memory();
                }
            }),
        );

        shared.state.borrow_mut().timers = vec![gc_timer, memory_timer];

        info!(
            units = total,
            reserved,
            capacity_bytes = capacity,
            "texture unit cache created"
        );
        Ok(Self { shared })
    }

    /// Bind `handle` to a texture unit at `priority`
    ///
    /// A texture displaced to make room is released through the graphics
    /// context. On [`CacheError::ResourceExhausted`] call
    /// [`evict_least_recently_used`](Self::evict_least_recently_used) and
    /// retry once.
    pub fn bind(&self, handle: TextureHandle, priority: f32) -> Result<SlotIndex, CacheError> {
        self.shared.bind(handle, priority)
    }

    /// Create a fresh texture and bind it
    ///
    /// The texture is released again if no unit can be found for it.
    pub fn allocate(&self, priority: f32) -> Result<(TextureHandle, SlotIndex), CacheError> {
        let handle = self.shared.graphics.create_resource();
        match self.shared.bind(handle, priority) {
            Ok(slot) => Ok((handle, slot)),
            Err(err) => {
                self.shared.release(&[handle]);
                Err(err)
            }
        }
    }

    /// Remove `handle` from its unit without releasing it
    ///
    /// The caller keeps ownership of the texture.
    pub fn unbind(&self, handle: TextureHandle) -> Option<SlotIndex> {
        let mut state = self.shared.state.borrow_mut();
        let slot = state.allocator.unbind(handle)?;
        state.monitor.release(handle);
        Some(slot)
    }

    /// Pin `handle` so no eviction path may remove it
    ///
    /// Returns `false` when the handle is not bound.
    pub fn lock(&self, handle: TextureHandle) -> bool {
        self.shared.state.borrow_mut().allocator.lock(handle)
    }

    /// Release a pin set by [`lock`](Self::lock)
    pub fn unlock(&self, handle: TextureHandle) -> bool {
        self.shared.state.borrow_mut().allocator.unlock(handle)
    }

    /// Queue `payload` for streaming at `priority`
    ///
    /// When the queue is full the lowest-priority requests are dropped and
    /// counted in [`CacheStats::queue_overflows`]. Starts the streaming task
    /// if it is idle.
    pub fn preload(&self, payload: P, priority: f32) {
        if self.shared.shutdown.is_cancelled() {
            debug!("preload after destroy ignored");
            return;
        }

        let now = self.shared.clock.now();
        {
            let mut state = self.shared.state.borrow_mut();
            let dropped = state.queue.push(payload, priority, now);
            if dropped > 0 {
                state.stats.queue_overflows += dropped as u64;
                debug!(dropped, capacity = state.queue.capacity(), "preload queue overflow");
            }
        }

        if let Err(err) = self.shared.start_streaming() {
            error!(%err, "failed to start texture streaming");
        }
    }

    /// Start the streaming task if requests are pending and it is idle
    ///
    /// Returns `true` if a task was spawned. Does nothing while a pressure
    /// cooldown is pending.
    pub fn resume_streaming(&self) -> Result<bool, CacheError> {
        self.shared.start_streaming()
    }

    /// Evict every unlocked texture
    ///
    /// Returns the number of textures released.
    pub fn clear_all(&self) -> usize {
        let evicted = {
            let mut guard = self.shared.state.borrow_mut();
            let state = &mut *guard;
            let evicted = state.allocator.evict_where(&mut state.stats, |_| true);
            state.forget(&evicted);
            evicted
        };
        self.shared.release(&evicted);
        evicted.len()
    }

    /// Evict the unlocked texture with the oldest last use, regardless of
    /// priority
    pub fn evict_least_recently_used(&self) -> Option<TextureHandle> {
        let evicted = self.shared.state.borrow_mut().evict_least_recently_used()?;
        self.shared.release(&[evicted]);
        Some(evicted)
    }

    /// Run a garbage collection sweep now
    ///
    /// Returns the number of textures released.
    pub fn collect_garbage(&self) -> usize {
        self.shared.collect_garbage()
    }

    /// Run a memory check now, sweeping if over the pressure threshold
    ///
    /// When the sweep frees anything and no drain is running, streaming is
    /// restarted after the cooldown. Returns the number of textures released.
    pub fn check_memory(&self) -> usize {
        self.shared.check_memory()
    }

    /// Fold a texture loaded outside the preload path into the memory
    /// estimate
    ///
    /// Returns the estimated size in bytes.
    pub fn record_resource(
        &self,
        handle: TextureHandle,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> u64 {
        self.shared
            .state
            .borrow_mut()
            .monitor
            .record_resource(handle, width, height, format)
    }

    /// Re-seat resident textures by descending priority
    ///
    /// Keeps the same textures resident; moved textures are re-bound to
    /// their new units. Returns the number moved.
    pub fn optimize(&self) -> usize {
        let moved = self.shared.state.borrow_mut().allocator.optimize();
        for &(slot, handle) in &moved {
            self.shared.graphics.bind_to_slot(slot, handle);
        }
        debug!(moved = moved.len(), "texture units compacted");
        moved.len()
    }

    /// Stop timers and streaming, discard pending requests and release every
    /// texture, locked ones included
    ///
    /// Idempotent. No timer callback fires after this returns.
    pub fn destroy(&self) {
        self.shared.destroy();
    }

    /// Whether [`destroy`](Self::destroy) has run
    pub fn is_destroyed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Current counters and usage
    pub fn stats(&self) -> CacheStats {
        let mut state = self.shared.state.borrow_mut();
        let memory = state.sample_memory();
        CacheStats::collect(
            &state.stats,
            state.allocator.table(),
            state.queue.len(),
            &memory,
        )
    }

    /// Current memory estimate
    pub fn memory_stats(&self) -> MemoryStats {
        self.shared.state.borrow_mut().sample_memory()
    }

    /// Unit holding `handle`
    pub fn slot_of(&self, handle: TextureHandle) -> Option<SlotIndex> {
        self.shared.state.borrow().allocator.slot_of(handle)
    }

    /// Copy of the slot at `index`
    pub fn slot(&self, index: SlotIndex) -> Option<Slot> {
        self.shared.state.borrow().allocator.table().slot(index).cloned()
    }

    /// Handles currently bound, in unit order
    pub fn resident_handles(&self) -> Vec<TextureHandle> {
        self.shared
            .state
            .borrow()
            .allocator
            .table()
            .residents()
            .filter_map(Slot::occupant)
            .collect()
    }

    /// Whether the streaming task is draining the queue
    pub fn is_streaming(&self) -> bool {
        self.shared.state.borrow().streaming.is_draining()
    }

    /// Whether streaming is paused waiting for a pressure cooldown
    pub fn is_streaming_paused(&self) -> bool {
        self.shared.state.borrow().streaming.is_cooling_down()
    }

    /// Pending preload requests
    pub fn queue_len(&self) -> usize {
        self.shared.state.borrow().queue.len()
    }

    /// Configuration the cache was built with
    pub fn config(&self) -> CacheConfig {
        self.shared.state.borrow().config.clone()
    }

    /// Check that the handle index agrees with slot occupancy
    pub fn is_consistent(&self) -> bool {
        self.shared.state.borrow().allocator.table().is_consistent()
    }
}

impl<P: 'static> Drop for TextureUnitCache<P> {
    fn drop(&mut self) {
        self.shared.destroy();
    }
}
