//! Texture Slot Cache Library
//!
//! Bounded cache of hardware texture units with priority-weighted LRU
//! eviction, slot locking, streaming preload and memory-pressure handling.
//!
//! The cache sits between a renderer and its [`GraphicsContext`]. Callers ask
//! for a texture to be bound at some priority; the cache finds a unit for it,
//! evicting the least valuable occupant when the pool is full, and releases
//! whatever it displaces. Background timers collect idle textures and shed
//! low-priority ones when estimated video memory runs high.
//!
//! Everything runs on one thread. Time comes from an injected
//! [`Clock`](texslot_scheduler::Clock) and streaming loads run on a local
//! executor, which keeps the cache deterministic under test.

pub mod allocator;
pub mod cache;
pub mod config;
pub mod error;
pub mod eviction;
pub mod gpu;
pub mod memory_budget;
pub mod slot;
pub mod stats;
mod streaming;
pub mod sweep;

pub use allocator::{Allocator, BindOutcome};
pub use cache::TextureUnitCache;
pub use config::{CacheConfig, ConfigError};
pub use error::{CacheError, LoadError};
pub use eviction::{EvictionPolicy, Victim};
pub use gpu::{GraphicsContext, Limit, LoadedTexture, Loader};
pub use memory_budget::{estimate_size, MemoryMonitor, MemoryPressure, MemoryStats, TextureFormat};
pub use slot::{Slot, SlotIndex, SlotTable, TextureHandle};
pub use stats::{CacheStats, StatsCollector};
pub use sweep::{GcSweeper, PressureSweeper};
