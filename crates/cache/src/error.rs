//! Error types for the texture-unit cache

use crate::slot::TextureHandle;

/// Errors returned by cache operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CacheError {
    /// No slot could be freed for a bind: every allocatable slot is locked or
    /// holds something at least as important as the incoming request.
    ///
    /// Recoverable: evict explicitly (for example with an LRU sweep) and
    /// retry once.
    #[error("no texture unit available for {handle:?} at priority {priority}")]
    ResourceExhausted { handle: TextureHandle, priority: f32 },

    /// The reserved range covers every unit, leaving nothing to allocate
    #[error("reserved count {reserved} leaves no allocatable units out of {total}")]
    CapacityMisconfiguration { reserved: usize, total: usize },

    /// The streaming task could not be handed to the executor
    #[error("failed to spawn streaming task: {0}")]
    Spawn(String),
}

/// Failure reported by a [`Loader`](crate::Loader) for a single request
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LoadError {
    /// The payload could not be found or read
    #[error("texture source unavailable: {0}")]
    Unavailable(String),

    /// The payload was read but could not be decoded or uploaded
    #[error("texture upload failed: {0}")]
    Upload(String),

    /// The load was abandoned before completion
    #[error("texture load cancelled")]
    Cancelled,
}

impl CacheError {
    /// Check if retrying after an explicit eviction may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CacheError::ResourceExhausted { .. })
    }
}
