//! GPU-side collaborators
//!
//! The cache never allocates video memory itself. It drives a
//! [`GraphicsContext`] supplied by the renderer and a [`Loader`] that turns
//! opaque payloads into uploaded textures. Backends (Metal, wgpu, GL)
//! implement these traits around their own texture objects.

use futures::future::LocalBoxFuture;

use crate::error::LoadError;
use crate::memory_budget::TextureFormat;
use crate::slot::{SlotIndex, TextureHandle};

/// Hardware limits queried once at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Limit {
    /// Number of texture units the fragment stage can sample from
    MaxTextureUnits,
    /// Video memory available to textures in bytes; `0` when unknown
    VideoMemoryBytes,
}

/// Renderer hooks for creating, destroying and binding textures
pub trait GraphicsContext {
    /// Allocate an empty texture
    fn create_resource(&self) -> TextureHandle;

    /// Release a texture's video memory
    ///
    /// Called for every texture the cache evicts or discards.
    fn destroy_resource(&self, handle: TextureHandle);

    /// Attach a texture to a hardware unit
    fn bind_to_slot(&self, slot: SlotIndex, handle: TextureHandle);

    /// Report a hardware limit
    fn query_limit(&self, limit: Limit) -> u64;
}

/// A texture produced by a [`Loader`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedTexture {
    /// Handle of the uploaded texture
    pub handle: TextureHandle,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel format
    pub format: TextureFormat,
}

/// Asynchronous texture source
///
/// `load` may suspend any number of times. The cache awaits one load at a
/// time and binds the result with the priority the request was queued at.
pub trait Loader<P> {
    /// Decode and upload `payload`
    fn load(&self, payload: P) -> LocalBoxFuture<'static, Result<LoadedTexture, LoadError>>;
}

impl<P, F> Loader<P> for F
where
    F: Fn(P) -> LocalBoxFuture<'static, Result<LoadedTexture, LoadError>>,
{
    fn load(&self, payload: P) -> LocalBoxFuture<'static, Result<LoadedTexture, LoadError>> {
        self(payload)
    }
}
