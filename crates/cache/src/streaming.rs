//! Streaming preload driver
//!
//! A single cooperative task drains the preload queue through the
//! [`Loader`]: pop the best request, await the load, bind the result, yield,
//! then look at memory before taking the next one. When the cache is over its
//! pressure threshold the task stops and a one-shot timer restarts it after
//! the configured cooldown.
//!
//! The task holds only a weak reference to the cache between steps, and
//! checks the shutdown token after every suspension point.

use std::rc::{Rc, Weak};

use futures::task::LocalSpawnExt;
use tracing::{debug, error, info, warn};

use texslot_scheduler::{yield_now, CancellationToken, TimerId};

use crate::cache::Shared;
use crate::error::CacheError;
use crate::gpu::{GraphicsContext, LoadedTexture, Loader};

/// Drain state of the streaming task
#[derive(Debug, Default)]
pub(crate) struct StreamingDriver {
    draining: bool,
    resume_timer: Option<TimerId>,
}

impl StreamingDriver {
    pub(crate) fn is_draining(&self) -> bool {
        self.draining
    }

    pub(crate) fn is_cooling_down(&self) -> bool {
        self.resume_timer.is_some()
    }

    /// Forget all state, returning the pending resume timer
    pub(crate) fn stop(&mut self) -> Option<TimerId> {
        self.draining = false;
        self.resume_timer.take()
    }
}

impl<P: 'static> Shared<P> {
    /// Start the drain task unless it is already running, cooling down, or
    /// has nothing to do
    ///
    /// Returns `true` if a task was spawned.
    pub(crate) fn start_streaming(self: &Rc<Self>) -> Result<bool, CacheError> {
        if self.shutdown.is_cancelled() {
            return Ok(false);
        }

        {
            let mut state = self.state.borrow_mut();
            let driver = &state.streaming;
            if driver.draining || driver.is_cooling_down() || state.queue.is_empty() {
                return Ok(false);
            }
            state.streaming.draining = true;
        }

        let task = drain(
            Rc::downgrade(self),
            Rc::clone(&self.loader),
            Rc::clone(&self.graphics),
            self.shutdown.clone(),
        );
        if let Err(err) = self.spawner.spawn_local(task) {
            self.state.borrow_mut().streaming.draining = false;
            return Err(CacheError::Spawn(err.to_string()));
        }

        debug!("texture streaming started");
        Ok(true)
    }

    /// Restart streaming after the cooldown unless a restart is already
    /// pending
    pub(crate) fn schedule_resume(self: &Rc<Self>) {
        if self.shutdown.is_cancelled() {
            return;
        }

        let mut state = self.state.borrow_mut();
        if state.streaming.is_cooling_down() {
            return;
        }

        let cooldown = state.config.streaming_cooldown();
        let weak = Rc::downgrade(self);
        let timer = self.clock.schedule_once(
            cooldown,
            Box::new(move || {
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                shared.state.borrow_mut().streaming.resume_timer = None;
                if let Err(err) = shared.start_streaming() {
                    error!(%err, "failed to resume texture streaming");
                }
            }),
        );
        state.streaming.resume_timer = Some(timer);
        debug!(cooldown_ms = cooldown.as_millis() as u64, "texture streaming resume scheduled");
    }

    /// Bind a texture delivered by the loader
    ///
    /// A full pool gets one LRU sweep and a retry. If that still fails the
    /// texture is released.
    fn accept_loaded(&self, loaded: LoadedTexture, priority: f32) {
        let handle = loaded.handle;
        let now = self.clock.now();

        let (result, swept) = {
            let mut state = self.state.borrow_mut();
            state.stats.streaming_loads += 1;
            state
                .monitor
                .record_resource(handle, loaded.width, loaded.height, loaded.format);

            match state.bind(handle, priority, now) {
                Ok(outcome) => (Ok(outcome), None),
                Err(_) => {
                    let swept = state.evict_least_recently_used();
                    (state.bind(handle, priority, now), swept)
                }
            }
        };

        if let Some(swept) = swept {
            self.release(&[swept]);
        }

        match result {
            Ok(outcome) => self.apply_bind(handle, outcome),
            Err(err) => {
                self.state.borrow_mut().monitor.release(handle);
                self.graphics.destroy_resource(handle);
                warn!(%err, "streamed texture could not be bound, released");
            }
        }
    }
}

async fn drain<P: 'static>(
    weak: Weak<Shared<P>>,
    loader: Rc<dyn Loader<P>>,
    graphics: Rc<dyn GraphicsContext>,
    shutdown: CancellationToken,
) {
    loop {
        let request = {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if shutdown.is_cancelled() {
                return;
            }
            let mut state = shared.state.borrow_mut();
            match state.queue.pop() {
                Some(request) => request,
                None => {
                    state.streaming.draining = false;
                    debug!("texture streaming queue drained");
                    return;
                }
            }
        };

        let priority = request.priority;
        let result = loader.load(request.payload).await;

        let shared = match weak.upgrade() {
            Some(shared) if !shutdown.is_cancelled() => shared,
            _ => {
                // The cache was torn down while the load was in flight
                if let Ok(loaded) = result {
                    graphics.destroy_resource(loaded.handle);
                }
                return;
            }
        };

        match result {
            Ok(loaded) => shared.accept_loaded(loaded, priority),
            Err(err) => {
                shared.state.borrow_mut().stats.loader_failures += 1;
                warn!(%err, priority, "texture load failed, skipping");
            }
        }
        drop(shared);

        yield_now().await;

        let Some(shared) = weak.upgrade() else {
            return;
        };
        if shutdown.is_cancelled() {
            return;
        }

        let under_pressure = {
            let mut state = shared.state.borrow_mut();
            let memory = state.sample_memory();
            let under_pressure = state.monitor.is_under_pressure();
            if under_pressure {
                state.streaming.draining = false;
                info!(
                    utilization = memory.utilization(),
                    pending = state.queue.len(),
                    "texture memory pressure, pausing streaming"
                );
            }
            under_pressure
        };

        if under_pressure {
            shared.schedule_resume();
            return;
        }
    }
}
