//! Texture Slot Scheduler Library
//!
//! Timing and queueing primitives for the texture-unit cache.
//!
//! - [`Clock`]: injected time source with repeating and one-shot timers, plus
//!   the [`VirtualClock`] and [`FrameClock`] implementations.
//! - [`PreloadQueue`]: bounded priority queue with FIFO ordering within a
//!   priority level.
//! - [`CancellationToken`]: cooperative shutdown signal for async loops.
//! - [`yield_now`]: hand control back to a single-threaded executor.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use texslot_scheduler::{Clock, PreloadQueue, VirtualClock};
//!
//! let clock = VirtualClock::new();
//! let mut queue = PreloadQueue::new(100);
//!
//! queue.push("albedo.ktx2", 1.0, clock.now());
//! clock.advance(Duration::from_millis(16));
//! queue.push("normal.ktx2", 0.5, clock.now());
//!
//! let next = queue.pop().unwrap();
//! assert_eq!(next.payload, "albedo.ktx2");
//! assert_eq!(next.enqueued_at, 0);
//! ```

mod cancel;
mod clock;
mod cooperative;
mod priority;

pub use cancel::CancellationToken;
pub use clock::{Clock, FrameClock, TimerId, TimerQueue, Timestamp, VirtualClock};
pub use cooperative::{yield_now, YieldNow};
pub use priority::{PreloadQueue, PreloadRequest};
