//! Time source and timer scheduling
//!
//! Cache maintenance (garbage collection, memory sampling, streaming
//! cooldowns) runs on timers owned by an injected [`Clock`]. Timers fire on
//! the thread that drives the clock, one at a time, so callbacks never run
//! concurrently with each other or with the code that pumps the clock.
//!
//! Two implementations are provided:
//!
//! - [`VirtualClock`]: time only moves when [`VirtualClock::advance`] is
//!   called. Used by tests and headless tools.
//! - [`FrameClock`]: wall-clock time, with due timers fired from
//!   [`FrameClock::pump`], which the host calls once per frame.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// Milliseconds since the clock's epoch
pub type Timestamp = u64;

/// Identifier of a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Time source and timer scheduler injected into the cache
///
/// Callbacks must only fire from the thread that drives the clock and never
/// re-entrantly: a callback running inside [`Clock`] dispatch may schedule or
/// cancel timers, but the clock will not start another callback until it
/// returns.
pub trait Clock {
    /// Current time in milliseconds
    fn now(&self) -> Timestamp;

    /// Run `callback` every `interval`, starting one interval from now
    fn schedule_repeating(&self, interval: Duration, callback: Box<dyn FnMut()>) -> TimerId;

    /// Run `callback` once after `delay`
    fn schedule_once(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerId;

    /// Cancel a timer. Returns `true` if the timer was still pending.
    fn cancel(&self, id: TimerId) -> bool;
}

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

enum Task {
    Once(Box<dyn FnOnce()>),
    Repeating {
        interval: u64,
        callback: Box<dyn FnMut()>,
    },
}

/// Ordered set of pending timers shared by the clock implementations
///
/// Timers are keyed by `(due, id)`, so the next timer to fire is always the
/// first entry and two timers due at the same instant fire in the order they
/// were scheduled.
#[derive(Default)]
pub struct TimerQueue {
    timers: RefCell<BTreeMap<(Timestamp, TimerId), Task>>,
    /// Due time of every pending timer, for cancellation by id
    due: RefCell<HashMap<TimerId, Timestamp>>,
    next_id: Cell<u64>,
    /// Timer whose callback is executing right now
    running: Cell<Option<TimerId>>,
    /// Set when the running timer cancels itself
    running_cancelled: Cell<bool>,
}

impl TimerQueue {
    /// Create an empty timer queue
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, id: TimerId, due: Timestamp, task: Task) {
        self.timers.borrow_mut().insert((due, id), task);
        self.due.borrow_mut().insert(id, due);
    }

    fn next_id(&self) -> TimerId {
        let id = TimerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        id
    }

    /// Schedule a repeating timer whose first run is at `now + interval`
    ///
    /// Zero intervals are clamped to one millisecond so that a single
    /// [`TimerQueue::run_until`] call always terminates.
    pub fn schedule_repeating(
        &self,
        now: Timestamp,
        interval: Duration,
        callback: Box<dyn FnMut()>,
    ) -> TimerId {
        let interval = as_millis(interval).max(1);
        let id = self.next_id();
        self.insert(
            id,
            now.saturating_add(interval),
            Task::Repeating { interval, callback },
        );
        id
    }

    /// Schedule a one-shot timer at `now + delay`
    pub fn schedule_once(
        &self,
        now: Timestamp,
        delay: Duration,
        callback: Box<dyn FnOnce()>,
    ) -> TimerId {
        let id = self.next_id();
        self.insert(id, now.saturating_add(as_millis(delay)), Task::Once(callback));
        id
    }

    /// Cancel a pending timer
    pub fn cancel(&self, id: TimerId) -> bool {
        let due = self.due.borrow_mut().remove(&id);
        if let Some(due) = due {
            self.timers.borrow_mut().remove(&(due, id));
            return true;
        }
        if self.running.get() == Some(id) && !self.running_cancelled.get() {
            self.running_cancelled.set(true);
            return true;
        }
        false
    }

    /// Number of timers still scheduled
    pub fn len(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Check if no timers are scheduled
    pub fn is_empty(&self) -> bool {
        self.timers.borrow().is_empty()
    }

    /// Due time of the earliest pending timer
    pub fn next_due(&self) -> Option<Timestamp> {
        self.timers.borrow().first_key_value().map(|(&(due, _), _)| due)
    }

    /// Fire every timer due at or before `target`, in due order
    ///
    /// `on_advance` is invoked with each timer's due time before its callback
    /// runs, letting a virtual clock step through intermediate instants.
    /// Returns the number of callbacks fired.
    pub fn run_until(&self, target: Timestamp, on_advance: impl Fn(Timestamp)) -> usize {
        let mut fired = 0;

        loop {
            // The timer is taken out of the map while its callback runs so the
            // callback can freely schedule or cancel other timers.
            let next = {
                let mut timers = self.timers.borrow_mut();
                let first_due = timers.first_key_value().map(|(&(due, _), _)| due);
                match first_due {
                    Some(due) if due <= target => timers.pop_first(),
                    _ => None,
                }
            };
            let Some(((due, id), task)) = next else { break };
            self.due.borrow_mut().remove(&id);

            on_advance(due);
            self.running.set(Some(id));
            self.running_cancelled.set(false);

            match task {
                Task::Once(callback) => callback(),
                Task::Repeating {
                    interval,
                    mut callback,
                } => {
                    callback();
                    if !self.running_cancelled.get() {
                        self.insert(
                            id,
                            due.saturating_add(interval),
                            Task::Repeating { interval, callback },
                        );
                    }
                }
            }

            self.running.set(None);
            fired += 1;
        }

        fired
    }
}

/// Deterministic clock whose time only moves on [`VirtualClock::advance`]
///
/// # Example
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use std::time::Duration;
/// use texslot_scheduler::{Clock, VirtualClock};
///
/// let clock = VirtualClock::new();
/// let ticks = Rc::new(Cell::new(0));
/// let counter = Rc::clone(&ticks);
/// clock.schedule_repeating(
///     Duration::from_millis(100),
///     Box::new(move || counter.set(counter.get() + 1)),
/// );
///
/// clock.advance(Duration::from_millis(350));
/// assert_eq!(ticks.get(), 3);
/// assert_eq!(clock.now(), 350);
/// ```
#[derive(Default)]
pub struct VirtualClock {
    now: Cell<Timestamp>,
    timers: TimerQueue,
}

impl VirtualClock {
    /// Create a virtual clock starting at time zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a virtual clock starting at the given time
    pub fn starting_at(now: Timestamp) -> Self {
        Self {
            now: Cell::new(now),
            timers: TimerQueue::new(),
        }
    }

    /// Move time forward, firing every timer that falls due on the way
    ///
    /// While a callback runs, [`Clock::now`] reports that timer's due time.
    /// Returns the number of callbacks fired.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now.get().saturating_add(as_millis(by));
        self.advance_to(target)
    }

    /// Move time forward to an absolute timestamp
    ///
    /// Moving backwards is ignored.
    pub fn advance_to(&self, target: Timestamp) -> usize {
        let target = target.max(self.now.get());
        let fired = self.timers.run_until(target, |due| {
            if due > self.now.get() {
                self.now.set(due);
            }
        });
        self.now.set(target);
        fired
    }

    /// Number of pending timers
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Timestamp {
        self.now.get()
    }

    fn schedule_repeating(&self, interval: Duration, callback: Box<dyn FnMut()>) -> TimerId {
        self.timers
            .schedule_repeating(self.now.get(), interval, callback)
    }

    fn schedule_once(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerId {
        self.timers.schedule_once(self.now.get(), delay, callback)
    }

    fn cancel(&self, id: TimerId) -> bool {
        self.timers.cancel(id)
    }
}

/// Wall-clock time source pumped from the host's frame loop
///
/// Timers never fire on their own; the host calls [`FrameClock::pump`] from
/// its update path and every timer whose deadline has passed fires there.
pub struct FrameClock {
    epoch: Instant,
    timers: TimerQueue,
}

impl FrameClock {
    /// Create a frame clock whose epoch is now
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            timers: TimerQueue::new(),
        }
    }

    /// Fire every timer whose deadline has passed
    ///
    /// Returns the number of callbacks fired.
    pub fn pump(&self) -> usize {
        self.timers.run_until(self.now(), |_| {})
    }

    /// Time until the next timer is due, `None` when nothing is scheduled
    pub fn time_until_next(&self) -> Option<Duration> {
        self.timers
            .next_due()
            .map(|due| Duration::from_millis(due.saturating_sub(self.now())))
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FrameClock {
    fn now(&self) -> Timestamp {
        as_millis(self.epoch.elapsed())
    }

    fn schedule_repeating(&self, interval: Duration, callback: Box<dyn FnMut()>) -> TimerId {
        self.timers.schedule_repeating(self.now(), interval, callback)
    }

    fn schedule_once(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerId {
        self.timers.schedule_once(self.now(), delay, callback)
    }

    fn cancel(&self, id: TimerId) -> bool {
        self.timers.cancel(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn counter() -> (Rc<Cell<u32>>, Rc<Cell<u32>>) {
        let count = Rc::new(Cell::new(0));
        (Rc::clone(&count), count)
    }

    #[test]
    fn test_repeating_timer_fires_per_interval() {
        let clock = VirtualClock::new();
        let (count, handle) = counter();
        clock.schedule_repeating(
            Duration::from_millis(1000),
            Box::new(move || handle.set(handle.get() + 1)),
        );

        assert_eq!(clock.advance(Duration::from_millis(999)), 0);
        assert_eq!(count.get(), 0);

        assert_eq!(clock.advance(Duration::from_millis(1)), 1);
        assert_eq!(count.get(), 1);

        clock.advance(Duration::from_millis(3000));
        assert_eq!(count.get(), 4);
        assert_eq!(clock.now(), 4000);
    }

    #[test]
    fn test_once_timer_fires_once() {
        let clock = VirtualClock::new();
        let (count, handle) = counter();
        clock.schedule_once(
            Duration::from_millis(50),
            Box::new(move || handle.set(handle.get() + 1)),
        );

        clock.advance(Duration::from_millis(500));
        assert_eq!(count.get(), 1);
        assert_eq!(clock.pending_timers(), 0);
    }

    #[test]
    fn test_now_reports_due_time_inside_callback() {
        let clock = Rc::new(VirtualClock::new());
        let seen = Rc::new(Cell::new(0));
        let seen_in_callback = Rc::clone(&seen);
        let clock_in_callback = Rc::clone(&clock);
        clock.schedule_once(
            Duration::from_millis(250),
            Box::new(move || seen_in_callback.set(clock_in_callback.now())),
        );

        clock.advance(Duration::from_millis(1000));
        assert_eq!(seen.get(), 250);
        assert_eq!(clock.now(), 1000);
    }

    #[test]
    fn test_cancel_pending_timer() {
        let clock = VirtualClock::new();
        let (count, handle) = counter();
        let id = clock.schedule_repeating(
            Duration::from_millis(10),
            Box::new(move || handle.set(handle.get() + 1)),
        );

        assert!(clock.cancel(id));
        assert!(!clock.cancel(id));
        clock.advance(Duration::from_millis(100));
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_repeating_timer_can_cancel_itself() {
        let clock = Rc::new(VirtualClock::new());
        let (count, handle) = counter();
        let id_cell: Rc<Cell<Option<TimerId>>> = Rc::new(Cell::new(None));
        let id_in_callback = Rc::clone(&id_cell);
        let clock_in_callback = Rc::clone(&clock);

        let id = clock.schedule_repeating(
            Duration::from_millis(10),
            Box::new(move || {
                handle.set(handle.get() + 1);
                if handle.get() == 2 {
                    if let Some(id) = id_in_callback.get() {
                        clock_in_callback.cancel(id);
                    }
                }
            }),
        );
        id_cell.set(Some(id));

        clock.advance(Duration::from_millis(100));
        assert_eq!(count.get(), 2);
        assert_eq!(clock.pending_timers(), 0);
    }

    #[test]
    fn test_callback_can_schedule_followup() {
        let clock = Rc::new(VirtualClock::new());
        let (count, handle) = counter();
        let clock_in_callback = Rc::clone(&clock);

        clock.schedule_once(
            Duration::from_millis(10),
            Box::new(move || {
                let handle = Rc::clone(&handle);
                clock_in_callback.schedule_once(
                    Duration::from_millis(10),
                    Box::new(move || handle.set(handle.get() + 1)),
                );
            }),
        );

        // Follow-up is due at 20ms, inside the same advance window
        clock.advance(Duration::from_millis(25));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_same_due_time_fires_in_schedule_order() {
        let clock = VirtualClock::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        for tag in 0..3 {
            let order = Rc::clone(&order);
            clock.schedule_once(
                Duration::from_millis(5),
                Box::new(move || order.borrow_mut().push(tag)),
            );
        }

        clock.advance(Duration::from_millis(5));
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let clock = VirtualClock::new();
        let (count, handle) = counter();
        clock.schedule_repeating(
            Duration::ZERO,
            Box::new(move || handle.set(handle.get() + 1)),
        );

        clock.advance(Duration::from_millis(5));
        assert_eq!(count.get(), 5);
    }

    #[test]
    fn test_next_due_tracks_earliest_timer() {
        let queue = TimerQueue::new();
        assert_eq!(queue.next_due(), None);

        let late = queue.schedule_once(0, Duration::from_millis(500), Box::new(|| {}));
        let early = queue.schedule_once(0, Duration::from_millis(20), Box::new(|| {}));
        let repeating = queue.schedule_repeating(0, Duration::from_millis(100), Box::new(|| {}));
        assert_eq!(queue.next_due(), Some(20));

        assert!(queue.cancel(early));
        assert_eq!(queue.next_due(), Some(100));

        // The repeating timer is re-queued at its next due time
        assert_eq!(queue.run_until(100, |_| {}), 1);
        assert_eq!(queue.next_due(), Some(200));
        assert_eq!(queue.len(), 2);

        assert!(queue.cancel(repeating));
        assert!(queue.cancel(late));
        assert!(queue.is_empty());
        assert_eq!(queue.next_due(), None);
    }

    #[test]
    fn test_frame_clock_pump_without_due_timers() {
        let clock = FrameClock::new();
        clock.schedule_once(Duration::from_secs(3600), Box::new(|| {}));
        assert_eq!(clock.pump(), 0);
        assert!(clock.time_until_next().is_some());
    }
}
