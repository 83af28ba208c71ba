//! Cooperative yielding for single-threaded async loops

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Yield control back to the executor once
///
/// The returned future is pending on its first poll and immediately wakes
/// itself, so the executor gets a chance to run other ready tasks before the
/// caller resumes.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

/// Future returned by [`yield_now`]
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
