/// System tick and timers.
///
/// The board's SysTick interrupt advances a 32-bit millisecond counter;
/// that is the only thing interrupt context touches here. Pending `Delay`s
/// are kept in a timer list that the scheduler scans once per round, so
/// no waker is ever invoked from an interrupt.
///
/// All comparisons use wrapping arithmetic, so the counter may roll over
/// (every ~49 days) without stalling sleepers.
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::future::Future;
use core::pin::Pin;
use core::sync::atomic::{AtomicU32, Ordering};
use core::task::{Context, Poll, Waker};

use spin::Mutex;

/// Shared millisecond tick. Clones observe the same counter.
#[derive(Clone)]
pub struct SysTick {
    inner: Arc<TickInner>,
}

struct TickInner {
    ms: AtomicU32,
    timers: Mutex<Vec<Timer>>,
}

struct Timer {
    start: u32,
    ms: u32,
    waker: Waker,
}

impl SysTick {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TickInner {
                ms: AtomicU32::new(0),
                timers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Advance the clock. Safe to call from the tick interrupt.
    pub fn tick(&self, ms: u32) {
        self.inner.ms.fetch_add(ms, Ordering::AcqRel);
    }

    /// Milliseconds since the tick started (wrapping).
    pub fn now_ms(&self) -> u32 {
        self.inner.ms.load(Ordering::Acquire)
    }

    /// Milliseconds elapsed since `start`, a previous `now_ms()` reading.
    pub fn elapsed_since(&self, start: u32) -> u32 {
        self.now_ms().wrapping_sub(start)
    }

    /// Suspend the calling task for at least `ms` milliseconds.
    pub fn delay_ms(&self, ms: u32) -> Delay {
        Delay {
            tick: self.clone(),
            start: self.now_ms(),
            ms,
            armed: false,
        }
    }

    /// Deadline `ms` from now, or one that never expires.
    pub fn deadline(&self, ms: Option<u32>) -> Deadline {
        Deadline {
            start: self.now_ms(),
            ms,
        }
    }

    /// Wake every sleeper whose delay has run out. Returns how many fired.
    pub(crate) fn fire_expired(&self) -> usize {
        let now = self.now_ms();
        let mut fired = 0;
        self.inner.timers.lock().retain(|t| {
            if now.wrapping_sub(t.start) >= t.ms {
                t.waker.wake_by_ref();
                fired += 1;
                false
            } else {
                true
            }
        });
        fired
    }

    pub(crate) fn pending_timers(&self) -> usize {
        self.inner.timers.lock().len()
    }

    fn arm(&self, start: u32, ms: u32, waker: Waker) {
        self.inner.timers.lock().push(Timer { start, ms, waker });
    }
}

impl Default for SysTick {
    fn default() -> Self {
        Self::new()
    }
}

/// Future returned by `SysTick::delay_ms`.
pub struct Delay {
    tick: SysTick,
    start: u32,
    ms: u32,
    armed: bool,
}

impl Future for Delay {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.tick.elapsed_since(self.start) >= self.ms {
            return Poll::Ready(());
        }
        if !self.armed {
            self.armed = true;
            self.tick.arm(self.start, self.ms, cx.waker().clone());
        }
        Poll::Pending
    }
}

/// Optional timeout for a blocking stack call.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: u32,
    ms: Option<u32>,
}

impl Deadline {
    pub fn expired(&self, tick: &SysTick) -> bool {
        match self.ms {
            Some(ms) => tick.elapsed_since(self.start) >= ms,
            None => false,
        }
    }
}

/// Extends the wrapping 32-bit tick into a monotonic 64-bit millisecond
/// count, for consumers (smoltcp) that cannot tolerate rollover.
pub struct Uptime {
    last: u32,
    total: u64,
}

impl Uptime {
    pub fn new(now: u32) -> Self {
        Self {
            last: now,
            total: now as u64,
        }
    }

    /// Fold in a fresh tick reading. Must be called at least once per
    /// counter period.
    pub fn update(&mut self, now: u32) -> u64 {
        self.total += now.wrapping_sub(self.last) as u64;
        self.last = now;
        self.total
    }
}
