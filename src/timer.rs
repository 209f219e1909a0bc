//! Performance measurement tools.

use std::{
    cell::Cell,
    fmt,
    time::{Duration, Instant},
};

use itertools::Itertools;

/// Smoothing factor of the exponential moving average kept by each [`Timer`].
const EMA_ALPHA: f32 = 0.3;

/// A timer that measures and averages the time an operation takes.
///
/// Collected timings are averaged and reset when the timer is displayed using `{}`
/// ([`std::fmt::Display`]).
///
/// The main loop is single-threaded, so the timer keeps its state in [`Cell`]s and can be shared
/// by reference with the code being timed.
pub struct Timer {
    name: &'static str,
    /// Exponential moving average of the measured durations, in seconds.
    avg: Cell<Option<f32>>,
    /// The number of measurements that contributed to `avg`.
    count: Cell<u32>,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            avg: Cell::new(None),
            count: Cell::new(0),
        }
    }

    /// Invokes a closure, measuring and recording the time it takes.
    pub fn time<T>(&self, timee: impl FnOnce() -> T) -> T {
        let _guard = self.start();
        timee()
    }

    /// Starts timing an operation using a drop guard.
    ///
    /// When the returned [`TimerGuard`] is dropped, the time between the call to `start` and the
    /// drop is recorded.
    pub fn start(&self) -> TimerGuard<'_> {
        TimerGuard {
            start: Instant::now(),
            timer: self,
        }
    }

    fn record(&self, duration: Duration) {
        let secs = duration.as_secs_f32();
        let avg = match self.avg.get() {
            Some(prev) => prev + EMA_ALPHA * (secs - prev),
            None => secs,
        };
        self.avg.set(Some(avg));
        self.count.set(self.count.get() + 1);
    }
}

/// Displays the average recorded time and resets it.
impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let avg_ms = self.avg.take().unwrap_or(0.0) * 1000.0;
        let count = self.count.take();

        write!(f, "{}: {count}x{avg_ms:.01}ms", self.name)
    }
}

/// Guard returned by [`Timer::start`]. Stops timing the operation when dropped.
pub struct TimerGuard<'a> {
    start: Instant,
    timer: &'a Timer,
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.timer.record(self.start.elapsed());
    }
}

/// Logs frames per second, together with a set of [`Timer`]s.
pub struct FpsCounter {
    name: String,
    frames: u32,
    start: Instant,
}

impl FpsCounter {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            frames: 0,
            start: Instant::now(),
        }
    }

    /// Advances the frame counter by 1 and logs FPS and `timers` if one second has passed.
    pub fn tick_with<'a, I: IntoIterator<Item = &'a Timer>>(&mut self, timers: I) {
        self.frames += 1;
        if self.start.elapsed() < Duration::from_secs(1) {
            return;
        }

        let timers = timers.into_iter().join(", ");
        if timers.is_empty() {
            log::debug!("{}: {} FPS", self.name, self.frames);
        } else {
            log::debug!("{}: {} FPS ({timers})", self.name, self.frames);
        }

        self.frames = 0;
        self.start = Instant::now();
    }
}
