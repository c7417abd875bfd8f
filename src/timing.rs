//! Clocks, the liveness watchdog, and pacing for bounded waits.
//!
//! Nothing in the connectivity core sleeps directly. Every wait goes through a
//! [`Pacer`], which sleeps at most one scheduling quantum at a time and feeds
//! the watchdog between quanta. A wedged modem therefore delays the worker by
//! at most the configured timeout, and the task watchdog keeps being fed while
//! it does.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default scheduling quantum for polling waits.
pub const DEFAULT_QUANTUM: Duration = Duration::from_millis(10);

/// Monotonic time source.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;
    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `std::time`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Liveness callback.
///
/// Missing the external deadline resets the device, so implementations must be
/// cheap and must never block.
pub trait Watchdog: Send + Sync {
    /// Signal that the worker is still making progress.
    fn feed(&self);
}

impl<F> Watchdog for F
where
    F: Fn() + Send + Sync,
{
    fn feed(&self) {
        self()
    }
}

/// Watchdog for builds without a hardware watchdog.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWatchdog;

impl Watchdog for NoWatchdog {
    fn feed(&self) {}
}

/// ESP-IDF task watchdog for the calling task.
#[cfg(feature = "esp32")]
#[derive(Debug)]
pub struct TaskWatchdog;

#[cfg(feature = "esp32")]
impl TaskWatchdog {
    /// Subscribe the current task to the task watchdog.
    ///
    /// Must be called from the thread that will feed it.
    pub fn subscribe_current() -> Result<Self, esp_idf_sys::EspError> {
        esp_idf_sys::esp!(unsafe { esp_idf_sys::esp_task_wdt_add(core::ptr::null_mut()) })?;
        Ok(Self)
    }
}

#[cfg(feature = "esp32")]
impl Watchdog for TaskWatchdog {
    fn feed(&self) {
        unsafe {
            esp_idf_sys::esp_task_wdt_reset();
        }
    }
}

/// Clock plus watchdog, shared by everything that waits.
#[derive(Clone)]
pub struct Pacer {
    clock: Arc<dyn Clock>,
    watchdog: Arc<dyn Watchdog>,
    quantum: Duration,
}

impl Pacer {
    /// Create a pacer from a clock and a watchdog.
    pub fn new(clock: Arc<dyn Clock>, watchdog: Arc<dyn Watchdog>) -> Self {
        Self {
            clock,
            watchdog,
            quantum: DEFAULT_QUANTUM,
        }
    }

    /// System clock, no watchdog.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock), Arc::new(NoWatchdog))
    }

    /// Override the scheduling quantum.
    pub fn with_quantum(mut self, quantum: Duration) -> Self {
        self.quantum = quantum.max(Duration::from_millis(1));
        self
    }

    pub fn quantum(&self) -> Duration {
        self.quantum
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Instant `timeout` from now.
    pub fn deadline(&self, timeout: Duration) -> Instant {
        self.clock.now() + timeout
    }

    pub fn expired(&self, deadline: Instant) -> bool {
        self.clock.now() >= deadline
    }

    /// Time left until `deadline` (zero once it has passed).
    pub fn remaining(&self, deadline: Instant) -> Duration {
        deadline.saturating_duration_since(self.clock.now())
    }

    /// Invoke the liveness callback.
    pub fn feed(&self) {
        self.watchdog.feed();
    }

    /// Feed the watchdog, then sleep one quantum, never past `deadline`.
    pub fn idle_until(&self, deadline: Instant) {
        self.watchdog.feed();
        let step = self.remaining(deadline).min(self.quantum);
        if !step.is_zero() {
            self.clock.sleep(step);
        }
    }

    /// Sleep for `duration` in quantum steps, feeding the watchdog on each step.
    pub fn pause(&self, duration: Duration) {
        let deadline = self.deadline(duration);
        while !self.expired(deadline) {
            self.idle_until(deadline);
        }
        self.watchdog.feed();
    }
}

impl fmt::Debug for Pacer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pacer")
            .field("quantum", &self.quantum)
            .finish_non_exhaustive()
    }
}

impl Default for Pacer {
    fn default() -> Self {
        Self::system()
    }
}
