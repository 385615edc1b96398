//! Background thread that periodically reaps abandoned connections.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

const THREAD_NAME: &str = "sqlpool-reaper";

/// Handle to a running reaper thread.
///
/// The thread calls its tick function once per period until the tick returns
/// `false` or the handle is stopped. Dropping the handle asks the thread to
/// stop without waiting for it.
pub struct Reaper {
    frequency: Duration,
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    fn stop(&self) {
        *self.stopped.lock() = true;
        self.cond.notify_all();
    }

    /// Sleep for `period` or until stopped. Returns whether stopped.
    fn wait(&self, period: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        let Some(deadline) = Instant::now().checked_add(period) else {
            while !*stopped {
                self.cond.wait(&mut stopped);
            }
            return true;
        };
        while !*stopped {
            if self.cond.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

impl Reaper {
    /// Start a reaper thread that calls `tick` every `frequency`.
    pub fn spawn<F>(frequency: Duration, mut tick: F) -> io::Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);

        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                tracing::debug!(frequency_ms = frequency.as_millis() as u64, "reaper started");
                while !thread_signal.wait(frequency) {
                    if !tick() {
                        break;
                    }
                }
                tracing::debug!("reaper stopped");
            })?;

        Ok(Self {
            frequency,
            signal,
            handle: Some(handle),
        })
    }

    /// How often the reaper runs.
    #[must_use]
    pub fn frequency(&self) -> Duration {
        self.frequency
    }

    /// Whether the thread is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the thread and wait for it to exit.
    ///
    /// Called from the reaper thread itself, this only signals.
    pub fn stop(mut self) {
        self.signal.stop();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::error!("reaper thread panicked");
            }
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.signal.stop();
    }
}

impl std::fmt::Debug for Reaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaper")
            .field("frequency", &self.frequency)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + deadline;
        while !done() {
            assert!(Instant::now() < deadline, "condition never held");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_ticks_periodically() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let reaper = Reaper::spawn(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        })
        .unwrap();

        wait_until(Duration::from_secs(5), || ticks.load(Ordering::SeqCst) >= 3);
        assert!(reaper.is_running());
        reaper.stop();
    }

    #[test]
    fn test_stop_interrupts_long_sleep() {
        let reaper = Reaper::spawn(Duration::from_secs(3600), || true).unwrap();
        let started = Instant::now();
        reaper.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_exits_when_tick_returns_false() {
        let reaper = Reaper::spawn(Duration::from_millis(5), || false).unwrap();
        wait_until(Duration::from_secs(5), || !reaper.is_running());
    }

    #[test]
    fn test_thread_is_named() {
        let name = Arc::new(Mutex::new(None));
        let seen = Arc::clone(&name);
        let reaper = Reaper::spawn(Duration::from_millis(5), move || {
            *seen.lock() = thread::current().name().map(str::to_string);
            false
        })
        .unwrap();
        wait_until(Duration::from_secs(5), || name.lock().is_some());
        assert_eq!(name.lock().as_deref(), Some(THREAD_NAME));
        reaper.stop();
    }
}
