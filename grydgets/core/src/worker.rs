//! Background Workers
//!
//! Every provider and every refreshing node owns exactly one [`Worker`]: a
//! named OS thread running a body on a jittered cadence until told to stop.
//!
//! ```text
//!   spawn ──► [run once?] ──► wait(interval + jitter) ──┬─ timeout ──► run ──┐
//!                              ▲                        │                   │
//!                              └────────────────────────┼───────────────────┘
//!                                                       └─ stop ──► exit, signal done
//! ```
//!
//! # Cancellation
//!
//! The wait is a `recv_timeout` on a stop channel, so a stop request wakes
//! the thread immediately when it is idle. A body that is mid-fetch finishes
//! first; [`Worker::stop`] waits for that only up to its timeout, then
//! detaches the thread and logs a warning.
//!
//! # Resilience
//!
//! The body runs under `catch_unwind`. A panic is logged and the loop goes on
//! to its next wait. The done signal is sent from a drop guard, so the join
//! contract holds even if the loop itself unwinds.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, warn};

use crate::error::BuildError;

/// Upper bound on the jitter a refreshing node adds to its interval
pub const MAX_REFRESH_JITTER: Duration = Duration::from_secs(15);

/// How often a worker runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    /// Base wait between runs
    pub interval: Duration,
    /// Upper bound of the uniform random delay added to each wait
    pub jitter: Duration,
    /// Run once as soon as the thread starts, before the first wait
    pub immediate: bool,
}

impl Cadence {
    /// Run immediately, then every `interval`
    pub const fn every(interval: Duration) -> Self {
        Self {
            interval,
            jitter: Duration::ZERO,
            immediate: true,
        }
    }

    /// Cadence for a refreshing node: jitter is `min(interval / 2, 15s)`
    /// and the first run is left to the caller
    pub fn refreshing(interval: Duration) -> Self {
        Self {
            interval,
            jitter: (interval / 2).min(MAX_REFRESH_JITTER),
            immediate: false,
        }
    }

    /// Set the jitter bound
    #[must_use]
    pub const fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Skip the immediate first run
    #[must_use]
    pub const fn deferred(mut self) -> Self {
        self.immediate = false;
        self
    }

    /// Wait before the next run
    pub fn next_wait(&self, rng: &mut impl Rng) -> Duration {
        if self.jitter.is_zero() {
            return self.interval;
        }
        self.interval + Duration::from_secs_f64(rng.gen_range(0.0..=self.jitter.as_secs_f64()))
    }
}

/// Sends the done signal however the thread exits
struct DoneGuard(Sender<()>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

/// Handle to one background loop
#[derive(Debug)]
pub struct Worker {
    name: String,
    stop_tx: Option<Sender<()>>,
    done_rx: Option<Receiver<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Start a named thread that runs `body` on `cadence`
    pub fn spawn<F>(name: impl Into<String>, cadence: Cadence, mut body: F) -> Result<Self, BuildError>
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let thread_name = name.clone();

        let handle = std::thread::Builder::new()
            .name(format!("grydgets:{name}"))
            .spawn(move || {
                let _done = DoneGuard(done_tx);
                let mut run = || {
                    if panic::catch_unwind(AssertUnwindSafe(&mut body)).is_err() {
                        error!(worker = %thread_name, "Worker body panicked, continuing");
                    }
                };

                if cadence.immediate {
                    run();
                }
                let mut rng = rand::thread_rng();
                loop {
                    match stop_rx.recv_timeout(cadence.next_wait(&mut rng)) {
                        Err(RecvTimeoutError::Timeout) => run(),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!(worker = %thread_name, "Worker stopped");
            })
            .map_err(|source| BuildError::Spawn {
                name: name.clone(),
                source,
            })?;

        debug!(worker = %name, interval = ?cadence.interval, jitter = ?cadence.jitter, "Worker started");
        Ok(Self {
            name,
            stop_tx: Some(stop_tx),
            done_rx: Some(done_rx),
            handle: Some(handle),
        })
    }

    /// Worker name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `stop` has not yet been called
    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }

    /// Signal the loop to exit and wait up to `timeout` for it
    ///
    /// Returns `true` if the thread finished in time. On timeout the thread
    /// is detached; it exits on its own after its current run.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        let Some(done) = self.done_rx.take() else {
            return true;
        };
        match done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(worker = %self.name, timeout = ?timeout, "Worker did not stop in time, detaching");
                self.handle.take();
                false
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    fn counting(count: &Arc<AtomicUsize>) -> impl FnMut() + Send + 'static {
        let count = Arc::clone(count);
        move || {
            count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_runs_repeatedly_and_stops() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut worker =
            Worker::spawn("repeat", Cadence::every(Duration::from_millis(5)), counting(&count)).unwrap();

        assert!(wait_until(Duration::from_secs(5), || count.load(Ordering::SeqCst) >= 3));
        assert!(worker.stop(Duration::from_secs(5)));
        assert!(!worker.is_running());

        let after = count.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), after);
    }

    #[test]
    fn test_deferred_waits_for_interval() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut worker = Worker::spawn(
            "deferred",
            Cadence::every(Duration::from_secs(3600)).deferred(),
            counting(&count),
        )
        .unwrap();

        let started = Instant::now();
        assert!(worker.stop(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_body_keeps_looping() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let mut worker = Worker::spawn("panicky", Cadence::every(Duration::from_millis(5)), move || {
            if c.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first run fails");
            }
        })
        .unwrap();

        assert!(wait_until(Duration::from_secs(5), || count.load(Ordering::SeqCst) >= 3));
        assert!(worker.stop(Duration::from_secs(5)));
    }

    #[test]
    fn test_stop_times_out_on_slow_body() {
        let mut worker = Worker::spawn("slow", Cadence::every(Duration::from_secs(60)), || {
            std::thread::sleep(Duration::from_millis(500));
        })
        .unwrap();

        assert!(!worker.stop(Duration::from_millis(20)));
        // Second stop is a no-op
        assert!(worker.stop(Duration::from_millis(20)));
    }

    #[test]
    fn test_refreshing_jitter_is_capped() {
        let c = Cadence::refreshing(Duration::from_secs(600));
        assert_eq!(c.jitter, MAX_REFRESH_JITTER);
        assert!(!c.immediate);

        let c = Cadence::refreshing(Duration::from_secs(10));
        assert_eq!(c.jitter, Duration::from_secs(5));

        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let wait = c.next_wait(&mut rng);
            assert!(wait >= c.interval && wait <= c.interval + c.jitter);
        }
    }
}
