//! Data Providers
//!
//! A [`DataProvider`] polls one external [`Source`] on its own [`Worker`]
//! thread and publishes the latest result in a [`ProviderCache`]. Any number
//! of nodes read the cache; none of them ever triggers a fetch.
//!
//! ```text
//!   Worker thread                       Render thread
//!   ─────────────                       ─────────────
//!   source.fetch() ──► cache.commit ──► [Mutex] ◄── watch.has_update()
//!                                                ◄── cache.snapshot()
//! ```
//!
//! # Cache semantics
//!
//! - success: `value = Some`, `error = None`, stamp advances
//! - failure: `value = None`, `error = Some`, stamp unchanged
//!
//! A failed fetch blanks the value. Consumers see the error and decide on
//! their own fallback.

mod manager;
mod watch;

pub use self::manager::{ProviderManager, ProviderSpec, PROVIDER_TYPES};
pub use self::watch::ProviderWatch;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::BuildError;
use crate::fetch::SharedSource;
use crate::worker::{Cadence, Worker};

/// How long `stop` waits for a provider thread
pub const PROVIDER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Stamp
// ============================================================================

/// Freshness marker of a cache
///
/// Ordered by `seq`, which increments on every successful commit. `at`
/// carries the wall-clock time of that commit for display and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stamp {
    /// Number of successful commits so far
    pub seq: u64,
    /// Time of the last successful commit
    pub at: Option<DateTime<Utc>>,
}

impl Stamp {
    /// Stamp of a cache that has never succeeded
    pub const NEVER: Stamp = Stamp { seq: 0, at: None };

    fn next(self) -> Stamp {
        Stamp {
            seq: self.seq + 1,
            at: Some(Utc::now()),
        }
    }
}

impl Default for Stamp {
    fn default() -> Self {
        Self::NEVER
    }
}

// ============================================================================
// ProviderCache
// ============================================================================

/// One consistent read of a cache
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CacheSnapshot {
    /// Latest successful value, cleared by a failure
    pub value: Option<Value>,
    /// Latest failure message, cleared by a success
    pub error: Option<String>,
    /// Freshness marker
    pub stamp: Stamp,
}

/// Thread-safe, timestamped store for one provider's latest result
#[derive(Debug, Default)]
pub struct ProviderCache {
    state: Mutex<CacheSnapshot>,
}

impl ProviderCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful fetch
    pub fn commit_success(&self, value: Value) -> Stamp {
        let mut state = self.state.lock();
        state.value = Some(value);
        state.error = None;
        state.stamp = state.stamp.next();
        state.stamp
    }

    /// Record a failed fetch; the stamp does not move
    pub fn commit_failure(&self, error: impl Into<String>) {
        let mut state = self.state.lock();
        state.value = None;
        state.error = Some(error.into());
    }

    /// Latest value
    pub fn data(&self) -> Option<Value> {
        self.state.lock().value.clone()
    }

    /// Latest error
    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    /// Freshness marker
    pub fn timestamp(&self) -> Stamp {
        self.state.lock().stamp
    }

    /// Stamp and whether an error is current, without cloning the value
    pub fn status(&self) -> (Stamp, bool) {
        let state = self.state.lock();
        (state.stamp, state.error.is_some())
    }

    /// Value, error and stamp under one lock
    pub fn snapshot(&self) -> CacheSnapshot {
        self.state.lock().clone()
    }
}

// ============================================================================
// DataProvider
// ============================================================================

/// Shared provider handle held by the manager and by consumer nodes
pub type SharedProvider = Arc<DataProvider>;

/// Background poller for one source
#[derive(Debug)]
pub struct DataProvider {
    name: String,
    source: SharedSource,
    cadence: Cadence,
    cache: Arc<ProviderCache>,
    worker: Mutex<Option<Worker>>,
}

impl DataProvider {
    /// Create a stopped provider
    pub fn new(name: impl Into<String>, source: SharedSource, update_interval: Duration, jitter: Duration) -> Self {
        Self {
            name: name.into(),
            source,
            cadence: Cadence::every(update_interval).with_jitter(jitter),
            cache: Arc::new(ProviderCache::new()),
            worker: Mutex::new(None),
        }
    }

    /// Provider name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// URL or path of the source
    pub fn describe(&self) -> String {
        self.source.describe()
    }

    /// Polling cadence
    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    /// The cache consumers read
    pub fn cache(&self) -> &Arc<ProviderCache> {
        &self.cache
    }

    /// Latest value
    pub fn data(&self) -> Option<Value> {
        self.cache.data()
    }

    /// Latest error
    pub fn error(&self) -> Option<String> {
        self.cache.error()
    }

    /// Freshness marker
    pub fn timestamp(&self) -> Stamp {
        self.cache.timestamp()
    }

    /// Fetch once on the calling thread and commit the result
    ///
    /// Returns whether the fetch succeeded.
    pub fn fetch_once(&self) -> bool {
        fetch_and_commit(&self.name, &self.source, &self.cache)
    }

    /// Start the polling thread; the first fetch happens immediately
    pub fn start(&self) -> Result<(), BuildError> {
        let mut slot = self.worker.lock();
        if slot.is_some() {
            warn!(provider = %self.name, "Provider already started");
            return Ok(());
        }
        let name = self.name.clone();
        let source = Arc::clone(&self.source);
        let cache = Arc::clone(&self.cache);
        info!(provider = %self.name, source = %self.source.describe(), "Starting provider");
        *slot = Some(Worker::spawn(
            format!("provider:{}", self.name),
            self.cadence,
            move || {
                fetch_and_commit(&name, &source, &cache);
            },
        )?);
        Ok(())
    }

    /// Whether the polling thread is running
    pub fn is_running(&self) -> bool {
        self.worker.lock().as_ref().is_some_and(Worker::is_running)
    }

    /// Stop the polling thread, waiting up to `timeout`
    pub fn stop(&self, timeout: Duration) -> bool {
        let worker = self.worker.lock().take();
        match worker {
            Some(mut worker) => {
                info!(provider = %self.name, "Stopping provider");
                worker.stop(timeout)
            }
            None => true,
        }
    }
}

fn fetch_and_commit(name: &str, source: &SharedSource, cache: &ProviderCache) -> bool {
    debug!(provider = %name, "Fetching data");
    match source.fetch() {
        Ok(value) => {
            let stamp = cache.commit_success(value);
            debug!(provider = %name, seq = stamp.seq, "Fetch successful");
            true
        }
        Err(e) => {
            warn!(provider = %name, source = %source.describe(), error = %e, "Fetch failed");
            cache.commit_failure(e.to_string());
            false
        }
    }
}
