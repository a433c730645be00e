//! Clocks
//!
//! Time-driven nodes never call `Instant::now()` directly. They read time
//! through an injected [`Clock`] so the same code runs against the system
//! clock in production and against a [`ManualClock`] in tests.
//!
//! Two readings are exposed:
//!
//! - [`Clock::now`]: monotonic, used for intervals and transition progress
//! - [`Clock::local_time`]: wall-clock local time, used for schedules and
//!   the date/clock display

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime};
use parking_lot::Mutex;

/// Source of monotonic and wall-clock time
pub trait Clock: Send + Sync + fmt::Debug {
    /// Monotonic "now"
    fn now(&self) -> Instant;

    /// Local wall-clock date and time
    fn local_time(&self) -> NaiveDateTime;
}

/// Shared clock handle passed down during tree construction
pub type SharedClock = Arc<dyn Clock>;

/// The real clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn local_time(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock that only moves when told to
///
/// Both readings advance together: `advance(d)` moves the monotonic reading
/// and the wall-clock reading by the same `d`.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    wall_origin: NaiveDateTime,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Create a manual clock whose wall-clock reading starts at `wall`
    pub fn starting_at(wall: NaiveDateTime) -> Self {
        Self {
            origin: Instant::now(),
            wall_origin: wall,
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Create a manual clock starting at the current local time
    pub fn new() -> Self {
        Self::starting_at(Local::now().naive_local())
    }

    /// Move both readings forward
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    /// Move both readings forward by fractional seconds
    pub fn advance_secs(&self, secs: f64) {
        self.advance(Duration::from_secs_f64(secs));
    }

    /// Time elapsed since construction
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }

    fn local_time(&self) -> NaiveDateTime {
        let offset = *self.offset.lock();
        // Offsets in tests are far below chrono's range limits
        self.wall_origin + chrono::Duration::from_std(offset).unwrap_or_else(|_| chrono::Duration::zero())
    }
}
