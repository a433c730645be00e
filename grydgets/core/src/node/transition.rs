//! Transition Controller
//!
//! The state machine shared by every flip node:
//!
//! ```text
//!            request(t), t != active
//!   Idle(a) ─────────────────────────► Transitioning(a ──► t, started)
//!      ▲                                        │
//!      └──────── elapsed >= duration ───────────┘  (active = t)
//! ```
//!
//! Requests made while transitioning are dropped; callers re-evaluate their
//! desired target every tick, so the latest wish is applied once the
//! controller is idle again.
//!
//! Progress is `ease(elapsed / duration)` with the symmetric ease-in-out
//! `v^k / (v^k + (1 - v)^k)`. A zero duration snaps.

use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::surface::{Size, Surface};

/// Symmetric ease-in-out with exponent `k`, input clamped to `[0, 1]`
pub fn ease_in_out(v: f64, k: f64) -> f64 {
    let v = v.clamp(0.0, 1.0);
    if v <= 0.0 {
        return 0.0;
    }
    if v >= 1.0 {
        return 1.0;
    }
    let a = v.powf(k);
    let b = (1.0 - v).powf(k);
    a / (a + b)
}

fn default_transition() -> f64 {
    1.0
}

fn default_ease() -> f64 {
    2.0
}

/// Animation settings shared by the flip family
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TransitionSettings {
    /// Slide duration in seconds; 0 snaps
    #[serde(default = "default_transition")]
    pub transition: f64,
    /// Ease exponent
    #[serde(default = "default_ease")]
    pub ease: f64,
}

impl Default for TransitionSettings {
    fn default() -> Self {
        Self {
            transition: default_transition(),
            ease: default_ease(),
        }
    }
}

impl TransitionSettings {
    /// Slide duration; negative or non-finite values snap
    pub fn duration(&self) -> Duration {
        if self.transition.is_finite() && self.transition > 0.0 {
            Duration::from_secs_f64(self.transition)
        } else {
            Duration::ZERO
        }
    }
}

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Showing the active child
    Idle,
    /// Sliding from the active child to `target`
    Transitioning {
        /// Incoming child
        target: usize,
        /// When the slide began
        started: Instant,
    },
}

/// What to draw this frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Blend {
    /// One child, unshifted
    Still {
        /// Child to draw
        index: usize,
    },
    /// Outgoing child shifted left, incoming child entering from the right
    Sliding {
        /// Outgoing child
        from: usize,
        /// Incoming child
        to: usize,
        /// Eased progress in `[0, 1]`
        progress: f64,
    },
}

/// Time-driven switch between child indices
#[derive(Debug, Clone)]
pub struct TransitionController {
    active: usize,
    phase: Phase,
    settings: TransitionSettings,
}

impl TransitionController {
    /// Idle on `active`
    pub fn new(active: usize, settings: TransitionSettings) -> Self {
        Self {
            active,
            phase: Phase::Idle,
            settings,
        }
    }

    /// Index currently shown (the outgoing one while transitioning)
    pub fn active(&self) -> usize {
        self.active
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Animation settings
    pub fn settings(&self) -> TransitionSettings {
        self.settings
    }

    /// Whether a slide is in progress
    pub fn is_transitioning(&self) -> bool {
        matches!(self.phase, Phase::Transitioning { .. })
    }

    /// Incoming index while transitioning
    pub fn target(&self) -> Option<usize> {
        match self.phase {
            Phase::Idle => None,
            Phase::Transitioning { target, .. } => Some(target),
        }
    }

    /// Jump to `index` without animating; ignored while transitioning
    pub fn set_active(&mut self, index: usize) {
        if !self.is_transitioning() {
            self.active = index;
        }
    }

    /// Begin a slide to `target`
    ///
    /// Accepted only while idle and only if `target` differs from the active
    /// index. Returns whether the request was accepted.
    pub fn request(&mut self, target: usize, now: Instant) -> bool {
        if self.is_transitioning() || target == self.active {
            return false;
        }
        self.phase = Phase::Transitioning { target, started: now };
        true
    }

    /// Eased progress of the current slide, `None` when idle
    pub fn progress(&self, now: Instant) -> Option<f64> {
        let Phase::Transitioning { started, .. } = self.phase else {
            return None;
        };
        let duration = self.settings.duration();
        if duration.is_zero() {
            return Some(1.0);
        }
        let elapsed = now.saturating_duration_since(started);
        Some(ease_in_out(elapsed.as_secs_f64() / duration.as_secs_f64(), self.settings.ease))
    }

    fn is_due(&self, now: Instant) -> bool {
        match self.phase {
            Phase::Idle => false,
            Phase::Transitioning { started, .. } => now.saturating_duration_since(started) >= self.settings.duration(),
        }
    }

    /// Finish the slide if its duration has elapsed; returns whether it did
    pub fn complete_if_due(&mut self, now: Instant) -> bool {
        if !self.is_due(now) {
            return false;
        }
        if let Some(target) = self.target() {
            self.active = target;
        }
        self.phase = Phase::Idle;
        true
    }

    /// The blend to draw at `now`
    ///
    /// The frame on which a slide finishes is still drawn as a slide at
    /// progress 1; the controller is idle afterwards.
    pub fn frame(&mut self, now: Instant) -> Blend {
        let (Some(to), Some(progress)) = (self.target(), self.progress(now)) else {
            return Blend::Still { index: self.active };
        };
        let from = self.active;
        let progress = if self.complete_if_due(now) { 1.0 } else { progress };
        Blend::Sliding { from, to, progress }
    }
}

/// Compose one sliding frame: `from` leaves to the left, `to` enters from the right
pub(super) fn slide(from: Option<&Surface>, to: Option<&Surface>, size: Size, progress: f64) -> Surface {
    let width = f64::from(size.width);
    let mut out = Surface::new(size);
    if let Some(from) = from {
        out.blit(from, ((-width * progress).round() as i32, 0));
    }
    if let Some(to) = to {
        out.blit(to, ((width * (1.0 - progress)).round() as i32, 0));
    }
    out
}
