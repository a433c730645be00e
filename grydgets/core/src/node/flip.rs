//! Flip Nodes
//!
//! Four containers that show one child at a time and slide between them.
//! They share [`FlipCore`] (children, [`TransitionController`], clock,
//! render memo) and differ only in how they pick the desired child:
//!
//! | Node               | Desired child                                          |
//! |--------------------|--------------------------------------------------------|
//! | [`FlipNode`]       | next child every `interval` seconds                    |
//! | [`ScheduleFlipNode`] | latest schedule entry at or before the time of day   |
//! | [`HttpFlipNode`]   | own timed fetch, value mapped through a [`ValueMap`]   |
//! | [`ProviderFlipNode`] | provider value mapped through a [`ValueMap`]         |
//!
//! The desired child is recomputed on every tick and requested from the
//! controller, which ignores requests while a slide is running. A failed
//! fetch or a provider error leaves the desired child unchanged.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use chrono::NaiveTime;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::debug;

use super::refresh::frequency;
use super::transition::slide;
use super::{
    render_child, BoxedNode, Children, Node, Refresher, RenderMemo, TransitionController, TransitionSettings,
};
use crate::clock::SharedClock;
use crate::error::{BuildError, RenderError, TopologyError};
use crate::extract::{value_to_text, Extraction};
use crate::fetch::{RestSpec, SharedSource};
use crate::provider::{ProviderWatch, SharedProvider};
use crate::surface::{Size, Surface};

// ============================================================================
// FlipCore
// ============================================================================

/// State shared by every flip variant
#[derive(Debug)]
struct FlipCore {
    name: String,
    children: Children,
    controller: TransitionController,
    clock: SharedClock,
    dirty: bool,
    memo: RenderMemo,
}

impl FlipCore {
    fn new(name: String, settings: TransitionSettings, clock: SharedClock) -> Self {
        Self {
            children: Children::at_least(name.clone(), 1),
            name,
            controller: TransitionController::new(0, settings),
            clock,
            dirty: true,
            memo: RenderMemo::default(),
        }
    }

    fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Finish a slide whose time is up
    fn settle(&mut self) {
        if self.controller.complete_if_due(self.now()) {
            debug!(node = %self.name, active = self.controller.active(), "Transition complete");
            self.dirty = true;
        }
    }

    /// Ask for `target`; dropped while a slide is running
    fn want(&mut self, target: usize) {
        if target >= self.children.len() {
            return;
        }
        let now = self.now();
        if self.controller.request(target, now) {
            debug!(node = %self.name, from = self.controller.active(), to = target, "Starting transition");
            self.dirty = true;
        }
    }

    /// Jump without animating, used for the initial child
    fn show(&mut self, index: usize) {
        if index < self.children.len() && index != self.controller.active() {
            self.controller.set_active(index);
            self.dirty = true;
        }
    }

    /// Tick the visible children only
    fn tick_children(&mut self) {
        let active = self.controller.active();
        let target = self.controller.target();
        for (i, child) in self.children.as_mut_slice().iter_mut().enumerate() {
            if i == active || Some(i) == target {
                child.tick();
            }
        }
    }

    fn is_dirty(&self) -> bool {
        self.dirty
            || self.controller.is_transitioning()
            || self
                .children
                .as_slice()
                .get(self.controller.active())
                .is_some_and(|c| c.is_dirty())
    }

    fn render(&mut self, size: Size) -> Result<Arc<Surface>, RenderError> {
        if self.children.is_empty() {
            return Err(RenderError::EmptyChildren(self.name.clone()));
        }
        let now = self.now();
        match self.controller.frame(now) {
            super::Blend::Still { index } => {
                let dirty = self.dirty;
                let child = self
                    .children
                    .get_mut(index)
                    .ok_or_else(|| RenderError::EmptyChildren(self.name.clone()))?;
                if !dirty && !child.is_dirty() {
                    if let Some(cached) = self.memo.get(size) {
                        return Ok(cached);
                    }
                }
                let rendered = render_child(child.as_mut(), size);
                self.dirty = rendered.is_none();
                let surface = rendered.unwrap_or_else(|| Arc::new(Surface::new(size)));
                Ok(self.memo.store_shared(surface))
            }
            super::Blend::Sliding { from, to, progress } => {
                let outgoing = self.children.get_mut(from).and_then(|c| render_child(c.as_mut(), size));
                let incoming = self.children.get_mut(to).and_then(|c| render_child(c.as_mut(), size));
                let out = slide(outgoing.as_deref(), incoming.as_deref(), size, progress);
                self.dirty = outgoing.is_none() || incoming.is_none();
                Ok(self.memo.store(out))
            }
        }
    }
}

/// Shared `Node` plumbing for types that wrap a [`FlipCore`] in `core`
macro_rules! flip_children {
    () => {
        fn name(&self) -> &str {
            &self.core.name
        }

        fn is_dirty(&self) -> bool {
            self.core.is_dirty()
        }

        fn render(&mut self, size: Size) -> Result<Arc<Surface>, RenderError> {
            self.core.render(size)
        }

        fn add_child(&mut self, child: BoxedNode) -> Result<(), TopologyError> {
            self.core.children.push(child)?;
            self.core.dirty = true;
            Ok(())
        }

        fn children(&self) -> &[BoxedNode] {
            self.core.children.as_slice()
        }

        fn children_mut(&mut self) -> &mut [BoxedNode] {
            self.core.children.as_mut_slice()
        }
    };
}

// ============================================================================
// FlipNode: fixed interval
// ============================================================================

fn default_interval() -> f64 {
    5.0
}

/// Parameters of a [`FlipNode`]
#[derive(Debug, Clone, Deserialize)]
pub struct FlipParams {
    /// Seconds each child is shown
    #[serde(default = "default_interval")]
    pub interval: f64,
    /// Slide settings
    #[serde(flatten)]
    pub transition: TransitionSettings,
}

impl Default for FlipParams {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            transition: TransitionSettings::default(),
        }
    }
}

/// Cycles through its children on a fixed interval
#[derive(Debug)]
pub struct FlipNode {
    core: FlipCore,
    interval: Duration,
    last_flip: Instant,
}

impl FlipNode {
    /// Interval flip reading time from `clock`
    pub fn new(name: impl Into<String>, params: &FlipParams, clock: SharedClock) -> Result<Self, BuildError> {
        let name = name.into();
        if !params.interval.is_finite() || params.interval <= 0.0 {
            return Err(BuildError::invalid(&name, format!("interval must be positive, got {}", params.interval)));
        }
        let last_flip = clock.now();
        Ok(Self {
            core: FlipCore::new(name, params.transition, clock),
            interval: Duration::from_secs_f64(params.interval),
            last_flip,
        })
    }

    /// The controller, for inspection
    pub fn controller(&self) -> &TransitionController {
        &self.core.controller
    }
}

impl Node for FlipNode {
    flip_children!();

    fn tick(&mut self) {
        self.core.settle();
        let now = self.core.now();
        if now.saturating_duration_since(self.last_flip) >= self.interval && !self.core.controller.is_transitioning() {
            let next = (self.core.controller.active() + 1) % self.core.children.len().max(1);
            self.core.want(next);
            self.last_flip = now;
        }
        self.core.tick_children();
    }

    fn finish(&mut self) -> Result<(), BuildError> {
        Ok(self.core.children.check_min()?)
    }
}

// ============================================================================
// Schedule
// ============================================================================

/// Time-of-day schedule mapping entry times to child names
///
/// The entry in force at time `t` is the latest one at or before `t`; before
/// the first entry of the day the last entry (from the previous day) holds.
#[derive(Debug, Clone)]
pub struct Schedule {
    entries: Vec<(NaiveTime, String)>,
    indices: Vec<usize>,
}

impl Schedule {
    /// Parse `"HH:MM"` or `"HH:MM:SS"` keys
    pub fn parse(owner: &str, raw: &BTreeMap<String, String>) -> Result<Self, BuildError> {
        if raw.is_empty() {
            return Err(BuildError::invalid(owner, "schedule needs at least one entry"));
        }
        let mut entries = raw
            .iter()
            .map(|(time, child)| {
                NaiveTime::parse_from_str(time, "%H:%M:%S")
                    .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M"))
                    .map(|t| (t, child.clone()))
                    .map_err(|_| BuildError::invalid(owner, format!("bad schedule time '{time}', expected HH:MM")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|(t, _)| *t);
        if entries.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(BuildError::invalid(owner, "schedule has two entries at the same time"));
        }
        Ok(Self {
            entries,
            indices: Vec::new(),
        })
    }

    /// Name of the child in force at `time`
    pub fn name_at(&self, time: NaiveTime) -> Option<&str> {
        self.position_at(time).map(|i| self.entries[i].1.as_str())
    }

    /// Child index in force at `time`, once names are resolved
    pub fn index_at(&self, time: NaiveTime) -> Option<usize> {
        self.position_at(time).and_then(|i| self.indices.get(i).copied())
    }

    fn position_at(&self, time: NaiveTime) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        let after = self.entries.partition_point(|(t, _)| *t <= time);
        Some(if after == 0 { self.entries.len() - 1 } else { after - 1 })
    }

    fn resolve(&mut self, owner: &str, children: &Children) -> Result<(), BuildError> {
        self.indices = self
            .entries
            .iter()
            .map(|(_, name)| child_index(owner, children, name))
            .collect::<Result<_, _>>()?;
        Ok(())
    }
}

fn child_index(owner: &str, children: &Children, name: &str) -> Result<usize, BuildError> {
    children.index_of(name).ok_or_else(|| {
        BuildError::invalid(
            owner,
            format!("no child named '{name}' (children: {})", children.names().join(", ")),
        )
    })
}

// ============================================================================
// ScheduleFlipNode
// ============================================================================

/// Parameters of a [`ScheduleFlipNode`]
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleFlipParams {
    /// `"HH:MM" -> child name`
    pub schedule: BTreeMap<String, String>,
    /// Slide settings
    #[serde(flatten)]
    pub transition: TransitionSettings,
}

/// Shows the child named by a time-of-day schedule
#[derive(Debug)]
pub struct ScheduleFlipNode {
    core: FlipCore,
    schedule: Schedule,
}

impl ScheduleFlipNode {
    /// Schedule flip reading local time from `clock`
    pub fn new(name: impl Into<String>, params: &ScheduleFlipParams, clock: SharedClock) -> Result<Self, BuildError> {
        let name = name.into();
        let schedule = Schedule::parse(&name, &params.schedule)?;
        Ok(Self {
            core: FlipCore::new(name, params.transition, clock),
            schedule,
        })
    }

    /// The schedule
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// The controller, for inspection
    pub fn controller(&self) -> &TransitionController {
        &self.core.controller
    }

    fn desired(&self) -> Option<usize> {
        self.schedule.index_at(self.core.clock.local_time().time())
    }
}

impl Node for ScheduleFlipNode {
    flip_children!();

    fn tick(&mut self) {
        self.core.settle();
        if let Some(target) = self.desired() {
            self.core.want(target);
        }
        self.core.tick_children();
    }

    fn finish(&mut self) -> Result<(), BuildError> {
        self.core.children.check_min()?;
        self.schedule.resolve(&self.core.name, &self.core.children)?;
        if let Some(initial) = self.desired() {
            self.core.show(initial);
        }
        Ok(())
    }
}

// ============================================================================
// ValueMap
// ============================================================================

/// `value -> child name` table with a default child
#[derive(Debug, Clone)]
pub struct ValueMap {
    mapping: BTreeMap<String, String>,
    default: Option<String>,
    indices: HashMap<String, usize>,
    default_index: usize,
}

impl ValueMap {
    /// Table falling back to the child named `default` (or the first child)
    pub fn new(mapping: BTreeMap<String, String>, default: Option<String>) -> Self {
        Self {
            mapping,
            default,
            indices: HashMap::new(),
            default_index: 0,
        }
    }

    /// Child index for `value`, or the default child
    pub fn index_for(&self, value: &str) -> usize {
        self.indices.get(value).copied().unwrap_or(self.default_index)
    }

    /// Index of the default child
    pub fn default_index(&self) -> usize {
        self.default_index
    }

    fn resolve(&mut self, owner: &str, children: &Children) -> Result<(), BuildError> {
        self.indices = self
            .mapping
            .iter()
            .map(|(value, name)| child_index(owner, children, name).map(|i| (value.clone(), i)))
            .collect::<Result<_, _>>()?;
        self.default_index = match &self.default {
            Some(name) => child_index(owner, children, name)?,
            None => 0,
        };
        Ok(())
    }
}

// ============================================================================
// HttpFlipNode
// ============================================================================

fn default_http_frequency() -> f64 {
    5.0
}

/// Parameters of an [`HttpFlipNode`]
#[derive(Debug, Clone, Deserialize)]
pub struct HttpFlipParams {
    /// The request and its extraction rule
    #[serde(flatten)]
    pub request: RestSpec,
    /// `value -> child name`
    #[serde(default)]
    pub mapping: BTreeMap<String, String>,
    /// Child shown for unmapped values
    #[serde(default)]
    pub default_widget: Option<String>,
    /// Seconds between fetches
    #[serde(default = "default_http_frequency")]
    pub update_frequency: f64,
    /// Slide settings
    #[serde(flatten)]
    pub transition: TransitionSettings,
}

/// Flips to the child mapped from its own periodically fetched value
#[derive(Debug)]
pub struct HttpFlipNode {
    core: FlipCore,
    map: ValueMap,
    latest: Arc<Mutex<Option<String>>>,
    refresher: Refresher,
}

impl HttpFlipNode {
    /// Build the node and start refreshing from `source`
    pub fn new(
        name: impl Into<String>,
        source: SharedSource,
        map: ValueMap,
        update_frequency: f64,
        transition: TransitionSettings,
        clock: SharedClock,
    ) -> Result<Self, BuildError> {
        let name = name.into();
        let interval = frequency(&name, update_frequency)?;
        let latest = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&latest);
        let refresher = Refresher::start(name.clone(), interval, move || {
            let value = source
                .fetch()
                .with_context(|| format!("fetching {}", source.describe()))?;
            let text = value_to_text(&value).trim().to_string();
            *slot.lock() = Some(text);
            Ok(())
        })?;

        Ok(Self {
            core: FlipCore::new(name, transition, clock),
            map,
            latest,
            refresher,
        })
    }

    /// Last successfully fetched value
    pub fn value(&self) -> Option<String> {
        self.latest.lock().clone()
    }

    /// The controller, for inspection
    pub fn controller(&self) -> &TransitionController {
        &self.core.controller
    }

    fn desired(&self) -> Option<usize> {
        self.latest.lock().as_deref().map(|v| self.map.index_for(v))
    }
}

impl Node for HttpFlipNode {
    flip_children!();

    fn tick(&mut self) {
        self.core.settle();
        if let Some(target) = self.desired() {
            self.core.want(target);
        }
        self.core.tick_children();
    }

    fn finish(&mut self) -> Result<(), BuildError> {
        self.core.children.check_min()?;
        self.map.resolve(&self.core.name, &self.core.children)?;
        let initial = self.desired().unwrap_or(self.map.default_index());
        self.core.show(initial);
        Ok(())
    }

    fn stop(&mut self) {
        if !self.refresher.stop() {
            tracing::warn!(node = %self.core.name, "Refresh loop still busy after stop timeout");
        }
    }
}

// ============================================================================
// ProviderFlipNode
// ============================================================================

/// Parameters of a [`ProviderFlipNode`]
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderFlipParams {
    /// Path/query applied to the provider value
    #[serde(flatten)]
    pub extraction: Extraction,
    /// `value -> child name`
    #[serde(default)]
    pub mapping: BTreeMap<String, String>,
    /// Child shown for unmapped values
    #[serde(default)]
    pub default_widget: Option<String>,
    /// Slide settings
    #[serde(flatten)]
    pub transition: TransitionSettings,
}

/// Flips to the child mapped from a shared provider's value
#[derive(Debug)]
pub struct ProviderFlipNode {
    core: FlipCore,
    map: ValueMap,
    extraction: Extraction,
    watch: ProviderWatch,
    desired: Option<usize>,
}

impl ProviderFlipNode {
    /// Flip driven by `provider`
    pub fn new(
        name: impl Into<String>,
        provider: SharedProvider,
        extraction: Extraction,
        map: ValueMap,
        transition: TransitionSettings,
        clock: SharedClock,
    ) -> Result<Self, BuildError> {
        let name = name.into();
        extraction.validate().map_err(|e| BuildError::invalid(&name, e))?;
        Ok(Self {
            core: FlipCore::new(name, transition, clock),
            map,
            extraction,
            watch: ProviderWatch::new(provider),
            desired: None,
        })
    }

    /// The controller, for inspection
    pub fn controller(&self) -> &TransitionController {
        &self.core.controller
    }

    fn observe(&mut self) {
        if !self.watch.has_update() {
            return;
        }
        let snapshot = self.watch.observe();
        let provider = self.watch.provider().name().to_string();
        let value = match (snapshot.error, snapshot.value) {
            (None, Some(value)) => value,
            (error, _) => {
                debug!(node = %self.core.name, provider = %provider, error = ?error, "No provider data, staying on current child");
                return;
            }
        };
        match self.extraction.apply(value) {
            Ok(extracted) => {
                let text = value_to_text(&extracted);
                let target = self.map.index_for(&text);
                debug!(node = %self.core.name, provider = %provider, value = %text, target, "Provider value mapped");
                self.desired = Some(target);
            }
            Err(e) => {
                debug!(node = %self.core.name, provider = %provider, error = %e, "Extraction failed, staying on current child");
            }
        }
    }
}

impl Node for ProviderFlipNode {
    flip_children!();

    fn tick(&mut self) {
        self.core.settle();
        self.observe();
        if let Some(target) = self.desired {
            self.core.want(target);
        }
        self.core.tick_children();
    }

    fn finish(&mut self) -> Result<(), BuildError> {
        self.core.children.check_min()?;
        self.map.resolve(&self.core.name, &self.core.children)?;
        self.core.show(self.map.default_index());
        Ok(())
    }
}
