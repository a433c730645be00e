//! Whole-Tree Integration Tests
//!
//! Drive flips, schedules and overrides the way the render loop does
//! (`tick`, `is_dirty`, `render`) with a [`ManualClock`] so every step is
//! deterministic.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::json;

use grydgets_core::error::{NotifyError, RenderError};
use grydgets_core::node::{FlipNode, FlipParams, NotifiableNode, ScheduleFlipNode, ScheduleFlipParams, TextOverlay, TextStyle};
use grydgets_core::{
    load_config_from_str, BlockFont, BoxedNode, BuildContext, Color, ManualClock, Node, ProviderManager, SharedClock,
    Size, Surface, TransitionSettings, TreeManager,
};

// =============================================================================
// Test Infrastructure
// =============================================================================

const RED: Color = Color::rgb(255, 0, 0);
const BLUE: Color = Color::rgb(0, 0, 255);
const SIZE: Size = Size::new(10, 4);

/// Leaf that fills itself with one color and counts its ticks
#[derive(Debug)]
struct Solid {
    name: String,
    color: Color,
    ticks: Arc<AtomicUsize>,
}

impl Solid {
    fn boxed(name: &str, color: Color) -> (BoxedNode, Arc<AtomicUsize>) {
        let ticks = Arc::new(AtomicUsize::new(0));
        let node = Self {
            name: name.to_string(),
            color,
            ticks: Arc::clone(&ticks),
        };
        (Box::new(node), ticks)
    }
}

impl Node for Solid {
    fn name(&self) -> &str {
        &self.name
    }

    fn tick(&mut self) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
    }

    fn is_dirty(&self) -> bool {
        false
    }

    fn render(&mut self, size: Size) -> Result<Arc<Surface>, RenderError> {
        Ok(Arc::new(Surface::filled(size, self.color)))
    }
}

fn clock_at(hour: u32, minute: u32) -> Arc<ManualClock> {
    let wall = NaiveDate::from_ymd_opt(2024, 3, 1)
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .unwrap();
    Arc::new(ManualClock::starting_at(wall))
}

fn shared(clock: &Arc<ManualClock>) -> SharedClock {
    Arc::clone(clock) as SharedClock
}

fn left_and_right(surface: &Surface) -> (Color, Color) {
    let size = surface.size();
    (surface.pixel(0, 0).unwrap(), surface.pixel(size.width - 1, 0).unwrap())
}

// =============================================================================
// Flip
// =============================================================================

#[test]
fn test_flip_slides_to_next_child() {
    let clock = clock_at(12, 0);
    let params = FlipParams {
        interval: 5.0,
        transition: TransitionSettings { transition: 1.0, ease: 2.0 },
    };
    let mut flip = FlipNode::new("flip", &params, shared(&clock)).unwrap();
    let (a, a_ticks) = Solid::boxed("a", RED);
    let (b, b_ticks) = Solid::boxed("b", BLUE);
    flip.add_child(a).unwrap();
    flip.add_child(b).unwrap();
    flip.finish().unwrap();

    flip.tick();
    assert_eq!(left_and_right(&flip.render(SIZE).unwrap()), (RED, RED));
    assert!(!flip.is_dirty());
    assert_eq!(b_ticks.load(Ordering::SeqCst), 0);

    clock.advance_secs(5.0);
    flip.tick();
    assert!(flip.controller().is_transitioning());
    assert!(flip.is_dirty());

    clock.advance_secs(0.5);
    flip.tick();
    assert_eq!(left_and_right(&flip.render(SIZE).unwrap()), (RED, BLUE));
    assert!(b_ticks.load(Ordering::SeqCst) > 0);

    clock.advance_secs(0.5);
    flip.tick();
    assert!(!flip.controller().is_transitioning());
    assert_eq!(flip.controller().active(), 1);
    assert_eq!(left_and_right(&flip.render(SIZE).unwrap()), (BLUE, BLUE));

    let a_before = a_ticks.load(Ordering::SeqCst);
    flip.tick();
    assert_eq!(a_ticks.load(Ordering::SeqCst), a_before);
}

#[test]
fn test_flip_wraps_around() {
    let clock = clock_at(12, 0);
    let params = FlipParams {
        interval: 2.0,
        transition: TransitionSettings { transition: 0.0, ease: 2.0 },
    };
    let mut flip = FlipNode::new("flip", &params, shared(&clock)).unwrap();
    for (name, color) in [("a", RED), ("b", BLUE)] {
        flip.add_child(Solid::boxed(name, color).0).unwrap();
    }
    flip.finish().unwrap();

    let mut seen = Vec::new();
    for _ in 0..4 {
        clock.advance_secs(2.0);
        flip.tick();
        flip.tick();
        seen.push(flip.controller().active());
    }
    assert_eq!(seen, vec![1, 0, 1, 0]);
}

// =============================================================================
// Schedule
// =============================================================================

fn schedule_flip(clock: &Arc<ManualClock>) -> ScheduleFlipNode {
    let schedule: BTreeMap<String, String> = [("08:00", "day"), ("20:00", "night")]
        .into_iter()
        .map(|(t, n)| (t.to_string(), n.to_string()))
        .collect();
    let params = ScheduleFlipParams {
        schedule,
        transition: TransitionSettings { transition: 0.0, ease: 2.0 },
    };
    let mut node = ScheduleFlipNode::new("sched", &params, shared(clock)).unwrap();
    node.add_child(Solid::boxed("day", RED).0).unwrap();
    node.add_child(Solid::boxed("night", BLUE).0).unwrap();
    node.finish().unwrap();
    node
}

#[test]
fn test_schedule_starts_on_previous_day_entry() {
    let clock = clock_at(7, 59);
    let mut node = schedule_flip(&clock);

    assert_eq!(node.controller().active(), 1);
    assert_eq!(left_and_right(&node.render(SIZE).unwrap()), (BLUE, BLUE));
}

#[test]
fn test_schedule_follows_time_of_day() {
    let clock = clock_at(7, 59);
    let mut node = schedule_flip(&clock);

    clock.advance_secs(60.0);
    node.tick();
    node.tick();
    assert_eq!(node.controller().active(), 0);

    clock.advance_secs(12.0 * 3600.0);
    node.tick();
    node.tick();
    assert_eq!(node.controller().active(), 1);
    assert_eq!(left_and_right(&node.render(SIZE).unwrap()), (BLUE, BLUE));
}

// =============================================================================
// Overrides
// =============================================================================

fn notifiable(clock: &Arc<ManualClock>) -> NotifiableNode<TextOverlay> {
    let overlay = TextOverlay::new("alerts", TextStyle::centered(0), Arc::new(BlockFont::default()));
    let mut node = NotifiableNode::new("alerts", overlay, shared(clock));
    node.add_child(Solid::boxed("child", RED).0).unwrap();
    node.finish().unwrap();
    node
}

#[test]
fn test_override_expiry_dirties_once() {
    let clock = clock_at(12, 0);
    let mut node = notifiable(&clock);
    node.tick();
    node.render(SIZE).unwrap();
    assert!(!node.is_dirty());

    let handle = node.notify_handle().unwrap();
    handle.notify(json!({"text": "hello", "duration": 2.0})).unwrap();
    node.tick();
    assert!(node.is_showing());
    assert!(node.is_dirty());
    node.render(SIZE).unwrap();

    let mut dirty_ticks = 0;
    for _ in 0..6 {
        clock.advance_secs(0.5);
        node.tick();
        if node.is_dirty() {
            dirty_ticks += 1;
            node.render(SIZE).unwrap();
        }
    }
    assert_eq!(dirty_ticks, 1);
    assert!(!node.is_showing());
    assert_eq!(left_and_right(&node.render(SIZE).unwrap()), (RED, RED));
}

#[test]
fn test_override_rejects_bad_payload() {
    let clock = clock_at(12, 0);
    let node = notifiable(&clock);
    let handle = node.notify_handle().unwrap();

    assert!(matches!(
        handle.notify(json!({"colour": "red"})),
        Err(NotifyError::InvalidPayload(_))
    ));
}

// =============================================================================
// Built from configuration
// =============================================================================

const DASHBOARD: &str = r#"
    [graphics]
    resolution = [120, 40]

    [[widgets]]
    widget = "grid"
    rows = 1
    columns = 2
    children = [
        { widget = "notifiabletext", name = "alerts", children = [ { widget = "text", text = "idle" } ] },
        { widget = "flip", interval = 5, children = [ { widget = "text", text = "a" }, { widget = "text", text = "b" } ] },
    ]
"#;

#[test]
fn test_dashboard_from_config() {
    let config = load_config_from_str(DASHBOARD).unwrap();
    let providers = ProviderManager::new();
    let clock = clock_at(12, 0);
    let ctx = BuildContext::new(&providers).with_clock(shared(&clock));
    let mut tree = TreeManager::build(config.root_widget().unwrap(), &ctx).unwrap();

    let names = tree.node_names().to_vec();
    assert!(names.contains(&"alerts".to_string()));
    assert!(names.contains(&"grid1_flip1_text2".to_string()));

    tree.tick();
    let frame = tree.render(config.graphics.size()).unwrap();
    assert_eq!(frame.size(), Size::new(120, 40));

    tree.notify("alerts", json!({"text": "ring"})).unwrap();
    assert!(matches!(
        tree.notify("missing", json!({"text": "x"})),
        Err(NotifyError::WidgetNotFound(_))
    ));
    tree.tick();
    assert!(tree.is_dirty());

    let registry = tree.notify_registry();
    tree.stop_all();
    assert!(registry.is_empty());
}
