//! Ordered children with arity limits and dirty aggregation

use crate::error::TopologyError;

use super::BoxedNode;

/// The child list every container embeds
///
/// Insertion order is layout order. `max` is enforced on `push`, `min` on
/// [`Children::check_min`] once the build is complete.
pub struct Children {
    owner: String,
    min: usize,
    max: Option<usize>,
    nodes: Vec<BoxedNode>,
}

impl std::fmt::Debug for Children {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Children")
            .field("owner", &self.owner)
            .field("names", &self.nodes.iter().map(|n| n.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl Children {
    /// Container accepting between `min` and `max` children
    pub fn new(owner: impl Into<String>, min: usize, max: Option<usize>) -> Self {
        Self {
            owner: owner.into(),
            min,
            max,
            nodes: Vec::new(),
        }
    }

    /// Exactly `n` children
    pub fn exactly(owner: impl Into<String>, n: usize) -> Self {
        Self::new(owner, n, Some(n))
    }

    /// At least `n` children
    pub fn at_least(owner: impl Into<String>, n: usize) -> Self {
        Self::new(owner, n, None)
    }

    /// Append, failing if the container is full
    pub fn push(&mut self, child: BoxedNode) -> Result<(), TopologyError> {
        if let Some(max) = self.max {
            if self.nodes.len() >= max {
                return Err(TopologyError::TooManyChildren {
                    node: self.owner.clone(),
                    max,
                });
            }
        }
        self.nodes.push(child);
        Ok(())
    }

    /// Fail if fewer than the minimum were added
    pub fn check_min(&self) -> Result<(), TopologyError> {
        if self.nodes.len() < self.min {
            return Err(TopologyError::TooFewChildren {
                node: self.owner.clone(),
                min: self.min,
                actual: self.nodes.len(),
            });
        }
        Ok(())
    }

    /// Tick every child
    pub fn tick_all(&mut self) {
        for child in &mut self.nodes {
            child.tick();
        }
    }

    /// Whether any child is dirty
    pub fn any_dirty(&self) -> bool {
        self.nodes.iter().any(|c| c.is_dirty())
    }

    /// Position of the child called `name`
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|c| c.name() == name)
    }

    /// Child names in order
    pub fn names(&self) -> Vec<&str> {
        self.nodes.iter().map(|c| c.name()).collect()
    }

    /// Number of children
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether there are no children
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Children as a slice
    pub fn as_slice(&self) -> &[BoxedNode] {
        &self.nodes
    }

    /// Children as a mutable slice
    pub fn as_mut_slice(&mut self) -> &mut [BoxedNode] {
        &mut self.nodes
    }

    /// Child at `index`
    pub fn get_mut(&mut self, index: usize) -> Option<&mut BoxedNode> {
        self.nodes.get_mut(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SharedClock};
    use crate::node::testing::{MockNode, MockState};
    use crate::node::{
        GridNode, GridParams, LabelNode, Node, NotifiableNode, PillNode, ScreenNode, TextOverlay, TextStyle,
    };
    use crate::surface::{BlockFont, Color, SharedFont, Size};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    /// Random tree over the real containers
    #[derive(Debug, Clone)]
    enum Shape {
        Leaf(bool),
        Screen(Box<Shape>),
        Grid(u32, u32, Vec<Shape>),
        Label(bool, Box<Shape>),
        Pill(bool, Box<Shape>, Box<Shape>),
        Notifiable(Box<Shape>),
    }

    fn shape() -> impl Strategy<Value = Shape> {
        let leaf = any::<bool>().prop_map(Shape::Leaf);
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                inner.clone().prop_map(|c| Shape::Screen(Box::new(c))),
                (1u32..=2, 1u32..=2, prop::collection::vec(inner.clone(), 0..=4)).prop_map(
                    |(rows, columns, mut kids)| {
                        kids.truncate((rows * columns) as usize);
                        Shape::Grid(rows, columns, kids)
                    }
                ),
                (any::<bool>(), inner.clone()).prop_map(|(above, c)| Shape::Label(above, Box::new(c))),
                (any::<bool>(), inner.clone(), inner.clone())
                    .prop_map(|(circular, base, pill)| Shape::Pill(circular, Box::new(base), Box::new(pill))),
                inner.prop_map(|c| Shape::Notifiable(Box::new(c))),
            ]
        })
    }

    struct Builder {
        font: SharedFont,
        clock: SharedClock,
        leaves: Vec<(Arc<MockState>, bool)>,
    }

    impl Builder {
        fn new() -> Self {
            Self {
                font: Arc::new(BlockFont::default()),
                clock: Arc::new(ManualClock::new()),
                leaves: Vec::new(),
            }
        }

        fn build(&mut self, shape: &Shape) -> BoxedNode {
            let (mut node, kids): (BoxedNode, Vec<&Shape>) = match shape {
                Shape::Leaf(dirty) => {
                    let (node, state) = MockNode::boxed("leaf", Color::WHITE);
                    self.leaves.push((state, *dirty));
                    return node;
                }
                Shape::Screen(child) => {
                    let node = ScreenNode::new("screen", Color::BLACK);
                    (Box::new(node) as BoxedNode, vec![child.as_ref()])
                }
                Shape::Grid(rows, columns, kids) => (
                    Box::new(GridNode::new("grid", GridParams::new(*rows, *columns)).unwrap()) as BoxedNode,
                    kids.iter().collect(),
                ),
                Shape::Label(above, child) => {
                    let position = if *above { "above" } else { "below" };
                    let params = serde_json::from_value(json!({"text": "x", "position": position})).unwrap();
                    let node = LabelNode::new("label", &params, Arc::clone(&self.font));
                    (Box::new(node) as BoxedNode, vec![child.as_ref()])
                }
                Shape::Pill(circular, base, pill) => {
                    let params = serde_json::from_value(json!({
                        "circular_mask": circular,
                        "pill_width_percent": 0.5,
                        "pill_height_percent": 0.5,
                        "pill_position_y": 0.5,
                    }))
                    .unwrap();
                    (Box::new(PillNode::new("pill", params)) as BoxedNode, vec![base.as_ref(), pill.as_ref()])
                }
                Shape::Notifiable(child) => {
                    let overlay = TextOverlay::new("notify", TextStyle::centered(0), Arc::clone(&self.font));
                    let node = NotifiableNode::new("notify", overlay, Arc::clone(&self.clock));
                    (Box::new(node) as BoxedNode, vec![child.as_ref()])
                }
            };
            for kid in kids {
                let child = self.build(kid);
                node.add_child(child).unwrap();
            }
            node.finish().unwrap();
            node
        }
    }

    /// `is_dirty() == own || any(child)` at every container below `node`
    fn check_containers(node: &dyn Node, own: bool) -> Result<(), TestCaseError> {
        if node.children().is_empty() {
            return Ok(());
        }
        let any_child = node.children().iter().any(|c| c.is_dirty());
        prop_assert_eq!(node.is_dirty(), own || any_child, "container {}", node.name());
        for child in node.children() {
            check_containers(child.as_ref(), own)?;
        }
        Ok(())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_dirty_is_own_or_any_child(s in shape()) {
            let mut builder = Builder::new();
            let mut root = builder.build(&s);
            check_containers(root.as_ref(), true)?;

            // a full render clears every container's own flag
            root.render(Size::new(96, 96)).unwrap();
            for (state, dirty) in &builder.leaves {
                state.dirty.store(*dirty, Ordering::SeqCst);
            }
            check_containers(root.as_ref(), false)?;
        }
    }

    #[test]
    fn test_clean_tree_reuses_memo() {
        let (leaf, state) = MockNode::boxed("leaf", Color::WHITE);
        let mut screen = ScreenNode::new("screen", Color::BLACK);
        screen.add_child(leaf).unwrap();
        let size = Size::new(2, 2);

        let first = screen.render(size).unwrap();
        let second = screen.render(size).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(state.renders.load(Ordering::SeqCst), 1);

        state.dirty.store(true, Ordering::SeqCst);
        assert!(screen.is_dirty());
        screen.render(size).unwrap();
        assert_eq!(state.renders.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_arity_limits() {
        let mut children = Children::exactly("pill", 2);
        for i in 0..2 {
            children.push(MockNode::boxed(&format!("c{i}"), Color::WHITE).0).unwrap();
        }

        assert_eq!(
            children.push(MockNode::boxed("extra", Color::WHITE).0),
            Err(TopologyError::TooManyChildren { node: "pill".into(), max: 2 })
        );
        assert_eq!(children.names(), vec!["c0", "c1"]);
        assert_eq!(children.index_of("c1"), Some(1));

        let empty = Children::at_least("flip", 1);
        assert_eq!(
            empty.check_min(),
            Err(TopologyError::TooFewChildren { node: "flip".into(), min: 1, actual: 0 })
        );
    }
}
