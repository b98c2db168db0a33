//! Structural snapshot of the hosted page.
//!
//! The inspection script returns the page as a flat list of nodes carrying
//! only structural facts (tag, classes, id, name, attributes, geometry).
//! Handles into a snapshot are single-use: every action consumes one, and the
//! page rejects handles from an older generation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Layout box in logical (CSS) pixels, relative to the viewport
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

/// Computed CSS `position`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Positioning {
    #[default]
    Static,
    Relative,
    Absolute,
    Fixed,
    Sticky,
}

/// Scroll state of a scrollable element, logical pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ScrollMetrics {
    /// Content height hidden below the fold when scrolled to the top
    pub fn overflow(&self) -> f64 {
        (self.scroll_height - self.client_height).max(0.0)
    }

    pub fn at_bottom(&self, tolerance: f64) -> bool {
        self.scroll_top + self.client_height >= self.scroll_height - tolerance
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

/// One element as reported by the inspection script
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub tag: String,
    pub classes: Vec<String>,
    pub dom_id: Option<String>,
    pub name: Option<String>,
    pub attributes: BTreeMap<String, String>,
    /// Rendered text; localized, display only
    pub text: String,
    pub visible: bool,
    pub value: Option<String>,
    /// Values of `<option>` children, for selects
    pub options: Vec<String>,
    pub checked: Option<bool>,
    pub rect: Rect,
    pub position: Positioning,
    pub scroll: Option<ScrollMetrics>,
}

impl ElementNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            visible: true,
            ..Default::default()
        }
    }

    pub fn class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.dom_id = Some(id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn options(mut self, options: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn checked(mut self, checked: bool) -> Self {
        self.checked = Some(checked);
        self
    }

    pub fn rect(mut self, rect: Rect) -> Self {
        self.rect = rect;
        self
    }

    pub fn position(mut self, position: Positioning) -> Self {
        self.position = position;
        self
    }

    pub fn scroll(mut self, metrics: ScrollMetrics) -> Self {
        self.scroll = Some(metrics);
        self
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    pub fn class_with_prefix(&self, prefix: &str) -> Option<&str> {
        self.classes.iter().map(String::as_str).find(|c| c.starts_with(prefix))
    }

    /// Attribute lookup that also covers `id`, `name` and `class`
    pub fn attr_value(&self, key: &str) -> Option<String> {
        match key {
            "id" => self.dom_id.clone(),
            "name" => self.name.clone(),
            "class" => (!self.classes.is_empty()).then(|| self.classes.join(" ")),
            other => self.attributes.get(other).cloned(),
        }
    }
}

/// Single-use reference to a node of one snapshot generation
#[derive(Debug, PartialEq, Eq)]
pub struct ElementHandle {
    node: NodeId,
    generation: u64,
}

impl ElementHandle {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// The whole page as seen by one run of the inspection script
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomSnapshot {
    /// Bumped by the page whenever the framework re-renders
    pub generation: u64,
    pub viewport: Viewport,
    /// Document order
    pub nodes: Vec<ElementNode>,
}

impl DomSnapshot {
    pub fn node(&self, id: NodeId) -> Option<&ElementNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Handle for acting on `id`; valid until the page re-renders
    pub fn handle(&self, id: NodeId) -> ElementHandle {
        ElementHandle {
            node: id,
            generation: self.generation,
        }
    }

    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = &ElementNode> + '_ {
        let mut next = self.node(id).and_then(|n| n.parent);
        std::iter::from_fn(move || {
            let node = self.node(next?)?;
            next = node.parent;
            Some(node)
        })
    }

    /// A node is displayed if it and all its ancestors are visible
    pub fn is_displayed(&self, id: NodeId) -> bool {
        self.node(id).map(|n| n.visible).unwrap_or(false) && self.ancestors(id).all(|a| a.visible)
    }

    /// All nodes matching `selector`, document order
    pub fn query<'a, 's>(&'a self, selector: &'s Selector) -> impl Iterator<Item = &'a ElementNode> {
        self.nodes.iter().filter(move |n| selector.matches(self, n))
    }

    /// Displayed nodes matching `selector`, document order
    pub fn query_visible<'a, 's>(&'a self, selector: &'s Selector) -> impl Iterator<Item = &'a ElementNode> {
        self.query(selector).filter(move |n| self.is_displayed(n.id))
    }

    pub fn first_visible(&self, selector: &Selector) -> Option<&ElementNode> {
        self.query_visible(selector).next()
    }
}

/// Builds snapshots node by node, assigning ids and parents
#[derive(Debug, Default)]
pub struct DomBuilder {
    snapshot: DomSnapshot,
}

impl DomBuilder {
    pub fn new(viewport: Viewport, generation: u64) -> Self {
        Self {
            snapshot: DomSnapshot {
                generation,
                viewport,
                nodes: Vec::new(),
            },
        }
    }

    pub fn push(&mut self, parent: Option<NodeId>, mut node: ElementNode) -> NodeId {
        let id = NodeId(self.snapshot.nodes.len() as u32);
        node.id = id;
        node.parent = parent;
        self.snapshot.nodes.push(node);
        id
    }

    pub fn build(self) -> DomSnapshot {
        self.snapshot
    }
}

/// Structural element query: tag, classes, id, name, attribute substring,
/// and an optional ancestor constraint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selector {
    pub tag: Option<String>,
    pub classes: Vec<String>,
    pub class_prefix: Option<String>,
    pub dom_id: Option<String>,
    pub name: Option<String>,
    pub attr_contains: Option<(String, String)>,
    pub within: Option<Box<Selector>>,
}

impl Selector {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
            ..Self::default()
        }
    }

    pub fn with_class(class: impl Into<String>) -> Self {
        Self::any().class(class)
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self::any().id(id)
    }

    pub fn class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    pub fn class_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.class_prefix = Some(prefix.into());
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.dom_id = Some(id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn attr_contains(mut self, attr: impl Into<String>, needle: impl Into<String>) -> Self {
        self.attr_contains = Some((attr.into(), needle.into()));
        self
    }

    pub fn within(mut self, ancestor: Selector) -> Self {
        self.within = Some(Box::new(ancestor));
        self
    }

    pub fn matches(&self, dom: &DomSnapshot, node: &ElementNode) -> bool {
        if let Some(tag) = &self.tag {
            if !node.tag.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if !self.classes.iter().all(|c| node.has_class(c)) {
            return false;
        }
        if let Some(prefix) = &self.class_prefix {
            if node.class_with_prefix(prefix).is_none() {
                return false;
            }
        }
        if self.dom_id.is_some() && node.dom_id != self.dom_id {
            return false;
        }
        if self.name.is_some() && node.name != self.name {
            return false;
        }
        if let Some((attr, needle)) = &self.attr_contains {
            let hit = if attr == "*" {
                ["id", "name", "class"]
                    .iter()
                    .filter_map(|k| node.attr_value(k))
                    .chain(node.attributes.values().cloned())
                    .any(|v| v.contains(needle.as_str()))
            } else {
                node.attr_value(attr).is_some_and(|v| v.contains(needle.as_str()))
            };
            if !hit {
                return false;
            }
        }
        if let Some(ancestor) = &self.within {
            if !dom.ancestors(node.id).any(|a| ancestor.matches(dom, a)) {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ancestor) = &self.within {
            write!(f, "{} ", ancestor)?;
        }
        let mut empty = true;
        if let Some(tag) = &self.tag {
            write!(f, "{}", tag)?;
            empty = false;
        }
        if let Some(id) = &self.dom_id {
            write!(f, "#{}", id)?;
            empty = false;
        }
        for class in &self.classes {
            write!(f, ".{}", class)?;
            empty = false;
        }
        if let Some(prefix) = &self.class_prefix {
            write!(f, "[class^={}]", prefix)?;
            empty = false;
        }
        if let Some(name) = &self.name {
            write!(f, "[name={}]", name)?;
            empty = false;
        }
        if let Some((attr, needle)) = &self.attr_contains {
            write!(f, "[{}*={}]", attr, needle)?;
            empty = false;
        }
        if empty {
            write!(f, "*")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DomSnapshot {
        let mut b = DomBuilder::new(Viewport { width: 800.0, height: 600.0 }, 3);
        let tabs = b.push(None, ElementNode::new("div").id("tabs"));
        let ul = b.push(Some(tabs), ElementNode::new("ul").class("mode-connected"));
        b.push(Some(ul), ElementNode::new("li").class("tab_setup").text("Setup"));
        b.push(Some(ul), ElementNode::new("li").class("tab_ports").text("Ports").visible(false));
        let hidden = b.push(None, ElementNode::new("div").visible(false));
        b.push(Some(hidden), ElementNode::new("li").class("tab_orphan"));
        b.push(
            None,
            ElementNode::new("select").name("rate_profile").attr("data-role", "rate-profile-switch"),
        );
        b.build()
    }

    #[test]
    fn test_query_with_ancestor_and_prefix() {
        let dom = sample();
        let nav = Selector::tag("li").class_prefix("tab_").within(Selector::with_id("tabs"));
        let all: Vec<_> = dom.query(&nav).map(|n| n.classes[0].as_str()).collect();
        assert_eq!(all, ["tab_setup", "tab_ports"]);
        let visible: Vec<_> = dom.query_visible(&nav).map(|n| n.classes[0].as_str()).collect();
        assert_eq!(visible, ["tab_setup"]);
    }

    #[test]
    fn test_hidden_ancestor_hides_descendant() {
        let dom = sample();
        let orphan = dom.query(&Selector::with_class("tab_orphan")).next().unwrap();
        assert!(!dom.is_displayed(orphan.id));
    }

    #[test]
    fn test_attribute_substring() {
        let dom = sample();
        assert!(dom.first_visible(&Selector::tag("select").attr_contains("name", "rate")).is_some());
        assert!(dom.first_visible(&Selector::tag("select").attr_contains("*", "profile-switch")).is_some());
        assert!(dom.first_visible(&Selector::tag("select").attr_contains("id", "rate")).is_none());
    }

    #[test]
    fn test_handles_carry_generation() {
        let dom = sample();
        let handle = dom.handle(NodeId(2));
        assert_eq!(handle.node(), NodeId(2));
        assert_eq!(handle.generation(), 3);
    }

    #[test]
    fn test_selector_display() {
        let sel = Selector::tag("select").name("profile").within(Selector::with_class("profile-switch"));
        assert_eq!(sel.to_string(), ".profile-switch select[name=profile]");
    }

    #[test]
    fn test_scroll_metrics() {
        let m = ScrollMetrics {
            scroll_top: 780.0,
            scroll_height: 1180.0,
            client_height: 400.0,
        };
        assert_eq!(m.overflow(), 780.0);
        assert!(m.at_bottom(5.0));
        let top = ScrollMetrics { scroll_top: 0.0, ..m };
        assert!(!top.at_bottom(5.0));
    }
}
