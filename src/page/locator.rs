//! Layered element location.
//!
//! A [`LocatorChain`] tries structural strategies in order and reports which
//! one matched. Positional strategies are a last resort and say so, so the
//! caller can surface the guess.

use std::fmt;

use super::dom::{DomSnapshot, ElementHandle, NodeId, Selector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// Matched on a structural marker
    Structural,
    /// Picked by position; may be the wrong element
    Positional,
}

pub trait Locator: Send + Sync {
    fn locate(&self, dom: &DomSnapshot) -> Option<NodeId>;

    fn describe(&self) -> String;

    fn confidence(&self) -> Confidence {
        Confidence::Structural
    }
}

/// First displayed match of a selector
impl Locator for Selector {
    fn locate(&self, dom: &DomSnapshot) -> Option<NodeId> {
        dom.first_visible(self).map(|n| n.id)
    }

    fn describe(&self) -> String {
        self.to_string()
    }
}

/// A control tied to a `<label>` by structural class, through the label's
/// `for` attribute or by nesting.
#[derive(Debug, Clone)]
pub struct ByLabel {
    pub label: Selector,
    pub control: Selector,
}

impl Locator for ByLabel {
    fn locate(&self, dom: &DomSnapshot) -> Option<NodeId> {
        for label in dom.query_visible(&self.label) {
            if let Some(target) = label.attributes.get("for") {
                let by_for = dom
                    .query_visible(&self.control)
                    .find(|n| n.dom_id.as_deref() == Some(target.as_str()));
                if let Some(node) = by_for {
                    return Some(node.id);
                }
            }
            let nested = dom
                .query_visible(&self.control)
                .find(|n| dom.ancestors(n.id).any(|a| a.id == label.id));
            if let Some(node) = nested {
                return Some(node.id);
            }
        }
        None
    }

    fn describe(&self) -> String {
        format!("label {} -> {}", self.label, self.control)
    }
}

/// The `index`-th displayed match of a selector
#[derive(Debug, Clone)]
pub struct ByPosition {
    pub candidates: Selector,
    pub index: usize,
}

impl Locator for ByPosition {
    fn locate(&self, dom: &DomSnapshot) -> Option<NodeId> {
        dom.query_visible(&self.candidates).nth(self.index).map(|n| n.id)
    }

    fn describe(&self) -> String {
        format!("{} (visible #{})", self.candidates, self.index + 1)
    }

    fn confidence(&self) -> Confidence {
        Confidence::Positional
    }
}

/// Result of a successful chain lookup
#[derive(Debug)]
pub struct Located {
    pub handle: ElementHandle,
    pub strategy: String,
    pub confidence: Confidence,
}

impl Located {
    pub fn is_guess(&self) -> bool {
        self.confidence == Confidence::Positional
    }
}

pub struct LocatorChain {
    name: &'static str,
    strategies: Vec<Box<dyn Locator>>,
}

impl LocatorChain {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            strategies: Vec::new(),
        }
    }

    pub fn then(mut self, strategy: impl Locator + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn resolve(&self, dom: &DomSnapshot) -> Option<Located> {
        for strategy in &self.strategies {
            if let Some(node) = strategy.locate(dom) {
                let located = Located {
                    handle: dom.handle(node),
                    strategy: strategy.describe(),
                    confidence: strategy.confidence(),
                };
                tracing::trace!(chain = self.name, strategy = %located.strategy, %node, "located");
                return Some(located);
            }
        }
        tracing::debug!(chain = self.name, "no strategy matched");
        None
    }
}

impl fmt::Debug for LocatorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strategies: Vec<String> = self.strategies.iter().map(|s| s.describe()).collect();
        f.debug_struct("LocatorChain")
            .field("name", &self.name)
            .field("strategies", &strategies)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::dom::{DomBuilder, ElementNode, Viewport};

    fn chain() -> LocatorChain {
        LocatorChain::new("profile")
            .then(Selector::tag("select").name("profile"))
            .then(Selector::tag("select").attr_contains("*", "pid_profile"))
            .then(ByLabel {
                label: Selector::tag("label").class("profile_label"),
                control: Selector::tag("select"),
            })
            .then(ByPosition {
                candidates: Selector::tag("select").within(Selector::with_class("profile-switch")),
                index: 0,
            })
    }

    fn page(select: ElementNode, label: Option<ElementNode>) -> DomSnapshot {
        let mut b = DomBuilder::new(Viewport { width: 800.0, height: 600.0 }, 1);
        let switch = b.push(None, ElementNode::new("div").class("profile-switch"));
        match label {
            Some(label) => {
                let l = b.push(Some(switch), label);
                b.push(Some(l), select);
            }
            None => {
                b.push(Some(switch), select);
            }
        }
        b.build()
    }

    #[test]
    fn test_exact_marker_wins() {
        let dom = page(ElementNode::new("select").name("profile"), None);
        let hit = chain().resolve(&dom).unwrap();
        assert_eq!(hit.confidence, Confidence::Structural);
        assert_eq!(hit.strategy, "select[name=profile]");
    }

    #[test]
    fn test_attribute_fallback() {
        let dom = page(ElementNode::new("select").attr("data-setting", "pid_profile_index"), None);
        let hit = chain().resolve(&dom).unwrap();
        assert!(!hit.is_guess());
        assert!(hit.strategy.contains("pid_profile"));
    }

    #[test]
    fn test_label_fallback() {
        let dom = page(
            ElementNode::new("select"),
            Some(ElementNode::new("label").class("profile_label")),
        );
        let hit = chain().resolve(&dom).unwrap();
        assert!(hit.strategy.starts_with("label"));
        assert!(!hit.is_guess());
    }

    #[test]
    fn test_label_for_attribute() {
        let mut b = DomBuilder::new(Viewport::default(), 1);
        b.push(None, ElementNode::new("label").class("profile_label").attr("for", "p1"));
        let target = b.push(None, ElementNode::new("select").id("p1"));
        let dom = b.build();
        let locator = ByLabel {
            label: Selector::tag("label").class("profile_label"),
            control: Selector::tag("select"),
        };
        assert_eq!(locator.locate(&dom), Some(target));
    }

    #[test]
    fn test_positional_guess_is_flagged() {
        let dom = page(ElementNode::new("select"), None);
        let hit = chain().resolve(&dom).unwrap();
        assert!(hit.is_guess());
    }

    #[test]
    fn test_invisible_controls_are_ignored() {
        let dom = page(ElementNode::new("select").name("profile").visible(false), None);
        assert!(chain().resolve(&dom).is_none());
    }
}
