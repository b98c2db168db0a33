//! Structural markers of the configurator UI.
//!
//! Only classes, ids, names and attributes; display text is localized and
//! never matched.

use crate::page::locator::{ByLabel, ByPosition, LocatorChain};
use crate::page::Selector;

/// Prefix of a navigation item's structural class
pub const PANEL_CLASS_PREFIX: &str = "tab_";

/// Panels that are never opened; their controls can change device state
pub const BLACKLIST: &[&str] = &[
    "tab_firmware_flasher",
    "tab_motors",
    "tab_onboard_logging",
    "tab_landing",
    "tab_help",
];

pub const CONSOLE_PANEL: &str = "tab_cli";
pub const VARIANT_PANEL: &str = "tab_pid_tuning";

/// Content regions smaller than this overflow are captured without scrolling
pub const SCROLL_NOISE_PX: f64 = 100.0;
/// Distance from the bottom that counts as scrolled to the end
pub const SCROLL_END_TOLERANCE_PX: f64 = 5.0;
/// Fixed elements whose bottom edge is this close to the viewport bottom are hidden while scrolling
pub const OVERLAY_BAND_PX: f64 = 80.0;
/// Console text at or below this length is noise
pub const CONSOLE_NOISE_CHARS: usize = 10;

pub fn nav_items() -> Selector {
    Selector::tag("li")
        .class_prefix(PANEL_CLASS_PREFIX)
        .within(Selector::with_id("tabs"))
}

pub fn nav_item(structural_class: &str) -> Selector {
    Selector::tag("li").class(structural_class).within(Selector::with_id("tabs"))
}

pub fn connected_nav() -> Selector {
    Selector::tag("ul").class("mode-connected")
}

pub fn disconnected_nav() -> Selector {
    Selector::tag("ul").class("mode-disconnected")
}

pub fn connection_indicators() -> [Selector; 2] {
    [Selector::with_id("connectbutton"), Selector::with_class("connect_state")]
}

/// Candidates for the scrollable content region, in priority order
pub fn content_regions() -> [Selector; 3] {
    [
        Selector::with_class("tab_container"),
        Selector::with_class("content_wrapper"),
        Selector::with_id("content"),
    ]
}

/// Sub-panel tab patterns, in priority order
pub fn subpanel_patterns() -> [Selector; 4] {
    [
        Selector::with_class("subtab").within(Selector::with_class("tab_container")),
        Selector::with_class("subtab").within(Selector::with_class("cf_tab")),
        Selector::tag("a").within(Selector::tag("li").within(Selector::with_class("tabs"))),
        Selector::any().attr_contains("data-subtab", ""),
    ]
}

pub fn expert_mode_toggle() -> Selector {
    Selector::tag("input").name("expertModeCheckbox")
}

/// Terminal emulator's hidden input
pub fn terminal_input() -> Selector {
    Selector::tag("textarea").class("xterm-helper-textarea")
}

pub fn plain_console_inputs() -> [Selector; 2] {
    [
        Selector::tag("input").name("command"),
        Selector::tag("textarea").within(Selector::with_class("cli")),
    ]
}

fn positional_select(index: usize) -> [ByPosition; 2] {
    [
        ByPosition {
            candidates: Selector::tag("select").within(Selector::with_class("profile-switch")),
            index,
        },
        ByPosition {
            candidates: Selector::tag("select").within(Selector::with_class("tab_container")),
            index,
        },
    ]
}

pub fn primary_profile_control() -> LocatorChain {
    let [in_switch, in_content] = positional_select(0);
    LocatorChain::new("profile")
        .then(Selector::tag("select").name("profile"))
        .then(Selector::tag("select").id("profile"))
        .then(Selector::tag("select").class("profile"))
        .then(Selector::tag("select").attr_contains("*", "pid_profile"))
        .then(ByLabel {
            label: Selector::tag("label").class("profile_label"),
            control: Selector::tag("select"),
        })
        .then(in_switch)
        .then(in_content)
}

pub fn secondary_profile_control() -> LocatorChain {
    let [in_switch, in_content] = positional_select(1);
    LocatorChain::new("rate_profile")
        .then(Selector::tag("select").name("rate_profile"))
        .then(Selector::tag("select").id("rateProfile"))
        .then(Selector::tag("select").class("rate_profile"))
        .then(Selector::tag("select").attr_contains("*", "rate_profile"))
        .then(ByLabel {
            label: Selector::tag("label").class("rate_profile_label"),
            control: Selector::tag("select"),
        })
        .then(in_switch)
        .then(in_content)
}

pub fn primary_subpanel() -> Selector {
    Selector::with_class("subtab-pid")
}

pub fn secondary_subpanel() -> Selector {
    Selector::with_class("subtab-rates")
}

pub fn global_subpanel() -> Selector {
    Selector::with_class("subtab-filter")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{DomBuilder, ElementNode, Viewport};

    #[test]
    fn test_attribute_presence_pattern() {
        let mut b = DomBuilder::new(Viewport::default(), 1);
        b.push(None, ElementNode::new("button").attr("data-subtab", "receiver"));
        b.push(None, ElementNode::new("button"));
        let dom = b.build();
        let pattern = &subpanel_patterns()[3];
        assert_eq!(dom.query_visible(pattern).count(), 1);
    }

    #[test]
    fn test_secondary_chain_does_not_match_primary() {
        let mut b = DomBuilder::new(Viewport::default(), 1);
        b.push(None, ElementNode::new("select").name("profile"));
        let dom = b.build();
        assert!(primary_profile_control().resolve(&dom).is_some());
        assert!(secondary_profile_control().resolve(&dom).is_none());
    }
}
