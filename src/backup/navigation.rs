//! Panel discovery, filtering, connectivity and navigation.

use serde::Serialize;

use super::markers;
use super::{RunContext, RunError, RunResult};
use crate::page::{DomSnapshot, PageError};
use crate::preferences::CaptureOptions;
use crate::retry::{RetryPolicy, retry_if_cancellable};

/// A navigable panel as found in the navigation bar
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PanelDescriptor {
    /// Stable, non-localized class such as `tab_setup`
    pub structural_class: String,
    /// Localized text, display only
    pub display_label: String,
}

impl PanelDescriptor {
    pub fn new(structural_class: impl Into<String>, display_label: impl Into<String>) -> Self {
        Self {
            structural_class: structural_class.into(),
            display_label: display_label.into(),
        }
    }

    pub fn kind(&self) -> PanelKind {
        match self.structural_class.as_str() {
            markers::CONSOLE_PANEL => PanelKind::Console,
            markers::VARIANT_PANEL => PanelKind::Variant,
            _ => PanelKind::Plain,
        }
    }

    pub fn is_blacklisted(&self) -> bool {
        markers::BLACKLIST.contains(&self.structural_class.as_str())
    }
}

/// Which unit handles a panel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelKind {
    Plain,
    Variant,
    Console,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Connected,
    Disconnected,
    Unknown,
}

/// Visible navigation items, in page order, one per structural class
pub fn discover_panels(dom: &DomSnapshot) -> Vec<PanelDescriptor> {
    let selector = markers::nav_items();
    let mut panels: Vec<PanelDescriptor> = Vec::new();
    for node in dom.query_visible(&selector) {
        let Some(class) = node.class_with_prefix(markers::PANEL_CLASS_PREFIX) else {
            continue;
        };
        if panels.iter().any(|p| p.structural_class == class) {
            continue;
        }
        panels.push(PanelDescriptor::new(class, node.text.trim()));
    }
    panels
}

/// Whether a panel is visited under `options`
pub fn is_included(panel: &PanelDescriptor, options: &CaptureOptions) -> bool {
    if panel.is_blacklisted() {
        return false;
    }
    match panel.kind() {
        PanelKind::Console => options.include_console_dump,
        _ => options.include_screenshots && options.is_selected(&panel.structural_class),
    }
}

pub fn select_panels(panels: &[PanelDescriptor], options: &CaptureOptions) -> Vec<PanelDescriptor> {
    panels.iter().filter(|p| is_included(p, options)).cloned().collect()
}

/// Layered connection heuristics; the first conclusive one wins
pub fn probe_connectivity(dom: &DomSnapshot) -> Connectivity {
    for selector in markers::connection_indicators() {
        if let Some(indicator) = dom.query(&selector).next() {
            return if indicator.has_class("active") {
                Connectivity::Connected
            } else {
                Connectivity::Disconnected
            };
        }
    }

    let connected_nav = dom.first_visible(&markers::connected_nav()).is_some();
    let disconnected_nav = dom.first_visible(&markers::disconnected_nav()).is_some();
    match (connected_nav, disconnected_nav) {
        (true, false) => Connectivity::Connected,
        (false, true) => Connectivity::Disconnected,
        _ => Connectivity::Unknown,
    }
}

/// Discover panels, waiting for the UI to finish initializing
pub async fn discover(ctx: &RunContext) -> RunResult<Vec<PanelDescriptor>> {
    let attempts = ctx.settings.discovery_attempts;
    let policy = RetryPolicy::fixed(attempts, ctx.settings.discovery_delay);
    retry_if_cancellable(
        &policy,
        Some(&ctx.cancel),
        |attempt| async move {
            ctx.checkpoint()?;
            let panels = discover_panels(&ctx.inspect().await?);
            if panels.is_empty() {
                tracing::debug!(attempt, "no navigation items yet");
                return Err(RunError::NoPanels(attempts));
            }
            Ok::<_, RunError>(panels)
        },
        |e| matches!(e, RunError::NoPanels(_)),
    )
    .await
}

/// `Err(Disconnected)` only on an explicit disconnected reading.
///
/// A page that cannot be inspected reads as unknown.
pub async fn check_connection(ctx: &RunContext) -> RunResult<()> {
    let connectivity = match ctx.inspect().await {
        Ok(dom) => probe_connectivity(&dom),
        Err(RunError::Page(e)) => {
            tracing::warn!(error = %e, "connectivity probe failed, assuming connected");
            Connectivity::Unknown
        }
        Err(e) => return Err(e),
    };
    match connectivity {
        Connectivity::Disconnected => Err(RunError::Disconnected),
        Connectivity::Unknown => {
            tracing::debug!("connectivity unknown, assuming connected");
            Ok(())
        }
        Connectivity::Connected => Ok(()),
    }
}

/// Open a panel and wait for it to settle
pub async fn navigate(ctx: &RunContext, panel: &PanelDescriptor) -> RunResult<()> {
    let selector = markers::nav_item(&panel.structural_class);
    let dom = ctx.inspect().await?;
    let item = dom
        .first_visible(&selector)
        .ok_or_else(|| PageError::NotFound(selector.to_string()))?;
    ctx.page.click(dom.handle(item.id)).await?;
    tracing::debug!(panel = %panel.structural_class, "navigated");
    ctx.pause(ctx.settings.settle).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{DomBuilder, ElementNode, Viewport};
    use pretty_assertions::assert_eq;

    fn nav(classes: &[&str], indicator: Option<bool>) -> DomSnapshot {
        let mut b = DomBuilder::new(Viewport::default(), 1);
        let tabs = b.push(None, ElementNode::new("div").id("tabs"));
        let ul = b.push(Some(tabs), ElementNode::new("ul").class("mode-connected"));
        for class in classes {
            b.push(Some(ul), ElementNode::new("li").class(*class).class("ng-scope").text(class.to_uppercase()));
        }
        if let Some(active) = indicator {
            let mut button = ElementNode::new("a").id("connectbutton");
            if active {
                button = button.class("active");
            }
            b.push(None, button);
        }
        b.build()
    }

    fn classes(panels: &[PanelDescriptor]) -> Vec<&str> {
        panels.iter().map(|p| p.structural_class.as_str()).collect()
    }

    #[test]
    fn test_discovery_dedupes_and_keeps_order() {
        let dom = nav(&["tab_setup", "tab_ports", "tab_setup", "tab_cli"], None);
        let panels = discover_panels(&dom);
        assert_eq!(classes(&panels), vec!["tab_setup", "tab_ports", "tab_cli"]);
        assert_eq!(panels[0].display_label, "TAB_SETUP");
    }

    #[test]
    fn test_filter_rules() {
        let panels = discover_panels(&nav(
            &["tab_setup", "tab_motors", "tab_cli", "tab_pid_tuning", "tab_help"],
            None,
        ));

        let all = CaptureOptions::default();
        assert_eq!(classes(&select_panels(&panels, &all)), vec!["tab_setup", "tab_cli", "tab_pid_tuning"]);

        let no_console = CaptureOptions::default().console_dump(false);
        assert_eq!(classes(&select_panels(&panels, &no_console)), vec!["tab_setup", "tab_pid_tuning"]);

        let console_only = CaptureOptions::default().screenshots(false);
        assert_eq!(classes(&select_panels(&panels, &console_only)), vec!["tab_cli"]);

        let picked = CaptureOptions::default().select(["tab_pid_tuning", "tab_motors"]);
        assert_eq!(classes(&select_panels(&panels, &picked)), vec!["tab_cli", "tab_pid_tuning"]);
    }

    #[test]
    fn test_connectivity_layers() {
        assert_eq!(probe_connectivity(&nav(&["tab_setup"], Some(true))), Connectivity::Connected);
        assert_eq!(probe_connectivity(&nav(&["tab_setup"], Some(false))), Connectivity::Disconnected);
        assert_eq!(probe_connectivity(&nav(&["tab_setup"], None)), Connectivity::Connected);

        let mut b = DomBuilder::new(Viewport::default(), 1);
        b.push(None, ElementNode::new("div"));
        assert_eq!(probe_connectivity(&b.build()), Connectivity::Unknown);
    }

    #[test]
    fn test_panel_kinds() {
        assert_eq!(PanelDescriptor::new("tab_cli", "CLI").kind(), PanelKind::Console);
        assert_eq!(PanelDescriptor::new("tab_pid_tuning", "PID").kind(), PanelKind::Variant);
        assert_eq!(PanelDescriptor::new("tab_ports", "Ports").kind(), PanelKind::Plain);
    }
}
