//! Profile cycling on the tuning panel.
//!
//! Each axis (PID profile, rate profile) is switched through its options with
//! set, settle and verify steps, and a capture of the axis' sub-panel per
//! option. Whatever happens in between, both axes are switched back to the
//! values they had before cycling started.

use std::fmt;

use super::markers;
use super::panel::{activate, capture_content, capture_panel, capture_subpanel};
use super::{NamingContext, PanelDescriptor, RunContext, RunError, RunResult};
use crate::page::{DomSnapshot, LocatorChain, PageError, Selector};
use crate::retry::{Cancelled, RetryPolicy, retry_if_cancellable};

/// Switch attempts before giving up on one value
pub const SWITCH_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisKind {
    Primary,
    Secondary,
}

impl AxisKind {
    pub fn locator(self) -> LocatorChain {
        match self {
            AxisKind::Primary => markers::primary_profile_control(),
            AxisKind::Secondary => markers::secondary_profile_control(),
        }
    }

    /// Sub-panel showing the settings this axis selects
    pub fn subpanel(self) -> Selector {
        match self {
            AxisKind::Primary => markers::primary_subpanel(),
            AxisKind::Secondary => markers::secondary_subpanel(),
        }
    }

    pub fn file_prefix(self) -> &'static str {
        match self {
            AxisKind::Primary => "profile",
            AxisKind::Secondary => "rate_profile",
        }
    }
}

impl fmt::Display for AxisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_prefix())
    }
}

/// One axis as found before cycling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantAxis {
    pub kind: AxisKind,
    pub options: Vec<String>,
    original: String,
}

impl VariantAxis {
    pub fn new(kind: AxisKind, options: Vec<String>, original: impl Into<String>) -> Self {
        Self {
            kind,
            options,
            original: original.into(),
        }
    }

    /// Value to restore; fixed when the axis is read
    pub fn original_value(&self) -> &str {
        &self.original
    }
}

/// Whether a switch may be interrupted by cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchMode {
    Cycle,
    /// Restoration runs to the end of its retry budget
    Restore,
}

#[derive(Debug, thiserror::Error)]
enum SwitchError {
    #[error("{axis} control not found")]
    ControlMissing { axis: AxisKind },

    #[error("{axis} reads {actual:?} after switching to {expected:?}")]
    NotApplied {
        axis: AxisKind,
        expected: String,
        actual: Option<String>,
    },

    #[error(transparent)]
    Page(#[from] PageError),

    #[error("cancelled")]
    Cancelled,
}

impl From<Cancelled> for SwitchError {
    fn from(_: Cancelled) -> Self {
        SwitchError::Cancelled
    }
}

impl From<RunError> for SwitchError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Page(e) => SwitchError::Page(e),
            _ => SwitchError::Cancelled,
        }
    }
}

/// Current value of an axis' control, if it can be found
fn read_value(dom: &DomSnapshot, kind: AxisKind) -> Option<String> {
    let located = kind.locator().resolve(dom)?;
    dom.node(located.handle.node())?.value.clone()
}

/// Locate an axis and record its options and current value
pub fn read_axis(ctx: &mut RunContext, dom: &DomSnapshot, kind: AxisKind) -> Option<VariantAxis> {
    let located = kind.locator().resolve(dom)?;
    let node = dom.node(located.handle.node())?;
    if located.is_guess() {
        ctx.report_guess(kind.file_prefix(), &located.strategy);
    }
    let original = node.value.clone()?;
    if node.options.is_empty() {
        return None;
    }
    tracing::debug!(
        axis = %kind,
        strategy = %located.strategy,
        original = %original,
        options = ?node.options,
        "axis found"
    );
    Some(VariantAxis::new(kind, node.options.clone(), original))
}

/// Cycle both axes on a panel, falling back to a plain capture without a primary control
pub async fn cycle_variants(ctx: &mut RunContext, panel: &PanelDescriptor, naming: &NamingContext) -> RunResult<()> {
    let dom = ctx.inspect().await?;
    let Some(primary) = read_axis(ctx, &dom, AxisKind::Primary) else {
        ctx.warn(format!(
            "{}: profile control not found, capturing without cycling",
            panel.structural_class
        ));
        return capture_panel(ctx, panel, naming).await;
    };
    let secondary = read_axis(ctx, &dom, AxisKind::Secondary);

    let outcome = cycle_axes(ctx, &primary, secondary.as_ref(), naming).await;

    let mut axes = vec![&primary];
    axes.extend(secondary.as_ref());
    restore_axes(ctx, &axes).await;

    outcome
}

async fn cycle_axes(
    ctx: &mut RunContext,
    primary: &VariantAxis,
    secondary: Option<&VariantAxis>,
    naming: &NamingContext,
) -> RunResult<()> {
    cycle_axis(ctx, primary, naming).await?;

    if let Some(secondary) = secondary {
        let dom = ctx.inspect().await?;
        if dom.first_visible(&AxisKind::Secondary.subpanel()).is_some() {
            if secondary.options.len() <= 1 {
                let name = format!("{}_{}", secondary.kind.file_prefix(), secondary.original_value());
                capture_subpanel(ctx, &secondary.kind.subpanel(), &naming.child(name)).await?;
            } else {
                cycle_axis(ctx, secondary, naming).await?;
            }
        } else {
            tracing::debug!("no rate sub-panel, secondary axis not cycled");
        }
    }

    ctx.checkpoint()?;
    if activate(ctx, &markers::global_subpanel()).await? {
        capture_content(ctx, &naming.child("global")).await?;
    }
    Ok(())
}

async fn cycle_axis(ctx: &mut RunContext, axis: &VariantAxis, naming: &NamingContext) -> RunResult<()> {
    for option in &axis.options {
        ctx.checkpoint()?;
        if !switch_axis(ctx, axis.kind, option, SwitchMode::Cycle).await? {
            ctx.warn(format!("{} {} not confirmed, capturing current state", axis.kind, option));
        }
        let name = format!("{}_{}", axis.kind.file_prefix(), option);
        capture_subpanel(ctx, &axis.kind.subpanel(), &naming.child(name)).await?;
    }
    Ok(())
}

/// Switch back every axis, whatever state the run is in.
///
/// Returns whether all axes read back their original value.
pub async fn restore_axes(ctx: &mut RunContext, axes: &[&VariantAxis]) -> bool {
    let mut restored = true;
    for axis in axes {
        match switch_axis(ctx, axis.kind, axis.original_value(), SwitchMode::Restore).await {
            Ok(true) => tracing::debug!(axis = %axis.kind, value = %axis.original_value(), "axis restored"),
            Ok(false) | Err(_) => {
                restored = false;
                ctx.warn(format!(
                    "{} could not be restored to {}",
                    axis.kind,
                    axis.original_value()
                ));
            }
        }
    }
    restored
}

/// Set an axis to `value` and verify it took.
///
/// `Ok(false)` when every attempt failed; `Err(Cancelled)` only in
/// [`SwitchMode::Cycle`].
pub async fn switch_axis(ctx: &RunContext, kind: AxisKind, value: &str, mode: SwitchMode) -> RunResult<bool> {
    let policy = RetryPolicy::linear(SWITCH_ATTEMPTS, ctx.settings.variant_settle);
    // Restoration backs off through cancellation
    let cancel = (mode == SwitchMode::Cycle).then_some(&ctx.cancel);
    let result = retry_if_cancellable(
        &policy,
        cancel,
        |attempt| attempt_switch(ctx, kind, value, attempt, mode),
        |e| !matches!(e, SwitchError::Cancelled),
    )
    .await;

    match result {
        Ok(()) => Ok(true),
        Err(SwitchError::Cancelled) => Err(RunError::Cancelled),
        Err(e) => {
            tracing::warn!(axis = %kind, value, error = %e, "switch not verified");
            Ok(false)
        }
    }
}

async fn attempt_switch(
    ctx: &RunContext,
    kind: AxisKind,
    value: &str,
    attempt: u32,
    mode: SwitchMode,
) -> Result<(), SwitchError> {
    if mode == SwitchMode::Cycle {
        ctx.checkpoint()?;
    }

    let dom = ctx.inspect().await?;
    let located = kind.locator().resolve(&dom).ok_or(SwitchError::ControlMissing { axis: kind })?;
    let current = dom.node(located.handle.node()).and_then(|n| n.value.clone());
    if current.as_deref() == Some(value) {
        return Ok(());
    }

    tracing::debug!(axis = %kind, value, attempt, "switching");
    ctx.page.set_value(located.handle, value).await?;

    // Escalating settle: the device may apply the change late
    let settle = ctx.settings.variant_settle.saturating_mul(attempt);
    match mode {
        SwitchMode::Cycle => ctx.pause(settle).await?,
        SwitchMode::Restore => tokio::time::sleep(settle).await,
    }

    let actual = read_value(&ctx.inspect().await?, kind);
    if actual.as_deref() == Some(value) {
        Ok(())
    } else {
        Err(SwitchError::NotApplied {
            axis: kind,
            expected: value.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{DomBuilder, ElementNode, Viewport};

    #[test]
    fn test_read_value_prefers_named_control() {
        let mut b = DomBuilder::new(Viewport::default(), 1);
        let switch = b.push(None, ElementNode::new("div").class("profile-switch"));
        b.push(Some(switch), ElementNode::new("select").value("9"));
        b.push(
            Some(switch),
            ElementNode::new("select").name("profile").options(["0", "1"]).value("1"),
        );
        let dom = b.build();
        assert_eq!(read_value(&dom, AxisKind::Primary).as_deref(), Some("1"));
    }

    #[test]
    fn test_original_value_is_kept() {
        let axis = VariantAxis::new(AxisKind::Secondary, vec!["0".into(), "1".into()], "1");
        assert_eq!(axis.original_value(), "1");
        assert_eq!(axis.kind.to_string(), "rate_profile");
    }
}
