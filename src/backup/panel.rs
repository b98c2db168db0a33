//! Panel capture: sub-panels, scrolling, overlay hiding and stitching.

use super::markers;
use super::{NamingContext, PanelDescriptor, RunContext, RunResult};
use crate::archive::CapturedAsset;
use crate::page::{DomSnapshot, ElementNode, Positioning, ScrollMetrics, Selector};
use crate::snapshot::{CapturedFrame, encode_png, generate_filename, part_filename, stitch_frames};

/// Upper bound on scroll steps for one region
const MAX_SCROLL_STEPS: usize = 64;
/// Upper bound on overlays hidden before one scroll capture
const MAX_OVERLAYS: usize = 16;

/// Sub-panel tabs found by the first pattern with more than one visible match
#[derive(Debug, Clone)]
pub struct SubPanelSet {
    pub selector: Selector,
    pub count: usize,
}

pub fn find_subpanels(dom: &DomSnapshot) -> Option<SubPanelSet> {
    markers::subpanel_patterns().into_iter().find_map(|selector| {
        let count = dom.query_visible(&selector).count();
        (count > 1).then_some(SubPanelSet { selector, count })
    })
}

/// File stem for a sub-panel tab, from its structural markers
pub fn subpanel_name(node: &ElementNode, index: usize) -> String {
    if let Some(class) = node.class_with_prefix("subtab-") {
        return class.trim_start_matches("subtab-").to_string();
    }
    match node.attributes.get("data-subtab") {
        Some(name) if !name.is_empty() => name.clone(),
        _ => format!("subpanel_{}", index + 1),
    }
}

/// First visible scrollable region candidate
pub fn content_region(dom: &DomSnapshot) -> Option<&ElementNode> {
    markers::content_regions()
        .iter()
        .find_map(|selector| dom.first_visible(selector).map(|n| n.id))
        .and_then(|id| dom.node(id))
}

/// Displayed fixed or sticky elements reaching into the bottom band of the viewport
pub fn bottom_overlays(dom: &DomSnapshot) -> Vec<&ElementNode> {
    let band_top = dom.viewport.height - markers::OVERLAY_BAND_PX;
    dom.nodes
        .iter()
        .filter(|n| matches!(n.position, Positioning::Fixed | Positioning::Sticky))
        .filter(|n| dom.is_displayed(n.id))
        .filter(|n| n.rect.bottom() >= band_top && n.rect.y < dom.viewport.height)
        .collect()
}

/// Capture a panel, one image per sub-panel if it has several
pub async fn capture_panel(ctx: &mut RunContext, panel: &PanelDescriptor, naming: &NamingContext) -> RunResult<()> {
    let dom = ctx.inspect().await?;
    let Some(set) = find_subpanels(&dom) else {
        capture_content(ctx, naming).await?;
        return Ok(());
    };

    tracing::debug!(
        panel = %panel.structural_class,
        pattern = %set.selector,
        count = set.count,
        "capturing sub-panels"
    );
    for index in 0..set.count {
        ctx.checkpoint()?;
        match activate_subpanel(ctx, &set.selector, index).await? {
            Some(name) => {
                capture_content(ctx, &naming.child(name)).await?;
            }
            None => ctx.warn(format!(
                "{}: sub-panel {} disappeared",
                panel.structural_class,
                index + 1
            )),
        }
    }
    Ok(())
}

/// Click the `index`-th visible match of `selector`, located fresh.
///
/// Returns the sub-panel's name, or `None` if it is gone.
pub async fn activate_subpanel(ctx: &RunContext, selector: &Selector, index: usize) -> RunResult<Option<String>> {
    let dom = ctx.inspect().await?;
    let Some(node) = dom.query_visible(selector).nth(index) else {
        return Ok(None);
    };
    let name = subpanel_name(node, index);
    ctx.page.click(dom.handle(node.id)).await?;
    ctx.pause(ctx.settings.subpanel_settle).await?;
    Ok(Some(name))
}

/// Click the first visible match of `selector`; `false` if there is none
pub async fn activate(ctx: &RunContext, selector: &Selector) -> RunResult<bool> {
    Ok(activate_subpanel(ctx, selector, 0).await?.is_some())
}

/// Capture the content region as currently shown.
///
/// Returns whether at least one asset was emitted.
pub async fn capture_content(ctx: &mut RunContext, naming: &NamingContext) -> RunResult<bool> {
    let dom = ctx.inspect().await?;
    let viewport_width = dom.viewport.width;
    let metrics = content_region(&dom).and_then(|n| n.scroll);

    match metrics {
        Some(m) if m.overflow() > markers::SCROLL_NOISE_PX => scroll_capture(ctx, naming, viewport_width).await,
        _ => single_capture(ctx, naming).await,
    }
}

async fn single_capture(ctx: &mut RunContext, naming: &NamingContext) -> RunResult<bool> {
    match ctx.capture.capture().await {
        Some(frame) => {
            ctx.emit(CapturedAsset::image(&naming.folder, generate_filename(&naming.stem), frame.png))?;
            Ok(true)
        }
        None => {
            ctx.warn(format!("{}/{}: capture failed, skipped", naming.folder, naming.stem));
            Ok(false)
        }
    }
}

async fn scroll_capture(ctx: &mut RunContext, naming: &NamingContext, viewport_width: f64) -> RunResult<bool> {
    let hidden = hide_overlays(ctx).await;
    let collected = collect_scrolled(ctx, naming).await;
    restore_overlays(ctx, hidden).await;
    let (frames, deltas) = collected?;

    if frames.is_empty() {
        ctx.warn(format!("{}/{}: capture failed, skipped", naming.folder, naming.stem));
        return Ok(false);
    }

    let stitched = stitch_frames(&frames, &deltas, viewport_width).and_then(|img| match encode_png(&img) {
        Ok(png) => Some(png),
        Err(e) => {
            tracing::warn!(error = %e, "stitched image failed to encode");
            None
        }
    });

    match stitched {
        Some(png) => {
            tracing::debug!(parts = frames.len(), ?deltas, "stitched");
            ctx.emit(CapturedAsset::image(&naming.folder, generate_filename(&naming.stem), png))?;
        }
        None => {
            ctx.warn(format!(
                "{}/{}: stitching failed, saving {} parts",
                naming.folder,
                naming.stem,
                frames.len()
            ));
            for (idx, frame) in frames.into_iter().enumerate() {
                ctx.emit(CapturedAsset::image(&naming.folder, part_filename(&naming.stem, idx + 1), frame.png))?;
            }
        }
    }
    Ok(true)
}

/// Scroll from the top to the bottom, capturing one viewport per step.
///
/// Deltas are measured from what the page reports, not from what was
/// requested. A failed capture ends the sequence with what was collected.
async fn collect_scrolled(ctx: &mut RunContext, naming: &NamingContext) -> RunResult<(Vec<CapturedFrame>, Vec<f64>)> {
    let mut frames = Vec::new();
    let mut deltas = Vec::new();

    let Some(mut metrics) = scroll_region(ctx, 0.0).await? else {
        return Ok((frames, deltas));
    };
    ctx.pause(ctx.settings.settle).await?;

    loop {
        ctx.checkpoint()?;
        let Some(frame) = ctx.capture.capture().await else {
            ctx.warn(format!(
                "{}/{}: capture failed after {} steps, image truncated",
                naming.folder,
                naming.stem,
                frames.len()
            ));
            break;
        };
        frames.push(frame);

        if metrics.at_bottom(markers::SCROLL_END_TOLERANCE_PX) {
            break;
        }
        if frames.len() >= MAX_SCROLL_STEPS {
            ctx.warn(format!(
                "{}/{}: bottom not reached after {} steps, image truncated",
                naming.folder,
                naming.stem,
                frames.len()
            ));
            break;
        }
        let Some(next) = scroll_region(ctx, metrics.scroll_top + metrics.client_height).await? else {
            break;
        };
        let delta = next.scroll_top - metrics.scroll_top;
        if delta < 1.0 {
            break;
        }
        deltas.push(delta);
        metrics = next;
        ctx.pause(ctx.settings.settle).await?;
    }

    deltas.truncate(frames.len().saturating_sub(1));
    Ok((frames, deltas))
}

/// Scroll the content region, located fresh; `None` if it is gone
async fn scroll_region(ctx: &RunContext, top: f64) -> RunResult<Option<ScrollMetrics>> {
    let dom = ctx.inspect().await?;
    let Some(region) = content_region(&dom).map(|n| n.id) else {
        return Ok(None);
    };
    Ok(Some(ctx.page.scroll_to(dom.handle(region), top).await?))
}

/// Hide bottom overlays one at a time, re-inspecting before each.
///
/// Failures are logged; the scroll capture goes ahead regardless.
async fn hide_overlays(ctx: &RunContext) -> usize {
    let mut hidden = 0;
    while hidden < MAX_OVERLAYS {
        let dom = match ctx.inspect().await {
            Ok(dom) => dom,
            Err(e) => {
                tracing::warn!(error = %e, "overlay scan failed");
                break;
            }
        };
        let Some(overlay) = bottom_overlays(&dom).first().map(|n| n.id) else {
            break;
        };
        if let Err(e) = ctx.page.hide(dom.handle(overlay)).await {
            tracing::warn!(error = %e, %overlay, "failed to hide overlay");
            break;
        }
        hidden += 1;
    }
    if hidden > 0 {
        tracing::debug!(hidden, "bottom overlays hidden");
    }
    hidden
}

/// Always runs after a scroll capture, whatever its outcome
async fn restore_overlays(ctx: &mut RunContext, hidden: usize) {
    match ctx.page.restore_hidden().await {
        Ok(restored) if restored < hidden => {
            ctx.warn(format!("restored {restored} of {hidden} hidden overlays"));
        }
        Ok(_) => {}
        Err(e) => ctx.warn(format!("failed to restore hidden overlays: {e}")),
    }
}

/// Capture the content region after activating `subpanel`, located fresh.
///
/// Falls back to the region as shown if the sub-panel does not exist.
pub async fn capture_subpanel(ctx: &mut RunContext, subpanel: &Selector, naming: &NamingContext) -> RunResult<bool> {
    if !activate(ctx, subpanel).await? {
        tracing::debug!(subpanel = %subpanel, "sub-panel not present, capturing as shown");
    }
    capture_content(ctx, naming).await
}
