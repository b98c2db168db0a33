//! Backup run orchestration.
//!
//! A run goes `Preparing -> Discovering -> (per panel: connectivity check,
//! navigate, dispatch) -> Finalizing` and ends `Complete`, `Failed` or
//! `Cancelled`. Only one run may be active per [`RunController`].

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::archive::{AssetSink, CapturedAsset, PackagedArchive};
use crate::backup::console::{self, extract_console};
use crate::backup::navigation::{check_connection, discover, navigate, select_panels};
use crate::backup::panel::capture_panel;
use crate::backup::variants::cycle_variants;
use crate::backup::{NamingContext, PanelDescriptor, PanelKind, RunContext, RunError, RunResult, RunSummary, markers};
use crate::config::BackupSettings;
use crate::page::Page;
use crate::preferences::CaptureOptions;
use crate::session::Session;
use crate::snapshot::{CaptureService, ViewportCapture};
use crate::status::{Phase, ProgressState, StatusChannel};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartError {
    #[error("A backup is already running")]
    AlreadyRunning,
}

#[derive(Debug, Default)]
struct ControllerState {
    running: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
}

/// Process-wide run guard and cancel switch
#[derive(Debug, Clone, Default)]
pub struct RunController {
    state: Arc<ControllerState>,
}

impl RunController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Claim the run slot; fails at once if a run is active
    pub fn begin(&self) -> Result<RunGuard, StartError> {
        self.state
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| StartError::AlreadyRunning)?;
        let token = CancellationToken::new();
        *self.state.cancel.lock() = Some(token.clone());
        Ok(RunGuard {
            state: self.state.clone(),
            token,
        })
    }

    /// Request cancellation of the active run; `false` if none is active
    pub fn cancel(&self) -> bool {
        match self.state.cancel.lock().as_ref() {
            Some(token) => {
                tracing::info!("cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Held for the duration of a run; releases the slot when dropped
#[derive(Debug)]
pub struct RunGuard {
    state: Arc<ControllerState>,
    token: CancellationToken,
}

impl RunGuard {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        *self.state.cancel.lock() = None;
        self.state.running.store(false, Ordering::SeqCst);
    }
}

/// Periodic liveness signal, stopped when dropped
pub struct KeepAlive {
    handle: JoinHandle<()>,
}

impl KeepAlive {
    pub fn start(status: StatusChannel, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tracing::trace!("keepalive");
                status.phase(Phase::Heartbeat, "");
            }
        });
        Self { handle }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// How a run ended
#[derive(Debug)]
pub enum RunOutcome {
    Complete(PackagedArchive),
    Cancelled,
    Failed(RunError),
}

impl RunOutcome {
    pub fn phase(&self) -> Phase {
        match self {
            RunOutcome::Complete(_) => Phase::Complete,
            RunOutcome::Cancelled => Phase::Cancelled,
            RunOutcome::Failed(_) => Phase::Failed,
        }
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub summary: RunSummary,
    pub progress: ProgressState,
}

/// What `manifest.json` holds
#[derive(Debug, Serialize)]
struct Manifest<'a> {
    created: String,
    options: &'a CaptureOptions,
    #[serde(flatten)]
    summary: &'a RunSummary,
}

/// Runs backups against one page and capture primitive
pub struct BackupRunner {
    page: Arc<dyn Page>,
    capture: Arc<dyn ViewportCapture>,
    settings: BackupSettings,
    status: StatusChannel,
    controller: RunController,
}

impl BackupRunner {
    pub fn new(page: Arc<dyn Page>, capture: Arc<dyn ViewportCapture>, settings: BackupSettings) -> Self {
        Self {
            page,
            capture,
            settings,
            status: StatusChannel::default(),
            controller: RunController::new(),
        }
    }

    pub fn with_status(mut self, status: StatusChannel) -> Self {
        self.status = status;
        self
    }

    pub fn with_controller(mut self, controller: RunController) -> Self {
        self.controller = controller;
        self
    }

    pub fn status(&self) -> &StatusChannel {
        &self.status
    }

    pub fn controller(&self) -> RunController {
        self.controller.clone()
    }

    /// Claim the run slot and return the run to await.
    ///
    /// A second call while a run is active fails immediately.
    pub fn start(
        &self,
        options: CaptureOptions,
        session: Session,
        sink: Box<dyn AssetSink>,
    ) -> Result<impl std::future::Future<Output = RunReport> + Send + use<>, StartError> {
        let guard = self.controller.begin()?;
        let ctx = RunContext::new(
            self.page.clone(),
            CaptureService::new(self.capture.clone(), &self.settings),
            sink,
            self.settings.clone(),
            self.status.clone(),
            guard.token(),
        );
        let keepalive_interval = self.settings.keepalive_interval;

        Ok(async move {
            let _guard = guard;
            let _keepalive = KeepAlive::start(ctx.status.clone(), keepalive_interval);
            execute(ctx, options, session).await
        })
    }
}

async fn execute(mut ctx: RunContext, options: CaptureOptions, session: Session) -> RunReport {
    ctx.summary.session = session.root_folder().to_string();
    tracing::info!(session = %session.root_folder(), "backup started");

    ctx.phase(Phase::Preparing, "Preparing");
    let expert_enabled = enable_expert_mode(&mut ctx).await;

    let visited = visit_panels(&mut ctx, &options).await;

    if expert_enabled {
        disable_expert_mode(&mut ctx).await;
    }

    let outcome = match visited {
        Ok(()) => match finalize(&mut ctx, &options) {
            Ok(package) => RunOutcome::Complete(package),
            Err(e) => RunOutcome::Failed(e),
        },
        Err(RunError::Cancelled) => RunOutcome::Cancelled,
        Err(e) => RunOutcome::Failed(e),
    };

    let message = match &outcome {
        RunOutcome::Complete(package) => format!("Backup complete: {} files", package.entries.len()),
        RunOutcome::Cancelled => "Backup cancelled".to_string(),
        RunOutcome::Failed(e) => format!("Backup failed: {e}"),
    };
    match &outcome {
        RunOutcome::Failed(e) => tracing::error!(error = %e, "backup failed"),
        _ => tracing::info!("{}", message),
    }
    ctx.report_progress(outcome.phase(), message);

    RunReport {
        outcome,
        progress: ctx.progress,
        summary: ctx.summary,
    }
}

async fn visit_panels(ctx: &mut RunContext, options: &CaptureOptions) -> RunResult<()> {
    ctx.phase(Phase::Discovering, "Looking for panels");
    let discovered = discover(ctx).await?;
    let panels = select_panels(&discovered, options);
    tracing::info!(discovered = discovered.len(), selected = panels.len(), "panels discovered");

    ctx.progress = ProgressState::new(panels.len());
    ctx.summary.panels_total = panels.len();
    if panels.is_empty() {
        ctx.warn("No panels match the selected options");
    }

    for (index, panel) in panels.iter().enumerate() {
        ctx.checkpoint()?;
        check_connection(ctx).await?;

        ctx.progress.advance_to(index + 1);
        let phase = match panel.kind() {
            PanelKind::Console => Phase::Extracting,
            _ => Phase::Capturing,
        };
        ctx.report_progress(phase, panel.display_label.clone());

        match visit_panel(ctx, index, panel, options).await {
            Ok(()) => ctx.summary.panels_visited.push(panel.structural_class.clone()),
            Err(e) if e.is_skippable() => {
                ctx.warn(format!("{} skipped: {e}", panel.structural_class));
                ctx.summary.panels_skipped.push(panel.structural_class.clone());
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

async fn visit_panel(
    ctx: &mut RunContext,
    index: usize,
    panel: &PanelDescriptor,
    options: &CaptureOptions,
) -> RunResult<()> {
    tracing::info!(panel = %panel.structural_class, "visiting panel");
    navigate(ctx, panel).await?;

    let stem = panel
        .structural_class
        .trim_start_matches(markers::PANEL_CLASS_PREFIX)
        .to_string();
    let naming = NamingContext::new(Session::panel_folder(index + 1, &panel.structural_class), stem);

    match panel.kind() {
        PanelKind::Console => extract_console(ctx, &console::naming()).await,
        PanelKind::Variant if options.include_variant_cycling => cycle_variants(ctx, panel, &naming).await,
        _ => capture_panel(ctx, panel, &naming).await,
    }
}

/// Turn on expert mode so every panel is listed; `true` if this run did it
async fn enable_expert_mode(ctx: &mut RunContext) -> bool {
    match set_expert_mode(ctx, true).await {
        Ok(changed) => changed,
        Err(e) => {
            ctx.warn(format!("could not enable expert mode: {e}"));
            false
        }
    }
}

async fn disable_expert_mode(ctx: &mut RunContext) {
    if let Err(e) = set_expert_mode(ctx, false).await {
        ctx.warn(format!("could not disable expert mode: {e}"));
    }
}

async fn set_expert_mode(ctx: &RunContext, enabled: bool) -> RunResult<bool> {
    let dom = ctx.inspect().await?;
    let Some(toggle) = dom.first_visible(&markers::expert_mode_toggle()) else {
        return Ok(false);
    };
    if toggle.checked == Some(enabled) {
        return Ok(false);
    }
    ctx.page.set_checked(dom.handle(toggle.id), enabled).await?;
    tracing::debug!(enabled, "expert mode toggled");
    tokio::time::sleep(ctx.settings.settle).await;
    Ok(true)
}

fn finalize(ctx: &mut RunContext, options: &CaptureOptions) -> RunResult<PackagedArchive> {
    ctx.phase(Phase::Finalizing, "Packaging");
    let manifest = Manifest {
        created: chrono::Utc::now().to_rfc3339(),
        options,
        summary: &ctx.summary,
    };
    let json = serde_json::to_string_pretty(&manifest);
    match json {
        Ok(json) => ctx.sink_mut().put(CapturedAsset::text("", "manifest.json", json))?,
        Err(e) => tracing::warn!(error = %e, "manifest not serializable"),
    }
    Ok(ctx.sink_mut().complete()?)
}
