//! The backup units and the context they share during a run.
//!
//! - [`navigation`] discovers panels, filters them and probes connectivity
//! - [`panel`] captures a panel, scrolling and stitching when needed
//! - [`variants`] cycles the profile selects and restores them
//! - [`console`] extracts text dumps from the embedded console

pub mod console;
pub mod markers;
pub mod navigation;
pub mod panel;
pub mod variants;

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::archive::{ArchiveError, AssetSink, CapturedAsset};
use crate::config::BackupSettings;
use crate::page::{DomSnapshot, Page, PageError};
use crate::retry::Cancelled;
use crate::snapshot::CaptureService;
use crate::status::{Phase, ProgressState, StatusChannel, StatusEvent};

pub use navigation::{Connectivity, PanelDescriptor, PanelKind};

/// Conditions that end a run. Skippable problems are not errors.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Device disconnected")]
    Disconnected,

    #[error("No navigable panels found after {0} attempts")]
    NoPanels(u32),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Page error: {0}")]
    Page(#[from] PageError),

    #[error("Run cancelled")]
    Cancelled,
}

impl From<Cancelled> for RunError {
    fn from(_: Cancelled) -> Self {
        RunError::Cancelled
    }
}

impl RunError {
    /// Page script failures only cost the current panel
    pub fn is_skippable(&self) -> bool {
        matches!(self, RunError::Page(_))
    }
}

pub type RunResult<T> = Result<T, RunError>;

/// Where an asset of the current unit goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingContext {
    pub folder: String,
    pub stem: String,
}

impl NamingContext {
    pub fn new(folder: impl Into<String>, stem: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            stem: stem.into(),
        }
    }

    /// Same folder, different file stem
    pub fn child(&self, stem: impl Into<String>) -> Self {
        Self {
            folder: self.folder.clone(),
            stem: stem.into(),
        }
    }
}

/// What happened during a run; also written as `manifest.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub session: String,
    pub panels_total: usize,
    pub panels_visited: Vec<String>,
    pub panels_skipped: Vec<String>,
    pub assets_written: usize,
    pub warnings: Vec<String>,
    pub locator_guesses: Vec<String>,
}

/// Everything a unit needs during one run
pub struct RunContext {
    pub page: Arc<dyn Page>,
    pub capture: CaptureService,
    pub settings: BackupSettings,
    pub status: StatusChannel,
    pub cancel: CancellationToken,
    pub progress: ProgressState,
    pub summary: RunSummary,
    sink: Box<dyn AssetSink>,
}

impl RunContext {
    pub fn new(
        page: Arc<dyn Page>,
        capture: CaptureService,
        sink: Box<dyn AssetSink>,
        settings: BackupSettings,
        status: StatusChannel,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            page,
            capture,
            settings,
            status,
            cancel,
            progress: ProgressState::default(),
            summary: RunSummary::default(),
            sink,
        }
    }

    /// `Err(Cancelled)` once cancellation was requested
    pub fn checkpoint(&self) -> RunResult<()> {
        if self.cancel.is_cancelled() {
            Err(RunError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep that ends early with `Err(Cancelled)`
    pub async fn pause(&self, duration: Duration) -> RunResult<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(RunError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    pub async fn inspect(&self) -> RunResult<DomSnapshot> {
        Ok(self.page.inspect().await?)
    }

    /// Hand an asset to the archive; the context keeps nothing
    pub fn emit(&mut self, asset: CapturedAsset) -> RunResult<()> {
        tracing::debug!(folder = %asset.folder_name, file = %asset.file_name, bytes = asset.len(), "emitting asset");
        self.sink.put(asset)?;
        self.summary.assets_written += 1;
        Ok(())
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.status.warn(message.clone());
        self.summary.warnings.push(message);
    }

    /// A control was picked by position rather than by marker
    pub fn report_guess(&mut self, control: &str, strategy: &str) {
        let message = format!("{control} control located by position ({strategy})");
        tracing::warn!(control, strategy, "control located by position");
        self.status.phase(Phase::LocatorGuess, message.clone());
        self.summary.locator_guesses.push(message);
    }

    pub fn phase(&self, phase: Phase, message: impl Into<String>) {
        self.status.phase(phase, message);
    }

    pub fn report_progress(&self, phase: Phase, message: impl Into<String>) {
        self.status
            .emit(StatusEvent::new(phase, message).with_progress(self.progress));
    }

    pub fn sink_mut(&mut self) -> &mut dyn AssetSink {
        self.sink.as_mut()
    }
}
