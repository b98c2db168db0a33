//! Panel Backup - screenshot and console backup of a flight-controller
//! configurator UI.
//!
//! This crate provides:
//! - A page model ([`page`]) with single-use element handles and locator chains
//! - Rate-limited viewport capture and stitching of scrolled frames
//! - Backup units for panels, profile variants and console dumps
//! - A single-run [`BackupRunner`] with cancellation and status events
//! - Zip packaging of everything a run captured
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use panel_backup::{BackupRunner, BackupSettings, CaptureOptions, Session, ZipArchiveSink};
//! use panel_backup::page::{DeviceFixture, SimulatedDevice};
//!
//! # async fn demo() {
//! let device = Arc::new(SimulatedDevice::new(DeviceFixture::default()));
//! let runner = BackupRunner::new(device.clone(), device, BackupSettings::default());
//! let session = Session::new("./backups");
//! let sink = Box::new(ZipArchiveSink::for_session(&session));
//! let report = runner.start(CaptureOptions::default(), session, sink).unwrap().await;
//! println!("{:?}", report.summary);
//! # }
//! ```

pub mod archive;
pub mod backup;
pub mod config;
pub mod page;
pub mod preferences;
pub mod retry;
pub mod runner;
pub mod session;
pub mod snapshot;
pub mod status;

// Re-export runner types
pub use runner::{BackupRunner, RunController, RunOutcome, RunReport, StartError};

// Re-export the backup units' shared types
pub use backup::{NamingContext, PanelDescriptor, PanelKind, RunError, RunSummary};

// Re-export configuration and preferences
pub use config::{BackupSettings, Config};
pub use preferences::{CaptureOptions, PreferencesStore};

// Re-export capture and packaging
pub use archive::{AssetSink, CapturedAsset, PackagedArchive, ZipArchiveSink};
pub use snapshot::{CaptureService, CapturedFrame, MockFramebuffer, SnapshotError, ViewportCapture, stitch};

// Re-export session management
pub use session::{Session, cleanup_old_archives, list_archives};

// Re-export status events
pub use status::{Phase, ProgressState, StatusChannel, StatusEvent};
