use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use panel_backup::config::{self, BackupSettings};
use panel_backup::page::{DeviceFixture, SimulatedDevice};
use panel_backup::snapshot::{MockFramebuffer, encode_png, stitch};
use panel_backup::{
    BackupRunner, CaptureOptions, PreferencesStore, RunOutcome, RunReport, Session, StatusEvent, ZipArchiveSink,
};

/// Panel Backup - screenshot and console backup of a configurator UI
#[derive(Parser, Debug)]
#[command(
    name = "panel-backup",
    about = "Back up every panel of a device configurator: screenshots, profile variants and console dumps",
    after_help = "ENVIRONMENT VARIABLES:\n\
        PANEL_BACKUP_OUTPUT_DIR                Where packaged archives are written\n\
        PANEL_BACKUP_PREFERENCES               Preferences file\n\
        PANEL_BACKUP_CAPTURE_MIN_INTERVAL_MS   Minimum gap between viewport captures (ms)\n\
        PANEL_BACKUP_SETTLE_MS                 Delay after opening a panel (ms)\n\
        PANEL_BACKUP_DUMP_TIMEOUT_MS           Budget for the console dump (ms)\n\
        RUST_LOG                               Log filter (default: warn,panel_backup=info)"
)]
struct Args {
    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a backup against a simulated device described by a fixture
    Run {
        /// Device fixture (JSON)
        #[arg(short, long)]
        fixture: PathBuf,

        /// Directory receiving the package (default: PANEL_BACKUP_OUTPUT_DIR)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Preferences file to start from (default: PANEL_BACKUP_PREFERENCES)
        #[arg(long)]
        preferences: Option<PathBuf>,

        /// Skip panel screenshots
        #[arg(long)]
        no_screenshots: bool,

        /// Skip the console dump
        #[arg(long)]
        no_console: bool,

        /// Capture the tuning panel without cycling profiles
        #[arg(long)]
        no_variants: bool,

        /// Only back up these panels (structural class, repeatable)
        #[arg(long = "panel")]
        panels: Vec<String>,

        /// Use short delays; the simulated device applies changes at once
        #[arg(long)]
        fast: bool,

        /// Output the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Stitch viewport captures taken while scrolling into one image
    Stitch {
        /// Measured scroll between consecutive images, in logical pixels
        #[arg(short, long = "delta", required = true)]
        deltas: Vec<f64>,

        /// Logical viewport width the images were captured at
        #[arg(short = 'w', long)]
        viewport_width: f64,

        /// Output file path
        #[arg(short, long, default_value = "./stitched.png")]
        output: PathBuf,

        /// Captures, top to bottom
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },

    /// Create a mock framebuffer screenshot for testing
    Mock {
        /// Width in pixels
        #[arg(short = 'W', long, default_value = "800")]
        width: u32,

        /// Height in pixels
        #[arg(short = 'H', long, default_value = "600")]
        height: u32,

        /// Output file path
        #[arg(short, long, default_value = "./mock_screenshot.png")]
        output: PathBuf,

        /// Fill color as hex (e.g., "ff0000" for red)
        #[arg(short, long, default_value = "000000")]
        color: String,
    },

    /// Show or change the saved capture preferences
    Prefs {
        /// Preferences file (default: PANEL_BACKUP_PREFERENCES)
        #[arg(long)]
        file: Option<PathBuf>,

        #[command(subcommand)]
        action: PrefsAction,
    },
}

#[derive(Subcommand, Debug)]
enum PrefsAction {
    /// Print the saved preferences as JSON
    Show,
    /// Change the saved preferences
    Set {
        #[arg(long)]
        screenshots: Option<bool>,

        #[arg(long)]
        console: Option<bool>,

        #[arg(long)]
        variants: Option<bool>,

        /// Add a panel to the selection (repeatable)
        #[arg(long = "panel")]
        panels: Vec<String>,

        /// Clear the selection so every panel is backed up
        #[arg(long, conflicts_with = "panels")]
        all_panels: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_file.as_deref())?;

    match args.command {
        Some(Commands::Run {
            fixture,
            output,
            preferences,
            no_screenshots,
            no_console,
            no_variants,
            panels,
            fast,
            json,
        }) => {
            let store = preferences.map(PreferencesStore::new).unwrap_or_else(PreferencesStore::from_config);
            let mut options = store.load()?;
            if no_screenshots {
                options = options.screenshots(false);
            }
            if no_console {
                options = options.console_dump(false);
            }
            if no_variants {
                options = options.variant_cycling(false);
            }
            if !panels.is_empty() {
                options.selected_panels = panels.into_iter().collect();
            }

            let settings = if fast {
                BackupSettings::fast()
            } else {
                config::get().backup.clone()
            };
            let output = output.unwrap_or_else(config::output_dir);
            run_backup(&fixture, &output, options, settings, json).await?;
        }

        Some(Commands::Stitch {
            deltas,
            viewport_width,
            output,
            images,
        }) => {
            let mut encoded = Vec::with_capacity(images.len());
            for path in &images {
                encoded.push(std::fs::read(path).with_context(|| format!("reading {}", path.display()))?);
            }
            if deltas.len() + 1 != encoded.len() {
                bail!("{} images need {} deltas, got {}", encoded.len(), encoded.len().saturating_sub(1), deltas.len());
            }

            let Some(stitched) = stitch(&encoded, &deltas, viewport_width) else {
                bail!("stitching failed: an image could not be decoded");
            };
            std::fs::write(&output, encode_png(&stitched)?)?;

            println!("Stitched {} captures: {}", images.len(), output.display());
            println!("  Size: {}x{}", stitched.width(), stitched.height());
        }

        Some(Commands::Mock {
            width,
            height,
            output,
            color,
        }) => {
            let color_bytes = parse_hex_color(&color)?;
            let mut fb = MockFramebuffer::with_color(width, height, color_bytes);

            // Draw some sample content
            fb.draw_text(10, 10, "Mock Framebuffer", [255, 255, 255], color_bytes);
            fb.draw_rect(10, 30, 100, 50, [128, 128, 128]);

            std::fs::write(&output, fb.to_png()?)?;

            println!("Created mock screenshot: {}", output.display());
            println!("  Size: {}x{}", fb.width(), fb.height());
        }

        Some(Commands::Prefs { file, action }) => {
            let store = file.map(PreferencesStore::new).unwrap_or_else(PreferencesStore::from_config);
            let mut options = store.load()?;
            match action {
                PrefsAction::Show => {}
                PrefsAction::Set {
                    screenshots,
                    console,
                    variants,
                    panels,
                    all_panels,
                } => {
                    if let Some(enabled) = screenshots {
                        options = options.screenshots(enabled);
                    }
                    if let Some(enabled) = console {
                        options = options.console_dump(enabled);
                    }
                    if let Some(enabled) = variants {
                        options = options.variant_cycling(enabled);
                    }
                    if all_panels {
                        options.selected_panels.clear();
                    }
                    options = options.select(panels);
                    store.save(&options)?;
                    eprintln!("Saved {}", store.path().display());
                }
            }
            println!("{}", serde_json::to_string_pretty(&options)?);
        }

        None => {
            println!("Panel Backup - screenshot and console backup of a configurator UI");
            println!();
            println!("Usage: panel-backup <COMMAND>");
            println!();
            println!("Commands:");
            println!("  run     Back up a simulated device described by a fixture");
            println!("  stitch  Stitch scrolled captures into one image");
            println!("  mock    Create a mock framebuffer screenshot for testing");
            println!("  prefs   Show or change the saved capture preferences");
            println!();
            println!("Run with --help for more information.");
        }
    }

    Ok(())
}

async fn run_backup(
    fixture: &Path,
    output: &Path,
    options: CaptureOptions,
    settings: BackupSettings,
    json: bool,
) -> anyhow::Result<()> {
    let fixture = DeviceFixture::load(fixture).with_context(|| format!("loading fixture {}", fixture.display()))?;
    let device = Arc::new(SimulatedDevice::new(fixture));
    let runner = BackupRunner::new(device.clone(), device, settings);

    let mut events = runner.status().subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if !json => print_status(&event),
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => tracing::debug!(missed, "status printer lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let controller = runner.controller();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling...");
            controller.cancel();
        }
    });

    let session = Session::new(output);
    let sink = Box::new(ZipArchiveSink::for_session(&session));
    let report = runner.start(options, session, sink)?.await;
    interrupt.abort();
    // Let the printer drain the final event
    tokio::task::yield_now().await;
    printer.abort();

    report_outcome(report, output, json)
}

fn report_outcome(report: RunReport, output: &Path, json: bool) -> anyhow::Result<()> {
    let RunReport { outcome, summary, .. } = report;
    let package = match &outcome {
        RunOutcome::Complete(package) => Some(package.write_to(output)?),
        _ => None,
    };

    if json {
        let error = match &outcome {
            RunOutcome::Failed(e) => Some(e.to_string()),
            _ => None,
        };
        let result = serde_json::json!({
            "outcome": outcome.phase(),
            "package": package.as_ref().map(|p| p.display().to_string()),
            "error": error,
            "summary": summary,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        if let Some(path) = &package {
            println!("Backup written: {}", path.display());
        }
        println!(
            "  Panels: {} of {} visited, {} skipped",
            summary.panels_visited.len(),
            summary.panels_total,
            summary.panels_skipped.len()
        );
        println!("  Files: {}", summary.assets_written);
        if !summary.warnings.is_empty() {
            println!("  Warnings: {}", summary.warnings.len());
        }
        for guess in &summary.locator_guesses {
            println!("  Check: {}", guess);
        }
    }

    match outcome {
        RunOutcome::Failed(e) => Err(e.into()),
        RunOutcome::Cancelled => {
            eprintln!("Backup cancelled, nothing was packaged");
            Ok(())
        }
        RunOutcome::Complete(_) => Ok(()),
    }
}

fn print_status(event: &StatusEvent) {
    match event.progress {
        Some(progress) => eprintln!(
            "[{:>3}%] {:?}: {}",
            progress.percent(),
            event.phase,
            event.message
        ),
        None => eprintln!("       {:?}: {}", event.phase, event.message),
    }
}

fn init_logging(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,panel_backup=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path).with_context(|| format!("creating log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(std::sync::Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn parse_hex_color(hex: &str) -> anyhow::Result<[u8; 3]> {
    let hex = hex.trim_start_matches('#');
    if hex.len() != 6 {
        bail!("Color must be 6 hex digits (e.g., 'ff0000')");
    }
    let r = u8::from_str_radix(&hex[0..2], 16)?;
    let g = u8::from_str_radix(&hex[2..4], 16)?;
    let b = u8::from_str_radix(&hex[4..6], 16)?;
    Ok([r, g, b])
}
