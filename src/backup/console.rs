//! Text dumps from the embedded console.
//!
//! Commands are submitted through the first input path the page offers,
//! and output is considered complete once its length stops changing.

use std::time::Duration;

use tokio::time::Instant;

use super::markers;
use super::{NamingContext, RunContext, RunResult};
use crate::archive::CapturedAsset;
use crate::config::BackupSettings;
use crate::page::{Key, LocatorChain};

/// Folder receiving the console dumps
pub const CONSOLE_FOLDER: &str = "console";
/// Consecutive unchanged polls that mean the output is complete
pub const STABLE_POLLS: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleCommand {
    pub command: &'static str,
    pub file_name: &'static str,
    pub timeout: Duration,
}

/// Concise diff first, then the full dump
pub fn commands(settings: &BackupSettings) -> [ConsoleCommand; 2] {
    [
        ConsoleCommand {
            command: "diff all",
            file_name: "diff_all.txt",
            timeout: settings.diff_timeout,
        },
        ConsoleCommand {
            command: "dump all",
            file_name: "dump_all.txt",
            timeout: settings.dump_timeout,
        },
    ]
}

/// How a command reached the console
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStrategy {
    /// The terminal widget's own submit method
    Widget,
    /// Key events into the terminal emulator's input
    Keystrokes,
    /// Value of a plain input, then Enter
    PlainInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quiescence {
    Stable { polls: u32, len: usize },
    TimedOut { len: usize },
}

/// Counts consecutive polls with unchanged, non-empty output
#[derive(Debug, Default)]
pub struct QuiescenceTracker {
    last_len: Option<usize>,
    unchanged: u32,
    polls: u32,
}

impl QuiescenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one poll; `true` once the output is stable
    pub fn observe(&mut self, len: usize) -> bool {
        self.polls += 1;
        match self.last_len {
            Some(last) if last == len && len > 0 => self.unchanged += 1,
            _ => self.unchanged = 0,
        }
        self.last_len = Some(len);
        self.is_stable()
    }

    pub fn is_stable(&self) -> bool {
        self.unchanged >= STABLE_POLLS
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }
}

/// The console as reachable through the page
pub struct Console<'a> {
    ctx: &'a RunContext,
}

impl<'a> Console<'a> {
    pub fn new(ctx: &'a RunContext) -> Self {
        Self { ctx }
    }

    /// Submit `command`; `None` if no input path accepted it
    pub async fn send(&self, command: &str) -> RunResult<Option<SendStrategy>> {
        match self.ctx.page.submit_console_command(command).await {
            Ok(true) => return Ok(Some(SendStrategy::Widget)),
            Ok(false) => tracing::debug!("no console widget handle"),
            Err(e) => tracing::debug!(error = %e, "console widget submit failed"),
        }

        let terminal = LocatorChain::new("terminal input").then(markers::terminal_input());
        let mut keys = Key::text(command);
        keys.push(Key::Enter);
        if self.send_keys(&terminal, &keys).await? {
            return Ok(Some(SendStrategy::Keystrokes));
        }

        let [by_name, in_cli] = markers::plain_console_inputs();
        let plain = LocatorChain::new("console input").then(by_name).then(in_cli);
        if self.set_and_submit(&plain, command).await? {
            return Ok(Some(SendStrategy::PlainInput));
        }
        Ok(None)
    }

    async fn send_keys(&self, input: &LocatorChain, keys: &[Key]) -> RunResult<bool> {
        let dom = self.ctx.inspect().await?;
        let Some(located) = input.resolve(&dom) else {
            return Ok(false);
        };
        match self.ctx.page.send_keys(located.handle, keys).await {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::debug!(error = %e, "keystroke input failed");
                Ok(false)
            }
        }
    }

    async fn set_and_submit(&self, input: &LocatorChain, command: &str) -> RunResult<bool> {
        let dom = self.ctx.inspect().await?;
        let Some(located) = input.resolve(&dom) else {
            return Ok(false);
        };
        if let Err(e) = self.ctx.page.set_value(located.handle, command).await {
            tracing::debug!(error = %e, "console input rejected value");
            return Ok(false);
        }
        self.send_keys(input, &[Key::Enter]).await
    }

    /// Poll until the output length holds still, or `max_wait` passes
    pub async fn wait_for_quiescence(&self, max_wait: Duration) -> RunResult<Quiescence> {
        let deadline = Instant::now() + max_wait;
        let mut tracker = QuiescenceTracker::new();
        loop {
            self.ctx.pause(self.ctx.settings.quiescence_poll).await?;
            let len = self.read().await?.len();
            if tracker.observe(len) {
                return Ok(Quiescence::Stable {
                    polls: tracker.polls(),
                    len,
                });
            }
            if Instant::now() >= deadline {
                return Ok(Quiescence::TimedOut { len });
            }
        }
    }

    pub async fn read(&self) -> RunResult<String> {
        Ok(self.ctx.page.read_console().await?)
    }

    pub async fn clear(&self) -> RunResult<()> {
        Ok(self.ctx.page.clear_console().await?)
    }
}

/// Run every console command and archive what it printed
pub async fn extract_console(ctx: &mut RunContext, naming: &NamingContext) -> RunResult<()> {
    for command in commands(&ctx.settings) {
        ctx.checkpoint()?;
        let text = match run_command(ctx, &command).await? {
            Some(text) => text,
            None => continue,
        };

        let trimmed = text.trim();
        if trimmed.chars().count() <= markers::CONSOLE_NOISE_CHARS {
            ctx.warn(format!("'{}' returned no usable output", command.command));
            continue;
        }
        ctx.emit(CapturedAsset::text(&naming.folder, command.file_name, trimmed))?;
    }
    Ok(())
}

async fn run_command(ctx: &mut RunContext, command: &ConsoleCommand) -> RunResult<Option<String>> {
    let console = Console::new(ctx);
    console.clear().await?;
    let Some(strategy) = console.send(command.command).await? else {
        ctx.warn(format!("console did not accept '{}'", command.command));
        return Ok(None);
    };
    tracing::info!(command = command.command, ?strategy, "console command sent");

    let outcome = console.wait_for_quiescence(command.timeout).await?;
    let text = console.read().await?;
    if let Quiescence::TimedOut { len } = outcome {
        ctx.warn(format!(
            "'{}' still streaming after {:?}, keeping {} chars",
            command.command, command.timeout, len
        ));
    }
    Ok(Some(text))
}

/// Folder naming for the console panel
pub fn naming() -> NamingContext {
    NamingContext::new(CONSOLE_FOLDER, "console")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_after_two_unchanged_polls() {
        let mut tracker = QuiescenceTracker::new();
        assert!(!tracker.observe(10));
        assert!(!tracker.observe(10));
        assert!(tracker.observe(10));
        assert_eq!(tracker.polls(), 3);
    }

    #[test]
    fn test_growth_resets_counter() {
        let mut tracker = QuiescenceTracker::new();
        tracker.observe(5);
        tracker.observe(5);
        assert!(!tracker.observe(9));
        assert!(!tracker.observe(9));
        assert!(tracker.observe(9));
    }

    #[test]
    fn test_empty_output_never_stable() {
        let mut tracker = QuiescenceTracker::new();
        for _ in 0..10 {
            assert!(!tracker.observe(0));
        }
    }

    #[test]
    fn test_commands_use_configured_timeouts() {
        let settings = BackupSettings::defaults().console_timeouts(Duration::from_secs(3), Duration::from_secs(9));
        let [diff, dump] = commands(&settings);
        assert_eq!(diff.file_name, "diff_all.txt");
        assert_eq!(diff.timeout, Duration::from_secs(3));
        assert_eq!(dump.command, "dump all");
        assert_eq!(dump.timeout, Duration::from_secs(9));
    }

    proptest::proptest! {
        #[test]
        fn prop_growing_output_never_stable(steps in proptest::collection::vec(1usize..50, 1..40)) {
            let mut tracker = QuiescenceTracker::new();
            let mut len = 0;
            for step in steps {
                len += step;
                proptest::prop_assert!(!tracker.observe(len));
            }
        }
    }
}
