//! Status and progress events.
//!
//! A run publishes fire-and-forget [`StatusEvent`]s on a broadcast channel.
//! Nobody listening is not an error.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Where the run is, as shown to a presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Preparing,
    Discovering,
    Capturing,
    Extracting,
    Finalizing,
    /// Skippable problem, the run continues
    Warning,
    /// Control found only by position, results may belong to the wrong setting
    LocatorGuess,
    Complete,
    Failed,
    Cancelled,
    /// No-op liveness signal
    Heartbeat,
}

/// Panel progress after filtering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    pub current: usize,
    pub total: usize,
}

impl ProgressState {
    pub fn new(total: usize) -> Self {
        Self { current: 0, total }
    }

    /// Move to `current`; never goes backwards
    pub fn advance_to(&mut self, current: usize) {
        self.current = self.current.max(current.min(self.total));
    }

    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.current * 100) / self.total) as u8
    }
}

/// One status update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub phase: Phase,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressState>,
}

impl StatusEvent {
    pub fn new(phase: Phase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressState) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Sending half of the status stream
#[derive(Debug, Clone)]
pub struct StatusChannel {
    tx: broadcast::Sender<StatusEvent>,
}

impl StatusChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    /// Best-effort delivery
    pub fn emit(&self, event: StatusEvent) {
        let _ = self.tx.send(event);
    }

    pub fn phase(&self, phase: Phase, message: impl Into<String>) {
        self.emit(StatusEvent::new(phase, message));
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.emit(StatusEvent::new(Phase::Warning, message));
    }
}

impl Default for StatusChannel {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_monotonic() {
        let mut progress = ProgressState::new(4);
        progress.advance_to(2);
        progress.advance_to(1);
        assert_eq!(progress.current, 2);
        progress.advance_to(9);
        assert_eq!(progress.current, 4);
        assert_eq!(progress.percent(), 100);
    }

    #[test]
    fn test_emit_without_listener_is_fine() {
        let channel = StatusChannel::default();
        channel.phase(Phase::Preparing, "nobody hears this");
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let channel = StatusChannel::new(8);
        let mut rx = channel.subscribe();
        channel.emit(StatusEvent::new(Phase::Capturing, "panel 1").with_progress(ProgressState {
            current: 1,
            total: 3,
        }));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.phase, Phase::Capturing);
        assert_eq!(event.progress, Some(ProgressState { current: 1, total: 3 }));
    }
}
