//! Rate-limited, retrying viewport capture.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use super::backend::ViewportCapture;
use super::types::{CapturedFrame, SnapshotError, SnapshotResult};
use super::utils::{decode_data_url, image_dimensions};
use crate::config::BackupSettings;
use crate::retry::{RetryPolicy, retry};

/// Wraps the capture primitive with spacing and retry.
///
/// Calls are serialized: concurrent callers queue on the same lock, so no two
/// primitive calls start closer than `min_interval` apart.
pub struct CaptureService {
    backend: Arc<dyn ViewportCapture>,
    min_interval: Duration,
    attempt_timeout: Duration,
    policy: RetryPolicy,
    last_call: Mutex<Option<Instant>>,
}

impl CaptureService {
    pub fn new(backend: Arc<dyn ViewportCapture>, settings: &BackupSettings) -> Self {
        Self {
            backend,
            min_interval: settings.capture_min_interval,
            attempt_timeout: settings.capture_timeout,
            policy: RetryPolicy::linear(settings.capture_attempts, settings.capture_backoff),
            last_call: Mutex::new(None),
        }
    }

    /// One capture, or `None` once every attempt failed.
    ///
    /// A `None` means "skip this asset"; it is never fatal to a run.
    pub async fn capture(&self) -> Option<CapturedFrame> {
        match retry(&self.policy, |attempt| self.capture_once(attempt)).await {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::warn!(attempts = self.policy.attempts, error = %e, "viewport capture failed");
                None
            }
        }
    }

    async fn capture_once(&self, attempt: u32) -> SnapshotResult<CapturedFrame> {
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last_call = Some(Instant::now());

        tracing::trace!(attempt, "capturing viewport");
        let url = tokio::time::timeout(self.attempt_timeout, self.backend.capture_viewport())
            .await
            .map_err(|_| SnapshotError::Timeout(self.attempt_timeout))??;
        drop(last_call);

        let png = decode_data_url(&url)?;
        let (width, height) = image_dimensions(&png)?;
        Ok(CapturedFrame::new(png, width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::backend::MockFramebuffer;
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;

    /// Records call instants and fails the first `failures` calls
    struct FlakyCapture {
        frame: MockFramebuffer,
        failures: SyncMutex<u32>,
        hang: bool,
        calls: SyncMutex<Vec<Instant>>,
    }

    impl FlakyCapture {
        fn new(failures: u32) -> Self {
            Self {
                frame: MockFramebuffer::with_color(8, 6, [9, 9, 9]),
                failures: SyncMutex::new(failures),
                hang: false,
                calls: SyncMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ViewportCapture for FlakyCapture {
        async fn capture_viewport(&self) -> SnapshotResult<String> {
            self.calls.lock().push(Instant::now());
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            {
                let mut failures = self.failures.lock();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(SnapshotError::Capture("tab is not visible".to_string()));
                }
            }
            self.frame.to_data_url()
        }
    }

    fn settings() -> BackupSettings {
        BackupSettings::defaults().capture_min_interval(Duration::from_millis(500))
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_are_spaced() {
        let backend = Arc::new(FlakyCapture::new(0));
        let service = CaptureService::new(backend.clone(), &settings());

        for _ in 0..4 {
            let frame = service.capture().await.unwrap();
            assert_eq!((frame.width, frame.height), (8, 6));
        }

        let calls = backend.calls.lock().clone();
        assert_eq!(calls.len(), 4);
        for pair in calls.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_burst_is_spaced() {
        let backend = Arc::new(FlakyCapture::new(0));
        let service = Arc::new(CaptureService::new(backend.clone(), &settings()));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.capture().await.is_some() })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        let mut calls = backend.calls.lock().clone();
        calls.sort();
        for pair in calls.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_from_transient_failure() {
        let backend = Arc::new(FlakyCapture::new(2));
        let service = CaptureService::new(backend.clone(), &settings());
        assert!(service.capture().await.is_some());
        assert_eq!(backend.calls.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_three_failures() {
        let backend = Arc::new(FlakyCapture::new(10));
        let service = CaptureService::new(backend.clone(), &settings());
        assert!(service.capture().await.is_none());
        assert_eq!(backend.calls.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_primitive_times_out() {
        let mut flaky = FlakyCapture::new(0);
        flaky.hang = true;
        let backend = Arc::new(flaky);
        let service = CaptureService::new(backend.clone(), &settings());
        assert!(service.capture().await.is_none());
        assert_eq!(backend.calls.lock().len(), 3);
    }
}
