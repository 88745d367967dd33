//! Suspension between drain polls.
//!
//! The drain loop never sleeps directly; it asks a [`Pause`] to wait. In
//! production that is a tokio timer, in tests a [`RecordingPause`] that
//! returns immediately and can mutate a fake fleet between polls.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

/// Waits between polls.
#[async_trait]
pub trait Pause: Send + Sync {
    async fn pause(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPause;

#[async_trait]
impl Pause for TokioPause {
    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Hook run on every pause with the 1-based pause count.
pub type PauseHook = Box<dyn Fn(u32) + Send + Sync>;

/// Returns immediately and records every requested pause.
#[derive(Default)]
pub struct RecordingPause {
    pauses: Mutex<Vec<Duration>>,
    hook: Option<PauseHook>,
}

impl RecordingPause {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` on every pause, e.g. to let workload finish in a fake
    /// cluster after a number of polls.
    pub fn with_hook(mut self, hook: PauseHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Number of pauses requested so far.
    pub fn count(&self) -> u32 {
        self.recorded().len() as u32
    }

    /// Total time the caller asked to wait.
    pub fn total(&self) -> Duration {
        self.recorded().iter().sum()
    }

    fn recorded(&self) -> std::sync::MutexGuard<'_, Vec<Duration>> {
        self.pauses.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Pause for RecordingPause {
    async fn pause(&self, duration: Duration) {
        let n = {
            let mut pauses = self.recorded();
            pauses.push(duration);
            pauses.len() as u32
        };
        if let Some(hook) = &self.hook {
            hook(n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn recording_pause_sums_durations() {
        let pause = RecordingPause::new();
        pause.pause(Duration::from_secs(10)).await;
        pause.pause(Duration::from_secs(5)).await;

        assert_eq!(pause.count(), 2);
        assert_eq!(pause.total(), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn hook_sees_pause_count() {
        let last = Arc::new(AtomicU32::new(0));
        let seen = last.clone();
        let pause = RecordingPause::new().with_hook(Box::new(move |n| {
            seen.store(n, Ordering::SeqCst);
        }));

        pause.pause(Duration::from_secs(1)).await;
        pause.pause(Duration::from_secs(1)).await;
        pause.pause(Duration::from_secs(1)).await;

        assert_eq!(last.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn tokio_pause_zero_returns() {
        TokioPause.pause(Duration::ZERO).await;
    }
}
