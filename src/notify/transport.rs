//! Delivery transports.
//!
//! A transport takes one intent and either delivers it or reports why not.
//! `RetryingTransport` wraps another transport with bounded exponential
//! backoff; permanent rejections are not retried.

use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::DeliveryError;

use super::intent::NotificationIntent;

#[async_trait]
pub trait NotificationTransport: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, intent: &NotificationIntent) -> Result<(), DeliveryError>;
}

/// Writes each intent to the tracing log.
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl NotificationTransport for LogTransport {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, intent: &NotificationIntent) -> Result<(), DeliveryError> {
        info!(
            recipient = %intent.recipient,
            kind = %intent.kind,
            request_id = %intent.request_id,
            subject = %intent.subject,
            "Notification"
        );
        Ok(())
    }
}

/// Appends intents as JSON lines to a file for an external mailer to pick up.
pub struct OutboxTransport {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl OutboxTransport {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl NotificationTransport for OutboxTransport {
    fn name(&self) -> &str {
        "outbox"
    }

    async fn deliver(&self, intent: &NotificationIntent) -> Result<(), DeliveryError> {
        let mut line = serde_json::to_string(intent)?;
        line.push('\n');

        // One writer at a time so lines never interleave.
        let _w = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!(path = %self.path.display(), intent_id = %intent.id, "Intent written to outbox");
        Ok(())
    }
}

/// Keeps every delivered intent in memory. Useful for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    delivered: StdMutex<Vec<NotificationIntent>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<NotificationIntent> {
        self.delivered
            .lock()
            .map(|d| d.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl NotificationTransport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn deliver(&self, intent: &NotificationIntent) -> Result<(), DeliveryError> {
        self.delivered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(intent.clone());
        Ok(())
    }
}

/// Retries transient failures of the wrapped transport.
pub struct RetryingTransport<T> {
    inner: T,
    attempts: u32,
    backoff: Duration,
}

impl<T: NotificationTransport> RetryingTransport<T> {
    /// `attempts` counts the first try; zero is treated as one.
    pub fn new(inner: T, attempts: u32, backoff: Duration) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
            backoff,
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Delay before retry number `attempt` (1-based): the base doubled per
    /// retry plus up to half the base of jitter.
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.backoff.saturating_mul(1 << (attempt - 1).min(16));
        let jitter_ms = (self.backoff.as_millis() / 2) as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        base + Duration::from_millis(jitter)
    }
}

#[async_trait]
impl<T: NotificationTransport> NotificationTransport for RetryingTransport<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn deliver(&self, intent: &NotificationIntent) -> Result<(), DeliveryError> {
        let mut attempt = 1;
        loop {
            match self.inner.deliver(intent).await {
                Ok(()) => return Ok(()),
                Err(e @ DeliveryError::Rejected { .. }) => return Err(e),
                Err(e) if attempt >= self.attempts => {
                    return Err(DeliveryError::Exhausted {
                        attempts: attempt,
                        last: e.to_string(),
                    });
                }
                Err(e) => {
                    let delay = self.delay(attempt);
                    warn!(
                        transport = self.inner.name(),
                        intent_id = %intent.id,
                        attempt,
                        ?delay,
                        error = %e,
                        "Delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::directory::UserId;
    use crate::lifecycle::RequestId;
    use crate::notify::intent::NotificationKind;

    fn intent() -> NotificationIntent {
        NotificationIntent::new(
            UserId::new("coord"),
            NotificationKind::StatusUpdate,
            "Onboarding update",
            serde_json::json!({"status": "in_progress"}),
            RequestId::new(),
        )
    }

    /// Fails the first `failures` calls with the given error kind.
    struct Flaky {
        failures: u32,
        reject: bool,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32, reject: bool) -> Self {
            Self {
                failures,
                reject,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl NotificationTransport for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn deliver(&self, intent: &NotificationIntent) -> Result<(), DeliveryError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                if self.reject {
                    return Err(DeliveryError::Rejected {
                        transport: "flaky".into(),
                        recipient: intent.recipient.clone(),
                        reason: "no such mailbox".into(),
                    });
                }
                return Err(DeliveryError::Unavailable {
                    transport: "flaky".into(),
                    reason: "connection refused".into(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let t = RetryingTransport::new(Flaky::new(2, false), 3, Duration::from_millis(1));
        t.deliver(&intent()).await.unwrap();
        assert_eq!(t.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let t = RetryingTransport::new(Flaky::new(10, false), 2, Duration::from_millis(1));
        let err = t.deliver(&intent()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Exhausted { attempts: 2, .. }), "got {err}");
        assert_eq!(t.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejections_are_permanent() {
        let t = RetryingTransport::new(Flaky::new(1, true), 5, Duration::from_millis(1));
        let err = t.deliver(&intent()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Rejected { .. }));
        assert_eq!(t.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_doubles_with_bounded_jitter() {
        let t = RetryingTransport::new(LogTransport, 5, Duration::from_millis(100));
        let first = t.delay(1);
        let third = t.delay(3);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(150));
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(450));
    }

    #[tokio::test]
    async fn outbox_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = OutboxTransport::new(dir.path().join("out").join("outbox.jsonl"));
        let a = intent();
        let b = intent();
        outbox.deliver(&a).await.unwrap();
        outbox.deliver(&b).await.unwrap();

        let content = std::fs::read_to_string(outbox.path()).unwrap();
        let lines: Vec<NotificationIntent> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines, vec![a, b]);
    }
}
