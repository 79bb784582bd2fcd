//! # Notify
//! Outbound messaging seam plus the retry-once delivery policy.

pub mod telegram;

use async_trait::async_trait;
use metrics::counter;

use crate::error::NotifyError;

pub use telegram::TelegramNotifier;

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, destination: &str, text: &str) -> Result<(), NotifyError>;
}

/// Send once; on a rate-limit answer wait the indicated time and try exactly
/// once more. Anything else is returned to the caller as-is.
pub async fn deliver(notifier: &dyn Notifier, destination: &str, text: &str) -> Result<(), NotifyError> {
    let first = notifier.send(destination, text).await;
    let result = match first {
        Err(NotifyError::RetryAfter(wait)) => {
            tracing::warn!(notifier = notifier.name(), destination, wait_secs = wait.as_secs(), "rate limited, retrying once");
            tokio::time::sleep(wait).await;
            notifier.send(destination, text).await
        }
        other => other,
    };

    match &result {
        Ok(()) => {
            counter!("xrate_notifications_total", "result" => "sent").increment(1);
        }
        Err(e) => {
            tracing::error!(error = %e, notifier = notifier.name(), destination, "notification failed");
            counter!("xrate_notifications_total", "result" => "failed").increment(1);
        }
    }
    result
}

/// Dry-run transport: writes the message to the log and always succeeds.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, destination: &str, text: &str) -> Result<(), NotifyError> {
        tracing::info!(destination, %text, "notification (dry run)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Scripted {
        replies: Mutex<Vec<Result<(), NotifyError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(mut replies: Vec<Result<(), NotifyError>>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl Notifier for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(&self, _destination: &str, _text: &str) -> Result<(), NotifyError> {
            *self.calls.lock().unwrap() += 1;
            self.replies.lock().unwrap().pop().unwrap_or(Ok(()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_is_retried_once() {
        let n = Scripted::new(vec![Err(NotifyError::RetryAfter(Duration::from_secs(3))), Ok(())]);
        deliver(&n, "@chan", "hi").await.unwrap();
        assert_eq!(*n.calls.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn second_rate_limit_gives_up() {
        let n = Scripted::new(vec![
            Err(NotifyError::RetryAfter(Duration::from_secs(1))),
            Err(NotifyError::RetryAfter(Duration::from_secs(1))),
            Ok(()),
        ]);
        assert!(matches!(deliver(&n, "@chan", "hi").await, Err(NotifyError::RetryAfter(_))));
        assert_eq!(*n.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn fatal_is_not_retried() {
        let n = Scripted::new(vec![Err(NotifyError::Fatal("chat not found".into()))]);
        assert!(deliver(&n, "@chan", "hi").await.is_err());
        assert_eq!(*n.calls.lock().unwrap(), 1);
    }
}
