// Delivery with bounded, fixed-backoff retry of transient transport failures.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::transport::{Requester, Transport};

const TIMEOUT_MARKERS: [&str; 4] = [
    "deadline exceeded",
    "timed out",
    "timeout exceeded",
    "operation timeout",
];

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

/// Whether a transport error is a timeout worth retrying.
pub fn is_transient(err: &anyhow::Error) -> bool {
    for cause in err.chain() {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::TimedOut {
                return true;
            }
        }
        if cause.is::<tokio::time::error::Elapsed>() {
            return true;
        }
        if let Some(http) = cause.downcast_ref::<reqwest::Error>() {
            if http.is_timeout() {
                return true;
            }
        }
    }
    let text = format!("{:#}", err).to_lowercase();
    TIMEOUT_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Run `attempt` until it succeeds, fails permanently, or runs out of attempts.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    request_id: &str,
    mut attempt: F,
) -> PipelineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut n = 0;
    loop {
        n += 1;
        match attempt().await {
            Ok(value) => {
                if n > 1 {
                    info!("[{}] delivered on attempt {}", request_id, n);
                }
                return Ok(value);
            }
            Err(e) if is_transient(&e) => {
                let transient = PipelineError::DeliveryTransientFailure(format!("{:#}", e));
                if n >= policy.max_attempts {
                    warn!("[{}] {} (giving up)", request_id, transient);
                    return Err(PipelineError::DeliveryTerminalFailure {
                        attempts: n,
                        reason: format!("{:#}", e),
                    });
                }
                warn!(
                    "[{}] attempt {}/{}: {}",
                    request_id, n, policy.max_attempts, transient
                );
                tokio::time::sleep(policy.backoff).await;
            }
            Err(e) => {
                warn!("[{}] delivery rejected on attempt {}: {:#}", request_id, n, e);
                return Err(PipelineError::DeliveryTerminalFailure {
                    attempts: n,
                    reason: format!("{:#}", e),
                });
            }
        }
    }
}

/// Upload a freshly fetched artifact, returning its delivery token.
pub async fn deliver(
    transport: &dyn Transport,
    to: &Requester,
    artifact: &Path,
    policy: RetryPolicy,
    request_id: &str,
) -> PipelineResult<String> {
    debug!("[{}] delivering {}", request_id, artifact.display());
    with_retry(policy, request_id, || transport.deliver(to, artifact)).await
}

/// Re-send a cached artifact by token.
pub async fn redeliver(
    transport: &dyn Transport,
    to: &Requester,
    token: &str,
    policy: RetryPolicy,
    request_id: &str,
) -> PipelineResult<()> {
    debug!("[{}] redelivering cached token {}", request_id, token);
    with_retry(policy, request_id, || transport.redeliver(to, token)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[test]
    fn test_classifier() {
        assert!(is_transient(&anyhow!("context deadline exceeded")));
        assert!(is_transient(&anyhow!("Client.Timeout exceeded while awaiting headers")));
        assert!(is_transient(&anyhow::Error::new(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "slow"
        ))));
        assert!(!is_transient(&anyhow!("Bad Request: wrong file identifier")));
        assert!(!is_transient(&anyhow!("Forbidden: bot was blocked by the user")));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let calls = AtomicU32::new(0);
        let result = with_retry(fast(10), "req", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 10 {
                    Err(anyhow!("request timed out"))
                } else {
                    Ok("T1")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "T1");
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_permanent_failure_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: PipelineResult<()> = with_retry(fast(10), "req", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow!("file reference expired")) }
        })
        .await;
        assert!(matches!(
            result,
            Err(PipelineError::DeliveryTerminalFailure { attempts: 1, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_terminal() {
        let calls = AtomicU32::new(0);
        let result: PipelineResult<()> = with_retry(fast(3), "req", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow!("context deadline exceeded")) }
        })
        .await;
        assert!(matches!(
            result,
            Err(PipelineError::DeliveryTerminalFailure { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
