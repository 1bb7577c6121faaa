// In-flight fetch tracking: one live job per key, late arrivals join its outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};

/// What a finished fetch hands to its joiners: the delivery token or the error.
pub type FetchOutcome = Result<String, PipelineError>;

/// `None` until the job finishes.
type DoneSignal = Option<FetchOutcome>;

/// Handle on one live fetch. Cloning it keeps the completion signal reachable
/// even after the tracker forgets the job.
#[derive(Debug, Clone)]
pub struct FetchJob {
    pub key: String,
    pub request_id: String,
    pub requester: i64,
    pub started_at: DateTime<Utc>,
    started: Instant,
    done: watch::Receiver<DoneSignal>,
}

impl FetchJob {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Block until this job finishes or `timeout` elapses. A timeout only
    /// affects the caller; the job itself keeps running.
    pub async fn wait(&self, timeout: Duration) -> PipelineResult<FinishedJob> {
        debug!(
            "waiting on fetch {} for {} started by requester {}",
            self.request_id, self.key, self.requester
        );
        let mut done = self.done.clone();
        let signal = tokio::time::timeout(timeout, async {
            match done.wait_for(|signal| signal.is_some()).await {
                Ok(signal) => signal.clone().unwrap_or_else(|| Err(abandoned())),
                Err(_) => Err(abandoned()),
            }
        })
        .await;

        match signal {
            Ok(outcome) => Ok(FinishedJob {
                job: self.clone(),
                outcome,
            }),
            Err(_) => {
                warn!("gave up waiting {:?} on fetch for {}", timeout, self.key);
                Err(PipelineError::JoinTimeout(timeout))
            }
        }
    }
}

fn abandoned() -> PipelineError {
    PipelineError::FetchFailure("in-flight fetch was abandoned".to_string())
}

/// Outcome observed by a request that joined someone else's fetch.
#[derive(Debug, Clone)]
pub struct FinishedJob {
    pub job: FetchJob,
    pub outcome: FetchOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveFetch {
    pub key: String,
    pub request_id: String,
    pub requester: i64,
    pub started_at: DateTime<Utc>,
}

struct Slot {
    job: FetchJob,
    done_tx: watch::Sender<DoneSignal>,
}

#[derive(Default)]
pub struct InFlightTracker {
    jobs: DashMap<String, Slot>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fetch for `key`. When one is already live, its handle is
    /// returned as the error so the caller can join it.
    pub fn start(
        self: &Arc<Self>,
        key: &str,
        request_id: &str,
        requester: i64,
    ) -> Result<FetchLease, FetchJob> {
        match self.jobs.entry(key.to_string()) {
            Entry::Occupied(occupied) => Err(occupied.get().job.clone()),
            Entry::Vacant(vacant) => {
                let (done_tx, done_rx) = watch::channel(None);
                let job = FetchJob {
                    key: key.to_string(),
                    request_id: request_id.to_string(),
                    requester,
                    started_at: Utc::now(),
                    started: Instant::now(),
                    done: done_rx,
                };
                vacant.insert(Slot {
                    job: job.clone(),
                    done_tx,
                });
                debug!("[{}] registered in-flight fetch for {}", request_id, key);
                Ok(FetchLease {
                    tracker: Arc::clone(self),
                    job,
                    finished: false,
                })
            }
        }
    }

    /// Complete the job for `key`, wake every waiter, and forget it.
    pub fn finish(&self, key: &str, outcome: FetchOutcome) -> bool {
        match self.jobs.remove(key) {
            Some((_, slot)) => {
                debug!(
                    "[{}] finished fetch for {} after {:?} (ok: {})",
                    slot.job.request_id,
                    key,
                    slot.job.elapsed(),
                    outcome.is_ok()
                );
                slot.done_tx.send_replace(Some(outcome));
                true
            }
            None => false,
        }
    }

    /// Handle on the live job for `key`, if any.
    pub fn job(&self, key: &str) -> Option<FetchJob> {
        self.jobs.get(key).map(|slot| slot.job.clone())
    }

    /// Look up the live job for `key` and wait on it. `Ok(None)` when no job is live.
    pub async fn wait(&self, key: &str, timeout: Duration) -> PipelineResult<Option<FinishedJob>> {
        match self.job(key) {
            Some(job) => job.wait(timeout).await.map(Some),
            None => Ok(None),
        }
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.jobs.contains_key(key)
    }

    pub fn snapshot(&self) -> Vec<ActiveFetch> {
        let mut active: Vec<ActiveFetch> = self
            .jobs
            .iter()
            .map(|slot| ActiveFetch {
                key: slot.key().clone(),
                request_id: slot.job.request_id.clone(),
                requester: slot.job.requester,
                started_at: slot.job.started_at,
            })
            .collect();
        active.sort_by_key(|fetch| fetch.started_at);
        active
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Ownership of a live job. Finishing consumes it; dropping an unfinished
/// lease finishes the job as failed so waiters never hang on a lost leader.
pub struct FetchLease {
    tracker: Arc<InFlightTracker>,
    job: FetchJob,
    finished: bool,
}

impl FetchLease {
    pub fn job(&self) -> &FetchJob {
        &self.job
    }

    pub fn finish(mut self, outcome: FetchOutcome) {
        self.finished = true;
        self.tracker.finish(&self.job.key, outcome);
    }
}

impl Drop for FetchLease {
    fn drop(&mut self) {
        if !self.finished {
            self.tracker.finish(
                &self.job.key,
                Err(PipelineError::FetchFailure(
                    "fetch ended without reporting an outcome".to_string(),
                )),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_live_job_per_key() {
        let tracker = Arc::new(InFlightTracker::new());
        let lease = tracker.start("k", "r1", 1).unwrap();
        let existing = tracker.start("k", "r2", 2).err().unwrap();
        assert_eq!(existing.request_id, "r1");
        assert!(tracker.is_active("k"));
        assert_eq!(tracker.snapshot().len(), 1);

        lease.finish(Ok("T1".to_string()));
        assert!(!tracker.is_active("k"));
        assert!(tracker.start("k", "r3", 3).is_ok());
    }

    #[tokio::test]
    async fn test_wait_without_job_returns_none() {
        let tracker = InFlightTracker::new();
        let outcome = tracker.wait("k", Duration::from_millis(10)).await.unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_waiters_observe_token() {
        let tracker = Arc::new(InFlightTracker::new());
        let lease = tracker.start("k", "r1", 1).unwrap();

        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.wait("k", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        lease.finish(Ok("T7".to_string()));

        let finished = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(finished.job.request_id, "r1");
        assert_eq!(finished.outcome.unwrap(), "T7");
    }

    #[tokio::test]
    async fn test_held_handle_sees_outcome_after_job_is_forgotten() {
        let tracker = Arc::new(InFlightTracker::new());
        let lease = tracker.start("k", "r1", 1).unwrap();
        let handle = tracker.job("k").unwrap();

        lease.finish(Err(PipelineError::FetchFailure("tool exited 1".into())));
        assert!(tracker.job("k").is_none());

        let finished = handle.wait(Duration::from_millis(50)).await.unwrap();
        assert!(matches!(finished.outcome, Err(PipelineError::FetchFailure(_))));
    }

    #[tokio::test]
    async fn test_wait_timeout_leaves_job_running() {
        let tracker = Arc::new(InFlightTracker::new());
        let _lease = tracker.start("k", "r1", 1).unwrap();
        let result = tracker.wait("k", Duration::from_millis(20)).await;
        assert!(matches!(result, Err(PipelineError::JoinTimeout(_))));
        assert!(tracker.is_active("k"));
    }

    #[tokio::test]
    async fn test_dropped_lease_fails_waiters() {
        let tracker = Arc::new(InFlightTracker::new());
        let lease = tracker.start("k", "r1", 1).unwrap();
        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.wait("k", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(lease);

        let finished = waiter.await.unwrap().unwrap().unwrap();
        assert!(finished.outcome.is_err());
        assert!(tracker.is_empty());
    }
}
