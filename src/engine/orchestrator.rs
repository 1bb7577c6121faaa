// End-to-end flow for one inbound request: cache, coalescing, bounded fetch,
// integrity check, delivery, cache write, and refund on failure.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::cache::ResultCache;
use super::compensation::{CompensationTrigger, PaymentContext};
use super::delivery::{self, RetryPolicy};
use super::inflight::{ActiveFetch, FetchJob, FetchLease, InFlightTracker};
use super::integrity::ArtifactName;
use super::limiter::{ConcurrencyLimiter, SlotPermit};
use super::locks::LockRegistry;
use super::stats::{StatsCollector, StatsSnapshot};
use crate::config::EngineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::fetch::traits::Fetcher;
use crate::fetch::workdir;
use crate::ledger::reservations::ReservationBook;
use crate::ledger::traits::Ledger;
use crate::store::traits::CacheStore;
use crate::transport::{Notice, Requester, Transport};

/// The outside systems the engine drives.
pub struct Collaborators {
    pub fetcher: Arc<dyn Fetcher>,
    pub transport: Arc<dyn Transport>,
    pub ledger: Arc<dyn Ledger>,
    pub store: Arc<dyn CacheStore>,
    pub reservations: Arc<ReservationBook>,
}

/// How a successful request was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivered {
    /// Redelivered a cached token.
    FromCache,
    /// Joined another request's fetch and redelivered its result.
    AfterJoin,
    /// Ran the fetch pipeline itself.
    Fetched,
}

/// Decision taken while holding the per-key lock.
enum Initiation {
    Lead(FetchLease, SlotPermit),
    Join(FetchJob),
    Cached(String),
}

pub struct Orchestrator {
    config: EngineConfig,
    limiter: ConcurrencyLimiter,
    locks: Arc<LockRegistry>,
    inflight: Arc<InFlightTracker>,
    cache: ResultCache,
    compensation: CompensationTrigger,
    fetcher: Arc<dyn Fetcher>,
    transport: Arc<dyn Transport>,
    stats: Arc<StatsCollector>,
    retry: RetryPolicy,
    shutdown_token: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        let stats = Arc::new(StatsCollector::new());
        let retry = RetryPolicy::new(config.delivery_max_retries, config.delivery_backoff());
        info!(
            "fetch engine: workers={} join_timeout={:?} delivery_retries={} work_dir={}",
            config.max_workers,
            config.join_timeout(),
            config.delivery_max_retries,
            config.work_dir.display()
        );
        Self {
            limiter: ConcurrencyLimiter::new(config.max_workers),
            locks: Arc::new(LockRegistry::new()),
            inflight: Arc::new(InFlightTracker::new()),
            cache: ResultCache::new(collaborators.store),
            compensation: CompensationTrigger::new(
                collaborators.ledger,
                collaborators.reservations,
                Arc::clone(&stats),
            ),
            fetcher: collaborators.fetcher,
            transport: collaborators.transport,
            stats,
            retry,
            shutdown_token: CancellationToken::new(),
            config,
        }
    }

    /// Serve `key` to `requester`. Paid requests are refunded once if this fails.
    pub async fn request_artifact(
        &self,
        key: &str,
        requester: Requester,
        payment: Option<PaymentContext>,
    ) -> PipelineResult<Delivered> {
        let request_id = Uuid::new_v4().simple().to_string();
        self.stats.record_request();
        info!(
            "[{}] request: user={} key={} paid={}",
            request_id,
            requester.user_id,
            key,
            payment.is_some()
        );

        let outcome = if self.shutdown_token.is_cancelled() {
            Err(PipelineError::ShuttingDown)
        } else {
            self.run(key, &requester, &request_id).await
        };

        match outcome {
            Ok(delivered) => {
                info!("[{}] done ({:?})", request_id, delivered);
                Ok(delivered)
            }
            Err(e) => Err(self.fail(&request_id, key, &requester, payment, e).await),
        }
    }

    async fn run(
        &self,
        key: &str,
        requester: &Requester,
        request_id: &str,
    ) -> PipelineResult<Delivered> {
        if let Some(token) = self.cache.get(key).await {
            debug!("[{}] cache hit for {}", request_id, key);
            if self.redeliver_or_invalidate(key, requester, &token, request_id).await {
                self.stats.record_cache_hit();
                return Ok(Delivered::FromCache);
            }
        }

        // A joined fetch can hand over a token that is already stale; one more
        // initiation round covers that.
        for _ in 0..2 {
            match self.initiate(key, requester, request_id).await? {
                Initiation::Lead(lease, permit) => {
                    return self.lead(key, requester, request_id, lease, permit).await;
                }
                Initiation::Cached(token) => {
                    if self.redeliver_or_invalidate(key, requester, &token, request_id).await {
                        self.stats.record_cache_hit();
                        return Ok(Delivered::FromCache);
                    }
                }
                Initiation::Join(job) => {
                    let token = self.join(job, requester, request_id).await?;
                    if self.redeliver_or_invalidate(key, requester, &token, request_id).await {
                        return Ok(Delivered::AfterJoin);
                    }
                }
            }
        }

        Err(PipelineError::FetchFailure(
            "no deliverable result after joining in-flight fetch".to_string(),
        ))
    }

    /// Join-or-start under the per-key lock. The lock only covers this decision;
    /// a join carries the job handle so its outcome cannot be missed afterwards.
    async fn initiate(
        &self,
        key: &str,
        requester: &Requester,
        request_id: &str,
    ) -> PipelineResult<Initiation> {
        let lock = self.locks.lock_for(key);
        let decision = {
            let _guard = lock.lock().await;
            debug!("[{}] holding lock for {}", request_id, key);

            if let Some(job) = self.inflight.job(key) {
                Ok(Initiation::Join(job))
            } else if let Some(token) = self.cache.get(key).await {
                Ok(Initiation::Cached(token))
            } else {
                let permit = match self.config.slot_wait() {
                    Some(wait) => self.limiter.acquire_within(wait).await,
                    None => self.limiter.try_acquire(),
                };
                match permit {
                    Some(permit) => match self.inflight.start(key, request_id, requester.user_id) {
                        Ok(lease) => Ok(Initiation::Lead(lease, permit)),
                        Err(job) => Ok(Initiation::Join(job)),
                    },
                    None => Err(PipelineError::Busy {
                        capacity: self.limiter.capacity(),
                    }),
                }
            }
        };
        drop(lock);
        self.locks.schedule_cleanup(
            key.to_string(),
            self.config.lock_cleanup_delay(),
            self.shutdown_token.clone(),
        );
        decision
    }

    /// Wait on a running fetch and take over its token or its error.
    async fn join(
        &self,
        job: FetchJob,
        requester: &Requester,
        request_id: &str,
    ) -> PipelineResult<String> {
        self.stats.record_joined();
        self.notify(requester, Notice::AlreadyFetching).await;
        info!(
            "[{}] joining fetch {} for {}",
            request_id, job.request_id, job.key
        );

        let finished = job.wait(self.config.join_timeout()).await?;
        match finished.outcome {
            Ok(token) => {
                debug!(
                    "[{}] joined fetch {} finished after {:?}",
                    request_id,
                    finished.job.request_id,
                    finished.job.elapsed()
                );
                Ok(token)
            }
            Err(e) => {
                warn!(
                    "[{}] joined fetch {} failed: {}",
                    request_id, finished.job.request_id, e
                );
                Err(e)
            }
        }
    }

    async fn lead(
        &self,
        key: &str,
        requester: &Requester,
        request_id: &str,
        lease: FetchLease,
        permit: SlotPermit,
    ) -> PipelineResult<Delivered> {
        self.notify(requester, Notice::Fetching).await;
        self.stats.increment_workers();
        let result = self.fetch_and_deliver(key, requester, request_id).await;
        self.stats.decrement_workers();
        drop(permit);

        match result {
            Ok(token) => {
                // Joiners get the token from the lease even if the store refuses it.
                if let Err(e) = self.cache.set(key, &token).await {
                    warn!("[{}] could not cache token for {}: {}", request_id, key, e);
                }
                lease.finish(Ok(token));
                Ok(Delivered::Fetched)
            }
            Err(e) => {
                lease.finish(Err(e.clone()));
                Err(e)
            }
        }
    }

    /// Fetch, verify ownership, and deliver. Returns the delivery token.
    async fn fetch_and_deliver(
        &self,
        key: &str,
        requester: &Requester,
        request_id: &str,
    ) -> PipelineResult<String> {
        let work_dir = &self.config.work_dir;
        workdir::prepare(work_dir, self.config.stale_artifact_age())
            .await
            .map_err(|e| PipelineError::FetchFailure(format!("{:#}", e)))?;

        let name = ArtifactName::new(requester.user_id, request_id, key);
        debug!("[{}] fetching {} as {}", request_id, key, name.stem());
        let artifact = self
            .fetcher
            .fetch(key, &name, work_dir)
            .await
            .map_err(|e| PipelineError::FetchFailure(format!("{:#}", e)))?;

        if !name.verify(&artifact) {
            error!(
                "[{}] artifact {} does not belong to user {} / key {}",
                request_id,
                artifact.display(),
                requester.user_id,
                key
            );
            return Err(PipelineError::IntegrityViolation {
                path: artifact.display().to_string(),
                expected: name.stem(),
            });
        }

        let delivered = delivery::deliver(
            self.transport.as_ref(),
            requester,
            &artifact,
            self.retry,
            request_id,
        )
        .await;
        workdir::discard(&artifact).await;
        let token = delivered?;
        self.stats.record_delivery();
        Ok(token)
    }

    /// Try a cached token. On failure drop the entry, unless it has already
    /// been replaced by a newer token.
    async fn redeliver_or_invalidate(
        &self,
        key: &str,
        requester: &Requester,
        token: &str,
        request_id: &str,
    ) -> bool {
        match delivery::redeliver(
            self.transport.as_ref(),
            requester,
            token,
            self.retry,
            request_id,
        )
        .await
        {
            Ok(()) => {
                self.stats.record_delivery();
                true
            }
            Err(e) => {
                warn!("[{}] cached token for {} rejected: {}", request_id, key, e);
                if let Err(e) = self.cache.invalidate_if(key, token).await {
                    warn!("[{}] invalidating {} failed: {}", request_id, key, e);
                }
                false
            }
        }
    }

    /// The single failure exit: tell the requester and refund a paid request.
    async fn fail(
        &self,
        request_id: &str,
        key: &str,
        requester: &Requester,
        payment: Option<PaymentContext>,
        err: PipelineError,
    ) -> PipelineError {
        warn!("[{}] failed for {}: {}", request_id, key, err);
        let notice = match &err {
            PipelineError::Busy { .. } => {
                self.stats.record_busy();
                Notice::Busy
            }
            PipelineError::JoinTimeout(_) => {
                self.stats.record_join_timeout();
                Notice::Failed
            }
            PipelineError::FetchFailure(_) | PipelineError::IntegrityViolation { .. } => {
                self.stats.record_fetch_failed();
                Notice::Failed
            }
            _ => Notice::Failed,
        };
        self.notify(requester, notice).await;

        if let Some(payment) = payment {
            info!(
                "[{}] refunding charge {} ({} to {})",
                request_id, payment.charge_reference, payment.amount, payment.payer
            );
            // Failure is already reported on the operator channel.
            let _ = self
                .compensation
                .compensate(
                    payment.payer,
                    &payment.charge_reference,
                    payment.amount,
                    err.refund_reason(),
                )
                .await;
            self.notify(requester, Notice::RefundInitiated).await;
        }
        err
    }

    async fn notify(&self, requester: &Requester, notice: Notice) {
        if let Err(e) = self.transport.notify(requester, notice.text()).await {
            debug!("notice {:?} to {} not sent: {:#}", notice, requester.chat_id, e);
        }
    }

    pub fn active_fetches(&self) -> Vec<ActiveFetch> {
        self.inflight.snapshot()
    }

    /// Fill the in-memory mirror from the store. Call once at startup.
    pub async fn warm_cache(&self) -> PipelineResult<usize> {
        self.cache.load().await
    }

    pub async fn cache_size(&self) -> usize {
        self.cache.len().await
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub async fn purge_cache_older_than(&self, max_age: Duration) -> PipelineResult<usize> {
        self.cache.purge_older_than(max_age).await
    }

    pub async fn clear_cache(&self) -> PipelineResult<usize> {
        self.cache.clear().await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn slots_in_use(&self) -> usize {
        self.limiter.in_use()
    }

    /// Reject new requests and stop pending lock sweeps. Running fetches finish normally.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        debug!("orchestrator dropped, cancelling background sweeps");
        self.shutdown_token.cancel();
    }
}
