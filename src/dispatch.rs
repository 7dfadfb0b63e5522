//! # Orchestration Dispatcher
//!
//! Decouples intake from tracker calls. Jobs land on a bounded queue and are
//! drained by a background worker that runs each one through the
//! [`IssueOrchestrator`]. Jobs sharing a fingerprint run one at a time;
//! distinct fingerprints run concurrently up to the configured limit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::counter;
use rand::{Rng, thread_rng};
use tokio::sync::{Mutex as AsyncMutex, Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::error::{OrchestratorError, TrackerError};
use crate::orchestrator::IssueOrchestrator;

const JITTER_FACTOR: f64 = 0.1;

/// One unit of tracker work for an error record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestrationJob {
    pub record_id: Uuid,
    pub project_id: Uuid,
    pub fingerprint: String,
}

/// Cheap handle for enqueueing jobs; clone freely.
#[derive(Clone)]
pub struct OrchestrationDispatcher {
    sender: mpsc::Sender<OrchestrationJob>,
}

impl OrchestrationDispatcher {
    /// Start the background worker. The returned handle resolves once
    /// `shutdown` fires and every in-flight job has finished.
    pub fn spawn(
        orchestrator: Arc<IssueOrchestrator>,
        config: DispatchConfig,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let worker = Worker {
            orchestrator,
            semaphore: Arc::new(Semaphore::new(config.concurrency.max(1))),
            locks: KeyedLocks::default(),
            config,
            shutdown,
        };
        let handle = tokio::spawn(worker.run(receiver));
        (Self { sender }, handle)
    }

    /// Enqueue without waiting. Returns `false` when the job was dropped
    /// because the queue is full or the worker has stopped.
    pub fn dispatch(&self, job: OrchestrationJob) -> bool {
        match self.sender.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                counter!("triage_dispatch_dropped_total", "reason" => "full").increment(1);
                warn!(
                    record_id = %job.record_id,
                    project_id = %job.project_id,
                    fingerprint = %job.fingerprint,
                    "Dispatch queue full, dropping orchestration job"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                counter!("triage_dispatch_dropped_total", "reason" => "closed").increment(1);
                warn!(
                    record_id = %job.record_id,
                    fingerprint = %job.fingerprint,
                    "Dispatcher stopped, dropping orchestration job"
                );
                false
            }
        }
    }
}

/// Async mutex per fingerprint, evicted once no job holds or awaits it.
#[derive(Default, Clone)]
struct KeyedLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl KeyedLocks {
    fn lock_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        map.entry(key.to_string()).or_default().clone()
    }

    fn release(&self, key: &str, lock: Arc<AsyncMutex<()>>) {
        let mut map = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        // One reference in the map plus ours means nobody else is waiting.
        if Arc::strong_count(&lock) == 2 {
            map.remove(key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().map(|map| map.len()).unwrap_or_default()
    }
}

struct Worker {
    orchestrator: Arc<IssueOrchestrator>,
    semaphore: Arc<Semaphore>,
    locks: KeyedLocks,
    config: DispatchConfig,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(self, mut receiver: mpsc::Receiver<OrchestrationJob>) {
        info!(
            capacity = self.config.queue_capacity,
            concurrency = self.config.concurrency,
            "Starting orchestration dispatcher"
        );
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("Orchestration dispatcher shutdown requested");
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(err) = joined {
                        error!(error = ?err, "Orchestration task panicked or was cancelled");
                    }
                }
                job = receiver.recv() => match job {
                    Some(job) => self.start(job, &mut tasks).await,
                    None => break,
                },
            }
        }

        // Stop accepting, then finish what was already queued.
        receiver.close();
        while let Some(job) = receiver.recv().await {
            self.start(job, &mut tasks).await;
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!(error = ?err, "Orchestration task panicked or was cancelled");
            }
        }
        info!("Orchestration dispatcher stopped");
    }

    async fn start(&self, job: OrchestrationJob, tasks: &mut JoinSet<()>) {
        let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
            return;
        };
        let orchestrator = self.orchestrator.clone();
        let locks = self.locks.clone();
        let config = self.config.clone();
        let shutdown = self.shutdown.clone();

        tasks.spawn(async move {
            let _permit = permit;
            let lock = locks.lock_for(&job.fingerprint);
            {
                let _guard = lock.lock().await;
                run_with_retry(&orchestrator, &job, &config, &shutdown).await;
            }
            locks.release(&job.fingerprint, lock);
        });
    }
}

async fn run_with_retry(
    orchestrator: &IssueOrchestrator,
    job: &OrchestrationJob,
    config: &DispatchConfig,
    shutdown: &CancellationToken,
) {
    let max_attempts = config.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match orchestrator.process(job.record_id).await {
            Ok(Some(result)) => {
                debug!(
                    record_id = %job.record_id,
                    fingerprint = %job.fingerprint,
                    operation = result.operation.as_str(),
                    issue_number = ?result.issue_number,
                    attempt,
                    "Orchestration completed"
                );
                return;
            }
            Ok(None) => {
                debug!(project_id = %job.project_id, "No tracker configured, nothing to do");
                return;
            }
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = retry_delay(config, attempt, &err);
                warn!(
                    record_id = %job.record_id,
                    fingerprint = %job.fingerprint,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient orchestration failure, retrying"
                );
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        warn!(record_id = %job.record_id, "Shutdown during retry backoff, giving up");
                        return;
                    }
                    _ = sleep(delay) => {}
                }
            }
            Err(err) => {
                error!(
                    record_id = %job.record_id,
                    fingerprint = %job.fingerprint,
                    attempt,
                    transient = err.is_transient(),
                    error = %err,
                    "Orchestration failed"
                );
                return;
            }
        }
    }
}

/// Exponential backoff from the configured base, capped at the max, plus up
/// to 10% jitter. A tracker `Retry-After` hint raises the floor.
pub fn backoff_delay(config: &DispatchConfig, attempt: u32, retry_after: Option<Duration>) -> Duration {
    let base = config.retry_base_ms as f64;
    let max = config.retry_max_ms as f64;
    let exponent = attempt.saturating_sub(1).min(30) as i32;
    let mut backoff = (base * 2_f64.powi(exponent)).min(max);
    if let Some(hint) = retry_after {
        backoff = backoff.max(hint.as_millis() as f64);
    }
    let jitter = thread_rng().gen_range(0.0..=(JITTER_FACTOR * backoff));
    Duration::from_millis((backoff + jitter) as u64)
}

fn retry_delay(config: &DispatchConfig, attempt: u32, err: &OrchestratorError) -> Duration {
    let retry_after = match err {
        OrchestratorError::Tracker(TrackerError::RateLimited {
            retry_after: Some(secs),
        }) => Some(Duration::from_secs(*secs)),
        _ => None,
    };
    backoff_delay(config, attempt, retry_after)
}
