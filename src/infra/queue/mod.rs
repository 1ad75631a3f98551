//! In-process settlement job queue.
//!
//! An unbounded mpsc channel feeds a dispatch loop that spawns one
//! task per job. A shared in-flight set keyed by request id gives the
//! at-most-one guarantee: enqueueing a request that is already queued
//! or executing is a no-op. Each job retries the settlement pipeline
//! with its own backoff, separate from the per-call RPC retries, so a
//! transient failure before the pipeline's first status stamp does not
//! strand the request; the dedup slot is released only after the final
//! attempt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::app::SettlementOrchestrator;
use crate::domain::{AppError, JobQueue, ValidationError};
use crate::infra::retry::RetryPolicy;

/// Job-level retry defaults, applied on top of the per-call RPC retries
#[must_use]
pub fn default_job_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 5_000,
        max_delay_ms: 20_000,
    }
}

/// Producer half of the in-process queue.
///
/// Cloneable; all clones share the channel and the in-flight set.
#[derive(Clone)]
pub struct InProcessJobQueue {
    tx: mpsc::UnboundedSender<i64>,
    in_flight: Arc<DashMap<i64, ()>>,
}

impl InProcessJobQueue {
    /// Create the queue and its dispatch receiver. The receiver must
    /// be handed to [`spawn_queue_worker`] for jobs to run.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<i64>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                in_flight: Arc::new(DashMap::new()),
            },
            rx,
        )
    }

    /// Number of jobs queued or executing right now
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

#[async_trait]
impl JobQueue for InProcessJobQueue {
    async fn enqueue_settlement(&self, request_id: i64) -> Result<bool, AppError> {
        // entry() holds the shard lock, making check-and-insert atomic
        let mut newly_queued = false;
        self.in_flight.entry(request_id).or_insert_with(|| {
            newly_queued = true;
        });
        if !newly_queued {
            debug!(
                request_id = request_id,
                "Settlement job already in flight, skipping"
            );
            return Ok(false);
        }

        if self.tx.send(request_id).is_err() {
            // Dispatcher is gone (shutdown); release the slot
            self.in_flight.remove(&request_id);
            return Err(AppError::Validation(
                crate::domain::ValidationError::InvalidField {
                    field: "queue".to_string(),
                    message: "settlement queue is closed".to_string(),
                },
            ));
        }
        Ok(true)
    }
}

/// Spawn the dispatch loop draining the queue into settlement tasks.
/// Returns the task handle and a shutdown signal sender.
pub fn spawn_queue_worker(
    queue: &InProcessJobQueue,
    mut rx: mpsc::UnboundedReceiver<i64>,
    orchestrator: Arc<SettlementOrchestrator>,
    retry: RetryPolicy,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let in_flight = queue.in_flight.clone();

    let handle = tokio::spawn(async move {
        info!("Settlement queue worker started");
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Settlement queue worker shutting down");
                        break;
                    }
                }
                job = rx.recv() => {
                    let Some(request_id) = job else {
                        warn!("Settlement queue channel closed");
                        break;
                    };
                    let orchestrator = orchestrator.clone();
                    let in_flight = in_flight.clone();
                    let retry = retry.clone();
                    tokio::spawn(async move {
                        run_job(request_id, &orchestrator, &retry).await;
                        in_flight.remove(&request_id);
                    });
                }
            }
        }
    });

    (handle, shutdown_tx)
}

/// Run one settlement job to completion, retrying with backoff until
/// the attempt budget is spent. A request that has moved out of a
/// settleable status is dropped without further attempts.
async fn run_job(
    request_id: i64,
    orchestrator: &SettlementOrchestrator,
    retry: &RetryPolicy,
) {
    let mut attempt: u32 = 0;
    loop {
        match orchestrator.settle(request_id).await {
            Ok(()) => return,
            Err(AppError::Validation(ValidationError::InvalidStatus { status, .. })) => {
                debug!(
                    request_id = request_id,
                    status = %status,
                    "Request no longer settleable, dropping job"
                );
                return;
            }
            Err(e) => {
                attempt += 1;
                if attempt >= retry.max_attempts {
                    error!(
                        request_id = request_id,
                        attempts = attempt,
                        error = %e,
                        "Settlement job failed, retries exhausted"
                    );
                    return;
                }
                let delay = retry.backoff_delay_ms(attempt - 1);
                warn!(
                    request_id = request_id,
                    attempt = attempt,
                    delay_ms = delay,
                    error = %e,
                    "Settlement job failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::Ordering;

    use chrono::Utc;

    use crate::domain::{RequestStatus, SpendRequest};
    use crate::test_utils::{MockChainGateway, MockMirrorStore, MockRailClient};

    fn approved_request(request_id: i64) -> SpendRequest {
        let mut request = SpendRequest::new(
            request_id,
            7,
            "requester_1".to_string(),
            "2500000".to_string(),
            8453,
            "dest_addr".to_string(),
            "infra invoice".to_string(),
            Utc::now(),
        );
        request.status = RequestStatus::Approved;
        request
    }

    struct Worker {
        store: Arc<MockMirrorStore>,
        rail: Arc<MockRailClient>,
        queue: InProcessJobQueue,
        _handle: JoinHandle<()>,
        _shutdown: watch::Sender<bool>,
    }

    fn worker(store: MockMirrorStore, retry: RetryPolicy) -> Worker {
        let store = Arc::new(store);
        let rail = Arc::new(MockRailClient::new());
        let orchestrator = Arc::new(SettlementOrchestrator::new(
            store.clone(),
            Arc::new(MockChainGateway::new()),
            rail.clone(),
        ));
        let (queue, rx) = InProcessJobQueue::new();
        let (_handle, _shutdown) = spawn_queue_worker(&queue, rx, orchestrator, retry);
        Worker {
            store,
            rail,
            queue,
            _handle,
            _shutdown,
        }
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached within the wait budget");
    }

    #[tokio::test]
    async fn test_enqueue_is_deduplicated_by_request_id() {
        let (queue, mut rx) = InProcessJobQueue::new();

        assert!(queue.enqueue_settlement(42).await.unwrap());
        assert!(!queue.enqueue_settlement(42).await.unwrap());
        assert!(queue.enqueue_settlement(43).await.unwrap());

        assert_eq!(rx.recv().await, Some(42));
        assert_eq!(rx.recv().await, Some(43));
        assert_eq!(queue.in_flight_count(), 2);
    }

    #[tokio::test]
    async fn test_enqueue_after_dispatcher_gone_releases_slot() {
        let (queue, rx) = InProcessJobQueue::new();
        drop(rx);

        assert!(queue.enqueue_settlement(7).await.is_err());
        assert_eq!(queue.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_clones_share_dedup_set() {
        let (queue, _rx) = InProcessJobQueue::new();
        let cloned = queue.clone();

        assert!(queue.enqueue_settlement(1).await.unwrap());
        assert!(!cloned.enqueue_settlement(1).await.unwrap());
    }

    #[tokio::test]
    async fn test_job_retries_after_transient_store_failure() {
        let w = worker(
            MockMirrorStore::new().with_request(approved_request(42)),
            RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 100,
                max_delay_ms: 100,
            },
        );

        // The first attempt fails before the EXECUTING stamp lands,
        // leaving the row in APPROVED
        w.store.set_fail_writes(true);
        assert!(w.queue.enqueue_settlement(42).await.unwrap());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(
            w.store.request(42).unwrap().status,
            RequestStatus::Approved
        );

        // The store recovers and the job's next attempt settles through
        w.store.set_fail_writes(false);
        wait_until(|| {
            w.store.request(42).unwrap().status == RequestStatus::Executed
                && w.queue.in_flight_count() == 0
        })
        .await;

        let request = w.store.request(42).unwrap();
        assert!(request.rail_transfer_id.is_some());
        assert!(request.destination_mint_tx_hash.is_some());
        assert!(request.source_settlement_tx_hash.is_some());
    }

    #[tokio::test]
    async fn test_job_for_terminal_request_is_dropped_without_retry() {
        let mut request = approved_request(7);
        request.status = RequestStatus::Rejected;
        let w = worker(
            MockMirrorStore::new().with_request(request),
            RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 100,
                max_delay_ms: 100,
            },
        );

        assert!(w.queue.enqueue_settlement(7).await.unwrap());
        wait_until(|| w.queue.in_flight_count() == 0).await;

        assert_eq!(w.store.request(7).unwrap().status, RequestStatus::Rejected);
        assert_eq!(w.rail.submit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exhausted_job_retries_release_the_dedup_slot() {
        let w = worker(
            MockMirrorStore::new().with_request(approved_request(9)),
            RetryPolicy {
                max_attempts: 2,
                base_delay_ms: 1,
                max_delay_ms: 2,
            },
        );

        w.store.set_fail_writes(true);
        assert!(w.queue.enqueue_settlement(9).await.unwrap());
        wait_until(|| w.queue.in_flight_count() == 0).await;

        // The row stays APPROVED for the sweeper to pick up, and the
        // slot is free for a fresh enqueue
        assert_eq!(w.store.request(9).unwrap().status, RequestStatus::Approved);
        assert!(w.queue.enqueue_settlement(9).await.unwrap());
    }
}
