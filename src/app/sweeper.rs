//! Stuck-request sweeper.
//!
//! Periodic background task recovering APPROVED and EXECUTING requests
//! whose pipeline died mid-flight (process crash, queue loss,
//! mark-failed that never landed, a job that exhausted its retries).
//! Each pass reconciles against authoritative chain state first,
//! applies the hard age ceiling, and only then re-runs settlement.
//! Rows are handled sequentially; the interval is long enough that
//! passes never overlap.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::app::orchestrator::{SettlementOrchestrator, truncate_reason};
use crate::domain::{
    AppError, ChainGateway, ChainRequestStatus, MirrorStore, SpendRequest,
};

/// Sweeper tuning
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub enabled: bool,
    /// Time between passes
    pub poll_interval: Duration,
    /// APPROVED/EXECUTING rows idle for longer than this are candidates
    pub stuck_after_secs: i64,
    /// Requests older than this are force-failed with a timeout reason
    pub hard_timeout_secs: i64,
    /// Re-settlement errors past this idle age force the row to FAILED
    pub escalation_secs: i64,
    pub batch_size: i64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(300),
            stuck_after_secs: 600,
            hard_timeout_secs: 86_400,
            escalation_secs: 3_600,
            batch_size: 20,
        }
    }
}

/// Recovers settlement work left behind by crashed pipelines
pub struct StuckRequestSweeper {
    store: Arc<dyn MirrorStore>,
    gateway: Arc<dyn ChainGateway>,
    orchestrator: Arc<SettlementOrchestrator>,
    config: SweeperConfig,
}

impl StuckRequestSweeper {
    pub fn new(
        store: Arc<dyn MirrorStore>,
        gateway: Arc<dyn ChainGateway>,
        orchestrator: Arc<SettlementOrchestrator>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            orchestrator,
            config,
        }
    }

    /// Run one full sweep pass. Per-row errors are logged and the pass
    /// moves on; a failed row scan aborts the pass.
    #[instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<usize, AppError> {
        let stuck = self
            .store
            .find_stuck_requests(self.config.stuck_after_secs, self.config.batch_size)
            .await?;

        if stuck.is_empty() {
            return Ok(0);
        }
        info!(count = stuck.len(), "Sweeping stuck requests");

        let mut recovered = 0;
        for request in &stuck {
            match self.recover(request).await {
                Ok(()) => recovered += 1,
                Err(e) => {
                    error!(
                        request_id = request.request_id,
                        error = %e,
                        "Stuck request recovery failed"
                    );
                }
            }
        }
        Ok(recovered)
    }

    async fn recover(&self, request: &SpendRequest) -> Result<(), AppError> {
        let request_id = request.request_id;

        // Chain state is authoritative; settle the bookkeeping first
        if let Some(chain_state) = self.gateway.get_request(request_id).await? {
            match chain_state.status {
                ChainRequestStatus::Executed => {
                    warn!(
                        request_id = request_id,
                        "Request already executed on-chain, correcting mirror"
                    );
                    return self
                        .store
                        .mark_request_executed(
                            request_id,
                            chain_state.transfer_id.as_deref(),
                            None,
                            None,
                            Utc::now(),
                        )
                        .await;
                }
                ChainRequestStatus::Rejected => {
                    return self
                        .store
                        .mark_request_failed(request_id, "rejected on-chain")
                        .await;
                }
                ChainRequestStatus::Failed => {
                    return self
                        .store
                        .mark_request_failed(request_id, "failed on-chain")
                        .await;
                }
                ChainRequestStatus::Pending | ChainRequestStatus::Approved => {}
            }
        }

        let age_secs = (Utc::now() - request.requested_at).num_seconds();
        if age_secs > self.config.hard_timeout_secs {
            warn!(
                request_id = request_id,
                age_secs = age_secs,
                "Request past hard timeout, forcing failure"
            );
            self.store.mark_request_failed(request_id, "timeout").await?;
            if let Err(e) = self.gateway.mark_failed(request_id, "timeout").await {
                warn!(request_id = request_id, error = %e, "On-chain mark-failed did not land");
            }
            return Ok(());
        }

        info!(request_id = request_id, "Re-running settlement for stuck request");
        match self.orchestrator.settle(request_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // The pipeline records its own failures; this backstop
                // catches rows whose failure write never landed
                let idle_secs = (Utc::now() - request.updated_at).num_seconds();
                if idle_secs > self.config.escalation_secs {
                    let reason =
                        truncate_reason(&format!("settlement retry gave up: {}", e));
                    warn!(
                        request_id = request_id,
                        idle_secs = idle_secs,
                        "Escalating long-stuck request to FAILED"
                    );
                    self.store.mark_request_failed(request_id, &reason).await?;
                    if let Err(e) = self.gateway.mark_failed(request_id, &reason).await {
                        warn!(
                            request_id = request_id,
                            error = %e,
                            "On-chain mark-failed did not land"
                        );
                    }
                    return Ok(());
                }
                Err(e)
            }
        }
    }
}

/// Spawn the sweeper loop. Returns the task handle and a shutdown
/// signal sender. A disabled sweeper exits immediately.
pub fn spawn_sweeper(sweeper: StuckRequestSweeper) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        if !sweeper.config.enabled {
            info!("Stuck-request sweeper disabled");
            return;
        }
        info!(
            interval_secs = sweeper.config.poll_interval.as_secs(),
            "Stuck-request sweeper started"
        );
        let mut ticker = tokio::time::interval(sweeper.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Stuck-request sweeper shutting down");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match sweeper.sweep_once().await {
                        Ok(0) => {}
                        Ok(n) => info!(recovered = n, "Sweep pass completed"),
                        Err(e) => error!(error = %e, "Sweep pass failed"),
                    }
                }
            }
        }
    });

    (handle, shutdown_tx)
}
