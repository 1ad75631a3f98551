//! Request lifecycle manager.
//!
//! Consumes every domain event from the bus and keeps the mirror in
//! step with the contract: idempotent inserts for new requests,
//! status stamps for approvals and terminal transitions, wholesale
//! account reconciliation for account events, and fire-and-forget
//! alerts for notable state changes. Also the front door for
//! operator-initiated reads and pass-through chain writes.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::app::event_bus::EventBus;
use crate::domain::{
    AccountParams, AlertKind, AlertSeverity, AlertSink, AppError, ChainGateway, EventMeta,
    HealthReport, HealthStatus, JobQueue, MirrorStore, NewSpendRequest, RequestFilter,
    RequestStatus, SpendRequest, TreasuryEvent, TxOutcome,
};

/// Lifecycle manager tuning
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Poll interval while waiting out the approved-before-requested race
    pub wait_poll_interval: Duration,
    /// Poll attempts before an approval for an unknown request is dropped
    pub wait_max_attempts: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            wait_poll_interval: Duration::from_millis(50),
            wait_max_attempts: 20,
        }
    }
}

/// Applies domain events to the mirror and serves reads
pub struct RequestLifecycleManager {
    store: Arc<dyn MirrorStore>,
    gateway: Arc<dyn ChainGateway>,
    queue: Arc<dyn JobQueue>,
    alerts: Arc<dyn AlertSink>,
    config: LifecycleConfig,
}

impl RequestLifecycleManager {
    pub fn new(
        store: Arc<dyn MirrorStore>,
        gateway: Arc<dyn ChainGateway>,
        queue: Arc<dyn JobQueue>,
        alerts: Arc<dyn AlertSink>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            queue,
            alerts,
            config,
        }
    }

    /// Consume bus events until the bus closes or shutdown is signaled
    pub async fn run(
        &self,
        bus: &EventBus,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut rx = bus.subscribe();
        info!("Lifecycle manager started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Lifecycle manager shutting down");
                        break;
                    }
                }
                event = rx.recv() => {
                    match event {
                        Ok(event) => {
                            if let Err(e) = self.handle_event(event).await {
                                error!(error = %e, "Event handling failed");
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "Lifecycle manager lagged behind the event bus");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            warn!("Event bus closed");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Apply one domain event to the mirror
    #[instrument(skip(self, event), fields(event = event.name()))]
    pub async fn handle_event(&self, event: TreasuryEvent) -> Result<(), AppError> {
        match event {
            TreasuryEvent::RequestSubmitted {
                meta,
                request_id,
                account_id,
                requester_address,
                amount,
                destination_chain_id,
                destination_address,
                description,
            } => {
                self.on_requested(
                    &meta,
                    request_id,
                    account_id,
                    requester_address,
                    amount,
                    destination_chain_id,
                    destination_address,
                    description,
                )
                .await
            }
            TreasuryEvent::RequestApproved {
                meta, request_id, ..
            } => self.on_approved(&meta, request_id).await,
            TreasuryEvent::RequestRejected {
                request_id, reason, ..
            } => self.store.mark_request_rejected(request_id, &reason).await,
            TreasuryEvent::RequestExecuted {
                meta,
                request_id,
                transfer_id,
            } => self.on_executed(&meta, request_id, &transfer_id).await,
            TreasuryEvent::RequestFailed {
                request_id, reason, ..
            } => self.store.mark_request_failed(request_id, &reason).await,
            TreasuryEvent::AccountCreated { account_id, .. }
            | TreasuryEvent::AccountUpdated { account_id, .. }
            | TreasuryEvent::AccountUnfrozen { account_id, .. } => {
                self.reconcile_account(account_id).await
            }
            TreasuryEvent::AccountFrozen { account_id, .. } => {
                self.reconcile_account(account_id).await?;
                self.alerts
                    .create_alert(
                        AlertKind::AccountFrozen,
                        &format!("Account {} was frozen on-chain", account_id),
                        AlertSeverity::Warning,
                        Some(account_id),
                        None,
                    )
                    .await;
                Ok(())
            }
            TreasuryEvent::AccountClosed { account_id, .. } => {
                self.reconcile_account(account_id).await?;
                self.alerts
                    .create_alert(
                        AlertKind::AccountClosed,
                        &format!("Account {} was closed on-chain", account_id),
                        AlertSeverity::Info,
                        Some(account_id),
                        None,
                    )
                    .await;
                Ok(())
            }
            TreasuryEvent::InboundFunding {
                account_id, amount, ..
            } => {
                debug!(account_id = account_id, amount = %amount, "Inbound funding recorded");
                self.reconcile_account(account_id).await
            }
            TreasuryEvent::AdminTransferred {
                previous_admin,
                new_admin,
                ..
            } => {
                self.alerts
                    .create_alert(
                        AlertKind::AdminTransferred,
                        "Treasury admin authority was transferred",
                        AlertSeverity::Critical,
                        None,
                        Some(json!({
                            "previous_admin": previous_admin,
                            "new_admin": new_admin,
                        })),
                    )
                    .await;
                Ok(())
            }
            TreasuryEvent::Paused { .. } => {
                self.alerts
                    .create_alert(
                        AlertKind::ContractPaused,
                        "Treasury contract was paused",
                        AlertSeverity::Critical,
                        None,
                        None,
                    )
                    .await;
                Ok(())
            }
            TreasuryEvent::Unpaused { .. } => {
                info!("Treasury contract was unpaused");
                Ok(())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn on_requested(
        &self,
        meta: &EventMeta,
        request_id: i64,
        account_id: i64,
        requester_address: String,
        amount: String,
        destination_chain_id: i64,
        destination_address: String,
        description: String,
    ) -> Result<(), AppError> {
        let request = SpendRequest::new(
            request_id,
            account_id,
            requester_address,
            amount,
            destination_chain_id,
            destination_address,
            description,
            meta.timestamp,
        );

        let inserted = self.store.insert_request(&request).await?;
        if inserted {
            info!(request_id = request_id, "New spend request mirrored");
        } else {
            debug!(request_id = request_id, "Spend request already mirrored");
        }
        Ok(())
    }

    /// An approval can arrive before the requested event's insert has
    /// landed. Wait it out with a bounded poll; if the row never
    /// appears, log and drop the approval rather than block dispatch.
    async fn on_approved(&self, meta: &EventMeta, request_id: i64) -> Result<(), AppError> {
        let Some(request) = self.wait_for_request(request_id).await? else {
            warn!(
                request_id = request_id,
                "Dropping approval for unknown request"
            );
            return Ok(());
        };

        if request.status != RequestStatus::PendingApproval {
            debug!(
                request_id = request_id,
                status = %request.status,
                "Ignoring approval for request past pending"
            );
            return Ok(());
        }

        self.store
            .mark_request_approved(request_id, meta.timestamp)
            .await?;

        let enqueued = self.queue.enqueue_settlement(request_id).await?;
        info!(
            request_id = request_id,
            enqueued = enqueued,
            "Spend request approved"
        );
        Ok(())
    }

    /// The executed event may come from another operator instance, so
    /// the mirror is corrected with whatever correlation the event
    /// carries. Missing hashes keep their existing values.
    async fn on_executed(
        &self,
        meta: &EventMeta,
        request_id: i64,
        transfer_id: &str,
    ) -> Result<(), AppError> {
        self.store
            .mark_request_executed(
                request_id,
                Some(transfer_id),
                None,
                Some(&meta.tx_hash),
                meta.timestamp,
            )
            .await
    }

    async fn wait_for_request(&self, request_id: i64) -> Result<Option<SpendRequest>, AppError> {
        for attempt in 0..self.config.wait_max_attempts {
            if let Some(request) = self.store.get_request(request_id).await? {
                return Ok(Some(request));
            }
            if attempt + 1 < self.config.wait_max_attempts {
                tokio::time::sleep(self.config.wait_poll_interval).await;
            }
        }
        Ok(None)
    }

    /// Overwrite the mirror row for an account from authoritative
    /// chain state. A chain miss is logged and skipped.
    #[instrument(skip(self))]
    pub async fn reconcile_account(&self, account_id: i64) -> Result<(), AppError> {
        let Some(state) = self.gateway.get_account(account_id).await? else {
            warn!(
                account_id = account_id,
                "Account not found on-chain, skipping reconcile"
            );
            return Ok(());
        };

        let created_at = self
            .store
            .get_account(account_id)
            .await?
            .map(|existing| existing.created_at);

        self.store
            .upsert_account(&state.into_mirror(created_at))
            .await?;
        debug!(account_id = account_id, "Account mirror reconciled");
        Ok(())
    }

    // --- read API ---

    pub async fn get_request(&self, request_id: i64) -> Result<Option<SpendRequest>, AppError> {
        self.store.get_request(request_id).await
    }

    pub async fn list_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<SpendRequest>, AppError> {
        self.store.list_requests(filter).await
    }

    pub async fn get_account(
        &self,
        account_id: i64,
    ) -> Result<Option<crate::domain::SpendAccount>, AppError> {
        self.store.get_account(account_id).await
    }

    pub async fn health(&self) -> HealthReport {
        let database = match self.store.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        };
        let chain = match self.gateway.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        };
        HealthReport::new(database, chain)
    }

    // --- pass-through chain writes ---
    // The mirror is updated by the resulting events, not here.

    pub async fn submit_request(&self, request: &NewSpendRequest) -> Result<i64, AppError> {
        self.gateway.submit_request(request).await
    }

    pub async fn approve_request(&self, request_id: i64) -> Result<TxOutcome, AppError> {
        self.gateway.approve_request(request_id).await
    }

    pub async fn reject_request(
        &self,
        request_id: i64,
        reason: &str,
    ) -> Result<TxOutcome, AppError> {
        self.gateway.reject_request(request_id, reason).await
    }

    pub async fn create_account(&self, params: &AccountParams) -> Result<i64, AppError> {
        self.gateway.create_account(params).await
    }

    pub async fn update_account(
        &self,
        account_id: i64,
        params: &AccountParams,
    ) -> Result<TxOutcome, AppError> {
        self.gateway.update_account(account_id, params).await
    }
}
