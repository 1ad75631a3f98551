//! Settlement orchestrator.
//!
//! Drives one approved request through the cross-chain settlement
//! pipeline: mark EXECUTING, submit the signed burn intent, mint on
//! the destination chain, record completion on the source chain, and
//! persist the terminal mirror row with all correlation identifiers.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, instrument, warn};

use crate::domain::{
    AppError, ChainGateway, MirrorStore, RailClient, RequestStatus, SpendRequest, ValidationError,
};

/// Failure reasons are truncated before persistence so an unbounded
/// upstream error body cannot bloat the mirror row
const MAX_FAILURE_REASON_LEN: usize = 500;

pub(crate) fn truncate_reason(reason: &str) -> String {
    if reason.len() <= MAX_FAILURE_REASON_LEN {
        return reason.to_string();
    }
    let mut end = MAX_FAILURE_REASON_LEN;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &reason[..end])
}

/// Executes the settlement pipeline for individual requests
pub struct SettlementOrchestrator {
    store: Arc<dyn MirrorStore>,
    gateway: Arc<dyn ChainGateway>,
    rail: Arc<dyn RailClient>,
}

impl SettlementOrchestrator {
    pub fn new(
        store: Arc<dyn MirrorStore>,
        gateway: Arc<dyn ChainGateway>,
        rail: Arc<dyn RailClient>,
    ) -> Self {
        Self {
            store,
            gateway,
            rail,
        }
    }

    /// Settle one request end to end.
    ///
    /// Admits requests in APPROVED or EXECUTING (a retry re-enters the
    /// pipeline from the top); any other status is a validation error.
    /// On failure the request is marked FAILED in the mirror, a
    /// best-effort mark-failed is sent on-chain, and the original
    /// error is returned to the caller.
    #[instrument(skip(self), fields(request_id = request_id))]
    pub async fn settle(&self, request_id: i64) -> Result<(), AppError> {
        let request = self
            .store
            .get_request(request_id)
            .await?
            .ok_or_else(|| {
                AppError::Validation(ValidationError::InvalidField {
                    field: "request_id".to_string(),
                    message: format!("request {} not found in mirror", request_id),
                })
            })?;

        match request.status {
            RequestStatus::Approved | RequestStatus::Executing => {}
            other => {
                return Err(AppError::Validation(ValidationError::InvalidStatus {
                    request_id,
                    status: other.to_string(),
                }));
            }
        }

        self.store.mark_request_executing(request_id).await?;

        match self.run_pipeline(&request).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.record_failure(request_id, &e).await;
                Err(e)
            }
        }
    }

    async fn run_pipeline(&self, request: &SpendRequest) -> Result<(), AppError> {
        info!(
            amount = %request.amount,
            chain_id = request.destination_chain_id,
            "Starting settlement pipeline"
        );

        let attestation = self
            .rail
            .submit_burn_intent(
                &request.amount,
                request.destination_chain_id,
                &request.destination_address,
            )
            .await?;

        let mint_tx_hash = self
            .rail
            .mint_with_attestation(request.destination_chain_id, &attestation)
            .await?;

        let outcome = self
            .gateway
            .mark_executed(request.request_id, &attestation.transfer_id)
            .await?;

        self.store
            .mark_request_executed(
                request.request_id,
                Some(&attestation.transfer_id),
                Some(&mint_tx_hash),
                Some(&outcome.tx_hash),
                Utc::now(),
            )
            .await?;

        info!(
            transfer_id = %attestation.transfer_id,
            mint_tx_hash = %mint_tx_hash,
            settlement_tx_hash = %outcome.tx_hash,
            "Settlement completed"
        );
        Ok(())
    }

    /// Record a pipeline failure in the mirror and, best effort, on
    /// the contract. Secondary failures are logged and swallowed so
    /// the original error always reaches the caller.
    async fn record_failure(&self, request_id: i64, cause: &AppError) {
        let reason = truncate_reason(&cause.to_string());
        error!(request_id = request_id, reason = %reason, "Settlement failed");

        if let Err(e) = self.store.mark_request_failed(request_id, &reason).await {
            error!(request_id = request_id, error = %e, "Failed to persist failure state");
        }
        if let Err(e) = self.gateway.mark_failed(request_id, &reason).await {
            warn!(request_id = request_id, error = %e, "On-chain mark-failed did not land");
        }
    }
}
