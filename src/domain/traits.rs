//! Domain traits defining contracts for external systems.
//!
//! The mirror store, chain gateway, rail client, job queue and alert
//! sink are all injected through these seams so the application layer
//! can be tested against mocks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::AppError;
use super::types::{
    AccountParams, ChainAccountState, ChainRequestState, NewSpendRequest, RailAttestation,
    RequestFilter, SpendAccount, SpendRequest, TxOutcome,
};
use super::{AlertKind, AlertSeverity};

/// Persisted mirror of on-chain account and request state.
///
/// Every mutation is a single-row update scoped by `request_id` or
/// `account_id`; the store never holds cross-entity invariants.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// Check store connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Overwrite (or create) the mirror row for an account
    async fn upsert_account(&self, account: &SpendAccount) -> Result<(), AppError>;

    async fn get_account(&self, account_id: i64) -> Result<Option<SpendAccount>, AppError>;

    /// Idempotent insert keyed by `request_id`.
    /// Returns `false` without touching the row if one already exists.
    async fn insert_request(&self, request: &SpendRequest) -> Result<bool, AppError>;

    async fn get_request(&self, request_id: i64) -> Result<Option<SpendRequest>, AppError>;

    async fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<SpendRequest>, AppError>;

    async fn mark_request_approved(
        &self,
        request_id: i64,
        approved_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn mark_request_executing(&self, request_id: i64) -> Result<(), AppError>;

    /// Record terminal success with the settlement correlation fields.
    /// Every correlation field keeps its existing value when `None`
    /// (the executed event from another operator may omit any of them).
    async fn mark_request_executed(
        &self,
        request_id: i64,
        rail_transfer_id: Option<&str>,
        mint_tx_hash: Option<&str>,
        settlement_tx_hash: Option<&str>,
        executed_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn mark_request_rejected(&self, request_id: i64, reason: &str) -> Result<(), AppError>;

    async fn mark_request_failed(&self, request_id: i64, reason: &str) -> Result<(), AppError>;

    /// Requests stranded in APPROVED or EXECUTING whose last update is
    /// older than `idle_for_secs`, oldest first. APPROVED rows qualify
    /// because a settlement job can be lost before its first status
    /// stamp lands.
    async fn find_stuck_requests(
        &self,
        idle_for_secs: i64,
        limit: i64,
    ) -> Result<Vec<SpendRequest>, AppError>;
}

/// Read and write access to the on-chain treasury policy contract.
///
/// Writes are signed with one of two distinct identities: operator
/// (backend-triggered settlement bookkeeping) or admin (privileged
/// account and lifecycle management). Implementations wrap every call
/// in the resilient RPC caller; write failures propagate unchanged.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// Check chain RPC connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    // --- snapshot reads ---

    async fn get_account(&self, account_id: i64) -> Result<Option<ChainAccountState>, AppError>;

    async fn get_request(&self, request_id: i64) -> Result<Option<ChainRequestState>, AppError>;

    /// Timestamp of a block, used by ingestion to stamp domain events
    async fn get_block_timestamp(&self, block_number: u64) -> Result<DateTime<Utc>, AppError>;

    // --- operator-signed writes ---

    /// Record settlement completion, keyed by the rail transfer id
    async fn mark_executed(&self, request_id: i64, transfer_id: &str)
    -> Result<TxOutcome, AppError>;

    async fn mark_failed(&self, request_id: i64, reason: &str) -> Result<TxOutcome, AppError>;

    async fn record_inbound_funding(
        &self,
        account_id: i64,
        amount: &str,
        source_tx: &str,
    ) -> Result<TxOutcome, AppError>;

    // --- admin-signed writes ---

    /// Returns the new account id decoded from the emitted event,
    /// or the sentinel `0` if the event was absent
    async fn create_account(&self, params: &AccountParams) -> Result<i64, AppError>;

    async fn update_account(
        &self,
        account_id: i64,
        params: &AccountParams,
    ) -> Result<TxOutcome, AppError>;

    async fn freeze_account(&self, account_id: i64) -> Result<TxOutcome, AppError>;

    async fn unfreeze_account(&self, account_id: i64) -> Result<TxOutcome, AppError>;

    async fn close_account(&self, account_id: i64) -> Result<TxOutcome, AppError>;

    async fn set_allowed_chains(
        &self,
        account_id: i64,
        chains: &[i64],
    ) -> Result<TxOutcome, AppError>;

    async fn configure_auto_topup(
        &self,
        account_id: i64,
        threshold: &str,
        amount: &str,
    ) -> Result<TxOutcome, AppError>;

    async fn execute_auto_topup(&self, account_id: i64) -> Result<TxOutcome, AppError>;

    async fn sweep(&self, destination: &str) -> Result<TxOutcome, AppError>;

    async fn reset_period(&self, account_id: i64) -> Result<TxOutcome, AppError>;

    /// Returns the new request id decoded from the emitted event,
    /// or the sentinel `0` if the event was absent
    async fn submit_request(&self, request: &NewSpendRequest) -> Result<i64, AppError>;

    async fn approve_request(&self, request_id: i64) -> Result<TxOutcome, AppError>;

    async fn reject_request(&self, request_id: i64, reason: &str) -> Result<TxOutcome, AppError>;

    async fn pause(&self) -> Result<TxOutcome, AppError>;

    async fn unpause(&self) -> Result<TxOutcome, AppError>;

    async fn transfer_admin(&self, new_admin: &str) -> Result<TxOutcome, AppError>;
}

/// Settlement rail client: signed burn intents in, attestations out,
/// plus destination-chain minting through per-chain provider/wallet
/// pairs registered at startup.
#[async_trait]
pub trait RailClient: Send + Sync {
    /// Build, sign and submit a burn intent for one request's transfer.
    /// Returns the rail's attestation pair.
    async fn submit_burn_intent(
        &self,
        amount: &str,
        destination_chain_id: i64,
        destination_address: &str,
    ) -> Result<RailAttestation, AppError>;

    /// Invoke the fixed mint entry point on the destination chain's
    /// rail-minter contract. Returns the destination transaction hash.
    /// An unconfigured destination chain is fatal and never retried.
    async fn mint_with_attestation(
        &self,
        destination_chain_id: i64,
        attestation: &RailAttestation,
    ) -> Result<String, AppError>;
}

/// Durable settlement job queue, deduplicated by request id.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue one settlement job for the request. Returns `false`
    /// if a job for this request id is already queued or in flight.
    async fn enqueue_settlement(&self, request_id: i64) -> Result<bool, AppError>;
}

/// Fire-and-forget alerting collaborator. Delivery, storage and
/// acknowledgement live outside this core.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn create_alert(
        &self,
        kind: AlertKind,
        message: &str,
        severity: AlertSeverity,
        related_account_id: Option<i64>,
        metadata: Option<serde_json::Value>,
    );
}
