//! Core domain types for the mirrored treasury state.
//!
//! Monetary amounts are arbitrary-precision on-chain integers and are
//! carried as decimal strings end to end; the relayer never does
//! arithmetic on them, so no numeric type is involved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a mirrored spend request.
///
/// ```text
/// PENDING_APPROVAL --approve--> APPROVED --dequeue--> EXECUTING --success--> EXECUTED*
/// PENDING_APPROVAL --reject-->  REJECTED*
/// EXECUTING --unrecoverable--> FAILED*
/// EXECUTING --retry--> EXECUTING
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Created on-chain, waiting for an approver
    #[default]
    PendingApproval,
    /// Approved, settlement job enqueued
    Approved,
    /// Settlement pipeline in flight (re-entrant on retry)
    Executing,
    /// Settled end to end; terminal
    Executed,
    /// Rejected by an approver; terminal
    Rejected,
    /// Settlement gave up; terminal
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::Executing => "executing",
            Self::Executed => "executed",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }

    /// Terminal states never transition again
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Rejected | Self::Failed)
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_approval" => Ok(Self::PendingApproval),
            "approved" => Ok(Self::Approved),
            "executing" => Ok(Self::Executing),
            "executed" => Ok(Self::Executed),
            "rejected" => Ok(Self::Rejected),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid request status: {}", s)),
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Mirrored copy of an on-chain budget account.
///
/// The mirror is a cache: rows are overwritten wholesale from
/// authoritative chain state, never mutated field by field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpendAccount {
    /// Stable on-chain account identifier (primary key)
    pub account_id: i64,
    pub owner: String,
    pub approver: String,
    pub label: String,
    pub budget_per_period: String,
    pub per_tx_limit: String,
    pub daily_limit: String,
    pub approval_threshold: String,
    pub period_spent: String,
    pub period_reserved: String,
    pub daily_spent: String,
    pub daily_reserved: String,
    pub period_start: DateTime<Utc>,
    pub daily_reset_at: DateTime<Utc>,
    pub frozen: bool,
    /// Closed accounts accept no further spend-counter mutation
    pub closed: bool,
    pub allowed_chains: Vec<i64>,
    pub auto_topup_threshold: Option<String>,
    pub auto_topup_amount: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Mirrored copy of an on-chain spend request plus settlement correlation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpendRequest {
    /// Surrogate identifier (UUID)
    pub id: String,
    /// Stable on-chain request identifier (unique, idempotency key)
    pub request_id: i64,
    pub account_id: i64,
    pub requester_address: String,
    pub amount: String,
    pub destination_chain_id: i64,
    pub destination_address: String,
    pub description: String,
    pub status: RequestStatus,
    pub requested_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    /// Transfer correlation id assigned by the settlement rail
    pub rail_transfer_id: Option<String>,
    /// Mint transaction hash on the destination chain
    pub destination_mint_tx_hash: Option<String>,
    /// mark-executed transaction hash on the source chain
    pub source_settlement_tx_hash: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SpendRequest {
    /// Build a fresh mirror row from the requested-event payload
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        request_id: i64,
        account_id: i64,
        requester_address: String,
        amount: String,
        destination_chain_id: i64,
        destination_address: String,
        description: String,
        requested_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request_id,
            account_id,
            requester_address,
            amount,
            destination_chain_id,
            destination_address,
            description,
            status: RequestStatus::PendingApproval,
            requested_at,
            approved_at: None,
            executed_at: None,
            rail_transfer_id: None,
            destination_mint_tx_hash: None,
            source_settlement_tx_hash: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Filter for request list queries
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub account_id: Option<i64>,
    pub status: Option<RequestStatus>,
    /// Clamped to 1..=100 by the store
    pub limit: Option<i64>,
}

/// Parameters for creating or updating an on-chain budget account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountParams {
    pub owner: String,
    pub approver: String,
    pub label: String,
    pub budget_per_period: String,
    pub per_tx_limit: String,
    pub daily_limit: String,
    pub approval_threshold: String,
    pub allowed_chains: Vec<i64>,
}

/// Parameters for submitting a new spend request on-chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSpendRequest {
    pub account_id: i64,
    pub amount: String,
    pub destination_chain_id: i64,
    pub destination_address: String,
    pub description: String,
}

/// Authoritative status of a request as reported by the contract
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChainRequestStatus {
    Pending,
    Approved,
    Executed,
    Rejected,
    Failed,
}

/// Snapshot of on-chain request state returned by the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainRequestState {
    pub request_id: i64,
    pub account_id: i64,
    pub requester_address: String,
    pub amount: String,
    pub destination_chain_id: i64,
    pub destination_address: String,
    pub description: String,
    pub status: ChainRequestStatus,
    /// Rail transfer id recorded by mark-executed, if any
    pub transfer_id: Option<String>,
    pub requested_at: DateTime<Utc>,
}

/// Snapshot of on-chain account state returned by the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainAccountState {
    pub account_id: i64,
    pub owner: String,
    pub approver: String,
    pub label: String,
    pub budget_per_period: String,
    pub per_tx_limit: String,
    pub daily_limit: String,
    pub approval_threshold: String,
    pub period_spent: String,
    pub period_reserved: String,
    pub daily_spent: String,
    pub daily_reserved: String,
    pub period_start: DateTime<Utc>,
    pub daily_reset_at: DateTime<Utc>,
    pub frozen: bool,
    pub closed: bool,
    pub allowed_chains: Vec<i64>,
    pub auto_topup_threshold: Option<String>,
    pub auto_topup_amount: Option<String>,
}

impl ChainAccountState {
    /// Map authoritative chain state onto a mirror row.
    /// `created_at` is preserved from an existing row when present.
    #[must_use]
    pub fn into_mirror(self, created_at: Option<DateTime<Utc>>) -> SpendAccount {
        let now = Utc::now();
        SpendAccount {
            account_id: self.account_id,
            owner: self.owner,
            approver: self.approver,
            label: self.label,
            budget_per_period: self.budget_per_period,
            per_tx_limit: self.per_tx_limit,
            daily_limit: self.daily_limit,
            approval_threshold: self.approval_threshold,
            period_spent: self.period_spent,
            period_reserved: self.period_reserved,
            daily_spent: self.daily_spent,
            daily_reserved: self.daily_reserved,
            period_start: self.period_start,
            daily_reset_at: self.daily_reset_at,
            frozen: self.frozen,
            closed: self.closed,
            allowed_chains: self.allowed_chains,
            auto_topup_threshold: self.auto_topup_threshold,
            auto_topup_amount: self.auto_topup_amount,
            created_at: created_at.unwrap_or(now),
            updated_at: now,
        }
    }
}

/// Outcome of an included chain write
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxOutcome {
    pub tx_hash: String,
    pub block_number: u64,
}

/// Attestation pair returned by the settlement rail for a signed intent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RailAttestation {
    /// Rail-assigned transfer correlation id
    pub transfer_id: String,
    /// Opaque attestation payload authorizing the destination mint
    pub attestation: String,
    /// Rail signature over the attestation
    pub signature: String,
}

/// Alert categories raised by the lifecycle manager
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    AccountFrozen,
    AccountClosed,
    AdminTransferred,
    ContractPaused,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccountFrozen => "account_frozen",
            Self::AccountClosed => "account_closed",
            Self::AdminTransferred => "admin_transferred",
            Self::ContractPaused => "contract_paused",
        }
    }
}

/// Alert severity levels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// Health status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Some systems degraded but functional
    Degraded,
    /// Critical systems unavailable
    Unhealthy,
}

/// Aggregated dependency health report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub database: HealthStatus,
    pub chain: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

impl HealthReport {
    #[must_use]
    pub fn new(database: HealthStatus, chain: HealthStatus) -> Self {
        let status = match (&database, &chain) {
            (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        };
        Self {
            status,
            database,
            chain,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_request_status_display_and_parsing() {
        let statuses = vec![
            (RequestStatus::PendingApproval, "pending_approval"),
            (RequestStatus::Approved, "approved"),
            (RequestStatus::Executing, "executing"),
            (RequestStatus::Executed, "executed"),
            (RequestStatus::Rejected, "rejected"),
            (RequestStatus::Failed, "failed"),
        ];

        for (status, string) in statuses {
            assert_eq!(status.as_str(), string);
            assert_eq!(status.to_string(), string);
            assert_eq!(RequestStatus::from_str(string).unwrap(), status);
        }

        assert!(RequestStatus::from_str("invalid").is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(RequestStatus::Executed.is_terminal());
        assert!(RequestStatus::Rejected.is_terminal());
        assert!(RequestStatus::Failed.is_terminal());
        assert!(!RequestStatus::PendingApproval.is_terminal());
        assert!(!RequestStatus::Approved.is_terminal());
        assert!(!RequestStatus::Executing.is_terminal());
    }

    #[test]
    fn test_new_request_defaults() {
        let req = SpendRequest::new(
            42,
            7,
            "owner_abc".to_string(),
            "2500000".to_string(),
            8453,
            "dest_xyz".to_string(),
            "infra invoice".to_string(),
            Utc::now(),
        );

        assert_eq!(req.status, RequestStatus::PendingApproval);
        assert_eq!(req.request_id, 42);
        assert!(req.approved_at.is_none());
        assert!(req.rail_transfer_id.is_none());
        assert!(req.destination_mint_tx_hash.is_none());
        assert!(req.source_settlement_tx_hash.is_none());
        assert!(req.failure_reason.is_none());
    }

    #[test]
    fn test_health_report_aggregation() {
        let report = HealthReport::new(HealthStatus::Healthy, HealthStatus::Healthy);
        assert_eq!(report.status, HealthStatus::Healthy);

        let report = HealthReport::new(HealthStatus::Healthy, HealthStatus::Unhealthy);
        assert_eq!(report.status, HealthStatus::Unhealthy);

        let report = HealthReport::new(HealthStatus::Degraded, HealthStatus::Healthy);
        assert_eq!(report.status, HealthStatus::Degraded);
    }

    #[test]
    fn test_chain_state_into_mirror_preserves_created_at() {
        let created = Utc::now() - chrono::Duration::days(3);
        let state = ChainAccountState {
            account_id: 1,
            owner: "owner".into(),
            approver: "approver".into(),
            label: "ops".into(),
            budget_per_period: "1000000000".into(),
            per_tx_limit: "50000000".into(),
            daily_limit: "200000000".into(),
            approval_threshold: "10000000".into(),
            period_spent: "0".into(),
            period_reserved: "0".into(),
            daily_spent: "0".into(),
            daily_reserved: "0".into(),
            period_start: Utc::now(),
            daily_reset_at: Utc::now(),
            frozen: true,
            closed: false,
            allowed_chains: vec![1, 8453],
            auto_topup_threshold: None,
            auto_topup_amount: None,
        };

        let mirror = state.into_mirror(Some(created));
        assert_eq!(mirror.created_at, created);
        assert!(mirror.frozen);
        assert_eq!(mirror.allowed_chains, vec![1, 8453]);
    }
}
