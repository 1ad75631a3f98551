//! Typed domain events translated from the raw contract event stream.
//!
//! Ingestion is a pure translation layer: every variant carries the
//! block number, transaction hash and resolved block timestamp for
//! traceability, and is published on the internal event bus for the
//! lifecycle manager to consume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Traceability metadata attached to every domain event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventMeta {
    pub block_number: u64,
    pub tx_hash: String,
    /// Timestamp of the containing block
    pub timestamp: DateTime<Utc>,
}

/// Domain events emitted by the treasury policy contract
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TreasuryEvent {
    RequestSubmitted {
        meta: EventMeta,
        request_id: i64,
        account_id: i64,
        requester_address: String,
        amount: String,
        destination_chain_id: i64,
        destination_address: String,
        description: String,
    },
    RequestApproved {
        meta: EventMeta,
        request_id: i64,
        approver: String,
    },
    RequestRejected {
        meta: EventMeta,
        request_id: i64,
        reason: String,
    },
    /// Settlement completed, possibly by a different operator instance
    RequestExecuted {
        meta: EventMeta,
        request_id: i64,
        transfer_id: String,
    },
    RequestFailed {
        meta: EventMeta,
        request_id: i64,
        reason: String,
    },
    AccountCreated {
        meta: EventMeta,
        account_id: i64,
    },
    AccountUpdated {
        meta: EventMeta,
        account_id: i64,
    },
    AccountFrozen {
        meta: EventMeta,
        account_id: i64,
    },
    AccountUnfrozen {
        meta: EventMeta,
        account_id: i64,
    },
    AccountClosed {
        meta: EventMeta,
        account_id: i64,
    },
    InboundFunding {
        meta: EventMeta,
        account_id: i64,
        amount: String,
        source_tx: String,
    },
    AdminTransferred {
        meta: EventMeta,
        previous_admin: String,
        new_admin: String,
    },
    Paused {
        meta: EventMeta,
    },
    Unpaused {
        meta: EventMeta,
    },
}

impl TreasuryEvent {
    /// Wire-level event name as emitted by the contract
    pub fn name(&self) -> &'static str {
        match self {
            Self::RequestSubmitted { .. } => "spend.requested",
            Self::RequestApproved { .. } => "spend.approved",
            Self::RequestRejected { .. } => "spend.rejected",
            Self::RequestExecuted { .. } => "spend.executed",
            Self::RequestFailed { .. } => "spend.failed",
            Self::AccountCreated { .. } => "account.created",
            Self::AccountUpdated { .. } => "account.updated",
            Self::AccountFrozen { .. } => "account.frozen",
            Self::AccountUnfrozen { .. } => "account.unfrozen",
            Self::AccountClosed { .. } => "account.closed",
            Self::InboundFunding { .. } => "treasury.inbound_funding",
            Self::AdminTransferred { .. } => "treasury.admin_transferred",
            Self::Paused { .. } => "treasury.paused",
            Self::Unpaused { .. } => "treasury.unpaused",
        }
    }

    /// All wire-level event names, in subscription order
    pub const ALL_NAMES: [&'static str; 14] = [
        "spend.requested",
        "spend.approved",
        "spend.rejected",
        "spend.executed",
        "spend.failed",
        "account.created",
        "account.updated",
        "account.frozen",
        "account.unfrozen",
        "account.closed",
        "treasury.inbound_funding",
        "treasury.admin_transferred",
        "treasury.paused",
        "treasury.unpaused",
    ];

    pub fn meta(&self) -> &EventMeta {
        match self {
            Self::RequestSubmitted { meta, .. }
            | Self::RequestApproved { meta, .. }
            | Self::RequestRejected { meta, .. }
            | Self::RequestExecuted { meta, .. }
            | Self::RequestFailed { meta, .. }
            | Self::AccountCreated { meta, .. }
            | Self::AccountUpdated { meta, .. }
            | Self::AccountFrozen { meta, .. }
            | Self::AccountUnfrozen { meta, .. }
            | Self::AccountClosed { meta, .. }
            | Self::InboundFunding { meta, .. }
            | Self::AdminTransferred { meta, .. }
            | Self::Paused { meta }
            | Self::Unpaused { meta } => meta,
        }
    }
}
