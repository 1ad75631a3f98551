//! In-memory mock implementations of the domain traits.
//!
//! The store and gateway mocks hold real state so tests can assert on
//! resulting rows, not just call counts; failure toggles simulate the
//! unhappy paths.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::domain::{
    AccountParams, AlertKind, AlertSeverity, AlertSink, AppError, ChainAccountState, ChainGateway,
    ChainRequestState, DatabaseError, JobQueue, MirrorStore, NewSpendRequest, RailAttestation,
    RailClient, RailError, RequestFilter, RequestStatus, SpendAccount, SpendRequest, TxOutcome,
};

/// In-memory mirror store keyed by on-chain request/account id
#[derive(Default)]
pub struct MockMirrorStore {
    pub accounts: Mutex<HashMap<i64, SpendAccount>>,
    pub requests: Mutex<HashMap<i64, SpendRequest>>,
    pub healthy: AtomicBool,
    /// When set, every mutation fails with a query error
    pub fail_writes: AtomicBool,
}

impl MockMirrorStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub fn with_request(self, request: SpendRequest) -> Self {
        self.requests
            .lock()
            .unwrap()
            .insert(request.request_id, request);
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn request(&self, request_id: i64) -> Option<SpendRequest> {
        self.requests.lock().unwrap().get(&request_id).cloned()
    }

    fn check_writes(&self) -> Result<(), AppError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Database(DatabaseError::Query(
                "mock write failure".to_string(),
            )));
        }
        Ok(())
    }

    fn update<F>(&self, request_id: i64, f: F) -> Result<(), AppError>
    where
        F: FnOnce(&mut SpendRequest),
    {
        self.check_writes()?;
        let mut requests = self.requests.lock().unwrap();
        let request = requests.get_mut(&request_id).ok_or_else(|| {
            AppError::Database(DatabaseError::NotFound(format!("request {}", request_id)))
        })?;
        f(request);
        request.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl MirrorStore for MockMirrorStore {
    async fn health_check(&self) -> Result<(), AppError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::Database(DatabaseError::Connection(
                "mock unhealthy".to_string(),
            )))
        }
    }

    async fn upsert_account(&self, account: &SpendAccount) -> Result<(), AppError> {
        self.check_writes()?;
        self.accounts
            .lock()
            .unwrap()
            .insert(account.account_id, account.clone());
        Ok(())
    }

    async fn get_account(&self, account_id: i64) -> Result<Option<SpendAccount>, AppError> {
        Ok(self.accounts.lock().unwrap().get(&account_id).cloned())
    }

    async fn insert_request(&self, request: &SpendRequest) -> Result<bool, AppError> {
        self.check_writes()?;
        let mut requests = self.requests.lock().unwrap();
        if requests.contains_key(&request.request_id) {
            return Ok(false);
        }
        requests.insert(request.request_id, request.clone());
        Ok(true)
    }

    async fn get_request(&self, request_id: i64) -> Result<Option<SpendRequest>, AppError> {
        Ok(self.request(request_id))
    }

    async fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<SpendRequest>, AppError> {
        let limit = filter.limit.unwrap_or(50).clamp(1, 100) as usize;
        let mut requests: Vec<SpendRequest> = self
            .requests
            .lock()
            .unwrap()
            .values()
            .filter(|r| filter.account_id.is_none_or(|id| r.account_id == id))
            .filter(|r| filter.status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        requests.truncate(limit);
        Ok(requests)
    }

    async fn mark_request_approved(
        &self,
        request_id: i64,
        approved_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.update(request_id, |r| {
            r.status = RequestStatus::Approved;
            r.approved_at = Some(approved_at);
        })
    }

    async fn mark_request_executing(&self, request_id: i64) -> Result<(), AppError> {
        self.update(request_id, |r| r.status = RequestStatus::Executing)
    }

    async fn mark_request_executed(
        &self,
        request_id: i64,
        rail_transfer_id: Option<&str>,
        mint_tx_hash: Option<&str>,
        settlement_tx_hash: Option<&str>,
        executed_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let rail_transfer_id = rail_transfer_id.map(str::to_string);
        let mint_tx_hash = mint_tx_hash.map(str::to_string);
        let settlement_tx_hash = settlement_tx_hash.map(str::to_string);
        self.update(request_id, |r| {
            r.status = RequestStatus::Executed;
            if rail_transfer_id.is_some() {
                r.rail_transfer_id = rail_transfer_id;
            }
            if mint_tx_hash.is_some() {
                r.destination_mint_tx_hash = mint_tx_hash;
            }
            if settlement_tx_hash.is_some() {
                r.source_settlement_tx_hash = settlement_tx_hash;
            }
            r.executed_at = Some(executed_at);
        })
    }

    async fn mark_request_rejected(&self, request_id: i64, reason: &str) -> Result<(), AppError> {
        let reason = reason.to_string();
        self.update(request_id, |r| {
            r.status = RequestStatus::Rejected;
            r.failure_reason = Some(reason);
        })
    }

    async fn mark_request_failed(&self, request_id: i64, reason: &str) -> Result<(), AppError> {
        let reason = reason.to_string();
        self.update(request_id, |r| {
            r.status = RequestStatus::Failed;
            r.failure_reason = Some(reason);
        })
    }

    async fn find_stuck_requests(
        &self,
        idle_for_secs: i64,
        limit: i64,
    ) -> Result<Vec<SpendRequest>, AppError> {
        let cutoff = Utc::now() - Duration::seconds(idle_for_secs);
        let mut stuck: Vec<SpendRequest> = self
            .requests
            .lock()
            .unwrap()
            .values()
            .filter(|r| {
                matches!(
                    r.status,
                    RequestStatus::Approved | RequestStatus::Executing
                ) && r.updated_at < cutoff
            })
            .cloned()
            .collect();
        stuck.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        stuck.truncate(limit.clamp(1, 100) as usize);
        Ok(stuck)
    }
}

/// Mock chain gateway with scripted reads and recorded writes
#[derive(Default)]
pub struct MockChainGateway {
    pub accounts: Mutex<HashMap<i64, ChainAccountState>>,
    pub requests: Mutex<HashMap<i64, ChainRequestState>>,
    pub calls: Mutex<Vec<String>>,
    pub healthy: AtomicBool,
    /// When set, operator and admin writes fail
    pub fail_writes: AtomicBool,
    next_id: AtomicI64,
}

impl MockChainGateway {
    #[must_use]
    pub fn new() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            next_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    pub fn with_chain_request(self, state: ChainRequestState) -> Self {
        self.requests.lock().unwrap().insert(state.request_id, state);
        self
    }

    pub fn with_chain_account(self, state: ChainAccountState) -> Self {
        self.accounts.lock().unwrap().insert(state.account_id, state);
        self
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Count of recorded calls to the given method
    #[must_use]
    pub fn call_count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(method))
            .count()
    }

    fn write(&self, call: String) -> Result<TxOutcome, AppError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Chain(crate::domain::ChainError::Network(
                "mock write failure".to_string(),
            )));
        }
        let tx_hash = format!("tx_{}", self.calls.lock().unwrap().len());
        self.calls.lock().unwrap().push(call);
        Ok(TxOutcome {
            tx_hash,
            block_number: 1,
        })
    }
}

#[async_trait]
impl ChainGateway for MockChainGateway {
    async fn health_check(&self) -> Result<(), AppError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::Chain(crate::domain::ChainError::Network(
                "mock unhealthy".to_string(),
            )))
        }
    }

    async fn get_account(&self, account_id: i64) -> Result<Option<ChainAccountState>, AppError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("get_account:{}", account_id));
        Ok(self.accounts.lock().unwrap().get(&account_id).cloned())
    }

    async fn get_request(&self, request_id: i64) -> Result<Option<ChainRequestState>, AppError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("get_request:{}", request_id));
        Ok(self.requests.lock().unwrap().get(&request_id).cloned())
    }

    async fn get_block_timestamp(&self, block_number: u64) -> Result<DateTime<Utc>, AppError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("get_block_timestamp:{}", block_number));
        Ok(Utc::now())
    }

    async fn mark_executed(
        &self,
        request_id: i64,
        transfer_id: &str,
    ) -> Result<TxOutcome, AppError> {
        self.write(format!("mark_executed:{}:{}", request_id, transfer_id))
    }

    async fn mark_failed(&self, request_id: i64, reason: &str) -> Result<TxOutcome, AppError> {
        self.write(format!("mark_failed:{}:{}", request_id, reason))
    }

    async fn record_inbound_funding(
        &self,
        account_id: i64,
        amount: &str,
        source_tx: &str,
    ) -> Result<TxOutcome, AppError> {
        self.write(format!(
            "record_inbound_funding:{}:{}:{}",
            account_id, amount, source_tx
        ))
    }

    async fn create_account(&self, params: &AccountParams) -> Result<i64, AppError> {
        self.write(format!("create_account:{}", params.label))?;
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn update_account(
        &self,
        account_id: i64,
        _params: &AccountParams,
    ) -> Result<TxOutcome, AppError> {
        self.write(format!("update_account:{}", account_id))
    }

    async fn freeze_account(&self, account_id: i64) -> Result<TxOutcome, AppError> {
        self.write(format!("freeze_account:{}", account_id))
    }

    async fn unfreeze_account(&self, account_id: i64) -> Result<TxOutcome, AppError> {
        self.write(format!("unfreeze_account:{}", account_id))
    }

    async fn close_account(&self, account_id: i64) -> Result<TxOutcome, AppError> {
        self.write(format!("close_account:{}", account_id))
    }

    async fn set_allowed_chains(
        &self,
        account_id: i64,
        chains: &[i64],
    ) -> Result<TxOutcome, AppError> {
        self.write(format!("set_allowed_chains:{}:{:?}", account_id, chains))
    }

    async fn configure_auto_topup(
        &self,
        account_id: i64,
        threshold: &str,
        amount: &str,
    ) -> Result<TxOutcome, AppError> {
        self.write(format!(
            "configure_auto_topup:{}:{}:{}",
            account_id, threshold, amount
        ))
    }

    async fn execute_auto_topup(&self, account_id: i64) -> Result<TxOutcome, AppError> {
        self.write(format!("execute_auto_topup:{}", account_id))
    }

    async fn sweep(&self, destination: &str) -> Result<TxOutcome, AppError> {
        self.write(format!("sweep:{}", destination))
    }

    async fn reset_period(&self, account_id: i64) -> Result<TxOutcome, AppError> {
        self.write(format!("reset_period:{}", account_id))
    }

    async fn submit_request(&self, request: &NewSpendRequest) -> Result<i64, AppError> {
        self.write(format!("submit_request:{}", request.account_id))?;
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn approve_request(&self, request_id: i64) -> Result<TxOutcome, AppError> {
        self.write(format!("approve_request:{}", request_id))
    }

    async fn reject_request(&self, request_id: i64, reason: &str) -> Result<TxOutcome, AppError> {
        self.write(format!("reject_request:{}:{}", request_id, reason))
    }

    async fn pause(&self) -> Result<TxOutcome, AppError> {
        self.write("pause".to_string())
    }

    async fn unpause(&self) -> Result<TxOutcome, AppError> {
        self.write("unpause".to_string())
    }

    async fn transfer_admin(&self, new_admin: &str) -> Result<TxOutcome, AppError> {
        self.write(format!("transfer_admin:{}", new_admin))
    }
}

/// Mock rail client with call counters and failure toggles
#[derive(Default)]
pub struct MockRailClient {
    pub submit_calls: AtomicU32,
    pub mint_calls: AtomicU32,
    pub fail_submit: AtomicBool,
    pub fail_mint: AtomicBool,
}

impl MockRailClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_submit(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_mint(&self, fail: bool) {
        self.fail_mint.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RailClient for MockRailClient {
    async fn submit_burn_intent(
        &self,
        _amount: &str,
        destination_chain_id: i64,
        _destination_address: &str,
    ) -> Result<RailAttestation, AppError> {
        let n = self.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(AppError::Rail(RailError::Rejected(
                "mock intent rejection".to_string(),
            )));
        }
        Ok(RailAttestation {
            transfer_id: format!("transfer_{}_{}", destination_chain_id, n),
            attestation: "mock_attestation".to_string(),
            signature: "mock_signature".to_string(),
        })
    }

    async fn mint_with_attestation(
        &self,
        destination_chain_id: i64,
        attestation: &RailAttestation,
    ) -> Result<String, AppError> {
        self.mint_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_mint.load(Ordering::SeqCst) {
            return Err(AppError::Rail(RailError::Mint(
                "mock mint failure".to_string(),
            )));
        }
        Ok(format!(
            "mint_{}_{}",
            destination_chain_id, attestation.transfer_id
        ))
    }
}

/// Mock job queue recording enqueues, deduplicated like the real one
#[derive(Default)]
pub struct MockJobQueue {
    pub enqueued: Mutex<Vec<i64>>,
}

impl MockJobQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn enqueued(&self) -> Vec<i64> {
        self.enqueued.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobQueue for MockJobQueue {
    async fn enqueue_settlement(&self, request_id: i64) -> Result<bool, AppError> {
        let mut enqueued = self.enqueued.lock().unwrap();
        if enqueued.contains(&request_id) {
            return Ok(false);
        }
        enqueued.push(request_id);
        Ok(true)
    }
}

/// Recorded alert
#[derive(Debug, Clone)]
pub struct RecordedAlert {
    pub kind: AlertKind,
    pub message: String,
    pub severity: AlertSeverity,
    pub related_account_id: Option<i64>,
    pub metadata: Option<serde_json::Value>,
}

/// Mock alert sink recording every alert raised
#[derive(Default)]
pub struct MockAlertSink {
    pub alerts: Mutex<Vec<RecordedAlert>>,
}

impl MockAlertSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn alerts(&self) -> Vec<RecordedAlert> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertSink for MockAlertSink {
    async fn create_alert(
        &self,
        kind: AlertKind,
        message: &str,
        severity: AlertSeverity,
        related_account_id: Option<i64>,
        metadata: Option<serde_json::Value>,
    ) {
        self.alerts.lock().unwrap().push(RecordedAlert {
            kind,
            message: message.to_string(),
            severity,
            related_account_id,
            metadata,
        });
    }
}
