//! Lifecycle manager integration tests against mocked seams.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use treasury_spend_relayer::app::{LifecycleConfig, RequestLifecycleManager};
use treasury_spend_relayer::domain::{
    AlertKind, AlertSeverity, ChainAccountState, EventMeta, RequestStatus, TreasuryEvent,
};
use treasury_spend_relayer::test_utils::{
    MockAlertSink, MockChainGateway, MockJobQueue, MockMirrorStore,
};

fn meta() -> EventMeta {
    EventMeta {
        block_number: 100,
        tx_hash: "tx_abc".to_string(),
        timestamp: Utc::now(),
    }
}

fn requested_event(request_id: i64) -> TreasuryEvent {
    TreasuryEvent::RequestSubmitted {
        meta: meta(),
        request_id,
        account_id: 7,
        requester_address: "requester_1".to_string(),
        amount: "2500000".to_string(),
        destination_chain_id: 8453,
        destination_address: "dest_addr".to_string(),
        description: "infra invoice".to_string(),
    }
}

fn chain_account(account_id: i64) -> ChainAccountState {
    ChainAccountState {
        account_id,
        owner: "owner_1".to_string(),
        approver: "approver_1".to_string(),
        label: "ops".to_string(),
        budget_per_period: "1000000000".to_string(),
        per_tx_limit: "50000000".to_string(),
        daily_limit: "200000000".to_string(),
        approval_threshold: "10000000".to_string(),
        period_spent: "0".to_string(),
        period_reserved: "0".to_string(),
        daily_spent: "0".to_string(),
        daily_reserved: "0".to_string(),
        period_start: Utc::now(),
        daily_reset_at: Utc::now(),
        frozen: false,
        closed: false,
        allowed_chains: vec![1, 8453],
        auto_topup_threshold: None,
        auto_topup_amount: None,
    }
}

struct Harness {
    store: Arc<MockMirrorStore>,
    gateway: Arc<MockChainGateway>,
    queue: Arc<MockJobQueue>,
    alerts: Arc<MockAlertSink>,
    manager: RequestLifecycleManager,
}

fn harness(store: MockMirrorStore, gateway: MockChainGateway) -> Harness {
    let store = Arc::new(store);
    let gateway = Arc::new(gateway);
    let queue = Arc::new(MockJobQueue::new());
    let alerts = Arc::new(MockAlertSink::new());
    // Short poll budget keeps the unknown-approval path fast in tests
    let config = LifecycleConfig {
        wait_poll_interval: Duration::from_millis(5),
        wait_max_attempts: 3,
    };
    let manager = RequestLifecycleManager::new(
        store.clone(),
        gateway.clone(),
        queue.clone(),
        alerts.clone(),
        config,
    );
    Harness {
        store,
        gateway,
        queue,
        alerts,
        manager,
    }
}

#[tokio::test]
async fn test_requested_event_inserts_exactly_once() {
    let h = harness(MockMirrorStore::new(), MockChainGateway::new());

    h.manager.handle_event(requested_event(42)).await.unwrap();
    // Replayed event is a no-op
    h.manager.handle_event(requested_event(42)).await.unwrap();

    let request = h.store.request(42).unwrap();
    assert_eq!(request.status, RequestStatus::PendingApproval);
    assert_eq!(h.store.requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_approval_stamps_and_enqueues_once() {
    let h = harness(MockMirrorStore::new(), MockChainGateway::new());
    h.manager.handle_event(requested_event(42)).await.unwrap();

    let approved = TreasuryEvent::RequestApproved {
        meta: meta(),
        request_id: 42,
        approver: "approver_1".to_string(),
    };
    h.manager.handle_event(approved.clone()).await.unwrap();

    let request = h.store.request(42).unwrap();
    assert_eq!(request.status, RequestStatus::Approved);
    assert!(request.approved_at.is_some());
    assert_eq!(h.queue.enqueued(), vec![42]);

    // A replayed approval finds the request past pending and skips
    h.manager.handle_event(approved).await.unwrap();
    assert_eq!(h.queue.enqueued(), vec![42]);
}

#[tokio::test]
async fn test_approval_for_unknown_request_is_dropped() {
    let h = harness(MockMirrorStore::new(), MockChainGateway::new());

    let approved = TreasuryEvent::RequestApproved {
        meta: meta(),
        request_id: 42,
        approver: "approver_1".to_string(),
    };
    // No error, no row, nothing enqueued
    h.manager.handle_event(approved).await.unwrap();
    assert!(h.store.request(42).is_none());
    assert!(h.queue.enqueued().is_empty());
}

#[tokio::test]
async fn test_rejected_event_writes_terminal_state() {
    let h = harness(MockMirrorStore::new(), MockChainGateway::new());
    h.manager.handle_event(requested_event(42)).await.unwrap();

    h.manager
        .handle_event(TreasuryEvent::RequestRejected {
            meta: meta(),
            request_id: 42,
            reason: "over budget".to_string(),
        })
        .await
        .unwrap();

    let request = h.store.request(42).unwrap();
    assert_eq!(request.status, RequestStatus::Rejected);
    assert_eq!(request.failure_reason.as_deref(), Some("over budget"));
}

#[tokio::test]
async fn test_executed_event_from_another_operator_corrects_mirror() {
    let h = harness(MockMirrorStore::new(), MockChainGateway::new());
    h.manager.handle_event(requested_event(42)).await.unwrap();

    h.manager
        .handle_event(TreasuryEvent::RequestExecuted {
            meta: meta(),
            request_id: 42,
            transfer_id: "transfer_xyz".to_string(),
        })
        .await
        .unwrap();

    let request = h.store.request(42).unwrap();
    assert_eq!(request.status, RequestStatus::Executed);
    assert_eq!(request.rail_transfer_id.as_deref(), Some("transfer_xyz"));
    // The event carries the settlement tx but no mint hash
    assert_eq!(request.source_settlement_tx_hash.as_deref(), Some("tx_abc"));
    assert!(request.destination_mint_tx_hash.is_none());
}

#[tokio::test]
async fn test_account_frozen_reconciles_and_alerts() {
    let mut state = chain_account(7);
    state.frozen = true;
    let h = harness(
        MockMirrorStore::new(),
        MockChainGateway::new().with_chain_account(state),
    );

    h.manager
        .handle_event(TreasuryEvent::AccountFrozen {
            meta: meta(),
            account_id: 7,
        })
        .await
        .unwrap();

    let account = h.store.accounts.lock().unwrap().get(&7).cloned().unwrap();
    assert!(account.frozen);

    let alerts = h.alerts.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::AccountFrozen);
    assert_eq!(alerts[0].severity, AlertSeverity::Warning);
    assert_eq!(alerts[0].related_account_id, Some(7));
}

#[tokio::test]
async fn test_account_event_for_unknown_chain_account_is_skipped() {
    let h = harness(MockMirrorStore::new(), MockChainGateway::new());

    h.manager
        .handle_event(TreasuryEvent::AccountUpdated {
            meta: meta(),
            account_id: 99,
        })
        .await
        .unwrap();

    assert!(h.store.accounts.lock().unwrap().is_empty());
    assert_eq!(h.gateway.call_count("get_account"), 1);
}

#[tokio::test]
async fn test_admin_transfer_raises_critical_alert() {
    let h = harness(MockMirrorStore::new(), MockChainGateway::new());

    h.manager
        .handle_event(TreasuryEvent::AdminTransferred {
            meta: meta(),
            previous_admin: "admin_old".to_string(),
            new_admin: "admin_new".to_string(),
        })
        .await
        .unwrap();

    let alerts = h.alerts.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::AdminTransferred);
    assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    let metadata = alerts[0].metadata.clone().unwrap();
    assert_eq!(metadata["new_admin"], "admin_new");
}

#[tokio::test]
async fn test_reconcile_preserves_created_at_on_existing_rows() {
    let h = harness(
        MockMirrorStore::new(),
        MockChainGateway::new().with_chain_account(chain_account(7)),
    );

    h.manager.reconcile_account(7).await.unwrap();
    let first = h.store.accounts.lock().unwrap().get(&7).cloned().unwrap();

    h.manager.reconcile_account(7).await.unwrap();
    let second = h.store.accounts.lock().unwrap().get(&7).cloned().unwrap();

    assert_eq!(first.created_at, second.created_at);
}
