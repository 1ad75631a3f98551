//! Settlement orchestrator integration tests against mocked seams.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::Utc;
use treasury_spend_relayer::app::SettlementOrchestrator;
use treasury_spend_relayer::domain::{
    AppError, RequestStatus, SpendRequest, ValidationError,
};
use treasury_spend_relayer::test_utils::{MockChainGateway, MockMirrorStore, MockRailClient};

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
    request.approved_at = Some(Utc::now());
    request
}

struct Harness {
    store: Arc<MockMirrorStore>,
    gateway: Arc<MockChainGateway>,
    rail: Arc<MockRailClient>,
    orchestrator: SettlementOrchestrator,
}

fn harness(store: MockMirrorStore) -> Harness {
    let store = Arc::new(store);
    let gateway = Arc::new(MockChainGateway::new());
    let rail = Arc::new(MockRailClient::new());
    let orchestrator =
        SettlementOrchestrator::new(store.clone(), gateway.clone(), rail.clone());
    Harness {
        store,
        gateway,
        rail,
        orchestrator,
    }
}

#[tokio::test]
async fn test_settle_records_all_correlation_identifiers() {
    let h = harness(MockMirrorStore::new().with_request(approved_request(42)));

    h.orchestrator.settle(42).await.unwrap();

    let request = h.store.request(42).unwrap();
    assert_eq!(request.status, RequestStatus::Executed);
    assert!(request.rail_transfer_id.is_some());
    assert!(request.destination_mint_tx_hash.is_some());
    assert!(request.source_settlement_tx_hash.is_some());
    assert!(request.executed_at.is_some());
    assert!(request.failure_reason.is_none());

    assert_eq!(h.rail.submit_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.rail.mint_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.gateway.call_count("mark_executed"), 1);
}

#[tokio::test]
async fn test_settle_rejected_request_is_refused_without_side_effects() {
    let mut request = approved_request(7);
    request.status = RequestStatus::Rejected;
    let h = harness(MockMirrorStore::new().with_request(request));

    let result = h.orchestrator.settle(7).await;
    match result {
        Err(AppError::Validation(ValidationError::InvalidStatus { request_id, status })) => {
            assert_eq!(request_id, 7);
            assert_eq!(status, "rejected");
        }
        other => panic!("expected InvalidStatus, got {:?}", other),
    }

    // Status guard fires before any external call
    assert_eq!(h.rail.submit_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.rail.mint_calls.load(Ordering::SeqCst), 0);
    assert!(h.gateway.calls().is_empty());
    assert_eq!(h.store.request(7).unwrap().status, RequestStatus::Rejected);
}

#[tokio::test]
async fn test_settle_unknown_request_is_a_validation_error() {
    let h = harness(MockMirrorStore::new());

    let result = h.orchestrator.settle(404).await;
    assert!(matches!(result, Err(AppError::Validation(_))));
    assert_eq!(h.rail.submit_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_executing_request_is_re_admitted() {
    let mut request = approved_request(43);
    request.status = RequestStatus::Executing;
    let h = harness(MockMirrorStore::new().with_request(request));

    h.orchestrator.settle(43).await.unwrap();
    assert_eq!(h.store.request(43).unwrap().status, RequestStatus::Executed);
}

#[tokio::test]
async fn test_mint_failure_marks_failed_both_sides_and_reraises() {
    let h = harness(MockMirrorStore::new().with_request(approved_request(44)));
    h.rail.set_fail_mint(true);

    let result = h.orchestrator.settle(44).await;
    assert!(matches!(result, Err(AppError::Rail(_))));

    let request = h.store.request(44).unwrap();
    assert_eq!(request.status, RequestStatus::Failed);
    assert!(request.failure_reason.as_deref().unwrap().contains("mint"));

    assert_eq!(h.gateway.call_count("mark_failed"), 1);
    assert_eq!(h.gateway.call_count("mark_executed"), 0);
}

#[tokio::test]
async fn test_on_chain_mark_failed_failure_does_not_mask_original_error() {
    let h = harness(MockMirrorStore::new().with_request(approved_request(45)));
    h.rail.set_fail_submit(true);
    h.gateway.set_fail_writes(true);

    let result = h.orchestrator.settle(45).await;
    // The rail rejection is what reaches the caller, not the gateway error
    assert!(matches!(result, Err(AppError::Rail(_))));
    assert_eq!(h.store.request(45).unwrap().status, RequestStatus::Failed);
}
