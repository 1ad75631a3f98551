//! Stuck-request sweeper integration tests against mocked seams.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use treasury_spend_relayer::app::{SettlementOrchestrator, StuckRequestSweeper, SweeperConfig};
use treasury_spend_relayer::domain::{
    ChainRequestState, ChainRequestStatus, RequestStatus, SpendRequest,
};
use treasury_spend_relayer::test_utils::{MockChainGateway, MockMirrorStore, MockRailClient};

/// An EXECUTING request last touched `idle_hours` ago, requested
/// `age_hours` ago
fn stuck_request(request_id: i64, age_hours: i64, idle_hours: i64) -> SpendRequest {
    let mut request = SpendRequest::new(
        request_id,
        7,
        "requester_1".to_string(),
        "2500000".to_string(),
        8453,
        "dest_addr".to_string(),
        "infra invoice".to_string(),
        Utc::now() - chrono::Duration::hours(age_hours),
    );
    request.status = RequestStatus::Executing;
    request.updated_at = Utc::now() - chrono::Duration::hours(idle_hours);
    request
}

fn chain_request(request_id: i64, status: ChainRequestStatus) -> ChainRequestState {
    ChainRequestState {
        request_id,
        account_id: 7,
        requester_address: "requester_1".to_string(),
        amount: "2500000".to_string(),
        destination_chain_id: 8453,
        destination_address: "dest_addr".to_string(),
        description: "infra invoice".to_string(),
        status,
        transfer_id: None,
        requested_at: Utc::now() - chrono::Duration::hours(1),
    }
}

struct Harness {
    store: Arc<MockMirrorStore>,
    gateway: Arc<MockChainGateway>,
    rail: Arc<MockRailClient>,
    sweeper: StuckRequestSweeper,
}

fn harness(store: MockMirrorStore, gateway: MockChainGateway) -> Harness {
    let store = Arc::new(store);
    let gateway = Arc::new(gateway);
    let rail = Arc::new(MockRailClient::new());
    let orchestrator = Arc::new(SettlementOrchestrator::new(
        store.clone(),
        gateway.clone(),
        rail.clone(),
    ));
    let config = SweeperConfig {
        enabled: true,
        poll_interval: Duration::from_secs(300),
        stuck_after_secs: 600,
        hard_timeout_secs: 86_400,
        escalation_secs: 3_600,
        batch_size: 20,
    };
    let sweeper = StuckRequestSweeper::new(store.clone(), gateway.clone(), orchestrator, config);
    Harness {
        store,
        gateway,
        rail,
        sweeper,
    }
}

#[tokio::test]
async fn test_sweep_ignores_fresh_requests() {
    let mut request = stuck_request(1, 1, 0);
    request.updated_at = Utc::now();
    let h = harness(
        MockMirrorStore::new().with_request(request),
        MockChainGateway::new(),
    );

    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 0);
    assert_eq!(h.store.request(1).unwrap().status, RequestStatus::Executing);
}

#[tokio::test]
async fn test_sweep_corrects_mirror_for_chain_executed_request() {
    let mut chain_state = chain_request(2, ChainRequestStatus::Executed);
    chain_state.transfer_id = Some("transfer_recovered".to_string());
    let h = harness(
        MockMirrorStore::new().with_request(stuck_request(2, 2, 1)),
        MockChainGateway::new().with_chain_request(chain_state),
    );

    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 1);

    let request = h.store.request(2).unwrap();
    assert_eq!(request.status, RequestStatus::Executed);
    assert_eq!(
        request.rail_transfer_id.as_deref(),
        Some("transfer_recovered")
    );
    // No settlement was re-run
    assert_eq!(h.rail.submit_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_sweep_fails_chain_rejected_request() {
    let h = harness(
        MockMirrorStore::new().with_request(stuck_request(3, 2, 1)),
        MockChainGateway::new().with_chain_request(chain_request(3, ChainRequestStatus::Rejected)),
    );

    h.sweeper.sweep_once().await.unwrap();

    let request = h.store.request(3).unwrap();
    assert_eq!(request.status, RequestStatus::Failed);
    assert_eq!(request.failure_reason.as_deref(), Some("rejected on-chain"));
}

#[tokio::test]
async fn test_sweep_forces_timeout_past_hard_ceiling() {
    // 25 hours old, still pending on-chain
    let h = harness(
        MockMirrorStore::new().with_request(stuck_request(4, 25, 1)),
        MockChainGateway::new().with_chain_request(chain_request(4, ChainRequestStatus::Approved)),
    );

    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 1);

    let request = h.store.request(4).unwrap();
    assert_eq!(request.status, RequestStatus::Failed);
    assert_eq!(request.failure_reason.as_deref(), Some("timeout"));
    assert_eq!(h.gateway.call_count("mark_failed"), 1);
    // Settlement is never re-attempted past the ceiling
    assert_eq!(h.rail.submit_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_sweep_resettles_recoverable_request() {
    let h = harness(
        MockMirrorStore::new().with_request(stuck_request(5, 2, 1)),
        MockChainGateway::new().with_chain_request(chain_request(5, ChainRequestStatus::Approved)),
    );

    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 1);

    let request = h.store.request(5).unwrap();
    assert_eq!(request.status, RequestStatus::Executed);
    assert!(request.rail_transfer_id.is_some());
}

#[tokio::test]
async fn test_sweep_resettles_stranded_approved_request() {
    // The settlement job was lost before its first status stamp, so
    // the row never left APPROVED
    let mut request = stuck_request(8, 2, 1);
    request.status = RequestStatus::Approved;
    let h = harness(
        MockMirrorStore::new().with_request(request),
        MockChainGateway::new().with_chain_request(chain_request(8, ChainRequestStatus::Approved)),
    );

    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 1);

    let request = h.store.request(8).unwrap();
    assert_eq!(request.status, RequestStatus::Executed);
    assert!(request.rail_transfer_id.is_some());
}

#[tokio::test]
async fn test_sweep_keeps_recorded_transfer_id_when_chain_omits_it() {
    let mut request = stuck_request(9, 2, 1);
    request.rail_transfer_id = Some("transfer_9".to_string());
    let h = harness(
        MockMirrorStore::new().with_request(request),
        MockChainGateway::new().with_chain_request(chain_request(9, ChainRequestStatus::Executed)),
    );

    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 1);

    let request = h.store.request(9).unwrap();
    assert_eq!(request.status, RequestStatus::Executed);
    assert_eq!(request.rail_transfer_id.as_deref(), Some("transfer_9"));
}

#[tokio::test]
async fn test_sweep_escalates_long_stuck_failures() {
    // Idle for 2 hours (past escalation) and settlement keeps failing
    let h = harness(
        MockMirrorStore::new().with_request(stuck_request(6, 3, 2)),
        MockChainGateway::new().with_chain_request(chain_request(6, ChainRequestStatus::Approved)),
    );
    h.rail.set_fail_submit(true);

    assert_eq!(h.sweeper.sweep_once().await.unwrap(), 1);

    let request = h.store.request(6).unwrap();
    assert_eq!(request.status, RequestStatus::Failed);
    assert!(
        request
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("settlement retry gave up")
    );
}
