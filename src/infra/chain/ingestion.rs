//! Event ingestion over the chain node's websocket stream.
//!
//! Opens one persistent connection, attaches one subscription per
//! domain event type, and translates raw frames into typed
//! [`TreasuryEvent`]s published on the internal bus. Subscription
//! setup is staggered by a fixed delay: bursts of subscribe frames
//! trip provider-side rate limits, so startup latency is traded for
//! subscription stability.
//!
//! Ingestion never touches the mirror; it is a pure translation layer.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::app::EventBus;
use crate::domain::{AppError, ChainError, ChainGateway, EventMeta, TreasuryEvent};

/// Ingestion configuration
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub ws_url: String,
    /// Fixed delay between subscription frames
    pub subscribe_stagger: Duration,
    /// Delay before re-opening a dropped connection
    pub reconnect_delay: Duration,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            ws_url: String::new(),
            subscribe_stagger: Duration::from_millis(200),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Raw frame delivered by the node's event stream
#[derive(Debug, Deserialize)]
struct EventFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    event: String,
    #[serde(default)]
    block_number: u64,
    #[serde(default)]
    tx_hash: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct RequestedPayload {
    request_id: i64,
    account_id: i64,
    requester_address: String,
    amount: String,
    destination_chain_id: i64,
    destination_address: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ApprovedPayload {
    request_id: i64,
    #[serde(default)]
    approver: String,
}

#[derive(Debug, Deserialize)]
struct ReasonPayload {
    request_id: i64,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct ExecutedPayload {
    request_id: i64,
    #[serde(default)]
    transfer_id: String,
}

#[derive(Debug, Deserialize)]
struct AccountPayload {
    account_id: i64,
}

#[derive(Debug, Deserialize)]
struct FundingPayload {
    account_id: i64,
    amount: String,
    #[serde(default)]
    source_tx: String,
}

#[derive(Debug, Deserialize)]
struct AdminPayload {
    #[serde(default)]
    previous_admin: String,
    new_admin: String,
}

/// Translate a raw contract event into a typed domain event
fn translate_event(name: &str, data: Value, meta: EventMeta) -> Result<TreasuryEvent, AppError> {
    let decode = |e: serde_json::Error| {
        AppError::Chain(ChainError::EventDecode(format!("{}: {}", name, e)))
    };

    let event = match name {
        "spend.requested" => {
            let p: RequestedPayload = serde_json::from_value(data).map_err(decode)?;
            TreasuryEvent::RequestSubmitted {
                meta,
                request_id: p.request_id,
                account_id: p.account_id,
                requester_address: p.requester_address,
                amount: p.amount,
                destination_chain_id: p.destination_chain_id,
                destination_address: p.destination_address,
                description: p.description,
            }
        }
        "spend.approved" => {
            let p: ApprovedPayload = serde_json::from_value(data).map_err(decode)?;
            TreasuryEvent::RequestApproved {
                meta,
                request_id: p.request_id,
                approver: p.approver,
            }
        }
        "spend.rejected" => {
            let p: ReasonPayload = serde_json::from_value(data).map_err(decode)?;
            TreasuryEvent::RequestRejected {
                meta,
                request_id: p.request_id,
                reason: p.reason,
            }
        }
        "spend.executed" => {
            let p: ExecutedPayload = serde_json::from_value(data).map_err(decode)?;
            TreasuryEvent::RequestExecuted {
                meta,
                request_id: p.request_id,
                transfer_id: p.transfer_id,
            }
        }
        "spend.failed" => {
            let p: ReasonPayload = serde_json::from_value(data).map_err(decode)?;
            TreasuryEvent::RequestFailed {
                meta,
                request_id: p.request_id,
                reason: p.reason,
            }
        }
        "account.created" => {
            let p: AccountPayload = serde_json::from_value(data).map_err(decode)?;
            TreasuryEvent::AccountCreated {
                meta,
                account_id: p.account_id,
            }
        }
        "account.updated" => {
            let p: AccountPayload = serde_json::from_value(data).map_err(decode)?;
            TreasuryEvent::AccountUpdated {
                meta,
                account_id: p.account_id,
            }
        }
        "account.frozen" => {
            let p: AccountPayload = serde_json::from_value(data).map_err(decode)?;
            TreasuryEvent::AccountFrozen {
                meta,
                account_id: p.account_id,
            }
        }
        "account.unfrozen" => {
            let p: AccountPayload = serde_json::from_value(data).map_err(decode)?;
            TreasuryEvent::AccountUnfrozen {
                meta,
                account_id: p.account_id,
            }
        }
        "account.closed" => {
            let p: AccountPayload = serde_json::from_value(data).map_err(decode)?;
            TreasuryEvent::AccountClosed {
                meta,
                account_id: p.account_id,
            }
        }
        "treasury.inbound_funding" => {
            let p: FundingPayload = serde_json::from_value(data).map_err(decode)?;
            TreasuryEvent::InboundFunding {
                meta,
                account_id: p.account_id,
                amount: p.amount,
                source_tx: p.source_tx,
            }
        }
        "treasury.admin_transferred" => {
            let p: AdminPayload = serde_json::from_value(data).map_err(decode)?;
            TreasuryEvent::AdminTransferred {
                meta,
                previous_admin: p.previous_admin,
                new_admin: p.new_admin,
            }
        }
        "treasury.paused" => TreasuryEvent::Paused { meta },
        "treasury.unpaused" => TreasuryEvent::Unpaused { meta },
        other => {
            return Err(AppError::Chain(ChainError::EventDecode(format!(
                "unknown event type: {}",
                other
            ))));
        }
    };

    Ok(event)
}

/// Persistent subscription to the treasury contract's event stream
pub struct EventIngestion {
    config: IngestionConfig,
    gateway: Arc<dyn ChainGateway>,
    bus: EventBus,
}

impl EventIngestion {
    pub fn new(config: IngestionConfig, gateway: Arc<dyn ChainGateway>, bus: EventBus) -> Self {
        Self {
            config,
            gateway,
            bus,
        }
    }

    /// Run until shutdown, reconnecting with a delay on stream failure
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.connect_and_stream(&mut shutdown).await {
                warn!(error = %e, "Event stream dropped, reconnecting");
            }

            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("Event ingestion stopped");
    }

    async fn connect_and_stream(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), AppError> {
        info!(ws_url = %self.config.ws_url, "Connecting to chain event stream");

        let (stream, _) = connect_async(&self.config.ws_url)
            .await
            .map_err(|e| AppError::Chain(ChainError::Network(format!("ws connect: {}", e))))?;
        let (mut write, mut read) = stream.split();

        // One subscription per event type, staggered to stay under
        // provider subscription rate limits
        for (i, name) in TreasuryEvent::ALL_NAMES.iter().enumerate() {
            let frame = json!({ "op": "subscribe", "event": name }).to_string();
            write
                .send(Message::Text(frame.into()))
                .await
                .map_err(|e| AppError::Chain(ChainError::Network(format!("subscribe: {}", e))))?;
            debug!(event = %name, "Subscribed to event type");

            if i + 1 < TreasuryEvent::ALL_NAMES.len() {
                tokio::time::sleep(self.config.subscribe_stagger).await;
            }
        }

        info!(
            subscriptions = TreasuryEvent::ALL_NAMES.len(),
            "Event subscriptions established"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = self.handle_frame(text.as_ref()).await {
                                warn!(error = %e, "Failed to process event frame");
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(AppError::Chain(ChainError::Network(
                                "event stream closed by peer".to_string(),
                            )));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Err(AppError::Chain(ChainError::Network(format!(
                                "ws read: {}",
                                e
                            ))));
                        }
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, text: &str) -> Result<(), AppError> {
        let frame: EventFrame = serde_json::from_str(text)
            .map_err(|e| AppError::Chain(ChainError::EventDecode(format!("frame: {}", e))))?;

        // Subscription acks and keepalives carry no event
        if frame.kind != "event" {
            debug!(kind = %frame.kind, "Ignoring non-event frame");
            return Ok(());
        }

        let timestamp = self.gateway.get_block_timestamp(frame.block_number).await?;
        let meta = EventMeta {
            block_number: frame.block_number,
            tx_hash: frame.tx_hash.clone(),
            timestamp,
        };

        let event = translate_event(&frame.event, frame.data, meta)?;
        debug!(
            event = %event.name(),
            block = frame.block_number,
            tx_hash = %frame.tx_hash,
            "Publishing domain event"
        );

        if self.bus.publish(event).is_err() {
            warn!("Domain event dropped: no active subscribers");
        }
        Ok(())
    }
}

/// Spawn the ingestion loop; returns the task handle and its shutdown sender
pub fn spawn_ingestion(
    ingestion: EventIngestion,
) -> (tokio::task::JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        ingestion.run(shutdown_rx).await;
    });
    (handle, shutdown_tx)
}
