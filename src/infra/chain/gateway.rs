//! RPC implementation of the chain gateway.
//!
//! Every write submits a signed transaction, polls for inclusion, and
//! where the contract assigns an identifier (account or request
//! creation) decodes it from the transaction's emitted events. A
//! missing id event is recoverable but notable: the call returns the
//! sentinel `0` and logs a warning so reconciliation can pick it up.
//!
//! Two signing identities are held: the operator key for
//! backend-triggered settlement bookkeeping and the admin key for
//! privileged account management. All RPC traffic goes through the
//! resilient caller.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::domain::{
    AccountParams, AppError, ChainAccountState, ChainError, ChainGateway, ChainRequestState,
    NewSpendRequest, TxOutcome,
};
use crate::infra::retry::{RetryPolicy, with_retry};

use super::rpc::{JsonRpcClient, RpcClientConfig, signed_transaction};

/// Chain gateway configuration
#[derive(Debug, Clone)]
pub struct ChainGatewayConfig {
    pub rpc_url: String,
    /// Interval between inclusion-poll attempts
    pub receipt_poll_interval: Duration,
    /// Inclusion-poll attempts before giving up
    pub receipt_poll_attempts: u32,
    pub retry: RetryPolicy,
}

impl Default for ChainGatewayConfig {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            receipt_poll_interval: Duration::from_secs(1),
            receipt_poll_attempts: 30,
            retry: RetryPolicy::default(),
        }
    }
}

/// Event emitted by an included transaction
#[derive(Debug, Clone, Deserialize)]
struct EmittedEvent {
    name: String,
    #[serde(default)]
    data: Value,
}

/// Transaction receipt returned once a write is included
#[derive(Debug, Clone, Deserialize)]
struct TxReceipt {
    tx_hash: String,
    block_number: u64,
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    events: Vec<EmittedEvent>,
}

#[derive(Debug, Clone, Deserialize)]
struct BlockHeader {
    /// Unix timestamp of the block
    timestamp: i64,
}

/// JSON-RPC chain gateway with operator and admin signing identities
pub struct RpcChainGateway {
    rpc: JsonRpcClient,
    operator_key: SigningKey,
    admin_key: SigningKey,
    config: ChainGatewayConfig,
}

impl RpcChainGateway {
    pub fn new(
        config: ChainGatewayConfig,
        operator_key: SigningKey,
        admin_key: SigningKey,
    ) -> Result<Self, AppError> {
        let rpc = JsonRpcClient::new(&config.rpc_url, RpcClientConfig::default())?;
        info!(rpc_url = %config.rpc_url, "Chain gateway initialized");
        Ok(Self {
            rpc,
            operator_key,
            admin_key,
            config,
        })
    }

    /// Submit a signed write and wait for its inclusion receipt
    async fn send_write(
        &self,
        key: &SigningKey,
        method: &str,
        params: Value,
    ) -> Result<TxReceipt, AppError> {
        let tx = signed_transaction(key, method, params);

        let tx_hash: String = with_retry(&self.config.retry, method, || {
            self.rpc.call("treasury_sendTransaction", json!([tx.clone()]))
        })
        .await?;

        self.wait_for_inclusion(method, &tx_hash).await
    }

    /// Poll the node until the transaction is included or the poll
    /// budget is exhausted
    async fn wait_for_inclusion(&self, method: &str, tx_hash: &str) -> Result<TxReceipt, AppError> {
        for _ in 0..self.config.receipt_poll_attempts {
            let receipt: Option<TxReceipt> = with_retry(&self.config.retry, "getReceipt", || {
                self.rpc
                    .call("treasury_getTransactionReceipt", json!([tx_hash]))
            })
            .await?;

            if let Some(receipt) = receipt {
                if !receipt.success {
                    return Err(AppError::Chain(ChainError::TransactionFailed(format!(
                        "{} ({}): {}",
                        method,
                        tx_hash,
                        receipt.error.unwrap_or_else(|| "reverted".to_string())
                    ))));
                }
                return Ok(receipt);
            }

            tokio::time::sleep(self.config.receipt_poll_interval).await;
        }

        Err(AppError::Chain(ChainError::Timeout(format!(
            "{}: transaction {} not included after {} polls",
            method, tx_hash, self.config.receipt_poll_attempts
        ))))
    }

    /// Decode an id-carrying event from a receipt, defaulting to the
    /// sentinel `0` when the event or field is absent
    fn decode_id_event(receipt: &TxReceipt, event_name: &str, field: &str) -> i64 {
        let id = receipt
            .events
            .iter()
            .find(|e| e.name == event_name)
            .and_then(|e| e.data.get(field))
            .and_then(Value::as_i64);

        match id {
            Some(id) => id,
            None => {
                warn!(
                    tx_hash = %receipt.tx_hash,
                    event = %event_name,
                    field = %field,
                    "Expected id event missing from receipt, defaulting to sentinel 0"
                );
                0
            }
        }
    }

    fn outcome(receipt: TxReceipt) -> TxOutcome {
        TxOutcome {
            tx_hash: receipt.tx_hash,
            block_number: receipt.block_number,
        }
    }
}

#[async_trait]
impl ChainGateway for RpcChainGateway {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let _height: u64 = with_retry(&self.config.retry, "chain_getHeight", || {
            self.rpc.call("chain_getHeight", json!([]))
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_account(&self, account_id: i64) -> Result<Option<ChainAccountState>, AppError> {
        with_retry(&self.config.retry, "treasury_getAccount", || {
            self.rpc
                .call("treasury_getAccount", json!({ "account_id": account_id }))
        })
        .await
    }

    #[instrument(skip(self))]
    async fn get_request(&self, request_id: i64) -> Result<Option<ChainRequestState>, AppError> {
        with_retry(&self.config.retry, "treasury_getRequest", || {
            self.rpc
                .call("treasury_getRequest", json!({ "request_id": request_id }))
        })
        .await
    }

    #[instrument(skip(self))]
    async fn get_block_timestamp(&self, block_number: u64) -> Result<DateTime<Utc>, AppError> {
        let header: BlockHeader = with_retry(&self.config.retry, "chain_getBlockHeader", || {
            self.rpc
                .call("chain_getBlockHeader", json!({ "block_number": block_number }))
        })
        .await?;

        DateTime::from_timestamp(header.timestamp, 0).ok_or_else(|| {
            AppError::Chain(ChainError::EventDecode(format!(
                "block {} has invalid timestamp {}",
                block_number, header.timestamp
            )))
        })
    }

    #[instrument(skip(self))]
    async fn mark_executed(
        &self,
        request_id: i64,
        transfer_id: &str,
    ) -> Result<TxOutcome, AppError> {
        let receipt = self
            .send_write(
                &self.operator_key,
                "treasury_markExecuted",
                json!({ "request_id": request_id, "transfer_id": transfer_id }),
            )
            .await?;
        info!(request_id, tx_hash = %receipt.tx_hash, "Marked request executed on-chain");
        Ok(Self::outcome(receipt))
    }

    #[instrument(skip(self))]
    async fn mark_failed(&self, request_id: i64, reason: &str) -> Result<TxOutcome, AppError> {
        let receipt = self
            .send_write(
                &self.operator_key,
                "treasury_markFailed",
                json!({ "request_id": request_id, "reason": reason }),
            )
            .await?;
        info!(request_id, tx_hash = %receipt.tx_hash, "Marked request failed on-chain");
        Ok(Self::outcome(receipt))
    }

    #[instrument(skip(self))]
    async fn record_inbound_funding(
        &self,
        account_id: i64,
        amount: &str,
        source_tx: &str,
    ) -> Result<TxOutcome, AppError> {
        let receipt = self
            .send_write(
                &self.operator_key,
                "treasury_recordInboundFunding",
                json!({ "account_id": account_id, "amount": amount, "source_tx": source_tx }),
            )
            .await?;
        Ok(Self::outcome(receipt))
    }

    #[instrument(skip(self, params), fields(label = %params.label))]
    async fn create_account(&self, params: &AccountParams) -> Result<i64, AppError> {
        let receipt = self
            .send_write(
                &self.admin_key,
                "treasury_createAccount",
                serde_json::to_value(params).unwrap_or(Value::Null),
            )
            .await?;
        Ok(Self::decode_id_event(&receipt, "account.created", "account_id"))
    }

    #[instrument(skip(self, params))]
    async fn update_account(
        &self,
        account_id: i64,
        params: &AccountParams,
    ) -> Result<TxOutcome, AppError> {
        let receipt = self
            .send_write(
                &self.admin_key,
                "treasury_updateAccount",
                json!({ "account_id": account_id, "params": params }),
            )
            .await?;
        Ok(Self::outcome(receipt))
    }

    #[instrument(skip(self))]
    async fn freeze_account(&self, account_id: i64) -> Result<TxOutcome, AppError> {
        let receipt = self
            .send_write(
                &self.admin_key,
                "treasury_freezeAccount",
                json!({ "account_id": account_id }),
            )
            .await?;
        Ok(Self::outcome(receipt))
    }

    #[instrument(skip(self))]
    async fn unfreeze_account(&self, account_id: i64) -> Result<TxOutcome, AppError> {
        let receipt = self
            .send_write(
                &self.admin_key,
                "treasury_unfreezeAccount",
                json!({ "account_id": account_id }),
            )
            .await?;
        Ok(Self::outcome(receipt))
    }

    #[instrument(skip(self))]
    async fn close_account(&self, account_id: i64) -> Result<TxOutcome, AppError> {
        let receipt = self
            .send_write(
                &self.admin_key,
                "treasury_closeAccount",
                json!({ "account_id": account_id }),
            )
            .await?;
        Ok(Self::outcome(receipt))
    }

    #[instrument(skip(self))]
    async fn set_allowed_chains(
        &self,
        account_id: i64,
        chains: &[i64],
    ) -> Result<TxOutcome, AppError> {
        let receipt = self
            .send_write(
                &self.admin_key,
                "treasury_setAllowedChains",
                json!({ "account_id": account_id, "chains": chains }),
            )
            .await?;
        Ok(Self::outcome(receipt))
    }

    #[instrument(skip(self))]
    async fn configure_auto_topup(
        &self,
        account_id: i64,
        threshold: &str,
        amount: &str,
    ) -> Result<TxOutcome, AppError> {
        let receipt = self
            .send_write(
                &self.admin_key,
                "treasury_configureAutoTopup",
                json!({ "account_id": account_id, "threshold": threshold, "amount": amount }),
            )
            .await?;
        Ok(Self::outcome(receipt))
    }

    #[instrument(skip(self))]
    async fn execute_auto_topup(&self, account_id: i64) -> Result<TxOutcome, AppError> {
        let receipt = self
            .send_write(
                &self.admin_key,
                "treasury_executeAutoTopup",
                json!({ "account_id": account_id }),
            )
            .await?;
        Ok(Self::outcome(receipt))
    }

    #[instrument(skip(self))]
    async fn sweep(&self, destination: &str) -> Result<TxOutcome, AppError> {
        let receipt = self
            .send_write(
                &self.admin_key,
                "treasury_sweep",
                json!({ "destination": destination }),
            )
            .await?;
        Ok(Self::outcome(receipt))
    }

    #[instrument(skip(self))]
    async fn reset_period(&self, account_id: i64) -> Result<TxOutcome, AppError> {
        let receipt = self
            .send_write(
                &self.admin_key,
                "treasury_resetPeriod",
                json!({ "account_id": account_id }),
            )
            .await?;
        Ok(Self::outcome(receipt))
    }

    #[instrument(skip(self, request), fields(account_id = request.account_id))]
    async fn submit_request(&self, request: &NewSpendRequest) -> Result<i64, AppError> {
        let receipt = self
            .send_write(
                &self.admin_key,
                "treasury_requestSpend",
                serde_json::to_value(request).unwrap_or(Value::Null),
            )
            .await?;
        Ok(Self::decode_id_event(&receipt, "spend.requested", "request_id"))
    }

    #[instrument(skip(self))]
    async fn approve_request(&self, request_id: i64) -> Result<TxOutcome, AppError> {
        let receipt = self
            .send_write(
                &self.admin_key,
                "treasury_approveSpend",
                json!({ "request_id": request_id }),
            )
            .await?;
        Ok(Self::outcome(receipt))
    }

    #[instrument(skip(self))]
    async fn reject_request(&self, request_id: i64, reason: &str) -> Result<TxOutcome, AppError> {
        let receipt = self
            .send_write(
                &self.admin_key,
                "treasury_rejectSpend",
                json!({ "request_id": request_id, "reason": reason }),
            )
            .await?;
        Ok(Self::outcome(receipt))
    }

    #[instrument(skip(self))]
    async fn pause(&self) -> Result<TxOutcome, AppError> {
        let receipt = self
            .send_write(&self.admin_key, "treasury_pause", json!({}))
            .await?;
        Ok(Self::outcome(receipt))
    }

    #[instrument(skip(self))]
    async fn unpause(&self) -> Result<TxOutcome, AppError> {
        let receipt = self
            .send_write(&self.admin_key, "treasury_unpause", json!({}))
            .await?;
        Ok(Self::outcome(receipt))
    }

    #[instrument(skip(self))]
    async fn transfer_admin(&self, new_admin: &str) -> Result<TxOutcome, AppError> {
        let receipt = self
            .send_write(
                &self.admin_key,
                "treasury_transferAdmin",
                json!({ "new_admin": new_admin }),
            )
            .await?;
        Ok(Self::outcome(receipt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt_with_events(events: Vec<EmittedEvent>) -> TxReceipt {
        TxReceipt {
            tx_hash: "tx_1".to_string(),
            block_number: 10,
            success: true,
            error: None,
            events,
        }
    }

    #[test]
    fn test_decode_id_event_present() {
        let receipt = receipt_with_events(vec![EmittedEvent {
            name: "spend.requested".to_string(),
            data: json!({ "request_id": 42 }),
        }]);
        assert_eq!(
            RpcChainGateway::decode_id_event(&receipt, "spend.requested", "request_id"),
            42
        );
    }

    #[test]
    fn test_decode_id_event_missing_defaults_to_sentinel() {
        let receipt = receipt_with_events(vec![]);
        assert_eq!(
            RpcChainGateway::decode_id_event(&receipt, "spend.requested", "request_id"),
            0
        );
    }

    #[test]
    fn test_decode_id_event_wrong_field_defaults_to_sentinel() {
        let receipt = receipt_with_events(vec![EmittedEvent {
            name: "account.created".to_string(),
            data: json!({ "owner": "abc" }),
        }]);
        assert_eq!(
            RpcChainGateway::decode_id_event(&receipt, "account.created", "account_id"),
            0
        );
    }
}
