//! Settlement rail client.
//!
//! Two responsibilities, kept separable: building/signing/submitting a
//! burn intent to the rail's HTTP API, and invoking the fixed mint
//! entry point on a destination chain's rail-minter contract. Minting
//! goes through a per-chain provider/wallet registry built once at
//! startup from static configuration; a destination chain without a
//! registry entry is a fatal error raised before any network call.
//!
//! The intent fee is the rail's fixed minimum, not dynamically priced.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use crate::domain::{AppError, ChainError, ConfigError, RailAttestation, RailClient, RailError};
use crate::infra::chain::{JsonRpcClient, signed_transaction};
use crate::infra::retry::{RetryPolicy, with_retry};

/// Typed-data domain separator for burn intent signatures
const SIGNING_DOMAIN_NAME: &str = "treasury-rail";
const SIGNING_DOMAIN_VERSION: &str = "1";

/// Source-chain side of every transfer
#[derive(Debug, Clone)]
pub struct SourceChainConfig {
    /// The rail's own identifier for the source chain
    pub domain_id: u32,
    pub rpc_url: String,
    /// Burn gateway contract on the source chain
    pub gateway_address: String,
    pub token_address: String,
    /// Treasury address funds are drawn from
    pub depositor_address: String,
}

/// One supported destination chain
#[derive(Debug, Clone)]
pub struct DestinationChainConfig {
    pub chain_id: i64,
    /// The rail's own identifier for this chain
    pub domain_id: u32,
    pub rpc_url: String,
    pub minter_address: String,
    pub token_address: String,
}

/// Rail client configuration
#[derive(Debug, Clone)]
pub struct RailClientConfig {
    pub api_url: String,
    pub source: SourceChainConfig,
    pub destinations: Vec<DestinationChainConfig>,
    /// Fixed minimum fee attached to every intent
    pub max_fee: String,
    /// Intent validity window above the current source height
    pub intent_validity_blocks: u64,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for RailClientConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            source: SourceChainConfig {
                domain_id: 0,
                rpc_url: String::new(),
                gateway_address: String::new(),
                token_address: String::new(),
                depositor_address: String::new(),
            },
            destinations: Vec::new(),
            max_fee: "2000".to_string(),
            intent_validity_blocks: 10_000,
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// Transfer specification inside a burn intent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferSpec {
    pub source_domain: u32,
    pub destination_domain: u32,
    pub source_contract: String,
    pub destination_contract: String,
    pub source_token: String,
    pub destination_token: String,
    pub depositor: String,
    pub recipient: String,
    pub signer: String,
    /// Decimal-string transfer value
    pub value: String,
    /// Fresh random 32-byte salt, Base58-encoded
    pub salt: String,
    /// Always empty; reserved for rail-side hooks
    pub hook_data: String,
}

/// Intent envelope submitted to the rail
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BurnIntent {
    pub max_block_height: u64,
    pub max_fee: String,
    pub spec: TransferSpec,
}

#[derive(Debug, Serialize)]
struct SubmitIntentRequest<'a> {
    intent: &'a BurnIntent,
    signature: String,
}

#[derive(Debug, Deserialize)]
struct SubmitIntentResponse {
    transfer_id: String,
    attestation: String,
    attestation_signature: String,
}

/// Sign a typed message under the rail's domain separator.
///
/// The digest covers the domain block and the message body; field
/// order is part of the signing format.
pub fn sign_typed_data(key: &SigningKey, primary_type: &str, message: &Value) -> String {
    let envelope = json!({
        "domain": {
            "name": SIGNING_DOMAIN_NAME,
            "version": SIGNING_DOMAIN_VERSION,
        },
        "primary_type": primary_type,
        "message": message,
    });
    let digest = Sha256::digest(serde_json::to_vec(&envelope).unwrap_or_default());
    bs58::encode(key.sign(&digest).to_bytes()).into_string()
}

/// Generate the fresh random salt for one intent
fn fresh_salt() -> String {
    let mut salt = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut salt);
    bs58::encode(salt).into_string()
}

/// One destination chain's provider/wallet pair
struct MinterEntry {
    domain_id: u32,
    rpc: JsonRpcClient,
    minter_address: String,
    token_address: String,
    wallet: SigningKey,
}

/// Registry of destination chains supported for minting, built once at
/// startup. Lookup failure is fatal and precedes any network call.
struct MinterRegistry {
    entries: HashMap<i64, MinterEntry>,
}

impl MinterRegistry {
    fn build(
        destinations: &[DestinationChainConfig],
        mut wallets: HashMap<i64, SigningKey>,
    ) -> Result<Self, AppError> {
        let mut entries = HashMap::new();
        for dest in destinations {
            let wallet = wallets.remove(&dest.chain_id).ok_or_else(|| {
                AppError::Config(ConfigError::Missing(format!(
                    "minter wallet for chain {}",
                    dest.chain_id
                )))
            })?;
            entries.insert(
                dest.chain_id,
                MinterEntry {
                    domain_id: dest.domain_id,
                    rpc: JsonRpcClient::with_defaults(&dest.rpc_url)?,
                    minter_address: dest.minter_address.clone(),
                    token_address: dest.token_address.clone(),
                    wallet,
                },
            );
        }
        Ok(Self { entries })
    }

    fn get(&self, chain_id: i64) -> Result<&MinterEntry, AppError> {
        self.entries
            .get(&chain_id)
            .ok_or(AppError::Rail(RailError::UnsupportedChain(chain_id)))
    }
}

/// HTTP settlement rail client with a dedicated rail-wallet identity
pub struct HttpRailClient {
    http: reqwest::Client,
    config: RailClientConfig,
    rail_wallet: SigningKey,
    source_rpc: JsonRpcClient,
    registry: MinterRegistry,
}

impl HttpRailClient {
    pub fn new(
        config: RailClientConfig,
        rail_wallet: SigningKey,
        minter_wallets: HashMap<i64, SigningKey>,
    ) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                AppError::Config(ConfigError::Invalid(format!(
                    "failed to build HTTP client: {}",
                    e
                )))
            })?;
        let source_rpc = JsonRpcClient::with_defaults(&config.source.rpc_url)?;
        let registry = MinterRegistry::build(&config.destinations, minter_wallets)?;

        info!(
            api_url = %config.api_url,
            destinations = registry.entries.len(),
            "Settlement rail client initialized"
        );

        Ok(Self {
            http,
            config,
            rail_wallet,
            source_rpc,
            registry,
        })
    }

    /// Build the signed intent for one transfer
    fn build_intent(
        &self,
        amount: &str,
        destination: &MinterEntry,
        destination_address: &str,
        source_height: u64,
    ) -> (BurnIntent, String) {
        let signer = bs58::encode(self.rail_wallet.verifying_key().as_bytes()).into_string();
        let intent = BurnIntent {
            max_block_height: source_height + self.config.intent_validity_blocks,
            max_fee: self.config.max_fee.clone(),
            spec: TransferSpec {
                source_domain: self.config.source.domain_id,
                destination_domain: destination.domain_id,
                source_contract: self.config.source.gateway_address.clone(),
                destination_contract: destination.minter_address.clone(),
                source_token: self.config.source.token_address.clone(),
                destination_token: destination.token_address.clone(),
                depositor: self.config.source.depositor_address.clone(),
                recipient: destination_address.to_string(),
                signer,
                value: amount.to_string(),
                salt: fresh_salt(),
                hook_data: String::new(),
            },
        };

        let signature = sign_typed_data(
            &self.rail_wallet,
            "BurnIntent",
            &serde_json::to_value(&intent).unwrap_or(Value::Null),
        );
        (intent, signature)
    }

    async fn post_intent(
        &self,
        intent: &BurnIntent,
        signature: &str,
    ) -> Result<SubmitIntentResponse, AppError> {
        let url = format!("{}/v1/transfers", self.config.api_url);
        let body = SubmitIntentRequest {
            intent,
            signature: signature.to_string(),
        };

        let response = self.http.post(&url).json(&body).send().await.map_err(|e| {
            AppError::Rail(RailError::Network(format!("intent submission: {}", e)))
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::Rail(RailError::RateLimited(
                "intent submission: HTTP 429".to_string(),
            )));
        }
        if status.is_client_error() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::Rail(RailError::Rejected(format!(
                "HTTP {}: {}",
                status, detail
            ))));
        }
        if !status.is_success() {
            return Err(AppError::Rail(RailError::Network(format!(
                "intent submission: HTTP {}",
                status
            ))));
        }

        response.json().await.map_err(|e| {
            AppError::Rail(RailError::Network(format!(
                "intent submission: invalid response: {}",
                e
            )))
        })
    }
}

#[async_trait]
impl RailClient for HttpRailClient {
    #[instrument(skip(self), fields(chain_id = destination_chain_id))]
    async fn submit_burn_intent(
        &self,
        amount: &str,
        destination_chain_id: i64,
        destination_address: &str,
    ) -> Result<RailAttestation, AppError> {
        // Fatal before any network traffic
        let destination = self.registry.get(destination_chain_id)?;

        let source_height: u64 = with_retry(&self.config.retry, "chain_getHeight", || {
            self.source_rpc.call("chain_getHeight", json!([]))
        })
        .await?;

        let (intent, signature) =
            self.build_intent(amount, destination, destination_address, source_height);
        debug!(
            max_block_height = intent.max_block_height,
            value = %intent.spec.value,
            "Submitting signed burn intent"
        );

        let response = with_retry(&self.config.retry, "rail_submitIntent", || {
            self.post_intent(&intent, &signature)
        })
        .await?;

        info!(transfer_id = %response.transfer_id, "Rail accepted burn intent");
        Ok(RailAttestation {
            transfer_id: response.transfer_id,
            attestation: response.attestation,
            signature: response.attestation_signature,
        })
    }

    #[instrument(skip(self, attestation), fields(chain_id = destination_chain_id, transfer_id = %attestation.transfer_id))]
    async fn mint_with_attestation(
        &self,
        destination_chain_id: i64,
        attestation: &RailAttestation,
    ) -> Result<String, AppError> {
        // Fatal before any network traffic
        let destination = self.registry.get(destination_chain_id)?;

        let tx = signed_transaction(
            &destination.wallet,
            "minter_mint",
            json!({
                "contract": destination.minter_address,
                "token": destination.token_address,
                "attestation": attestation.attestation,
                "attestation_signature": attestation.signature,
            }),
        );

        let tx_hash: String = with_retry(&self.config.retry, "minter_mint", || async {
            self.registry
                .get(destination_chain_id)?
                .rpc
                .call::<_, String>("chain_sendTransaction", json!([tx.clone()]))
                .await
                .map_err(|e| match e {
                    // A mint revert is a settlement-step failure, never retried
                    AppError::Chain(ChainError::Rpc { code, message }) => AppError::Rail(
                        RailError::Mint(format!("rpc error {}: {}", code, message)),
                    ),
                    other => other,
                })
        })
        .await?;

        info!(tx_hash = %tx_hash, "Destination mint submitted");
        Ok(tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(byte: u8) -> SigningKey {
        SigningKey::from_bytes(&[byte; 32])
    }

    fn test_config() -> RailClientConfig {
        RailClientConfig {
            api_url: "http://rail.invalid".to_string(),
            source: SourceChainConfig {
                domain_id: 0,
                rpc_url: "http://source.invalid".to_string(),
                gateway_address: "gw_src".to_string(),
                token_address: "usdc_src".to_string(),
                depositor_address: "treasury_1".to_string(),
            },
            destinations: vec![DestinationChainConfig {
                chain_id: 8453,
                domain_id: 6,
                rpc_url: "http://base.invalid".to_string(),
                minter_address: "minter_base".to_string(),
                token_address: "usdc_base".to_string(),
            }],
            ..Default::default()
        }
    }

    fn test_client() -> HttpRailClient {
        let mut wallets = HashMap::new();
        wallets.insert(8453, test_key(2));
        HttpRailClient::new(test_config(), test_key(1), wallets).unwrap()
    }

    #[test]
    fn test_registry_rejects_missing_wallet() {
        let result = HttpRailClient::new(test_config(), test_key(1), HashMap::new());
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn test_mint_on_unconfigured_chain_is_fatal_without_network() {
        // The configured endpoints are unreachable; if lookup did any
        // network call this test would hang or fail differently.
        let client = test_client();
        let attestation = RailAttestation {
            transfer_id: "t1".to_string(),
            attestation: "a".to_string(),
            signature: "s".to_string(),
        };

        let result = client.mint_with_attestation(999_999, &attestation).await;
        match result {
            Err(AppError::Rail(RailError::UnsupportedChain(999_999))) => {}
            other => panic!("expected UnsupportedChain, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_submit_intent_on_unconfigured_chain_is_fatal_without_network() {
        let client = test_client();
        let result = client.submit_burn_intent("100", 424242, "dest").await;
        assert!(matches!(
            result,
            Err(AppError::Rail(RailError::UnsupportedChain(424242)))
        ));
    }

    #[test]
    fn test_build_intent_shape() {
        let client = test_client();
        let destination = client.registry.get(8453).unwrap();
        let (intent, signature) = client.build_intent("2500000", destination, "dest_addr", 500);

        assert_eq!(intent.max_block_height, 500 + 10_000);
        assert_eq!(intent.max_fee, "2000");
        assert_eq!(intent.spec.source_domain, 0);
        assert_eq!(intent.spec.destination_domain, 6);
        assert_eq!(intent.spec.recipient, "dest_addr");
        assert_eq!(intent.spec.value, "2500000");
        assert_eq!(intent.spec.hook_data, "");
        assert!(!signature.is_empty());

        // Salt is 32 bytes under the Base58 encoding
        let salt = bs58::decode(&intent.spec.salt).into_vec().unwrap();
        assert_eq!(salt.len(), 32);
    }

    #[test]
    fn test_salt_is_fresh_per_intent() {
        let client = test_client();
        let destination = client.registry.get(8453).unwrap();
        let (first, _) = client.build_intent("1", destination, "d", 0);
        let (second, _) = client.build_intent("1", destination, "d", 0);
        assert_ne!(first.spec.salt, second.spec.salt);
    }

    #[test]
    fn test_typed_data_signature_is_deterministic_for_same_message() {
        let key = test_key(5);
        let message = json!({ "value": "1", "salt": "abc" });
        assert_eq!(
            sign_typed_data(&key, "BurnIntent", &message),
            sign_typed_data(&key, "BurnIntent", &message)
        );
        let other = json!({ "value": "2", "salt": "abc" });
        assert_ne!(
            sign_typed_data(&key, "BurnIntent", &message),
            sign_typed_data(&key, "BurnIntent", &other)
        );
    }
}
