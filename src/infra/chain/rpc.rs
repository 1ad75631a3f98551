//! Low-level JSON-RPC client for the treasury chain node.
//!
//! Hand-rolled request/response envelopes over reqwest. Error mapping
//! feeds the resilient caller's transient/fatal classification:
//! timeouts and connection failures become [`ChainError::Timeout`] /
//! [`ChainError::Network`], HTTP 429 and the provider rate-limit RPC
//! codes become [`ChainError::RateLimited`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ed25519_dalek::{Signer, SigningKey};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::domain::{AppError, ChainError, ConfigError};

/// Provider RPC codes treated as rate limiting
const RATE_LIMIT_CODES: [i64; 2] = [-32005, -32029];

/// JSON-RPC client configuration
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    pub request_timeout: Duration,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a, P: Serialize> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Debug, serde::Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// JSON-RPC transport shared by the gateway and the rail minters
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: &str, config: RpcClientConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                AppError::Config(ConfigError::Invalid(format!(
                    "failed to build HTTP client: {}",
                    e
                )))
            })?;
        Ok(Self {
            http,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn with_defaults(url: &str) -> Result<Self, AppError> {
        Self::new(url, RpcClientConfig::default())
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Perform one JSON-RPC call and decode the result
    pub async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, AppError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        debug!(method = %method, id = id, "JSON-RPC call");

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Chain(ChainError::Timeout(format!("{}: {}", method, e)))
                } else {
                    AppError::Chain(ChainError::Network(format!("{}: {}", method, e)))
                }
            })?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::Chain(ChainError::RateLimited(format!(
                "{}: HTTP 429",
                method
            ))));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            AppError::Chain(ChainError::Network(format!(
                "{}: invalid response body: {}",
                method, e
            )))
        })?;

        if let Some(err_value) = body.get("error").filter(|e| !e.is_null()) {
            let err: RpcErrorBody = serde_json::from_value(err_value.clone()).map_err(|e| {
                AppError::Chain(ChainError::Network(format!(
                    "{}: malformed error body: {}",
                    method, e
                )))
            })?;
            if RATE_LIMIT_CODES.contains(&err.code) {
                return Err(AppError::Chain(ChainError::RateLimited(format!(
                    "{}: {} ({})",
                    method, err.message, err.code
                ))));
            }
            return Err(AppError::Chain(ChainError::Rpc {
                code: err.code,
                message: format!("{}: {}", method, err.message),
            }));
        }

        // A null result is a legitimate answer for optional reads
        let result = body
            .get("result")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        serde_json::from_value(result).map_err(|e| {
            AppError::Chain(ChainError::Network(format!(
                "{}: failed to decode result: {}",
                method, e
            )))
        })
    }
}

/// Decode a Base58-encoded signing key from a secret string.
/// Accepts either a 32-byte seed or a 64-byte keypair encoding.
pub fn signing_key_from_base58(secret: &SecretString) -> Result<SigningKey, AppError> {
    let bytes = bs58::decode(secret.expose_secret())
        .into_vec()
        .map_err(|e| AppError::Config(ConfigError::Invalid(format!("invalid Base58 key: {}", e))))?;

    let seed: [u8; 32] = match bytes.len() {
        32 => bytes.as_slice().try_into().unwrap(),
        64 => bytes[..32].try_into().unwrap(),
        n => {
            return Err(AppError::Config(ConfigError::Invalid(format!(
                "signing key must be 32 or 64 bytes, got {}",
                n
            ))));
        }
    };

    Ok(SigningKey::from_bytes(&seed))
}

/// Sign a canonical transaction payload with the given identity.
///
/// The payload is serialized as-is (struct field order is part of the
/// wire format), hashed with SHA-256 and signed; the signature is
/// returned Base58-encoded alongside the signer's public key.
pub fn sign_payload(key: &SigningKey, payload: &serde_json::Value) -> (String, String) {
    let canonical = serde_json::to_vec(payload).unwrap_or_default();
    let digest = Sha256::digest(&canonical);
    let signature = key.sign(&digest);
    let signer = bs58::encode(key.verifying_key().as_bytes()).into_string();
    (bs58::encode(signature.to_bytes()).into_string(), signer)
}

/// Build the signed envelope submitted as a chain transaction
pub fn signed_transaction(key: &SigningKey, method: &str, params: serde_json::Value) -> serde_json::Value {
    let payload = json!({
        "method": method,
        "params": params,
    });
    let (signature, signer) = sign_payload(key, &payload);
    json!({
        "payload": payload,
        "signer": signer,
        "signature": signature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    #[test]
    fn test_signing_key_from_base58_seed() {
        let seed = [9u8; 32];
        let encoded = bs58::encode(seed).into_string();
        let key = signing_key_from_base58(&SecretString::from(encoded)).unwrap();
        assert_eq!(key.to_bytes(), seed);
    }

    #[test]
    fn test_signing_key_from_base58_keypair() {
        let mut pair = [0u8; 64];
        pair[..32].copy_from_slice(&[3u8; 32]);
        let encoded = bs58::encode(pair).into_string();
        let key = signing_key_from_base58(&SecretString::from(encoded)).unwrap();
        assert_eq!(key.to_bytes(), [3u8; 32]);
    }

    #[test]
    fn test_signing_key_rejects_bad_length() {
        let encoded = bs58::encode([1u8; 16]).into_string();
        let result = signing_key_from_base58(&SecretString::from(encoded));
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_sign_payload_is_deterministic() {
        let key = test_key();
        let payload = json!({"method": "treasury_pause", "params": {}});
        let (sig1, signer1) = sign_payload(&key, &payload);
        let (sig2, signer2) = sign_payload(&key, &payload);
        assert_eq!(sig1, sig2);
        assert_eq!(signer1, signer2);
        assert!(!sig1.is_empty());
    }

    #[test]
    fn test_signed_transaction_envelope_shape() {
        let key = test_key();
        let tx = signed_transaction(&key, "treasury_freezeAccount", json!({"account_id": 5}));
        assert_eq!(tx["payload"]["method"], "treasury_freezeAccount");
        assert_eq!(tx["payload"]["params"]["account_id"], 5);
        assert!(tx["signature"].as_str().is_some());
        assert!(tx["signer"].as_str().is_some());
    }
}
