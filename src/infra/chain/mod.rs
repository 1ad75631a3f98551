//! Treasury chain access: JSON-RPC transport, the signed gateway and
//! websocket event ingestion.

pub mod gateway;
pub mod ingestion;
pub mod rpc;

pub use gateway::{ChainGatewayConfig, RpcChainGateway};
pub use ingestion::{EventIngestion, IngestionConfig, spawn_ingestion};
pub use rpc::{
    JsonRpcClient, RpcClientConfig, sign_payload, signed_transaction, signing_key_from_base58,
};
