//! Infrastructure implementations of the domain trait seams.

pub mod alerts;
pub mod chain;
pub mod database;
pub mod queue;
pub mod rail;
pub mod retry;

pub use alerts::LogAlertSink;
pub use chain::{
    ChainGatewayConfig, EventIngestion, IngestionConfig, JsonRpcClient, RpcChainGateway,
    RpcClientConfig, signing_key_from_base58, spawn_ingestion,
};
pub use database::{PostgresConfig, PostgresStore};
pub use queue::{InProcessJobQueue, default_job_retry, spawn_queue_worker};
pub use rail::{
    DestinationChainConfig, HttpRailClient, RailClientConfig, SourceChainConfig,
};
pub use retry::{RetryPolicy, with_retry};
