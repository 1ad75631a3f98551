//! Application entry point.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use ed25519_dalek::SigningKey;
use secrecy::SecretString;
use serde::Deserialize;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use treasury_spend_relayer::app::{
    EventBus, LifecycleConfig, RequestLifecycleManager, SettlementOrchestrator,
    StuckRequestSweeper, SweeperConfig, spawn_sweeper,
};
use treasury_spend_relayer::infra::{
    ChainGatewayConfig, DestinationChainConfig, EventIngestion, HttpRailClient, InProcessJobQueue,
    IngestionConfig, PostgresConfig, PostgresStore, RailClientConfig, RpcChainGateway,
    SourceChainConfig, default_job_retry, signing_key_from_base58, spawn_ingestion,
    spawn_queue_worker,
};

/// One destination chain as configured in `RAIL_DESTINATIONS`
#[derive(Debug, Deserialize)]
struct DestinationEnv {
    chain_id: i64,
    domain_id: u32,
    rpc_url: String,
    minter_address: String,
    token_address: String,
    /// Base58-encoded minter wallet key for this chain
    wallet_key: String,
}

/// Application configuration
struct Config {
    database_url: String,
    chain_rpc_url: String,
    chain_ws_url: String,
    operator_key: SigningKey,
    admin_key: SigningKey,
    rail_wallet: SigningKey,
    rail_config: RailClientConfig,
    minter_wallets: HashMap<i64, SigningKey>,
    sweeper_config: SweeperConfig,
}

impl Config {
    fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL not set")?;
        let chain_rpc_url = env::var("TREASURY_RPC_URL").context("TREASURY_RPC_URL not set")?;
        let chain_ws_url = env::var("TREASURY_WS_URL").context("TREASURY_WS_URL not set")?;

        let operator_key = Self::load_key("OPERATOR_PRIVATE_KEY")?;
        let admin_key = Self::load_key("ADMIN_PRIVATE_KEY")?;
        let rail_wallet = Self::load_key("RAIL_WALLET_PRIVATE_KEY")?;

        let rail_api_url = env::var("RAIL_API_URL").context("RAIL_API_URL not set")?;
        let source = SourceChainConfig {
            domain_id: env::var("RAIL_SOURCE_DOMAIN_ID")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            rpc_url: chain_rpc_url.clone(),
            gateway_address: env::var("RAIL_SOURCE_GATEWAY_ADDRESS")
                .context("RAIL_SOURCE_GATEWAY_ADDRESS not set")?,
            token_address: env::var("RAIL_SOURCE_TOKEN_ADDRESS")
                .context("RAIL_SOURCE_TOKEN_ADDRESS not set")?,
            depositor_address: env::var("RAIL_DEPOSITOR_ADDRESS")
                .context("RAIL_DEPOSITOR_ADDRESS not set")?,
        };

        // Supported destination chains are static configuration; a
        // chain absent here is rejected at settlement time
        let destinations_json =
            env::var("RAIL_DESTINATIONS").context("RAIL_DESTINATIONS not set")?;
        let destination_envs: Vec<DestinationEnv> = serde_json::from_str(&destinations_json)
            .context("Failed to parse RAIL_DESTINATIONS as JSON")?;

        let mut destinations = Vec::new();
        let mut minter_wallets = HashMap::new();
        for dest in destination_envs {
            let wallet = signing_key_from_base58(&SecretString::from(dest.wallet_key))
                .with_context(|| format!("Invalid wallet key for chain {}", dest.chain_id))?;
            minter_wallets.insert(dest.chain_id, wallet);
            destinations.push(DestinationChainConfig {
                chain_id: dest.chain_id,
                domain_id: dest.domain_id,
                rpc_url: dest.rpc_url,
                minter_address: dest.minter_address,
                token_address: dest.token_address,
            });
        }

        let rail_config = RailClientConfig {
            api_url: rail_api_url,
            source,
            destinations,
            max_fee: env::var("RAIL_MAX_FEE").unwrap_or_else(|_| "2000".to_string()),
            intent_validity_blocks: env::var("RAIL_INTENT_VALIDITY_BLOCKS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000),
            ..Default::default()
        };

        let sweeper_config = SweeperConfig {
            enabled: env::var("ENABLE_SWEEPER")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
            poll_interval: Duration::from_secs(
                env::var("SWEEPER_POLL_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(300),
            ),
            stuck_after_secs: env::var("SWEEPER_STUCK_AFTER_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(600),
            hard_timeout_secs: env::var("SWEEPER_HARD_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(86_400),
            escalation_secs: env::var("SWEEPER_ESCALATION_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3_600),
            batch_size: env::var("SWEEPER_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
        };

        Ok(Self {
            database_url,
            chain_rpc_url,
            chain_ws_url,
            operator_key,
            admin_key,
            rail_wallet,
            rail_config,
            minter_wallets,
            sweeper_config,
        })
    }

    fn load_key(var: &str) -> Result<SigningKey> {
        let key_str = env::var(var)
            .with_context(|| format!("{} environment variable is not set", var))?;
        if key_str.is_empty() {
            anyhow::bail!("{} environment variable is empty", var);
        }
        let secret = SecretString::from(key_str);
        signing_key_from_base58(&secret)
            .with_context(|| format!("Failed to parse {} as Base58", var))
    }
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    info!("🏗️  Treasury Spend Relayer v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    let operator_pubkey =
        bs58::encode(config.operator_key.verifying_key().as_bytes()).into_string();
    info!("🔑 Operator public key: {}", operator_pubkey);

    info!("📦 Initializing infrastructure...");

    // Initialize database
    let store = PostgresStore::new(&config.database_url, PostgresConfig::default()).await?;
    store.run_migrations().await?;
    info!("   ✓ Database connected and migrations applied");
    let store = Arc::new(store);

    // Initialize chain gateway with operator and admin identities
    let gateway_config = ChainGatewayConfig {
        rpc_url: config.chain_rpc_url.clone(),
        ..Default::default()
    };
    let gateway = Arc::new(RpcChainGateway::new(
        gateway_config,
        config.operator_key,
        config.admin_key,
    )?);
    info!("   ✓ Chain gateway created");

    // Initialize settlement rail client
    let destination_count = config.rail_config.destinations.len();
    let rail = Arc::new(HttpRailClient::new(
        config.rail_config,
        config.rail_wallet,
        config.minter_wallets,
    )?);
    info!(
        "   ✓ Settlement rail client created ({} destination chains)",
        destination_count
    );

    // Settlement pipeline: orchestrator behind the deduplicating queue
    let orchestrator = Arc::new(SettlementOrchestrator::new(
        store.clone(),
        gateway.clone(),
        rail.clone(),
    ));
    let (job_queue, job_rx) = InProcessJobQueue::new();
    let (_queue_handle, queue_shutdown_tx) = spawn_queue_worker(
        &job_queue,
        job_rx,
        orchestrator.clone(),
        default_job_retry(),
    );
    info!("   ✓ Settlement queue worker started");

    // Lifecycle manager consuming the event bus
    let bus = EventBus::default();
    let alerts = Arc::new(treasury_spend_relayer::infra::LogAlertSink);
    let lifecycle = Arc::new(RequestLifecycleManager::new(
        store.clone(),
        gateway.clone(),
        Arc::new(job_queue),
        alerts,
        LifecycleConfig::default(),
    ));
    let (lifecycle_shutdown_tx, lifecycle_shutdown_rx) = tokio::sync::watch::channel(false);
    let lifecycle_bus = bus.clone();
    let lifecycle_task = lifecycle.clone();
    let _lifecycle_handle = tokio::spawn(async move {
        lifecycle_task.run(&lifecycle_bus, lifecycle_shutdown_rx).await;
    });
    info!("   ✓ Lifecycle manager started");

    // Event ingestion over the chain websocket stream
    let ingestion_config = IngestionConfig {
        ws_url: config.chain_ws_url.clone(),
        ..Default::default()
    };
    let ingestion = EventIngestion::new(ingestion_config, gateway.clone(), bus.clone());
    let (_ingestion_handle, ingestion_shutdown_tx) = spawn_ingestion(ingestion);
    info!("   ✓ Event ingestion started ({})", config.chain_ws_url);

    // Stuck-request sweeper
    let sweeper_shutdown_tx = if config.sweeper_config.enabled {
        let sweeper = StuckRequestSweeper::new(
            store.clone(),
            gateway.clone(),
            orchestrator.clone(),
            config.sweeper_config.clone(),
        );
        let (_sweeper_handle, shutdown_tx) = spawn_sweeper(sweeper);
        info!(
            "   ✓ Stuck-request sweeper started (poll: {}s, stuck_after: {}s)",
            config.sweeper_config.poll_interval.as_secs(),
            config.sweeper_config.stuck_after_secs
        );
        Some(shutdown_tx)
    } else {
        info!("   ○ Stuck-request sweeper disabled");
        None
    };

    let health = lifecycle.health().await;
    info!("🚀 Relayer running (health: {:?})", health.status);

    shutdown_signal().await;

    // Signal background tasks to shut down
    let _ = ingestion_shutdown_tx.send(true);
    let _ = lifecycle_shutdown_tx.send(true);
    let _ = queue_shutdown_tx.send(true);
    if let Some(tx) = sweeper_shutdown_tx {
        let _ = tx.send(true);
    }

    info!("Relayer shutdown complete");
    Ok(())
}
