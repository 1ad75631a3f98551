//! PostgreSQL mirror store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

use crate::domain::{
    AppError, DatabaseError, MirrorStore, RequestFilter, RequestStatus, SpendAccount, SpendRequest,
};

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// PostgreSQL mirror store with connection pooling
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new store with custom pool configuration
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a new store with default pool configuration
    pub async fn with_defaults(database_url: &str) -> Result<Self, AppError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Migration(e.to_string())))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool (for testing)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Parse a database row into a SpendAccount
    fn row_to_account(row: &sqlx::postgres::PgRow) -> SpendAccount {
        SpendAccount {
            account_id: row.get("account_id"),
            owner: row.get("owner_address"),
            approver: row.get("approver_address"),
            label: row.get("label"),
            budget_per_period: row.get("budget_per_period"),
            per_tx_limit: row.get("per_tx_limit"),
            daily_limit: row.get("daily_limit"),
            approval_threshold: row.get("approval_threshold"),
            period_spent: row.get("period_spent"),
            period_reserved: row.get("period_reserved"),
            daily_spent: row.get("daily_spent"),
            daily_reserved: row.get("daily_reserved"),
            period_start: row.get("period_start"),
            daily_reset_at: row.get("daily_reset_at"),
            frozen: row.get("frozen"),
            closed: row.get("closed"),
            allowed_chains: row.get("allowed_chains"),
            auto_topup_threshold: row.get("auto_topup_threshold"),
            auto_topup_amount: row.get("auto_topup_amount"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    /// Parse a database row into a SpendRequest
    fn row_to_request(row: &sqlx::postgres::PgRow) -> SpendRequest {
        let status_str: String = row.get("status");

        SpendRequest {
            id: row.get("id"),
            request_id: row.get("request_id"),
            account_id: row.get("account_id"),
            requester_address: row.get("requester_address"),
            amount: row.get("amount"),
            destination_chain_id: row.get("destination_chain_id"),
            destination_address: row.get("destination_address"),
            description: row.get("description"),
            status: status_str.parse().unwrap_or(RequestStatus::PendingApproval),
            requested_at: row.get("requested_at"),
            approved_at: row.get("approved_at"),
            executed_at: row.get("executed_at"),
            rail_transfer_id: row.get("rail_transfer_id"),
            destination_mint_tx_hash: row.get("destination_mint_tx_hash"),
            source_settlement_tx_hash: row.get("source_settlement_tx_hash"),
            failure_reason: row.get("failure_reason"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

const REQUEST_COLUMNS: &str = "id, request_id, account_id, requester_address, amount, \
     destination_chain_id, destination_address, description, status, \
     requested_at, approved_at, executed_at, rail_transfer_id, \
     destination_mint_tx_hash, source_settlement_tx_hash, failure_reason, \
     created_at, updated_at";

#[async_trait]
impl MirrorStore for PostgresStore {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self, account), fields(account_id = account.account_id))]
    async fn upsert_account(&self, account: &SpendAccount) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO spend_accounts (
                account_id, owner_address, approver_address, label,
                budget_per_period, per_tx_limit, daily_limit, approval_threshold,
                period_spent, period_reserved, daily_spent, daily_reserved,
                period_start, daily_reset_at, frozen, closed, allowed_chains,
                auto_topup_threshold, auto_topup_amount, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                    $13, $14, $15, $16, $17, $18, $19, $20, $21)
            ON CONFLICT (account_id) DO UPDATE SET
                owner_address = EXCLUDED.owner_address,
                approver_address = EXCLUDED.approver_address,
                label = EXCLUDED.label,
                budget_per_period = EXCLUDED.budget_per_period,
                per_tx_limit = EXCLUDED.per_tx_limit,
                daily_limit = EXCLUDED.daily_limit,
                approval_threshold = EXCLUDED.approval_threshold,
                period_spent = EXCLUDED.period_spent,
                period_reserved = EXCLUDED.period_reserved,
                daily_spent = EXCLUDED.daily_spent,
                daily_reserved = EXCLUDED.daily_reserved,
                period_start = EXCLUDED.period_start,
                daily_reset_at = EXCLUDED.daily_reset_at,
                frozen = EXCLUDED.frozen,
                closed = EXCLUDED.closed,
                allowed_chains = EXCLUDED.allowed_chains,
                auto_topup_threshold = EXCLUDED.auto_topup_threshold,
                auto_topup_amount = EXCLUDED.auto_topup_amount,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(account.account_id)
        .bind(&account.owner)
        .bind(&account.approver)
        .bind(&account.label)
        .bind(&account.budget_per_period)
        .bind(&account.per_tx_limit)
        .bind(&account.daily_limit)
        .bind(&account.approval_threshold)
        .bind(&account.period_spent)
        .bind(&account.period_reserved)
        .bind(&account.daily_spent)
        .bind(&account.daily_reserved)
        .bind(account.period_start)
        .bind(account.daily_reset_at)
        .bind(account.frozen)
        .bind(account.closed)
        .bind(&account.allowed_chains)
        .bind(&account.auto_topup_threshold)
        .bind(&account.auto_topup_amount)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_account(&self, account_id: i64) -> Result<Option<SpendAccount>, AppError> {
        let row = sqlx::query("SELECT * FROM spend_accounts WHERE account_id = $1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        Ok(row.as_ref().map(Self::row_to_account))
    }

    #[instrument(skip(self, request), fields(request_id = request.request_id))]
    async fn insert_request(&self, request: &SpendRequest) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO spend_requests (
                id, request_id, account_id, requester_address, amount,
                destination_chain_id, destination_address, description, status,
                requested_at, approved_at, executed_at, rail_transfer_id,
                destination_mint_tx_hash, source_settlement_tx_hash,
                failure_reason, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                    $13, $14, $15, $16, $17, $18)
            ON CONFLICT (request_id) DO NOTHING
            "#,
        )
        .bind(&request.id)
        .bind(request.request_id)
        .bind(request.account_id)
        .bind(&request.requester_address)
        .bind(&request.amount)
        .bind(request.destination_chain_id)
        .bind(&request.destination_address)
        .bind(&request.description)
        .bind(request.status.as_str())
        .bind(request.requested_at)
        .bind(request.approved_at)
        .bind(request.executed_at)
        .bind(&request.rail_transfer_id)
        .bind(&request.destination_mint_tx_hash)
        .bind(&request.source_settlement_tx_hash)
        .bind(&request.failure_reason)
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn get_request(&self, request_id: i64) -> Result<Option<SpendRequest>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM spend_requests WHERE request_id = $1",
            REQUEST_COLUMNS
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        Ok(row.as_ref().map(Self::row_to_request))
    }

    #[instrument(skip(self, filter))]
    async fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<SpendRequest>, AppError> {
        // Clamp limit to valid range
        let limit = filter.limit.unwrap_or(50).clamp(1, 100);

        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM spend_requests
            WHERE ($1::BIGINT IS NULL OR account_id = $1)
              AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY requested_at DESC
            LIMIT $3
            "#,
            REQUEST_COLUMNS
        ))
        .bind(filter.account_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        Ok(rows.iter().map(Self::row_to_request).collect())
    }

    #[instrument(skip(self))]
    async fn mark_request_approved(
        &self,
        request_id: i64,
        approved_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE spend_requests
            SET status = $1, approved_at = $2, updated_at = NOW()
            WHERE request_id = $3
            "#,
        )
        .bind(RequestStatus::Approved.as_str())
        .bind(approved_at)
        .bind(request_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        if result.rows_affected() == 0 {
            return Err(AppError::Database(DatabaseError::NotFound(format!(
                "request {}",
                request_id
            ))));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_request_executing(&self, request_id: i64) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE spend_requests
            SET status = $1, updated_at = NOW()
            WHERE request_id = $2
            "#,
        )
        .bind(RequestStatus::Executing.as_str())
        .bind(request_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        if result.rows_affected() == 0 {
            return Err(AppError::Database(DatabaseError::NotFound(format!(
                "request {}",
                request_id
            ))));
        }
        Ok(())
    }

    #[instrument(skip(self, rail_transfer_id, mint_tx_hash, settlement_tx_hash))]
    async fn mark_request_executed(
        &self,
        request_id: i64,
        rail_transfer_id: Option<&str>,
        mint_tx_hash: Option<&str>,
        settlement_tx_hash: Option<&str>,
        executed_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE spend_requests
            SET status = $1,
                rail_transfer_id = COALESCE($2, rail_transfer_id),
                destination_mint_tx_hash = COALESCE($3, destination_mint_tx_hash),
                source_settlement_tx_hash = COALESCE($4, source_settlement_tx_hash),
                executed_at = $5,
                updated_at = NOW()
            WHERE request_id = $6
            "#,
        )
        .bind(RequestStatus::Executed.as_str())
        .bind(rail_transfer_id)
        .bind(mint_tx_hash)
        .bind(settlement_tx_hash)
        .bind(executed_at)
        .bind(request_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        if result.rows_affected() == 0 {
            return Err(AppError::Database(DatabaseError::NotFound(format!(
                "request {}",
                request_id
            ))));
        }
        Ok(())
    }

    #[instrument(skip(self, reason))]
    async fn mark_request_rejected(&self, request_id: i64, reason: &str) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE spend_requests
            SET status = $1, failure_reason = $2, updated_at = NOW()
            WHERE request_id = $3
            "#,
        )
        .bind(RequestStatus::Rejected.as_str())
        .bind(reason)
        .bind(request_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        if result.rows_affected() == 0 {
            return Err(AppError::Database(DatabaseError::NotFound(format!(
                "request {}",
                request_id
            ))));
        }
        Ok(())
    }

    #[instrument(skip(self, reason))]
    async fn mark_request_failed(&self, request_id: i64, reason: &str) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE spend_requests
            SET status = $1, failure_reason = $2, updated_at = NOW()
            WHERE request_id = $3
            "#,
        )
        .bind(RequestStatus::Failed.as_str())
        .bind(reason)
        .bind(request_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        if result.rows_affected() == 0 {
            return Err(AppError::Database(DatabaseError::NotFound(format!(
                "request {}",
                request_id
            ))));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_stuck_requests(
        &self,
        idle_for_secs: i64,
        limit: i64,
    ) -> Result<Vec<SpendRequest>, AppError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM spend_requests
            WHERE status IN ($1, $2)
              AND updated_at < NOW() - ($3 * INTERVAL '1 second')
            ORDER BY updated_at ASC
            LIMIT $4
            "#,
            REQUEST_COLUMNS
        ))
        .bind(RequestStatus::Approved.as_str())
        .bind(RequestStatus::Executing.as_str())
        .bind(idle_for_secs)
        .bind(limit.clamp(1, 100))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        Ok(rows.iter().map(Self::row_to_request).collect())
    }
}
