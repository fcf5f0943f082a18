// src/adapters/postgres.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::{
    Amount, Balance, DatabaseConfig, HistoryEntry, HistoryFilter, LedgerStore, NewHistoryEntry,
    NewSource, OperationKind, OwnerKey, OwnerKind, PageRequest, Source, SourceStore, StoreError,
};

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            sqlx::Error::PoolTimedOut => StoreError::Timeout,
            sqlx::Error::PoolClosed => StoreError::Unavailable(err.to_string()),
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

/// PostgreSQL ledger and source store.
///
/// Schema:
/// ```sql
/// CREATE TABLE cashback_sources (
///     id uuid PRIMARY KEY,
///     slug TEXT NOT NULL,
///     host_ip TEXT NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL,
///     updated_at TIMESTAMPTZ NOT NULL,
///     deleted_at TIMESTAMPTZ
/// );
/// -- get-or-create relies on this to detect racing inserts
/// CREATE UNIQUE INDEX idx_cashback_sources_slug ON cashback_sources(slug) WHERE deleted_at IS NULL;
///
/// CREATE TABLE cashback_balances (
///     id uuid PRIMARY KEY,
///     owner_kind TEXT NOT NULL,
///     owner_id BIGINT NOT NULL,
///     amount BIGINT NOT NULL CHECK (amount >= 0),
///     created_at TIMESTAMPTZ NOT NULL,
///     updated_at TIMESTAMPTZ NOT NULL,
///     deleted_at TIMESTAMPTZ
/// );
/// CREATE UNIQUE INDEX idx_cashback_balances_owner
///     ON cashback_balances(owner_kind, owner_id) WHERE deleted_at IS NULL;
///
/// -- seq is commit order; paging walks it backwards
/// CREATE TABLE cashback_history (
///     id uuid PRIMARY KEY,
///     seq BIGSERIAL NOT NULL,
///     balance_id uuid NOT NULL REFERENCES cashback_balances(id),
///     source_id uuid NOT NULL REFERENCES cashback_sources(id),
///     amount BIGINT NOT NULL CHECK (amount > 0),
///     kind TEXT NOT NULL,
///     host_ip TEXT NOT NULL,
///     device TEXT NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL
/// );
/// CREATE INDEX idx_cashback_history_balance ON cashback_history(balance_id, seq DESC);
/// ```
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url())
            .await?;

        info!(host = %config.host, port = config.port, db = %config.name, "connected to postgres");
        Ok(Self::from_pool(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cashback_sources (
                id UUID PRIMARY KEY,
                slug TEXT NOT NULL,
                host_ip TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                deleted_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_cashback_sources_slug
                ON cashback_sources(slug) WHERE deleted_at IS NULL
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cashback_balances (
                id UUID PRIMARY KEY,
                owner_kind TEXT NOT NULL CHECK (owner_kind IN ('turon', 'cinerama')),
                owner_id BIGINT NOT NULL,
                amount BIGINT NOT NULL CHECK (amount >= 0),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                deleted_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_cashback_balances_owner
                ON cashback_balances(owner_kind, owner_id) WHERE deleted_at IS NULL
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cashback_history (
                id UUID PRIMARY KEY,
                seq BIGSERIAL NOT NULL,
                balance_id UUID NOT NULL REFERENCES cashback_balances(id),
                source_id UUID NOT NULL REFERENCES cashback_sources(id),
                amount BIGINT NOT NULL CHECK (amount > 0),
                kind TEXT NOT NULL CHECK (kind IN ('increase', 'decrease')),
                host_ip TEXT NOT NULL,
                device TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_cashback_history_balance
                ON cashback_history(balance_id, seq DESC)
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_cashback_history_created
                ON cashback_history(balance_id, created_at)
            "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    fn map_balance(row: PgRow) -> Result<Balance, StoreError> {
        let kind: String = row.try_get("owner_kind")?;
        let kind = kind
            .parse::<OwnerKind>()
            .map_err(|_| StoreError::Backend(format!("unknown owner kind {kind}")))?;

        Ok(Balance {
            id: row.try_get("id")?,
            owner: OwnerKey {
                kind,
                id: row.try_get("owner_id")?,
            },
            amount: Amount::from_minor(row.try_get("amount")?)
                .map_err(|_| StoreError::Backend("negative balance amount".to_string()))?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }

    fn map_history(row: PgRow) -> Result<HistoryEntry, StoreError> {
        let kind: String = row.try_get("kind")?;
        let kind = OperationKind::parse(&kind)
            .ok_or_else(|| StoreError::Backend(format!("unknown operation kind {kind}")))?;

        Ok(HistoryEntry {
            id: row.try_get("id")?,
            balance_id: row.try_get("balance_id")?,
            source_id: row.try_get("source_id")?,
            source_slug: row.try_get("source_slug")?,
            amount: Amount::from_minor(row.try_get("amount")?)
                .map_err(|_| StoreError::Backend("negative history amount".to_string()))?,
            kind,
            host_ip: row.try_get("host_ip")?,
            device: row.try_get("device")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn map_source(row: PgRow) -> Result<Source, StoreError> {
        Ok(Source {
            id: row.try_get("id")?,
            slug: row.try_get("slug")?,
            host_ip: row.try_get("host_ip")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }
}

#[async_trait]
impl LedgerStore for PostgresStore {
    async fn get_balance(&self, owner: OwnerKey) -> Result<Option<Balance>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_kind, owner_id, amount, created_at, updated_at, deleted_at
            FROM cashback_balances
            WHERE owner_kind = $1 AND owner_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(owner.kind.slug())
        .bind(owner.id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::map_balance).transpose()
    }

    async fn create_balance(
        &self,
        owner: OwnerKey,
        amount: Amount,
    ) -> Result<Balance, StoreError> {
        let balance = Balance::new(owner, amount);

        sqlx::query(
            r#"
            INSERT INTO cashback_balances (id, owner_kind, owner_id, amount, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(balance.id)
        .bind(owner.kind.slug())
        .bind(owner.id)
        .bind(amount.minor())
        .bind(balance.created_at)
        .bind(balance.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(balance)
    }

    async fn update_balance_amount(
        &self,
        balance_id: Uuid,
        amount: Amount,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE cashback_balances
            SET amount = $1, updated_at = NOW()
            WHERE id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(amount.minor())
        .bind(balance_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Backend(format!("balance {balance_id} not found")));
        }
        Ok(())
    }

    async fn append_history(&self, entry: NewHistoryEntry) -> Result<HistoryEntry, StoreError> {
        let row = sqlx::query(
            r#"
            WITH inserted AS (
                INSERT INTO cashback_history
                    (id, balance_id, source_id, amount, kind, host_ip, device, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
                RETURNING id, balance_id, source_id, amount, kind, host_ip, device, created_at
            )
            SELECT i.*, s.slug AS source_slug
            FROM inserted i
            LEFT JOIN cashback_sources s ON s.id = i.source_id AND s.deleted_at IS NULL
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(entry.balance_id)
        .bind(entry.source_id)
        .bind(entry.amount.minor())
        .bind(entry.kind.as_str())
        .bind(&entry.origin.host_ip)
        .bind(&entry.origin.device)
        .fetch_one(&self.pool)
        .await?;

        Self::map_history(row)
    }

    async fn get_history(
        &self,
        owner: OwnerKey,
        filter: &HistoryFilter,
        page: &PageRequest,
    ) -> Result<(Vec<HistoryEntry>, i64), StoreError> {
        let from: Option<DateTime<Utc>> = filter.lower_bound();
        let until: Option<DateTime<Utc>> = filter.upper_bound();

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM cashback_history h
            JOIN cashback_balances b ON b.id = h.balance_id
            WHERE b.owner_kind = $1 AND b.owner_id = $2
              AND ($3::timestamptz IS NULL OR h.created_at >= $3)
              AND ($4::timestamptz IS NULL OR h.created_at < $4)
            "#,
        )
        .bind(owner.kind.slug())
        .bind(owner.id)
        .bind(from)
        .bind(until)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(
            r#"
            SELECT h.id, h.balance_id, h.source_id, s.slug AS source_slug, h.amount, h.kind,
                   h.host_ip, h.device, h.created_at
            FROM cashback_history h
            JOIN cashback_balances b ON b.id = h.balance_id
            LEFT JOIN cashback_sources s ON s.id = h.source_id AND s.deleted_at IS NULL
            WHERE b.owner_kind = $1 AND b.owner_id = $2
              AND ($3::timestamptz IS NULL OR h.created_at >= $3)
              AND ($4::timestamptz IS NULL OR h.created_at < $4)
            ORDER BY h.seq DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(owner.kind.slug())
        .bind(owner.id)
        .bind(from)
        .bind(until)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let entries = rows
            .into_iter()
            .map(Self::map_history)
            .collect::<Result<Vec<_>, _>>()?;

        Ok((entries, total))
    }
}

#[async_trait]
impl SourceStore for PostgresStore {
    async fn get_source_by_slug(&self, slug: &str) -> Result<Option<Source>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, slug, host_ip, created_at, updated_at, deleted_at
            FROM cashback_sources
            WHERE slug = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::map_source).transpose()
    }

    async fn create_source(&self, source: NewSource) -> Result<Source, StoreError> {
        let source = Source::from_new(source);

        sqlx::query(
            r#"
            INSERT INTO cashback_sources (id, slug, host_ip, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(source.id)
        .bind(&source.slug)
        .bind(&source.host_ip)
        .bind(source.created_at)
        .bind(source.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(source)
    }
}
