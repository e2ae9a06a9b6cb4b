use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    PgPool, Row,
    postgres::{PgPoolOptions, PgRow},
};
use uuid::Uuid;

use crate::{
    OrderDocument, OrderId, OrderQuery, OrderStoreError, ParkedCallback, Result, SubjectId,
    Version, store::OrderStore,
};

const PRIMARY_KEY_CONSTRAINT: &str = "orders_pkey";
const PROVIDER_REF_CONSTRAINT: &str = "idx_orders_provider_ref";

/// PostgreSQL-backed order store.
///
/// Orders live in a single `orders` table as JSONB documents, with the
/// filterable fields duplicated into indexed columns. Early provider
/// callbacks wait in `parked_callbacks`, keyed by ref.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to the database at `url` with a bounded pool.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_document(row: PgRow) -> Result<OrderDocument> {
        Ok(OrderDocument {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            owner_id: SubjectId::new(row.try_get::<String, _>("owner_id")?),
            provider_ref: row.try_get("provider_ref")?,
            version: Version::new(row.try_get("version")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            body: row.try_get("document")?,
        })
    }

    fn map_write_error(err: sqlx::Error, document: &OrderDocument) -> OrderStoreError {
        if let sqlx::Error::Database(ref db_err) = err
            && db_err.is_unique_violation()
        {
            match db_err.constraint() {
                Some(PRIMARY_KEY_CONSTRAINT) => {
                    return OrderStoreError::AlreadyExists(document.id);
                }
                Some(PROVIDER_REF_CONSTRAINT) => {
                    return OrderStoreError::DuplicateProviderRef(
                        document.provider_ref.clone().unwrap_or_default(),
                    );
                }
                _ => {}
            }
        }
        OrderStoreError::Database(err)
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn insert(&self, document: OrderDocument) -> Result<Version> {
        let version = Version::first();

        sqlx::query(
            r#"
            INSERT INTO orders (id, owner_id, provider_ref, version, created_at, updated_at, document)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(document.id.as_uuid())
        .bind(document.owner_id.as_str())
        .bind(document.provider_ref.as_deref())
        .bind(version.as_i64())
        .bind(document.created_at)
        .bind(document.updated_at)
        .bind(&document.body)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_write_error(e, &document))?;

        Ok(version)
    }

    async fn get(&self, id: OrderId) -> Result<Option<OrderDocument>> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, provider_ref, version, created_at, updated_at, document
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_document).transpose()
    }

    async fn find_by_provider_ref(&self, provider_ref: &str) -> Result<Option<OrderDocument>> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, provider_ref, version, created_at, updated_at, document
            FROM orders
            WHERE provider_ref = $1
            "#,
        )
        .bind(provider_ref)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_document).transpose()
    }

    async fn update(&self, document: OrderDocument, expected: Version) -> Result<Version> {
        let mut tx = self.pool.begin().await?;

        // Lock the row so the version check and the write are atomic
        let current: Option<i64> =
            sqlx::query_scalar("SELECT version FROM orders WHERE id = $1 FOR UPDATE")
                .bind(document.id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;

        let actual = Version::new(current.ok_or(OrderStoreError::NotFound(document.id))?);
        if actual != expected {
            return Err(OrderStoreError::ConcurrencyConflict {
                order_id: document.id,
                expected,
                actual,
            });
        }

        let new_version = expected.next();
        sqlx::query(
            r#"
            UPDATE orders
            SET provider_ref = $2, version = $3, updated_at = $4, document = $5
            WHERE id = $1
            "#,
        )
        .bind(document.id.as_uuid())
        .bind(document.provider_ref.as_deref())
        .bind(new_version.as_i64())
        .bind(document.updated_at)
        .bind(&document.body)
        .execute(&mut *tx)
        .await
        .map_err(|e| Self::map_write_error(e, &document))?;

        tx.commit().await?;
        Ok(new_version)
    }

    async fn query(&self, query: OrderQuery) -> Result<Vec<OrderDocument>> {
        let mut sql = String::from(
            "SELECT id, owner_id, provider_ref, version, created_at, updated_at, document FROM orders WHERE 1=1",
        );
        let mut param_count = 0;

        if query.owner_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND owner_id = ${param_count}"));
        }

        sql.push_str(" ORDER BY created_at DESC, id DESC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut q = sqlx::query(&sql);
        if let Some(ref owner_id) = query.owner_id {
            q = q.bind(owner_id.as_str());
        }
        if let Some(limit) = query.limit {
            q = q.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            q = q.bind(offset as i64);
        }

        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_document).collect()
    }

    async fn park_callback(&self, callback: ParkedCallback) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO parked_callbacks (provider_ref, outcome, received_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (provider_ref)
            DO UPDATE SET outcome = EXCLUDED.outcome, received_at = EXCLUDED.received_at
            "#,
        )
        .bind(&callback.provider_ref)
        .bind(&callback.outcome)
        .bind(callback.received_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn parked_callback(&self, provider_ref: &str) -> Result<Option<ParkedCallback>> {
        let row = sqlx::query(
            "SELECT provider_ref, outcome, received_at FROM parked_callbacks WHERE provider_ref = $1",
        )
        .bind(provider_ref)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(ParkedCallback {
                provider_ref: row.try_get("provider_ref")?,
                outcome: row.try_get("outcome")?,
                received_at: row.try_get("received_at")?,
            })
        })
        .transpose()
    }

    async fn discard_parked_callback(&self, provider_ref: &str) -> Result<()> {
        sqlx::query("DELETE FROM parked_callbacks WHERE provider_ref = $1")
            .bind(provider_ref)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_parked_callbacks(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM parked_callbacks WHERE received_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
