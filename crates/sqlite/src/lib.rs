//! SQLite backend for [`MarketStorage`].
//!
//! A snapshot is a sqlx transaction on one pooled connection. SQLite allows a
//! single writer, so snapshots are additionally serialized in-process through
//! an async gate; queries go straight to the pool and, with WAL journaling,
//! read the last committed state without waiting for an open snapshot.

mod rows;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use openaero_storage::{
    AssetRecord, BomItemRecord, MarketStorage, OrderRecord, OrderStatus, PaymentEventRecord,
    PaymentProvider, PaymentTransactionRecord, ReviewRecord, ReviewStatus, SolutionRecord,
    SolutionStatus, StorageError, TransactionStatus,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};

use rows::backend;

const SCHEMA: &str = include_str!("schema.sql");

/// `max_connections` used when the caller does not choose one. A snapshot
/// pins one connection, so queries need at least one more.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

pub struct SqliteStorage {
    pool: SqlitePool,
    gate: Arc<Mutex<()>>,
}

/// An open SQLite transaction plus the in-process writer slot.
pub struct SqliteSnapshot {
    tx: Transaction<'static, Sqlite>,
    _guard: OwnedMutexGuard<()>,
}

impl SqliteStorage {
    /// Connect using a `sqlite://` URL, creating the file if needed, and
    /// apply the schema.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url).map_err(backend)?;
        Self::connect_with(options, max_connections).await
    }

    /// Open (or create) a database file and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new().filename(path.as_ref());
        Self::connect_with(options, DEFAULT_MAX_CONNECTIONS).await
    }

    async fn connect_with(
        options: SqliteConnectOptions,
        max_connections: u32,
    ) -> Result<Self, StorageError> {
        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(2))
            .connect_with(options)
            .await
            .map_err(backend)?;
        let storage = Self {
            pool,
            gate: Arc::new(Mutex::new(())),
        };
        storage.apply_schema().await?;
        Ok(storage)
    }

    /// Create missing tables and indexes. Safe to run repeatedly.
    pub async fn apply_schema(&self) -> Result<(), StorageError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        tracing::debug!("sqlite schema applied");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn limit_param(limit: usize) -> i64 {
    // SQLite treats a negative LIMIT as "no limit".
    if limit == 0 {
        -1
    } else {
        i64::try_from(limit).unwrap_or(i64::MAX)
    }
}

async fn exists(
    tx: &mut Transaction<'static, Sqlite>,
    sql: &str,
    key: &str,
) -> Result<bool, StorageError> {
    let row = sqlx::query(sql)
        .bind(key)
        .fetch_optional(&mut **tx)
        .await
        .map_err(backend)?;
    Ok(row.is_some())
}

async fn require_solution(
    tx: &mut Transaction<'static, Sqlite>,
    solution_id: &str,
) -> Result<(), StorageError> {
    if exists(tx, "SELECT 1 FROM solutions WHERE id = ?", solution_id).await? {
        Ok(())
    } else {
        Err(StorageError::not_found("solution", solution_id))
    }
}

#[async_trait]
impl MarketStorage for SqliteStorage {
    type Snapshot = SqliteSnapshot;

    async fn begin_snapshot(&self) -> Result<SqliteSnapshot, StorageError> {
        let guard = self.gate.clone().lock_owned().await;
        let tx = self.pool.begin().await.map_err(backend)?;
        Ok(SqliteSnapshot { tx, _guard: guard })
    }

    async fn commit_snapshot(&self, snapshot: SqliteSnapshot) -> Result<(), StorageError> {
        let SqliteSnapshot { tx, _guard } = snapshot;
        tx.commit().await.map_err(backend)
    }

    async fn abort_snapshot(&self, snapshot: SqliteSnapshot) -> Result<(), StorageError> {
        let SqliteSnapshot { tx, _guard } = snapshot;
        tx.rollback().await.map_err(backend)
    }

    // ── Solutions ────────────────────────────────────────────────────────────

    async fn insert_solution(
        &self,
        snapshot: &mut SqliteSnapshot,
        record: SolutionRecord,
    ) -> Result<(), StorageError> {
        let tx = &mut snapshot.tx;
        if exists(tx, "SELECT 1 FROM solutions WHERE id = ?", &record.id).await? {
            return Err(StorageError::already_exists("solution", record.id));
        }
        let bom = record.bom.as_ref().map(rows::to_json_text).transpose()?;
        sqlx::query(
            "INSERT INTO solutions (id, creator_id, title, description, category, price, status, \
             version, bom, created_at, updated_at, submitted_at, reviewed_at, published_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.creator_id)
        .bind(&record.title)
        .bind(&record.description)
        .bind(&record.category)
        .bind(record.price.to_string())
        .bind(record.status.as_ref())
        .bind(record.version)
        .bind(bom)
        .bind(&record.created_at)
        .bind(&record.updated_at)
        .bind(&record.submitted_at)
        .bind(&record.reviewed_at)
        .bind(&record.published_at)
        .execute(&mut **tx)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get_solution_for_update(
        &self,
        snapshot: &mut SqliteSnapshot,
        solution_id: &str,
    ) -> Result<SolutionRecord, StorageError> {
        let row = sqlx::query("SELECT * FROM solutions WHERE id = ?")
            .bind(solution_id)
            .fetch_optional(&mut *snapshot.tx)
            .await
            .map_err(backend)?
            .ok_or_else(|| StorageError::not_found("solution", solution_id))?;
        rows::solution(&row)
    }

    async fn update_solution(
        &self,
        snapshot: &mut SqliteSnapshot,
        record: SolutionRecord,
        expected_version: i64,
    ) -> Result<i64, StorageError> {
        let new_version = expected_version + 1;
        let bom = record.bom.as_ref().map(rows::to_json_text).transpose()?;
        let result = sqlx::query(
            "UPDATE solutions SET creator_id = ?, title = ?, description = ?, category = ?, \
             price = ?, status = ?, version = ?, bom = ?, created_at = ?, updated_at = ?, \
             submitted_at = ?, reviewed_at = ?, published_at = ? \
             WHERE id = ? AND version = ?",
        )
        .bind(&record.creator_id)
        .bind(&record.title)
        .bind(&record.description)
        .bind(&record.category)
        .bind(record.price.to_string())
        .bind(record.status.as_ref())
        .bind(new_version)
        .bind(bom)
        .bind(&record.created_at)
        .bind(&record.updated_at)
        .bind(&record.submitted_at)
        .bind(&record.reviewed_at)
        .bind(&record.published_at)
        .bind(&record.id)
        .bind(expected_version)
        .execute(&mut *snapshot.tx)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            // Distinguish a missing row from a stale version.
            require_solution(&mut snapshot.tx, &record.id).await?;
            return Err(StorageError::ConcurrentConflict {
                solution_id: record.id,
                expected_version,
            });
        }
        Ok(new_version)
    }

    // ── Reviews ──────────────────────────────────────────────────────────────

    async fn insert_review(
        &self,
        snapshot: &mut SqliteSnapshot,
        record: ReviewRecord,
    ) -> Result<(), StorageError> {
        let tx = &mut snapshot.tx;
        require_solution(tx, &record.solution_id).await?;
        if exists(tx, "SELECT 1 FROM solution_reviews WHERE id = ?", &record.id).await? {
            return Err(StorageError::already_exists("review", record.id));
        }
        if record.status == ReviewStatus::InProgress
            && exists(
                tx,
                "SELECT 1 FROM solution_reviews WHERE solution_id = ? AND status = 'IN_PROGRESS'",
                &record.solution_id,
            )
            .await?
        {
            return Err(StorageError::already_exists(
                "in-progress review",
                record.solution_id,
            ));
        }
        sqlx::query(
            "INSERT INTO solution_reviews (id, solution_id, reviewer_id, status, decision, \
             from_status, to_status, quality_score, completeness_score, innovation_score, \
             market_potential_score, comments, suggestions, started_at, completed_at, \
             created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.solution_id)
        .bind(&record.reviewer_id)
        .bind(record.status.as_ref())
        .bind(record.decision.as_ref())
        .bind(record.from_status.as_ref())
        .bind(record.to_status.map(|s| s.to_string()))
        .bind(record.quality_score)
        .bind(record.completeness_score)
        .bind(record.innovation_score)
        .bind(record.market_potential_score)
        .bind(&record.comments)
        .bind(&record.suggestions)
        .bind(&record.started_at)
        .bind(&record.completed_at)
        .bind(&record.created_at)
        .bind(&record.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn find_in_progress_review(
        &self,
        snapshot: &mut SqliteSnapshot,
        solution_id: &str,
    ) -> Result<Option<ReviewRecord>, StorageError> {
        let row = sqlx::query(
            "SELECT * FROM solution_reviews WHERE solution_id = ? AND status = 'IN_PROGRESS'",
        )
        .bind(solution_id)
        .fetch_optional(&mut *snapshot.tx)
        .await
        .map_err(backend)?;
        row.as_ref().map(rows::review).transpose()
    }

    async fn update_review(
        &self,
        snapshot: &mut SqliteSnapshot,
        record: ReviewRecord,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE solution_reviews SET solution_id = ?, reviewer_id = ?, status = ?, \
             decision = ?, from_status = ?, to_status = ?, quality_score = ?, \
             completeness_score = ?, innovation_score = ?, market_potential_score = ?, \
             comments = ?, suggestions = ?, started_at = ?, completed_at = ?, created_at = ?, \
             updated_at = ? WHERE id = ?",
        )
        .bind(&record.solution_id)
        .bind(&record.reviewer_id)
        .bind(record.status.as_ref())
        .bind(record.decision.as_ref())
        .bind(record.from_status.as_ref())
        .bind(record.to_status.map(|s| s.to_string()))
        .bind(record.quality_score)
        .bind(record.completeness_score)
        .bind(record.innovation_score)
        .bind(record.market_potential_score)
        .bind(&record.comments)
        .bind(&record.suggestions)
        .bind(&record.started_at)
        .bind(&record.completed_at)
        .bind(&record.created_at)
        .bind(&record.updated_at)
        .bind(&record.id)
        .execute(&mut *snapshot.tx)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("review", record.id));
        }
        Ok(())
    }

    // ── BOM and assets ───────────────────────────────────────────────────────

    async fn replace_bom_items(
        &self,
        snapshot: &mut SqliteSnapshot,
        solution_id: &str,
        items: Vec<BomItemRecord>,
    ) -> Result<(), StorageError> {
        let tx = &mut snapshot.tx;
        require_solution(tx, solution_id).await?;
        sqlx::query("DELETE FROM solution_bom_items WHERE solution_id = ?")
            .bind(solution_id)
            .execute(&mut **tx)
            .await
            .map_err(backend)?;
        for item in items {
            if exists(tx, "SELECT 1 FROM solution_bom_items WHERE id = ?", &item.id).await? {
                return Err(StorageError::already_exists("bom item", item.id));
            }
            sqlx::query(
                "INSERT INTO solution_bom_items (id, solution_id, position, name, model, \
                 manufacturer, quantity, unit_price, weight_grams, category, supplier, link, \
                 notes, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&item.id)
            .bind(&item.solution_id)
            .bind(item.position)
            .bind(&item.name)
            .bind(&item.model)
            .bind(&item.manufacturer)
            .bind(item.quantity)
            .bind(rows::opt_decimal_text(item.unit_price))
            .bind(rows::opt_decimal_text(item.weight_grams))
            .bind(&item.category)
            .bind(&item.supplier)
            .bind(&item.link)
            .bind(&item.notes)
            .bind(&item.created_at)
            .execute(&mut **tx)
            .await
            .map_err(backend)?;
        }
        Ok(())
    }

    async fn insert_asset(
        &self,
        snapshot: &mut SqliteSnapshot,
        record: AssetRecord,
    ) -> Result<(), StorageError> {
        let tx = &mut snapshot.tx;
        require_solution(tx, &record.solution_id).await?;
        if exists(tx, "SELECT 1 FROM solution_assets WHERE id = ?", &record.id).await? {
            return Err(StorageError::already_exists("asset", record.id));
        }
        sqlx::query(
            "INSERT INTO solution_assets (id, solution_id, kind, url, title, description, \
             created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.solution_id)
        .bind(record.kind.as_ref())
        .bind(&record.url)
        .bind(&record.title)
        .bind(&record.description)
        .bind(&record.created_at)
        .execute(&mut **tx)
        .await
        .map_err(backend)?;
        Ok(())
    }

    // ── Orders and payments ──────────────────────────────────────────────────

    async fn insert_order(
        &self,
        snapshot: &mut SqliteSnapshot,
        record: OrderRecord,
    ) -> Result<(), StorageError> {
        let tx = &mut snapshot.tx;
        require_solution(tx, &record.solution_id).await?;
        if exists(tx, "SELECT 1 FROM orders WHERE id = ?", &record.id).await? {
            return Err(StorageError::already_exists("order", record.id));
        }
        sqlx::query(
            "INSERT INTO orders (id, buyer_id, solution_id, amount, currency, status, \
             created_at, updated_at, confirmed_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.buyer_id)
        .bind(&record.solution_id)
        .bind(record.amount.to_string())
        .bind(&record.currency)
        .bind(record.status.as_ref())
        .bind(&record.created_at)
        .bind(&record.updated_at)
        .bind(&record.confirmed_at)
        .execute(&mut **tx)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get_order_for_update(
        &self,
        snapshot: &mut SqliteSnapshot,
        order_id: &str,
    ) -> Result<OrderRecord, StorageError> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = ?")
            .bind(order_id)
            .fetch_optional(&mut *snapshot.tx)
            .await
            .map_err(backend)?
            .ok_or_else(|| StorageError::not_found("order", order_id))?;
        rows::order(&row)
    }

    async fn update_order_status(
        &self,
        snapshot: &mut SqliteSnapshot,
        order_id: &str,
        expected: OrderStatus,
        new: OrderStatus,
        at: &str,
    ) -> Result<(), StorageError> {
        let current = self.get_order_for_update(snapshot, order_id).await?;
        if current.status != expected {
            return Err(StorageError::StatusConflict {
                record: "order",
                id: order_id.to_string(),
                expected: expected.to_string(),
                actual: current.status.to_string(),
            });
        }
        let confirmed_at = if new == OrderStatus::Confirmed {
            Some(at)
        } else {
            current.confirmed_at.as_deref()
        };
        sqlx::query(
            "UPDATE orders SET status = ?, updated_at = ?, confirmed_at = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(new.as_ref())
        .bind(at)
        .bind(confirmed_at)
        .bind(order_id)
        .bind(expected.as_ref())
        .execute(&mut *snapshot.tx)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn insert_transaction(
        &self,
        snapshot: &mut SqliteSnapshot,
        record: PaymentTransactionRecord,
    ) -> Result<(), StorageError> {
        let tx = &mut snapshot.tx;
        if !exists(tx, "SELECT 1 FROM orders WHERE id = ?", &record.order_id).await? {
            return Err(StorageError::not_found("order", record.order_id));
        }
        if exists(tx, "SELECT 1 FROM payment_transactions WHERE id = ?", &record.id).await? {
            return Err(StorageError::already_exists("transaction", record.id));
        }
        let taken = sqlx::query(
            "SELECT 1 FROM payment_transactions WHERE provider = ? AND external_id = ?",
        )
        .bind(record.provider.as_ref())
        .bind(&record.external_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(backend)?;
        if taken.is_some() {
            return Err(StorageError::already_exists(
                "transaction",
                format!("{}/{}", record.provider, record.external_id),
            ));
        }
        sqlx::query(
            "INSERT INTO payment_transactions (id, order_id, provider, external_id, amount, \
             currency, status, provider_trade_no, created_at, updated_at, completed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.order_id)
        .bind(record.provider.as_ref())
        .bind(&record.external_id)
        .bind(record.amount.to_string())
        .bind(&record.currency)
        .bind(record.status.as_ref())
        .bind(&record.provider_trade_no)
        .bind(&record.created_at)
        .bind(&record.updated_at)
        .bind(&record.completed_at)
        .execute(&mut **tx)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get_transaction_by_external_id_for_update(
        &self,
        snapshot: &mut SqliteSnapshot,
        provider: PaymentProvider,
        external_id: &str,
    ) -> Result<PaymentTransactionRecord, StorageError> {
        let row = sqlx::query(
            "SELECT * FROM payment_transactions WHERE provider = ? AND external_id = ?",
        )
        .bind(provider.as_ref())
        .bind(external_id)
        .fetch_optional(&mut *snapshot.tx)
        .await
        .map_err(backend)?
        .ok_or_else(|| StorageError::not_found("transaction", format!("{provider}/{external_id}")))?;
        rows::transaction(&row)
    }

    async fn update_transaction_status(
        &self,
        snapshot: &mut SqliteSnapshot,
        transaction_id: &str,
        expected: TransactionStatus,
        new: TransactionStatus,
        provider_trade_no: Option<&str>,
        at: &str,
    ) -> Result<(), StorageError> {
        let row = sqlx::query("SELECT * FROM payment_transactions WHERE id = ?")
            .bind(transaction_id)
            .fetch_optional(&mut *snapshot.tx)
            .await
            .map_err(backend)?
            .ok_or_else(|| StorageError::not_found("transaction", transaction_id))?;
        let current = rows::transaction(&row)?;
        if current.status != expected {
            return Err(StorageError::StatusConflict {
                record: "transaction",
                id: transaction_id.to_string(),
                expected: expected.to_string(),
                actual: current.status.to_string(),
            });
        }
        let trade_no = provider_trade_no.or(current.provider_trade_no.as_deref());
        let completed_at = if new == TransactionStatus::Completed {
            Some(at)
        } else {
            current.completed_at.as_deref()
        };
        sqlx::query(
            "UPDATE payment_transactions SET status = ?, provider_trade_no = ?, updated_at = ?, \
             completed_at = ? WHERE id = ? AND status = ?",
        )
        .bind(new.as_ref())
        .bind(trade_no)
        .bind(at)
        .bind(completed_at)
        .bind(transaction_id)
        .bind(expected.as_ref())
        .execute(&mut *snapshot.tx)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn append_payment_event(
        &self,
        snapshot: &mut SqliteSnapshot,
        record: PaymentEventRecord,
    ) -> Result<(), StorageError> {
        let tx = &mut snapshot.tx;
        if let Some(tx_id) = &record.transaction_id {
            if !exists(tx, "SELECT 1 FROM payment_transactions WHERE id = ?", tx_id).await? {
                return Err(StorageError::not_found("transaction", tx_id.clone()));
            }
        }
        if exists(tx, "SELECT 1 FROM payment_events WHERE id = ?", &record.id).await? {
            return Err(StorageError::already_exists("payment event", record.id));
        }
        let payload = rows::to_json_text(&record.payload)?;
        sqlx::query(
            "INSERT INTO payment_events (id, transaction_id, provider, kind, message, payload, \
             created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.transaction_id)
        .bind(record.provider.as_ref())
        .bind(record.kind.as_ref())
        .bind(&record.message)
        .bind(payload)
        .bind(&record.created_at)
        .execute(&mut **tx)
        .await
        .map_err(backend)?;
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    async fn get_solution(&self, solution_id: &str) -> Result<SolutionRecord, StorageError> {
        let row = sqlx::query("SELECT * FROM solutions WHERE id = ?")
            .bind(solution_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or_else(|| StorageError::not_found("solution", solution_id))?;
        rows::solution(&row)
    }

    async fn list_solutions(
        &self,
        status: Option<SolutionStatus>,
        limit: usize,
    ) -> Result<Vec<SolutionRecord>, StorageError> {
        let found = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM solutions WHERE status = ? ORDER BY created_at, id LIMIT ?",
                )
                .bind(status.as_ref())
                .bind(limit_param(limit))
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT * FROM solutions ORDER BY created_at, id LIMIT ?")
                    .bind(limit_param(limit))
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(backend)?;
        found.iter().map(rows::solution).collect()
    }

    async fn list_reviews(&self, solution_id: &str) -> Result<Vec<ReviewRecord>, StorageError> {
        let found = sqlx::query(
            "SELECT * FROM solution_reviews WHERE solution_id = ? ORDER BY started_at, id",
        )
        .bind(solution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        found.iter().map(rows::review).collect()
    }

    async fn list_bom_items(
        &self,
        solution_id: &str,
    ) -> Result<Vec<BomItemRecord>, StorageError> {
        let found = sqlx::query(
            "SELECT * FROM solution_bom_items WHERE solution_id = ? ORDER BY position, id",
        )
        .bind(solution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        found.iter().map(rows::bom_item).collect()
    }

    async fn list_assets(&self, solution_id: &str) -> Result<Vec<AssetRecord>, StorageError> {
        let found = sqlx::query("SELECT * FROM solution_assets WHERE solution_id = ? ORDER BY seq")
            .bind(solution_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        found.iter().map(rows::asset).collect()
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderRecord, StorageError> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = ?")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or_else(|| StorageError::not_found("order", order_id))?;
        rows::order(&row)
    }

    async fn get_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<PaymentTransactionRecord, StorageError> {
        let row = sqlx::query("SELECT * FROM payment_transactions WHERE id = ?")
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or_else(|| StorageError::not_found("transaction", transaction_id))?;
        rows::transaction(&row)
    }

    async fn list_payment_events(
        &self,
        transaction_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PaymentEventRecord>, StorageError> {
        let found = match transaction_id {
            Some(tx_id) => {
                sqlx::query(
                    "SELECT * FROM payment_events WHERE transaction_id = ? ORDER BY seq DESC LIMIT ?",
                )
                .bind(tx_id)
                .bind(limit_param(limit))
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT * FROM payment_events ORDER BY seq DESC LIMIT ?")
                    .bind(limit_param(limit))
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(backend)?;
        found.iter().map(rows::payment_event).collect()
    }
}
