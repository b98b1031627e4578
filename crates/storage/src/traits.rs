use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{
    AssetRecord, BomItemRecord, OrderRecord, OrderStatus, PaymentEventRecord, PaymentProvider,
    PaymentTransactionRecord, ReviewRecord, SolutionRecord, SolutionStatus, TransactionStatus,
};

/// The storage trait for OpenAero marketplace backends.
///
/// A `MarketStorage` implementation provides durable, transactional storage
/// for solutions, reviews, BOM rows, assets, orders, payment transactions and
/// the payment event audit log.
///
/// ## Snapshot Semantics
///
/// All mutating operations take `&mut Self::Snapshot`, a type representing an
/// in-progress transaction. The lifecycle is:
///
/// 1. `begin_snapshot()`: start a transaction, returns a `Snapshot`
/// 2. Call mutating methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)`: commit and consume the transaction
///    OR `abort_snapshot(snapshot)`: roll back and consume the transaction
///
/// If a `Snapshot` is dropped without committing, the underlying transaction
/// MUST be rolled back.
///
/// ## Conflict Detection
///
/// `update_solution` performs an optimistic concurrency check on the
/// solution's `version`. `update_order_status` and `update_transaction_status`
/// are guarded by the expected current status. A mismatch returns
/// `ConcurrentConflict` or `StatusConflict` and writes nothing.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be used in axum
/// application state and across async task boundaries.
#[async_trait]
pub trait MarketStorage: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this storage backend.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Solutions (within snapshot) ───────────────────────────────────────────

    /// Insert a new solution. Returns `AlreadyExists` if the id is taken.
    async fn insert_solution(
        &self,
        snapshot: &mut Self::Snapshot,
        record: SolutionRecord,
    ) -> Result<(), StorageError>;

    /// Read a solution inside the snapshot, locking it for update.
    async fn get_solution_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        solution_id: &str,
    ) -> Result<SolutionRecord, StorageError>;

    /// Overwrite a solution, conditional on `version = expected_version`.
    ///
    /// The stored version becomes `expected_version + 1` regardless of the
    /// `version` field on `record`. Returns the new version.
    async fn update_solution(
        &self,
        snapshot: &mut Self::Snapshot,
        record: SolutionRecord,
        expected_version: i64,
    ) -> Result<i64, StorageError>;

    // ── Reviews (within snapshot) ─────────────────────────────────────────────

    async fn insert_review(
        &self,
        snapshot: &mut Self::Snapshot,
        record: ReviewRecord,
    ) -> Result<(), StorageError>;

    /// The IN_PROGRESS review for a solution, if any.
    async fn find_in_progress_review(
        &self,
        snapshot: &mut Self::Snapshot,
        solution_id: &str,
    ) -> Result<Option<ReviewRecord>, StorageError>;

    /// Overwrite a review by id. Returns `NotFound` if it does not exist.
    async fn update_review(
        &self,
        snapshot: &mut Self::Snapshot,
        record: ReviewRecord,
    ) -> Result<(), StorageError>;

    // ── BOM and assets (within snapshot) ──────────────────────────────────────

    /// Delete every BOM row of the solution, then insert `items`.
    async fn replace_bom_items(
        &self,
        snapshot: &mut Self::Snapshot,
        solution_id: &str,
        items: Vec<BomItemRecord>,
    ) -> Result<(), StorageError>;

    async fn insert_asset(
        &self,
        snapshot: &mut Self::Snapshot,
        record: AssetRecord,
    ) -> Result<(), StorageError>;

    // ── Orders and payments (within snapshot) ─────────────────────────────────

    async fn insert_order(
        &self,
        snapshot: &mut Self::Snapshot,
        record: OrderRecord,
    ) -> Result<(), StorageError>;

    async fn get_order_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        order_id: &str,
    ) -> Result<OrderRecord, StorageError>;

    /// Move an order from `expected` to `new`. Sets `confirmed_at` when the
    /// new status is CONFIRMED.
    async fn update_order_status(
        &self,
        snapshot: &mut Self::Snapshot,
        order_id: &str,
        expected: OrderStatus,
        new: OrderStatus,
        at: &str,
    ) -> Result<(), StorageError>;

    /// Insert a transaction. `(provider, external_id)` must be unique.
    async fn insert_transaction(
        &self,
        snapshot: &mut Self::Snapshot,
        record: PaymentTransactionRecord,
    ) -> Result<(), StorageError>;

    async fn get_transaction_by_external_id_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        provider: PaymentProvider,
        external_id: &str,
    ) -> Result<PaymentTransactionRecord, StorageError>;

    /// Move a transaction from `expected` to `new`. Sets `completed_at` when
    /// the new status is COMPLETED and records `provider_trade_no` if given.
    #[allow(clippy::too_many_arguments)]
    async fn update_transaction_status(
        &self,
        snapshot: &mut Self::Snapshot,
        transaction_id: &str,
        expected: TransactionStatus,
        new: TransactionStatus,
        provider_trade_no: Option<&str>,
        at: &str,
    ) -> Result<(), StorageError>;

    async fn append_payment_event(
        &self,
        snapshot: &mut Self::Snapshot,
        record: PaymentEventRecord,
    ) -> Result<(), StorageError>;

    // ── Query operations (outside snapshot, committed state only) ─────────────

    async fn get_solution(&self, solution_id: &str) -> Result<SolutionRecord, StorageError>;

    /// List solutions, optionally filtered by status, oldest first.
    ///
    /// `limit` of 0 means no limit.
    async fn list_solutions(
        &self,
        status: Option<SolutionStatus>,
        limit: usize,
    ) -> Result<Vec<SolutionRecord>, StorageError>;

    /// All reviews of a solution ordered by `started_at`, then id.
    async fn list_reviews(&self, solution_id: &str) -> Result<Vec<ReviewRecord>, StorageError>;

    /// BOM rows of a solution ordered by position.
    async fn list_bom_items(&self, solution_id: &str)
        -> Result<Vec<BomItemRecord>, StorageError>;

    async fn list_assets(&self, solution_id: &str) -> Result<Vec<AssetRecord>, StorageError>;

    async fn get_order(&self, order_id: &str) -> Result<OrderRecord, StorageError>;

    async fn get_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<PaymentTransactionRecord, StorageError>;

    /// Payment events newest first, optionally for one transaction, so a
    /// limited listing always shows the latest outcomes.
    ///
    /// `limit` of 0 means no limit.
    async fn list_payment_events(
        &self,
        transaction_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PaymentEventRecord>, StorageError>;
}
