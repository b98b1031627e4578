//! In-memory `MarketStorage` backend.
//!
//! Snapshots are serialized through an async gate: `begin_snapshot` waits for
//! the previous snapshot to finish, then works on a private copy of the
//! committed state. Commit swaps the copy in; abort or drop discards it.
//! Queries always read the committed state, so uncommitted writes are never
//! visible outside their snapshot.
//!
//! The copy costs one clone of the mutable tables per snapshot. The payment
//! event log is append-only and kept outside that copy: a snapshot collects
//! only its new events and commit appends them.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::StorageError;
use crate::record::{
    AssetRecord, BomItemRecord, OrderRecord, OrderStatus, PaymentEventRecord, PaymentProvider,
    PaymentTransactionRecord, ReviewRecord, ReviewStatus, SolutionRecord, SolutionStatus,
    TransactionStatus,
};
use crate::traits::MarketStorage;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    solutions: BTreeMap<String, SolutionRecord>,
    reviews: Vec<ReviewRecord>,
    bom_items: Vec<BomItemRecord>,
    assets: Vec<AssetRecord>,
    orders: BTreeMap<String, OrderRecord>,
    transactions: BTreeMap<String, PaymentTransactionRecord>,
}

impl MemoryState {
    fn solution(&self, solution_id: &str) -> Result<&SolutionRecord, StorageError> {
        self.solutions
            .get(solution_id)
            .ok_or_else(|| StorageError::not_found("solution", solution_id))
    }

    fn require_solution(&self, solution_id: &str) -> Result<(), StorageError> {
        self.solution(solution_id).map(|_| ())
    }
}

/// Process-local storage backend. Cheap to construct; used by tests and by
/// `openaero serve --database memory`.
#[derive(Default)]
pub struct MemoryStorage {
    committed: RwLock<MemoryState>,
    events: RwLock<Vec<PaymentEventRecord>>,
    gate: Arc<Mutex<()>>,
}

/// An open in-memory transaction.
pub struct MemorySnapshot {
    working: MemoryState,
    new_events: Vec<PaymentEventRecord>,
    _guard: OwnedMutexGuard<()>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>, StorageError> {
        self.committed
            .read()
            .map_err(|_| StorageError::Backend("memory state lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>, StorageError> {
        self.committed
            .write()
            .map_err(|_| StorageError::Backend("memory state lock poisoned".to_string()))
    }

    fn read_events(&self) -> Result<RwLockReadGuard<'_, Vec<PaymentEventRecord>>, StorageError> {
        self.events
            .read()
            .map_err(|_| StorageError::Backend("memory event log lock poisoned".to_string()))
    }

    fn write_events(
        &self,
    ) -> Result<RwLockWriteGuard<'_, Vec<PaymentEventRecord>>, StorageError> {
        self.events
            .write()
            .map_err(|_| StorageError::Backend("memory event log lock poisoned".to_string()))
    }
}

fn apply_limit<T>(mut items: Vec<T>, limit: usize) -> Vec<T> {
    if limit > 0 {
        items.truncate(limit);
    }
    items
}

#[async_trait]
impl MarketStorage for MemoryStorage {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        let guard = self.gate.clone().lock_owned().await;
        let working = self.read()?.clone();
        Ok(MemorySnapshot {
            working,
            new_events: Vec::new(),
            _guard: guard,
        })
    }

    async fn commit_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        let MemorySnapshot {
            working,
            new_events,
            _guard,
        } = snapshot;
        // Both locks held so readers see the tables and the log move together.
        let mut events = self.write_events()?;
        let mut state = self.write()?;
        *state = working;
        events.extend(new_events);
        Ok(())
    }

    async fn abort_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        drop(snapshot);
        Ok(())
    }

    // ── Solutions ────────────────────────────────────────────────────────────

    async fn insert_solution(
        &self,
        snapshot: &mut MemorySnapshot,
        record: SolutionRecord,
    ) -> Result<(), StorageError> {
        let state = &mut snapshot.working;
        if state.solutions.contains_key(&record.id) {
            return Err(StorageError::already_exists("solution", record.id));
        }
        state.solutions.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get_solution_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        solution_id: &str,
    ) -> Result<SolutionRecord, StorageError> {
        snapshot.working.solution(solution_id).cloned()
    }

    async fn update_solution(
        &self,
        snapshot: &mut MemorySnapshot,
        mut record: SolutionRecord,
        expected_version: i64,
    ) -> Result<i64, StorageError> {
        let current = snapshot
            .working
            .solutions
            .get_mut(&record.id)
            .ok_or_else(|| StorageError::not_found("solution", record.id.clone()))?;
        if current.version != expected_version {
            return Err(StorageError::ConcurrentConflict {
                solution_id: record.id,
                expected_version,
            });
        }
        let new_version = expected_version + 1;
        record.version = new_version;
        *current = record;
        Ok(new_version)
    }

    // ── Reviews ──────────────────────────────────────────────────────────────

    async fn insert_review(
        &self,
        snapshot: &mut MemorySnapshot,
        record: ReviewRecord,
    ) -> Result<(), StorageError> {
        let state = &mut snapshot.working;
        state.require_solution(&record.solution_id)?;
        if state.reviews.iter().any(|r| r.id == record.id) {
            return Err(StorageError::already_exists("review", record.id));
        }
        if record.status == ReviewStatus::InProgress
            && state.reviews.iter().any(|r| {
                r.solution_id == record.solution_id && r.status == ReviewStatus::InProgress
            })
        {
            return Err(StorageError::already_exists(
                "in-progress review",
                record.solution_id,
            ));
        }
        state.reviews.push(record);
        Ok(())
    }

    async fn find_in_progress_review(
        &self,
        snapshot: &mut MemorySnapshot,
        solution_id: &str,
    ) -> Result<Option<ReviewRecord>, StorageError> {
        Ok(snapshot
            .working
            .reviews
            .iter()
            .find(|r| r.solution_id == solution_id && r.status == ReviewStatus::InProgress)
            .cloned())
    }

    async fn update_review(
        &self,
        snapshot: &mut MemorySnapshot,
        record: ReviewRecord,
    ) -> Result<(), StorageError> {
        let slot = snapshot
            .working
            .reviews
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or_else(|| StorageError::not_found("review", record.id.clone()))?;
        *slot = record;
        Ok(())
    }

    // ── BOM and assets ───────────────────────────────────────────────────────

    async fn replace_bom_items(
        &self,
        snapshot: &mut MemorySnapshot,
        solution_id: &str,
        items: Vec<BomItemRecord>,
    ) -> Result<(), StorageError> {
        let state = &mut snapshot.working;
        state.require_solution(solution_id)?;
        state.bom_items.retain(|item| item.solution_id != solution_id);
        for item in items {
            if state.bom_items.iter().any(|existing| existing.id == item.id) {
                return Err(StorageError::already_exists("bom item", item.id));
            }
            state.bom_items.push(item);
        }
        Ok(())
    }

    async fn insert_asset(
        &self,
        snapshot: &mut MemorySnapshot,
        record: AssetRecord,
    ) -> Result<(), StorageError> {
        let state = &mut snapshot.working;
        state.require_solution(&record.solution_id)?;
        if state.assets.iter().any(|a| a.id == record.id) {
            return Err(StorageError::already_exists("asset", record.id));
        }
        state.assets.push(record);
        Ok(())
    }

    // ── Orders and payments ──────────────────────────────────────────────────

    async fn insert_order(
        &self,
        snapshot: &mut MemorySnapshot,
        record: OrderRecord,
    ) -> Result<(), StorageError> {
        let state = &mut snapshot.working;
        state.require_solution(&record.solution_id)?;
        if state.orders.contains_key(&record.id) {
            return Err(StorageError::already_exists("order", record.id));
        }
        state.orders.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get_order_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        order_id: &str,
    ) -> Result<OrderRecord, StorageError> {
        snapshot
            .working
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("order", order_id))
    }

    async fn update_order_status(
        &self,
        snapshot: &mut MemorySnapshot,
        order_id: &str,
        expected: OrderStatus,
        new: OrderStatus,
        at: &str,
    ) -> Result<(), StorageError> {
        let order = snapshot
            .working
            .orders
            .get_mut(order_id)
            .ok_or_else(|| StorageError::not_found("order", order_id))?;
        if order.status != expected {
            return Err(StorageError::StatusConflict {
                record: "order",
                id: order_id.to_string(),
                expected: expected.to_string(),
                actual: order.status.to_string(),
            });
        }
        order.status = new;
        order.updated_at = at.to_string();
        if new == OrderStatus::Confirmed {
            order.confirmed_at = Some(at.to_string());
        }
        Ok(())
    }

    async fn insert_transaction(
        &self,
        snapshot: &mut MemorySnapshot,
        record: PaymentTransactionRecord,
    ) -> Result<(), StorageError> {
        let state = &mut snapshot.working;
        if !state.orders.contains_key(&record.order_id) {
            return Err(StorageError::not_found("order", record.order_id));
        }
        if state.transactions.contains_key(&record.id) {
            return Err(StorageError::already_exists("transaction", record.id));
        }
        if state
            .transactions
            .values()
            .any(|t| t.provider == record.provider && t.external_id == record.external_id)
        {
            return Err(StorageError::already_exists(
                "transaction",
                format!("{}/{}", record.provider, record.external_id),
            ));
        }
        state.transactions.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get_transaction_by_external_id_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        provider: PaymentProvider,
        external_id: &str,
    ) -> Result<PaymentTransactionRecord, StorageError> {
        snapshot
            .working
            .transactions
            .values()
            .find(|t| t.provider == provider && t.external_id == external_id)
            .cloned()
            .ok_or_else(|| {
                StorageError::not_found("transaction", format!("{provider}/{external_id}"))
            })
    }

    async fn update_transaction_status(
        &self,
        snapshot: &mut MemorySnapshot,
        transaction_id: &str,
        expected: TransactionStatus,
        new: TransactionStatus,
        provider_trade_no: Option<&str>,
        at: &str,
    ) -> Result<(), StorageError> {
        let tx = snapshot
            .working
            .transactions
            .get_mut(transaction_id)
            .ok_or_else(|| StorageError::not_found("transaction", transaction_id))?;
        if tx.status != expected {
            return Err(StorageError::StatusConflict {
                record: "transaction",
                id: transaction_id.to_string(),
                expected: expected.to_string(),
                actual: tx.status.to_string(),
            });
        }
        tx.status = new;
        tx.updated_at = at.to_string();
        if let Some(trade_no) = provider_trade_no {
            tx.provider_trade_no = Some(trade_no.to_string());
        }
        if new == TransactionStatus::Completed {
            tx.completed_at = Some(at.to_string());
        }
        Ok(())
    }

    async fn append_payment_event(
        &self,
        snapshot: &mut MemorySnapshot,
        record: PaymentEventRecord,
    ) -> Result<(), StorageError> {
        if let Some(tx_id) = &record.transaction_id {
            if !snapshot.working.transactions.contains_key(tx_id) {
                return Err(StorageError::not_found("transaction", tx_id.clone()));
            }
        }
        let duplicate = snapshot.new_events.iter().any(|e| e.id == record.id)
            || self.read_events()?.iter().any(|e| e.id == record.id);
        if duplicate {
            return Err(StorageError::already_exists("payment event", record.id));
        }
        snapshot.new_events.push(record);
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    async fn get_solution(&self, solution_id: &str) -> Result<SolutionRecord, StorageError> {
        self.read()?.solution(solution_id).cloned()
    }

    async fn list_solutions(
        &self,
        status: Option<SolutionStatus>,
        limit: usize,
    ) -> Result<Vec<SolutionRecord>, StorageError> {
        let state = self.read()?;
        let mut solutions: Vec<SolutionRecord> = state
            .solutions
            .values()
            .filter(|s| status.is_none_or(|wanted| s.status == wanted))
            .cloned()
            .collect();
        solutions.sort_by(|a, b| (&a.created_at, &a.id).cmp(&(&b.created_at, &b.id)));
        Ok(apply_limit(solutions, limit))
    }

    async fn list_reviews(&self, solution_id: &str) -> Result<Vec<ReviewRecord>, StorageError> {
        let mut reviews: Vec<ReviewRecord> = self
            .read()?
            .reviews
            .iter()
            .filter(|r| r.solution_id == solution_id)
            .cloned()
            .collect();
        reviews.sort_by(|a, b| (&a.started_at, &a.id).cmp(&(&b.started_at, &b.id)));
        Ok(reviews)
    }

    async fn list_bom_items(
        &self,
        solution_id: &str,
    ) -> Result<Vec<BomItemRecord>, StorageError> {
        let mut items: Vec<BomItemRecord> = self
            .read()?
            .bom_items
            .iter()
            .filter(|i| i.solution_id == solution_id)
            .cloned()
            .collect();
        items.sort_by_key(|i| i.position);
        Ok(items)
    }

    async fn list_assets(&self, solution_id: &str) -> Result<Vec<AssetRecord>, StorageError> {
        Ok(self
            .read()?
            .assets
            .iter()
            .filter(|a| a.solution_id == solution_id)
            .cloned()
            .collect())
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderRecord, StorageError> {
        self.read()?
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("order", order_id))
    }

    async fn get_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<PaymentTransactionRecord, StorageError> {
        self.read()?
            .transactions
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("transaction", transaction_id))
    }

    async fn list_payment_events(
        &self,
        transaction_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PaymentEventRecord>, StorageError> {
        let events: Vec<PaymentEventRecord> = self
            .read_events()?
            .iter()
            .rev()
            .filter(|e| {
                transaction_id.is_none_or(|wanted| e.transaction_id.as_deref() == Some(wanted))
            })
            .cloned()
            .collect();
        Ok(apply_limit(events, limit))
    }
}
