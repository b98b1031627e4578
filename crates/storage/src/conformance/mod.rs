//! Conformance test suite for `MarketStorage` implementations.
//!
//! This module provides a backend-agnostic test suite that any `MarketStorage`
//! implementation can run to verify correctness. The suite covers:
//!
//! - **Initialization**: record creation, duplicate detection, referential checks
//! - **Snapshot isolation**: uncommitted writes invisible, committed writes visible
//! - **Atomic commit**: all-or-nothing semantics for multi-record snapshots
//! - **Version validation / OCC**: optimistic concurrency conflict detection
//! - **Payments**: guarded status transitions and the append-only event log
//! - **Error handling**: correct error variants for invalid operations
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use openaero_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn sqlite_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_sqlite_storage().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod commit;
mod concurrent;
mod error;
mod init;
mod payment;
mod snapshot;
mod version;

use std::fmt;
use std::future::Future;

use rust_decimal::Decimal;

use crate::record::{
    BomItemRecord, OrderRecord, OrderStatus, PaymentEventKind, PaymentEventRecord,
    PaymentProvider, PaymentTransactionRecord, ReviewDecision, ReviewRecord, ReviewStatus,
    SolutionRecord, SolutionStatus, TransactionStatus,
};
use crate::MarketStorage;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "init", "snapshot", "commit").
    pub category: String,
    /// Test name (e.g. "insert_solution_then_get").
    pub name: String,
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(init::run_init_tests(&factory).await);
    results.extend(error::run_error_tests(&factory).await);
    results.extend(snapshot::run_snapshot_tests(&factory).await);
    results.extend(commit::run_commit_tests(&factory).await);
    results.extend(version::run_version_tests(&factory).await);
    results.extend(payment::run_payment_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: record constructors with sensible defaults ──────────────────────

const T0: &str = "2025-01-01T00:00:00Z";

fn make_solution(id: &str) -> SolutionRecord {
    SolutionRecord {
        id: id.to_string(),
        creator_id: "creator-1".to_string(),
        title: format!("Solution {id}"),
        description: "Quadcopter frame kit".to_string(),
        category: Some("frames".to_string()),
        price: Decimal::new(19900, 2),
        status: SolutionStatus::PendingReview,
        version: 0,
        bom: None,
        created_at: T0.to_string(),
        updated_at: T0.to_string(),
        submitted_at: Some(T0.to_string()),
        reviewed_at: None,
        published_at: None,
    }
}

fn make_review(id: &str, solution_id: &str, status: ReviewStatus) -> ReviewRecord {
    ReviewRecord {
        id: id.to_string(),
        solution_id: solution_id.to_string(),
        reviewer_id: "reviewer-1".to_string(),
        status,
        decision: ReviewDecision::Pending,
        from_status: SolutionStatus::PendingReview,
        to_status: None,
        quality_score: None,
        completeness_score: None,
        innovation_score: None,
        market_potential_score: None,
        comments: None,
        suggestions: None,
        started_at: T0.to_string(),
        completed_at: None,
        created_at: T0.to_string(),
        updated_at: T0.to_string(),
    }
}

fn make_bom_item(id: &str, solution_id: &str, position: i32) -> BomItemRecord {
    BomItemRecord {
        id: id.to_string(),
        solution_id: solution_id.to_string(),
        position,
        name: format!("Part {position}"),
        model: Some("M-2207".to_string()),
        manufacturer: None,
        quantity: 4,
        unit_price: Some(Decimal::new(1250, 2)),
        weight_grams: Some(Decimal::new(315, 1)),
        category: Some("motor".to_string()),
        supplier: None,
        link: None,
        notes: None,
        created_at: T0.to_string(),
    }
}

fn make_order(id: &str, solution_id: &str) -> OrderRecord {
    OrderRecord {
        id: id.to_string(),
        buyer_id: "buyer-1".to_string(),
        solution_id: solution_id.to_string(),
        amount: Decimal::new(10000, 2),
        currency: "CNY".to_string(),
        status: OrderStatus::Pending,
        created_at: T0.to_string(),
        updated_at: T0.to_string(),
        confirmed_at: None,
    }
}

fn make_transaction(
    id: &str,
    order_id: &str,
    provider: PaymentProvider,
    external_id: &str,
) -> PaymentTransactionRecord {
    PaymentTransactionRecord {
        id: id.to_string(),
        order_id: order_id.to_string(),
        provider,
        external_id: external_id.to_string(),
        amount: Decimal::new(10000, 2),
        currency: "CNY".to_string(),
        status: TransactionStatus::Pending,
        provider_trade_no: None,
        created_at: T0.to_string(),
        updated_at: T0.to_string(),
        completed_at: None,
    }
}

fn make_event(id: &str, transaction_id: Option<&str>, kind: PaymentEventKind) -> PaymentEventRecord {
    PaymentEventRecord {
        id: id.to_string(),
        transaction_id: transaction_id.map(str::to_string),
        provider: PaymentProvider::Alipay,
        kind,
        message: None,
        payload: serde_json::json!({"out_trade_no": "trade-1"}),
        created_at: T0.to_string(),
    }
}

/// Insert and commit a solution.
async fn seed_solution<S: MarketStorage>(s: &S, id: &str) -> Result<(), String> {
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_solution(&mut snap, make_solution(id))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())
}

/// Insert and commit a solution, an order for it and a pending transaction.
async fn seed_payment<S: MarketStorage>(
    s: &S,
    order_id: &str,
    tx_id: &str,
    external_id: &str,
) -> Result<(), String> {
    let solution_id = format!("sol-for-{order_id}");
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_solution(&mut snap, make_solution(&solution_id))
        .await
        .map_err(|e| e.to_string())?;
    s.insert_order(&mut snap, make_order(order_id, &solution_id))
        .await
        .map_err(|e| e.to_string())?;
    s.insert_transaction(
        &mut snap,
        make_transaction(tx_id, order_id, PaymentProvider::Alipay, external_id),
    )
    .await
    .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())
}
