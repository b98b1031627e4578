mod common;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::*;
use ed25519_dalek::SigningKey;
use openaero_market::orders::{self, CreatedOrder, NewOrder};
use openaero_market::payment::{alipay, wechat, AlipayNotification, Ed25519Verifier};
use openaero_market::revenue::{RevenueShareError, RevenueSplit};
use openaero_market::{
    FixedRateRevenueShare, MarketError, PaymentReconciler, RevenueShare, WebhookError,
    WebhookOutcome,
};
use openaero_storage::{
    MarketStorage, MemoryStorage, OrderRecord, OrderStatus, PaymentEventKind, PaymentProvider,
    PaymentTransactionRecord, TransactionStatus,
};
use rust_decimal::Decimal;

const WECHAT_KEY: &str = "192006250b4c09247ec02edce69f6a2d";

#[derive(Default)]
struct CountingShare {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl RevenueShare for CountingShare {
    async fn process_revenue_share(
        &self,
        order: &OrderRecord,
        transaction: &PaymentTransactionRecord,
    ) -> Result<RevenueSplit, RevenueShareError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(RevenueShareError("payout service unavailable".to_string()));
        }
        let (platform_fee, creator_amount) =
            FixedRateRevenueShare::default().split(transaction.amount);
        Ok(RevenueSplit {
            order_id: order.id.clone(),
            transaction_id: transaction.id.clone(),
            gross: transaction.amount,
            platform_fee,
            creator_amount,
        })
    }
}

struct Harness {
    storage: Arc<MemoryStorage>,
    share: Arc<CountingShare>,
    reconciler: PaymentReconciler<MemoryStorage>,
    alipay_key: SigningKey,
}

impl Harness {
    fn with_share(share: CountingShare) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let share = Arc::new(share);
        let alipay_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let reconciler = PaymentReconciler::new(storage.clone(), share.clone())
            .with_alipay_verifier(Arc::new(Ed25519Verifier::new(alipay_key.verifying_key())))
            .with_wechat_api_key(WECHAT_KEY);
        Harness {
            storage,
            share,
            reconciler,
            alipay_key,
        }
    }

    fn new() -> Self {
        Self::with_share(CountingShare::default())
    }

    async fn order(&self, provider: PaymentProvider) -> CreatedOrder {
        let sol = published(&self.storage, "Paid listing").await;
        orders::create_order(
            self.storage.as_ref(),
            &buyer(),
            NewOrder {
                solution_id: sol.id,
                provider,
            },
        )
        .await
        .unwrap()
    }

    fn alipay(&self, out_trade_no: &str, status: &str, amount: &str) -> AlipayNotification {
        let mut params: BTreeMap<String, String> = [
            ("app_id", "2021004100000000"),
            ("out_trade_no", out_trade_no),
            ("trade_no", "2025030122001400001"),
            ("trade_status", status),
            ("total_amount", amount),
            ("sign_type", "ED25519"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let sign = alipay::sign(&params, &self.alipay_key);
        params.insert("sign".to_string(), sign);
        AlipayNotification::from_params(params)
    }

    fn wechat(&self, out_trade_no: &str, result_code: &str, total_fee: &str) -> String {
        let mut params: BTreeMap<String, String> = [
            ("return_code", "SUCCESS"),
            ("result_code", result_code),
            ("out_trade_no", out_trade_no),
            ("transaction_id", "4200002025030100001"),
            ("total_fee", total_fee),
            ("nonce_str", "5K8264ILTKCH16CQ"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let sign = wechat::sign(&params, WECHAT_KEY).unwrap();
        params.insert("sign".to_string(), sign);
        wechat::to_xml(&params)
    }

    /// Event kinds for `tx`, oldest first.
    async fn events(&self, tx: &PaymentTransactionRecord) -> Vec<PaymentEventKind> {
        self.storage
            .list_payment_events(Some(&tx.id), 0)
            .await
            .unwrap()
            .into_iter()
            .rev()
            .map(|e| e.kind)
            .collect()
    }

    fn calls(&self) -> usize {
        self.share.calls.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn alipay_trade_success_completes_and_shares_revenue_once() {
    let h = Harness::new();
    let created = h.order(PaymentProvider::Alipay).await;
    let tx = &created.transaction;
    assert_eq!(tx.amount, Decimal::new(129900, 2));

    let n = h.alipay(&tx.external_id, "TRADE_SUCCESS", "1299.00");
    let outcome = h.reconciler.handle_alipay(&n).await.unwrap();
    assert_eq!(outcome, WebhookOutcome::Completed);

    let stored = h.storage.get_transaction(&tx.id).await.unwrap();
    assert_eq!(stored.status, TransactionStatus::Completed);
    assert_eq!(stored.provider_trade_no.as_deref(), Some("2025030122001400001"));
    assert!(stored.completed_at.is_some());
    let order = h.storage.get_order(&created.order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert!(order.confirmed_at.is_some());
    assert_eq!(h.calls(), 1);
    assert_eq!(h.events(tx).await, vec![PaymentEventKind::Completed]);

    // Redelivery is acknowledged without side effects.
    let outcome = h.reconciler.handle_alipay(&n).await.unwrap();
    assert_eq!(outcome, WebhookOutcome::Duplicate);
    assert_eq!(h.calls(), 1);
    assert_eq!(
        h.events(tx).await,
        vec![PaymentEventKind::Completed, PaymentEventKind::Duplicate]
    );
}

#[tokio::test]
async fn concurrent_deliveries_complete_once() {
    let h = Harness::new();
    let created = h.order(PaymentProvider::Alipay).await;
    let tx = &created.transaction;
    let n = h.alipay(&tx.external_id, "TRADE_SUCCESS", "1299.00");

    let (first, second) = tokio::join!(
        h.reconciler.handle_alipay(&n),
        h.reconciler.handle_alipay(&n)
    );
    let mut outcomes = vec![first.unwrap(), second.unwrap()];
    outcomes.sort_by_key(|o| *o == WebhookOutcome::Duplicate);
    assert_eq!(
        outcomes,
        vec![WebhookOutcome::Completed, WebhookOutcome::Duplicate]
    );
    assert_eq!(h.calls(), 1);
    assert_eq!(
        h.storage.get_transaction(&tx.id).await.unwrap().status,
        TransactionStatus::Completed
    );
    assert_eq!(
        h.events(tx).await,
        vec![PaymentEventKind::Completed, PaymentEventKind::Duplicate]
    );
}

#[tokio::test]
async fn tampered_signature_never_completes() {
    let h = Harness::new();
    let created = h.order(PaymentProvider::Alipay).await;
    let tx = &created.transaction;

    let signed = h.alipay(&tx.external_id, "TRADE_SUCCESS", "1299.00");
    let mut params = signed.params().clone();
    params.insert("trade_no".to_string(), "forged".to_string());
    let tampered = AlipayNotification::from_params(params);

    let err = h.reconciler.handle_alipay(&tampered).await.unwrap_err();
    assert!(matches!(err, WebhookError::SignatureInvalid));
    assert_eq!(
        h.storage.get_transaction(&tx.id).await.unwrap().status,
        TransactionStatus::Pending
    );
    assert_eq!(
        h.storage.get_order(&created.order.id).await.unwrap().status,
        OrderStatus::Pending
    );
    assert_eq!(h.calls(), 0);
    assert_eq!(h.events(tx).await, vec![PaymentEventKind::Rejected]);

    let mut unsigned = signed.params().clone();
    unsigned.remove("sign");
    let err = h
        .reconciler
        .handle_alipay(&AlipayNotification::from_params(unsigned))
        .await
        .unwrap_err();
    assert!(matches!(err, WebhookError::SignatureInvalid));
}

#[tokio::test]
async fn mismatched_amount_is_rejected() {
    let h = Harness::new();
    let created = h.order(PaymentProvider::Alipay).await;
    let tx = &created.transaction;

    let n = h.alipay(&tx.external_id, "TRADE_SUCCESS", "1.00");
    let err = h.reconciler.handle_alipay(&n).await.unwrap_err();
    match err {
        WebhookError::AmountMismatch { expected, received } => {
            assert_eq!(expected, Decimal::new(129900, 2));
            assert_eq!(received, Decimal::new(100, 2));
        }
        other => panic!("expected amount mismatch, got {other}"),
    }
    assert_eq!(
        h.storage.get_order(&created.order.id).await.unwrap().status,
        OrderStatus::Pending
    );
    assert_eq!(h.events(tx).await, vec![PaymentEventKind::Rejected]);
    assert_eq!(h.calls(), 0);
}

#[tokio::test]
async fn unknown_trade_number_is_audited() {
    let h = Harness::new();
    let n = h.alipay("no-such-trade", "TRADE_SUCCESS", "10.00");
    let err = h.reconciler.handle_alipay(&n).await.unwrap_err();
    assert!(matches!(err, WebhookError::UnknownTransaction(_)));

    let events = h.storage.list_payment_events(None, 0).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, PaymentEventKind::Rejected);
    assert_eq!(events[0].transaction_id, None);
    assert_eq!(events[0].payload["out_trade_no"], "no-such-trade");
}

#[tokio::test]
async fn closed_trade_fails_the_transaction() {
    let h = Harness::new();
    let created = h.order(PaymentProvider::Alipay).await;
    let tx = &created.transaction;

    let waiting = h.alipay(&tx.external_id, "WAIT_BUYER_PAY", "1299.00");
    assert_eq!(
        h.reconciler.handle_alipay(&waiting).await.unwrap(),
        WebhookOutcome::Ignored
    );

    let closed = h.alipay(&tx.external_id, "TRADE_CLOSED", "1299.00");
    assert_eq!(
        h.reconciler.handle_alipay(&closed).await.unwrap(),
        WebhookOutcome::Failed
    );
    assert_eq!(
        h.storage.get_transaction(&tx.id).await.unwrap().status,
        TransactionStatus::Failed
    );
    assert_eq!(
        h.storage.get_order(&created.order.id).await.unwrap().status,
        OrderStatus::Pending
    );

    assert_eq!(
        h.reconciler.handle_alipay(&closed).await.unwrap(),
        WebhookOutcome::Duplicate
    );

    // Failure is final.
    let late = h.alipay(&tx.external_id, "TRADE_SUCCESS", "1299.00");
    let err = h.reconciler.handle_alipay(&late).await.unwrap_err();
    assert!(matches!(err, WebhookError::Conflict(_)));
    assert_eq!(
        h.storage.get_transaction(&tx.id).await.unwrap().status,
        TransactionStatus::Failed
    );
    assert_eq!(h.calls(), 0);
    assert_eq!(
        h.events(tx).await,
        vec![
            PaymentEventKind::Ignored,
            PaymentEventKind::Failed,
            PaymentEventKind::Duplicate,
            PaymentEventKind::Duplicate,
        ]
    );
}

#[tokio::test]
async fn revenue_share_failure_does_not_undo_payment() {
    let h = Harness::with_share(CountingShare {
        calls: AtomicUsize::new(0),
        fail: true,
    });
    let created = h.order(PaymentProvider::Alipay).await;
    let tx = &created.transaction;

    let n = h.alipay(&tx.external_id, "TRADE_FINISHED", "1299.00");
    assert_eq!(
        h.reconciler.handle_alipay(&n).await.unwrap(),
        WebhookOutcome::Completed
    );
    assert_eq!(h.calls(), 1);
    assert_eq!(
        h.storage.get_order(&created.order.id).await.unwrap().status,
        OrderStatus::Confirmed
    );
    assert_eq!(
        h.events(tx).await,
        vec![
            PaymentEventKind::Completed,
            PaymentEventKind::RevenueShareFailed
        ]
    );
}

#[tokio::test]
async fn wechat_success_converts_fen() {
    let h = Harness::new();
    let created = h.order(PaymentProvider::Wechat).await;
    let tx = &created.transaction;

    let body = h.wechat(&tx.external_id, "SUCCESS", "129900");
    let params = wechat::parse_xml(&body).unwrap();
    assert_eq!(
        h.reconciler.handle_wechat(&params).await.unwrap(),
        WebhookOutcome::Completed
    );
    let stored = h.storage.get_transaction(&tx.id).await.unwrap();
    assert_eq!(stored.status, TransactionStatus::Completed);
    assert_eq!(stored.provider_trade_no.as_deref(), Some("4200002025030100001"));
    assert_eq!(h.calls(), 1);
}

#[tokio::test]
async fn wechat_rejections() {
    let h = Harness::new();
    let created = h.order(PaymentProvider::Wechat).await;
    let tx = &created.transaction;

    // Yuan instead of fen.
    let body = h.wechat(&tx.external_id, "SUCCESS", "1299");
    let err = h
        .reconciler
        .handle_wechat(&wechat::parse_xml(&body).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, WebhookError::AmountMismatch { .. }));

    let mut params = wechat::parse_xml(&h.wechat(&tx.external_id, "SUCCESS", "129900")).unwrap();
    params.insert("sign".to_string(), "0".repeat(64));
    let err = h.reconciler.handle_wechat(&params).await.unwrap_err();
    assert!(matches!(err, WebhookError::SignatureInvalid));

    let mut params = BTreeMap::new();
    params.insert("return_code".to_string(), "FAIL".to_string());
    params.insert("return_msg".to_string(), "SIGNERROR".to_string());
    let err = h.reconciler.handle_wechat(&params).await.unwrap_err();
    assert!(matches!(err, WebhookError::Malformed(_)));

    // The same trade number under the other provider is unknown.
    let n = h.alipay(&tx.external_id, "TRADE_SUCCESS", "1299.00");
    let err = h.reconciler.handle_alipay(&n).await.unwrap_err();
    assert!(matches!(err, WebhookError::UnknownTransaction(_)));

    assert_eq!(
        h.storage.get_transaction(&tx.id).await.unwrap().status,
        TransactionStatus::Pending
    );
    assert_eq!(
        h.events(tx).await,
        vec![PaymentEventKind::Rejected, PaymentEventKind::Rejected]
    );
    let all = h.storage.list_payment_events(None, 0).await.unwrap();
    assert_eq!(all.len(), 4);
}

#[tokio::test]
async fn unconfigured_providers_are_refused() {
    let storage = Arc::new(MemoryStorage::new());
    let reconciler = PaymentReconciler::new(storage, Arc::new(FixedRateRevenueShare::default()));
    let n = AlipayNotification::from_params(BTreeMap::new());
    assert!(matches!(
        reconciler.handle_alipay(&n).await,
        Err(WebhookError::NotConfigured(_))
    ));
    assert!(matches!(
        reconciler.handle_wechat(&BTreeMap::new()).await,
        Err(WebhookError::NotConfigured(_))
    ));
}

#[tokio::test]
async fn orders_require_published_solutions_and_stay_private() {
    let h = Harness::new();
    let sol = draft(&h.storage, "Not for sale").await;
    let err = orders::create_order(
        h.storage.as_ref(),
        &buyer(),
        NewOrder {
            solution_id: sol.id,
            provider: PaymentProvider::Alipay,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)));

    let created = h.order(PaymentProvider::Alipay).await;
    assert_eq!(created.order.amount, created.transaction.amount);
    assert_eq!(created.order.status, OrderStatus::Pending);

    let mine = orders::get_order(h.storage.as_ref(), &buyer(), &created.order.id)
        .await
        .unwrap();
    assert_eq!(mine, created.order);
    let err = orders::get_order(h.storage.as_ref(), &creator(), &created.order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Forbidden(_)));
    assert!(orders::get_order(h.storage.as_ref(), &admin(), &created.order.id)
        .await
        .is_ok());

    let err = orders::list_payment_events(h.storage.as_ref(), &buyer(), None, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Forbidden(_)));
}
