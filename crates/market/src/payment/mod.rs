//! Payment webhook reconciliation.
//!
//! Every delivery runs the same pipeline inside one storage snapshot:
//! locate the transaction by `(provider, out_trade_no)`, check the signature,
//! check the amount, apply the idempotency guard, then move the transaction
//! (and on success the order) forward and append an audit event. Deliveries
//! that fail a check still leave a REJECTED event behind. Revenue share runs
//! after the completion has committed, once per transaction.

pub mod alipay;
pub mod signature;
pub mod wechat;

use std::collections::BTreeMap;
use std::sync::Arc;

use openaero_storage::{
    MarketStorage, OrderStatus, PaymentEventKind, PaymentEventRecord, PaymentProvider,
    PaymentTransactionRecord, StorageError, TransactionStatus,
};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use crate::clock;
use crate::revenue::RevenueShare;

pub use alipay::AlipayNotification;
pub use signature::{canonical_query, Ed25519Verifier, SignatureVerifier};

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("malformed notification: {0}")]
    Malformed(String),

    #[error("no transaction with out_trade_no {0}")]
    UnknownTransaction(String),

    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("amount mismatch: expected {expected}, received {received}")]
    AmountMismatch { expected: Decimal, received: Decimal },

    /// The transaction is in a state the notification cannot move it out of.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{0} webhooks are not configured")]
    NotConfigured(String),

    #[error(transparent)]
    Storage(StorageError),
}

impl WebhookError {
    pub fn code(&self) -> &'static str {
        match self {
            WebhookError::Malformed(_) => "MALFORMED",
            WebhookError::UnknownTransaction(_) => "UNKNOWN_TRANSACTION",
            WebhookError::SignatureInvalid => "SIGNATURE_INVALID",
            WebhookError::AmountMismatch { .. } => "AMOUNT_MISMATCH",
            WebhookError::Conflict(_) => "CONFLICT",
            WebhookError::NotConfigured(_) => "NOT_CONFIGURED",
            WebhookError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

impl From<StorageError> for WebhookError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::StatusConflict { .. } | StorageError::ConcurrentConflict { .. } => {
                WebhookError::Conflict(e.to_string())
            }
            _ => WebhookError::Storage(e),
        }
    }
}

/// What an accepted delivery did.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookOutcome {
    /// Transaction COMPLETED and order CONFIRMED.
    Completed,
    /// Transaction FAILED.
    Failed,
    /// Already processed; nothing changed.
    Duplicate,
    /// A status that needs no action, e.g. still waiting for the buyer.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NoticeStatus {
    Paid,
    Closed,
    Waiting,
}

/// A provider notification reduced to what reconciliation needs.
#[derive(Debug, Clone)]
pub(crate) struct Notice {
    pub provider: PaymentProvider,
    pub external_id: String,
    pub provider_trade_no: Option<String>,
    /// In yuan.
    pub amount: Decimal,
    pub status: NoticeStatus,
    pub signature_valid: bool,
}

fn payload_of(params: &BTreeMap<String, String>) -> Value {
    Value::Object(
        params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

pub struct PaymentReconciler<S: MarketStorage> {
    storage: Arc<S>,
    alipay_verifier: Option<Arc<dyn SignatureVerifier>>,
    wechat_api_key: Option<String>,
    revenue_share: Arc<dyn RevenueShare>,
}

impl<S: MarketStorage> PaymentReconciler<S> {
    pub fn new(storage: Arc<S>, revenue_share: Arc<dyn RevenueShare>) -> Self {
        PaymentReconciler {
            storage,
            alipay_verifier: None,
            wechat_api_key: None,
            revenue_share,
        }
    }

    pub fn with_alipay_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.alipay_verifier = Some(verifier);
        self
    }

    pub fn with_wechat_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.wechat_api_key = Some(api_key.into());
        self
    }

    pub async fn handle_alipay(
        &self,
        notification: &AlipayNotification,
    ) -> Result<WebhookOutcome, WebhookError> {
        let verifier = self
            .alipay_verifier
            .as_ref()
            .ok_or_else(|| WebhookError::NotConfigured("Alipay".to_string()))?;
        let payload = payload_of(notification.params());
        let signature_valid = notification.get("sign").is_some_and(|sign| {
            verifier.verify(notification.signing_content().as_bytes(), sign)
        });
        match notification.to_notice(signature_valid) {
            Ok(notice) => self.reconcile(notice, payload).await,
            Err(e) => {
                self.record_rejection(PaymentProvider::Alipay, payload, &e.to_string())
                    .await?;
                Err(e)
            }
        }
    }

    /// Handle a parsed WeChat notification. See [`wechat::parse_xml`].
    pub async fn handle_wechat(
        &self,
        params: &BTreeMap<String, String>,
    ) -> Result<WebhookOutcome, WebhookError> {
        let api_key = self
            .wechat_api_key
            .as_deref()
            .ok_or_else(|| WebhookError::NotConfigured("WeChat".to_string()))?;
        let payload = payload_of(params);
        let signature_valid = wechat::verify(params, api_key);
        match wechat::to_notice(params, signature_valid) {
            Ok(notice) => self.reconcile(notice, payload).await,
            Err(e) => {
                self.record_rejection(PaymentProvider::Wechat, payload, &e.to_string())
                    .await?;
                Err(e)
            }
        }
    }

    /// Append a REJECTED event not tied to any transaction.
    pub async fn record_rejection(
        &self,
        provider: PaymentProvider,
        payload: Value,
        message: &str,
    ) -> Result<(), WebhookError> {
        tracing::warn!(%provider, reason = message, "payment notification rejected");
        let mut snap = self.storage.begin_snapshot().await?;
        self.append_event(
            &mut snap,
            None,
            provider,
            PaymentEventKind::Rejected,
            message,
            payload,
        )
        .await?;
        self.storage.commit_snapshot(snap).await?;
        Ok(())
    }

    async fn append_event(
        &self,
        snapshot: &mut S::Snapshot,
        transaction_id: Option<&str>,
        provider: PaymentProvider,
        kind: PaymentEventKind,
        message: &str,
        payload: Value,
    ) -> Result<(), StorageError> {
        self.storage
            .append_payment_event(
                snapshot,
                PaymentEventRecord {
                    id: clock::new_id(),
                    transaction_id: transaction_id.map(str::to_string),
                    provider,
                    kind,
                    message: Some(message.to_string()),
                    payload,
                    created_at: clock::now(),
                },
            )
            .await
    }

    async fn reconcile(
        &self,
        notice: Notice,
        payload: Value,
    ) -> Result<WebhookOutcome, WebhookError> {
        let provider = notice.provider;
        let mut snap = self.storage.begin_snapshot().await?;

        let tx = match self
            .storage
            .get_transaction_by_external_id_for_update(&mut snap, provider, &notice.external_id)
            .await
        {
            Ok(tx) => tx,
            Err(StorageError::NotFound { .. }) => {
                let err = WebhookError::UnknownTransaction(notice.external_id.clone());
                self.append_event(
                    &mut snap,
                    None,
                    provider,
                    PaymentEventKind::Rejected,
                    &err.to_string(),
                    payload,
                )
                .await?;
                self.storage.commit_snapshot(snap).await?;
                tracing::warn!(%provider, external_id = %notice.external_id, "notification for unknown transaction");
                return Err(err);
            }
            Err(e) => return Err(e.into()),
        };

        let rejection = if !notice.signature_valid {
            Some(WebhookError::SignatureInvalid)
        } else if notice.amount != tx.amount {
            Some(WebhookError::AmountMismatch {
                expected: tx.amount,
                received: notice.amount,
            })
        } else {
            None
        };
        if let Some(err) = rejection {
            self.append_event(
                &mut snap,
                Some(&tx.id),
                provider,
                PaymentEventKind::Rejected,
                &err.to_string(),
                payload,
            )
            .await?;
            self.storage.commit_snapshot(snap).await?;
            tracing::warn!(%provider, transaction_id = %tx.id, error = %err, "payment notification rejected");
            return Err(err);
        }

        match (tx.status, notice.status) {
            (_, NoticeStatus::Waiting) => {
                self.finish(snap, &tx, PaymentEventKind::Ignored, "buyer has not paid yet", payload)
                    .await?;
                Ok(WebhookOutcome::Ignored)
            }
            (TransactionStatus::Completed, _) | (TransactionStatus::Failed, NoticeStatus::Closed) => {
                let message = format!("transaction already {}", tx.status);
                self.finish(snap, &tx, PaymentEventKind::Duplicate, &message, payload)
                    .await?;
                tracing::info!(%provider, transaction_id = %tx.id, "duplicate payment notification");
                Ok(WebhookOutcome::Duplicate)
            }
            (TransactionStatus::Failed, NoticeStatus::Paid) => {
                let message = format!("payment reported for failed transaction {}", tx.id);
                self.finish(snap, &tx, PaymentEventKind::Duplicate, &message, payload)
                    .await?;
                tracing::error!(%provider, transaction_id = %tx.id, "success notification after failure");
                Err(WebhookError::Conflict(message))
            }
            (TransactionStatus::Pending, NoticeStatus::Closed) => {
                let now = clock::now();
                self.storage
                    .update_transaction_status(
                        &mut snap,
                        &tx.id,
                        TransactionStatus::Pending,
                        TransactionStatus::Failed,
                        notice.provider_trade_no.as_deref(),
                        &now,
                    )
                    .await?;
                self.finish(snap, &tx, PaymentEventKind::Failed, "payment closed by provider", payload)
                    .await?;
                tracing::info!(%provider, transaction_id = %tx.id, "payment failed");
                Ok(WebhookOutcome::Failed)
            }
            (TransactionStatus::Pending, NoticeStatus::Paid) => {
                self.complete(snap, tx, &notice, payload).await?;
                Ok(WebhookOutcome::Completed)
            }
        }
    }

    async fn finish(
        &self,
        mut snap: S::Snapshot,
        tx: &PaymentTransactionRecord,
        kind: PaymentEventKind,
        message: &str,
        payload: Value,
    ) -> Result<(), WebhookError> {
        self.append_event(&mut snap, Some(&tx.id), tx.provider, kind, message, payload)
            .await?;
        self.storage.commit_snapshot(snap).await?;
        Ok(())
    }

    /// PENDING -> COMPLETED, order PENDING -> CONFIRMED, then revenue share.
    async fn complete(
        &self,
        mut snap: S::Snapshot,
        mut tx: PaymentTransactionRecord,
        notice: &Notice,
        payload: Value,
    ) -> Result<(), WebhookError> {
        let now = clock::now();
        self.storage
            .update_transaction_status(
                &mut snap,
                &tx.id,
                TransactionStatus::Pending,
                TransactionStatus::Completed,
                notice.provider_trade_no.as_deref(),
                &now,
            )
            .await?;
        let mut order = self.storage.get_order_for_update(&mut snap, &tx.order_id).await?;
        self.storage
            .update_order_status(
                &mut snap,
                &order.id,
                OrderStatus::Pending,
                OrderStatus::Confirmed,
                &now,
            )
            .await?;
        self.append_event(
            &mut snap,
            Some(&tx.id),
            tx.provider,
            PaymentEventKind::Completed,
            "payment completed",
            payload,
        )
        .await?;
        self.storage.commit_snapshot(snap).await?;

        tx.status = TransactionStatus::Completed;
        tx.completed_at = Some(now.clone());
        tx.updated_at = now.clone();
        if notice.provider_trade_no.is_some() {
            tx.provider_trade_no = notice.provider_trade_no.clone();
        }
        order.status = OrderStatus::Confirmed;
        order.confirmed_at = Some(now.clone());
        order.updated_at = now;
        tracing::info!(
            provider = %tx.provider,
            transaction_id = %tx.id,
            order_id = %order.id,
            amount = %tx.amount,
            "payment completed"
        );

        // The payment stands even when the split fails; the failure is
        // logged and audited for manual settlement.
        if let Err(e) = self.revenue_share.process_revenue_share(&order, &tx).await {
            tracing::error!(order_id = %order.id, transaction_id = %tx.id, error = %e, "revenue share failed");
            if let Err(audit) = self.record_revenue_share_failure(&tx, &e.to_string()).await {
                tracing::error!(transaction_id = %tx.id, error = %audit, "could not record revenue share failure");
            }
        }
        Ok(())
    }

    async fn record_revenue_share_failure(
        &self,
        tx: &PaymentTransactionRecord,
        message: &str,
    ) -> Result<(), StorageError> {
        let mut snap = self.storage.begin_snapshot().await?;
        self.append_event(
            &mut snap,
            Some(&tx.id),
            tx.provider,
            PaymentEventKind::RevenueShareFailed,
            message,
            Value::Object(Default::default()),
        )
        .await?;
        self.storage.commit_snapshot(snap).await
    }
}
