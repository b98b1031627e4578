use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a marketplace solution.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SolutionStatus {
    Draft,
    PendingReview,
    Approved,
    Rejected,
    Published,
}

impl SolutionStatus {
    /// Whether a solution may move from `self` to `next`.
    ///
    /// This is the whole lifecycle table; services consult it before every
    /// status write.
    pub fn can_transition_to(self, next: SolutionStatus) -> bool {
        use SolutionStatus::*;
        matches!(
            (self, next),
            (Draft, PendingReview)
                | (Rejected, PendingReview)
                | (PendingReview, Approved)
                | (PendingReview, Rejected)
                | (Approved, Published)
        )
    }
}

/// Status of a single review attempt.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    InProgress,
    Completed,
}

/// Outcome recorded on a review.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewDecision {
    Pending,
    Approved,
    Rejected,
    NeedsRevision,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetKind {
    Image,
    Document,
    Model,
    Video,
    Other,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Cancelled,
    Refunded,
}

/// Payment provider that delivers webhooks for a transaction.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentProvider {
    Alipay,
    Wechat,
}

/// Transaction status. Only PENDING -> COMPLETED and PENDING -> FAILED exist.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

/// What happened to a webhook delivery, as written to the audit log.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentEventKind {
    Completed,
    Failed,
    Rejected,
    Duplicate,
    Ignored,
    RevenueShareFailed,
}

/// A marketplace listing as stored in the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionRecord {
    pub id: String,
    pub creator_id: String,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub price: Decimal,
    pub status: SolutionStatus,
    /// Optimistic concurrency counter. Starts at 0.
    pub version: i64,
    /// Denormalized BOM projection. Derived from the BOM rows.
    pub bom: Option<serde_json::Value>,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub created_at: String,
    pub updated_at: String,
    pub submitted_at: Option<String>,
    pub reviewed_at: Option<String>,
    pub published_at: Option<String>,
}

/// One review attempt for a solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub id: String,
    pub solution_id: String,
    pub reviewer_id: String,
    pub status: ReviewStatus,
    pub decision: ReviewDecision,
    /// Solution status immediately before this review.
    pub from_status: SolutionStatus,
    /// Solution status immediately after this review. None while in progress.
    pub to_status: Option<SolutionStatus>,
    pub quality_score: Option<i32>,
    pub completeness_score: Option<i32>,
    pub innovation_score: Option<i32>,
    pub market_potential_score: Option<i32>,
    pub comments: Option<String>,
    pub suggestions: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A single bill-of-materials line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BomItemRecord {
    pub id: String,
    pub solution_id: String,
    pub position: i32,
    pub name: String,
    pub model: Option<String>,
    pub manufacturer: Option<String>,
    pub quantity: i32,
    pub unit_price: Option<Decimal>,
    pub weight_grams: Option<Decimal>,
    pub category: Option<String>,
    pub supplier: Option<String>,
    pub link: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: String,
    pub solution_id: String,
    pub kind: AssetKind,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: String,
    pub buyer_id: String,
    pub solution_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: OrderStatus,
    pub created_at: String,
    pub updated_at: String,
    pub confirmed_at: Option<String>,
}

/// A payment attempt against an order, matched to webhooks by `external_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentTransactionRecord {
    pub id: String,
    pub order_id: String,
    pub provider: PaymentProvider,
    /// Merchant trade number handed to the provider (`out_trade_no`).
    pub external_id: String,
    /// Amount in yuan.
    pub amount: Decimal,
    pub currency: String,
    pub status: TransactionStatus,
    /// Provider-side trade number, known once the provider confirms.
    pub provider_trade_no: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

/// Append-only audit entry for a webhook delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEventRecord {
    pub id: String,
    /// None when the payload never matched a transaction.
    pub transaction_id: Option<String>,
    pub provider: PaymentProvider,
    pub kind: PaymentEventKind,
    pub message: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn lifecycle_transitions() {
        use SolutionStatus::*;
        assert!(Draft.can_transition_to(PendingReview));
        assert!(Rejected.can_transition_to(PendingReview));
        assert!(PendingReview.can_transition_to(Approved));
        assert!(PendingReview.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Published));

        assert!(!Draft.can_transition_to(Approved));
        assert!(!Draft.can_transition_to(Published));
        assert!(!PendingReview.can_transition_to(Published));
        assert!(!Published.can_transition_to(Draft));
        assert!(!Approved.can_transition_to(PendingReview));
        assert!(!PendingReview.can_transition_to(PendingReview));
    }

    #[test]
    fn status_text_matches_serde() {
        let json = serde_json::to_string(&SolutionStatus::PendingReview).unwrap();
        assert_eq!(json, "\"PENDING_REVIEW\"");
        assert_eq!(SolutionStatus::PendingReview.to_string(), "PENDING_REVIEW");
        assert_eq!(
            PaymentEventKind::from_str("REVENUE_SHARE_FAILED").unwrap(),
            PaymentEventKind::RevenueShareFailed
        );
        assert_eq!(ReviewDecision::NeedsRevision.as_ref(), "NEEDS_REVISION");
    }
}
