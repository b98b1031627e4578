//! OpenAero marketplace domain services.
//!
//! Every operation here takes a [`MarketStorage`](openaero_storage::MarketStorage)
//! handle and the calling [`Actor`], runs its writes inside a single storage
//! snapshot, and reports failures as [`MarketError`] (or [`WebhookError`] for
//! payment notifications).

pub mod actor;
pub mod bom;
pub mod clock;
pub mod error;
pub mod flags;
pub mod lifecycle;
pub mod notify;
pub mod orders;
pub mod payment;
pub mod revenue;
pub mod review;

pub use actor::{Actor, Role};
pub use bom::{BomItem, BomSource, BomView};
pub use error::MarketError;
pub use flags::FeatureFlags;
pub use notify::{LogNotifier, ReviewNotifier};
pub use payment::{PaymentReconciler, WebhookError, WebhookOutcome};
pub use revenue::{FixedRateRevenueShare, RevenueShare, RevenueSplit};
