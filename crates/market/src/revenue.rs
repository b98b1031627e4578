use async_trait::async_trait;
use openaero_storage::{OrderRecord, PaymentTransactionRecord};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::error::MarketError;

#[derive(Debug, thiserror::Error)]
#[error("revenue share failed: {0}")]
pub struct RevenueShareError(pub String);

/// How a confirmed payment is divided between platform and creator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueSplit {
    pub order_id: String,
    pub transaction_id: String,
    pub gross: Decimal,
    pub platform_fee: Decimal,
    pub creator_amount: Decimal,
}

/// Invoked once per completed payment, after the completion has committed.
#[async_trait]
pub trait RevenueShare: Send + Sync {
    async fn process_revenue_share(
        &self,
        order: &OrderRecord,
        transaction: &PaymentTransactionRecord,
    ) -> Result<RevenueSplit, RevenueShareError>;
}

/// Takes a fixed platform fee and credits the rest to the creator.
#[derive(Debug, Clone, Copy)]
pub struct FixedRateRevenueShare {
    rate: Decimal,
}

impl FixedRateRevenueShare {
    /// 10%.
    pub const DEFAULT_RATE: Decimal = Decimal::from_parts(10, 0, 0, false, 2);

    pub fn new(rate: Decimal) -> Result<Self, MarketError> {
        if rate < Decimal::ZERO || rate > Decimal::ONE {
            return Err(MarketError::Validation(format!(
                "platform fee rate must be between 0 and 1, got {rate}"
            )));
        }
        Ok(FixedRateRevenueShare { rate })
    }

    pub fn rate(&self) -> Decimal {
        self.rate
    }

    /// `(platform_fee, creator_amount)`. The fee is rounded to the fen.
    pub fn split(&self, gross: Decimal) -> (Decimal, Decimal) {
        let fee = (gross * self.rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        (fee, gross - fee)
    }
}

impl Default for FixedRateRevenueShare {
    fn default() -> Self {
        FixedRateRevenueShare {
            rate: Self::DEFAULT_RATE,
        }
    }
}

#[async_trait]
impl RevenueShare for FixedRateRevenueShare {
    async fn process_revenue_share(
        &self,
        order: &OrderRecord,
        transaction: &PaymentTransactionRecord,
    ) -> Result<RevenueSplit, RevenueShareError> {
        let (platform_fee, creator_amount) = self.split(transaction.amount);
        let split = RevenueSplit {
            order_id: order.id.clone(),
            transaction_id: transaction.id.clone(),
            gross: transaction.amount,
            platform_fee,
            creator_amount,
        };
        tracing::info!(
            order_id = %split.order_id,
            solution_id = %order.solution_id,
            gross = %split.gross,
            platform_fee = %split.platform_fee,
            creator_amount = %split.creator_amount,
            "revenue share computed"
        );
        Ok(split)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn fee_rounds_to_fen() {
        let share = FixedRateRevenueShare::new(d("0.15")).unwrap();
        let (fee, creator) = share.split(d("99.99"));
        assert_eq!(fee, d("15.00"));
        assert_eq!(creator, d("84.99"));

        let (fee, creator) = FixedRateRevenueShare::default().split(d("0.05"));
        assert_eq!(fee, d("0.01"));
        assert_eq!(creator, d("0.04"));
    }

    #[test]
    fn rate_bounds() {
        assert!(FixedRateRevenueShare::new(d("1.01")).is_err());
        assert!(FixedRateRevenueShare::new(d("-0.1")).is_err());
        assert_eq!(FixedRateRevenueShare::default().rate(), d("0.10"));
    }
}
