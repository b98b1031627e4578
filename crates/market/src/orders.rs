use openaero_storage::{
    MarketStorage, OrderRecord, OrderStatus, PaymentEventRecord, PaymentProvider,
    PaymentTransactionRecord, SolutionStatus, TransactionStatus,
};
use serde::{Deserialize, Serialize};

use crate::actor::{Actor, Role};
use crate::clock;
use crate::error::MarketError;

pub const CURRENCY: &str = "CNY";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub solution_id: String,
    pub provider: PaymentProvider,
}

/// An order together with the payment transaction the buyer should pay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedOrder {
    pub order: OrderRecord,
    pub transaction: PaymentTransactionRecord,
}

/// Open an order for a published solution at its current price.
pub async fn create_order<S: MarketStorage>(
    storage: &S,
    actor: &Actor,
    input: NewOrder,
) -> Result<CreatedOrder, MarketError> {
    let mut snap = storage.begin_snapshot().await?;
    let solution = storage
        .get_solution_for_update(&mut snap, &input.solution_id)
        .await?;
    if solution.status != SolutionStatus::Published {
        return Err(MarketError::Conflict(format!(
            "solution {} is {}, only published solutions can be ordered",
            solution.id, solution.status
        )));
    }

    let now = clock::now();
    let order = OrderRecord {
        id: clock::new_id(),
        buyer_id: actor.user_id.clone(),
        solution_id: solution.id.clone(),
        amount: solution.price,
        currency: CURRENCY.to_string(),
        status: OrderStatus::Pending,
        created_at: now.clone(),
        updated_at: now.clone(),
        confirmed_at: None,
    };
    let transaction = PaymentTransactionRecord {
        id: clock::new_id(),
        order_id: order.id.clone(),
        provider: input.provider,
        external_id: clock::new_trade_no(),
        amount: order.amount,
        currency: CURRENCY.to_string(),
        status: TransactionStatus::Pending,
        provider_trade_no: None,
        created_at: now.clone(),
        updated_at: now,
        completed_at: None,
    };
    storage.insert_order(&mut snap, order.clone()).await?;
    storage
        .insert_transaction(&mut snap, transaction.clone())
        .await?;
    storage.commit_snapshot(snap).await?;

    tracing::info!(
        order_id = %order.id,
        solution_id = %order.solution_id,
        provider = %transaction.provider,
        external_id = %transaction.external_id,
        amount = %order.amount,
        "order created"
    );
    Ok(CreatedOrder { order, transaction })
}

/// The buyer and admins may read an order.
pub async fn get_order<S: MarketStorage>(
    storage: &S,
    actor: &Actor,
    order_id: &str,
) -> Result<OrderRecord, MarketError> {
    let order = storage.get_order(order_id).await?;
    if !actor.owns(&order.buyer_id) && !actor.is_admin() {
        return Err(MarketError::Forbidden(format!(
            "order {order_id} belongs to another buyer"
        )));
    }
    Ok(order)
}

/// The payment audit log, newest entries first. Admin only.
pub async fn list_payment_events<S: MarketStorage>(
    storage: &S,
    actor: &Actor,
    transaction_id: Option<&str>,
    limit: usize,
) -> Result<Vec<PaymentEventRecord>, MarketError> {
    actor.require(&[Role::Admin], "read payment events")?;
    Ok(storage.list_payment_events(transaction_id, limit).await?)
}
