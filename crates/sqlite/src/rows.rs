//! Row decoding. Enums, money and JSON are stored as TEXT and parsed back
//! here; a value that does not parse is reported as a backend error.

use std::fmt::Display;
use std::str::FromStr;

use openaero_storage::{
    AssetRecord, BomItemRecord, OrderRecord, PaymentEventRecord, PaymentTransactionRecord,
    ReviewRecord, SolutionRecord, StorageError,
};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub(crate) fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn get<T>(row: &SqliteRow, column: &str) -> Result<T, StorageError>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).map_err(backend)
}

fn parse<T>(column: &str, raw: &str) -> Result<T, StorageError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse()
        .map_err(|e| StorageError::Backend(format!("invalid {column} '{raw}': {e}")))
}

fn text<T>(row: &SqliteRow, column: &str) -> Result<T, StorageError>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: String = get(row, column)?;
    parse(column, &raw)
}

fn opt_text<T>(row: &SqliteRow, column: &str) -> Result<Option<T>, StorageError>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: Option<String> = get(row, column)?;
    raw.map(|r| parse(column, &r)).transpose()
}

fn json(raw: &str) -> Result<serde_json::Value, StorageError> {
    serde_json::from_str(raw).map_err(|e| StorageError::Backend(format!("invalid JSON: {e}")))
}

pub(crate) fn to_json_text(value: &serde_json::Value) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::Backend(e.to_string()))
}

pub(crate) fn opt_decimal_text(value: Option<Decimal>) -> Option<String> {
    value.map(|d| d.to_string())
}

pub(crate) fn solution(row: &SqliteRow) -> Result<SolutionRecord, StorageError> {
    let bom: Option<String> = get(row, "bom")?;
    Ok(SolutionRecord {
        id: get(row, "id")?,
        creator_id: get(row, "creator_id")?,
        title: get(row, "title")?,
        description: get(row, "description")?,
        category: get(row, "category")?,
        price: text::<Decimal>(row, "price")?,
        status: text(row, "status")?,
        version: get(row, "version")?,
        bom: bom.as_deref().map(json).transpose()?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
        submitted_at: get(row, "submitted_at")?,
        reviewed_at: get(row, "reviewed_at")?,
        published_at: get(row, "published_at")?,
    })
}

pub(crate) fn review(row: &SqliteRow) -> Result<ReviewRecord, StorageError> {
    Ok(ReviewRecord {
        id: get(row, "id")?,
        solution_id: get(row, "solution_id")?,
        reviewer_id: get(row, "reviewer_id")?,
        status: text(row, "status")?,
        decision: text(row, "decision")?,
        from_status: text(row, "from_status")?,
        to_status: opt_text(row, "to_status")?,
        quality_score: get(row, "quality_score")?,
        completeness_score: get(row, "completeness_score")?,
        innovation_score: get(row, "innovation_score")?,
        market_potential_score: get(row, "market_potential_score")?,
        comments: get(row, "comments")?,
        suggestions: get(row, "suggestions")?,
        started_at: get(row, "started_at")?,
        completed_at: get(row, "completed_at")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

pub(crate) fn bom_item(row: &SqliteRow) -> Result<BomItemRecord, StorageError> {
    Ok(BomItemRecord {
        id: get(row, "id")?,
        solution_id: get(row, "solution_id")?,
        position: get(row, "position")?,
        name: get(row, "name")?,
        model: get(row, "model")?,
        manufacturer: get(row, "manufacturer")?,
        quantity: get(row, "quantity")?,
        unit_price: opt_text(row, "unit_price")?,
        weight_grams: opt_text(row, "weight_grams")?,
        category: get(row, "category")?,
        supplier: get(row, "supplier")?,
        link: get(row, "link")?,
        notes: get(row, "notes")?,
        created_at: get(row, "created_at")?,
    })
}

pub(crate) fn asset(row: &SqliteRow) -> Result<AssetRecord, StorageError> {
    Ok(AssetRecord {
        id: get(row, "id")?,
        solution_id: get(row, "solution_id")?,
        kind: text(row, "kind")?,
        url: get(row, "url")?,
        title: get(row, "title")?,
        description: get(row, "description")?,
        created_at: get(row, "created_at")?,
    })
}

pub(crate) fn order(row: &SqliteRow) -> Result<OrderRecord, StorageError> {
    Ok(OrderRecord {
        id: get(row, "id")?,
        buyer_id: get(row, "buyer_id")?,
        solution_id: get(row, "solution_id")?,
        amount: text(row, "amount")?,
        currency: get(row, "currency")?,
        status: text(row, "status")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
        confirmed_at: get(row, "confirmed_at")?,
    })
}

pub(crate) fn transaction(row: &SqliteRow) -> Result<PaymentTransactionRecord, StorageError> {
    Ok(PaymentTransactionRecord {
        id: get(row, "id")?,
        order_id: get(row, "order_id")?,
        provider: text(row, "provider")?,
        external_id: get(row, "external_id")?,
        amount: text(row, "amount")?,
        currency: get(row, "currency")?,
        status: text(row, "status")?,
        provider_trade_no: get(row, "provider_trade_no")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
        completed_at: get(row, "completed_at")?,
    })
}

pub(crate) fn payment_event(row: &SqliteRow) -> Result<PaymentEventRecord, StorageError> {
    let payload: String = get(row, "payload")?;
    Ok(PaymentEventRecord {
        id: get(row, "id")?,
        transaction_id: get(row, "transaction_id")?,
        provider: text(row, "provider")?,
        kind: text(row, "kind")?,
        message: get(row, "message")?,
        payload: json(&payload)?,
        created_at: get(row, "created_at")?,
    })
}
