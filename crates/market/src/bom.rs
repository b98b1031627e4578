//! Bill of materials: relational rows plus an optional JSON projection.
//!
//! The `solution_bom_items` rows are authoritative. When dual write is enabled
//! the solution's `bom` column is rewritten from those rows in the same
//! snapshot, so older readers of the JSON column keep working. Reads prefer
//! the rows and fall back to whatever JSON an older writer left behind.

use std::str::FromStr;
use std::sync::OnceLock;

use openaero_storage::{BomItemRecord, MarketStorage, SolutionRecord};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::actor::Actor;
use crate::clock;
use crate::error::MarketError;
use crate::flags::FeatureFlags;
use crate::lifecycle::{can_edit_content, get_solution, save_solution};

static BOM_SCHEMA_STR: &str = include_str!("../schema/bom-update.json");

/// One BOM line as exchanged over the API and stored in the projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BomItem {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    pub quantity: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_grams: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl BomItem {
    fn into_record(self, solution_id: &str, position: i32, created_at: &str) -> BomItemRecord {
        BomItemRecord {
            id: clock::new_id(),
            solution_id: solution_id.to_string(),
            position,
            name: self.name,
            model: self.model,
            manufacturer: self.manufacturer,
            quantity: self.quantity,
            unit_price: self.unit_price,
            weight_grams: self.weight_grams,
            category: self.category,
            supplier: self.supplier,
            link: self.link,
            notes: self.notes,
            created_at: created_at.to_string(),
        }
    }
}

impl From<BomItemRecord> for BomItem {
    fn from(r: BomItemRecord) -> Self {
        BomItem {
            name: r.name,
            model: r.model,
            manufacturer: r.manufacturer,
            quantity: r.quantity,
            unit_price: r.unit_price,
            weight_grams: r.weight_grams,
            category: r.category,
            supplier: r.supplier,
            link: r.link,
            notes: r.notes,
        }
    }
}

/// Body of a BOM replace request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BomUpdate {
    pub items: Vec<BomItem>,
    /// When present, the write fails with Conflict unless the solution is
    /// still at this version.
    #[serde(default)]
    pub expected_version: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BomSource {
    Relational,
    LegacyJson,
    Empty,
}

/// A solution's BOM as served to readers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BomView {
    pub solution_id: String,
    pub source: BomSource,
    pub items: Vec<BomItem>,
    pub total_cost: Decimal,
    pub total_weight: Decimal,
    pub item_count: usize,
}

impl BomView {
    /// View over items whose totals must be representable. Used on the write
    /// path, where an overflow rejects the request.
    fn checked(
        solution_id: &str,
        source: BomSource,
        items: Vec<BomItem>,
    ) -> Result<Self, MarketError> {
        let (total_cost, total_weight) = totals(&items).ok_or_else(|| {
            MarketError::Validation("BOM totals exceed the supported range".to_string())
        })?;
        Ok(BomView {
            solution_id: solution_id.to_string(),
            source,
            item_count: items.len(),
            items,
            total_cost,
            total_weight,
        })
    }

    /// View over stored items. Items that would push a total out of range are
    /// dropped so one bad row cannot make the whole BOM unreadable.
    fn lenient(solution_id: &str, source: BomSource, items: Vec<BomItem>) -> Self {
        let mut kept = Vec::with_capacity(items.len());
        let (mut total_cost, mut total_weight) = (Decimal::ZERO, Decimal::ZERO);
        for item in items {
            let summed = line_totals(&item).and_then(|(cost, weight)| {
                Some((
                    total_cost.checked_add(cost)?,
                    total_weight.checked_add(weight)?,
                ))
            });
            match summed {
                Some((cost, weight)) => {
                    total_cost = cost;
                    total_weight = weight;
                    kept.push(item);
                }
                None => tracing::warn!(
                    solution_id,
                    item = %item.name,
                    "skipping BOM item whose totals overflow"
                ),
            }
        }
        BomView {
            solution_id: solution_id.to_string(),
            source,
            item_count: kept.len(),
            items: kept,
            total_cost,
            total_weight,
        }
    }

    /// The JSON written to `solutions.bom` under dual write.
    pub fn projection(&self) -> Result<Value, MarketError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Projection<'a> {
            items: &'a [BomItem],
            total_cost: Decimal,
            total_weight: Decimal,
            item_count: usize,
        }
        serde_json::to_value(Projection {
            items: &self.items,
            total_cost: self.total_cost,
            total_weight: self.total_weight,
            item_count: self.item_count,
        })
        .map_err(|e| MarketError::Internal(format!("BOM projection: {e}")))
    }
}

/// `(Σ quantity × unit_price, Σ quantity × weight_grams)`. Missing values
/// count as zero. `None` when either sum overflows.
pub fn totals(items: &[BomItem]) -> Option<(Decimal, Decimal)> {
    items
        .iter()
        .try_fold((Decimal::ZERO, Decimal::ZERO), |(cost, weight), item| {
            let (line_cost, line_weight) = line_totals(item)?;
            Some((cost.checked_add(line_cost)?, weight.checked_add(line_weight)?))
        })
}

fn line_totals(item: &BomItem) -> Option<(Decimal, Decimal)> {
    let qty = Decimal::from(item.quantity);
    Some((
        qty.checked_mul(item.unit_price.unwrap_or_default())?,
        qty.checked_mul(item.weight_grams.unwrap_or_default())?,
    ))
}

fn schema_validator() -> Result<&'static jsonschema::Validator, MarketError> {
    static VALIDATOR: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();
    VALIDATOR
        .get_or_init(|| {
            let schema: Value = serde_json::from_str(BOM_SCHEMA_STR)
                .map_err(|e| format!("failed to parse embedded BOM schema: {e}"))?;
            jsonschema::validator_for(&schema)
                .map_err(|e| format!("failed to compile embedded BOM schema: {e}"))
        })
        .as_ref()
        .map_err(|e| MarketError::Internal(e.clone()))
}

/// Check a BOM replace body against the schema and the domain rules,
/// reporting every problem found.
pub fn validate_update(payload: &Value) -> Result<BomUpdate, MarketError> {
    let validator = schema_validator()?;
    let errors: Vec<String> = validator
        .iter_errors(payload)
        .map(|e| format!("{}", e))
        .collect();
    if !errors.is_empty() {
        return Err(MarketError::Validation(errors.join("; ")));
    }

    let mut update: BomUpdate = serde_json::from_value(payload.clone())
        .map_err(|e| MarketError::Validation(format!("invalid BOM: {e}")))?;

    let mut problems = Vec::new();
    for (i, item) in update.items.iter_mut().enumerate() {
        item.name = item.name.trim().to_string();
        if item.name.is_empty() {
            problems.push(format!("items[{i}].name must not be blank"));
        }
        if item.quantity < 1 {
            problems.push(format!("items[{i}].quantity must be at least 1"));
        }
        if item.unit_price.is_some_and(|p| p < Decimal::ZERO) {
            problems.push(format!("items[{i}].unitPrice must not be negative"));
        }
        if item.weight_grams.is_some_and(|w| w < Decimal::ZERO) {
            problems.push(format!("items[{i}].weightGrams must not be negative"));
        }
    }
    if problems.is_empty() {
        Ok(update)
    } else {
        Err(MarketError::Validation(problems.join("; ")))
    }
}

/// Replace the whole BOM of a solution.
pub async fn replace_bom<S: MarketStorage>(
    storage: &S,
    flags: FeatureFlags,
    actor: &Actor,
    solution_id: &str,
    payload: &Value,
) -> Result<BomView, MarketError> {
    let update = validate_update(payload)?;
    let view = BomView::checked(solution_id, BomSource::Relational, update.items)?;

    let mut snap = storage.begin_snapshot().await?;
    let mut solution = storage.get_solution_for_update(&mut snap, solution_id).await?;
    if !can_edit_content(actor, &solution) {
        return Err(MarketError::Forbidden(format!(
            "cannot edit the BOM of solution {solution_id} while it is {}",
            solution.status
        )));
    }
    if let Some(expected) = update.expected_version {
        if expected != solution.version {
            return Err(MarketError::Conflict(format!(
                "solution {solution_id} is at version {}, expected {expected}",
                solution.version
            )));
        }
    }

    let now = clock::now();
    let records = view
        .items
        .iter()
        .cloned()
        .enumerate()
        .map(|(i, item)| item.into_record(solution_id, i as i32, &now))
        .collect();
    storage
        .replace_bom_items(&mut snap, solution_id, records)
        .await?;

    // The rows are authoritative; without dual write any older projection
    // is stale and would shadow an empty BOM on read.
    solution.bom = if flags.should_dual_write() {
        Some(view.projection()?)
    } else {
        None
    };
    solution.updated_at = now;
    let solution = save_solution(storage, &mut snap, solution).await?;
    storage.commit_snapshot(snap).await?;

    tracing::info!(
        solution_id,
        items = view.item_count,
        version = solution.version,
        dual_write = flags.should_dual_write(),
        "BOM replaced"
    );
    Ok(view)
}

/// Read a solution's BOM: rows first, then the legacy JSON column.
pub async fn read_bom<S: MarketStorage>(
    storage: &S,
    actor: &Actor,
    solution_id: &str,
) -> Result<BomView, MarketError> {
    let solution = get_solution(storage, actor, solution_id).await?;
    let rows = storage.list_bom_items(solution_id).await?;
    if !rows.is_empty() {
        let items = rows.into_iter().map(BomItem::from).collect();
        return Ok(BomView::lenient(solution_id, BomSource::Relational, items));
    }
    Ok(legacy_view(&solution))
}

fn legacy_view(solution: &SolutionRecord) -> BomView {
    let items = solution.bom.as_ref().map(parse_legacy).unwrap_or_default();
    if items.is_empty() {
        BomView::lenient(&solution.id, BomSource::Empty, items)
    } else {
        BomView::lenient(&solution.id, BomSource::LegacyJson, items)
    }
}

/// Parse the JSON BOM shapes older writers produced: a bare array of items,
/// or an object holding the array under `items` or `components`. Entries
/// without a name are skipped.
pub fn parse_legacy(value: &Value) -> Vec<BomItem> {
    let entries = match value {
        Value::Array(entries) => entries.as_slice(),
        Value::Object(obj) => match obj.get("items").or_else(|| obj.get("components")) {
            Some(Value::Array(entries)) => entries.as_slice(),
            _ => &[],
        },
        _ => &[],
    };
    entries
        .iter()
        .filter_map(|v| v.as_object())
        .filter_map(legacy_item)
        .collect()
}

fn legacy_item(obj: &Map<String, Value>) -> Option<BomItem> {
    let name = string_field(obj, &["name"])?;
    let quantity = int_field(obj, &["quantity", "qty"])
        .filter(|q| *q >= 1)
        .unwrap_or(1);
    Some(BomItem {
        name,
        model: string_field(obj, &["model"]),
        manufacturer: string_field(obj, &["manufacturer"]),
        quantity,
        unit_price: decimal_field(obj, &["unitPrice", "unit_price", "price"]),
        weight_grams: decimal_field(obj, &["weightGrams", "weight_grams", "weight"]),
        category: string_field(obj, &["category"]),
        supplier: string_field(obj, &["supplier"]),
        link: string_field(obj, &["link"]),
        notes: string_field(obj, &["notes"]),
    })
}

fn first<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn string_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    match first(obj, keys)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn int_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<i32> {
    let raw = match first(obj, keys)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    i32::try_from(raw).ok()
}

fn decimal_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<Decimal> {
    let raw = match first(obj, keys)? {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .ok()
        .filter(|d| *d >= Decimal::ZERO)
}
