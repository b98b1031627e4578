mod common;

use common::*;
use openaero_market::bom::{self, BomSource};
use openaero_market::{Actor, FeatureFlags, MarketError, Role};
use openaero_storage::{MarketStorage, MemoryStorage, SolutionRecord};
use rust_decimal::Decimal;
use serde_json::json;

const DUAL_WRITE: FeatureFlags = FeatureFlags {
    bom_dual_write: true,
};

fn payload() -> serde_json::Value {
    json!({
        "items": [
            {"name": "Frame X8", "quantity": 1, "unitPrice": "1200.00", "weightGrams": "2100",
             "manufacturer": "Tarot", "category": "airframe"},
            {"name": "Motor 6215", "quantity": 8, "unitPrice": "389.00", "weightGrams": "262"},
            {"name": "Flight controller", "quantity": 1, "unitPrice": "2450.00", "link": "https://example.com/fc"}
        ]
    })
}

#[tokio::test]
async fn put_then_get_returns_rows_in_order() {
    let storage = MemoryStorage::new();
    let sol = draft(&storage, "Sprayer").await;

    let written = bom::replace_bom(&storage, DUAL_WRITE, &creator(), &sol.id, &payload())
        .await
        .unwrap();
    assert_eq!(written.source, BomSource::Relational);
    assert_eq!(written.item_count, 3);
    assert_eq!(written.total_cost, Decimal::new(676200, 2));
    assert_eq!(written.total_weight, Decimal::from(4196));

    let read = bom::read_bom(&storage, &creator(), &sol.id).await.unwrap();
    assert_eq!(read, written);
    let names: Vec<_> = read.items.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["Frame X8", "Motor 6215", "Flight controller"]);

    let rows = storage.list_bom_items(&sol.id).await.unwrap();
    let positions: Vec<_> = rows.iter().map(|r| r.position).collect();
    assert_eq!(positions, vec![0, 1, 2]);
}

#[tokio::test]
async fn dual_write_maintains_the_projection() {
    let storage = MemoryStorage::new();
    let sol = draft(&storage, "Projection").await;

    let view = bom::replace_bom(&storage, DUAL_WRITE, &creator(), &sol.id, &payload())
        .await
        .unwrap();
    let stored = storage.get_solution(&sol.id).await.unwrap();
    assert_eq!(stored.version, sol.version + 1);
    let projection = stored.bom.expect("projection written");
    assert_eq!(projection, view.projection().unwrap());
    assert_eq!(projection["itemCount"], json!(3));
    assert_eq!(projection["totalCost"], json!("6762.00"));

    // Replacing with an empty list rewrites the projection too.
    bom::replace_bom(&storage, DUAL_WRITE, &creator(), &sol.id, &json!({"items": []}))
        .await
        .unwrap();
    let stored = storage.get_solution(&sol.id).await.unwrap();
    assert_eq!(stored.bom.unwrap()["itemCount"], json!(0));
    let read = bom::read_bom(&storage, &creator(), &sol.id).await.unwrap();
    assert_eq!(read.source, BomSource::Empty);
}

#[tokio::test]
async fn without_dual_write_only_the_version_moves() {
    let storage = MemoryStorage::new();
    let sol = draft(&storage, "Rows only").await;

    bom::replace_bom(&storage, FeatureFlags::default(), &creator(), &sol.id, &payload())
        .await
        .unwrap();
    let stored = storage.get_solution(&sol.id).await.unwrap();
    assert_eq!(stored.bom, None);
    assert_eq!(stored.version, sol.version + 1);
    assert_eq!(storage.list_bom_items(&sol.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn legacy_json_is_read_when_no_rows_exist() {
    let storage = MemoryStorage::new();
    let legacy = SolutionRecord {
        id: "sol-legacy".to_string(),
        creator_id: "creator-1".to_string(),
        title: "Imported listing".to_string(),
        description: String::new(),
        category: None,
        price: Decimal::new(50000, 2),
        status: openaero_storage::SolutionStatus::Draft,
        version: 4,
        bom: Some(json!({"components": [
            {"name": "Frame X8", "qty": 1, "price": 1200, "weight": 2100},
            {"name": "Motor 6215", "qty": "8", "unitPrice": "389.00", "weight": 262}
        ]})),
        created_at: "2024-06-01T00:00:00.000000Z".to_string(),
        updated_at: "2024-06-01T00:00:00.000000Z".to_string(),
        submitted_at: None,
        reviewed_at: None,
        published_at: None,
    };
    let mut snap = storage.begin_snapshot().await.unwrap();
    storage.insert_solution(&mut snap, legacy).await.unwrap();
    storage.commit_snapshot(snap).await.unwrap();

    let view = bom::read_bom(&storage, &creator(), "sol-legacy").await.unwrap();
    assert_eq!(view.source, BomSource::LegacyJson);
    assert_eq!(view.item_count, 2);
    assert_eq!(view.items[1].quantity, 8);
    assert_eq!(view.total_cost, Decimal::new(431200, 2));
    assert_eq!(view.total_weight, Decimal::from(4196));

    // The same items written through the pipeline read back identically.
    let items = serde_json::to_value(&view.items).unwrap();
    let written = bom::replace_bom(
        &storage,
        DUAL_WRITE,
        &creator(),
        "sol-legacy",
        &json!({ "items": items }),
    )
    .await
    .unwrap();
    assert_eq!(written.items, view.items);
    let again = bom::read_bom(&storage, &creator(), "sol-legacy").await.unwrap();
    assert_eq!(again.source, BomSource::Relational);
    assert_eq!(again.items, view.items);
}

#[tokio::test]
async fn empty_bom_reads_as_empty() {
    let storage = MemoryStorage::new();
    let sol = draft(&storage, "Nothing yet").await;
    let view = bom::read_bom(&storage, &creator(), &sol.id).await.unwrap();
    assert_eq!(view.source, BomSource::Empty);
    assert!(view.items.is_empty());
    assert_eq!(view.total_cost, Decimal::ZERO);
}

#[tokio::test]
async fn edit_rights_follow_status_and_role() {
    let storage = MemoryStorage::new();
    let sol = pending(&storage, "Locked").await;

    let err = bom::replace_bom(&storage, DUAL_WRITE, &creator(), &sol.id, &payload())
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Forbidden(_)));

    let stranger = Actor::new("creator-2", Role::Creator);
    let other = draft(&storage, "Someone else's").await;
    let err = bom::replace_bom(&storage, DUAL_WRITE, &stranger, &other.id, &payload())
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Forbidden(_)));

    bom::replace_bom(&storage, DUAL_WRITE, &admin(), &sol.id, &payload())
        .await
        .unwrap();
}

#[tokio::test]
async fn stale_expected_version_conflicts() {
    let storage = MemoryStorage::new();
    let sol = draft(&storage, "Racing editors").await;

    let mut body = payload();
    body["expectedVersion"] = json!(sol.version);
    bom::replace_bom(&storage, DUAL_WRITE, &creator(), &sol.id, &body)
        .await
        .unwrap();

    // A second editor still holding the old version loses.
    let err = bom::replace_bom(&storage, DUAL_WRITE, &creator(), &sol.id, &body)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)));
}

#[tokio::test]
async fn invalid_payload_writes_nothing() {
    let storage = MemoryStorage::new();
    let sol = draft(&storage, "Invalid").await;

    let err = bom::replace_bom(
        &storage,
        DUAL_WRITE,
        &creator(),
        &sol.id,
        &json!({"items": [{"name": "Motor", "quantity": 0}]}),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));
    assert!(storage.list_bom_items(&sol.id).await.unwrap().is_empty());
    assert_eq!(storage.get_solution(&sol.id).await.unwrap().version, 0);
}

#[tokio::test]
async fn draft_boms_are_hidden_from_buyers() {
    let storage = MemoryStorage::new();
    let sol = draft(&storage, "Public").await;
    bom::replace_bom(&storage, DUAL_WRITE, &creator(), &sol.id, &payload())
        .await
        .unwrap();

    let err = bom::read_bom(&storage, &buyer(), &sol.id).await.unwrap_err();
    assert!(matches!(err, MarketError::Forbidden(_)));
}

#[tokio::test]
async fn empty_put_after_dual_write_reads_empty() {
    let storage = MemoryStorage::new();
    let sol = draft(&storage, "Flag rolled back").await;

    bom::replace_bom(
        &storage,
        DUAL_WRITE,
        &creator(),
        &sol.id,
        &json!({"items": [{"name": "Motor 6215", "quantity": 8}]}),
    )
    .await
    .unwrap();
    bom::replace_bom(
        &storage,
        FeatureFlags::default(),
        &creator(),
        &sol.id,
        &json!({"items": []}),
    )
    .await
    .unwrap();

    let stored = storage.get_solution(&sol.id).await.unwrap();
    assert_eq!(stored.bom, None);
    let read = bom::read_bom(&storage, &creator(), &sol.id).await.unwrap();
    assert_eq!(read.source, BomSource::Empty);
    assert!(read.items.is_empty());
}

#[tokio::test]
async fn oversized_amounts_are_rejected_before_writing() {
    let storage = MemoryStorage::new();
    let sol = draft(&storage, "Gold plated").await;

    let err = bom::replace_bom(
        &storage,
        DUAL_WRITE,
        &creator(),
        &sol.id,
        &json!({"items": [{
            "name": "Gold frame",
            "quantity": 100000,
            "unitPrice": "9999999999999999999999999999"
        }]}),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)), "{err}");
    assert!(storage.list_bom_items(&sol.id).await.unwrap().is_empty());
    assert_eq!(storage.get_solution(&sol.id).await.unwrap().version, 0);
}

#[tokio::test]
async fn overflowing_legacy_items_are_skipped_on_read() {
    let storage = MemoryStorage::new();
    let mut legacy = draft(&storage, "Corrupt import").await;
    legacy.bom = Some(json!([
        {"name": "Frame X8", "qty": 1, "price": "1200.00"},
        {"name": "Gold frame", "qty": 100000, "price": "79228162514264337593543950335"}
    ]));
    let mut snap = storage.begin_snapshot().await.unwrap();
    storage
        .update_solution(&mut snap, legacy.clone(), legacy.version)
        .await
        .unwrap();
    storage.commit_snapshot(snap).await.unwrap();

    let view = bom::read_bom(&storage, &creator(), &legacy.id).await.unwrap();
    assert_eq!(view.source, BomSource::LegacyJson);
    assert_eq!(view.item_count, 1);
    assert_eq!(view.items[0].name, "Frame X8");
    assert_eq!(view.total_cost, Decimal::new(120000, 2));
}
