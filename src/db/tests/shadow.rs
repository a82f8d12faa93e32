use super::open_test_db;
use crate::types::ItemId;
use chrono::{TimeZone, Utc};

#[tokio::test]
async fn test_upsert_and_load_shadow() {
    let (_file, db) = open_test_db().await;
    let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
    let id = ItemId::from("42");

    db.upsert_shadow(&id, 100, 0, "downloading", now).await.unwrap();

    let shadow = db.load_shadow().await.unwrap();
    assert_eq!(shadow.len(), 1);
    let row = shadow.get(&id).unwrap();
    assert_eq!(row.last_total_downloaded, 100);
    assert_eq!(row.last_total_uploaded, 0);
    assert_eq!(row.last_state, "downloading");
    assert_eq!(row.updated_at(), Some(now));

    db.close().await;
}

#[tokio::test]
async fn test_upsert_replaces_existing_row() {
    let (_file, db) = open_test_db().await;
    let t0 = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
    let t1 = t0 + chrono::Duration::minutes(5);
    let id = ItemId::from("42");

    db.upsert_shadow(&id, 100, 0, "downloading", t0).await.unwrap();
    db.upsert_shadow(&id, 200, 10, "seeding", t1).await.unwrap();

    let row = db.get_shadow(&id).await.unwrap().unwrap();
    assert_eq!(row.last_total_downloaded, 200);
    assert_eq!(row.last_total_uploaded, 10);
    assert_eq!(row.last_state, "seeding");
    assert_eq!(row.updated_at(), Some(t1));

    // Still exactly one row
    assert_eq!(db.load_shadow().await.unwrap().len(), 1);

    db.close().await;
}

#[tokio::test]
async fn test_delete_shadow() {
    let (_file, db) = open_test_db().await;
    let now = Utc::now();
    let id = ItemId::from("7");

    db.upsert_shadow(&id, 50, 0, "downloading", now).await.unwrap();
    db.delete_shadow(&id).await.unwrap();

    assert!(db.get_shadow(&id).await.unwrap().is_none());

    // Deleting a missing row is not an error
    db.delete_shadow(&id).await.unwrap();

    db.close().await;
}
