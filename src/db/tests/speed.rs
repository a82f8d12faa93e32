use super::open_test_db;
use crate::types::ItemId;
use chrono::{TimeZone, Utc};

#[tokio::test]
async fn test_insert_returns_monotonic_rowids() {
    let (_file, db) = open_test_db().await;
    let now = Utc::now();
    let id = ItemId::from("1");

    let first = db.insert_speed_sample(&id, 100, 0, now).await.unwrap();
    let second = db.insert_speed_sample(&id, 200, 0, now).await.unwrap();
    assert!(second > first);

    db.close().await;
}

#[tokio::test]
async fn test_window_query_orders_and_bounds() {
    let (_file, db) = open_test_db().await;
    let t0 = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
    let id = ItemId::from("a");

    for i in 0..6 {
        let ts = t0 + chrono::Duration::minutes(i * 10);
        db.insert_speed_sample(&id, i * 1000, 0, ts).await.unwrap();
    }

    // Window covering samples 2..=4 (minutes 20..=40)
    let from = t0 + chrono::Duration::minutes(20);
    let to = t0 + chrono::Duration::minutes(40);
    let rows = db.speed_samples_in_window(&id, from, to).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].total_downloaded, 2000);
    assert_eq!(rows[2].total_downloaded, 4000);
    assert!(rows.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    db.close().await;
}

#[tokio::test]
async fn test_batch_load_groups_by_item() {
    let (_file, db) = open_test_db().await;
    let t0 = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();

    let a = ItemId::from("a");
    let b = ItemId::from("b");
    db.insert_speed_sample(&a, 100, 0, t0).await.unwrap();
    db.insert_speed_sample(&a, 200, 0, t0 + chrono::Duration::minutes(1)).await.unwrap();
    db.insert_speed_sample(&b, 300, 0, t0).await.unwrap();
    // Too old to appear
    db.insert_speed_sample(&a, 1, 0, t0 - chrono::Duration::hours(2)).await.unwrap();

    let grouped = db
        .speed_samples_since(&[a.clone(), b.clone()], t0 - chrono::Duration::minutes(30))
        .await
        .unwrap();
    assert_eq!(grouped.get(&a).unwrap().len(), 2);
    assert_eq!(grouped.get(&b).unwrap().len(), 1);

    db.close().await;
}

#[tokio::test]
async fn test_prune_deletes_only_old_samples() {
    let (_file, db) = open_test_db().await;
    let t0 = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
    let id = ItemId::from("a");

    db.insert_speed_sample(&id, 1, 0, t0 - chrono::Duration::hours(30)).await.unwrap();
    db.insert_speed_sample(&id, 2, 0, t0 - chrono::Duration::hours(25)).await.unwrap();
    db.insert_speed_sample(&id, 3, 0, t0 - chrono::Duration::hours(1)).await.unwrap();

    let removed = db
        .prune_speed_samples(t0 - chrono::Duration::hours(24))
        .await
        .unwrap();
    assert_eq!(removed, 2);

    let rows = db
        .speed_samples_in_window(&id, t0 - chrono::Duration::hours(48), t0)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].total_downloaded, 3);

    db.close().await;
}
