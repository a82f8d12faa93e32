mod shadow;
mod speed;

use super::Database;
use tempfile::NamedTempFile;

/// Open a fresh migrated database backed by a temp file.
///
/// Returns the temp file alongside the handle so the backing file outlives
/// the test body.
pub(crate) async fn open_test_db() -> (NamedTempFile, Database) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (temp_file, db)
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    db.close().await;

    // Reopening the same file must not re-run migration v1
    let db = Database::new(temp_file.path()).await.unwrap();
    assert!(db.list_rules().await.unwrap().is_empty());
    db.close().await;
}
