//! Tests for database initialization and schema migrations

use pdt_common::db::init::init_database;
use pdt_common::db::migrations::{get_schema_version, run_migrations};
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("pdt.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("pdt.db");

    let pool1 = init_database(&db_path).await;
    assert!(pool1.is_ok());
    drop(pool1);

    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());
}

#[tokio::test]
async fn test_schema_version_is_current_after_init() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("pdt.db")).await.unwrap();

    assert_eq!(get_schema_version(&pool).await.unwrap(), 2);

    // Running again is a no-op
    run_migrations(&pool).await.unwrap();
    assert_eq!(get_schema_version(&pool).await.unwrap(), 2);
}

#[tokio::test]
async fn test_foreign_keys_are_enforced() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("pdt.db")).await.unwrap();

    let result = sqlx::query("INSERT INTO case_edits (case_id, kind, params, datetime) VALUES (999, 'title', '{}', '2015-01-01T00:00:00Z')")
        .execute(&pool)
        .await;
    assert!(result.is_err(), "edit of a missing case must be rejected");
}

#[tokio::test]
async fn test_legacy_status_codes_are_normalized() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("pdt.db")).await.unwrap();

    for sql in [
        "INSERT INTO instances (id, name) VALUES (1, 'prod')",
        "INSERT INTO releases (id, number, datetime) VALUES (1, 5, '2015-01-01T00:00:00Z')",
        "INSERT INTO cases (id, title) VALUES (10, 'Case')",
        "INSERT INTO migrations (id, uid, case_id) VALUES (1, 'm1', 10)",
        "INSERT INTO migration_reports (migration_id, instance_id, status, datetime) VALUES (1, 1, 'apl', '2015-01-01T00:00:00Z')",
        "INSERT INTO deployment_reports (release_id, instance_id, status, datetime) VALUES (1, 1, 'dpl', '2015-01-01T00:00:00Z')",
        "DELETE FROM schema_version WHERE version = 2",
    ] {
        sqlx::query(sql).execute(&pool).await.unwrap();
    }

    run_migrations(&pool).await.unwrap();

    let report_status: String = sqlx::query_scalar("SELECT status FROM migration_reports")
        .fetch_one(&pool)
        .await
        .unwrap();
    let deployment_status: String = sqlx::query_scalar("SELECT status FROM deployment_reports")
        .fetch_one(&pool)
        .await
        .unwrap();

    assert_eq!(report_status, "applied");
    assert_eq!(deployment_status, "deployed");
    assert_eq!(get_schema_version(&pool).await.unwrap(), 2);
}
