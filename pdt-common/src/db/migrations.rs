//! Database schema migrations
//!
//! Versioned schema changes applied after the baseline tables exist. Each
//! migration is idempotent and recorded in `schema_version`.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations** - databases in the field were upgraded with them
//! 2. **Always add new migrations** - one function per schema change
//! 3. **Prefer ALTER TABLE / UPDATE** over DROP/CREATE to preserve data

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Get current schema version from database
///
/// Returns 0 if no version has been recorded yet
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("✓ Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("✓ Migration v2 completed");
    }

    Ok(())
}

/// Migration v1: lookup indexes used by the report joins
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    for statement in [
        "CREATE INDEX IF NOT EXISTS idx_migration_reports_migration ON migration_reports(migration_id, instance_id)",
        "CREATE INDEX IF NOT EXISTS idx_deployment_report_cases_case ON deployment_report_cases(case_id)",
        "CREATE INDEX IF NOT EXISTS idx_case_edits_case ON case_edits(case_id)",
        "CREATE INDEX IF NOT EXISTS idx_cases_release ON cases(release_id)",
    ] {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}

/// Migration v2: normalize legacy three-letter status codes
///
/// Older report producers wrote `apl`/`err`/`pnd` and `dpl`; the API speaks
/// the long lowercase names.
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    let mut converted = 0u64;

    for table in ["migration_reports", "migration_step_reports"] {
        for (legacy, current) in [("apl", "applied"), ("err", "error"), ("pnd", "pending")] {
            let sql = format!("UPDATE {} SET status = ? WHERE status = ?", table);
            converted += sqlx::query(&sql)
                .bind(current)
                .bind(legacy)
                .execute(pool)
                .await?
                .rows_affected();
        }
    }

    for (legacy, current) in [("dpl", "deployed"), ("err", "error")] {
        converted += sqlx::query("UPDATE deployment_reports SET status = ? WHERE status = ?")
            .bind(current)
            .bind(legacy)
            .execute(pool)
            .await?
            .rows_affected();
    }

    if converted > 0 {
        info!("Migration v2: converted {} legacy status codes", converted);
    }

    Ok(())
}
