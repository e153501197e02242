//! Migration report persistence

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::info;

use super::{ensure_exists, ensure_found, instance_id, require_affected};
use crate::db::{MigrationReport, MigrationReportInput};
use crate::{Error, Result};

const REPORT_SELECT: &str = r#"
    SELECT mr.id, mr.migration_id, i.name AS instance_name, mr.status, mr.datetime, mr.log
    FROM migration_reports mr
    JOIN instances i ON i.id = mr.instance_id
"#;

fn report_from_row(row: &SqliteRow) -> Result<MigrationReport> {
    let status: String = row.try_get("status")?;
    Ok(MigrationReport {
        id: row.try_get("id")?,
        migration: row.try_get("migration_id")?,
        instance: row.try_get("instance_name")?,
        status: status.parse()?,
        datetime: row.try_get("datetime")?,
        log: row.try_get("log")?,
    })
}

pub async fn list_migration_reports(pool: &SqlitePool) -> Result<Vec<MigrationReport>> {
    let sql = format!("{} ORDER BY mr.id", REPORT_SELECT);
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(report_from_row).collect()
}

pub async fn get_migration_report(pool: &SqlitePool, id: i64) -> Result<MigrationReport> {
    let sql = format!("{} WHERE mr.id = ?", REPORT_SELECT);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::not_found("migration report", id))?;
    report_from_row(&row)
}

pub async fn create_migration_report(pool: &SqlitePool, input: MigrationReportInput) -> Result<MigrationReport> {
    let mut tx = pool.begin().await?;
    ensure_exists(&mut tx, "migrations", "migration", input.migration).await?;
    let instance = instance_id(&mut tx, &input.instance).await?;

    let id = sqlx::query(
        "INSERT INTO migration_reports (migration_id, instance_id, status, datetime, log) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(input.migration)
    .bind(instance)
    .bind(input.status.as_str())
    .bind(input.datetime)
    .bind(&input.log)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();
    tx.commit().await?;

    info!(
        migration_id = input.migration,
        instance = %input.instance,
        status = %input.status,
        "Migration report recorded"
    );
    get_migration_report(pool, id).await
}

pub async fn update_migration_report(
    pool: &SqlitePool,
    id: i64,
    input: MigrationReportInput,
) -> Result<MigrationReport> {
    let mut tx = pool.begin().await?;
    ensure_found(&mut tx, "migration_reports", "migration report", id).await?;
    ensure_exists(&mut tx, "migrations", "migration", input.migration).await?;
    let instance = instance_id(&mut tx, &input.instance).await?;

    let result = sqlx::query(
        "UPDATE migration_reports SET migration_id = ?, instance_id = ?, status = ?, datetime = ?, log = ? WHERE id = ?",
    )
    .bind(input.migration)
    .bind(instance)
    .bind(input.status.as_str())
    .bind(input.datetime)
    .bind(&input.log)
    .bind(id)
    .execute(&mut *tx)
    .await?;
    require_affected(result.rows_affected(), "migration report", id)?;
    tx.commit().await?;

    get_migration_report(pool, id).await
}

pub async fn delete_migration_report(pool: &SqlitePool, id: i64) -> Result<()> {
    let result = sqlx::query("DELETE FROM migration_reports WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    require_affected(result.rows_affected(), "migration report", id)
}
