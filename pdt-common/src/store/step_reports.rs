//! Migration step report persistence

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::{ensure_exists, ensure_found, require_affected};
use crate::db::{MigrationStepReport, MigrationStepReportInput};
use crate::{Error, Result};

const STEP_REPORT_SELECT: &str =
    "SELECT id, report_id, step_id, status, datetime, log FROM migration_step_reports";

fn step_report_from_row(row: &SqliteRow) -> Result<MigrationStepReport> {
    let status: String = row.try_get("status")?;
    Ok(MigrationStepReport {
        id: row.try_get("id")?,
        report: row.try_get("report_id")?,
        step: row.try_get("step_id")?,
        status: status.parse()?,
        datetime: row.try_get("datetime")?,
        log: row.try_get("log")?,
    })
}

pub async fn list_step_reports(pool: &SqlitePool) -> Result<Vec<MigrationStepReport>> {
    let sql = format!("{} ORDER BY id", STEP_REPORT_SELECT);
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(step_report_from_row).collect()
}

pub async fn get_step_report(pool: &SqlitePool, id: i64) -> Result<MigrationStepReport> {
    let sql = format!("{} WHERE id = ?", STEP_REPORT_SELECT);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::not_found("migration step report", id))?;
    step_report_from_row(&row)
}

/// The step must belong to the migration the report is about
async fn check_step_of_report(conn: &mut SqliteConnection, report: i64, step: i64) -> Result<()> {
    ensure_exists(conn, "migration_reports", "migration report", report).await?;
    ensure_exists(conn, "migration_steps", "migration step", step).await?;

    let same_migration: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM migration_reports mr
            JOIN migration_steps ms ON ms.migration_id = mr.migration_id
            WHERE mr.id = ? AND ms.id = ?
        )
        "#,
    )
    .bind(report)
    .bind(step)
    .fetch_one(&mut *conn)
    .await?;

    if same_migration {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "step {} does not belong to the migration of report {}",
            step, report
        )))
    }
}

pub async fn create_step_report(pool: &SqlitePool, input: MigrationStepReportInput) -> Result<MigrationStepReport> {
    let mut tx = pool.begin().await?;
    check_step_of_report(&mut tx, input.report, input.step).await?;

    let id = sqlx::query(
        "INSERT INTO migration_step_reports (report_id, step_id, status, datetime, log) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(input.report)
    .bind(input.step)
    .bind(input.status.as_str())
    .bind(input.datetime)
    .bind(&input.log)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();
    tx.commit().await?;

    get_step_report(pool, id).await
}

pub async fn update_step_report(
    pool: &SqlitePool,
    id: i64,
    input: MigrationStepReportInput,
) -> Result<MigrationStepReport> {
    let mut tx = pool.begin().await?;
    ensure_found(&mut tx, "migration_step_reports", "migration step report", id).await?;
    check_step_of_report(&mut tx, input.report, input.step).await?;

    let result = sqlx::query(
        "UPDATE migration_step_reports SET report_id = ?, step_id = ?, status = ?, datetime = ?, log = ? WHERE id = ?",
    )
    .bind(input.report)
    .bind(input.step)
    .bind(input.status.as_str())
    .bind(input.datetime)
    .bind(&input.log)
    .bind(id)
    .execute(&mut *tx)
    .await?;
    require_affected(result.rows_affected(), "migration step report", id)?;
    tx.commit().await?;

    get_step_report(pool, id).await
}

pub async fn delete_step_report(pool: &SqlitePool, id: i64) -> Result<()> {
    let result = sqlx::query("DELETE FROM migration_step_reports WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    require_affected(result.rows_affected(), "migration step report", id)
}
