//! Deployment report persistence
//!
//! Recording a successful deployment tags every covered case with
//! `deployed-<instance>`. The tag change is a pending edit like any other, so
//! the next push carries it to the tracker.

use std::collections::BTreeMap;

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::info;

use super::cases::add_case_tag;
use super::{ensure_exists, ensure_found, instance_id, release_id, require_affected};
use crate::db::{DeploymentReport, DeploymentReportInput, DeploymentStatus};
use crate::{Error, Result};

const DEPLOYMENT_SELECT: &str = r#"
    SELECT dr.id, r.number AS release_number, i.name AS instance_name, dr.status, dr.datetime, dr.log
    FROM deployment_reports dr
    JOIN releases r ON r.id = dr.release_id
    JOIN instances i ON i.id = dr.instance_id
"#;

fn deployment_from_row(row: &SqliteRow) -> Result<DeploymentReport> {
    let status: String = row.try_get("status")?;
    Ok(DeploymentReport {
        id: row.try_get("id")?,
        release: row.try_get("release_number")?,
        instance: row.try_get("instance_name")?,
        status: status.parse()?,
        datetime: row.try_get("datetime")?,
        log: row.try_get("log")?,
        cases: Vec::new(),
    })
}

/// Tag added to cases deployed on `instance`
pub fn deployed_tag(instance: &str) -> String {
    format!("deployed-{}", instance)
}

pub async fn list_deployment_reports(pool: &SqlitePool) -> Result<Vec<DeploymentReport>> {
    let sql = format!("{} ORDER BY dr.id", DEPLOYMENT_SELECT);
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    let mut reports = rows.iter().map(deployment_from_row).collect::<Result<Vec<_>>>()?;

    let links: Vec<(i64, i64)> =
        sqlx::query_as("SELECT report_id, case_id FROM deployment_report_cases ORDER BY report_id, case_id")
            .fetch_all(pool)
            .await?;
    let mut cases: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
    for (report_id, case_id) in links {
        cases.entry(report_id).or_default().push(case_id);
    }

    for report in &mut reports {
        report.cases = cases.remove(&report.id).unwrap_or_default();
    }
    Ok(reports)
}

pub async fn get_deployment_report(pool: &SqlitePool, id: i64) -> Result<DeploymentReport> {
    let sql = format!("{} WHERE dr.id = ?", DEPLOYMENT_SELECT);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::not_found("deployment report", id))?;
    let mut report = deployment_from_row(&row)?;

    report.cases = sqlx::query_scalar("SELECT case_id FROM deployment_report_cases WHERE report_id = ? ORDER BY case_id")
        .bind(id)
        .fetch_all(pool)
        .await?;
    Ok(report)
}

pub async fn create_deployment_report(pool: &SqlitePool, input: DeploymentReportInput) -> Result<DeploymentReport> {
    let mut tx = pool.begin().await?;
    let release = release_id(&mut tx, input.release).await?;
    let instance = instance_id(&mut tx, &input.instance).await?;

    let id = sqlx::query(
        "INSERT INTO deployment_reports (release_id, instance_id, status, datetime, log) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(release)
    .bind(instance)
    .bind(input.status.as_str())
    .bind(input.datetime)
    .bind(&input.log)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    link_cases(&mut tx, id, &input).await?;
    tx.commit().await?;

    info!(
        release = input.release,
        instance = %input.instance,
        status = %input.status,
        cases = input.cases.len(),
        "Deployment report recorded"
    );
    get_deployment_report(pool, id).await
}

pub async fn update_deployment_report(
    pool: &SqlitePool,
    id: i64,
    input: DeploymentReportInput,
) -> Result<DeploymentReport> {
    let mut tx = pool.begin().await?;
    ensure_found(&mut tx, "deployment_reports", "deployment report", id).await?;
    let release = release_id(&mut tx, input.release).await?;
    let instance = instance_id(&mut tx, &input.instance).await?;

    let result = sqlx::query(
        "UPDATE deployment_reports SET release_id = ?, instance_id = ?, status = ?, datetime = ?, log = ? WHERE id = ?",
    )
    .bind(release)
    .bind(instance)
    .bind(input.status.as_str())
    .bind(input.datetime)
    .bind(&input.log)
    .bind(id)
    .execute(&mut *tx)
    .await?;
    require_affected(result.rows_affected(), "deployment report", id)?;

    sqlx::query("DELETE FROM deployment_report_cases WHERE report_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    link_cases(&mut tx, id, &input).await?;
    tx.commit().await?;

    get_deployment_report(pool, id).await
}

pub async fn delete_deployment_report(pool: &SqlitePool, id: i64) -> Result<()> {
    let result = sqlx::query("DELETE FROM deployment_reports WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    require_affected(result.rows_affected(), "deployment report", id)
}

/// Link the covered cases and, for a successful deployment, tag them
async fn link_cases(conn: &mut SqliteConnection, report_id: i64, input: &DeploymentReportInput) -> Result<()> {
    let tag = deployed_tag(&input.instance);

    for &case_id in &input.cases {
        ensure_exists(conn, "cases", "case", case_id).await?;
        sqlx::query("INSERT OR IGNORE INTO deployment_report_cases (report_id, case_id) VALUES (?, ?)")
            .bind(report_id)
            .bind(case_id)
            .execute(&mut *conn)
            .await?;

        if input.status == DeploymentStatus::Deployed && add_case_tag(conn, case_id, &tag).await? {
            info!(case_id, %tag, "Tagged deployed case");
        }
    }
    Ok(())
}
