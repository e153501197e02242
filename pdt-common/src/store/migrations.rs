//! Migration persistence
//!
//! A migration is stored across three tables: the migration row, its
//! dependency edges and its ordered steps. Writes touch all three in one
//! transaction.

use std::collections::{BTreeMap, BTreeSet};

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use super::{ensure_exists, ensure_found, require_affected, write_error};
use crate::db::{Migration, MigrationInput, MigrationStep, MigrationStepInput};
use crate::filter::{MigrationView, ReportSummary};
use crate::{Error, Result};

fn migration_from_row(row: &SqliteRow) -> Result<Migration> {
    let category: String = row.try_get("category")?;
    Ok(Migration {
        id: row.try_get("id")?,
        uid: row.try_get("uid")?,
        case: row.try_get("case_id")?,
        category: category.parse()?,
        reviewed: row.try_get("reviewed")?,
        depends_on: Vec::new(),
        steps: Vec::new(),
    })
}

fn step_from_row(row: &SqliteRow) -> Result<(i64, MigrationStep)> {
    let kind: String = row.try_get("kind")?;
    let step_type: String = row.try_get("step_type")?;
    Ok((
        row.try_get("migration_id")?,
        MigrationStep {
            id: row.try_get("id")?,
            position: row.try_get("position")?,
            kind: kind.parse()?,
            step_type: step_type.parse()?,
            code: row.try_get("code")?,
            path: row.try_get("path")?,
        },
    ))
}

/// All migrations with dependencies and steps, ordered by id
pub async fn list_migrations(pool: &SqlitePool) -> Result<Vec<Migration>> {
    let rows = sqlx::query("SELECT id, uid, case_id, category, reviewed FROM migrations ORDER BY id")
        .fetch_all(pool)
        .await?;
    let mut migrations = rows.iter().map(migration_from_row).collect::<Result<Vec<_>>>()?;

    let edges: Vec<(i64, i64)> = sqlx::query_as(
        "SELECT migration_id, depends_on_id FROM migration_dependencies ORDER BY migration_id, depends_on_id",
    )
    .fetch_all(pool)
    .await?;
    let mut depends_on: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
    for (migration_id, dependency) in edges {
        depends_on.entry(migration_id).or_default().push(dependency);
    }

    let step_rows = sqlx::query(
        "SELECT id, migration_id, position, kind, step_type, code, path FROM migration_steps ORDER BY migration_id, position",
    )
    .fetch_all(pool)
    .await?;
    let mut steps: BTreeMap<i64, Vec<MigrationStep>> = BTreeMap::new();
    for row in &step_rows {
        let (migration_id, step) = step_from_row(row)?;
        steps.entry(migration_id).or_default().push(step);
    }

    for migration in &mut migrations {
        migration.depends_on = depends_on.remove(&migration.id).unwrap_or_default();
        migration.steps = steps.remove(&migration.id).unwrap_or_default();
    }

    Ok(migrations)
}

/// All migrations with the case and report data used by migration filters
pub async fn list_migration_views(pool: &SqlitePool) -> Result<Vec<MigrationView>> {
    let migrations = list_migrations(pool).await?;

    let cases: Vec<(i64, Option<i64>, Option<i64>, Option<String>)> = sqlx::query_as(
        r#"
        SELECT m.id, r.number, c.ci_project_id, p.name
        FROM migrations m
        JOIN cases c ON c.id = m.case_id
        LEFT JOIN releases r ON r.id = c.release_id
        LEFT JOIN ci_projects p ON p.id = c.ci_project_id
        "#,
    )
    .fetch_all(pool)
    .await?;
    let cases: BTreeMap<i64, (Option<i64>, Option<i64>, Option<String>)> = cases
        .into_iter()
        .map(|(id, release, project_id, project)| (id, (release, project_id, project)))
        .collect();

    let links: Vec<(i64, String)> = sqlx::query_as(
        r#"
        SELECT l.ci_project_id, i.name
        FROM instance_ci_projects l
        JOIN instances i ON i.id = l.instance_id
        "#,
    )
    .fetch_all(pool)
    .await?;
    let mut project_instances: BTreeMap<i64, BTreeSet<String>> = BTreeMap::new();
    for (project_id, instance) in links {
        project_instances.entry(project_id).or_default().insert(instance);
    }

    let report_rows: Vec<(i64, String, String)> = sqlx::query_as(
        r#"
        SELECT mr.migration_id, i.name, mr.status
        FROM migration_reports mr
        JOIN instances i ON i.id = mr.instance_id
        ORDER BY mr.id
        "#,
    )
    .fetch_all(pool)
    .await?;
    let mut reports: BTreeMap<i64, Vec<ReportSummary>> = BTreeMap::new();
    for (migration_id, instance, status) in report_rows {
        reports.entry(migration_id).or_default().push(ReportSummary {
            instance,
            status: status.parse()?,
        });
    }

    Ok(migrations
        .into_iter()
        .map(|migration| {
            let (case_release, project_id, case_ci_project) =
                cases.get(&migration.id).cloned().unwrap_or_default();
            let ci_project_instances = project_id
                .and_then(|id| project_instances.get(&id).cloned())
                .unwrap_or_default();
            MigrationView {
                reports: reports.remove(&migration.id).unwrap_or_default(),
                migration,
                case_release,
                case_ci_project,
                ci_project_instances,
            }
        })
        .collect())
}

pub async fn get_migration(pool: &SqlitePool, id: i64) -> Result<Migration> {
    let row = sqlx::query("SELECT id, uid, case_id, category, reviewed FROM migrations WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::not_found("migration", id))?;
    let mut migration = migration_from_row(&row)?;

    migration.depends_on = sqlx::query_scalar(
        "SELECT depends_on_id FROM migration_dependencies WHERE migration_id = ? ORDER BY depends_on_id",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let step_rows = sqlx::query(
        "SELECT id, migration_id, position, kind, step_type, code, path FROM migration_steps WHERE migration_id = ? ORDER BY position",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;
    migration.steps = step_rows
        .iter()
        .map(|row| step_from_row(row).map(|(_, step)| step))
        .collect::<Result<_>>()?;

    Ok(migration)
}

/// Id of the migration owned by `case_id`, if any
pub async fn migration_id_for_case(pool: &SqlitePool, case_id: i64) -> Result<Option<i64>> {
    Ok(sqlx::query_scalar("SELECT id FROM migrations WHERE case_id = ?")
        .bind(case_id)
        .fetch_optional(pool)
        .await?)
}

pub async fn create_migration(pool: &SqlitePool, input: MigrationInput) -> Result<Migration> {
    let uid = input.uid.clone().unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut tx = pool.begin().await?;
    ensure_exists(&mut tx, "cases", "case", input.case).await?;

    let id = sqlx::query("INSERT INTO migrations (uid, case_id, category, reviewed) VALUES (?, ?, ?, ?)")
        .bind(&uid)
        .bind(input.case)
        .bind(input.category.as_str())
        .bind(input.reviewed)
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error(e, &format!("migration '{}' for case {}", uid, input.case)))?
        .last_insert_rowid();

    replace_dependencies(&mut tx, id, &input.depends_on).await?;
    replace_steps(&mut tx, id, input.steps.as_deref().unwrap_or_default()).await?;
    tx.commit().await?;

    debug!(migration_id = id, case_id = input.case, %uid, "Created migration");
    get_migration(pool, id).await
}

/// Replace a migration; steps are kept when `input.steps` is `None`
pub async fn update_migration(pool: &SqlitePool, id: i64, input: MigrationInput) -> Result<Migration> {
    let mut tx = pool.begin().await?;
    ensure_found(&mut tx, "migrations", "migration", id).await?;
    ensure_exists(&mut tx, "cases", "case", input.case).await?;

    let uid = match input.uid.as_deref() {
        Some(uid) => uid.to_string(),
        None => sqlx::query_scalar("SELECT uid FROM migrations WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::not_found("migration", id))?,
    };

    let result = sqlx::query("UPDATE migrations SET uid = ?, case_id = ?, category = ?, reviewed = ? WHERE id = ?")
        .bind(&uid)
        .bind(input.case)
        .bind(input.category.as_str())
        .bind(input.reviewed)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error(e, &format!("migration '{}' for case {}", uid, input.case)))?;
    require_affected(result.rows_affected(), "migration", id)?;

    replace_dependencies(&mut tx, id, &input.depends_on).await?;
    if let Some(steps) = input.steps.as_deref() {
        replace_steps(&mut tx, id, steps).await?;
    }
    tx.commit().await?;

    get_migration(pool, id).await
}

pub async fn delete_migration(pool: &SqlitePool, id: i64) -> Result<()> {
    let result = sqlx::query("DELETE FROM migrations WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    require_affected(result.rows_affected(), "migration", id)
}

async fn replace_dependencies(conn: &mut SqliteConnection, migration_id: i64, depends_on: &[i64]) -> Result<()> {
    sqlx::query("DELETE FROM migration_dependencies WHERE migration_id = ?")
        .bind(migration_id)
        .execute(&mut *conn)
        .await?;

    for &dependency in depends_on {
        if dependency == migration_id {
            return Err(Error::validation(format!("migration {} cannot depend on itself", migration_id)));
        }
        ensure_exists(conn, "migrations", "migration", dependency).await?;
        sqlx::query("INSERT OR IGNORE INTO migration_dependencies (migration_id, depends_on_id) VALUES (?, ?)")
            .bind(migration_id)
            .bind(dependency)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn replace_steps(conn: &mut SqliteConnection, migration_id: i64, steps: &[MigrationStepInput]) -> Result<()> {
    sqlx::query("DELETE FROM migration_steps WHERE migration_id = ?")
        .bind(migration_id)
        .execute(&mut *conn)
        .await?;

    for (position, step) in steps.iter().enumerate() {
        sqlx::query(
            "INSERT INTO migration_steps (migration_id, position, kind, step_type, code, path) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(migration_id)
        .bind(position as i64)
        .bind(step.kind.as_str())
        .bind(step.step_type.as_str())
        .bind(&step.code)
        .bind(&step.path)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}
