//! CI project persistence

use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use super::{require_affected, write_error};
use crate::db::{CIProject, CIProjectInput};
use crate::{Error, Result};

pub async fn list_ci_projects(pool: &SqlitePool) -> Result<Vec<CIProject>> {
    let rows: Vec<(i64, String, String)> =
        sqlx::query_as("SELECT id, name, description FROM ci_projects ORDER BY id")
            .fetch_all(pool)
            .await?;

    Ok(rows
        .into_iter()
        .map(|(id, name, description)| CIProject { id, name, description })
        .collect())
}

pub async fn get_ci_project(pool: &SqlitePool, id: i64) -> Result<CIProject> {
    let (id, name, description): (i64, String, String) =
        sqlx::query_as("SELECT id, name, description FROM ci_projects WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| Error::not_found("CI project", id))?;

    Ok(CIProject { id, name, description })
}

pub async fn create_ci_project(pool: &SqlitePool, input: CIProjectInput) -> Result<CIProject> {
    let id = sqlx::query("INSERT INTO ci_projects (name, description) VALUES (?, ?)")
        .bind(&input.name)
        .bind(&input.description)
        .execute(pool)
        .await
        .map_err(|e| write_error(e, &format!("CI project '{}'", input.name)))?
        .last_insert_rowid();

    get_ci_project(pool, id).await
}

pub async fn update_ci_project(pool: &SqlitePool, id: i64, input: CIProjectInput) -> Result<CIProject> {
    let result = sqlx::query("UPDATE ci_projects SET name = ?, description = ? WHERE id = ?")
        .bind(&input.name)
        .bind(&input.description)
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| write_error(e, &format!("CI project '{}'", input.name)))?;
    require_affected(result.rows_affected(), "CI project", id)?;

    get_ci_project(pool, id).await
}

pub async fn delete_ci_project(pool: &SqlitePool, id: i64) -> Result<()> {
    let result = sqlx::query("DELETE FROM ci_projects WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    require_affected(result.rows_affected(), "CI project", id)
}

/// Id of the CI project called `name`, creating it when missing
pub async fn get_or_create_ci_project(conn: &mut SqliteConnection, name: &str) -> Result<i64> {
    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM ci_projects WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;

    if let Some(id) = existing {
        return Ok(id);
    }

    let id = sqlx::query("INSERT INTO ci_projects (name, description) VALUES (?, '')")
        .bind(name)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();

    info!(ci_project = name, "Created CI project");
    Ok(id)
}
