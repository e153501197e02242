//! Instance persistence

use std::collections::BTreeMap;

use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use super::{ci_project_id, require_affected, write_error};
use crate::db::{Instance, InstanceInput};
use crate::{Error, Result};

/// All instances with their CI project names
pub async fn list_instances(pool: &SqlitePool) -> Result<Vec<Instance>> {
    let rows = sqlx::query("SELECT id, name, description FROM instances ORDER BY id")
        .fetch_all(pool)
        .await?;

    let links: Vec<(i64, String)> = sqlx::query_as(
        r#"
        SELECT l.instance_id, p.name
        FROM instance_ci_projects l
        JOIN ci_projects p ON p.id = l.ci_project_id
        ORDER BY p.name
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut projects: BTreeMap<i64, Vec<String>> = BTreeMap::new();
    for (instance_id, name) in links {
        projects.entry(instance_id).or_default().push(name);
    }

    rows.into_iter()
        .map(|row| -> Result<Instance> {
            let id: i64 = row.try_get("id")?;
            Ok(Instance {
                id,
                name: row.try_get("name")?,
                description: row.try_get("description")?,
                ci_projects: projects.remove(&id).unwrap_or_default(),
            })
        })
        .collect()
}

pub async fn get_instance(pool: &SqlitePool, id: i64) -> Result<Instance> {
    let row = sqlx::query("SELECT id, name, description FROM instances WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::not_found("instance", id))?;

    let ci_projects: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT p.name
        FROM instance_ci_projects l
        JOIN ci_projects p ON p.id = l.ci_project_id
        WHERE l.instance_id = ?
        ORDER BY p.name
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    Ok(Instance {
        id,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        ci_projects,
    })
}

pub async fn create_instance(pool: &SqlitePool, input: InstanceInput) -> Result<Instance> {
    let mut tx = pool.begin().await?;

    let id = sqlx::query("INSERT INTO instances (name, description) VALUES (?, ?)")
        .bind(&input.name)
        .bind(&input.description)
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error(e, &format!("instance '{}'", input.name)))?
        .last_insert_rowid();

    link_ci_projects(&mut tx, id, &input.ci_projects).await?;
    tx.commit().await?;

    debug!(instance_id = id, name = %input.name, "Created instance");
    get_instance(pool, id).await
}

pub async fn update_instance(pool: &SqlitePool, id: i64, input: InstanceInput) -> Result<Instance> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query("UPDATE instances SET name = ?, description = ? WHERE id = ?")
        .bind(&input.name)
        .bind(&input.description)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error(e, &format!("instance '{}'", input.name)))?;
    require_affected(result.rows_affected(), "instance", id)?;

    sqlx::query("DELETE FROM instance_ci_projects WHERE instance_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    link_ci_projects(&mut tx, id, &input.ci_projects).await?;
    tx.commit().await?;

    get_instance(pool, id).await
}

pub async fn delete_instance(pool: &SqlitePool, id: i64) -> Result<()> {
    let result = sqlx::query("DELETE FROM instances WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    require_affected(result.rows_affected(), "instance", id)
}

async fn link_ci_projects(conn: &mut SqliteConnection, instance_id: i64, names: &[String]) -> Result<()> {
    for name in names {
        let project_id = ci_project_id(conn, name).await?;
        sqlx::query("INSERT OR IGNORE INTO instance_ci_projects (instance_id, ci_project_id) VALUES (?, ?)")
            .bind(instance_id)
            .bind(project_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}
