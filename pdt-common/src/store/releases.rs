//! Release persistence

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use super::{require_affected, write_error};
use crate::db::{Release, ReleaseInput};
use crate::{Error, Result};

pub async fn list_releases(pool: &SqlitePool) -> Result<Vec<Release>> {
    let rows: Vec<(i64, i64, DateTime<Utc>)> =
        sqlx::query_as("SELECT id, number, datetime FROM releases ORDER BY number")
            .fetch_all(pool)
            .await?;

    Ok(rows
        .into_iter()
        .map(|(id, number, datetime)| Release { id, number, datetime })
        .collect())
}

pub async fn get_release(pool: &SqlitePool, id: i64) -> Result<Release> {
    let (id, number, datetime): (i64, i64, DateTime<Utc>) =
        sqlx::query_as("SELECT id, number, datetime FROM releases WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| Error::not_found("release", id))?;

    Ok(Release { id, number, datetime })
}

pub async fn create_release(pool: &SqlitePool, input: ReleaseInput) -> Result<Release> {
    let id = sqlx::query("INSERT INTO releases (number, datetime) VALUES (?, ?)")
        .bind(input.number)
        .bind(input.datetime)
        .execute(pool)
        .await
        .map_err(|e| write_error(e, &format!("release {}", input.number)))?
        .last_insert_rowid();

    get_release(pool, id).await
}

pub async fn update_release(pool: &SqlitePool, id: i64, input: ReleaseInput) -> Result<Release> {
    let result = sqlx::query("UPDATE releases SET number = ?, datetime = ? WHERE id = ?")
        .bind(input.number)
        .bind(input.datetime)
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| write_error(e, &format!("release {}", input.number)))?;
    require_affected(result.rows_affected(), "release", id)?;

    get_release(pool, id).await
}

pub async fn delete_release(pool: &SqlitePool, id: i64) -> Result<()> {
    let result = sqlx::query("DELETE FROM releases WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    require_affected(result.rows_affected(), "release", id)
}

/// Id of the release numbered `number`, creating it when missing
///
/// An existing release keeps its datetime unless `datetime` is given.
pub async fn get_or_create_release(
    conn: &mut SqliteConnection,
    number: i64,
    datetime: Option<DateTime<Utc>>,
) -> Result<i64> {
    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM releases WHERE number = ?")
        .bind(number)
        .fetch_optional(&mut *conn)
        .await?;

    if let Some(id) = existing {
        if let Some(datetime) = datetime {
            sqlx::query("UPDATE releases SET datetime = ? WHERE id = ?")
                .bind(datetime)
                .bind(id)
                .execute(&mut *conn)
                .await?;
        }
        return Ok(id);
    }

    let id = sqlx::query("INSERT INTO releases (number, datetime) VALUES (?, ?)")
        .bind(number)
        .bind(datetime.unwrap_or_else(Utc::now))
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();

    info!(release = number, "Created release");
    Ok(id)
}
