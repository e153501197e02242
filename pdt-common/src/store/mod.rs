//! Entity store
//!
//! Async CRUD over the SQLite schema created by [`crate::db::init_database`].
//! Entities reference each other by natural key at the API boundary
//! (instance and CI project by name, release by number); the lookups below
//! translate those keys to row ids inside the caller's transaction and turn
//! unknown keys into validation errors.

pub mod cases;
pub mod ci_projects;
pub mod deployments;
pub mod emails;
pub mod instances;
pub mod migrations;
pub mod releases;
pub mod reports;
pub mod step_reports;

use sqlx::SqliteConnection;

use crate::{Error, Result};

/// Translate constraint violations into validation errors
///
/// `what` names the record being written, e.g. `"instance 'prod'"`.
pub(crate) fn write_error(err: sqlx::Error, what: &str) -> Error {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return Error::validation(format!("{} already exists", what));
        }
        if db_err.is_foreign_key_violation() {
            return Error::validation(format!("{} references a record that does not exist", what));
        }
    }
    Error::Database(err)
}

/// Fail with [`Error::NotFound`] when an UPDATE or DELETE touched no row
pub(crate) fn require_affected(rows_affected: u64, entity: &str, id: i64) -> Result<()> {
    if rows_affected == 0 {
        Err(Error::not_found(entity, id))
    } else {
        Ok(())
    }
}

/// Row id of the instance called `name`
pub(crate) async fn instance_id(conn: &mut SqliteConnection, name: &str) -> Result<i64> {
    sqlx::query_scalar("SELECT id FROM instances WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::validation(format!("unknown instance '{}'", name)))
}

/// Row id of the CI project called `name`
pub(crate) async fn ci_project_id(conn: &mut SqliteConnection, name: &str) -> Result<i64> {
    sqlx::query_scalar("SELECT id FROM ci_projects WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::validation(format!("unknown CI project '{}'", name)))
}

/// Row id of the release numbered `number`
pub(crate) async fn release_id(conn: &mut SqliteConnection, number: i64) -> Result<i64> {
    sqlx::query_scalar("SELECT id FROM releases WHERE number = ?")
        .bind(number)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::validation(format!("unknown release {}", number)))
}

/// Fail with a validation error unless `table` holds a row with `id`
///
/// `table` is always a literal from this crate.
pub(crate) async fn ensure_exists(conn: &mut SqliteConnection, table: &str, label: &str, id: i64) -> Result<()> {
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?)", table);
    let exists: bool = sqlx::query_scalar(&sql).bind(id).fetch_one(&mut *conn).await?;
    if exists {
        Ok(())
    } else {
        Err(Error::validation(format!("unknown {} {}", label, id)))
    }
}

/// Fail with [`Error::NotFound`] unless `table` holds a row with `id`
pub(crate) async fn ensure_found(conn: &mut SqliteConnection, table: &str, entity: &str, id: i64) -> Result<()> {
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?)", table);
    let exists: bool = sqlx::query_scalar(&sql).bind(id).fetch_one(&mut *conn).await?;
    if exists {
        Ok(())
    } else {
        Err(Error::not_found(entity, id))
    }
}
