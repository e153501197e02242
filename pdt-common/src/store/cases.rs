//! Case persistence, pending edits and tracker snapshots
//!
//! Cases keep the tracker's identifier as their id. Local changes to the
//! fields the tracker owns (title, tags) are recorded as [`CaseEdit`] rows
//! until a push delivers them.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info};

use super::ci_projects::get_or_create_ci_project;
use super::migrations::migration_id_for_case;
use super::releases::get_or_create_release;
use super::{ci_project_id, release_id, require_affected, write_error};
use crate::db::{
    Case, CaseEdit, CaseInput, CaseSnapshot, DeploymentStatus, EditKind, MigrationStatus, TagChange, TitleChange,
};
use crate::filter::CaseView;
use crate::{Error, Result};

const CASE_SELECT: &str = r#"
    SELECT c.id, c.title, c.description, c.project, c.area, c.revision, c.tags,
           c.modified_date, r.number AS release_number, p.name AS ci_project_name
    FROM cases c
    LEFT JOIN releases r ON r.id = c.release_id
    LEFT JOIN ci_projects p ON p.id = c.ci_project_id
"#;

fn case_from_row(row: &SqliteRow) -> Result<Case> {
    let tags: String = row.try_get("tags")?;
    Ok(Case {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        project: row.try_get("project")?,
        area: row.try_get("area")?,
        revision: row.try_get("revision")?,
        tags: serde_json::from_str(&tags)?,
        release: row.try_get("release_number")?,
        ci_project: row.try_get("ci_project_name")?,
        modified_date: row.try_get("modified_date")?,
    })
}

pub async fn list_cases(pool: &SqlitePool) -> Result<Vec<Case>> {
    let sql = format!("{} ORDER BY c.id", CASE_SELECT);
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(case_from_row).collect()
}

/// All cases with the instances each was deployed on
pub async fn list_case_views(pool: &SqlitePool) -> Result<Vec<CaseView>> {
    let cases = list_cases(pool).await?;

    let deployments: Vec<(i64, String)> = sqlx::query_as(
        r#"
        SELECT DISTINCT drc.case_id, i.name
        FROM deployment_report_cases drc
        JOIN deployment_reports dr ON dr.id = drc.report_id
        JOIN instances i ON i.id = dr.instance_id
        WHERE dr.status = ?
        "#,
    )
    .bind(DeploymentStatus::Deployed.as_str())
    .fetch_all(pool)
    .await?;

    let mut deployed_on: BTreeMap<i64, BTreeSet<String>> = BTreeMap::new();
    for (case_id, instance) in deployments {
        deployed_on.entry(case_id).or_default().insert(instance);
    }

    Ok(cases
        .into_iter()
        .map(|case| {
            let instances = deployed_on.remove(&case.id).unwrap_or_default();
            CaseView {
                case,
                deployed_on: instances,
            }
        })
        .collect())
}

pub async fn get_case(pool: &SqlitePool, id: i64) -> Result<Case> {
    let mut conn = pool.acquire().await?;
    load_case(&mut conn, id).await
}

async fn load_case(conn: &mut SqliteConnection, id: i64) -> Result<Case> {
    let sql = format!("{} WHERE c.id = ?", CASE_SELECT);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::not_found("case", id))?;
    case_from_row(&row)
}

async fn case_exists(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
    Ok(sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM cases WHERE id = ?)")
        .bind(id)
        .fetch_one(&mut *conn)
        .await?)
}

/// Resolve the release number and CI project name of a case input to row ids
async fn resolve_links(conn: &mut SqliteConnection, input: &CaseInput) -> Result<(Option<i64>, Option<i64>)> {
    let release = match input.release {
        Some(number) => Some(release_id(conn, number).await?),
        None => None,
    };
    let ci_project = match input.ci_project.as_deref() {
        Some(name) => Some(ci_project_id(conn, name).await?),
        None => None,
    };
    Ok((release, ci_project))
}

pub async fn create_case(pool: &SqlitePool, input: CaseInput) -> Result<Case> {
    if input.id <= 0 {
        return Err(Error::validation("case id is required and must be positive"));
    }

    let mut tx = pool.begin().await?;
    let (release, ci_project) = resolve_links(&mut tx, &input).await?;

    sqlx::query(
        r#"
        INSERT INTO cases (id, title, description, project, area, revision, tags,
                           release_id, ci_project_id, modified_date)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(input.id)
    .bind(&input.title)
    .bind(&input.description)
    .bind(&input.project)
    .bind(&input.area)
    .bind(&input.revision)
    .bind(serde_json::to_string(&input.tags)?)
    .bind(release)
    .bind(ci_project)
    .bind(input.modified_date)
    .execute(&mut *tx)
    .await
    .map_err(|e| write_error(e, &format!("case {}", input.id)))?;

    tx.commit().await?;
    get_case(pool, input.id).await
}

/// Replace the stored fields of case `id`
///
/// A changed title or tag list is recorded as a pending edit so the next
/// push delivers it to the tracker. Tag edits hold only the added and
/// removed tags.
pub async fn update_case(pool: &SqlitePool, id: i64, input: CaseInput) -> Result<Case> {
    let mut tx = pool.begin().await?;
    // Take the write lock before reading so concurrent updates diff against the latest row
    let locked = sqlx::query("UPDATE cases SET id = id WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    require_affected(locked.rows_affected(), "case", id)?;
    let current = load_case(&mut tx, id).await?;
    let (release, ci_project) = resolve_links(&mut tx, &input).await?;

    sqlx::query(
        r#"
        UPDATE cases
        SET title = ?, description = ?, project = ?, area = ?, revision = ?, tags = ?,
            release_id = ?, ci_project_id = ?
        WHERE id = ?
        "#,
    )
    .bind(&input.title)
    .bind(&input.description)
    .bind(&input.project)
    .bind(&input.area)
    .bind(&input.revision)
    .bind(serde_json::to_string(&input.tags)?)
    .bind(release)
    .bind(ci_project)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    if current.title != input.title {
        let change = TitleChange { title: input.title };
        record_edit(&mut tx, id, EditKind::Title, serde_json::to_value(change)?).await?;
    }
    let tag_change = TagChange::between(&current.tags, &input.tags);
    if !tag_change.is_empty() {
        record_edit(&mut tx, id, EditKind::Tags, serde_json::to_value(tag_change)?).await?;
    }

    tx.commit().await?;
    get_case(pool, id).await
}

pub async fn delete_case(pool: &SqlitePool, id: i64) -> Result<()> {
    let result = sqlx::query("DELETE FROM cases WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    require_affected(result.rows_affected(), "case", id)
}

// ============================================================================
// Pending edits
// ============================================================================

/// Record a pending edit of `case_id`, returning the edit id
pub async fn record_edit(
    conn: &mut SqliteConnection,
    case_id: i64,
    kind: EditKind,
    params: serde_json::Value,
) -> Result<i64> {
    let id = sqlx::query("INSERT INTO case_edits (case_id, kind, params, datetime) VALUES (?, ?, ?, ?)")
        .bind(case_id)
        .bind(kind.as_str())
        .bind(params.to_string())
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();

    debug!(case_id, edit_id = id, kind = %kind, "Recorded case edit");
    Ok(id)
}

/// Pending edits of a case, oldest first
pub async fn list_case_edits(pool: &SqlitePool, case_id: i64) -> Result<Vec<CaseEdit>> {
    let rows = sqlx::query("SELECT id, case_id, kind, params, datetime FROM case_edits WHERE case_id = ? ORDER BY id")
        .bind(case_id)
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| -> Result<CaseEdit> {
            let kind: String = row.try_get("kind")?;
            let params: String = row.try_get("params")?;
            Ok(CaseEdit {
                id: row.try_get("id")?,
                case_id: row.try_get("case_id")?,
                kind: kind.parse()?,
                params: serde_json::from_str(&params)?,
                datetime: row.try_get("datetime")?,
            })
        })
        .collect()
}

/// Delete the edits of a case up to and including `max_edit_id`
///
/// Edits recorded after the push read the case are left pending.
pub async fn delete_edits_through(pool: &SqlitePool, case_id: i64, max_edit_id: i64) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let deleted = sqlx::query("DELETE FROM case_edits WHERE case_id = ? AND id <= ?")
        .bind(case_id)
        .bind(max_edit_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    tx.commit().await?;
    Ok(deleted)
}

/// Ids of cases with at least one pending edit
pub async fn case_ids_with_pending_edits(pool: &SqlitePool) -> Result<Vec<i64>> {
    Ok(sqlx::query_scalar("SELECT DISTINCT case_id FROM case_edits ORDER BY case_id")
        .fetch_all(pool)
        .await?)
}

/// Ids of cases not yet assigned to a release
pub async fn case_ids_without_release(pool: &SqlitePool) -> Result<Vec<i64>> {
    Ok(sqlx::query_scalar("SELECT id FROM cases WHERE release_id IS NULL ORDER BY id")
        .fetch_all(pool)
        .await?)
}

/// Add `tag` to a case unless already present, recording a tags edit
///
/// Returns whether the tag was added.
pub async fn add_case_tag(conn: &mut SqliteConnection, case_id: i64, tag: &str) -> Result<bool> {
    let stored: Option<String> = sqlx::query_scalar("SELECT tags FROM cases WHERE id = ?")
        .bind(case_id)
        .fetch_optional(&mut *conn)
        .await?;
    let Some(stored) = stored else {
        return Err(Error::validation(format!("unknown case {}", case_id)));
    };

    let mut tags: Vec<String> = serde_json::from_str(&stored)?;
    if tags.iter().any(|t| t == tag) {
        return Ok(false);
    }
    tags.push(tag.to_string());

    sqlx::query("UPDATE cases SET tags = ? WHERE id = ?")
        .bind(serde_json::to_string(&tags)?)
        .bind(case_id)
        .execute(&mut *conn)
        .await?;
    let change = TagChange {
        add: vec![tag.to_string()],
        remove: Vec::new(),
    };
    record_edit(conn, case_id, EditKind::Tags, serde_json::to_value(change)?).await?;

    Ok(true)
}

// ============================================================================
// Tracker synchronization
// ============================================================================

/// Write the tracker's view of a case in one transaction
///
/// The fix-for release is matched by number and the CI project by name,
/// creating either when missing. Title and tags are overwritten like every
/// other field; pending edits stay queued and are replayed on the tracker's
/// values by the next push. Unknown cases are created.
pub async fn apply_snapshot(pool: &SqlitePool, snapshot: &CaseSnapshot) -> Result<Case> {
    let mut tx = pool.begin().await?;

    let release = match snapshot.release_number {
        Some(number) => Some(get_or_create_release(&mut tx, number, snapshot.release_datetime).await?),
        None => None,
    };
    let ci_project = match snapshot.ci_project.as_deref() {
        Some(name) => Some(get_or_create_ci_project(&mut tx, name).await?),
        None => None,
    };

    let tags = serde_json::to_string(&snapshot.tags)?;
    let created = !case_exists(&mut tx, snapshot.id).await?;

    if created {
        sqlx::query(
            r#"
            INSERT INTO cases (id, title, description, project, area, revision, tags,
                               release_id, ci_project_id, modified_date)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(snapshot.id)
        .bind(&snapshot.title)
        .bind(&snapshot.original_title)
        .bind(&snapshot.project)
        .bind(&snapshot.area)
        .bind(&snapshot.revision)
        .bind(&tags)
        .bind(release)
        .bind(ci_project)
        .bind(snapshot.modified_date)
        .execute(&mut *tx)
        .await?;
    } else {
        sqlx::query(
            r#"
            UPDATE cases
            SET title = ?, description = ?, project = ?, area = ?, revision = ?, tags = ?,
                release_id = ?, ci_project_id = ?, modified_date = ?
            WHERE id = ?
            "#,
        )
        .bind(&snapshot.title)
        .bind(&snapshot.original_title)
        .bind(&snapshot.project)
        .bind(&snapshot.area)
        .bind(&snapshot.revision)
        .bind(&tags)
        .bind(release)
        .bind(ci_project)
        .bind(snapshot.modified_date)
        .bind(snapshot.id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    info!(case_id = snapshot.id, created, "Case updated from tracker");
    get_case(pool, snapshot.id).await
}

/// Whether a push of `case_id` should contact the tracker
///
/// True when the case has pending edits and, if it owns a migration, that
/// migration has an `applied` report on every instance the case was
/// deployed on.
pub async fn should_push(pool: &SqlitePool, case_id: i64) -> Result<bool> {
    let has_edits: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM case_edits WHERE case_id = ?)")
        .bind(case_id)
        .fetch_one(pool)
        .await?;
    if !has_edits {
        return Ok(false);
    }

    let Some(migration_id) = migration_id_for_case(pool, case_id).await? else {
        return Ok(true);
    };

    let unapplied_deployment: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1
            FROM deployment_reports dr
            JOIN deployment_report_cases drc ON drc.report_id = dr.id
            WHERE drc.case_id = ? AND dr.status = ?
              AND NOT EXISTS(
                  SELECT 1 FROM migration_reports mr
                  WHERE mr.migration_id = ? AND mr.instance_id = dr.instance_id AND mr.status = ?
              )
        )
        "#,
    )
    .bind(case_id)
    .bind(DeploymentStatus::Deployed.as_str())
    .bind(migration_id)
    .bind(MigrationStatus::Applied.as_str())
    .fetch_one(pool)
    .await?;

    Ok(!unapplied_deployment)
}
