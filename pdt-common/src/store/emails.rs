//! Outbound email queue
//!
//! Producers insert rows with [`enqueue_email`]; the periodic flush in the
//! sync service delivers queued rows and records the outcome.

use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::db::{EmailStatus, QueuedEmail};
use crate::Result;

pub async fn enqueue_email(pool: &SqlitePool, recipient: &str, subject: &str, body: &str) -> Result<i64> {
    let id = sqlx::query(
        "INSERT INTO queued_emails (recipient, subject, body, status, attempts, created) VALUES (?, ?, ?, ?, 0, ?)",
    )
    .bind(recipient)
    .bind(subject)
    .bind(body)
    .bind(EmailStatus::Queued.as_str())
    .bind(Utc::now())
    .execute(pool)
    .await?
    .last_insert_rowid();

    Ok(id)
}

/// Queued emails, oldest first
pub async fn queued_emails(pool: &SqlitePool, limit: i64) -> Result<Vec<QueuedEmail>> {
    let rows = sqlx::query(
        r#"
        SELECT id, recipient, subject, body, status, attempts, created, last_error
        FROM queued_emails
        WHERE status = ?
        ORDER BY id
        LIMIT ?
        "#,
    )
    .bind(EmailStatus::Queued.as_str())
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<QueuedEmail> {
            let status: String = row.try_get("status")?;
            Ok(QueuedEmail {
                id: row.try_get("id")?,
                recipient: row.try_get("recipient")?,
                subject: row.try_get("subject")?,
                body: row.try_get("body")?,
                status: status.parse()?,
                attempts: row.try_get("attempts")?,
                created: row.try_get("created")?,
                last_error: row.try_get("last_error")?,
            })
        })
        .collect()
}

pub async fn mark_email_sent(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE queued_emails SET status = ?, attempts = attempts + 1, last_error = NULL WHERE id = ?")
        .bind(EmailStatus::Sent.as_str())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record a failed delivery; the email stays queued until `max_attempts` is reached
///
/// Returns the status the email ended up in.
pub async fn mark_email_failed(pool: &SqlitePool, id: i64, error: &str, max_attempts: i64) -> Result<EmailStatus> {
    let status: String = sqlx::query_scalar(
        r#"
        UPDATE queued_emails
        SET attempts = attempts + 1,
            last_error = ?,
            status = CASE WHEN attempts + 1 >= ? THEN ? ELSE status END
        WHERE id = ?
        RETURNING status
        "#,
    )
    .bind(error)
    .bind(max_attempts)
    .bind(EmailStatus::Failed.as_str())
    .bind(id)
    .fetch_one(pool)
    .await?;

    status.parse()
}
