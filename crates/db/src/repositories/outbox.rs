use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use haulr_core::domain::quote::QuoteId;
use haulr_core::domain::request::RequestId;
use haulr_core::ports::notify::{Notification, NotificationKind};

use super::{format_timestamp, parse_optional_timestamp, parse_timestamp, RepositoryError};
use crate::DbPool;

/// A stored notification waiting for (or already taken by) an external relay.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub notification: Notification,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Relay-side view of `notification_outbox`. Rows are written by
/// [`SqlLifecycleStore`](super::SqlLifecycleStore) inside the commit that
/// produced them.
#[derive(Clone)]
pub struct SqlOutbox {
    pool: DbPool,
}

impl SqlOutbox {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Undelivered entries, oldest first.
    pub async fn pending(&self, limit: u32) -> Result<Vec<OutboxEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, kind, request_id, quote_id, recipients_json, payload_json, occurred_at, delivered_at
             FROM notification_outbox
             WHERE delivered_at IS NULL
             ORDER BY occurred_at ASC, id ASC
             LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }

    /// Returns `false` when the entry is unknown or was already delivered.
    pub async fn mark_delivered(
        &self,
        notification_id: &str,
        delivered_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE notification_outbox SET delivered_at = ?
             WHERE id = ? AND delivered_at IS NULL",
        )
        .bind(format_timestamp(&delivered_at))
        .bind(notification_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

pub(crate) async fn insert_outbox_entry(
    conn: &mut SqliteConnection,
    notification: &Notification,
) -> Result<(), RepositoryError> {
    let recipients_json = serde_json::to_string(&notification.recipients)
        .map_err(|error| RepositoryError::Decode(format!("recipients encode failed: {error}")))?;
    let payload_json = serde_json::to_string(&notification.payload)
        .map_err(|error| RepositoryError::Decode(format!("payload encode failed: {error}")))?;

    sqlx::query(
        "INSERT INTO notification_outbox
            (id, kind, request_id, quote_id, recipients_json, payload_json, occurred_at, delivered_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, NULL)",
    )
    .bind(&notification.notification_id)
    .bind(notification.kind.as_str())
    .bind(&notification.request_id.0)
    .bind(notification.quote_id.as_ref().map(|id| id.0.as_str()))
    .bind(recipients_json)
    .bind(payload_json)
    .bind(format_timestamp(&notification.occurred_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn entry_from_row(row: SqliteRow) -> Result<OutboxEntry, RepositoryError> {
    let kind_raw = row.try_get::<String, _>("kind")?;
    let kind = NotificationKind::parse(&kind_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown notification kind `{kind_raw}`")))?;

    let recipients: Vec<String> =
        serde_json::from_str(&row.try_get::<String, _>("recipients_json")?).map_err(|error| {
            RepositoryError::Decode(format!("invalid recipients_json: {error}"))
        })?;
    let payload: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(&row.try_get::<String, _>("payload_json")?)
            .map_err(|error| RepositoryError::Decode(format!("invalid payload_json: {error}")))?;

    Ok(OutboxEntry {
        notification: Notification {
            notification_id: row.try_get("id")?,
            kind,
            request_id: RequestId(row.try_get("request_id")?),
            quote_id: row.try_get::<Option<String>, _>("quote_id")?.map(QuoteId),
            recipients,
            payload,
            occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
        },
        delivered_at: parse_optional_timestamp("delivered_at", row.try_get("delivered_at")?)?,
    })
}
