use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use haulr_core::domain::counter::{CounterOffer, CounterOfferId, CounterStatus};
use haulr_core::domain::quote::{BreakdownLine, OperatorId, Quote, QuoteId, QuoteStatus};
use haulr_core::domain::request::RequestId;
use haulr_core::ports::store::{CounterWrite, QuoteStore, QuoteWrite, StoreError};

use super::{
    format_timestamp, is_unique_violation, parse_decimal, parse_optional_timestamp,
    parse_timestamp, RepositoryError, SqlLifecycleStore,
};

const QUOTE_COLUMNS: &str = "id,
    request_id,
    operator_id,
    operator_name,
    amount,
    breakdown_json,
    message,
    status,
    submitted_at,
    expires_at,
    responded_at";

const COUNTER_COLUMNS: &str = "id,
    quote_id,
    request_id,
    amount,
    message,
    status,
    created_at,
    responded_at";

#[async_trait::async_trait]
impl QuoteStore for SqlLifecycleStore {
    async fn find_quote(&self, id: &QuoteId) -> Result<Option<Quote>, StoreError> {
        let row = sqlx::query(&format!("SELECT {QUOTE_COLUMNS} FROM quote WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(self.pool())
            .await
            .map_err(RepositoryError::from)?;

        Ok(row.map(quote_from_row).transpose()?)
    }

    async fn list_quotes_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<Quote>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {QUOTE_COLUMNS} FROM quote
             WHERE request_id = ?
             ORDER BY submitted_at ASC, id ASC"
        ))
        .bind(&request_id.0)
        .fetch_all(self.pool())
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.into_iter().map(quote_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn list_due_quotes(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<QuoteId>, StoreError> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT id FROM quote
             WHERE status IN (?, ?) AND expires_at < ?
             ORDER BY expires_at ASC
             LIMIT ?",
        )
        .bind(QuoteStatus::Sent.as_str())
        .bind(QuoteStatus::Countered.as_str())
        .bind(format_timestamp(&now))
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .map_err(RepositoryError::from)?;

        Ok(ids.into_iter().map(QuoteId).collect())
    }

    async fn find_counter(&self, id: &CounterOfferId) -> Result<Option<CounterOffer>, StoreError> {
        let row =
            sqlx::query(&format!("SELECT {COUNTER_COLUMNS} FROM counter_offer WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(self.pool())
                .await
                .map_err(RepositoryError::from)?;

        Ok(row.map(counter_from_row).transpose()?)
    }

    async fn list_counters_for_quote(
        &self,
        quote_id: &QuoteId,
    ) -> Result<Vec<CounterOffer>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COUNTER_COLUMNS} FROM counter_offer
             WHERE quote_id = ?
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(&quote_id.0)
        .fetch_all(self.pool())
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.into_iter().map(counter_from_row).collect::<Result<Vec<_>, _>>()?)
    }
}

pub(crate) async fn insert_quote(
    conn: &mut SqliteConnection,
    quote: &Quote,
) -> Result<(), RepositoryError> {
    let breakdown_json = serde_json::to_string(&quote.breakdown)
        .map_err(|error| RepositoryError::Decode(format!("breakdown encode failed: {error}")))?;

    let result = sqlx::query(&format!(
        "INSERT INTO quote ({QUOTE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&quote.quote_id.0)
    .bind(&quote.request_id.0)
    .bind(&quote.operator_id.0)
    .bind(&quote.operator_name)
    .bind(quote.amount.to_string())
    .bind(breakdown_json)
    .bind(quote.message.as_deref())
    .bind(quote.status.as_str())
    .bind(format_timestamp(&quote.submitted_at))
    .bind(format_timestamp(&quote.expires_at))
    .bind(quote.responded_at.as_ref().map(format_timestamp))
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        // The only unique constraint on a fresh id is the open-quote index.
        Err(error) if is_unique_violation(&error) => Err(RepositoryError::DuplicateOpenQuote {
            request_id: quote.request_id.clone(),
            operator_id: quote.operator_id.clone(),
        }),
        Err(error) => Err(error.into()),
    }
}

/// Quote content is immutable once issued; only the status moves.
pub(crate) async fn update_quote_status(
    conn: &mut SqliteConnection,
    write: &QuoteWrite,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE quote SET status = ?, responded_at = ?
         WHERE id = ? AND status = ?",
    )
    .bind(write.quote.status.as_str())
    .bind(write.quote.responded_at.as_ref().map(format_timestamp))
    .bind(&write.quote.quote_id.0)
    .bind(write.expected_status.as_str())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::Conflict(format!(
            "quote {} is no longer {}",
            write.quote.quote_id, write.expected_status
        )));
    }
    Ok(())
}

pub(crate) async fn insert_counter(
    conn: &mut SqliteConnection,
    counter: &CounterOffer,
) -> Result<(), RepositoryError> {
    sqlx::query(&format!(
        "INSERT INTO counter_offer ({COUNTER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&counter.counter_id.0)
    .bind(&counter.quote_id.0)
    .bind(&counter.request_id.0)
    .bind(counter.amount.to_string())
    .bind(counter.message.as_deref())
    .bind(counter.status.as_str())
    .bind(format_timestamp(&counter.created_at))
    .bind(counter.responded_at.as_ref().map(format_timestamp))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn update_counter_status(
    conn: &mut SqliteConnection,
    write: &CounterWrite,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE counter_offer SET status = ?, responded_at = ?
         WHERE id = ? AND status = ?",
    )
    .bind(write.counter.status.as_str())
    .bind(write.counter.responded_at.as_ref().map(format_timestamp))
    .bind(&write.counter.counter_id.0)
    .bind(write.expected_status.as_str())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::Conflict(format!(
            "counter-offer {} is no longer {}",
            write.counter.counter_id,
            write.expected_status.as_str()
        )));
    }
    Ok(())
}

fn quote_from_row(row: SqliteRow) -> Result<Quote, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = QuoteStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown quote status `{status_raw}`")))?;

    let breakdown_json = row.try_get::<String, _>("breakdown_json")?;
    let breakdown: Vec<BreakdownLine> = serde_json::from_str(&breakdown_json)
        .map_err(|error| RepositoryError::Decode(format!("invalid breakdown_json: {error}")))?;

    Ok(Quote {
        quote_id: QuoteId(row.try_get("id")?),
        request_id: RequestId(row.try_get("request_id")?),
        operator_id: OperatorId(row.try_get("operator_id")?),
        operator_name: row.try_get("operator_name")?,
        amount: parse_decimal("amount", row.try_get("amount")?)?,
        breakdown,
        message: row.try_get("message")?,
        status,
        submitted_at: parse_timestamp("submitted_at", row.try_get("submitted_at")?)?,
        expires_at: parse_timestamp("expires_at", row.try_get("expires_at")?)?,
        responded_at: parse_optional_timestamp("responded_at", row.try_get("responded_at")?)?,
    })
}

fn counter_from_row(row: SqliteRow) -> Result<CounterOffer, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = CounterStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown counter-offer status `{status_raw}`"))
    })?;

    Ok(CounterOffer {
        counter_id: CounterOfferId(row.try_get("id")?),
        quote_id: QuoteId(row.try_get("quote_id")?),
        request_id: RequestId(row.try_get("request_id")?),
        amount: parse_decimal("amount", row.try_get("amount")?)?,
        message: row.try_get("message")?,
        status,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        responded_at: parse_optional_timestamp("responded_at", row.try_get("responded_at")?)?,
    })
}
