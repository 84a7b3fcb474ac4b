use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::sqlite::{SqliteQueryResult, SqliteRow};
use sqlx::{Row, SqliteConnection};

use haulr_core::domain::quote::{OperatorId, QuoteId};
use haulr_core::domain::request::{
    AssignedOperator, Cancellation, CustomerId, Location, RequestDetails, RequestId,
    RequestStatus, ServiceRequest, StatusChange,
};
use haulr_core::ports::store::{RequestStore, RequestWrite, StoreError};

use super::{
    format_timestamp, parse_optional_timestamp, parse_timestamp, parse_u32, RepositoryError,
    SqlLifecycleStore,
};

const REQUEST_COLUMNS: &str = "id,
    customer_id,
    service_type,
    description,
    location_address,
    location_latitude,
    location_longitude,
    is_emergency,
    budget_range,
    preferred_date,
    preferred_time,
    status,
    edit_count,
    edit_fees_cents,
    quote_count,
    operator_id,
    operator_name,
    accepted_quote_id,
    cancelled_at,
    cancellation_reason,
    cancellation_fee_cents,
    version,
    created_at,
    updated_at";

impl SqlLifecycleStore {
    async fn fetch_request(
        &self,
        id: &RequestId,
    ) -> Result<Option<ServiceRequest>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM service_request WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(self.pool())
            .await?;

        row.map(request_from_row).transpose()
    }

    async fn fetch_history(&self, id: &RequestId) -> Result<Vec<StatusChange>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT request_id, from_status, to_status, event, occurred_at
             FROM request_status_history
             WHERE request_id = ?
             ORDER BY id ASC",
        )
        .bind(&id.0)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(history_from_row).collect()
    }

    async fn fetch_request_ids(
        &self,
        sql: &str,
        statuses: &[RequestStatus],
        created_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<RequestId>, RepositoryError> {
        let mut query = sqlx::query_scalar::<_, String>(sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let ids = query
            .bind(format_timestamp(&created_before))
            .bind(i64::from(limit))
            .fetch_all(self.pool())
            .await?;

        Ok(ids.into_iter().map(RequestId).collect())
    }
}

#[async_trait::async_trait]
impl RequestStore for SqlLifecycleStore {
    async fn find_request(&self, id: &RequestId) -> Result<Option<ServiceRequest>, StoreError> {
        Ok(self.fetch_request(id).await?)
    }

    async fn list_history(&self, id: &RequestId) -> Result<Vec<StatusChange>, StoreError> {
        Ok(self.fetch_history(id).await?)
    }

    async fn list_unmatched_candidates(
        &self,
        created_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<RequestId>, StoreError> {
        Ok(self
            .fetch_request_ids(
                "SELECT id FROM service_request
                 WHERE status = ? AND quote_count = 0 AND created_at < ?
                 ORDER BY created_at ASC
                 LIMIT ?",
                &[RequestStatus::Pending],
                created_before,
                limit,
            )
            .await?)
    }

    async fn list_stale_requests(
        &self,
        created_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<RequestId>, StoreError> {
        Ok(self
            .fetch_request_ids(
                "SELECT id FROM service_request
                 WHERE status IN (?, ?, ?, ?) AND created_at < ?
                 ORDER BY created_at ASC
                 LIMIT ?",
                &[
                    RequestStatus::Pending,
                    RequestStatus::Quoted,
                    RequestStatus::OperatorAccepted,
                    RequestStatus::OperatorDeclined,
                ],
                created_before,
                limit,
            )
            .await?)
    }
}

pub(crate) async fn insert_request(
    conn: &mut SqliteConnection,
    request: &ServiceRequest,
) -> Result<(), RepositoryError> {
    let result = bind_request(
        sqlx::query(&format!(
            "INSERT INTO service_request ({REQUEST_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        )),
        request,
    )
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(error) if super::is_unique_violation(&error) => Err(RepositoryError::Conflict(
            format!("request {} already exists", request.request_id),
        )),
        Err(error) => Err(error.into()),
    }
}

/// Overwrites the request row only if it is still at the expected version.
pub(crate) async fn update_request(
    conn: &mut SqliteConnection,
    write: &RequestWrite,
) -> Result<(), RepositoryError> {
    let request = &write.request;
    let result: SqliteQueryResult = sqlx::query(
        "UPDATE service_request SET
            customer_id = ?,
            service_type = ?,
            description = ?,
            location_address = ?,
            location_latitude = ?,
            location_longitude = ?,
            is_emergency = ?,
            budget_range = ?,
            preferred_date = ?,
            preferred_time = ?,
            status = ?,
            edit_count = ?,
            edit_fees_cents = ?,
            quote_count = ?,
            operator_id = ?,
            operator_name = ?,
            accepted_quote_id = ?,
            cancelled_at = ?,
            cancellation_reason = ?,
            cancellation_fee_cents = ?,
            version = ?,
            updated_at = ?
         WHERE id = ? AND version = ?",
    )
    .bind(&request.customer_id.0)
    .bind(&request.details.service_type)
    .bind(&request.details.description)
    .bind(&request.details.location.address)
    .bind(request.details.location.latitude)
    .bind(request.details.location.longitude)
    .bind(request.details.is_emergency)
    .bind(request.details.budget_range.as_deref())
    .bind(request.details.preferred_date.map(|date| date.to_string()))
    .bind(request.details.preferred_time.map(|time| time.to_string()))
    .bind(request.status.as_str())
    .bind(i64::from(request.edit_count))
    .bind(request.edit_fees_cents)
    .bind(i64::from(request.quote_count))
    .bind(request.operator.as_ref().map(|operator| operator.operator_id.0.as_str()))
    .bind(request.operator.as_ref().map(|operator| operator.operator_name.as_str()))
    .bind(request.operator.as_ref().map(|operator| operator.accepted_quote_id.0.as_str()))
    .bind(request.cancellation.as_ref().map(|cancel| format_timestamp(&cancel.cancelled_at)))
    .bind(request.cancellation.as_ref().map(|cancel| cancel.cancellation_reason.as_str()))
    .bind(request.cancellation.as_ref().map(|cancel| cancel.cancellation_fee_cents))
    .bind(i64::from(request.version))
    .bind(format_timestamp(&request.updated_at))
    .bind(&request.request_id.0)
    .bind(i64::from(write.expected_version))
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::Conflict(format!(
            "request {} is no longer at version {}",
            request.request_id, write.expected_version
        )));
    }
    Ok(())
}

pub(crate) async fn insert_history(
    conn: &mut SqliteConnection,
    change: &StatusChange,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO request_status_history (request_id, from_status, to_status, event, occurred_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&change.request_id.0)
    .bind(change.from_status.as_ref().map(RequestStatus::as_str))
    .bind(change.to_status.as_str())
    .bind(&change.event)
    .bind(format_timestamp(&change.occurred_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn bind_request<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    request: &'q ServiceRequest,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(&request.request_id.0)
        .bind(&request.customer_id.0)
        .bind(&request.details.service_type)
        .bind(&request.details.description)
        .bind(&request.details.location.address)
        .bind(request.details.location.latitude)
        .bind(request.details.location.longitude)
        .bind(request.details.is_emergency)
        .bind(request.details.budget_range.as_deref())
        .bind(request.details.preferred_date.map(|date| date.to_string()))
        .bind(request.details.preferred_time.map(|time| time.to_string()))
        .bind(request.status.as_str())
        .bind(i64::from(request.edit_count))
        .bind(request.edit_fees_cents)
        .bind(i64::from(request.quote_count))
        .bind(request.operator.as_ref().map(|operator| operator.operator_id.0.as_str()))
        .bind(request.operator.as_ref().map(|operator| operator.operator_name.as_str()))
        .bind(request.operator.as_ref().map(|operator| operator.accepted_quote_id.0.as_str()))
        .bind(request.cancellation.as_ref().map(|cancel| format_timestamp(&cancel.cancelled_at)))
        .bind(request.cancellation.as_ref().map(|cancel| cancel.cancellation_reason.as_str()))
        .bind(request.cancellation.as_ref().map(|cancel| cancel.cancellation_fee_cents))
        .bind(i64::from(request.version))
        .bind(format_timestamp(&request.created_at))
        .bind(format_timestamp(&request.updated_at))
}

fn request_from_row(row: SqliteRow) -> Result<ServiceRequest, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = RequestStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown request status `{status_raw}`")))?;

    let operator = match (
        row.try_get::<Option<String>, _>("operator_id")?,
        row.try_get::<Option<String>, _>("operator_name")?,
        row.try_get::<Option<String>, _>("accepted_quote_id")?,
    ) {
        (Some(operator_id), Some(operator_name), Some(accepted_quote_id)) => Some(AssignedOperator {
            operator_id: OperatorId(operator_id),
            operator_name,
            accepted_quote_id: QuoteId(accepted_quote_id),
        }),
        (None, None, None) => None,
        _ => {
            return Err(RepositoryError::Decode(
                "operator columns must be all set or all null".to_string(),
            ))
        }
    };

    let cancellation = match parse_optional_timestamp("cancelled_at", row.try_get("cancelled_at")?)? {
        Some(cancelled_at) => Some(Cancellation {
            cancelled_at,
            cancellation_reason: row
                .try_get::<Option<String>, _>("cancellation_reason")?
                .unwrap_or_default(),
            cancellation_fee_cents: row
                .try_get::<Option<i64>, _>("cancellation_fee_cents")?
                .unwrap_or_default(),
        }),
        None => None,
    };

    let preferred_date = row
        .try_get::<Option<String>, _>("preferred_date")?
        .map(|value| {
            value.parse::<NaiveDate>().map_err(|error| {
                RepositoryError::Decode(format!("invalid preferred_date `{value}` ({error})"))
            })
        })
        .transpose()?;
    let preferred_time = row
        .try_get::<Option<String>, _>("preferred_time")?
        .map(|value| {
            value.parse::<NaiveTime>().map_err(|error| {
                RepositoryError::Decode(format!("invalid preferred_time `{value}` ({error})"))
            })
        })
        .transpose()?;

    Ok(ServiceRequest {
        request_id: RequestId(row.try_get("id")?),
        customer_id: CustomerId(row.try_get("customer_id")?),
        details: RequestDetails {
            service_type: row.try_get("service_type")?,
            description: row.try_get("description")?,
            location: Location {
                address: row.try_get("location_address")?,
                latitude: row.try_get("location_latitude")?,
                longitude: row.try_get("location_longitude")?,
            },
            is_emergency: row.try_get("is_emergency")?,
            budget_range: row.try_get("budget_range")?,
            preferred_date,
            preferred_time,
        },
        status,
        edit_count: parse_u32("edit_count", row.try_get("edit_count")?)?,
        edit_fees_cents: row.try_get("edit_fees_cents")?,
        quote_count: parse_u32("quote_count", row.try_get("quote_count")?)?,
        operator,
        cancellation,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
        version: parse_u32("version", row.try_get("version")?)?,
    })
}

fn history_from_row(row: SqliteRow) -> Result<StatusChange, RepositoryError> {
    let from_status = row
        .try_get::<Option<String>, _>("from_status")?
        .map(|value| {
            RequestStatus::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown from_status `{value}`")))
        })
        .transpose()?;

    let to_status_raw = row.try_get::<String, _>("to_status")?;
    let to_status = RequestStatus::parse(&to_status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown to_status `{to_status_raw}`")))?;

    Ok(StatusChange {
        request_id: RequestId(row.try_get("request_id")?),
        from_status,
        to_status,
        event: row.try_get("event")?,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}
