use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use haulr_core::domain::quote::OperatorId;
use haulr_core::domain::request::RequestId;
use haulr_core::ports::store::StoreError;

pub mod lifecycle;
pub mod memory;
pub mod outbox;
pub mod quote;
pub mod request;

pub use lifecycle::SqlLifecycleStore;
pub use memory::InMemoryLifecycleStore;
pub use outbox::{OutboxEntry, SqlOutbox};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("guard failed: {0}")]
    Conflict(String),
    #[error("operator {operator_id} already has an open quote on request {request_id}")]
    DuplicateOpenQuote { request_id: RequestId, operator_id: OperatorId },
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Database(error) => StoreError::Backend(error.to_string()),
            RepositoryError::Decode(message) => StoreError::Decode(message),
            RepositoryError::Conflict(message) => StoreError::Conflict(message),
            RepositoryError::DuplicateOpenQuote { request_id, operator_id } => {
                StoreError::DuplicateOpenQuote { request_id, operator_id }
            }
        }
    }
}

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
pub(crate) fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(&value).map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    error.as_database_error().is_some_and(|database| database.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{format_timestamp, parse_decimal, parse_timestamp, parse_u32};

    #[test]
    fn formatted_timestamps_sort_like_instants() {
        let base = Utc.with_ymd_and_hms(2026, 1, 10, 8, 0, 0).unwrap();
        let later = base + Duration::milliseconds(1);
        assert!(format_timestamp(&base) < format_timestamp(&later));
        assert_eq!(format_timestamp(&base).len(), format_timestamp(&later).len());

        let parsed = parse_timestamp("at", format_timestamp(&later)).expect("parse");
        assert_eq!(parsed, later);
    }

    #[test]
    fn decode_errors_name_the_column() {
        let error = parse_u32("edit_count", -1).expect_err("negative");
        assert!(error.to_string().contains("edit_count"));

        let error = parse_decimal("amount", "12,50".to_string()).expect_err("comma");
        assert!(error.to_string().contains("amount"));
    }
}
