//! Pure decisions shared by several transitions.

use chrono::{DateTime, Utc};

use crate::domain::quote::{OperatorId, Quote, QuoteId};
use crate::domain::request::{RequestStatus, ServiceRequest};
use crate::ports::store::ChangeSet;

/// Where a request lands after one of its quotes closed without being accepted.
///
/// A request that still has live quotes keeps shopping; one with none left
/// falls back to `operator_declined`. Requests past the shopping phase keep
/// their status.
pub fn status_after_quote_closed(current: RequestStatus, live_quotes: usize) -> RequestStatus {
    if !current.is_open_for_quotes() {
        return current;
    }

    match (current, live_quotes) {
        (RequestStatus::Quoted | RequestStatus::OperatorAccepted, 0) => {
            RequestStatus::OperatorDeclined
        }
        (RequestStatus::Quoted | RequestStatus::OperatorAccepted, _) => current,
        (_, 0) => current,
        (_, _) => RequestStatus::Quoted,
    }
}

/// Open quotes of a request other than `except`.
pub fn live_quotes<'a>(quotes: &'a [Quote], except: &QuoteId) -> Vec<&'a Quote> {
    quotes.iter().filter(|quote| quote.status.is_open() && &quote.quote_id != except).collect()
}

pub fn open_quote_for_operator<'a>(
    quotes: &'a [Quote],
    operator_id: &OperatorId,
) -> Option<&'a Quote> {
    quotes.iter().find(|quote| quote.status.is_open() && &quote.operator_id == operator_id)
}

/// Copy of `request` stamped as its next revision.
pub fn next_revision(request: &ServiceRequest, now: DateTime<Utc>) -> ServiceRequest {
    let mut next = request.clone();
    next.version = request.version.saturating_add(1);
    next.updated_at = now;
    next
}

/// Change set writing `after` over `before`, with a history row when the
/// status moved.
pub fn request_update(
    before: &ServiceRequest,
    after: ServiceRequest,
    event: &str,
    now: DateTime<Utc>,
) -> ChangeSet {
    let moved = before.status != after.status;
    let request_id = after.request_id.clone();
    let to_status = after.status;
    let changes = ChangeSet::update_request(after, before.version);
    if moved {
        changes.record(request_id, Some(before.status), to_status, event, now)
    } else {
        changes
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{live_quotes, next_revision, request_update, status_after_quote_closed};
    use crate::domain::quote::{OperatorId, OperatorRef, Quote, QuoteStatus, QuoteSubmission};
    use crate::domain::request::{
        CustomerId, Location, RequestDetails, RequestId, RequestStatus, ServiceRequest,
    };

    fn quote(operator: &str) -> Quote {
        Quote::issue(
            QuoteSubmission {
                request_id: RequestId("R-1".to_string()),
                operator: OperatorRef {
                    operator_id: OperatorId(operator.to_string()),
                    operator_name: format!("{operator} Hauling"),
                },
                amount: Decimal::new(8000, 2),
                breakdown: Vec::new(),
                message: None,
            },
            Utc::now(),
            Duration::minutes(60),
        )
        .expect("valid quote")
    }

    #[test]
    fn last_live_quote_closing_falls_back_to_operator_declined() {
        assert_eq!(
            status_after_quote_closed(RequestStatus::Quoted, 0),
            RequestStatus::OperatorDeclined
        );
        assert_eq!(
            status_after_quote_closed(RequestStatus::OperatorAccepted, 0),
            RequestStatus::OperatorDeclined
        );
        assert_eq!(status_after_quote_closed(RequestStatus::Quoted, 2), RequestStatus::Quoted);
        assert_eq!(
            status_after_quote_closed(RequestStatus::OperatorDeclined, 1),
            RequestStatus::Quoted
        );
    }

    #[test]
    fn assigned_and_terminal_requests_are_not_recomputed() {
        assert_eq!(status_after_quote_closed(RequestStatus::Assigned, 0), RequestStatus::Assigned);
        assert_eq!(
            status_after_quote_closed(RequestStatus::Cancelled, 0),
            RequestStatus::Cancelled
        );
    }

    #[test]
    fn live_quotes_skip_closed_and_excluded_quotes() {
        let first = quote("OP-1");
        let mut second = quote("OP-2");
        second.status = QuoteStatus::Expired;
        let third = quote("OP-3");
        let quotes = vec![first.clone(), second, third];

        let live = live_quotes(&quotes, &first.quote_id);
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].operator_id, OperatorId("OP-3".to_string()));
    }

    #[test]
    fn history_row_is_written_only_when_status_moves() {
        let now = Utc.with_ymd_and_hms(2026, 1, 10, 8, 0, 0).unwrap();
        let request = ServiceRequest::new(
            CustomerId("C-1".to_string()),
            RequestDetails {
                service_type: "haul".to_string(),
                description: "Old couch".to_string(),
                location: Location { address: "3 Oak".to_string(), latitude: None, longitude: None },
                is_emergency: false,
                budget_range: None,
                preferred_date: None,
                preferred_time: None,
            },
            now,
        )
        .expect("valid request");

        let same = next_revision(&request, now);
        assert_eq!(same.version, 2);
        assert!(request_update(&request, same, "request.edited", now).history.is_empty());

        let mut moved = next_revision(&request, now);
        moved.status = RequestStatus::Quoted;
        let changes = request_update(&request, moved, "quote.received", now);
        assert_eq!(changes.history.len(), 1);
        assert_eq!(changes.history[0].from_status, Some(RequestStatus::Pending));
        assert_eq!(changes.request_write.map(|write| write.expected_version), Some(1));
    }
}
