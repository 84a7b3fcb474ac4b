use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use haulr_core::domain::counter::{CounterOffer, CounterOfferId};
use haulr_core::domain::quote::{Quote, QuoteId, QuoteStatus};
use haulr_core::domain::request::{RequestId, RequestStatus, ServiceRequest, StatusChange};
use haulr_core::ports::store::{
    ChangeSet, LifecycleStore, QuoteStore, RequestStore, StoreError,
};

#[derive(Default)]
struct State {
    requests: HashMap<String, ServiceRequest>,
    quotes: HashMap<String, Quote>,
    counters: HashMap<String, CounterOffer>,
    history: Vec<StatusChange>,
}

impl State {
    /// Checks every guard in `changes` against the current state, including
    /// quotes the same change set closes or inserts.
    fn check(&self, changes: &ChangeSet) -> Result<(), StoreError> {
        if let Some(request) = &changes.request_insert {
            if self.requests.contains_key(&request.request_id.0) {
                return Err(StoreError::Conflict(format!(
                    "request {} already exists",
                    request.request_id
                )));
            }
        }

        if let Some(write) = &changes.request_write {
            let current = self.requests.get(&write.request.request_id.0).map(|r| r.version);
            if current != Some(write.expected_version) {
                return Err(StoreError::Conflict(format!(
                    "request {} is no longer at version {}",
                    write.request.request_id, write.expected_version
                )));
            }
        }

        for write in &changes.quote_writes {
            let Some(stored) = self.quotes.get(&write.quote.quote_id.0) else {
                return Err(StoreError::Conflict(format!(
                    "quote {} does not exist",
                    write.quote.quote_id
                )));
            };
            if stored.status != write.expected_status {
                return Err(StoreError::Conflict(format!(
                    "quote {} is no longer {}",
                    write.quote.quote_id, write.expected_status
                )));
            }
        }

        let closing: HashSet<&str> = changes
            .quote_writes
            .iter()
            .filter(|write| !write.quote.status.is_open())
            .map(|write| write.quote.quote_id.0.as_str())
            .collect();
        for (index, quote) in changes.quote_inserts.iter().enumerate() {
            if self.quotes.contains_key(&quote.quote_id.0) {
                return Err(StoreError::Conflict(format!("quote {} already exists", quote.quote_id)));
            }
            if !quote.status.is_open() {
                continue;
            }
            let stored_open = self.quotes.values().any(|stored| {
                same_slot(stored, quote)
                    && stored.status.is_open()
                    && !closing.contains(stored.quote_id.0.as_str())
            });
            let staged_open = changes.quote_inserts[..index]
                .iter()
                .any(|earlier| same_slot(earlier, quote) && earlier.status.is_open());
            if stored_open || staged_open {
                return Err(StoreError::DuplicateOpenQuote {
                    request_id: quote.request_id.clone(),
                    operator_id: quote.operator_id.clone(),
                });
            }
        }

        for write in &changes.counter_writes {
            let Some(stored) = self.counters.get(&write.counter.counter_id.0) else {
                return Err(StoreError::Conflict(format!(
                    "counter-offer {} does not exist",
                    write.counter.counter_id
                )));
            };
            if stored.status != write.expected_status {
                return Err(StoreError::Conflict(format!(
                    "counter-offer {} is no longer {}",
                    write.counter.counter_id,
                    write.expected_status.as_str()
                )));
            }
        }

        for counter in &changes.counter_inserts {
            if self.counters.contains_key(&counter.counter_id.0) {
                return Err(StoreError::Conflict(format!(
                    "counter-offer {} already exists",
                    counter.counter_id
                )));
            }
        }

        Ok(())
    }

    /// Applies a change set that already passed [`State::check`].
    fn apply(&mut self, changes: ChangeSet) {
        if let Some(request) = changes.request_insert {
            self.requests.insert(request.request_id.0.clone(), request);
        }
        if let Some(write) = changes.request_write {
            self.requests.insert(write.request.request_id.0.clone(), write.request);
        }
        for write in changes.quote_writes {
            if let Some(stored) = self.quotes.get_mut(&write.quote.quote_id.0) {
                stored.status = write.quote.status;
                stored.responded_at = write.quote.responded_at;
            }
        }
        for quote in changes.quote_inserts {
            self.quotes.insert(quote.quote_id.0.clone(), quote);
        }
        for write in changes.counter_writes {
            self.counters.insert(write.counter.counter_id.0.clone(), write.counter);
        }
        for counter in changes.counter_inserts {
            self.counters.insert(counter.counter_id.0.clone(), counter);
        }
        self.history.extend(changes.history);
    }

    fn request_ids_where(
        &self,
        created_before: DateTime<Utc>,
        limit: u32,
        keep: impl Fn(&ServiceRequest) -> bool,
    ) -> Vec<RequestId> {
        let mut matching: Vec<&ServiceRequest> = self
            .requests
            .values()
            .filter(|request| request.created_at < created_before && keep(request))
            .collect();
        matching.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        matching
            .into_iter()
            .take(limit as usize)
            .map(|request| request.request_id.clone())
            .collect()
    }
}

fn same_slot(left: &Quote, right: &Quote) -> bool {
    left.request_id == right.request_id && left.operator_id == right.operator_id
}

/// Process-local store. A change set is checked in full under the write lock
/// and applied only when every guard holds.
#[derive(Default)]
pub struct InMemoryLifecycleStore {
    state: RwLock<State>,
}

impl InMemoryLifecycleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RequestStore for InMemoryLifecycleStore {
    async fn find_request(&self, id: &RequestId) -> Result<Option<ServiceRequest>, StoreError> {
        let state = self.state.read().await;
        Ok(state.requests.get(&id.0).cloned())
    }

    async fn list_history(&self, id: &RequestId) -> Result<Vec<StatusChange>, StoreError> {
        let state = self.state.read().await;
        Ok(state.history.iter().filter(|change| &change.request_id == id).cloned().collect())
    }

    async fn list_unmatched_candidates(
        &self,
        created_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<RequestId>, StoreError> {
        let state = self.state.read().await;
        Ok(state.request_ids_where(created_before, limit, |request| {
            request.status == RequestStatus::Pending && request.quote_count == 0
        }))
    }

    async fn list_stale_requests(
        &self,
        created_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<RequestId>, StoreError> {
        let state = self.state.read().await;
        Ok(state.request_ids_where(created_before, limit, |request| {
            request.status.is_open_for_quotes()
        }))
    }
}

#[async_trait::async_trait]
impl QuoteStore for InMemoryLifecycleStore {
    async fn find_quote(&self, id: &QuoteId) -> Result<Option<Quote>, StoreError> {
        let state = self.state.read().await;
        Ok(state.quotes.get(&id.0).cloned())
    }

    async fn list_quotes_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<Quote>, StoreError> {
        let state = self.state.read().await;
        let mut quotes: Vec<Quote> = state
            .quotes
            .values()
            .filter(|quote| &quote.request_id == request_id)
            .cloned()
            .collect();
        quotes.sort_by(|left, right| {
            left.submitted_at.cmp(&right.submitted_at).then_with(|| left.quote_id.cmp(&right.quote_id))
        });
        Ok(quotes)
    }

    async fn list_due_quotes(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<QuoteId>, StoreError> {
        let state = self.state.read().await;
        let mut due: Vec<&Quote> = state
            .quotes
            .values()
            .filter(|quote| {
                matches!(quote.status, QuoteStatus::Sent | QuoteStatus::Countered)
                    && quote.expires_at < now
            })
            .collect();
        due.sort_by(|left, right| left.expires_at.cmp(&right.expires_at));
        Ok(due.into_iter().take(limit as usize).map(|quote| quote.quote_id.clone()).collect())
    }

    async fn find_counter(&self, id: &CounterOfferId) -> Result<Option<CounterOffer>, StoreError> {
        let state = self.state.read().await;
        Ok(state.counters.get(&id.0).cloned())
    }

    async fn list_counters_for_quote(
        &self,
        quote_id: &QuoteId,
    ) -> Result<Vec<CounterOffer>, StoreError> {
        let state = self.state.read().await;
        let mut counters: Vec<CounterOffer> = state
            .counters
            .values()
            .filter(|counter| &counter.quote_id == quote_id)
            .cloned()
            .collect();
        counters.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        Ok(counters)
    }
}

#[async_trait::async_trait]
impl LifecycleStore for InMemoryLifecycleStore {
    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.check(&changes)?;
        state.apply(changes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use haulr_core::domain::counter::{CounterOffer, CounterStatus};
    use haulr_core::domain::quote::{OperatorId, OperatorRef, Quote, QuoteStatus, QuoteSubmission};
    use haulr_core::domain::request::{
        CustomerId, Location, RequestDetails, RequestStatus, ServiceRequest,
    };
    use haulr_core::ports::store::{ChangeSet, LifecycleStore, QuoteStore, RequestStore, StoreError};

    use super::InMemoryLifecycleStore;

    fn request() -> ServiceRequest {
        ServiceRequest::new(
            CustomerId("C-9".to_string()),
            RequestDetails {
                service_type: "lockout".to_string(),
                description: "Keys locked inside".to_string(),
                location: Location {
                    address: "Harbour car park".to_string(),
                    latitude: None,
                    longitude: None,
                },
                is_emergency: false,
                budget_range: None,
                preferred_date: None,
                preferred_time: None,
            },
            Utc.with_ymd_and_hms(2026, 1, 10, 8, 0, 0).unwrap(),
        )
        .expect("valid request")
    }

    fn quote(request: &ServiceRequest, operator: &str) -> Quote {
        Quote::issue(
            QuoteSubmission {
                request_id: request.request_id.clone(),
                operator: OperatorRef {
                    operator_id: OperatorId(operator.to_string()),
                    operator_name: operator.to_string(),
                },
                amount: Decimal::new(6500, 2),
                breakdown: Vec::new(),
                message: None,
            },
            request.created_at,
            Duration::minutes(60),
        )
        .expect("valid quote")
    }

    #[tokio::test]
    async fn failed_guard_leaves_state_untouched() {
        let store = InMemoryLifecycleStore::new();
        let request = request();
        store.commit(ChangeSet::insert_request(request.clone())).await.expect("insert");

        let mut quoted = request.clone();
        quoted.status = RequestStatus::Quoted;
        quoted.version = 2;
        let error = store
            .commit(
                ChangeSet::update_request(quoted.clone(), 1)
                    .insert_quote(quote(&request, "OP-1"))
                    .insert_quote(quote(&request, "OP-1")),
            )
            .await
            .expect_err("duplicate open quote in one change set");
        assert!(matches!(error, StoreError::DuplicateOpenQuote { .. }));

        let stored = store.find_request(&request.request_id).await.expect("find").expect("row");
        assert_eq!(stored.version, 1);
        assert!(store
            .list_quotes_for_request(&request.request_id)
            .await
            .expect("quotes")
            .is_empty());
    }

    #[tokio::test]
    async fn quote_guard_rejects_stale_status() {
        let store = InMemoryLifecycleStore::new();
        let request = request();
        let quote = quote(&request, "OP-2");
        store
            .commit(ChangeSet::insert_request(request.clone()).insert_quote(quote.clone()))
            .await
            .expect("insert");

        let mut expired = quote.clone();
        expired.transition_to(QuoteStatus::Expired, request.created_at).expect("expire");
        store
            .commit(ChangeSet::default().write_quote(expired.clone(), QuoteStatus::Sent))
            .await
            .expect("first expiry");
        let error = store
            .commit(ChangeSet::default().write_quote(expired, QuoteStatus::Sent))
            .await
            .expect_err("second expiry");
        assert!(matches!(error, StoreError::Conflict(_)));
        assert!(store
            .list_due_quotes(quote.expires_at + Duration::hours(1), 10)
            .await
            .expect("due")
            .is_empty());
    }

    #[tokio::test]
    async fn late_guard_failure_discards_earlier_writes() {
        let store = InMemoryLifecycleStore::new();
        let request = request();
        let quote = quote(&request, "OP-3");
        let counter = CounterOffer::open(
            quote.quote_id.clone(),
            request.request_id.clone(),
            Decimal::new(5000, 2),
            None,
            request.created_at,
        )
        .expect("counter");
        store
            .commit(ChangeSet::insert_request(request.clone()).insert_quote(quote.clone()))
            .await
            .expect("insert");

        let mut quoted = request.clone();
        quoted.status = RequestStatus::Quoted;
        quoted.version = 2;
        let mut expired = quote.clone();
        expired.transition_to(QuoteStatus::Expired, request.created_at).expect("expire");
        let mut declined = counter.clone();
        declined.resolve(CounterStatus::Declined, request.created_at).expect("decline");
        let error = store
            .commit(
                ChangeSet::update_request(quoted, 1)
                    .write_quote(expired, QuoteStatus::Sent)
                    .write_counter(declined, CounterStatus::Open),
            )
            .await
            .expect_err("counter was never stored");
        assert!(matches!(error, StoreError::Conflict(_)));

        let stored = store.find_request(&request.request_id).await.expect("find").expect("row");
        assert_eq!(stored.version, 1);
        let stored = store.find_quote(&quote.quote_id).await.expect("find").expect("row");
        assert_eq!(stored.status, QuoteStatus::Sent);
        assert!(store.list_history(&request.request_id).await.expect("history").is_empty());
    }

    #[tokio::test]
    async fn closed_quote_frees_the_slot_within_one_change_set() {
        let store = InMemoryLifecycleStore::new();
        let request = request();
        let first = quote(&request, "OP-4");
        store
            .commit(ChangeSet::insert_request(request.clone()).insert_quote(first.clone()))
            .await
            .expect("insert");

        let mut withdrawn = first.clone();
        withdrawn.transition_to(QuoteStatus::OperatorWithdrawn, request.created_at).expect("withdraw");
        let replacement = quote(&request, "OP-4");
        store
            .commit(
                ChangeSet::default()
                    .write_quote(withdrawn, QuoteStatus::Sent)
                    .insert_quote(replacement.clone()),
            )
            .await
            .expect("replacement");

        let quotes = store.list_quotes_for_request(&request.request_id).await.expect("quotes");
        assert_eq!(quotes.len(), 2);
        let open: Vec<_> = quotes.iter().filter(|quote| quote.status.is_open()).collect();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].quote_id, replacement.quote_id);
    }

    #[tokio::test]
    async fn countered_quotes_past_expiry_are_due() {
        let store = InMemoryLifecycleStore::new();
        let request = request();
        let quote = quote(&request, "OP-5");
        store
            .commit(ChangeSet::insert_request(request.clone()).insert_quote(quote.clone()))
            .await
            .expect("insert");
        let mut countered = quote.clone();
        countered.transition_to(QuoteStatus::Countered, request.created_at).expect("counter");
        store
            .commit(ChangeSet::default().write_quote(countered, QuoteStatus::Sent))
            .await
            .expect("countered");

        assert!(store.list_due_quotes(quote.expires_at, 10).await.expect("due").is_empty());
        let due = store
            .list_due_quotes(quote.expires_at + Duration::seconds(1), 10)
            .await
            .expect("due");
        assert_eq!(due, vec![quote.quote_id]);
    }
}
