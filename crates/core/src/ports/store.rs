//! Persistence contract for requests, quotes and counter-offers.
//!
//! Reads are plain lookups. Every write goes through [`LifecycleStore::commit`]
//! with a [`ChangeSet`], which the store must apply all-or-nothing. Each write
//! in a change set names the state it expects to overwrite (request version,
//! quote or counter status); if any expectation fails nothing is written and
//! the store returns [`StoreError::Conflict`].
//!
//! A change set also carries the notifications its transition produced. A
//! store with an outbox persists them in the same unit of work; stores
//! without one ignore them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::counter::{CounterOffer, CounterOfferId, CounterStatus};
use crate::domain::quote::{OperatorId, Quote, QuoteId, QuoteStatus};
use crate::domain::request::{RequestId, RequestStatus, ServiceRequest, StatusChange};
use crate::errors::LifecycleError;
use crate::ports::notify::Notification;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("write conflict: {0}")]
    Conflict(String),
    #[error("operator {operator_id} already has an open quote on request {request_id}")]
    DuplicateOpenQuote { request_id: RequestId, operator_id: OperatorId },
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<StoreError> for LifecycleError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(message) => Self::Conflict(message),
            StoreError::DuplicateOpenQuote { request_id, operator_id } => {
                Self::DuplicateQuote { request_id, operator_id }
            }
            StoreError::Backend(message) | StoreError::Decode(message) => Self::Store(message),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RequestWrite {
    pub request: ServiceRequest,
    pub expected_version: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuoteWrite {
    pub quote: Quote,
    pub expected_status: QuoteStatus,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CounterWrite {
    pub counter: CounterOffer,
    pub expected_status: CounterStatus,
}

/// One transition's worth of writes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeSet {
    pub request_insert: Option<ServiceRequest>,
    pub request_write: Option<RequestWrite>,
    pub quote_inserts: Vec<Quote>,
    pub quote_writes: Vec<QuoteWrite>,
    pub counter_inserts: Vec<CounterOffer>,
    pub counter_writes: Vec<CounterWrite>,
    pub history: Vec<StatusChange>,
    pub outbox: Vec<Notification>,
}

impl ChangeSet {
    pub fn insert_request(request: ServiceRequest) -> Self {
        Self { request_insert: Some(request), ..Self::default() }
    }

    /// Writes `request`, which must still be at `expected_version` in the store.
    /// The caller bumps `request.version` before handing it over.
    pub fn update_request(request: ServiceRequest, expected_version: u32) -> Self {
        Self { request_write: Some(RequestWrite { request, expected_version }), ..Self::default() }
    }

    pub fn insert_quote(mut self, quote: Quote) -> Self {
        self.quote_inserts.push(quote);
        self
    }

    pub fn write_quote(mut self, quote: Quote, expected_status: QuoteStatus) -> Self {
        self.quote_writes.push(QuoteWrite { quote, expected_status });
        self
    }

    pub fn insert_counter(mut self, counter: CounterOffer) -> Self {
        self.counter_inserts.push(counter);
        self
    }

    pub fn write_counter(mut self, counter: CounterOffer, expected_status: CounterStatus) -> Self {
        self.counter_writes.push(CounterWrite { counter, expected_status });
        self
    }

    pub fn enqueue(mut self, notifications: impl IntoIterator<Item = Notification>) -> Self {
        self.outbox.extend(notifications);
        self
    }

    pub fn record(
        mut self,
        request_id: RequestId,
        from_status: Option<RequestStatus>,
        to_status: RequestStatus,
        event: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        self.history.push(StatusChange {
            request_id,
            from_status,
            to_status,
            event: event.into(),
            occurred_at,
        });
        self
    }
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn find_request(&self, id: &RequestId) -> Result<Option<ServiceRequest>, StoreError>;

    async fn list_history(&self, id: &RequestId) -> Result<Vec<StatusChange>, StoreError>;

    /// `pending` requests created before `created_before` that never received a quote.
    async fn list_unmatched_candidates(
        &self,
        created_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<RequestId>, StoreError>;

    /// Requests still looking for an operator that were created before `created_before`.
    async fn list_stale_requests(
        &self,
        created_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<RequestId>, StoreError>;
}

#[async_trait]
pub trait QuoteStore: Send + Sync {
    async fn find_quote(&self, id: &QuoteId) -> Result<Option<Quote>, StoreError>;

    async fn list_quotes_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<Quote>, StoreError>;

    /// `sent` and `countered` quotes whose `expires_at` is strictly before `now`.
    async fn list_due_quotes(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<QuoteId>, StoreError>;

    async fn find_counter(&self, id: &CounterOfferId) -> Result<Option<CounterOffer>, StoreError>;

    async fn list_counters_for_quote(
        &self,
        quote_id: &QuoteId,
    ) -> Result<Vec<CounterOffer>, StoreError>;
}

#[async_trait]
pub trait LifecycleStore: RequestStore + QuoteStore {
    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError>;
}
