//! The request/quote state machine.
//!
//! Every transition is load, decide, commit: the engine reads the current
//! rows, builds one [`ChangeSet`] with guards on what it read, and hands it
//! to the store. A failed guard means someone else committed first; the
//! engine re-reads and decides again, a bounded number of times.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::domain::counter::{CounterOffer, CounterOfferId, CounterStatus};
use crate::domain::quote::{ensure_positive_amount, Quote, QuoteId, QuoteStatus, QuoteSubmission};
use crate::domain::request::{
    AssignedOperator, Cancellation, CustomerId, RequestDetails, RequestEdit, RequestId,
    RequestStatus, ServiceRequest, StatusChange,
};
use crate::errors::LifecycleError;
use crate::lifecycle::rules::{
    live_quotes, next_revision, open_quote_for_operator, request_update,
    status_after_quote_closed,
};
use crate::policy::{can_cancel, can_edit, FeePreview, LifecyclePolicy};
use crate::ports::matching::{MatchingPort, NoMatching};
use crate::ports::notify::{Notification, NotificationKind, NotificationPort, TracingNotifier};
use crate::ports::store::{ChangeSet, LifecycleStore, StoreError};

pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteOutcome {
    pub request: ServiceRequest,
    pub quote: Quote,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterOutcome {
    pub request: ServiceRequest,
    pub quote: Quote,
    pub counter: CounterOffer,
    /// Fresh quote issued at the counter amount when the operator accepts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacement: Option<Quote>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditOutcome {
    pub request: ServiceRequest,
    pub fee_cents: i64,
}

/// One attempt's decision: what to write, what to return, what to announce.
struct Plan<T> {
    changes: ChangeSet,
    value: T,
    notifications: Vec<Notification>,
}

#[derive(Clone)]
pub struct LifecycleEngine {
    store: Arc<dyn LifecycleStore>,
    notifier: Arc<dyn NotificationPort>,
    matcher: Arc<dyn MatchingPort>,
    clock: Arc<dyn Clock>,
    policy: LifecyclePolicy,
    max_conflict_retries: u32,
}

impl LifecycleEngine {
    pub fn new(store: Arc<dyn LifecycleStore>, policy: LifecyclePolicy) -> Self {
        Self {
            store,
            notifier: Arc::new(TracingNotifier),
            matcher: Arc::new(NoMatching),
            clock: Arc::new(SystemClock),
            policy,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationPort>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn MatchingPort>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn submit(
        &self,
        customer_id: CustomerId,
        details: RequestDetails,
    ) -> Result<ServiceRequest, LifecycleError> {
        let now = self.clock.now();
        let request = ServiceRequest::new(customer_id, details, now)?;

        let operators = match self.matcher.match_operators(&request).await {
            Ok(operators) => operators,
            Err(error) => {
                warn!(
                    event_name = "lifecycle.matching.failed",
                    request_id = %request.request_id,
                    error = %error,
                    "operator matching failed, announcing request without recipients"
                );
                Vec::new()
            }
        };
        let matched_operators = operators.len();
        let notifications = vec![Notification::new(
            NotificationKind::RequestCreated,
            request.request_id.clone(),
            now,
        )
        .to_all(operators.into_iter().map(|operator| operator.0))
        .with("serviceType", request.details.service_type.clone())
        .with("isEmergency", request.details.is_emergency)];

        let changes = ChangeSet::insert_request(request.clone())
            .record(request.request_id.clone(), None, RequestStatus::Pending, "request.submitted", now)
            .enqueue(notifications.iter().cloned());
        self.store.commit(changes).await?;

        info!(
            event_name = "lifecycle.request.submitted",
            request_id = %request.request_id,
            service_type = %request.details.service_type,
            is_emergency = request.details.is_emergency,
            matched_operators,
            "service request submitted"
        );

        self.publish(notifications).await;

        Ok(request)
    }

    pub async fn receive_quote(
        &self,
        submission: QuoteSubmission,
    ) -> Result<QuoteOutcome, LifecycleError> {
        submission.validate()?;
        let submission = &submission;
        let outcome = self
            .execute("quote.receive", move |now| {
                self.plan_quote(submission, RequestStatus::Quoted, now)
            })
            .await?;

        info!(
            event_name = "lifecycle.quote.received",
            request_id = %outcome.request.request_id,
            quote_id = %outcome.quote.quote_id,
            operator_id = %outcome.quote.operator_id,
            amount = %outcome.quote.amount,
            "quote received"
        );
        Ok(outcome)
    }

    /// The operator takes the request at a fixed price. The customer still
    /// confirms through [`Self::accept_quote`].
    pub async fn operator_accept(
        &self,
        submission: QuoteSubmission,
    ) -> Result<QuoteOutcome, LifecycleError> {
        submission.validate()?;
        let submission = &submission;
        let outcome = self
            .execute("operator.accept", move |now| {
                self.plan_quote(submission, RequestStatus::OperatorAccepted, now)
            })
            .await?;

        info!(
            event_name = "lifecycle.operator.accepted",
            request_id = %outcome.request.request_id,
            quote_id = %outcome.quote.quote_id,
            operator_id = %outcome.quote.operator_id,
            "operator accepted request"
        );
        Ok(outcome)
    }

    pub async fn accept_quote(&self, quote_id: &QuoteId) -> Result<QuoteOutcome, LifecycleError> {
        let outcome =
            self.execute("quote.accept", move |now| self.plan_accept(quote_id, now)).await?;

        info!(
            event_name = "lifecycle.quote.accepted",
            request_id = %outcome.request.request_id,
            quote_id = %outcome.quote.quote_id,
            operator_id = %outcome.quote.operator_id,
            "quote accepted, request assigned"
        );
        Ok(outcome)
    }

    pub async fn decline_quote(&self, quote_id: &QuoteId) -> Result<QuoteOutcome, LifecycleError> {
        let outcome = self
            .execute("quote.decline", move |now| {
                self.plan_close_quote(quote_id, QuoteStatus::CustomerDeclined, now)
            })
            .await?;

        info!(
            event_name = "lifecycle.quote.declined",
            request_id = %outcome.request.request_id,
            quote_id = %outcome.quote.quote_id,
            request_status = %outcome.request.status,
            "quote declined by customer"
        );
        Ok(outcome)
    }

    pub async fn withdraw_quote(&self, quote_id: &QuoteId) -> Result<QuoteOutcome, LifecycleError> {
        let outcome = self
            .execute("quote.withdraw", move |now| {
                self.plan_close_quote(quote_id, QuoteStatus::OperatorWithdrawn, now)
            })
            .await?;

        info!(
            event_name = "lifecycle.quote.withdrawn",
            request_id = %outcome.request.request_id,
            quote_id = %outcome.quote.quote_id,
            request_status = %outcome.request.status,
            "quote withdrawn by operator"
        );
        Ok(outcome)
    }

    pub async fn counter_offer(
        &self,
        quote_id: &QuoteId,
        amount: Decimal,
        message: Option<String>,
    ) -> Result<CounterOutcome, LifecycleError> {
        ensure_positive_amount(amount)?;
        let message = &message;
        let outcome = self
            .execute("quote.counter", move |now| {
                self.plan_counter(quote_id, amount, message.clone(), now)
            })
            .await?;

        info!(
            event_name = "lifecycle.quote.countered",
            request_id = %outcome.request.request_id,
            quote_id = %outcome.quote.quote_id,
            counter_id = %outcome.counter.counter_id,
            amount = %outcome.counter.amount,
            "customer countered quote"
        );
        Ok(outcome)
    }

    pub async fn accept_counter(
        &self,
        counter_id: &CounterOfferId,
    ) -> Result<CounterOutcome, LifecycleError> {
        let outcome = self
            .execute("counter.accept", move |now| {
                self.plan_resolve_counter(counter_id, CounterStatus::Accepted, now)
            })
            .await?;

        info!(
            event_name = "lifecycle.counter.accepted",
            request_id = %outcome.request.request_id,
            counter_id = %outcome.counter.counter_id,
            replacement_quote_id = outcome
                .replacement
                .as_ref()
                .map(|quote| quote.quote_id.0.as_str())
                .unwrap_or("none"),
            "operator accepted counter-offer"
        );
        Ok(outcome)
    }

    pub async fn decline_counter(
        &self,
        counter_id: &CounterOfferId,
    ) -> Result<CounterOutcome, LifecycleError> {
        let outcome = self
            .execute("counter.decline", move |now| {
                self.plan_resolve_counter(counter_id, CounterStatus::Declined, now)
            })
            .await?;

        info!(
            event_name = "lifecycle.counter.declined",
            request_id = %outcome.request.request_id,
            counter_id = %outcome.counter.counter_id,
            request_status = %outcome.request.status,
            "operator declined counter-offer"
        );
        Ok(outcome)
    }

    pub async fn cancel(
        &self,
        request_id: &RequestId,
        reason: &str,
    ) -> Result<ServiceRequest, LifecycleError> {
        let request = self
            .execute("request.cancel", move |now| self.plan_cancel(request_id, reason, now))
            .await?;

        info!(
            event_name = "lifecycle.request.cancelled",
            request_id = %request.request_id,
            fee_cents = request
                .cancellation
                .as_ref()
                .map(|cancellation| cancellation.cancellation_fee_cents)
                .unwrap_or_default(),
            "service request cancelled"
        );
        Ok(request)
    }

    pub async fn edit(
        &self,
        request_id: &RequestId,
        edit: RequestEdit,
    ) -> Result<EditOutcome, LifecycleError> {
        let edit = &edit;
        let outcome =
            self.execute("request.edit", move |now| self.plan_edit(request_id, edit, now)).await?;

        info!(
            event_name = "lifecycle.request.edited",
            request_id = %outcome.request.request_id,
            edit_count = outcome.request.edit_count,
            fee_cents = outcome.fee_cents,
            "service request edited"
        );
        Ok(outcome)
    }

    pub async fn start_job(&self, request_id: &RequestId) -> Result<ServiceRequest, LifecycleError> {
        let request = self
            .execute("job.start", move |now| {
                self.plan_job(request_id, RequestStatus::InProgress, now)
            })
            .await?;

        info!(event_name = "lifecycle.job.started", request_id = %request.request_id, "job started");
        Ok(request)
    }

    pub async fn complete_job(
        &self,
        request_id: &RequestId,
    ) -> Result<ServiceRequest, LifecycleError> {
        let request = self
            .execute("job.complete", move |now| {
                self.plan_job(request_id, RequestStatus::Completed, now)
            })
            .await?;

        info!(
            event_name = "lifecycle.job.completed",
            request_id = %request.request_id,
            "job completed"
        );
        Ok(request)
    }

    /// Moves a `sent` or `countered` quote past its expiry to `expired`,
    /// declining any counter-offer still open on it. The request keeps its
    /// status.
    pub async fn expire_quote(&self, quote_id: &QuoteId) -> Result<QuoteOutcome, LifecycleError> {
        let outcome =
            self.execute("quote.expire", move |now| self.plan_expire_quote(quote_id, now)).await?;

        info!(
            event_name = "lifecycle.quote.expired",
            request_id = %outcome.request.request_id,
            quote_id = %outcome.quote.quote_id,
            "quote expired"
        );
        Ok(outcome)
    }

    pub async fn mark_unmatched(
        &self,
        request_id: &RequestId,
    ) -> Result<ServiceRequest, LifecycleError> {
        let request = self
            .execute("request.unmatched", move |now| self.plan_unmatched(request_id, now))
            .await?;

        info!(
            event_name = "lifecycle.request.unmatched",
            request_id = %request.request_id,
            "no operator quoted within the matching window"
        );
        Ok(request)
    }

    pub async fn expire_request(
        &self,
        request_id: &RequestId,
    ) -> Result<ServiceRequest, LifecycleError> {
        let request = self
            .execute("request.expire", move |now| self.plan_expire_request(request_id, now))
            .await?;

        info!(
            event_name = "lifecycle.request.expired",
            request_id = %request.request_id,
            "service request expired"
        );
        Ok(request)
    }

    pub async fn get_request(&self, request_id: &RequestId) -> Result<ServiceRequest, LifecycleError> {
        self.load_request(request_id).await
    }

    pub async fn get_quote(&self, quote_id: &QuoteId) -> Result<Quote, LifecycleError> {
        self.load_quote(quote_id).await
    }

    pub async fn get_counter(
        &self,
        counter_id: &CounterOfferId,
    ) -> Result<CounterOffer, LifecycleError> {
        self.load_counter(counter_id).await
    }

    pub async fn list_quotes(&self, request_id: &RequestId) -> Result<Vec<Quote>, LifecycleError> {
        self.load_request(request_id).await?;
        Ok(self.store.list_quotes_for_request(request_id).await?)
    }

    pub async fn history(&self, request_id: &RequestId) -> Result<Vec<StatusChange>, LifecycleError> {
        self.load_request(request_id).await?;
        Ok(self.store.list_history(request_id).await?)
    }

    pub async fn counters(&self, quote_id: &QuoteId) -> Result<Vec<CounterOffer>, LifecycleError> {
        self.load_quote(quote_id).await?;
        Ok(self.store.list_counters_for_quote(quote_id).await?)
    }

    pub async fn fee_preview(&self, request_id: &RequestId) -> Result<FeePreview, LifecycleError> {
        let request = self.load_request(request_id).await?;
        Ok(self.policy.preview(&request, self.clock.now()))
    }

    /// `sent` quotes already past their expiry.
    pub async fn due_quotes(&self, limit: u32) -> Result<Vec<QuoteId>, LifecycleError> {
        Ok(self.store.list_due_quotes(self.clock.now(), limit).await?)
    }

    /// `pending` requests with no quotes whose matching window has closed.
    pub async fn unmatched_candidates(&self, limit: u32) -> Result<Vec<RequestId>, LifecycleError> {
        let cutoff = self.clock.now() - self.policy.matching_window();
        Ok(self.store.list_unmatched_candidates(cutoff, limit).await?)
    }

    /// Requests still shopping for an operator past the request TTL.
    pub async fn stale_requests(&self, limit: u32) -> Result<Vec<RequestId>, LifecycleError> {
        let cutoff = self.clock.now() - self.policy.request_ttl();
        Ok(self.store.list_stale_requests(cutoff, limit).await?)
    }

    async fn execute<T, F, Fut>(
        &self,
        operation: &'static str,
        mut plan: F,
    ) -> Result<T, LifecycleError>
    where
        F: FnMut(DateTime<Utc>) -> Fut,
        Fut: Future<Output = Result<Plan<T>, LifecycleError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let now = self.clock.now();
            let Plan { changes, value, notifications } = match plan(now).await {
                Ok(plan) => plan,
                // The first read allowed the transition; a concurrent writer
                // has since made it illegal.
                Err(LifecycleError::InvalidState { current, detail }) if attempt > 0 => {
                    return Err(LifecycleError::Conflict(format!(
                        "{detail}; state changed concurrently (now {current})"
                    )));
                }
                Err(error) => return Err(error),
            };

            match self.store.commit(changes.enqueue(notifications.iter().cloned())).await {
                Ok(()) => {
                    self.publish(notifications).await;
                    return Ok(value);
                }
                Err(StoreError::Conflict(reason)) if attempt < self.max_conflict_retries => {
                    attempt += 1;
                    debug!(
                        event_name = "lifecycle.commit.retry",
                        operation,
                        attempt,
                        reason = %reason,
                        "write guard failed, re-reading"
                    );
                }
                Err(StoreError::Conflict(reason)) => {
                    warn!(
                        event_name = "lifecycle.commit.exhausted",
                        operation,
                        attempts = attempt + 1,
                        reason = %reason,
                        "giving up after repeated write conflicts"
                    );
                    return Err(LifecycleError::Conflict(format!(
                        "{operation} kept conflicting with concurrent updates: {reason}"
                    )));
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    async fn publish(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            let kind = notification.kind;
            let request_id = notification.request_id.clone();
            if let Err(error) = self.notifier.notify(notification).await {
                warn!(
                    event_name = "lifecycle.notification.failed",
                    notification_kind = kind.as_str(),
                    request_id = %request_id,
                    error = %error,
                    "notification failed after commit"
                );
            }
        }
    }

    async fn load_request(&self, request_id: &RequestId) -> Result<ServiceRequest, LifecycleError> {
        self.store
            .find_request(request_id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("request", request_id))
    }

    async fn load_quote(&self, quote_id: &QuoteId) -> Result<Quote, LifecycleError> {
        self.store.find_quote(quote_id).await?.ok_or_else(|| LifecycleError::not_found("quote", quote_id))
    }

    async fn load_counter(
        &self,
        counter_id: &CounterOfferId,
    ) -> Result<CounterOffer, LifecycleError> {
        self.store
            .find_counter(counter_id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("counter-offer", counter_id))
    }

    /// Adds a `declined` write for every open counter on the given quotes.
    async fn decline_open_counters(
        &self,
        mut changes: ChangeSet,
        quotes: &[&Quote],
        now: DateTime<Utc>,
    ) -> Result<ChangeSet, LifecycleError> {
        for quote in quotes.iter().filter(|quote| quote.status == QuoteStatus::Countered) {
            for counter in self.store.list_counters_for_quote(&quote.quote_id).await? {
                if counter.status != CounterStatus::Open {
                    continue;
                }
                let mut declined = counter;
                declined.resolve(CounterStatus::Declined, now)?;
                changes = changes.write_counter(declined, CounterStatus::Open);
            }
        }
        Ok(changes)
    }

    async fn plan_quote(
        &self,
        submission: &QuoteSubmission,
        target: RequestStatus,
        now: DateTime<Utc>,
    ) -> Result<Plan<QuoteOutcome>, LifecycleError> {
        let request = self.load_request(&submission.request_id).await?;
        if request.status.is_terminal() || request.status.has_assigned_operator() {
            return Err(LifecycleError::invalid_state(
                request.status,
                "request is no longer accepting quotes",
            ));
        }

        let quotes = self.store.list_quotes_for_request(&request.request_id).await?;
        if open_quote_for_operator(&quotes, &submission.operator.operator_id).is_some() {
            return Err(LifecycleError::DuplicateQuote {
                request_id: request.request_id.clone(),
                operator_id: submission.operator.operator_id.clone(),
            });
        }

        let quote = Quote::issue(submission.clone(), now, self.policy.quote_ttl())?;
        let mut next = next_revision(&request, now);
        next.quote_count = next.quote_count.saturating_add(1);
        if next.status != target {
            next.transition_to(target)?;
        }

        let operator_accepted = target == RequestStatus::OperatorAccepted;
        let event = if operator_accepted { "operator.accepted" } else { "quote.received" };
        let changes = request_update(&request, next.clone(), event, now).insert_quote(quote.clone());
        let notification = Notification::new(
            NotificationKind::QuoteReceived,
            request.request_id.clone(),
            now,
        )
        .for_quote(quote.quote_id.clone())
        .to(request.customer_id.0.clone())
        .with("operatorId", quote.operator_id.0.clone())
        .with("operatorName", quote.operator_name.clone())
        .with("amount", quote.amount.to_string())
        .with("expiresAt", quote.expires_at.to_rfc3339())
        .with("operatorAccepted", operator_accepted);

        Ok(Plan {
            changes,
            value: QuoteOutcome { request: next, quote },
            notifications: vec![notification],
        })
    }

    async fn plan_accept(
        &self,
        quote_id: &QuoteId,
        now: DateTime<Utc>,
    ) -> Result<Plan<QuoteOutcome>, LifecycleError> {
        let quote = self.load_quote(quote_id).await?;
        ensure_unexpired(&quote, now)?;
        if quote.status != QuoteStatus::Sent {
            return Err(LifecycleError::invalid_state(quote.status, "only a sent quote can be accepted"));
        }

        let request = self.load_request(&quote.request_id).await?;
        if !request.status.can_transition_to(RequestStatus::Assigned) {
            return Err(LifecycleError::invalid_state(
                request.status,
                "request cannot be assigned from its current status",
            ));
        }

        let quotes = self.store.list_quotes_for_request(&request.request_id).await?;
        let siblings = live_quotes(&quotes, &quote.quote_id);

        let mut accepted = quote.clone();
        accepted.transition_to(QuoteStatus::Accepted, now)?;

        let mut next = next_revision(&request, now);
        next.transition_to(RequestStatus::Assigned)?;
        next.operator = Some(AssignedOperator {
            operator_id: quote.operator_id.clone(),
            operator_name: quote.operator_name.clone(),
            accepted_quote_id: quote.quote_id.clone(),
        });

        let mut changes = request_update(&request, next.clone(), "quote.accepted", now)
            .write_quote(accepted.clone(), QuoteStatus::Sent);
        let mut notifications = vec![Notification::new(
            NotificationKind::QuoteAccepted,
            request.request_id.clone(),
            now,
        )
        .for_quote(quote.quote_id.clone())
        .to(request.customer_id.0.clone())
        .to(quote.operator_id.0.clone())
        .with("amount", quote.amount.to_string())
        .with("declinedQuotes", siblings.len() as u64)];

        for sibling in &siblings {
            let mut declined = (*sibling).clone();
            declined.transition_to(QuoteStatus::CustomerDeclined, now)?;
            changes = changes.write_quote(declined, sibling.status);
            notifications.push(
                Notification::new(NotificationKind::QuoteDeclined, request.request_id.clone(), now)
                    .for_quote(sibling.quote_id.clone())
                    .to(sibling.operator_id.0.clone())
                    .with("reason", "another quote was accepted"),
            );
        }
        let changes = self.decline_open_counters(changes, &siblings, now).await?;

        Ok(Plan { changes, value: QuoteOutcome { request: next, quote: accepted }, notifications })
    }

    async fn plan_close_quote(
        &self,
        quote_id: &QuoteId,
        to: QuoteStatus,
        now: DateTime<Utc>,
    ) -> Result<Plan<QuoteOutcome>, LifecycleError> {
        let quote = self.load_quote(quote_id).await?;
        let mut closed = quote.clone();
        closed.transition_to(to, now)?;

        let request = self.load_request(&quote.request_id).await?;
        request.ensure_mutable()?;

        let quotes = self.store.list_quotes_for_request(&request.request_id).await?;
        let remaining = live_quotes(&quotes, &quote.quote_id).len();
        let mut next = next_revision(&request, now);
        let status = status_after_quote_closed(request.status, remaining);
        if status != next.status {
            next.transition_to(status)?;
        }

        let withdrawn = to == QuoteStatus::OperatorWithdrawn;
        let (event, kind, recipient) = if withdrawn {
            ("quote.withdrawn", NotificationKind::QuoteWithdrawn, request.customer_id.0.clone())
        } else {
            ("quote.declined", NotificationKind::QuoteDeclined, quote.operator_id.0.clone())
        };

        let changes = request_update(&request, next.clone(), event, now)
            .write_quote(closed.clone(), quote.status);
        let changes = self.decline_open_counters(changes, &[&quote], now).await?;
        let notification = Notification::new(kind, request.request_id.clone(), now)
            .for_quote(quote.quote_id.clone())
            .to(recipient)
            .with("requestStatus", next.status.as_str());

        Ok(Plan {
            changes,
            value: QuoteOutcome { request: next, quote: closed },
            notifications: vec![notification],
        })
    }

    async fn plan_counter(
        &self,
        quote_id: &QuoteId,
        amount: Decimal,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Plan<CounterOutcome>, LifecycleError> {
        let quote = self.load_quote(quote_id).await?;
        ensure_unexpired(&quote, now)?;
        if quote.status != QuoteStatus::Sent {
            return Err(LifecycleError::invalid_state(quote.status, "only a sent quote can be countered"));
        }

        let request = self.load_request(&quote.request_id).await?;
        if !request.status.is_open_for_quotes() {
            return Err(LifecycleError::invalid_state(
                request.status,
                "request is no longer negotiating quotes",
            ));
        }

        let mut countered = quote.clone();
        countered.transition_to(QuoteStatus::Countered, now)?;
        let counter = CounterOffer::open(
            quote.quote_id.clone(),
            request.request_id.clone(),
            amount,
            message,
            now,
        )?;
        let next = next_revision(&request, now);

        let changes = request_update(&request, next.clone(), "quote.countered", now)
            .write_quote(countered.clone(), QuoteStatus::Sent)
            .insert_counter(counter.clone());
        let notification =
            Notification::new(NotificationKind::QuoteCountered, request.request_id.clone(), now)
                .for_quote(quote.quote_id.clone())
                .to(quote.operator_id.0.clone())
                .with("counterId", counter.counter_id.0.clone())
                .with("originalAmount", quote.amount.to_string())
                .with("counterAmount", counter.amount.to_string());

        Ok(Plan {
            changes,
            value: CounterOutcome { request: next, quote: countered, counter, replacement: None },
            notifications: vec![notification],
        })
    }

    async fn plan_resolve_counter(
        &self,
        counter_id: &CounterOfferId,
        resolution: CounterStatus,
        now: DateTime<Utc>,
    ) -> Result<Plan<CounterOutcome>, LifecycleError> {
        let counter = self.load_counter(counter_id).await?;
        if counter.status != CounterStatus::Open {
            return Err(LifecycleError::invalid_state(
                counter.status.as_str(),
                "counter-offer has already been answered",
            ));
        }

        let quote = self.load_quote(&counter.quote_id).await?;
        if quote.status != QuoteStatus::Countered {
            return Err(LifecycleError::invalid_state(
                quote.status,
                "countered quote is no longer open",
            ));
        }

        let request = self.load_request(&quote.request_id).await?;
        if !request.status.is_open_for_quotes() {
            return Err(LifecycleError::invalid_state(
                request.status,
                "request is no longer negotiating quotes",
            ));
        }

        let mut resolved = counter.clone();
        resolved.resolve(resolution, now)?;
        let mut closed = quote.clone();
        closed.transition_to(QuoteStatus::Declined, now)?;
        let mut next = next_revision(&request, now);

        let (changes, replacement, notification) = if resolution == CounterStatus::Accepted {
            let replacement = Quote::issue(
                QuoteSubmission {
                    request_id: request.request_id.clone(),
                    operator: quote.operator(),
                    amount: counter.amount,
                    breakdown: Vec::new(),
                    message: counter.message.clone(),
                },
                now,
                self.policy.quote_ttl(),
            )?;
            next.quote_count = next.quote_count.saturating_add(1);
            if next.status != RequestStatus::Quoted {
                next.transition_to(RequestStatus::Quoted)?;
            }

            let changes = request_update(&request, next.clone(), "counter.accepted", now)
                .write_quote(closed.clone(), QuoteStatus::Countered)
                .insert_quote(replacement.clone());
            let notification =
                Notification::new(NotificationKind::QuoteReceived, request.request_id.clone(), now)
                    .for_quote(replacement.quote_id.clone())
                    .to(request.customer_id.0.clone())
                    .with("counterId", counter.counter_id.0.clone())
                    .with("amount", replacement.amount.to_string())
                    .with("expiresAt", replacement.expires_at.to_rfc3339());
            (changes, Some(replacement), notification)
        } else {
            let quotes = self.store.list_quotes_for_request(&request.request_id).await?;
            let remaining = live_quotes(&quotes, &quote.quote_id).len();
            let status = status_after_quote_closed(request.status, remaining);
            if status != next.status {
                next.transition_to(status)?;
            }

            let changes = request_update(&request, next.clone(), "counter.declined", now)
                .write_quote(closed.clone(), QuoteStatus::Countered);
            let notification =
                Notification::new(NotificationKind::CounterDeclined, request.request_id.clone(), now)
                    .for_quote(quote.quote_id.clone())
                    .to(request.customer_id.0.clone())
                    .with("counterId", counter.counter_id.0.clone());
            (changes, None, notification)
        };

        Ok(Plan {
            changes: changes.write_counter(resolved.clone(), CounterStatus::Open),
            value: CounterOutcome { request: next, quote: closed, counter: resolved, replacement },
            notifications: vec![notification],
        })
    }

    async fn plan_cancel(
        &self,
        request_id: &RequestId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Plan<ServiceRequest>, LifecycleError> {
        let request = self.load_request(request_id).await?;
        if !can_cancel(&request) {
            return Err(LifecycleError::invalid_state(
                request.status,
                "request can no longer be cancelled",
            ));
        }

        let fee = self.policy.cancellation_fee(&request, now);
        let quotes = self.store.list_quotes_for_request(request_id).await?;
        let open: Vec<&Quote> = quotes.iter().filter(|quote| quote.status.is_open()).collect();

        let mut next = next_revision(&request, now);
        next.transition_to(RequestStatus::Cancelled)?;
        next.cancellation = Some(Cancellation {
            cancelled_at: now,
            cancellation_reason: reason.trim().to_string(),
            cancellation_fee_cents: fee,
        });

        let mut changes = request_update(&request, next.clone(), "request.cancelled", now);
        for quote in &open {
            let mut withdrawn = (*quote).clone();
            withdrawn.transition_to(QuoteStatus::OperatorWithdrawn, now)?;
            changes = changes.write_quote(withdrawn, quote.status);
        }
        let changes = self.decline_open_counters(changes, &open, now).await?;

        let notification =
            Notification::new(NotificationKind::RequestCancelled, request.request_id.clone(), now)
                .to(request.customer_id.0.clone())
                .to_all(interested_operators(&request, &open))
                .with("feeCents", fee)
                .with("reason", reason.trim());

        Ok(Plan { changes, value: next, notifications: vec![notification] })
    }

    async fn plan_edit(
        &self,
        request_id: &RequestId,
        edit: &RequestEdit,
        now: DateTime<Utc>,
    ) -> Result<Plan<EditOutcome>, LifecycleError> {
        let request = self.load_request(request_id).await?;
        if !can_edit(&request) {
            return Err(LifecycleError::invalid_state(
                request.status,
                "request can no longer be edited",
            ));
        }

        let details = edit.apply_to(&request.details)?;
        // Priced on the edit count before this edit lands.
        let fee = self.policy.edit_fee(&request, now);

        let mut next = next_revision(&request, now);
        next.details = details;
        next.edit_count = next.edit_count.saturating_add(1);
        next.edit_fees_cents = next.edit_fees_cents.saturating_add(fee);

        let quotes = self.store.list_quotes_for_request(request_id).await?;
        let open: Vec<&Quote> = quotes.iter().filter(|quote| quote.status.is_open()).collect();
        let notification =
            Notification::new(NotificationKind::RequestEdited, request.request_id.clone(), now)
                .to(request.customer_id.0.clone())
                .to_all(interested_operators(&request, &open))
                .with("feeCents", fee)
                .with("editCount", next.edit_count);

        Ok(Plan {
            changes: request_update(&request, next.clone(), "request.edited", now),
            value: EditOutcome { request: next, fee_cents: fee },
            notifications: vec![notification],
        })
    }

    async fn plan_job(
        &self,
        request_id: &RequestId,
        to: RequestStatus,
        now: DateTime<Utc>,
    ) -> Result<Plan<ServiceRequest>, LifecycleError> {
        let request = self.load_request(request_id).await?;
        let mut next = next_revision(&request, now);
        next.transition_to(to)?;

        let (event, kind) = if to == RequestStatus::Completed {
            ("job.completed", NotificationKind::JobCompleted)
        } else {
            ("job.started", NotificationKind::JobStarted)
        };
        let notification = Notification::new(kind, request.request_id.clone(), now)
            .to(request.customer_id.0.clone())
            .to_all(interested_operators(&request, &[]));

        Ok(Plan {
            changes: request_update(&request, next.clone(), event, now),
            value: next,
            notifications: vec![notification],
        })
    }

    async fn plan_expire_quote(
        &self,
        quote_id: &QuoteId,
        now: DateTime<Utc>,
    ) -> Result<Plan<QuoteOutcome>, LifecycleError> {
        let quote = self.load_quote(quote_id).await?;
        if !matches!(quote.status, QuoteStatus::Sent | QuoteStatus::Countered) {
            return Err(LifecycleError::invalid_state(
                quote.status,
                "only a sent or countered quote can expire",
            ));
        }
        if !quote.is_past_expiry(now) {
            return Err(LifecycleError::Validation(format!(
                "quote {} is not due to expire until {}",
                quote.quote_id,
                quote.expires_at.to_rfc3339()
            )));
        }

        let request = self.load_request(&quote.request_id).await?;
        let mut expired = quote.clone();
        expired.transition_to(QuoteStatus::Expired, now)?;
        let next = next_revision(&request, now);

        let changes = request_update(&request, next.clone(), "quote.expired", now)
            .write_quote(expired.clone(), quote.status);
        let changes = self.decline_open_counters(changes, &[&quote], now).await?;
        let notification =
            Notification::new(NotificationKind::QuoteExpired, request.request_id.clone(), now)
                .for_quote(quote.quote_id.clone())
                .to(request.customer_id.0.clone())
                .to(quote.operator_id.0.clone())
                .with("expiredAt", quote.expires_at.to_rfc3339());

        Ok(Plan {
            changes,
            value: QuoteOutcome { request: next, quote: expired },
            notifications: vec![notification],
        })
    }

    async fn plan_unmatched(
        &self,
        request_id: &RequestId,
        now: DateTime<Utc>,
    ) -> Result<Plan<ServiceRequest>, LifecycleError> {
        let request = self.load_request(request_id).await?;
        if request.status != RequestStatus::Pending {
            return Err(LifecycleError::invalid_state(
                request.status,
                "only a pending request can be marked unmatched",
            ));
        }
        if request.quote_count > 0 {
            return Err(LifecycleError::invalid_state(
                request.status,
                "request has already received quotes",
            ));
        }
        let window_closes_at = request.created_at + self.policy.matching_window();
        if now < window_closes_at {
            return Err(LifecycleError::Validation(format!(
                "matching window for request {} is open until {}",
                request.request_id,
                window_closes_at.to_rfc3339()
            )));
        }

        let mut next = next_revision(&request, now);
        next.transition_to(RequestStatus::Unmatched)?;
        let notification =
            Notification::new(NotificationKind::RequestUnmatched, request.request_id.clone(), now)
                .to(request.customer_id.0.clone())
                .with("matchingWindowMinutes", self.policy.matching_window_minutes);

        Ok(Plan {
            changes: request_update(&request, next.clone(), "request.unmatched", now),
            value: next,
            notifications: vec![notification],
        })
    }

    async fn plan_expire_request(
        &self,
        request_id: &RequestId,
        now: DateTime<Utc>,
    ) -> Result<Plan<ServiceRequest>, LifecycleError> {
        let request = self.load_request(request_id).await?;
        if !request.status.is_open_for_quotes() {
            return Err(LifecycleError::invalid_state(
                request.status,
                "only a request still looking for an operator can expire",
            ));
        }
        let expires_at = request.created_at + self.policy.request_ttl();
        if now < expires_at {
            return Err(LifecycleError::Validation(format!(
                "request {} does not expire until {}",
                request.request_id,
                expires_at.to_rfc3339()
            )));
        }

        let quotes = self.store.list_quotes_for_request(request_id).await?;
        let open: Vec<&Quote> = quotes.iter().filter(|quote| quote.status.is_open()).collect();

        let mut next = next_revision(&request, now);
        next.transition_to(RequestStatus::Expired)?;

        let mut changes = request_update(&request, next.clone(), "request.expired", now);
        for quote in &open {
            let mut expired = (*quote).clone();
            expired.transition_to(QuoteStatus::Expired, now)?;
            changes = changes.write_quote(expired, quote.status);
        }
        let changes = self.decline_open_counters(changes, &open, now).await?;

        let notification =
            Notification::new(NotificationKind::RequestExpired, request.request_id.clone(), now)
                .to(request.customer_id.0.clone())
                .to_all(interested_operators(&request, &open))
                .with("requestTtlHours", self.policy.request_ttl_hours);

        Ok(Plan { changes, value: next, notifications: vec![notification] })
    }
}

fn ensure_unexpired(quote: &Quote, now: DateTime<Utc>) -> Result<(), LifecycleError> {
    let expired = match quote.status {
        QuoteStatus::Expired => true,
        QuoteStatus::Sent => quote.is_past_expiry(now),
        _ => false,
    };
    if expired {
        return Err(LifecycleError::Expired {
            quote_id: quote.quote_id.clone(),
            expired_at: quote.expires_at,
        });
    }
    Ok(())
}

/// Operators with a stake in the request: the assigned one plus anyone
/// holding an open quote.
fn interested_operators(request: &ServiceRequest, open_quotes: &[&Quote]) -> Vec<String> {
    request
        .operator
        .iter()
        .map(|operator| operator.operator_id.0.clone())
        .chain(open_quotes.iter().map(|quote| quote.operator_id.0.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{ensure_unexpired, interested_operators};
    use crate::domain::quote::{
        OperatorId, OperatorRef, Quote, QuoteId, QuoteStatus, QuoteSubmission,
    };
    use crate::domain::request::{
        AssignedOperator, CustomerId, Location, RequestDetails, RequestId, ServiceRequest,
    };
    use crate::errors::LifecycleError;

    fn quote(now: chrono::DateTime<Utc>) -> Quote {
        Quote::issue(
            QuoteSubmission {
                request_id: RequestId("R-1".to_string()),
                operator: OperatorRef {
                    operator_id: OperatorId("OP-1".to_string()),
                    operator_name: "Ridge Recovery".to_string(),
                },
                amount: Decimal::new(15000, 2),
                breakdown: Vec::new(),
                message: None,
            },
            now,
            Duration::minutes(60),
        )
        .expect("valid quote")
    }

    #[test]
    fn sent_quote_past_expiry_reports_expired() {
        let now = Utc.with_ymd_and_hms(2026, 1, 10, 8, 0, 0).unwrap();
        let quote = quote(now);

        assert!(ensure_unexpired(&quote, now + Duration::minutes(60)).is_ok());
        let error = ensure_unexpired(&quote, now + Duration::minutes(61)).expect_err("expired");
        assert!(matches!(error, LifecycleError::Expired { .. }));
    }

    #[test]
    fn swept_quote_reports_expired_regardless_of_clock() {
        let now = Utc::now();
        let mut quote = quote(now);
        quote.status = QuoteStatus::Expired;
        assert!(matches!(ensure_unexpired(&quote, now), Err(LifecycleError::Expired { .. })));
    }

    #[test]
    fn interested_operators_include_assignee_and_open_quotes() {
        let now = Utc::now();
        let mut request = ServiceRequest::new(
            CustomerId("C-1".to_string()),
            RequestDetails {
                service_type: "tow".to_string(),
                description: "Flat tire".to_string(),
                location: Location { address: "Hwy 7".to_string(), latitude: None, longitude: None },
                is_emergency: true,
                budget_range: None,
                preferred_date: None,
                preferred_time: None,
            },
            now,
        )
        .expect("valid request");
        request.operator = Some(AssignedOperator {
            operator_id: OperatorId("OP-9".to_string()),
            operator_name: "Nine".to_string(),
            accepted_quote_id: QuoteId("Q-9".to_string()),
        });
        let open = quote(now);

        assert_eq!(
            interested_operators(&request, &[&open]),
            vec!["OP-9".to_string(), "OP-1".to_string()]
        );
    }
}
