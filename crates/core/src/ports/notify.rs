use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::quote::QuoteId;
use crate::domain::request::RequestId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    #[serde(rename = "request.created")]
    RequestCreated,
    #[serde(rename = "request.edited")]
    RequestEdited,
    #[serde(rename = "request.cancelled")]
    RequestCancelled,
    #[serde(rename = "request.unmatched")]
    RequestUnmatched,
    #[serde(rename = "request.expired")]
    RequestExpired,
    #[serde(rename = "quote.received")]
    QuoteReceived,
    #[serde(rename = "quote.accepted")]
    QuoteAccepted,
    #[serde(rename = "quote.declined")]
    QuoteDeclined,
    #[serde(rename = "quote.countered")]
    QuoteCountered,
    #[serde(rename = "quote.counter_declined")]
    CounterDeclined,
    #[serde(rename = "quote.withdrawn")]
    QuoteWithdrawn,
    #[serde(rename = "quote.expired")]
    QuoteExpired,
    #[serde(rename = "job.started")]
    JobStarted,
    #[serde(rename = "job.completed")]
    JobCompleted,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 14] = [
        Self::RequestCreated,
        Self::RequestEdited,
        Self::RequestCancelled,
        Self::RequestUnmatched,
        Self::RequestExpired,
        Self::QuoteReceived,
        Self::QuoteAccepted,
        Self::QuoteDeclined,
        Self::QuoteCountered,
        Self::CounterDeclined,
        Self::QuoteWithdrawn,
        Self::QuoteExpired,
        Self::JobStarted,
        Self::JobCompleted,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestCreated => "request.created",
            Self::RequestEdited => "request.edited",
            Self::RequestCancelled => "request.cancelled",
            Self::RequestUnmatched => "request.unmatched",
            Self::RequestExpired => "request.expired",
            Self::QuoteReceived => "quote.received",
            Self::QuoteAccepted => "quote.accepted",
            Self::QuoteDeclined => "quote.declined",
            Self::QuoteCountered => "quote.countered",
            Self::CounterDeclined => "quote.counter_declined",
            Self::QuoteWithdrawn => "quote.withdrawn",
            Self::QuoteExpired => "quote.expired",
            Self::JobStarted => "job.started",
            Self::JobCompleted => "job.completed",
        }
    }
}

/// A state change announced to customers and operators. Delivery is someone
/// else's job; the engine only hands these over.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub notification_id: String,
    pub kind: NotificationKind,
    pub request_id: RequestId,
    pub quote_id: Option<QuoteId>,
    pub recipients: Vec<String>,
    pub payload: BTreeMap<String, serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: NotificationKind, request_id: RequestId, occurred_at: DateTime<Utc>) -> Self {
        Self {
            notification_id: Uuid::new_v4().to_string(),
            kind,
            request_id,
            quote_id: None,
            recipients: Vec::new(),
            payload: BTreeMap::new(),
            occurred_at,
        }
    }

    pub fn for_quote(mut self, quote_id: QuoteId) -> Self {
        self.quote_id = Some(quote_id);
        self
    }

    pub fn to(mut self, recipient: impl Into<String>) -> Self {
        self.recipients.push(recipient.into());
        self
    }

    pub fn to_all<I, S>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for recipient in recipients {
            let recipient = recipient.into();
            if !self.recipients.contains(&recipient) {
                self.recipients.push(recipient);
            }
        }
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NotificationError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait NotificationPort: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError>;
}

/// Writes every notification to the log and nowhere else.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationPort for TracingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError> {
        tracing::info!(
            event_name = "notification.emitted",
            notification_kind = notification.kind.as_str(),
            request_id = %notification.request_id,
            quote_id = notification.quote_id.as_ref().map(|id| id.0.as_str()).unwrap_or("none"),
            recipients = notification.recipients.len(),
            "notification emitted"
        );
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    failing: Arc<Mutex<bool>>,
}

impl InMemoryNotifier {
    pub fn notifications(&self) -> Vec<Notification> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn of_kind(&self, kind: NotificationKind) -> Vec<Notification> {
        self.notifications().into_iter().filter(|n| n.kind == kind).collect()
    }

    /// Makes every later `notify` call fail, to exercise the swallow path.
    pub fn fail_deliveries(&self, failing: bool) {
        match self.failing.lock() {
            Ok(mut flag) => *flag = failing,
            Err(poisoned) => *poisoned.into_inner() = failing,
        }
    }

    fn is_failing(&self) -> bool {
        match self.failing.lock() {
            Ok(flag) => *flag,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl NotificationPort for InMemoryNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError> {
        if self.is_failing() {
            return Err(NotificationError::Delivery("in-memory notifier set to fail".to_string()));
        }
        match self.sent.lock() {
            Ok(mut sent) => sent.push(notification),
            Err(poisoned) => poisoned.into_inner().push(notification),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{InMemoryNotifier, Notification, NotificationKind, NotificationPort};
    use crate::domain::quote::QuoteId;
    use crate::domain::request::RequestId;

    #[tokio::test]
    async fn in_memory_notifier_records_payload_and_recipients() {
        let notifier = InMemoryNotifier::default();
        notifier
            .notify(
                Notification::new(
                    NotificationKind::RequestCancelled,
                    RequestId("R-1".to_owned()),
                    Utc::now(),
                )
                .for_quote(QuoteId("Q-1".to_owned()))
                .to("C-1")
                .with("feeCents", 500),
            )
            .await
            .expect("notify");

        let sent = notifier.of_kind(NotificationKind::RequestCancelled);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients, vec!["C-1".to_owned()]);
        assert_eq!(sent[0].payload.get("feeCents"), Some(&serde_json::json!(500)));
    }

    #[tokio::test]
    async fn failing_notifier_reports_delivery_error() {
        let notifier = InMemoryNotifier::default();
        notifier.fail_deliveries(true);

        let result = notifier
            .notify(Notification::new(
                NotificationKind::QuoteExpired,
                RequestId("R-1".to_owned()),
                Utc::now(),
            ))
            .await;

        assert!(result.is_err());
        assert!(notifier.notifications().is_empty());
    }

    #[test]
    fn kind_serializes_as_dotted_event_type() {
        let value = serde_json::to_value(NotificationKind::QuoteAccepted).expect("serialize");
        assert_eq!(value, serde_json::json!("quote.accepted"));
        assert_eq!(NotificationKind::QuoteAccepted.as_str(), "quote.accepted");
        for kind in NotificationKind::ALL {
            assert_eq!(NotificationKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(NotificationKind::parse("quote.teleported"), None);
    }
}
