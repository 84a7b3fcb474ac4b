use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::quote::{OperatorId, QuoteId, QuoteStatus};
use crate::domain::request::{RequestId, RequestStatus};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid request transition from {from} to {to}")]
    InvalidRequestTransition { from: RequestStatus, to: RequestStatus },
    #[error("invalid quote transition from {from} to {to}")]
    InvalidQuoteTransition { from: QuoteStatus, to: QuoteStatus },
    #[error("request is in terminal status {0}")]
    TerminalRequest(RequestStatus),
    #[error("required field `{0}` is missing or blank")]
    MissingField(&'static str),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Error taxonomy returned by every lifecycle transition.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{detail} (current status: {current})")]
    InvalidState { current: String, detail: String },
    #[error("quote {quote_id} expired at {expired_at}")]
    Expired { quote_id: QuoteId, expired_at: DateTime<Utc> },
    #[error("operator {operator_id} already has an open quote on request {request_id}")]
    DuplicateQuote { request_id: RequestId, operator_id: OperatorId },
    #[error("concurrent update conflict: {0}")]
    Conflict(String),
    #[error("store failure: {0}")]
    Store(String),
}

impl LifecycleError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    pub fn invalid_state(current: impl ToString, detail: impl Into<String>) -> Self {
        Self::InvalidState { current: current.to_string(), detail: detail.into() }
    }

    /// The status the caller should refresh to, when the error carries one.
    pub fn current_status(&self) -> Option<&str> {
        match self {
            Self::InvalidState { current, .. } => Some(current.as_str()),
            Self::Expired { .. } => Some(QuoteStatus::Expired.as_str()),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::InvalidState { .. } => "invalid_state",
            Self::Expired { .. } => "expired",
            Self::DuplicateQuote { .. } => "duplicate_quote",
            Self::Conflict(_) => "conflict",
            Self::Store(_) => "store",
        }
    }
}

impl From<DomainError> for LifecycleError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidRequestTransition { from, to } => Self::InvalidState {
                current: from.to_string(),
                detail: format!("request cannot move from {from} to {to}"),
            },
            DomainError::InvalidQuoteTransition { from, to } => Self::InvalidState {
                current: from.to_string(),
                detail: format!("quote cannot move from {from} to {to}"),
            },
            DomainError::TerminalRequest(status) => Self::InvalidState {
                current: status.to_string(),
                detail: "request is closed".to_string(),
            },
            DomainError::MissingField(_) | DomainError::InvariantViolation(_) => {
                Self::Validation(value.to_string())
            }
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict {
        message: String,
        current_status: Option<String>,
        retryable: bool,
        correlation_id: String,
    },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Conflict { retryable: true, .. } => {
                "This request was changed by someone else. Please retry."
            }
            Self::Conflict { retryable: false, .. } => {
                "This action is no longer available. Refresh to see the current state."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. } => correlation_id,
        }
    }
}

impl LifecycleError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<LifecycleError> for InterfaceError {
    fn from(value: LifecycleError) -> Self {
        let current_status = value.current_status().map(str::to_owned);
        let correlation_id = "unassigned".to_owned();
        match value {
            LifecycleError::Validation(message) => Self::BadRequest { message, correlation_id },
            LifecycleError::NotFound { .. } => {
                Self::NotFound { message: value.to_string(), correlation_id }
            }
            LifecycleError::InvalidState { .. }
            | LifecycleError::Expired { .. }
            | LifecycleError::DuplicateQuote { .. } => Self::Conflict {
                message: value.to_string(),
                current_status,
                retryable: false,
                correlation_id,
            },
            LifecycleError::Conflict(message) => {
                Self::Conflict { message, current_status, retryable: true, correlation_id }
            }
            LifecycleError::Store(message) => Self::ServiceUnavailable { message, correlation_id },
        }
    }
}
