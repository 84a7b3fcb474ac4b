use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::quote::{OperatorId, QuoteId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Quoted,
    OperatorAccepted,
    OperatorDeclined,
    Assigned,
    InProgress,
    Completed,
    Cancelled,
    Expired,
    Unmatched,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 10] = [
        Self::Pending,
        Self::Quoted,
        Self::OperatorAccepted,
        Self::OperatorDeclined,
        Self::Assigned,
        Self::InProgress,
        Self::Completed,
        Self::Cancelled,
        Self::Expired,
        Self::Unmatched,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Quoted => "quoted",
            Self::OperatorAccepted => "operator_accepted",
            Self::OperatorDeclined => "operator_declined",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::Unmatched => "unmatched",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "quoted" => Some(Self::Quoted),
            "operator_accepted" => Some(Self::OperatorAccepted),
            "operator_declined" => Some(Self::OperatorDeclined),
            "assigned" => Some(Self::Assigned),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            "unmatched" => Some(Self::Unmatched),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Expired | Self::Unmatched)
    }

    /// Statuses in which the request is still shopping for an operator.
    pub fn is_open_for_quotes(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Quoted | Self::OperatorAccepted | Self::OperatorDeclined
        )
    }

    /// An operator holds the job.
    pub fn has_assigned_operator(&self) -> bool {
        matches!(self, Self::Assigned | Self::InProgress)
    }

    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        use RequestStatus::*;

        if self.is_terminal() {
            return false;
        }

        matches!(
            (self, next),
            (Pending | Quoted | OperatorAccepted | OperatorDeclined, Quoted)
                | (Pending | Quoted | OperatorDeclined, OperatorAccepted)
                | (Quoted | OperatorAccepted, OperatorDeclined)
                | (Quoted | OperatorAccepted, Assigned)
                | (Assigned, InProgress)
                | (InProgress, Completed)
                | (_, Cancelled)
                | (Pending | Quoted | OperatorAccepted | OperatorDeclined, Expired)
                | (Pending, Unmatched)
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl Location {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.address.trim().is_empty() {
            return Err(DomainError::MissingField("location"));
        }
        if let Some(latitude) = self.latitude {
            if !(-90.0..=90.0).contains(&latitude) {
                return Err(DomainError::InvariantViolation(format!(
                    "latitude {latitude} is outside -90..=90"
                )));
            }
        }
        if let Some(longitude) = self.longitude {
            if !(-180.0..=180.0).contains(&longitude) {
                return Err(DomainError::InvariantViolation(format!(
                    "longitude {longitude} is outside -180..=180"
                )));
            }
        }
        if self.latitude.is_some() != self.longitude.is_some() {
            return Err(DomainError::InvariantViolation(
                "latitude and longitude must be supplied together".to_string(),
            ));
        }
        Ok(())
    }
}

/// Customer-editable part of a request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDetails {
    pub service_type: String,
    pub description: String,
    pub location: Location,
    #[serde(default)]
    pub is_emergency: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_time: Option<NaiveTime>,
}

impl RequestDetails {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.service_type.trim().is_empty() {
            return Err(DomainError::MissingField("serviceType"));
        }
        if self.description.trim().is_empty() {
            return Err(DomainError::MissingField("description"));
        }
        self.location.validate()
    }
}

/// A partial update to [`RequestDetails`]. Absent fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEdit {
    #[serde(default)]
    pub service_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub is_emergency: Option<bool>,
    #[serde(default)]
    pub budget_range: Option<String>,
    #[serde(default)]
    pub preferred_date: Option<NaiveDate>,
    #[serde(default)]
    pub preferred_time: Option<NaiveTime>,
}

impl RequestEdit {
    pub fn is_empty(&self) -> bool {
        self.service_type.is_none()
            && self.description.is_none()
            && self.location.is_none()
            && self.is_emergency.is_none()
            && self.budget_range.is_none()
            && self.preferred_date.is_none()
            && self.preferred_time.is_none()
    }

    /// Applies the edit to a copy of `details` and validates the result.
    pub fn apply_to(&self, details: &RequestDetails) -> Result<RequestDetails, DomainError> {
        if self.is_empty() {
            return Err(DomainError::InvariantViolation("edit contains no fields".to_string()));
        }

        let mut next = details.clone();
        if let Some(service_type) = &self.service_type {
            next.service_type = service_type.clone();
        }
        if let Some(description) = &self.description {
            next.description = description.clone();
        }
        if let Some(location) = &self.location {
            next.location = location.clone();
        }
        if let Some(is_emergency) = self.is_emergency {
            next.is_emergency = is_emergency;
        }
        if let Some(budget_range) = &self.budget_range {
            next.budget_range = Some(budget_range.clone());
        }
        if let Some(preferred_date) = self.preferred_date {
            next.preferred_date = Some(preferred_date);
        }
        if let Some(preferred_time) = self.preferred_time {
            next.preferred_time = Some(preferred_time);
        }

        next.validate()?;
        Ok(next)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedOperator {
    pub operator_id: OperatorId,
    pub operator_name: String,
    pub accepted_quote_id: QuoteId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cancellation {
    pub cancelled_at: DateTime<Utc>,
    pub cancellation_reason: String,
    pub cancellation_fee_cents: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRequest {
    pub request_id: RequestId,
    pub customer_id: CustomerId,
    #[serde(flatten)]
    pub details: RequestDetails,
    pub status: RequestStatus,
    pub edit_count: u32,
    pub edit_fees_cents: i64,
    pub quote_count: u32,
    #[serde(flatten)]
    pub operator: Option<AssignedOperator>,
    #[serde(flatten)]
    pub cancellation: Option<Cancellation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u32,
}

impl ServiceRequest {
    pub fn new(
        customer_id: CustomerId,
        details: RequestDetails,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if customer_id.0.trim().is_empty() {
            return Err(DomainError::MissingField("customerId"));
        }
        details.validate()?;

        Ok(Self {
            request_id: RequestId::generate(),
            customer_id,
            details,
            status: RequestStatus::Pending,
            edit_count: 0,
            edit_fees_cents: 0,
            quote_count: 0,
            operator: None,
            cancellation: None,
            created_at: now,
            updated_at: now,
            version: 1,
        })
    }

    pub fn transition_to(&mut self, next: RequestStatus) -> Result<(), DomainError> {
        if self.status.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidRequestTransition { from: self.status, to: next })
    }

    pub fn ensure_mutable(&self) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::TerminalRequest(self.status));
        }
        Ok(())
    }
}

/// One row of a request's status history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub request_id: RequestId,
    pub from_status: Option<RequestStatus>,
    pub to_status: RequestStatus,
    pub event: String,
    pub occurred_at: DateTime<Utc>,
}
