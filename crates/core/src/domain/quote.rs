use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::request::RequestId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuoteId(pub String);

impl QuoteId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for QuoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperatorId(pub String);

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorRef {
    pub operator_id: OperatorId,
    pub operator_name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    /// Drafted by the operator but not yet delivered to the customer.
    Pending,
    Sent,
    Accepted,
    /// Closed by the operator's answer to a counter-offer.
    Declined,
    Countered,
    Expired,
    OperatorWithdrawn,
    CustomerDeclined,
}

impl QuoteStatus {
    pub const OPEN: [QuoteStatus; 3] = [Self::Pending, Self::Sent, Self::Countered];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Countered => "countered",
            Self::Expired => "expired",
            Self::OperatorWithdrawn => "operator_withdrawn",
            Self::CustomerDeclined => "customer_declined",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "accepted" => Some(Self::Accepted),
            "declined" => Some(Self::Declined),
            "countered" => Some(Self::Countered),
            "expired" => Some(Self::Expired),
            "operator_withdrawn" => Some(Self::OperatorWithdrawn),
            "customer_declined" => Some(Self::CustomerDeclined),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        Self::OPEN.contains(self)
    }
}

impl fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakdownLine {
    pub label: String,
    pub amount: Decimal,
}

/// Operator-supplied price for a request, before the engine stamps it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteSubmission {
    pub request_id: RequestId,
    #[serde(flatten)]
    pub operator: OperatorRef,
    pub amount: Decimal,
    #[serde(default)]
    pub breakdown: Vec<BreakdownLine>,
    #[serde(default)]
    pub message: Option<String>,
}

impl QuoteSubmission {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.operator.operator_id.0.trim().is_empty() {
            return Err(DomainError::MissingField("operatorId"));
        }
        if self.operator.operator_name.trim().is_empty() {
            return Err(DomainError::MissingField("operatorName"));
        }
        ensure_positive_amount(self.amount)?;
        for line in &self.breakdown {
            if line.label.trim().is_empty() {
                return Err(DomainError::MissingField("breakdown.label"));
            }
            if line.amount.is_sign_negative() {
                return Err(DomainError::InvariantViolation(format!(
                    "breakdown line `{}` has a negative amount",
                    line.label
                )));
            }
        }
        Ok(())
    }
}

pub fn ensure_positive_amount(amount: Decimal) -> Result<(), DomainError> {
    if amount <= Decimal::ZERO {
        return Err(DomainError::InvariantViolation(format!(
            "amount must be greater than zero (got {amount})"
        )));
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub quote_id: QuoteId,
    pub request_id: RequestId,
    pub operator_id: OperatorId,
    pub operator_name: String,
    pub amount: Decimal,
    pub breakdown: Vec<BreakdownLine>,
    pub message: Option<String>,
    pub status: QuoteStatus,
    pub submitted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl Quote {
    /// Stamps a validated submission as a delivered quote expiring after `ttl`.
    pub fn issue(
        submission: QuoteSubmission,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Self, DomainError> {
        submission.validate()?;

        Ok(Self {
            quote_id: QuoteId::generate(),
            request_id: submission.request_id,
            operator_id: submission.operator.operator_id,
            operator_name: submission.operator.operator_name,
            amount: submission.amount,
            breakdown: submission.breakdown,
            message: submission.message,
            status: QuoteStatus::Sent,
            submitted_at: now,
            expires_at: now + ttl,
            responded_at: None,
        })
    }

    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn operator(&self) -> OperatorRef {
        OperatorRef {
            operator_id: self.operator_id.clone(),
            operator_name: self.operator_name.clone(),
        }
    }

    pub fn can_transition_to(&self, next: QuoteStatus) -> bool {
        use QuoteStatus::*;

        matches!(
            (self.status, next),
            (Pending, Sent)
                | (Sent, Accepted)
                | (Sent, Countered)
                | (Sent, Expired)
                | (Pending | Sent | Countered, CustomerDeclined)
                | (Pending | Sent | Countered, OperatorWithdrawn)
                | (Countered, Declined)
                | (Pending | Countered, Expired)
        )
    }

    pub fn transition_to(
        &mut self,
        next: QuoteStatus,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.can_transition_to(next) {
            return Err(DomainError::InvalidQuoteTransition { from: self.status, to: next });
        }
        self.status = next;
        self.responded_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{
        BreakdownLine, OperatorId, OperatorRef, Quote, QuoteStatus, QuoteSubmission,
    };
    use crate::domain::request::RequestId;
    use crate::errors::DomainError;

    fn submission(amount: Decimal) -> QuoteSubmission {
        QuoteSubmission {
            request_id: RequestId("R-1".to_string()),
            operator: OperatorRef {
                operator_id: OperatorId("OP-1".to_string()),
                operator_name: "Northside Towing".to_string(),
            },
            amount,
            breakdown: vec![
                BreakdownLine { label: "hook-up".to_string(), amount: Decimal::new(7500, 2) },
                BreakdownLine { label: "mileage".to_string(), amount: Decimal::new(4500, 2) },
            ],
            message: Some("Can be there in 40 minutes".to_string()),
        }
    }

    #[test]
    fn issued_quote_is_sent_and_expires_after_ttl() {
        let now = Utc.with_ymd_and_hms(2026, 1, 10, 8, 0, 0).unwrap();
        let quote = Quote::issue(submission(Decimal::new(12000, 2)), now, Duration::minutes(60))
            .expect("valid quote");

        assert_eq!(quote.status, QuoteStatus::Sent);
        assert_eq!(quote.expires_at, now + Duration::minutes(60));
        assert!(!quote.is_past_expiry(now + Duration::minutes(60)));
        assert!(quote.is_past_expiry(now + Duration::minutes(60) + Duration::seconds(1)));
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let now = Utc::now();
        for amount in [Decimal::ZERO, Decimal::new(-100, 2)] {
            let error = Quote::issue(submission(amount), now, Duration::minutes(60))
                .expect_err("non-positive amount");
            assert!(matches!(error, DomainError::InvariantViolation(_)));
        }
    }

    #[test]
    fn negative_breakdown_lines_are_rejected() {
        let mut submission = submission(Decimal::new(12000, 2));
        submission.breakdown[1].amount = Decimal::new(-1, 0);
        assert!(submission.validate().is_err());
    }

    #[test]
    fn only_sent_quotes_can_be_accepted() {
        let now = Utc::now();
        let mut quote =
            Quote::issue(submission(Decimal::new(12000, 2)), now, Duration::minutes(60))
                .expect("valid quote");
        quote.transition_to(QuoteStatus::Countered, now).expect("sent -> countered");

        let error =
            quote.transition_to(QuoteStatus::Accepted, now).expect_err("countered -> accepted");
        assert!(matches!(
            error,
            DomainError::InvalidQuoteTransition {
                from: QuoteStatus::Countered,
                to: QuoteStatus::Accepted
            }
        ));
        assert_eq!(quote.status, QuoteStatus::Countered);
    }

    #[test]
    fn open_statuses_match_uniqueness_rule() {
        assert!(QuoteStatus::Pending.is_open());
        assert!(QuoteStatus::Sent.is_open());
        assert!(QuoteStatus::Countered.is_open());
        assert!(!QuoteStatus::Expired.is_open());
        assert!(!QuoteStatus::CustomerDeclined.is_open());
    }
}
