use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::quote::{ensure_positive_amount, QuoteId};
use crate::domain::request::RequestId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CounterOfferId(pub String);

impl CounterOfferId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for CounterOfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterStatus {
    Open,
    Accepted,
    Declined,
}

impl CounterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" => Some(Self::Open),
            "accepted" => Some(Self::Accepted),
            "declined" => Some(Self::Declined),
            _ => None,
        }
    }
}

/// A customer's counter to an operator quote. The quote's own amount is never
/// rewritten; an accepted counter produces a fresh quote instead.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterOffer {
    pub counter_id: CounterOfferId,
    pub quote_id: QuoteId,
    pub request_id: RequestId,
    pub amount: Decimal,
    pub message: Option<String>,
    pub status: CounterStatus,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl CounterOffer {
    pub fn open(
        quote_id: QuoteId,
        request_id: RequestId,
        amount: Decimal,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        ensure_positive_amount(amount)?;
        Ok(Self {
            counter_id: CounterOfferId::generate(),
            quote_id,
            request_id,
            amount,
            message,
            status: CounterStatus::Open,
            created_at: now,
            responded_at: None,
        })
    }

    pub fn resolve(&mut self, next: CounterStatus, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.status != CounterStatus::Open || next == CounterStatus::Open {
            return Err(DomainError::InvariantViolation(format!(
                "counter-offer {} is already {}",
                self.counter_id,
                self.status.as_str()
            )));
        }
        self.status = next;
        self.responded_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{CounterOffer, CounterStatus};
    use crate::domain::quote::QuoteId;
    use crate::domain::request::RequestId;

    #[test]
    fn counter_resolves_once() {
        let now = Utc::now();
        let mut counter = CounterOffer::open(
            QuoteId("Q-1".to_string()),
            RequestId("R-1".to_string()),
            Decimal::new(9000, 2),
            None,
            now,
        )
        .expect("valid counter");

        counter.resolve(CounterStatus::Accepted, now).expect("open -> accepted");
        assert!(counter.resolve(CounterStatus::Declined, now).is_err());
        assert_eq!(counter.status, CounterStatus::Accepted);
    }

    #[test]
    fn zero_counter_is_rejected() {
        let result = CounterOffer::open(
            QuoteId("Q-1".to_string()),
            RequestId("R-1".to_string()),
            Decimal::ZERO,
            None,
            Utc::now(),
        );
        assert!(result.is_err());
    }
}
