//! Free-window and fee rules.
//!
//! Everything here is a pure function of a request, an injected `now` and a
//! [`LifecyclePolicy`]. The lifecycle engine calls these before it commits a
//! cancellation or an edit; the REST layer calls [`LifecyclePolicy::preview`]
//! to show the customer what an action would cost.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::request::{RequestStatus, ServiceRequest};

/// One row of the cancellation fee table.
///
/// `up_to_minutes` counts minutes elapsed *after* the free window closed; the
/// last tier leaves it unset to cover everything beyond.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationTier {
    pub up_to_minutes: Option<u32>,
    pub unassigned_cents: i64,
    pub assigned_cents: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecyclePolicy {
    pub free_window_minutes: u32,
    pub quote_ttl_minutes: u32,
    pub matching_window_minutes: u32,
    pub request_ttl_hours: u32,
    pub edit_fee_base_cents: i64,
    pub cancellation_tiers: Vec<CancellationTier>,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            free_window_minutes: 10,
            quote_ttl_minutes: 60,
            matching_window_minutes: 30,
            request_ttl_hours: 72,
            edit_fee_base_cents: 250,
            cancellation_tiers: vec![
                CancellationTier {
                    up_to_minutes: Some(60),
                    unassigned_cents: 500,
                    assigned_cents: 1_500,
                },
                CancellationTier {
                    up_to_minutes: Some(240),
                    unassigned_cents: 1_000,
                    assigned_cents: 2_500,
                },
                CancellationTier { up_to_minutes: None, unassigned_cents: 1_500, assigned_cents: 3_500 },
            ],
        }
    }
}

/// What cancelling or editing a request would cost right now.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeePreview {
    pub in_free_window: bool,
    pub free_window_remaining_minutes: i64,
    pub can_cancel: bool,
    pub can_edit: bool,
    pub cancellation_fee_cents: Option<i64>,
    pub edit_fee_cents: Option<i64>,
}

pub fn is_free_window(
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    free_window_minutes: u32,
) -> bool {
    now - created_at < Duration::minutes(i64::from(free_window_minutes))
}

/// Whole minutes left in the free window, rounded up, never negative.
pub fn free_window_remaining(
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    free_window_minutes: u32,
) -> i64 {
    let closes_at = created_at + Duration::minutes(i64::from(free_window_minutes));
    let remaining = closes_at - now;
    if remaining <= Duration::zero() {
        return 0;
    }
    (remaining.num_seconds() + 59) / 60
}

pub fn can_cancel(request: &ServiceRequest) -> bool {
    !request.status.is_terminal()
}

pub fn can_edit(request: &ServiceRequest) -> bool {
    !request.status.is_terminal() && request.status != RequestStatus::InProgress
}

impl LifecyclePolicy {
    pub fn quote_ttl(&self) -> Duration {
        Duration::minutes(i64::from(self.quote_ttl_minutes))
    }

    pub fn matching_window(&self) -> Duration {
        Duration::minutes(i64::from(self.matching_window_minutes))
    }

    pub fn request_ttl(&self) -> Duration {
        Duration::hours(i64::from(self.request_ttl_hours))
    }

    pub fn is_free_window(&self, request: &ServiceRequest, now: DateTime<Utc>) -> bool {
        is_free_window(request.created_at, now, self.free_window_minutes)
    }

    pub fn cancellation_fee(&self, request: &ServiceRequest, now: DateTime<Utc>) -> i64 {
        if self.is_free_window(request, now) {
            return 0;
        }

        let window_closed_at =
            request.created_at + Duration::minutes(i64::from(self.free_window_minutes));
        let minutes_past_window = (now - window_closed_at).num_minutes().max(0);
        let assigned = request.status.has_assigned_operator();

        self.cancellation_tiers
            .iter()
            .find(|tier| {
                tier.up_to_minutes.map_or(true, |limit| minutes_past_window <= i64::from(limit))
            })
            .or_else(|| self.cancellation_tiers.last())
            .map(|tier| if assigned { tier.assigned_cents } else { tier.unassigned_cents })
            .unwrap_or(0)
    }

    /// Fee for the *next* edit. The first edit and any edit inside the free
    /// window are free; later ones escalate linearly with `edit_count`.
    pub fn edit_fee(&self, request: &ServiceRequest, now: DateTime<Utc>) -> i64 {
        if self.is_free_window(request, now) || request.edit_count == 0 {
            return 0;
        }
        self.edit_fee_base_cents.saturating_mul(i64::from(request.edit_count))
    }

    pub fn preview(&self, request: &ServiceRequest, now: DateTime<Utc>) -> FeePreview {
        let can_cancel = can_cancel(request);
        let can_edit = can_edit(request);
        FeePreview {
            in_free_window: self.is_free_window(request, now),
            free_window_remaining_minutes: free_window_remaining(
                request.created_at,
                now,
                self.free_window_minutes,
            ),
            can_cancel,
            can_edit,
            cancellation_fee_cents: can_cancel.then(|| self.cancellation_fee(request, now)),
            edit_fee_cents: can_edit.then(|| self.edit_fee(request, now)),
        }
    }

    /// Checks the fee table is ordered so fees never drop as time passes.
    pub fn validate_tiers(&self) -> Result<(), String> {
        if self.cancellation_tiers.is_empty() {
            return Err("policy.cancellation_tiers must contain at least one tier".to_string());
        }

        let mut previous: Option<&CancellationTier> = None;
        for (index, tier) in self.cancellation_tiers.iter().enumerate() {
            if tier.unassigned_cents < 0 || tier.assigned_cents < 0 {
                return Err(format!("policy.cancellation_tiers[{index}] has a negative fee"));
            }
            if tier.assigned_cents < tier.unassigned_cents {
                return Err(format!(
                    "policy.cancellation_tiers[{index}] charges less for assigned jobs than unassigned ones"
                ));
            }
            if tier.up_to_minutes.is_none() && index + 1 != self.cancellation_tiers.len() {
                return Err(format!(
                    "policy.cancellation_tiers[{index}] is open-ended but is not the last tier"
                ));
            }
            if let Some(previous) = previous {
                let ordered = match (previous.up_to_minutes, tier.up_to_minutes) {
                    (Some(before), Some(after)) => after > before,
                    (Some(_), None) => true,
                    (None, _) => false,
                };
                if !ordered {
                    return Err(format!(
                        "policy.cancellation_tiers[{index}] must cover a later range than the tier before it"
                    ));
                }
                if tier.unassigned_cents < previous.unassigned_cents
                    || tier.assigned_cents < previous.assigned_cents
                {
                    return Err(format!(
                        "policy.cancellation_tiers[{index}] must not charge less than the tier before it"
                    ));
                }
            }
            previous = Some(tier);
        }

        Ok(())
    }
}
