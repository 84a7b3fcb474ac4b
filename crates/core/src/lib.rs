pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod lifecycle;
pub mod policy;
pub mod ports;
pub mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::counter::{CounterOffer, CounterOfferId, CounterStatus};
pub use domain::quote::{
    BreakdownLine, OperatorId, OperatorRef, Quote, QuoteId, QuoteStatus, QuoteSubmission,
};
pub use domain::request::{
    AssignedOperator, Cancellation, CustomerId, Location, RequestDetails, RequestEdit, RequestId,
    RequestStatus, ServiceRequest, StatusChange,
};
pub use errors::{DomainError, InterfaceError, LifecycleError};
pub use lifecycle::{CounterOutcome, EditOutcome, LifecycleEngine, QuoteOutcome};
pub use policy::{CancellationTier, FeePreview, LifecyclePolicy};
pub use sweeper::{ExpirySweeper, SweepReport};
