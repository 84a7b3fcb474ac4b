pub mod engine;
pub mod rules;

pub use engine::{
    CounterOutcome, EditOutcome, LifecycleEngine, QuoteOutcome, DEFAULT_MAX_CONFLICT_RETRIES,
};
pub use rules::status_after_quote_closed;
