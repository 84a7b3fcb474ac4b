pub mod matching;
pub mod notify;
pub mod store;

pub use matching::{MatchingError, MatchingPort, NoMatching, StaticMatching};
pub use notify::{
    InMemoryNotifier, Notification, NotificationError, NotificationKind, NotificationPort,
    TracingNotifier,
};
pub use store::{
    ChangeSet, CounterWrite, LifecycleStore, QuoteStore, QuoteWrite, RequestStore, RequestWrite,
    StoreError,
};
