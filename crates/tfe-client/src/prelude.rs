//! Common imports for typical client usage.
pub use crate::{
    Client, ClientConfig, ClientError, Event, EventStreamError, EventType, JobKind, JobStatus,
    LogPollPolicy, LogReadError, LogReader, Subscription, SubscriptionState,
};
pub use tokio_util::sync::CancellationToken;
