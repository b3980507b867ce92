//! Streaming primitives for the Terraform Enterprise / HCP Terraform API.
//!
//! Two components sit on top of the shared [`Client`] transport:
//!
//! - [`Events::subscribe`](events::Events::subscribe) opens a WebSocket to the
//!   event service and delivers typed [`Event`]s, in order, through a
//!   [`Subscription`].
//! - [`LogReader`] tails the log of a plan or apply by polling its log
//!   location until the job reaches a terminal status.
//!
//! # Following a plan log
//!
//! ```no_run
//! use tfe_client::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::from_env()?;
//! let mut reader = client
//!     .plans()
//!     .logs("plan-V4fvpvCzGQrsZikD", CancellationToken::new())
//!     .await?;
//!
//! while let Some(chunk) = reader.read_chunk().await? {
//!     print!("{}", String::from_utf8_lossy(&chunk));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Watching events
//!
//! ```no_run
//! use tfe_client::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::from_env()?;
//! let mut sub = client.events().subscribe("my-subscriber").await?;
//! while let Some(event) = sub.recv().await {
//!     if let Some(failure) = event.failure() {
//!         eprintln!("stream ended: {failure}");
//!         break;
//!     }
//!     println!("{}: {}", event.kind, event.payload);
//! }
//! sub.close().await?;
//! # Ok(())
//! # }
//! ```

/// Base HTTP transport shared by all components.
pub mod client;
/// Client configuration and environment loading.
pub mod config;
/// Public error types.
pub mod errors;
/// Event subscriptions.
pub mod events;
/// Plan/apply reads backing the log reader.
pub mod jobs;
/// Log tailing.
pub mod logs;
/// Backoff curves and log polling settings.
pub mod policy;
/// Common imports for typical usage.
pub mod prelude;

pub use client::Client;
pub use config::ClientConfig;
pub use errors::{
    ClientError, EventStreamError, LogReadError, StreamFailure, StreamFailureKind,
};
pub use events::{Event, EventType, Events, Subscription, SubscriptionState};
pub use jobs::{Job, JobKind, JobProbe, JobStatus, Jobs};
pub use logs::{CompletionProbe, HttpLogSource, LogReader, LogSource};
pub use policy::{Backoff, LogPollPolicy};
