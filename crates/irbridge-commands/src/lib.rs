//! Command dispatch and acknowledgment correlation.
//!
//! The [`CommandDispatcher`] persists a command as `queued`, publishes its
//! wire payload to the controller and settles it as `sent` or `failed`.
//! The [`AckCorrelator`] applies device acknowledgments to stored commands
//! and notifies realtime subscribers.

pub mod ack;
pub mod dispatcher;
pub mod payload;
pub mod publisher;

pub use ack::{AckCorrelator, AckError, AckOutcome};
pub use dispatcher::{
    CommandDispatcher, DispatchDirectories, DispatchError, DispatchRequest, DispatcherConfig,
};
pub use payload::{AckMessage, AckStatus, CommandPayload};
pub use publisher::{PublishOutcome, Publisher};
