//! Dispatch Runtime
//!
//! Serializes everything the link produces into one ordered callback stream.
//!
//! # Overview
//!
//! The session loop never calls application code. It performs the minimal
//! bookkeeping for each network event (state transitions, clearing
//! correlation state) and posts a normalized [`SessionEvent`] onto the
//! [`DispatchQueue`]. A single worker, `ThingClient::run_dispatcher`, pops
//! events in arrival order, finishes the registry cleanup and invokes the
//! matching [`ThingHandler`] callback.
//!
//! # Backpressure
//!
//! The queue holds [`DISPATCH_QUEUE_DEPTH`] events. A producer waits at most
//! [`DISPATCH_POST_TIMEOUT`] for room and then drops the event with an error
//! log, so a stuck callback cannot stall the link indefinitely.
//!
//! # Session epochs
//!
//! Every event is stamped with the [`SessionEpoch`] it was produced in. The
//! epoch advances whenever the correlation registries are cleared, and the
//! worker drops session-scoped events that still carry an older epoch.

pub(crate) mod events;
pub(crate) mod handler;
pub(crate) mod queue;

pub use events::{DisconnectReason, SessionEpoch, SessionEvent};
pub use handler::{CallbackError, CallbackResult, NoopHandler, ThingHandler};
pub use queue::{DISPATCH_POST_TIMEOUT, DISPATCH_QUEUE_DEPTH, DispatchQueue};
