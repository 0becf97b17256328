//! # Thing Model Device Client
//!
//! `myrtio-linkkit` is a `no_std` device-side client for a Thing Model IoT
//! platform, built upon the [Embassy](https://embassy.dev/) async ecosystem.
//! A device reports properties and events, answers service calls and RRPC
//! requests, and tracks a cloud shadow over one MQTT session.
//!
//! ## Core Features
//!
//! - **Transport Agnostic:** the MQTT primitive is the [`MqttLink`] trait;
//!   wire encoding, sockets and TLS live behind it.
//! - **Thing Model:** a TSL document declares events and services; topics are
//!   derived from it and outbound calls are checked against it.
//! - **Correlation:** request ids, per-category in-flight tables, a bounded
//!   RRPC ring and user subscription bookkeeping, all cleared on disconnect
//!   and garbage-collected on a timeout.
//! - **Ordered Callbacks:** one dispatch worker delivers every event to a
//!   [`ThingHandler`] in arrival order.
//! - **Resilient Sessions:** exponential reconnect backoff with jitter, plus
//!   optional dynamic registration when the device secret is unknown.
//!
//! ## Usage
//!
//! ```ignore
//! let config = ConnectionConfig::new(DeviceIdentity::new("cn-shanghai", "pk", "dn", "secret"));
//! let client = ThingClient::new(config, link)?;
//! client.thing_setup(Some(TSL.as_bytes()))?;
//! client.connect_async()?;
//! join(client.run_session(), client.run_dispatcher(&mut handler)).await;
//! ```

#![no_std]

extern crate alloc;

pub mod alink;
pub mod auth;
pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod inflight;
pub mod request_id;
pub mod rrpc;
pub mod runtime;
pub mod shadow;
pub mod state;
pub mod thing_model;
pub mod topics;
pub mod transport;

// Re-export key types for easier access at the crate root.
pub use alink::Ack;
pub use auth::{NoRegistrar, Registrar};
pub use client::{AlgorithmInventory, ThingClient};
pub use config::{ConnectionConfig, DeviceIdentity, MqttOptions};
pub use error::{ConnectResult, Error, Rejection, ValidationError};
pub use runtime::{CallbackError, CallbackResult, DisconnectReason, NoopHandler, ThingHandler};
pub use state::SessionState;
pub use transport::{MqttLink, QoS};
