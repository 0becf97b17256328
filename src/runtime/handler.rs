//! Application callbacks.
//!
//! This module defines the object-safe `ThingHandler` trait through which the
//! dispatch worker delivers every session event to the application.
//!
//! # Object Safety
//!
//! `ThingHandler` is dyn-compatible, so an application can keep its handler
//! in a `StaticCell` and pass `&mut dyn ThingHandler` to the dispatch task
//! without generic task functions.
//!
//! Every method has a no-op default, so an application implements only the
//! callbacks it cares about. Methods return [`CallbackResult`]; an `Err` is
//! logged by the worker and dispatch continues with the next event.

use alloc::string::String;
use core::fmt;

use serde_json::Value;

use super::events::DisconnectReason;
use crate::alink::Ack;
use crate::error::{ConnectResult, RegistrationError};
use crate::transport::{GrantedQos, MessageId, QoS};

/// A failure reported by an application callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackError {
    pub reason: String,
}

impl CallbackError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

pub type CallbackResult = Result<(), CallbackError>;

/// Object-safe set of callbacks driven by the dispatch worker.
///
/// All callbacks run on the dispatch worker, one at a time, in the order the
/// link produced the underlying events. A callback may call back into the
/// client (publish, answer a service, subscribe) but must not await
/// `disconnect` or `destruct`, which wait on the worker itself.
///
/// # Example
///
/// ```ignore
/// struct Lamp<'a> {
///     client: &'a ThingClient<MyLink>,
/// }
///
/// impl ThingHandler for Lamp<'_> {
///     fn on_thing_enable(&mut self) -> CallbackResult {
///         self.client
///             .post_property(&json!({"LightSwitch": 1}))
///             .map(drop)
///             .map_err(|e| CallbackError::new(alloc::format!("{e}")))
///     }
///
///     fn on_service_call(&mut self, identifier: &str, request_id: &str, _params: &Value) -> CallbackResult {
///         let _ = self.client.answer_service(identifier, request_id, 200, &json!({}));
///         Ok(())
///     }
/// }
/// ```
pub trait ThingHandler {
    /// A connect attempt finished, successfully or not.
    fn on_connect(&mut self, _session_present: bool, _result: ConnectResult) -> CallbackResult {
        Ok(())
    }

    fn on_disconnect(&mut self, _reason: DisconnectReason) -> CallbackResult {
        Ok(())
    }

    /// A dynamic registration exchange finished.
    fn on_device_registered(&mut self, _result: &Result<(), RegistrationError>) -> CallbackResult {
        Ok(())
    }

    /// The system subscription was acknowledged; thing operations are usable.
    fn on_thing_enable(&mut self) -> CallbackResult {
        Ok(())
    }

    /// Delivered before `on_disconnect` when the thing was enabled.
    fn on_thing_disable(&mut self) -> CallbackResult {
        Ok(())
    }

    /// The cloud wrote properties. The `200` reply has already been sent.
    fn on_property_changed(&mut self, _params: &Value) -> CallbackResult {
        Ok(())
    }

    fn on_property_post_ack(&mut self, _ack: &Ack) -> CallbackResult {
        Ok(())
    }

    fn on_event_post_ack(&mut self, _event: &str, _ack: &Ack) -> CallbackResult {
        Ok(())
    }

    /// The cloud invoked a service; answer with `ThingClient::answer_service`.
    fn on_service_call(&mut self, _identifier: &str, _request_id: &str, _params: &Value) -> CallbackResult {
        Ok(())
    }

    fn on_raw_data_arrived(&mut self, _payload: &[u8]) -> CallbackResult {
        Ok(())
    }

    fn on_raw_data_post_ack(&mut self, _payload: &[u8]) -> CallbackResult {
        Ok(())
    }

    /// A shadow document arrived; the shadow store is already updated.
    fn on_shadow_get(&mut self, _payload: &Value) -> CallbackResult {
        Ok(())
    }

    fn on_device_info_update_ack(&mut self, _ack: &Ack) -> CallbackResult {
        Ok(())
    }

    fn on_device_info_delete_ack(&mut self, _ack: &Ack) -> CallbackResult {
        Ok(())
    }

    /// A message on a subscribed user topic.
    fn on_topic_message(&mut self, _topic: &str, _payload: &[u8], _qos: QoS) -> CallbackResult {
        Ok(())
    }

    /// An RRPC request on a subscribed logical topic; answer with `ThingClient::answer_rrpc`.
    fn on_rrpc_message(&mut self, _rrpc_id: &str, _topic: &str, _payload: &[u8], _qos: QoS) -> CallbackResult {
        Ok(())
    }

    /// A publish not tracked by any thing operation completed.
    fn on_publish(&mut self, _mid: MessageId) -> CallbackResult {
        Ok(())
    }

    fn on_subscribe(&mut self, _mid: MessageId, _granted: &[GrantedQos]) -> CallbackResult {
        Ok(())
    }

    fn on_unsubscribe(&mut self, _mid: MessageId) -> CallbackResult {
        Ok(())
    }
}

/// A handler that ignores every event.
///
/// Useful as a placeholder or for testing.
pub struct NoopHandler;

impl ThingHandler for NoopHandler {}
