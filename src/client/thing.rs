//! Outbound Thing Model operations.
//!
//! Every operation validates against the Thing Model and the lifecycle state
//! before allocating anything, so a rejected call has no network effect.

use core::sync::atomic::Ordering;

use embassy_time::Instant;
use serde::Serialize;
use serde_json::{Value, json};

use super::ThingClient;
use crate::alink::{self, Reply, Request};
use crate::auth::Registrar;
use crate::error::{Error, Rejection};
use crate::inflight::InFlightCategory;
use crate::request_id::RequestId;
use crate::rrpc::RrpcKey;
use crate::state::SessionState;
use crate::transport::{MessageId, MqttLink, QoS};

/// Source of the installed-algorithm listing reported as a property.
pub trait AlgorithmInventory {
    /// Opaque listing; the client posts it without interpreting it.
    fn installed_algorithms(&self) -> Value;
}

impl<L: MqttLink, R: Registrar> ThingClient<L, R> {
    /// Reports property values (`thing.event.property.post`, QoS 1).
    pub fn post_property(&self, params: &Value) -> Result<RequestId, Error> {
        self.require_model()?;
        self.require_enabled()?;
        let topic = self.with_thing(|thing| thing.topics.property_post.clone());
        self.publish_request(
            InFlightCategory::PropertyPost,
            &topic,
            alink::PROPERTY_POST_METHOD,
            params,
            QoS::AtLeastOnce,
        )
    }

    /// Raises a declared event with `{"value": params}`.
    pub fn trigger_event(&self, event: &str, params: &Value) -> Result<RequestId, Error> {
        self.require_model()?;
        let topic = self
            .with_thing(|thing| thing.topics.events.get(event).map(|t| t.post.clone()))
            .ok_or(Error::Rejected(Rejection::UnknownEvent))?;
        self.require_enabled()?;
        let method = alink::event_post_method(event);
        self.publish_request(
            InFlightCategory::EventPost,
            &topic,
            &method,
            &json!({ "value": params }),
            QoS::AtMostOnce,
        )
    }

    /// Answers a service call.
    ///
    /// Calls that arrived through RRPC are answered on their RRPC reply
    /// topic, others on the service's `_reply` topic.
    pub fn answer_service(
        &self,
        identifier: &str,
        request_id: &str,
        code: i32,
        data: &Value,
    ) -> Result<MessageId, Error> {
        self.require_model()?;
        let plain_reply = self
            .with_thing(|thing| thing.topics.services.get(identifier).map(|t| t.reply.clone()))
            .ok_or(Error::Rejected(Rejection::UnknownService))?;
        self.require_enabled()?;
        let key = RrpcKey::Service(request_id.into());
        let topic = self
            .rrpc
            .lock(|rrpc| rrpc.borrow_mut().take(&key))
            .map(|entry| entry.reply_topic)
            .unwrap_or(plain_reply);
        let reply = Reply {
            id: request_id,
            code,
            data,
        };
        self.publish_json(InFlightCategory::ServiceReply, &topic, &reply, QoS::AtMostOnce)
    }

    /// Sends raw bytes on the up channel; usable without a Thing Model.
    pub fn post_raw(&self, payload: &[u8]) -> Result<MessageId, Error> {
        self.state.require(&[SessionState::Connected])?;
        let topic = self.with_thing(|thing| thing.topics.raw_up.clone());
        self.publish_tracked(InFlightCategory::RawUp, &topic, payload, QoS::AtMostOnce)
    }

    /// Replies to raw data received on the down channel.
    pub fn reply_raw(&self, payload: &[u8]) -> Result<MessageId, Error> {
        self.state.require(&[SessionState::Connected])?;
        let topic = self.with_thing(|thing| thing.topics.raw_down_reply.clone());
        self.publish_tracked(InFlightCategory::RawDownReply, &topic, payload, QoS::AtMostOnce)
    }

    pub fn update_device_info(&self, params: &Value) -> Result<RequestId, Error> {
        self.require_setup()?;
        self.require_enabled()?;
        let topic = self.with_thing(|thing| thing.topics.device_info_update.clone());
        self.publish_request(
            InFlightCategory::DeviceInfoUpdate,
            &topic,
            alink::DEVICE_INFO_UPDATE_METHOD,
            params,
            QoS::AtMostOnce,
        )
    }

    pub fn delete_device_info(&self, params: &Value) -> Result<RequestId, Error> {
        self.require_setup()?;
        self.require_enabled()?;
        let topic = self.with_thing(|thing| thing.topics.device_info_delete.clone());
        self.publish_request(
            InFlightCategory::DeviceInfoDelete,
            &topic,
            alink::DEVICE_INFO_DELETE_METHOD,
            params,
            QoS::AtMostOnce,
        )
    }

    /// Sets device tags (`{attrKey, attrValue}` pairs).
    pub fn update_device_tags(&self, tags: &[(&str, &str)]) -> Result<RequestId, Error> {
        self.update_device_info(&alink::tag_entries(tags))
    }

    pub fn remove_device_tags(&self, keys: &[&str]) -> Result<RequestId, Error> {
        self.delete_device_info(&alink::tag_keys(keys))
    }

    /// Reports state to the shadow (`{state:{reported}, method:"update", version}`).
    pub fn update_shadow(&self, reported: &Value, version: u64) -> Result<MessageId, Error> {
        self.require_setup()?;
        self.require_enabled()?;
        let topic = self.with_thing(|thing| thing.topics.shadow_update.clone());
        self.publish_json(
            InFlightCategory::Shadow,
            &topic,
            &alink::shadow_update(reported, version),
            QoS::AtLeastOnce,
        )
    }

    /// Asks the cloud to push the shadow document; it arrives via `on_shadow_get`.
    pub fn get_shadow(&self) -> Result<MessageId, Error> {
        self.require_setup()?;
        self.require_enabled()?;
        let topic = self.with_thing(|thing| thing.topics.shadow_update.clone());
        self.publish_json(InFlightCategory::Shadow, &topic, &alink::shadow_get(), QoS::AtLeastOnce)
    }

    /// Forwards an opaque result event from the task pipeline.
    pub fn post_result_event(&self, event: &str, payload: &Value) -> Result<RequestId, Error> {
        self.trigger_event(event, payload)
    }

    /// Reports the installed-algorithm listing as the value of `property`.
    pub fn report_inventory(
        &self,
        property: &str,
        inventory: &dyn AlgorithmInventory,
    ) -> Result<RequestId, Error> {
        let mut params = serde_json::Map::new();
        params.insert(property.into(), inventory.installed_algorithms());
        self.post_property(&Value::Object(params))
    }

    fn require_model(&self) -> Result<(), Error> {
        if self.with_thing(|thing| thing.model.is_some()) {
            Ok(())
        } else {
            Err(Error::Rejected(Rejection::ThingNotSetup))
        }
    }

    /// `thing_setup` was called, with or without a model.
    fn require_setup(&self) -> Result<(), Error> {
        if self.with_thing(|thing| thing.setup) {
            Ok(())
        } else {
            Err(Error::Rejected(Rejection::ThingNotSetup))
        }
    }

    /// Connected, with the system subscription acknowledged.
    fn require_enabled(&self) -> Result<(), Error> {
        self.state.require(&[SessionState::Connected])?;
        if self.enabled.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::Rejected(Rejection::ThingNotEnabled))
        }
    }

    /// Publishes `{id, version, params, method}` under a fresh request id.
    ///
    /// The id is released again if the publish is refused.
    pub(crate) fn publish_request(
        &self,
        category: InFlightCategory,
        topic: &str,
        method: &str,
        params: &Value,
        qos: QoS,
    ) -> Result<RequestId, Error> {
        let now = Instant::now();
        let id = self
            .request_ids
            .lock(|ids| ids.borrow_mut().allocate(now))?;
        let published = serde_json::to_vec(&Request::new(id, method, params))
            .map_err(Error::from)
            .and_then(|body| self.link.publish(topic, &body, qos).map_err(Error::from));
        match published {
            Ok(mid) => {
                self.inflight.track(category, mid, now);
                Ok(id)
            }
            Err(err) => {
                self.request_ids.lock(|ids| ids.borrow_mut().release(id));
                Err(err)
            }
        }
    }

    pub(crate) fn publish_json<T: Serialize>(
        &self,
        category: InFlightCategory,
        topic: &str,
        body: &T,
        qos: QoS,
    ) -> Result<MessageId, Error> {
        let payload = serde_json::to_vec(body)?;
        self.publish_tracked(category, topic, &payload, qos)
    }

    pub(crate) fn publish_tracked(
        &self,
        category: InFlightCategory,
        topic: &str,
        payload: &[u8],
        qos: QoS,
    ) -> Result<MessageId, Error> {
        let mid = self.link.publish(topic, payload, qos)?;
        self.inflight.track(category, mid, Instant::now());
        Ok(mid)
    }
}
