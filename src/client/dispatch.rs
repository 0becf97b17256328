//! Dispatch worker: registry cleanup and callback delivery.
//!
//! Everything here runs on the single worker task, so callbacks observe
//! events in exactly the order the session loop posted them.

use alloc::string::String;
use core::sync::atomic::Ordering;

use embassy_time::Instant;
use serde_json::Value;

use super::ThingClient;
use crate::alink::{Ack, Downlink, Reply};
use crate::auth::Registrar;
use crate::error::{Error, ValidationError};
use crate::inflight::InFlightCategory;
use crate::rrpc::{RrpcEntry, RrpcKey};
use crate::runtime::{CallbackResult, SessionEvent, ThingHandler};
use crate::state::SessionState;
use crate::topics::{Route, SubscriptionKind, Topic, rrpc_reply_topic};
use crate::transport::{InboundMessage, MqttLink, QoS};

impl<L: MqttLink, R: Registrar> ThingClient<L, R> {
    /// Runs the dispatch worker with `handler` until the client is destructed.
    ///
    /// Only one worker may run per client.
    pub async fn run_dispatcher<H: ThingHandler + ?Sized>(&self, handler: &mut H) -> Result<(), Error> {
        self.state.require(&[
            SessionState::Initialized,
            SessionState::Connecting,
            SessionState::Connected,
            SessionState::Disconnecting,
            SessionState::Disconnected,
        ])?;
        if self.control.worker_started.swap(true, Ordering::AcqRel) {
            return Err(ValidationError::HandlerAlreadyRegistered.into());
        }
        log::debug!("dispatch worker started");
        // Whether `on_thing_enable` was delivered without a matching disable yet.
        let mut thing_enabled = false;
        loop {
            match self.queue.next().await {
                (_, SessionEvent::Exit) => break,
                (epoch, event) if event.is_session_scoped() && epoch != self.epoch() => {
                    log::debug!("dropping {:?} from a closed session", event);
                }
                (_, event) => self.deliver(handler, event, &mut thing_enabled),
            }
        }
        log::debug!("dispatch worker exited");
        self.control.worker_exited.signal(());
        Ok(())
    }

    fn deliver<H: ThingHandler + ?Sized>(&self, handler: &mut H, event: SessionEvent, thing_enabled: &mut bool) {
        let outcome = match event {
            SessionEvent::Connect {
                session_present,
                result,
            } => handler.on_connect(session_present, result),
            SessionEvent::Disconnect(reason) => {
                if core::mem::take(thing_enabled) {
                    report("on_thing_disable", handler.on_thing_disable());
                }
                handler.on_disconnect(reason)
            }
            SessionEvent::Registered(result) => handler.on_device_registered(&result),
            SessionEvent::Published(mid) => match self.inflight.acknowledge_publish(mid) {
                Some(category) => {
                    log::trace!("{:?} mid {} acked", category, mid);
                    Ok(())
                }
                None => handler.on_publish(mid),
            },
            SessionEvent::Subscribed { mid, granted } => {
                if self.inflight.acknowledge(InFlightCategory::SubscribeSys, mid) {
                    log::info!("system topics subscribed, thing enabled");
                    self.enabled.store(true, Ordering::Release);
                    *thing_enabled = true;
                    handler.on_thing_enable()
                } else {
                    self.subscriptions
                        .lock(|book| book.borrow_mut().complete_subscribe(mid, &granted));
                    handler.on_subscribe(mid, &granted)
                }
            }
            SessionEvent::Unsubscribed(mid) => {
                self.subscriptions
                    .lock(|book| book.borrow_mut().complete_unsubscribe(mid));
                handler.on_unsubscribe(mid)
            }
            SessionEvent::Message(message) => self.route_message(handler, &message),
            SessionEvent::Exit => Ok(()),
        };
        report("callback", outcome);
    }

    fn route_message<H: ThingHandler + ?Sized>(&self, handler: &mut H, message: &InboundMessage) -> CallbackResult {
        let route = self.with_thing(|thing| thing.topics.route(&message.topic));
        log::debug!("inbound {} -> {:?}", message.topic, route);
        match route {
            Route::PropertySet => {
                let Some(request) = parse::<Downlink>(message) else {
                    return Ok(());
                };
                self.reply_property_set(&request.id);
                handler.on_property_changed(&request.params)
            }
            Route::PropertyGet => {
                log::debug!("property get is answered by the cloud, ignoring");
                Ok(())
            }
            Route::PropertyPostReply => match self.parse_ack(message) {
                Some(ack) => handler.on_property_post_ack(&ack),
                None => Ok(()),
            },
            Route::EventPostReply(event) => match self.parse_ack(message) {
                Some(ack) => handler.on_event_post_ack(&event, &ack),
                None => Ok(()),
            },
            Route::DeviceInfoUpdateReply => match self.parse_ack(message) {
                Some(ack) => handler.on_device_info_update_ack(&ack),
                None => Ok(()),
            },
            Route::DeviceInfoDeleteReply => match self.parse_ack(message) {
                Some(ack) => handler.on_device_info_delete_ack(&ack),
                None => Ok(()),
            },
            Route::Service(identifier) => match parse::<Downlink>(message) {
                Some(request) => handler.on_service_call(&identifier, &request.id, &request.params),
                None => Ok(()),
            },
            Route::RawDown => handler.on_raw_data_arrived(&message.payload),
            Route::RawUpReply => handler.on_raw_data_post_ack(&message.payload),
            Route::ShadowGet => {
                self.shadow.ingest(&message.payload, Instant::now());
                match parse::<Value>(message) {
                    Some(document) => handler.on_shadow_get(&document),
                    None => Ok(()),
                }
            }
            Route::Rrpc { rrpc_id, original } => self.route_rrpc(handler, message, &rrpc_id, &original),
            Route::Unmatched => {
                let subscribed = self
                    .subscriptions
                    .lock(|book| book.borrow().is_subscribed(SubscriptionKind::User, &message.topic));
                if subscribed {
                    handler.on_topic_message(&message.topic, &message.payload, message.qos)
                } else {
                    log::warn!("message on unsubscribed topic {} dropped", message.topic);
                    Ok(())
                }
            }
        }
    }

    /// RRPC requests either wrap a service call or a subscribed user topic.
    fn route_rrpc<H: ThingHandler + ?Sized>(
        &self,
        handler: &mut H,
        message: &InboundMessage,
        rrpc_id: &str,
        original: &str,
    ) -> CallbackResult {
        let Ok(reply_topic) = rrpc_reply_topic(rrpc_id, original) else {
            log::warn!("rrpc topic {} too long, dropped", message.topic);
            return Ok(());
        };
        let service = self.with_thing(|thing| thing.topics.service_for(original).map(String::from));
        if let Some(identifier) = service {
            let Some(request) = parse::<Downlink>(message) else {
                return Ok(());
            };
            self.remember_rrpc(RrpcKey::Service(request.id.clone()), reply_topic, message);
            return handler.on_service_call(&identifier, &request.id, &request.params);
        }

        let subscribed = self
            .subscriptions
            .lock(|book| book.borrow().is_subscribed(SubscriptionKind::Rrpc, original));
        if !subscribed {
            log::warn!("{} is not an rrpc-subscribed topic, dropped", original);
            return Ok(());
        }
        self.remember_rrpc(RrpcKey::Message(rrpc_id.into()), reply_topic, message);
        handler.on_rrpc_message(rrpc_id, &message.topic, &message.payload, message.qos)
    }

    fn remember_rrpc(&self, key: RrpcKey, reply_topic: Topic, message: &InboundMessage) {
        let entry = RrpcEntry {
            key,
            reply_topic,
            payload: message.payload.clone(),
            qos: message.qos,
            received_at: Instant::now(),
        };
        if let Some(evicted) = self.rrpc.lock(|rrpc| rrpc.borrow_mut().push(entry)) {
            log::warn!(
                "rrpc store full, dropped {:?} ({} bytes, qos {:?}, unanswered for {} ms)",
                evicted.key,
                evicted.payload.len(),
                evicted.qos,
                evicted.received_at.elapsed().as_millis()
            );
        }
    }

    /// Acknowledges a property set with `{id, code: 200, data: {}}` before the callback runs.
    fn reply_property_set(&self, request_id: &str) {
        let topic = self.with_thing(|thing| thing.topics.property_set_reply.clone());
        let data = Value::Object(serde_json::Map::new());
        let reply = Reply {
            id: request_id,
            code: 200,
            data: &data,
        };
        if let Err(err) = self.publish_json(InFlightCategory::PropertySetReply, &topic, &reply, QoS::AtLeastOnce) {
            log::warn!("property set reply failed: {}", err);
        }
    }

    /// Parses a reply and releases its request id.
    fn parse_ack(&self, message: &InboundMessage) -> Option<Ack> {
        let ack = parse::<Ack>(message)?;
        let released = self
            .request_ids
            .lock(|ids| ids.borrow_mut().release_str(&ack.request_id));
        if !released {
            log::debug!("reply for unknown request id {:?}", ack.request_id);
        }
        Some(ack)
    }
}

fn parse<T: serde::de::DeserializeOwned>(message: &InboundMessage) -> Option<T> {
    match serde_json::from_slice(&message.payload) {
        Ok(value) => Some(value),
        Err(err) => {
            log::warn!("malformed payload on {}: {}", message.topic, err);
            None
        }
    }
}

fn report(callback: &str, outcome: CallbackResult) {
    if let Err(err) = outcome {
        log::error!("{} failed: {}", callback, err);
    }
}
