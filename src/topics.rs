//! Topic derivation, inbound routing and user subscription bookkeeping.
//!
//! Every system topic is a pure function of `(product_key, device_name)`
//! plus the event and service identifiers of the Thing Model. Topics are
//! built with `write!` into fixed-capacity strings, so an identity that would
//! produce an over-long topic is rejected up front.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt::{self, Write};

use crate::error::ValidationError;
use crate::thing_model::ThingModel;
use crate::transport::{GrantedQos, MessageId, QoS};

/// Maximum length for a single topic string.
pub const MAX_TOPIC_LEN: usize = 128;

pub type Topic = heapless::String<MAX_TOPIC_LEN>;

const RRPC_PREFIX: &str = "/ext/rrpc/";

fn topic(args: fmt::Arguments<'_>) -> Result<Topic, ValidationError> {
    let mut topic = Topic::new();
    topic
        .write_fmt(args)
        .map_err(|_| ValidationError::InvalidTopic)?;
    Ok(topic)
}

/// Topic pair of one declared event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTopics {
    pub post: Topic,
    pub post_reply: Topic,
}

/// Topic pair of one declared service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTopics {
    pub request: Topic,
    pub reply: Topic,
}

/// The fixed system topic namespace of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThingTopics {
    pub property_post: Topic,
    pub property_post_reply: Topic,
    pub property_set: Topic,
    pub property_set_reply: Topic,
    pub property_get: Topic,
    pub raw_up: Topic,
    pub raw_up_reply: Topic,
    pub raw_down: Topic,
    pub raw_down_reply: Topic,
    pub device_info_update: Topic,
    pub device_info_update_reply: Topic,
    pub device_info_delete: Topic,
    pub device_info_delete_reply: Topic,
    pub shadow_get: Topic,
    pub shadow_update: Topic,
    pub events: BTreeMap<String, EventTopics>,
    pub services: BTreeMap<String, ServiceTopics>,
}

/// What an inbound topic means to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    PropertySet,
    PropertyGet,
    PropertyPostReply,
    EventPostReply(String),
    Service(String),
    RawDown,
    RawUpReply,
    DeviceInfoUpdateReply,
    DeviceInfoDeleteReply,
    ShadowGet,
    Rrpc { rrpc_id: String, original: String },
    /// Not a system topic; may still be a user subscription.
    Unmatched,
}

impl ThingTopics {
    pub fn new(product_key: &str, device_name: &str) -> Result<Self, ValidationError> {
        let sys = |suffix: &str| topic(format_args!("/sys/{product_key}/{device_name}/thing/{suffix}"));
        Ok(Self {
            property_post: sys("event/property/post")?,
            property_post_reply: sys("event/property/post_reply")?,
            property_set: sys("service/property/set")?,
            property_set_reply: sys("service/property/set_reply")?,
            property_get: sys("service/property/get")?,
            raw_up: sys("model/up_raw")?,
            raw_up_reply: sys("model/up_raw_reply")?,
            raw_down: sys("model/down_raw")?,
            raw_down_reply: sys("model/down_raw_reply")?,
            device_info_update: sys("deviceinfo/update")?,
            device_info_update_reply: sys("deviceinfo/update_reply")?,
            device_info_delete: sys("deviceinfo/delete")?,
            device_info_delete_reply: sys("deviceinfo/delete_reply")?,
            shadow_get: topic(format_args!("/shadow/get/{product_key}/{device_name}"))?,
            shadow_update: topic(format_args!("/shadow/update/{product_key}/{device_name}"))?,
            events: BTreeMap::new(),
            services: BTreeMap::new(),
        })
    }

    /// Derives the per-event and per-service topics of a loaded model.
    pub fn declare(
        &mut self,
        product_key: &str,
        device_name: &str,
        model: &ThingModel,
    ) -> Result<(), ValidationError> {
        for event in &model.events {
            let post = topic(format_args!(
                "/sys/{product_key}/{device_name}/thing/event/{event}/post"
            ))?;
            let post_reply = topic(format_args!("{post}_reply"))?;
            self.events
                .insert(event.clone(), EventTopics { post, post_reply });
        }
        for service in &model.services {
            let request = topic(format_args!(
                "/sys/{product_key}/{device_name}/thing/service/{service}"
            ))?;
            let reply = topic(format_args!("{request}_reply"))?;
            self.services
                .insert(service.clone(), ServiceTopics { request, reply });
        }
        Ok(())
    }

    /// Topics subscribed in one batch right after connect.
    ///
    /// Device-info replies and the raw channels are always needed; the rest
    /// only once a Thing Model is loaded.
    pub fn system_subscriptions(&self, full: bool) -> Vec<(Topic, QoS)> {
        let mut topics = alloc::vec![
            (self.device_info_update_reply.clone(), QoS::AtMostOnce),
            (self.device_info_delete_reply.clone(), QoS::AtMostOnce),
            (self.raw_down.clone(), QoS::AtMostOnce),
            (self.raw_up_reply.clone(), QoS::AtMostOnce),
        ];
        if full {
            topics.push((self.property_set.clone(), QoS::AtMostOnce));
            topics.push((self.property_get.clone(), QoS::AtMostOnce));
            topics.push((self.property_post_reply.clone(), QoS::AtMostOnce));
            topics.push((self.shadow_get.clone(), QoS::AtLeastOnce));
            topics.extend(
                self.services
                    .values()
                    .map(|s| (s.request.clone(), QoS::AtMostOnce)),
            );
            topics.extend(
                self.events
                    .values()
                    .map(|e| (e.post_reply.clone(), QoS::AtMostOnce)),
            );
        }
        topics
    }

    /// Exact-match routing of an inbound topic.
    pub fn route(&self, inbound: &str) -> Route {
        if inbound.starts_with(RRPC_PREFIX) {
            return match parse_rrpc_topic(inbound) {
                Some((rrpc_id, original)) => Route::Rrpc {
                    rrpc_id: rrpc_id.to_string(),
                    original: original.to_string(),
                },
                None => Route::Unmatched,
            };
        }
        let fixed = [
            (&self.property_set, Route::PropertySet),
            (&self.property_get, Route::PropertyGet),
            (&self.property_post_reply, Route::PropertyPostReply),
            (&self.raw_down, Route::RawDown),
            (&self.raw_up_reply, Route::RawUpReply),
            (&self.device_info_update_reply, Route::DeviceInfoUpdateReply),
            (&self.device_info_delete_reply, Route::DeviceInfoDeleteReply),
            (&self.shadow_get, Route::ShadowGet),
        ];
        if let Some((_, route)) = fixed.into_iter().find(|(t, _)| t.as_str() == inbound) {
            return route;
        }
        if let Some(name) = self.service_for(inbound) {
            return Route::Service(name.to_string());
        }
        if let Some((name, _)) = self
            .events
            .iter()
            .find(|(_, e)| e.post_reply.as_str() == inbound)
        {
            return Route::EventPostReply(name.clone());
        }
        Route::Unmatched
    }

    /// Service identifier whose request topic is exactly `inbound`.
    pub fn service_for(&self, inbound: &str) -> Option<&str> {
        self.services
            .iter()
            .find(|(_, s)| s.request.as_str() == inbound)
            .map(|(name, _)| name.as_str())
    }
}

/// Splits `/ext/rrpc/<id>/<original-topic>` into id and original topic.
///
/// The original topic keeps its leading `/`. Anything else is `None`.
pub fn parse_rrpc_topic(inbound: &str) -> Option<(&str, &str)> {
    let rest = inbound.strip_prefix(RRPC_PREFIX)?;
    let slash = rest.find('/')?;
    let (rrpc_id, original) = rest.split_at(slash);
    if rrpc_id.is_empty() || original.len() < 2 {
        return None;
    }
    Some((rrpc_id, original))
}

/// Full topic of a user-defined topic name: `/{pk}/{dn}/{name}`.
pub fn user_topic(product_key: &str, device_name: &str, name: &str) -> Result<Topic, ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::InvalidTopic);
    }
    topic(format_args!("/{product_key}/{device_name}/{name}"))
}

/// Subscribe filter for RRPC requests wrapping `full_topic`.
pub fn rrpc_filter(full_topic: &str) -> Result<Topic, ValidationError> {
    topic(format_args!("{RRPC_PREFIX}+{full_topic}"))
}

/// Reply topic for an RRPC request id and its original topic.
pub fn rrpc_reply_topic(rrpc_id: &str, original: &str) -> Result<Topic, ValidationError> {
    topic(format_args!("{RRPC_PREFIX}{rrpc_id}{original}"))
}

/// Validates a caller-supplied full topic.
pub fn check_topic(full_topic: &str) -> Result<(), ValidationError> {
    if full_topic.is_empty() || full_topic.len() > MAX_TOPIC_LEN {
        Err(ValidationError::InvalidTopic)
    } else {
        Ok(())
    }
}

/// Only QoS 0 and 1 may be requested.
pub fn check_qos(qos: QoS) -> Result<(), ValidationError> {
    match qos {
        QoS::AtMostOnce | QoS::AtLeastOnce => Ok(()),
        QoS::ExactlyOnce => Err(ValidationError::InvalidQos),
    }
}

/// Which subscription namespace a pending request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SubscriptionKind {
    User,
    Rrpc,
}

/// Subscribe/unsubscribe requests awaiting their acks, keyed by message id.
#[derive(Debug, Clone)]
struct Pending {
    kind: SubscriptionKind,
    topics: Vec<String>,
}

/// User and RRPC topic bookkeeping.
///
/// Topics move into the granted maps only when the broker acks them, so
/// inbound routing never trusts a subscription that was not confirmed.
#[derive(Debug, Default)]
pub struct SubscriptionBook {
    user: BTreeMap<String, QoS>,
    rrpc: BTreeMap<String, QoS>,
    subscribing: BTreeMap<MessageId, Pending>,
    unsubscribing: BTreeMap<MessageId, Pending>,
}

impl SubscriptionBook {
    pub fn new() -> Self {
        Self::default()
    }

    fn granted(&self, kind: SubscriptionKind) -> &BTreeMap<String, QoS> {
        match kind {
            SubscriptionKind::User => &self.user,
            SubscriptionKind::Rrpc => &self.rrpc,
        }
    }

    fn granted_mut(&mut self, kind: SubscriptionKind) -> &mut BTreeMap<String, QoS> {
        match kind {
            SubscriptionKind::User => &mut self.user,
            SubscriptionKind::Rrpc => &mut self.rrpc,
        }
    }

    pub fn is_subscribed(&self, kind: SubscriptionKind, full_topic: &str) -> bool {
        self.granted(kind).contains_key(full_topic)
    }

    pub fn granted_qos(&self, kind: SubscriptionKind, full_topic: &str) -> Option<QoS> {
        self.granted(kind).get(full_topic).copied()
    }

    pub fn topics(&self, kind: SubscriptionKind) -> impl Iterator<Item = (&str, QoS)> {
        self.granted(kind).iter().map(|(t, q)| (t.as_str(), *q))
    }

    fn is_subscribing(&self, kind: SubscriptionKind, full_topic: &str) -> bool {
        self.subscribing
            .values()
            .any(|p| p.kind == kind && p.topics.iter().any(|t| t == full_topic))
    }

    /// Rejects topics already subscribed or with a subscribe in flight.
    pub fn check_new(&self, kind: SubscriptionKind, full_topic: &str) -> Result<(), ValidationError> {
        if self.is_subscribed(kind, full_topic) || self.is_subscribing(kind, full_topic) {
            Err(ValidationError::AlreadySubscribed)
        } else {
            Ok(())
        }
    }

    pub fn check_existing(&self, kind: SubscriptionKind, full_topic: &str) -> Result<(), ValidationError> {
        if self.is_subscribed(kind, full_topic) {
            Ok(())
        } else {
            Err(ValidationError::NotSubscribed)
        }
    }

    pub fn begin_subscribe(&mut self, kind: SubscriptionKind, mid: MessageId, topics: Vec<String>) {
        self.subscribing.insert(
            mid,
            Pending { kind, topics },
        );
    }

    pub fn begin_unsubscribe(&mut self, kind: SubscriptionKind, mid: MessageId, topics: Vec<String>) {
        self.unsubscribing.insert(
            mid,
            Pending { kind, topics },
        );
    }

    /// Commits a subscribe ack, returning the namespace it belonged to.
    ///
    /// Topics granted anything other than QoS 0/1 are not recorded.
    pub fn complete_subscribe(&mut self, mid: MessageId, granted: &[GrantedQos]) -> Option<SubscriptionKind> {
        let pending = self.subscribing.remove(&mid)?;
        let kind = pending.kind;
        for (topic, qos) in pending.topics.into_iter().zip(granted.iter()) {
            match qos {
                Some(qos @ (QoS::AtMostOnce | QoS::AtLeastOnce)) => {
                    self.granted_mut(kind).insert(topic, *qos);
                }
                _ => log::warn!("subscription to {} refused: {:?}", topic, qos),
            }
        }
        Some(kind)
    }

    pub fn complete_unsubscribe(&mut self, mid: MessageId) -> Option<SubscriptionKind> {
        let pending = self.unsubscribing.remove(&mid)?;
        let kind = pending.kind;
        let granted = self.granted_mut(kind);
        for topic in &pending.topics {
            granted.remove(topic);
        }
        Some(kind)
    }

    pub fn clear(&mut self) {
        self.user.clear();
        self.rrpc.clear();
        self.subscribing.clear();
        self.unsubscribing.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_empty()
            && self.rrpc.is_empty()
            && self.subscribing.is_empty()
            && self.unsubscribing.is_empty()
    }
}
