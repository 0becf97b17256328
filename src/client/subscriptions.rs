//! User-defined topics and RRPC subscriptions.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use super::ThingClient;
use crate::auth::Registrar;
use crate::error::{Error, ValidationError};
use crate::rrpc::RrpcKey;
use crate::state::SessionState;
use crate::topics::{self, SubscriptionKind, Topic, check_qos, check_topic};
use crate::transport::{MessageId, MqttLink, QoS};

impl<L: MqttLink, R: Registrar> ThingClient<L, R> {
    /// Full topic of a user-defined topic name (`/{pk}/{dn}/{name}`).
    pub fn user_topic(&self, name: &str) -> Result<Topic, Error> {
        Ok(topics::user_topic(
            &self.identity.product_key,
            &self.identity.device_name,
            name,
        )?)
    }

    /// Publishes on an arbitrary full topic.
    pub fn publish_topic(&self, full_topic: &str, payload: &[u8], qos: QoS) -> Result<MessageId, Error> {
        self.state.require(&[SessionState::Connected])?;
        check_topic(full_topic)?;
        check_qos(qos)?;
        Ok(self.link.publish(full_topic, payload, qos)?)
    }

    pub fn subscribe_topic(&self, full_topic: &str, qos: QoS) -> Result<MessageId, Error> {
        self.subscribe_topics(&[(full_topic, qos)])
    }

    /// Subscribes a batch of user topics in one request.
    ///
    /// The topics become routable once the broker acks the request.
    pub fn subscribe_topics(&self, topics: &[(&str, QoS)]) -> Result<MessageId, Error> {
        self.subscribe_as(SubscriptionKind::User, topics, topics)
    }

    pub fn unsubscribe_topic(&self, full_topic: &str) -> Result<MessageId, Error> {
        self.unsubscribe_topics(&[full_topic])
    }

    pub fn unsubscribe_topics(&self, topics: &[&str]) -> Result<MessageId, Error> {
        self.unsubscribe_as(SubscriptionKind::User, topics, topics)
    }

    pub fn subscribe_rrpc_topic(&self, full_topic: &str) -> Result<MessageId, Error> {
        self.subscribe_rrpc_topics(&[full_topic])
    }

    /// Subscribes to RRPC requests wrapping each of `topics`.
    ///
    /// The broker-side filter is `/ext/rrpc/+<topic>`; messages arrive through
    /// `on_rrpc_message` and are answered with [`answer_rrpc`](Self::answer_rrpc).
    pub fn subscribe_rrpc_topics(&self, topics: &[&str]) -> Result<MessageId, Error> {
        let filters = rrpc_filters(topics)?;
        let requested: Vec<(&str, QoS)> = filters
            .iter()
            .map(|f| (f.as_str(), QoS::AtMostOnce))
            .collect();
        let logical: Vec<(&str, QoS)> = topics.iter().map(|t| (*t, QoS::AtMostOnce)).collect();
        self.subscribe_as(SubscriptionKind::Rrpc, &logical, &requested)
    }

    pub fn unsubscribe_rrpc_topic(&self, full_topic: &str) -> Result<MessageId, Error> {
        self.unsubscribe_rrpc_topics(&[full_topic])
    }

    pub fn unsubscribe_rrpc_topics(&self, topics: &[&str]) -> Result<MessageId, Error> {
        let filters = rrpc_filters(topics)?;
        let requested: Vec<&str> = filters.iter().map(|f| f.as_str()).collect();
        self.unsubscribe_as(SubscriptionKind::Rrpc, topics, &requested)
    }

    /// Answers a message received on an RRPC topic.
    pub fn answer_rrpc(&self, rrpc_id: &str, payload: &[u8]) -> Result<MessageId, Error> {
        self.state.require(&[SessionState::Connected])?;
        let entry = self
            .rrpc
            .lock(|rrpc| rrpc.borrow_mut().take(&RrpcKey::Message(rrpc_id.into())))
            .ok_or(Error::RrpcIdNotFound)?;
        Ok(self.link.publish(&entry.reply_topic, payload, QoS::AtMostOnce)?)
    }

    /// User topics the broker has acknowledged, with their granted QoS.
    pub fn user_topics(&self) -> Vec<(String, QoS)> {
        self.subscriptions.lock(|book| {
            book.borrow()
                .topics(SubscriptionKind::User)
                .map(|(t, q)| (t.to_string(), q))
                .collect()
        })
    }

    /// Whether the broker has acknowledged a user or RRPC subscription to `full_topic`.
    pub fn is_subscribed(&self, kind: SubscriptionKind, full_topic: &str) -> bool {
        self.subscriptions
            .lock(|book| book.borrow().is_subscribed(kind, full_topic))
    }

    /// Validates `logical` against the book and sends `requested` to the broker.
    fn subscribe_as(
        &self,
        kind: SubscriptionKind,
        logical: &[(&str, QoS)],
        requested: &[(&str, QoS)],
    ) -> Result<MessageId, Error> {
        self.state.require(&[SessionState::Connected])?;
        if logical.is_empty() {
            return Err(ValidationError::EmptyTopicList.into());
        }
        for (topic, qos) in logical {
            check_topic(topic)?;
            check_qos(*qos)?;
        }
        for (topic, _) in requested {
            check_topic(topic)?;
        }
        self.subscriptions.lock(|book| {
            let book = book.borrow();
            logical
                .iter()
                .try_for_each(|(topic, _)| book.check_new(kind, topic))
        })?;
        let mid = self.link.subscribe(requested)?;
        self.subscriptions.lock(|book| {
            book.borrow_mut()
                .begin_subscribe(kind, mid, logical.iter().map(|(t, _)| t.to_string()).collect())
        });
        log::debug!("subscribing {} {:?} topic(s), mid {}", logical.len(), kind, mid);
        Ok(mid)
    }

    fn unsubscribe_as(&self, kind: SubscriptionKind, logical: &[&str], requested: &[&str]) -> Result<MessageId, Error> {
        self.state.require(&[SessionState::Connected])?;
        if logical.is_empty() {
            return Err(ValidationError::EmptyTopicList.into());
        }
        self.subscriptions.lock(|book| {
            let book = book.borrow();
            logical.iter().try_for_each(|topic| book.check_existing(kind, topic))
        })?;
        let mid = self.link.unsubscribe(requested)?;
        self.subscriptions.lock(|book| {
            book.borrow_mut()
                .begin_unsubscribe(kind, mid, logical.iter().map(|t| t.to_string()).collect())
        });
        Ok(mid)
    }
}

fn rrpc_filters(topics: &[&str]) -> Result<Vec<Topic>, Error> {
    topics
        .iter()
        .map(|t| topics::rrpc_filter(t).map_err(Error::from))
        .collect()
}
