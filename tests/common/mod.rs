//! Shared fixtures: a scripted in-memory `MqttLink` and a recording handler.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Instant, Timer};
use myrtio_linkkit::alink::Ack;
use myrtio_linkkit::error::RegistrationError;
use myrtio_linkkit::transport::{ConnAck, ConnectParams, GrantedQos, InboundMessage, LinkError, LinkEvent, MessageId};
use myrtio_linkkit::{
    CallbackResult, ConnectResult, ConnectionConfig, DeviceIdentity, DisconnectReason, MqttLink, MqttOptions, QoS,
    Registrar, ThingClient, ThingHandler,
};
use serde_json::Value;

pub const TSL: &str = r#"{
    "events": [
        {"identifier": "post", "outputData": [{"identifier": "temperature"}]},
        {"identifier": "alarm", "outputData": [{"identifier": "level"}]}
    ],
    "services": [
        {"identifier": "set", "inputData": [{"identifier": "switch"}]},
        {"identifier": "get", "outputData": [{"identifier": "temperature"}]},
        {"identifier": "reboot", "inputData": [{"identifier": "delay"}]}
    ]
}"#;

pub const PROPERTY_SET: &str = "/sys/pk/dn/thing/service/property/set";
pub const PROPERTY_SET_REPLY: &str = "/sys/pk/dn/thing/service/property/set_reply";
pub const PROPERTY_POST: &str = "/sys/pk/dn/thing/event/property/post";
pub const PROPERTY_POST_REPLY: &str = "/sys/pk/dn/thing/event/property/post_reply";
pub const REBOOT: &str = "/sys/pk/dn/thing/service/reboot";
pub const SHADOW_GET: &str = "/shadow/get/pk/dn";

#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

impl Published {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.payload).expect("json payload")
    }
}

/// In-memory link; the test pushes inbound events with [`MockLink::inject`].
pub struct MockLink {
    events: Channel<CriticalSectionRawMutex, LinkEvent, 32>,
    connect_script: RefCell<VecDeque<Result<ConnAck, LinkError>>>,
    pub connects: RefCell<Vec<(Instant, ConnectParams)>>,
    pub published: RefCell<Vec<Published>>,
    pub subscribed: RefCell<Vec<Vec<(String, QoS)>>>,
    pub unsubscribed: RefCell<Vec<Vec<String>>>,
    pub disconnects: Cell<usize>,
    /// Acknowledge every subscribe with the requested QoS.
    pub auto_ack_subscribe: Cell<bool>,
    next_mid: Cell<MessageId>,
}

impl MockLink {
    pub fn new() -> Self {
        Self {
            events: Channel::new(),
            connect_script: RefCell::new(VecDeque::new()),
            connects: RefCell::new(Vec::new()),
            published: RefCell::new(Vec::new()),
            subscribed: RefCell::new(Vec::new()),
            unsubscribed: RefCell::new(Vec::new()),
            disconnects: Cell::new(0),
            auto_ack_subscribe: Cell::new(true),
            next_mid: Cell::new(1),
        }
    }

    /// Outcomes for the next connect attempts; accepted once the script runs out.
    pub fn script_connects(&self, outcomes: impl IntoIterator<Item = Result<ConnAck, LinkError>>) {
        self.connect_script.borrow_mut().extend(outcomes);
    }

    pub fn inject(&self, event: LinkEvent) {
        self.events.try_send(event).expect("mock event queue full");
    }

    pub fn inject_message(&self, topic: &str, payload: &str) {
        self.inject(LinkEvent::Message(InboundMessage {
            topic: topic.into(),
            payload: payload.as_bytes().to_vec(),
            qos: QoS::AtMostOnce,
        }));
    }

    pub fn published_on(&self, topic: &str) -> Vec<Published> {
        self.published
            .borrow()
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect()
    }

    pub fn last_mid(&self) -> MessageId {
        self.next_mid.get() - 1
    }

    fn mid(&self) -> MessageId {
        let mid = self.next_mid.get();
        self.next_mid.set(mid + 1);
        mid
    }
}

impl MqttLink for MockLink {
    async fn connect(&self, params: &ConnectParams) -> Result<ConnAck, LinkError> {
        self.connects.borrow_mut().push((Instant::now(), params.clone()));
        self.events.clear();
        self.connect_script.borrow_mut().pop_front().unwrap_or(Ok(ConnAck {
            session_present: false,
            code: 0,
        }))
    }

    async fn poll(&self) -> Result<LinkEvent, LinkError> {
        Ok(self.events.receive().await)
    }

    fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<MessageId, LinkError> {
        self.published.borrow_mut().push(Published {
            topic: topic.into(),
            payload: payload.to_vec(),
            qos,
        });
        Ok(self.mid())
    }

    fn subscribe(&self, topics: &[(&str, QoS)]) -> Result<MessageId, LinkError> {
        self.subscribed
            .borrow_mut()
            .push(topics.iter().map(|(t, q)| (t.to_string(), *q)).collect());
        let mid = self.mid();
        if self.auto_ack_subscribe.get() {
            let granted: Vec<GrantedQos> = topics.iter().map(|(_, q)| Some(*q)).collect();
            self.inject(LinkEvent::Subscribed { mid, granted });
        }
        Ok(mid)
    }

    fn unsubscribe(&self, topics: &[&str]) -> Result<MessageId, LinkError> {
        self.unsubscribed
            .borrow_mut()
            .push(topics.iter().map(|t| t.to_string()).collect());
        Ok(self.mid())
    }

    async fn disconnect(&self) {
        self.disconnects.set(self.disconnects.get() + 1);
    }
}

/// Everything the handler saw, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Connect(bool, ConnectResult),
    Disconnect(DisconnectReason),
    Registered(Result<(), RegistrationError>),
    Enable,
    Disable,
    PropertyChanged(Value),
    PropertyPostAck(Ack),
    EventPostAck(String, Ack),
    ServiceCall(String, String, Value),
    RawData(Vec<u8>),
    Shadow(Value),
    TopicMessage(String, Vec<u8>),
    RrpcMessage(String, String, Vec<u8>),
    Publish(MessageId),
    Subscribe(MessageId, Vec<GrantedQos>),
    Unsubscribe(MessageId),
}

pub struct Recorder<'a> {
    pub seen: &'a RefCell<Vec<Seen>>,
}

impl Recorder<'_> {
    fn push(&mut self, seen: Seen) -> CallbackResult {
        self.seen.borrow_mut().push(seen);
        Ok(())
    }
}

impl ThingHandler for Recorder<'_> {
    fn on_connect(&mut self, session_present: bool, result: ConnectResult) -> CallbackResult {
        self.push(Seen::Connect(session_present, result))
    }

    fn on_disconnect(&mut self, reason: DisconnectReason) -> CallbackResult {
        self.push(Seen::Disconnect(reason))
    }

    fn on_device_registered(&mut self, result: &Result<(), RegistrationError>) -> CallbackResult {
        self.push(Seen::Registered(result.clone()))
    }

    fn on_thing_enable(&mut self) -> CallbackResult {
        self.push(Seen::Enable)
    }

    fn on_thing_disable(&mut self) -> CallbackResult {
        self.push(Seen::Disable)
    }

    fn on_property_changed(&mut self, params: &Value) -> CallbackResult {
        self.push(Seen::PropertyChanged(params.clone()))
    }

    fn on_property_post_ack(&mut self, ack: &Ack) -> CallbackResult {
        self.push(Seen::PropertyPostAck(ack.clone()))
    }

    fn on_event_post_ack(&mut self, event: &str, ack: &Ack) -> CallbackResult {
        self.push(Seen::EventPostAck(event.into(), ack.clone()))
    }

    fn on_service_call(&mut self, identifier: &str, request_id: &str, params: &Value) -> CallbackResult {
        self.push(Seen::ServiceCall(identifier.into(), request_id.into(), params.clone()))
    }

    fn on_raw_data_arrived(&mut self, payload: &[u8]) -> CallbackResult {
        self.push(Seen::RawData(payload.to_vec()))
    }

    fn on_shadow_get(&mut self, payload: &Value) -> CallbackResult {
        self.push(Seen::Shadow(payload.clone()))
    }

    fn on_topic_message(&mut self, topic: &str, payload: &[u8], _qos: QoS) -> CallbackResult {
        self.push(Seen::TopicMessage(topic.into(), payload.to_vec()))
    }

    fn on_rrpc_message(&mut self, rrpc_id: &str, topic: &str, payload: &[u8], _qos: QoS) -> CallbackResult {
        self.push(Seen::RrpcMessage(rrpc_id.into(), topic.into(), payload.to_vec()))
    }

    fn on_publish(&mut self, mid: MessageId) -> CallbackResult {
        self.push(Seen::Publish(mid))
    }

    fn on_subscribe(&mut self, mid: MessageId, granted: &[GrantedQos]) -> CallbackResult {
        self.push(Seen::Subscribe(mid, granted.to_vec()))
    }

    fn on_unsubscribe(&mut self, mid: MessageId) -> CallbackResult {
        self.push(Seen::Unsubscribe(mid))
    }
}

pub fn config() -> ConnectionConfig {
    ConnectionConfig::new(DeviceIdentity::new("127.0.0.1", "pk", "dn", "secret")).with_mqtt(
        MqttOptions::new()
            .without_tls()
            .with_poll_interval(Duration::from_millis(10))
            .with_rng_seed(7),
    )
}

/// Lets the session loop and the dispatch worker drain what is pending.
pub async fn settle() {
    Timer::after_millis(50).await;
}

/// Runs the session loop, the dispatch worker and `script` until all three finish.
///
/// `script` has to end with `destruct()`, otherwise the loop and the worker never return.
pub fn drive<L: MqttLink, R: Registrar, F: core::future::Future>(
    client: &ThingClient<L, R>,
    seen: &RefCell<Vec<Seen>>,
    script: F,
) -> F::Output {
    drive_with(client, &mut Recorder { seen }, script)
}

/// [`drive`] with an arbitrary handler.
pub fn drive_with<L: MqttLink, R: Registrar, H: ThingHandler, F: core::future::Future>(
    client: &ThingClient<L, R>,
    handler: &mut H,
    script: F,
) -> F::Output {
    let ((), worker, output) = embassy_futures::block_on(embassy_futures::join::join3(
        client.run_session(),
        client.run_dispatcher(handler),
        script,
    ));
    worker.expect("dispatch worker");
    output
}

/// Polls `done` every few milliseconds for at most `limit`.
pub async fn wait_until(limit: Duration, done: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while !done() {
        if Instant::now() >= deadline {
            return false;
        }
        Timer::after_millis(10).await;
    }
    true
}
