//! # MQTT Link Abstraction
//!
//! This module defines the `MqttLink` trait, the seam between the Thing Model
//! client and whatever MQTT primitive performs wire encoding, TLS and socket
//! I/O. The client never encodes packets itself; it relies on the link for
//! connect/publish/subscribe and for message-id acknowledgments.
//!
//! With the Rust 2024 Edition, this trait uses native `async fn`, removing the
//! need for the `#[async_trait]` macro.

use alloc::string::String;
use alloc::vec::Vec;

/// Represents the Quality of Service (QoS) levels for MQTT messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    /// Parses a numeric QoS level, rejecting anything above 2.
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }

    pub fn level(self) -> u8 {
        self as u8
    }
}

/// MQTT protocol revision requested at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MqttVersion {
    V31,
    V311,
}

/// Transport message id assigned by the link to every publish/subscribe/unsubscribe.
pub type MessageId = u16;

/// QoS granted by the broker for one subscription, `None` meaning refused.
pub type GrantedQos = Option<QoS>;

/// Non-success codes returned by the MQTT primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    /// The link has no established session.
    NotConnected,
    /// The link's outgoing queue is full.
    QueueFull,
    /// DNS, socket or TLS failure.
    Io,
    /// Any other primitive-specific return code.
    Code(i32),
}

/// Everything the link needs to open a session with the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
    pub version: MqttVersion,
    /// PEM trust material; `None` means a plain TCP session.
    pub ca_cert: Option<String>,
    pub max_in_flight: usize,
    pub max_queued: usize,
}

/// CONNACK as seen by the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnAck {
    pub session_present: bool,
    /// Raw CONNACK return code, 0 meaning accepted.
    pub code: u8,
}

/// A publish received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

/// Raw network events raised by the link's poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Message(InboundMessage),
    /// The publish with this message id completed.
    Published(MessageId),
    Subscribed {
        mid: MessageId,
        granted: Vec<GrantedQos>,
    },
    Unsubscribed(MessageId),
    /// The broker or network closed the session.
    Disconnected,
}

/// A trait representing the MQTT primitive the client drives.
///
/// All methods take `&self`: the session loop polls while application code
/// publishes from other tasks, so implementations keep their state behind
/// interior mutability. `publish`, `subscribe` and `unsubscribe` must not
/// wait on the network; they queue the request and return its message id.
#[allow(async_fn_in_trait)]
pub trait MqttLink {
    /// Opens a session and waits for the broker's CONNACK.
    async fn connect(&self, params: &ConnectParams) -> Result<ConnAck, LinkError>;

    /// Waits for the next network event.
    ///
    /// An `Err` means the session is gone; the caller treats it like
    /// [`LinkEvent::Disconnected`].
    async fn poll(&self) -> Result<LinkEvent, LinkError>;

    fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<MessageId, LinkError>;

    fn subscribe(&self, topics: &[(&str, QoS)]) -> Result<MessageId, LinkError>;

    fn unsubscribe(&self, topics: &[&str]) -> Result<MessageId, LinkError>;

    /// Sends DISCONNECT and closes the session.
    async fn disconnect(&self);
}
