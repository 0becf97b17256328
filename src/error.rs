//! # Error Types
//!
//! This module defines the error taxonomy of the client: lifecycle misuse,
//! rejected configuration or arguments, transport refusals and local capacity
//! exhaustion. Request timeouts and callback failures are deliberately absent
//! here: the former are only logged by the GC sweep, the latter are caught at
//! the dispatch boundary (see [`crate::runtime::CallbackError`]).

use core::fmt;

use crate::state::SessionState;
use crate::transport::LinkError;

/// The primary error enum of the Thing Model client.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The operation is not legal in the current lifecycle state.
    State(SessionState),
    /// Configuration or call arguments were rejected before any network effect.
    Validation(ValidationError),
    /// The MQTT primitive refused a publish/subscribe/unsubscribe.
    Transport(LinkError),
    /// A blocking `connect()` did not get an accepted session.
    ConnectionRefused(ConnectResult),
    /// Too many requests are outstanding to allocate another request id.
    NoRequestId,
    /// The dispatch queue stayed full for the whole bounded post window.
    DispatchQueueFull,
    /// The Thing Model does not allow the operation.
    Rejected(Rejection),
    /// `answer_rrpc` was called with an id that is unknown or already evicted.
    RrpcIdNotFound,
    /// The dynamic registration exchange failed.
    Registration(RegistrationError),
    /// A payload could not be serialized to JSON.
    Serialize,
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

impl From<LinkError> for Error {
    fn from(err: LinkError) -> Self {
        Error::Transport(err)
    }
}

impl From<RegistrationError> for Error {
    fn from(err: RegistrationError) -> Self {
        Error::Registration(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(_: serde_json::Error) -> Self {
        Error::Serialize
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::State(state) => write!(f, "operation not allowed in state {state:?}"),
            Error::Validation(err) => write!(f, "invalid argument: {err}"),
            Error::Transport(err) => write!(f, "transport refused request: {err:?}"),
            Error::ConnectionRefused(result) => write!(f, "connect failed: {result:?}"),
            Error::NoRequestId => f.write_str("no request id available"),
            Error::DispatchQueueFull => f.write_str("dispatch queue is full"),
            Error::Rejected(reason) => write!(f, "rejected by thing model: {reason:?}"),
            Error::RrpcIdNotFound => f.write_str("rrpc id does not exist"),
            Error::Registration(err) => write!(f, "dynamic registration failed: {err:?}"),
            Error::Serialize => f.write_str("payload serialization failed"),
        }
    }
}

/// Reasons a configuration value or call argument is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ValidationError {
    EmptyHost,
    EmptyProductKey,
    EmptyDeviceName,
    /// Neither a device secret nor a product secret was supplied.
    MissingSecret,
    KeepAliveOutOfRange,
    ReconnectBackoffOutOfRange,
    /// `max_in_flight` or `max_queued` is zero.
    InvalidQueueLimit,
    InterfaceInfoTooLong,
    /// Topic is empty or longer than [`crate::topics::MAX_TOPIC_LEN`].
    InvalidTopic,
    /// Only QoS 0 and QoS 1 are supported.
    InvalidQos,
    AlreadySubscribed,
    NotSubscribed,
    EmptyTopicList,
    /// The Thing Model document could not be parsed.
    MalformedThingModel,
    /// The Thing Model was already set up.
    ThingAlreadySetup,
    /// The dispatch worker is already running with a handler.
    HandlerAlreadyRegistered,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ValidationError::EmptyHost => "host is empty",
            ValidationError::EmptyProductKey => "product key is empty",
            ValidationError::EmptyDeviceName => "device name is empty",
            ValidationError::MissingSecret => "device secret and product secret are both empty",
            ValidationError::KeepAliveOutOfRange => "keep-alive must be within 60..=180 seconds",
            ValidationError::ReconnectBackoffOutOfRange => {
                "reconnect backoff must be within 1..=7200 seconds with min <= max"
            }
            ValidationError::InvalidQueueLimit => "queue limits must be non-zero",
            ValidationError::InterfaceInfoTooLong => "interface info exceeds 160 characters",
            ValidationError::InvalidTopic => "topic is empty or too long",
            ValidationError::InvalidQos => "qos must be 0 or 1",
            ValidationError::AlreadySubscribed => "topic is already subscribed",
            ValidationError::NotSubscribed => "topic is not subscribed",
            ValidationError::EmptyTopicList => "topic list is empty",
            ValidationError::MalformedThingModel => "thing model document is malformed",
            ValidationError::ThingAlreadySetup => "thing model is already set up",
            ValidationError::HandlerAlreadyRegistered => "dispatch handler is already registered",
        };
        f.write_str(text)
    }
}

/// Reasons the Thing Model refuses an outbound operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Rejection {
    /// `thing_setup` has not been called, or it entered raw-only mode.
    ThingNotSetup,
    /// The system subscription has not been acknowledged yet.
    ThingNotEnabled,
    /// The event identifier is not declared by the Thing Model.
    UnknownEvent,
    /// The service identifier is not declared by the Thing Model.
    UnknownService,
}

/// Failures of the dynamic registration exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistrationError {
    /// No registrar is available to perform the exchange.
    Unsupported,
    /// The HTTPS exchange itself failed.
    Exchange,
    /// The reply body was not the expected JSON document.
    MalformedReply,
    /// The cloud answered with a non-200 code.
    Refused(i64),
}

/// Represents the reason codes for a connection refusal (`CONNACK`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ConnectReasonCode {
    /// The connection was accepted.
    Success = 0,
    /// The broker does not support the requested MQTT protocol version.
    UnacceptableProtocolVersion = 1,
    /// The client identifier is not valid.
    IdentifierRejected = 2,
    /// The broker is unavailable.
    ServerUnavailable = 3,
    /// The username or password is not valid.
    BadUserNameOrPassword = 4,
    /// The client is not authorized to connect.
    NotAuthorized = 5,
    /// An unknown or unspecified error occurred.
    Other(u8),
}

impl From<u8> for ConnectReasonCode {
    fn from(val: u8) -> Self {
        match val {
            0 => Self::Success,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadUserNameOrPassword,
            5 => Self::NotAuthorized,
            _ => Self::Other(val),
        }
    }
}

/// Outcome of one connect attempt, as reported to `on_connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectResult {
    /// The broker accepted the session.
    Accepted,
    /// The broker answered with a refusal code.
    Refused(ConnectReasonCode),
    /// DNS, socket or TLS failure before a CONNACK was seen.
    TransportFailure,
    /// The device secret could not be obtained through dynamic registration.
    RegistrationFailed,
}

impl ConnectResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ConnectResult::Accepted)
    }
}
