//! Normalized events carried from the session loop to the dispatch worker.

use alloc::vec::Vec;

use crate::error::{ConnectResult, RegistrationError};
use crate::transport::{GrantedQos, InboundMessage, MessageId};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DisconnectReason {
    /// `disconnect()` or `destruct()` was called.
    Requested,
    /// The broker or network dropped the session.
    ConnectionLost,
}

/// Number of sessions closed so far; stamped on every queued event.
pub type SessionEpoch = u32;

/// One entry of the dispatch queue.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connect {
        session_present: bool,
        result: ConnectResult,
    },
    Disconnect(DisconnectReason),
    /// Outcome of a dynamic registration exchange.
    Registered(Result<(), RegistrationError>),
    Message(InboundMessage),
    Published(MessageId),
    Subscribed {
        mid: MessageId,
        granted: Vec<GrantedQos>,
    },
    Unsubscribed(MessageId),
    /// Stops the worker once everything queued before it is delivered.
    Exit,
}

impl SessionEvent {
    /// Events that only make sense within the session that produced them.
    ///
    /// Message ids and routed messages of a closed session must not touch
    /// the registries of the next one.
    pub fn is_session_scoped(&self) -> bool {
        matches!(
            self,
            SessionEvent::Message(_)
                | SessionEvent::Published(_)
                | SessionEvent::Subscribed { .. }
                | SessionEvent::Unsubscribed(_)
        )
    }
}
