//! Events delivered to the application and session state types.

use bytes::Bytes;

use crate::message::QoS;

/// Why an established session was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The broker stopped answering keep-alive pings.
    BrokerUnresponsive,
    /// The transport reported the link down.
    NetworkDown,
}

/// An incoming PUBLISH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub dup: bool,
    pub retain: bool,
    /// Packet ID (for QoS 1/2).
    pub packet_id: Option<u16>,
}

/// Events passed to [`EventHandler`](crate::EventHandler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MqttEvent {
    /// Received a publish message.
    Message(ReceivedMessage),
    /// The established session was lost. Delivered once per loss.
    Disconnected(DisconnectReason),
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, or cleanly disconnected. Ready for `connect` or `delete`.
    Created,
    /// Transport setup and CONNECT handshake in progress.
    Connecting,
    /// Handshake complete and the link is usable.
    Established,
    /// The link was lost. Only `disconnect` is accepted.
    LinkLost,
    /// Receive loop being stopped and transport torn down.
    Disconnecting,
    /// Removed from the registry.
    Deleted,
}

impl ConnectionState {
    pub fn is_established(self) -> bool {
        self == ConnectionState::Established
    }

    /// Whether transport resources are held and must be released by `disconnect`.
    pub fn holds_link(self) -> bool {
        matches!(
            self,
            ConnectionState::Established | ConnectionState::LinkLost
        )
    }
}
