//! Protocol engine contract.
//!
//! The engine owns packet encoding/decoding and packet-level protocol state
//! (keep-alive, QoS handshakes, the ordered record of publishes awaiting
//! acknowledgment). This crate drives it; it never parses wire bytes itself.
//!
//! Incoming packets are handed to a [`PacketSink`] synchronously from inside
//! [`ProtocolEngine::process_loop`], always tagged with the [`EngineContext`]
//! the engine was created with.

use std::time::Duration;

use bytes::Bytes;

use crate::error::EngineError;
use crate::message::{PublishMessage, QoS, SubscribeOutcome, SubscribeRequest};
use crate::options::ConnectOptions;
use crate::transport::Transport;

/// Identity of one engine instance, used to find the owning session when the
/// engine reports a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineContext(pub u64);

/// Position in the engine's ordered list of publishes pending resend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResendCursor(pub usize);

/// Packets surfaced by the engine while it processes input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingPacket {
    Publish {
        packet_id: Option<u16>,
        topic: String,
        payload: Bytes,
        qos: QoS,
        dup: bool,
        retain: bool,
    },
    /// `ok` is false when the engine could not deserialize the ack.
    PubAck { packet_id: u16, ok: bool },
    PubRec { packet_id: u16, ok: bool },
    PubRel { packet_id: u16 },
    PubComp { packet_id: u16 },
    SubAck {
        packet_id: u16,
        outcomes: Vec<SubscribeOutcome>,
    },
    UnsubAck { packet_id: u16 },
    PingResp { ok: bool },
    /// Broker-initiated DISCONNECT.
    Disconnect,
}

/// Receiver for packets decoded by the engine.
pub trait PacketSink {
    fn deliver(&mut self, context: EngineContext, packet: IncomingPacket);
}

/// Per-session packet engine.
///
/// Every call that touches the network receives the session's transport.
pub trait ProtocolEngine: Send {
    /// Send CONNECT and wait up to `timeout` for CONNACK. Returns the broker's
    /// session-present flag.
    fn connect(
        &mut self,
        io: &mut dyn Transport,
        options: &ConnectOptions,
        timeout: Duration,
    ) -> Result<bool, EngineError>;

    fn publish(
        &mut self,
        io: &mut dyn Transport,
        message: &PublishMessage,
        packet_id: u16,
    ) -> Result<(), EngineError>;

    fn subscribe(
        &mut self,
        io: &mut dyn Transport,
        requests: &[SubscribeRequest],
        packet_id: u16,
    ) -> Result<(), EngineError>;

    fn unsubscribe(
        &mut self,
        io: &mut dyn Transport,
        topics: &[String],
        packet_id: u16,
    ) -> Result<(), EngineError>;

    fn disconnect(&mut self, io: &mut dyn Transport) -> Result<(), EngineError>;

    /// Receive and process input for at most `timeout`, delivering decoded
    /// packets to `sink`. Also services keep-alive.
    fn process_loop(
        &mut self,
        io: &mut dyn Transport,
        timeout: Duration,
        sink: &mut dyn PacketSink,
    ) -> Result<(), EngineError>;

    /// A fresh non-zero packet id, or `None` if the engine has none left.
    fn allocate_packet_id(&mut self) -> Option<u16>;

    /// Next packet id awaiting resend, in original send order. Advances `cursor`.
    fn next_publish_to_resend(&mut self, cursor: &mut ResendCursor) -> Option<u16>;
}

/// Creates one engine per session.
pub trait EngineFactory: Send + Sync {
    fn create(
        &self,
        context: EngineContext,
        network_buffer_size: usize,
    ) -> Result<Box<dyn ProtocolEngine>, EngineError>;
}
