//! mqlink - MQTT client session and reliability manager.
//!
//! Manages a bounded set of client sessions on top of a pluggable protocol
//! engine and transport. It covers what sits between the application and the
//! wire: handle registry, connection establishment with backoff, QoS 1/2
//! publish tracking with retry and resend, subscribe/unsubscribe ack
//! correlation, a per-session receive loop and abrupt-disconnect reporting.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mqlink::{
//!     BrokerInfo, ConnectOptions, CreateOptions, LibraryConfig, MqttEvent, PublishMessage,
//!     QoS, SessionManager, SubscribeRequest,
//! };
//!
//! let manager = SessionManager::with_tcp(LibraryConfig::default(), Arc::new(my_engines))?;
//! let handle = manager.create(
//!     CreateOptions::new(BrokerInfo::new("localhost", 1883), 1024),
//!     |handle, event: &MqttEvent| println!("{}: {:?}", handle, event),
//! )?;
//!
//! manager.connect(handle, &ConnectOptions::new("sensor-7"))?;
//! manager.subscribe(handle, &[SubscribeRequest::new("cmd/#", QoS::AtLeastOnce)])?;
//! manager.publish(handle, &PublishMessage::new("sensors/temp", "21.5").qos(QoS::AtLeastOnce))?;
//!
//! manager.disconnect(handle)?;
//! manager.delete(handle)?;
//! ```
//!
//! # Threading
//!
//! Each connected session runs a receive thread, and one notifier thread per
//! manager reports transport-level disconnects. Event handlers run on
//! whichever of those threads (or the calling thread) holds the session lock;
//! see [`EventHandler`].

mod backoff;
mod callback;
pub mod config;
mod connect;
mod dispatch;
pub mod engine;
mod error;
mod events;
mod manager;
mod message;
mod notifier;
mod options;
mod publish;
mod receive;
mod registry;
mod session;
mod subscribe;
pub mod transport;
mod will;

#[cfg(test)]
mod testing;

pub use callback::EventHandler;
pub use config::{ConfigError, LibraryConfig};
pub use engine::{
    EngineContext, EngineFactory, IncomingPacket, PacketSink, ProtocolEngine, ResendCursor,
};
pub use error::{ClientError, EngineError, Result};
pub use events::{ConnectionState, DisconnectReason, MqttEvent, ReceivedMessage};
pub use manager::SessionManager;
pub use message::{PublishMessage, QoS, SubscribeOutcome, SubscribeRequest};
pub use options::{BrokerInfo, ConnectOptions, CreateOptions, SecurityInfo};
pub use registry::SessionHandle;
pub use transport::{DisconnectSignal, TcpTransport, TcpTransportFactory, Transport, TransportFactory};
pub use will::Will;
