//! Transport contract and the disconnect signal that links it to the notifier.
//!
//! A transport is created per connect attempt and deleted by dropping it.
//! When it notices the link has gone away on its own it calls
//! [`DisconnectSignal::notify`], which only enqueues; session state is
//! updated later by the notifier thread.

mod tcp;
#[cfg(feature = "tls")]
mod tls;

use std::io;
use std::time::Duration;

use crossbeam_channel::{SendTimeoutError, Sender};
use log::{debug, warn};

use crate::error::Result;
use crate::options::{BrokerInfo, SecurityInfo};
use crate::registry::SessionHandle;

pub use tcp::{TcpTransport, TcpTransportFactory};
#[cfg(feature = "tls")]
pub use tls::build_client_config;

/// Socket-like byte stream to the broker.
pub trait Transport: Send {
    /// Open the connection, including any TLS handshake.
    fn connect(&mut self, send_timeout: Duration, recv_timeout: Duration) -> Result<()>;

    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Read available bytes. `Ok(0)` means nothing arrived within the receive timeout.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Close the connection. Does not raise the disconnect signal.
    fn disconnect(&mut self) -> Result<()>;
}

/// Creates a transport for one connect attempt.
pub trait TransportFactory: Send + Sync {
    fn create(
        &self,
        broker: &BrokerInfo,
        security: Option<&SecurityInfo>,
        signal: DisconnectSignal,
    ) -> Result<Box<dyn Transport>>;
}

/// Queued report of an abrupt disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LinkDown {
    pub(crate) handle: SessionHandle,
    /// Link generation the reporting transport was connected under.
    pub(crate) link: u64,
}

/// Raises an abrupt-disconnect event for one session.
#[derive(Debug, Clone)]
pub struct DisconnectSignal {
    handle: SessionHandle,
    link: u64,
    queue: Sender<LinkDown>,
    timeout: Duration,
}

impl DisconnectSignal {
    pub(crate) fn new(
        handle: SessionHandle,
        link: u64,
        queue: Sender<LinkDown>,
        timeout: Duration,
    ) -> Self {
        Self {
            handle,
            link,
            queue,
            timeout,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    /// Enqueue the event, waiting at most the configured queue timeout.
    pub fn notify(&self) {
        let event = LinkDown {
            handle: self.handle,
            link: self.link,
        };
        match self.queue.send_timeout(event, self.timeout) {
            Ok(()) => debug!("Queued disconnect event for {}", self.handle),
            Err(SendTimeoutError::Timeout(_)) => {
                warn!("Disconnect queue full, dropping event for {}", self.handle)
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                debug!("Disconnect notifier stopped, dropping event for {}", self.handle)
            }
        }
    }
}
