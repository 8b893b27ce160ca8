//! Blocking TCP transport, optionally wrapped in TLS.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
#[cfg(feature = "tls")]
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
#[cfg(feature = "tls")]
use rustls::{pki_types::ServerName, ClientConnection, StreamOwned};

use super::{DisconnectSignal, Transport, TransportFactory};
use crate::error::{ClientError, Result};
use crate::options::{BrokerInfo, SecurityInfo};

enum Stream {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Stream {
    fn tcp(&self) -> &TcpStream {
        match self {
            Stream::Plain(s) => s,
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.get_ref(),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(s) => s.read(buf),
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(s) => s.write(buf),
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Plain(s) => s.flush(),
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.flush(),
        }
    }
}

/// TCP (or TLS over TCP) connection to one broker.
pub struct TcpTransport {
    broker: BrokerInfo,
    #[cfg(feature = "tls")]
    tls: Option<(Arc<rustls::ClientConfig>, ServerName<'static>)>,
    stream: Option<Stream>,
    signal: DisconnectSignal,
    signalled: bool,
}

impl TcpTransport {
    pub fn new(
        broker: &BrokerInfo,
        security: Option<&SecurityInfo>,
        signal: DisconnectSignal,
    ) -> Result<Self> {
        #[cfg(feature = "tls")]
        let tls = match security {
            Some(security) => {
                let config = super::tls::build_client_config(security)?;
                let name = security
                    .sni_host_name
                    .clone()
                    .unwrap_or_else(|| broker.host.clone());
                let server_name = ServerName::try_from(name.clone())
                    .map_err(|_| ClientError::Tls(format!("Invalid server name: {}", name)))?;
                Some((Arc::new(config), server_name))
            }
            None => None,
        };
        #[cfg(not(feature = "tls"))]
        if security.is_some() {
            return Err(ClientError::Tls("built without the tls feature".into()));
        }

        Ok(Self {
            broker: broker.clone(),
            #[cfg(feature = "tls")]
            tls,
            stream: None,
            signal,
            signalled: false,
        })
    }

    #[cfg(feature = "tls")]
    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }

    #[cfg(not(feature = "tls"))]
    pub fn is_secure(&self) -> bool {
        false
    }

    fn open_tcp(&self, timeout: Duration) -> Result<TcpStream> {
        let mut last_err = None;
        for addr in self.broker.address().to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!("Connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err
            .map(ClientError::Io)
            .unwrap_or_else(|| {
                ClientError::ConnectFailed(format!("{} did not resolve", self.broker.address()))
            }))
    }

    /// Report the link down once per connection.
    fn link_lost(&mut self, err: &io::Error) {
        if !self.signalled {
            self.signalled = true;
            warn!("Connection to {} lost: {}", self.broker.address(), err);
            self.signal.notify();
        }
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, send_timeout: Duration, recv_timeout: Duration) -> Result<()> {
        let tcp = self.open_tcp(send_timeout)?;
        tcp.set_nodelay(true)?;
        tcp.set_write_timeout(Some(send_timeout))?;

        #[cfg(feature = "tls")]
        let stream = match &self.tls {
            Some((config, server_name)) => {
                let conn = ClientConnection::new(config.clone(), server_name.clone())
                    .map_err(|e| ClientError::Tls(e.to_string()))?;
                let mut tls = StreamOwned::new(conn, tcp);
                // Handshake with the send timeout, then fall back to short reads.
                tls.sock.set_read_timeout(Some(send_timeout))?;
                while tls.conn.is_handshaking() {
                    tls.conn
                        .complete_io(&mut tls.sock)
                        .map_err(|e| ClientError::Tls(format!("Handshake failed: {}", e)))?;
                }
                Stream::Tls(Box::new(tls))
            }
            None => Stream::Plain(tcp),
        };
        #[cfg(not(feature = "tls"))]
        let stream = Stream::Plain(tcp);

        stream.tcp().set_read_timeout(Some(recv_timeout))?;
        self.stream = Some(stream);
        self.signalled = false;
        debug!(
            "Transport connected to {} (tls: {})",
            self.broker.address(),
            self.is_secure()
        );
        Ok(())
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        let result = stream.write_all(buf).and_then(|_| stream.flush());
        match result {
            Ok(()) => Ok(buf.len()),
            Err(e) => {
                self.link_lost(&e);
                Err(e)
            }
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        match stream.read(buf) {
            Ok(0) if !buf.is_empty() => {
                let err = io::Error::new(io::ErrorKind::ConnectionAborted, "closed by peer");
                self.link_lost(&err);
                Err(err)
            }
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(0)
            }
            Err(e) => {
                self.link_lost(&e);
                Err(e)
            }
        }
    }

    fn disconnect(&mut self) -> Result<()> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        match stream {
            #[cfg(feature = "tls")]
            Stream::Tls(mut tls) => {
                tls.conn.send_close_notify();
                if let Err(e) = tls.conn.complete_io(&mut tls.sock) {
                    debug!("close_notify not delivered: {}", e);
                }
                tls.sock.shutdown(Shutdown::Both)?;
            }
            Stream::Plain(tcp) => tcp.shutdown(Shutdown::Both)?,
        }
        Ok(())
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport not connected")
}

/// Creates [`TcpTransport`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransportFactory;

impl TransportFactory for TcpTransportFactory {
    fn create(
        &self,
        broker: &BrokerInfo,
        security: Option<&SecurityInfo>,
        signal: DisconnectSignal,
    ) -> Result<Box<dyn Transport>> {
        Ok(Box::new(TcpTransport::new(broker, security, signal)?))
    }
}
