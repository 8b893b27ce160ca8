//! Per-session options supplied by the application.

use bytes::Bytes;

use crate::error::ClientError;
use crate::will::Will;

/// Broker endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerInfo {
    pub host: String,
    pub port: u16,
}

impl BrokerInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port`, suitable for `ToSocketAddrs`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// TLS material for a secure session.
///
/// Certificates and keys are PEM blobs. [`Bytes`] is reference counted, so the
/// session shares the caller's buffers instead of copying them.
#[derive(Debug, Clone, Default)]
pub struct SecurityInfo {
    /// CA certificate(s) used to verify the broker. Falls back to the webpki roots.
    pub root_ca: Option<Bytes>,
    /// Client certificate chain for mutual TLS.
    pub client_cert: Option<Bytes>,
    /// Private key matching `client_cert`.
    pub private_key: Option<Bytes>,
    /// Server name sent in SNI and checked against the certificate. Defaults to the broker host.
    pub sni_host_name: Option<String>,
    /// ALPN protocol names, e.g. `x-amzn-mqtt-ca`.
    pub alpn_protocols: Vec<String>,
    /// Skip certificate verification. Only for testing against self-signed brokers.
    pub accept_invalid_certs: bool,
}

impl SecurityInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root_ca(mut self, pem: impl Into<Bytes>) -> Self {
        self.root_ca = Some(pem.into());
        self
    }

    pub fn client_auth(mut self, cert_pem: impl Into<Bytes>, key_pem: impl Into<Bytes>) -> Self {
        self.client_cert = Some(cert_pem.into());
        self.private_key = Some(key_pem.into());
        self
    }

    pub fn sni_host_name(mut self, name: impl Into<String>) -> Self {
        self.sni_host_name = Some(name.into());
        self
    }

    pub fn alpn(mut self, protocol: impl Into<String>) -> Self {
        self.alpn_protocols.push(protocol.into());
        self
    }

    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.client_cert.is_some() != self.private_key.is_some() {
            return Err(ClientError::InvalidArgument(
                "client certificate and private key must be supplied together".into(),
            ));
        }
        Ok(())
    }
}

/// Arguments to [`SessionManager::create`](crate::SessionManager::create).
#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub broker: BrokerInfo,
    /// `None` selects a plain TCP connection.
    pub security: Option<SecurityInfo>,
    /// Size of the protocol engine's packet buffer.
    pub network_buffer_size: usize,
}

impl CreateOptions {
    pub fn new(broker: BrokerInfo, network_buffer_size: usize) -> Self {
        Self {
            broker,
            security: None,
            network_buffer_size,
        }
    }

    pub fn security(mut self, security: SecurityInfo) -> Self {
        self.security = Some(security);
        self
    }
}

/// CONNECT parameters.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Client identifier.
    pub client_id: String,
    /// Username for authentication.
    pub username: Option<String>,
    /// Password for authentication.
    pub password: Option<Bytes>,
    /// Keep-alive interval in seconds (0 = disabled).
    pub keep_alive: u16,
    /// Ask the broker to discard any stored session state.
    pub clean_session: bool,
    pub will: Option<Will>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            username: None,
            password: None,
            keep_alive: 60,
            clean_session: true,
            will: None,
        }
    }
}

impl ConnectOptions {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Default::default()
        }
    }

    /// Set username and password.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<Bytes>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set keep-alive interval in seconds.
    pub fn keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive = seconds;
        self
    }

    pub fn clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    pub fn will(mut self, will: Will) -> Self {
        self.will = Some(will);
        self
    }

    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.client_id.is_empty() && !self.clean_session {
            return Err(ClientError::InvalidArgument(
                "a resumable session needs a client id".into(),
            ));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(ClientError::InvalidArgument(
                "password given without username".into(),
            ));
        }
        if let Some(will) = &self.will {
            will.validate()?;
        }
        Ok(())
    }
}
