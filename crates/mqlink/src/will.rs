//! Last-will message carried in CONNECT.

use bytes::Bytes;

use crate::error::ClientError;
use crate::message::QoS;

/// Message the broker publishes on this client's behalf if the link drops
/// without a DISCONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl Will {
    /// Create a new will message with QoS 0 and no retain.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    /// Build a will from a raw QoS byte, rejecting levels above 2.
    pub fn with_raw_qos(
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        qos: u8,
    ) -> crate::Result<Self> {
        let qos = QoS::try_from(qos)
            .map_err(|_| ClientError::InvalidArgument(format!("will QoS {} out of range", qos)))?;
        Ok(Self::new(topic, payload).qos(qos))
    }

    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.topic.is_empty() {
            return Err(ClientError::InvalidArgument("empty will topic".into()));
        }
        Ok(())
    }
}
