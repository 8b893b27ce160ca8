//! Message types shared by the public API and the protocol engine.

use bytes::Bytes;

use crate::error::ClientError;

/// Quality of Service levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = ClientError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(ClientError::InvalidArgument(format!(
                "Invalid QoS: {}",
                value
            ))),
        }
    }
}

impl QoS {
    /// Whether a publish at this level has to be tracked until acknowledged.
    pub fn needs_ack(self) -> bool {
        self != QoS::AtMostOnce
    }
}

/// An outgoing publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    /// Set by the library on retransmission.
    pub dup: bool,
    pub retain: bool,
}

impl PublishMessage {
    /// Create a QoS 0, non-retained publish.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            dup: false,
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

    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.topic.is_empty() {
            return Err(ClientError::InvalidArgument("empty publish topic".into()));
        }
        if self.topic.contains(['+', '#']) {
            return Err(ClientError::InvalidArgument(format!(
                "wildcards are not allowed in publish topic '{}'",
                self.topic
            )));
        }
        Ok(())
    }
}

/// One topic filter of a SUBSCRIBE request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub topic: String,
    pub qos: QoS,
}

impl SubscribeRequest {
    pub fn new(topic: impl Into<String>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            qos,
        }
    }
}

/// Per-topic result of a SUBSCRIBE, as reported by the broker's SUBACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscribeOutcome {
    Granted(QoS),
    #[default]
    Rejected,
}

impl SubscribeOutcome {
    /// Decode a SUBACK return code (0x00-0x02 granted, anything else rejected).
    pub fn from_code(code: u8) -> Self {
        QoS::try_from(code)
            .map(SubscribeOutcome::Granted)
            .unwrap_or(SubscribeOutcome::Rejected)
    }

    pub fn granted(self) -> Option<QoS> {
        match self {
            SubscribeOutcome::Granted(qos) => Some(qos),
            SubscribeOutcome::Rejected => None,
        }
    }
}
