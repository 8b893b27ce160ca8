//! Timeouts and poll intervals.

use std::time::Duration;

use serde::Deserialize;

/// Per-attempt wait for a PUBACK/PUBREC, SUBACK or UNSUBACK.
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 3000;

/// Engine processing slice used while waiting for an ack.
pub const DEFAULT_ACK_POLL_INTERVAL_MS: u64 = 1;

/// Wait for CONNACK after sending CONNECT.
pub const DEFAULT_CONNACK_TIMEOUT_MS: u64 = 2000;

/// Transport send timeout.
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 3000;

/// Transport receive timeout. Kept short so engine processing slices stay bounded.
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 1;

/// Sleep between receive loop passes.
pub const DEFAULT_RECEIVE_POLL_INTERVAL_MS: u64 = 100;

/// How long a transport callback may wait for room in the disconnect queue.
pub const DEFAULT_DISCONNECT_QUEUE_TIMEOUT_MS: u64 = 500;

/// Timeout settings, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    #[serde(default = "default_ack_poll_interval_ms")]
    pub ack_poll_interval_ms: u64,

    #[serde(default = "default_connack_timeout_ms")]
    pub connack_timeout_ms: u64,

    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,

    #[serde(default = "default_receive_poll_interval_ms")]
    pub receive_poll_interval_ms: u64,

    #[serde(default = "default_disconnect_queue_timeout_ms")]
    pub disconnect_queue_timeout_ms: u64,
}

fn default_ack_timeout_ms() -> u64 {
    DEFAULT_ACK_TIMEOUT_MS
}
fn default_ack_poll_interval_ms() -> u64 {
    DEFAULT_ACK_POLL_INTERVAL_MS
}
fn default_connack_timeout_ms() -> u64 {
    DEFAULT_CONNACK_TIMEOUT_MS
}
fn default_send_timeout_ms() -> u64 {
    DEFAULT_SEND_TIMEOUT_MS
}
fn default_receive_timeout_ms() -> u64 {
    DEFAULT_RECEIVE_TIMEOUT_MS
}
fn default_receive_poll_interval_ms() -> u64 {
    DEFAULT_RECEIVE_POLL_INTERVAL_MS
}
fn default_disconnect_queue_timeout_ms() -> u64 {
    DEFAULT_DISCONNECT_QUEUE_TIMEOUT_MS
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            ack_poll_interval_ms: DEFAULT_ACK_POLL_INTERVAL_MS,
            connack_timeout_ms: DEFAULT_CONNACK_TIMEOUT_MS,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            receive_timeout_ms: DEFAULT_RECEIVE_TIMEOUT_MS,
            receive_poll_interval_ms: DEFAULT_RECEIVE_POLL_INTERVAL_MS,
            disconnect_queue_timeout_ms: DEFAULT_DISCONNECT_QUEUE_TIMEOUT_MS,
        }
    }
}

impl TimeoutConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn ack_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ack_poll_interval_ms)
    }

    pub fn connack_timeout(&self) -> Duration {
        Duration::from_millis(self.connack_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn receive_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receive_poll_interval_ms)
    }

    pub fn disconnect_queue_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_queue_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.ack_timeout_ms == 0 {
            return Err("timeouts.ack_timeout_ms must be non-zero".into());
        }
        if self.connack_timeout_ms == 0 {
            return Err("timeouts.connack_timeout_ms must be non-zero".into());
        }
        if self.ack_poll_interval_ms > self.ack_timeout_ms {
            return Err("timeouts.ack_poll_interval_ms exceeds ack_timeout_ms".into());
        }
        Ok(())
    }
}
