//! Capacity limits.

use serde::Deserialize;

/// Default maximum number of live sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 2;

/// Default maximum QoS 1/2 publishes awaiting acknowledgment per session.
pub const DEFAULT_MAX_OUTGOING_PUBLISHES: usize = 2;

/// Default maximum topics in one subscribe or unsubscribe request.
pub const DEFAULT_MAX_TOPICS_PER_REQUEST: usize = 5;

/// Default maximum send attempts for publish, subscribe and unsubscribe.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Smallest network buffer accepted when creating a session.
pub const DEFAULT_MIN_NETWORK_BUFFER_SIZE: usize = 256;

/// Capacity limits, fixed when the manager is initialized.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Registry capacity. `create` fails once this many handles are live.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Size of the outgoing publish slot pool per session.
    #[serde(default = "default_max_outgoing_publishes")]
    pub max_outgoing_publishes: usize,

    /// Upper bound on topics per (un)subscribe call.
    #[serde(default = "default_max_topics_per_request")]
    pub max_topics_per_request: usize,

    /// Attempts per publish/subscribe/unsubscribe. The last attempt is number `max_retries`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_min_network_buffer_size")]
    pub min_network_buffer_size: usize,
}

fn default_max_sessions() -> usize {
    DEFAULT_MAX_SESSIONS
}
fn default_max_outgoing_publishes() -> usize {
    DEFAULT_MAX_OUTGOING_PUBLISHES
}
fn default_max_topics_per_request() -> usize {
    DEFAULT_MAX_TOPICS_PER_REQUEST
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_min_network_buffer_size() -> usize {
    DEFAULT_MIN_NETWORK_BUFFER_SIZE
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            max_outgoing_publishes: DEFAULT_MAX_OUTGOING_PUBLISHES,
            max_topics_per_request: DEFAULT_MAX_TOPICS_PER_REQUEST,
            max_retries: DEFAULT_MAX_RETRIES,
            min_network_buffer_size: DEFAULT_MIN_NETWORK_BUFFER_SIZE,
        }
    }
}

impl LimitsConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_sessions == 0 {
            return Err("limits.max_sessions must be at least 1".into());
        }
        if self.max_outgoing_publishes == 0 {
            return Err("limits.max_outgoing_publishes must be at least 1".into());
        }
        if self.max_topics_per_request == 0 {
            return Err("limits.max_topics_per_request must be at least 1".into());
        }
        if self.max_retries == 0 {
            return Err("limits.max_retries must be at least 1".into());
        }
        Ok(())
    }
}
