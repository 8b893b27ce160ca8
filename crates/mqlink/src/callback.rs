//! Application callback.
//!
//! The handler of a session is invoked synchronously by whichever thread is
//! holding that session's lock at the time: the receive loop, the disconnect
//! notifier, or an API call that is pumping the protocol engine while it waits
//! for an acknowledgment.
//!
//! Handlers must return promptly and must not call back into the
//! [`SessionManager`](crate::SessionManager) for the same session; doing so
//! deadlocks on the session lock. State the application wants to carry between
//! events lives in the handler itself.

use crate::events::{DisconnectReason, MqttEvent, ReceivedMessage};
use crate::registry::SessionHandle;

/// Handler trait for session events.
///
/// All methods have default implementations that do nothing.
pub trait EventHandler: Send {
    /// Called when a PUBLISH arrives from the broker.
    #[allow(unused_variables)]
    fn on_message(&mut self, handle: SessionHandle, message: &ReceivedMessage) {}

    /// Called once when an established session is lost.
    #[allow(unused_variables)]
    fn on_disconnect(&mut self, handle: SessionHandle, reason: DisconnectReason) {}

    /// Entry point used by the library. Routes to the methods above.
    fn on_event(&mut self, handle: SessionHandle, event: &MqttEvent) {
        match event {
            MqttEvent::Message(message) => self.on_message(handle, message),
            MqttEvent::Disconnected(reason) => self.on_disconnect(handle, *reason),
        }
    }
}

impl<F> EventHandler for F
where
    F: FnMut(SessionHandle, &MqttEvent) + Send,
{
    fn on_event(&mut self, handle: SessionHandle, event: &MqttEvent) {
        self(handle, event)
    }
}
