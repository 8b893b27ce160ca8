//! Outgoing publish reliability.
//!
//! Each session owns a fixed pool of slots for QoS 1/2 publishes that have
//! been sent but not acknowledged. The pool size bounds how many can be in
//! flight; a publish that finds no free slot fails immediately.
//!
//! Ordering on resend comes from the protocol engine, which remembers the
//! order packet ids were originally sent in. Slots are only looked up by id.

use log::{debug, error, info, warn};

use crate::engine::ResendCursor;
use crate::error::{ClientError, EngineError, Result};
use crate::events::ConnectionState;
use crate::manager::Shared;
use crate::message::PublishMessage;
use crate::registry::SessionHandle;
use crate::session::{reason_for, AckWait, SessionState};

/// A QoS 1/2 publish awaiting acknowledgment.
#[derive(Debug, Clone)]
struct OutgoingPublish {
    packet_id: u16,
    message: PublishMessage,
}

/// Bounded pool of outgoing publish slots.
#[derive(Debug)]
pub(crate) struct PublishSlots {
    slots: Vec<Option<OutgoingPublish>>,
}

impl PublishSlots {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    pub(crate) fn free_index(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    pub(crate) fn occupy(&mut self, index: usize, packet_id: u16, message: PublishMessage) {
        debug_assert!(self.get(packet_id).is_none(), "packet id {} already in flight", packet_id);
        self.slots[index] = Some(OutgoingPublish { packet_id, message });
    }

    pub(crate) fn get(&self, packet_id: u16) -> Option<&PublishMessage> {
        self.slots
            .iter()
            .flatten()
            .find(|slot| slot.packet_id == packet_id)
            .map(|slot| &slot.message)
    }

    fn get_mut(&mut self, packet_id: u16) -> Option<&mut PublishMessage> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|slot| slot.packet_id == packet_id)
            .map(|slot| &mut slot.message)
    }

    /// Free the slot holding `packet_id`. Returns whether one was occupied.
    pub(crate) fn release(&mut self, packet_id: u16) -> bool {
        match self
            .slots
            .iter_mut()
            .find(|slot| matches!(slot, Some(s) if s.packet_id == packet_id))
        {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl SessionState {
    fn send_publish(&mut self, message: &PublishMessage, packet_id: u16) -> std::result::Result<(), EngineError> {
        let io = self.transport.as_deref_mut().ok_or(EngineError::IllegalState)?;
        self.engine.publish(io, message, packet_id)
    }

    /// Publish a message, waiting for its acknowledgment when QoS > 0.
    pub(crate) fn publish(
        &mut self,
        shared: &Shared,
        handle: SessionHandle,
        message: &PublishMessage,
    ) -> Result<()> {
        message.validate()?;
        if self.phase != ConnectionState::Established {
            return Err(ClientError::NotConnected);
        }

        let mut outgoing = message.clone();
        outgoing.dup = false;

        if !outgoing.qos.needs_ack() {
            return match self.send_publish(&outgoing, 0) {
                Ok(()) => Ok(()),
                Err(e) => {
                    if e.is_fatal() {
                        self.link_lost(handle, reason_for(e));
                    }
                    Err(ClientError::PublishFailed(format!("send failed: {}", e)))
                }
            };
        }

        let index = self.slots.free_index().ok_or_else(|| {
            ClientError::PublishFailed(format!(
                "all {} publish slots in flight",
                self.slots.capacity()
            ))
        })?;
        let packet_id = self
            .engine
            .allocate_packet_id()
            .ok_or_else(|| ClientError::PublishFailed("no packet id available".into()))?;
        self.slots.occupy(index, packet_id, outgoing.clone());
        self.acks.expect_publish(packet_id);

        let limits = &shared.config.limits;
        let timeouts = &shared.config.timeouts;
        for attempt in 1..=limits.max_retries {
            if attempt > 1 {
                outgoing.dup = true;
                if let Some(slot) = self.slots.get_mut(packet_id) {
                    slot.dup = true;
                }
            }

            match self.send_publish(&outgoing, packet_id) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    self.link_lost(handle, reason_for(e));
                    return Err(self.publish_interrupted(packet_id, e));
                }
                Err(e) => {
                    warn!(
                        "{}: publish {} attempt {}/{} not sent: {}",
                        handle, packet_id, attempt, limits.max_retries, e
                    );
                    continue;
                }
            }

            match self.wait_for_ack(
                &shared.registry,
                handle,
                timeouts.ack_timeout(),
                timeouts.ack_poll_interval(),
                |acks| acks.is_publish_acked(),
            ) {
                AckWait::Acked => {
                    self.slots.release(packet_id);
                    self.acks.clear_publish();
                    debug!("{}: publish {} complete", handle, packet_id);
                    return Ok(());
                }
                AckWait::TimedOut => warn!(
                    "{}: no ack for publish {} (attempt {}/{})",
                    handle, packet_id, attempt, limits.max_retries
                ),
                AckWait::LinkLost(e) => return Err(self.publish_interrupted(packet_id, e)),
            }
        }

        self.slots.release(packet_id);
        self.acks.clear_publish();
        error!(
            "{}: publish {} failed after {} attempts",
            handle, packet_id, limits.max_retries
        );
        Err(ClientError::PublishFailed(format!(
            "no acknowledgment after {} attempts",
            limits.max_retries
        )))
    }

    /// The link dropped mid-publish. The slot stays occupied so a resumed
    /// session can replay it.
    fn publish_interrupted(&mut self, packet_id: u16, err: EngineError) -> ClientError {
        self.acks.clear_publish();
        ClientError::PublishFailed(format!(
            "link lost while publishing {}: {}",
            packet_id, err
        ))
    }

    /// Replay unacknowledged publishes in the order they were first sent.
    pub(crate) fn resend(&mut self, handle: SessionHandle) -> Result<()> {
        let mut cursor = ResendCursor::default();
        let mut count = 0;
        while let Some(packet_id) = self.engine.next_publish_to_resend(&mut cursor) {
            let Some(message) = self.slots.get_mut(packet_id) else {
                error!("{}: engine lists publish {} with no slot", handle, packet_id);
                return Err(ClientError::PublishFailed(format!(
                    "no outgoing slot for packet id {}",
                    packet_id
                )));
            };
            if !message.qos.needs_ack() {
                continue;
            }
            message.dup = true;
            let message = message.clone();
            self.send_publish(&message, packet_id).map_err(|e| {
                ClientError::PublishFailed(format!("resend of {} failed: {}", packet_id, e))
            })?;
            count += 1;
        }
        if count > 0 {
            info!("{}: resent {} unacknowledged publishes", handle, count);
        }
        Ok(())
    }

    /// Drop every tracked publish. Used when the broker starts a clean session.
    pub(crate) fn cleanup_all(&mut self, handle: SessionHandle) {
        let dropped = self.slots.in_flight();
        self.slots.clear();
        self.acks.clear_publish();
        if dropped > 0 {
            info!("{}: discarded {} unacknowledged publishes", handle, dropped);
        }
    }
}
