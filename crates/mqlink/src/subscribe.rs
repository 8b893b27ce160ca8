//! Acknowledgment correlation for publish, subscribe and unsubscribe.
//!
//! The session lock serializes requests, so each kind has at most one
//! outstanding packet id at a time. The dispatcher fills in results as acks
//! arrive; the waiting call polls them.

use log::{debug, error, info, warn};

use crate::error::{ClientError, EngineError, Result};
use crate::events::ConnectionState;
use crate::manager::Shared;
use crate::message::{SubscribeOutcome, SubscribeRequest};
use crate::registry::SessionHandle;
use crate::session::{reason_for, AckWait, SessionState};

/// Pending-ack record of one session.
#[derive(Debug)]
pub(crate) struct AckCorrelation {
    publish_id: u16,
    publish_acked: bool,
    /// Last SUBSCRIBE/UNSUBSCRIBE packet id sent.
    request_id: u16,
    outcomes: Vec<SubscribeOutcome>,
    awaiting: usize,
    unsubscribe_acked: bool,
}

impl AckCorrelation {
    pub(crate) fn new(max_topics: usize) -> Self {
        Self {
            publish_id: 0,
            publish_acked: false,
            request_id: 0,
            outcomes: vec![SubscribeOutcome::Rejected; max_topics],
            awaiting: 0,
            unsubscribe_acked: false,
        }
    }

    pub(crate) fn expect_publish(&mut self, packet_id: u16) {
        self.publish_id = packet_id;
        self.publish_acked = false;
    }

    pub(crate) fn publish_acked(&mut self, packet_id: u16, ok: bool) {
        if packet_id != 0 && packet_id == self.publish_id {
            self.publish_acked = ok;
        }
    }

    pub(crate) fn is_publish_acked(&self) -> bool {
        self.publish_acked
    }

    pub(crate) fn clear_publish(&mut self) {
        self.publish_id = 0;
        self.publish_acked = false;
    }

    pub(crate) fn begin_subscribe(&mut self, packet_id: u16, topics: usize) {
        self.request_id = packet_id;
        self.outcomes.iter_mut().for_each(|o| *o = SubscribeOutcome::Rejected);
        self.awaiting = topics;
    }

    /// Record a SUBACK. Returns false if it does not answer the outstanding request.
    pub(crate) fn subscribe_acked(&mut self, packet_id: u16, outcomes: &[SubscribeOutcome]) -> bool {
        if packet_id != self.request_id || self.awaiting == 0 {
            return false;
        }
        if outcomes.len() != self.awaiting {
            error!(
                "SUBACK {} carries {} codes for {} topics",
                packet_id,
                outcomes.len(),
                self.awaiting
            );
        } else {
            self.outcomes[..outcomes.len()].copy_from_slice(outcomes);
        }
        self.awaiting = 0;
        true
    }

    pub(crate) fn awaiting(&self) -> usize {
        self.awaiting
    }

    pub(crate) fn outcomes(&self, topics: usize) -> Vec<SubscribeOutcome> {
        self.outcomes[..topics].to_vec()
    }

    pub(crate) fn begin_unsubscribe(&mut self, packet_id: u16) {
        self.request_id = packet_id;
        self.unsubscribe_acked = false;
    }

    pub(crate) fn unsubscribe_acked(&mut self, packet_id: u16) {
        self.unsubscribe_acked = packet_id == self.request_id;
    }

    pub(crate) fn is_unsubscribe_acked(&self) -> bool {
        self.unsubscribe_acked
    }
}

impl SessionState {
    fn check_topic_count(&self, shared: &Shared, count: usize) -> Result<()> {
        let max = shared.config.limits.max_topics_per_request;
        if count == 0 || count > max {
            return Err(ClientError::InvalidArgument(format!(
                "{} topics requested, expected 1..={}",
                count, max
            )));
        }
        Ok(())
    }

    /// Subscribe to a batch of topic filters. Succeeds if the broker grants
    /// at least one of them.
    pub(crate) fn subscribe(
        &mut self,
        shared: &Shared,
        handle: SessionHandle,
        requests: &[SubscribeRequest],
    ) -> Result<Vec<SubscribeOutcome>> {
        self.check_topic_count(shared, requests.len())?;
        if requests.iter().any(|r| r.topic.is_empty()) {
            return Err(ClientError::InvalidArgument("empty topic filter".into()));
        }
        if self.phase != ConnectionState::Established {
            return Err(ClientError::NotConnected);
        }

        let max_retries = shared.config.limits.max_retries;
        let timeouts = &shared.config.timeouts;
        for attempt in 1..=max_retries {
            let packet_id = self
                .engine
                .allocate_packet_id()
                .ok_or_else(|| ClientError::SubscribeFailed("no packet id available".into()))?;
            self.acks.begin_subscribe(packet_id, requests.len());

            let sent = match self.transport.as_deref_mut() {
                Some(io) => self.engine.subscribe(io, requests, packet_id),
                None => Err(EngineError::IllegalState),
            };
            match sent {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    self.link_lost(handle, reason_for(e));
                    return Err(ClientError::SubscribeFailed(format!("link lost: {}", e)));
                }
                Err(e) => {
                    warn!("{}: SUBSCRIBE attempt {}/{} not sent: {}", handle, attempt, max_retries, e);
                    continue;
                }
            }

            match self.wait_for_ack(
                &shared.registry,
                handle,
                timeouts.ack_timeout(),
                timeouts.ack_poll_interval(),
                |acks| acks.awaiting() == 0,
            ) {
                AckWait::Acked => {
                    let outcomes = self.acks.outcomes(requests.len());
                    let granted = outcomes.iter().filter(|o| o.granted().is_some()).count();
                    if granted == 0 {
                        return Err(ClientError::SubscribeFailed(
                            "broker rejected every topic".into(),
                        ));
                    }
                    info!(
                        "{}: subscribed, {}/{} topics granted",
                        handle,
                        granted,
                        requests.len()
                    );
                    return Ok(outcomes);
                }
                AckWait::TimedOut => warn!(
                    "{}: no SUBACK for {} (attempt {}/{})",
                    handle, packet_id, attempt, max_retries
                ),
                AckWait::LinkLost(e) => {
                    return Err(ClientError::SubscribeFailed(format!("link lost: {}", e)))
                }
            }
        }

        self.acks.begin_subscribe(0, 0);
        Err(ClientError::SubscribeFailed(format!(
            "no SUBACK after {} attempts",
            max_retries
        )))
    }

    /// Unsubscribe from a batch of topic filters.
    pub(crate) fn unsubscribe(
        &mut self,
        shared: &Shared,
        handle: SessionHandle,
        topics: &[String],
    ) -> Result<()> {
        self.check_topic_count(shared, topics.len())?;
        if topics.iter().any(|t| t.is_empty()) {
            return Err(ClientError::InvalidArgument("empty topic filter".into()));
        }
        if self.phase != ConnectionState::Established {
            return Err(ClientError::NotConnected);
        }

        let max_retries = shared.config.limits.max_retries;
        let timeouts = &shared.config.timeouts;
        for attempt in 1..=max_retries {
            let packet_id = self
                .engine
                .allocate_packet_id()
                .ok_or_else(|| ClientError::UnsubscribeFailed("no packet id available".into()))?;
            self.acks.begin_unsubscribe(packet_id);

            let sent = match self.transport.as_deref_mut() {
                Some(io) => self.engine.unsubscribe(io, topics, packet_id),
                None => Err(EngineError::IllegalState),
            };
            match sent {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    self.link_lost(handle, reason_for(e));
                    return Err(ClientError::UnsubscribeFailed(format!("link lost: {}", e)));
                }
                Err(e) => {
                    warn!("{}: UNSUBSCRIBE attempt {}/{} not sent: {}", handle, attempt, max_retries, e);
                    continue;
                }
            }

            match self.wait_for_ack(
                &shared.registry,
                handle,
                timeouts.ack_timeout(),
                timeouts.ack_poll_interval(),
                |acks| acks.is_unsubscribe_acked(),
            ) {
                AckWait::Acked => {
                    debug!("{}: unsubscribed from {} topics", handle, topics.len());
                    return Ok(());
                }
                AckWait::TimedOut => warn!(
                    "{}: no UNSUBACK for {} (attempt {}/{})",
                    handle, packet_id, attempt, max_retries
                ),
                AckWait::LinkLost(e) => {
                    return Err(ClientError::UnsubscribeFailed(format!("link lost: {}", e)))
                }
            }
        }

        Err(ClientError::UnsubscribeFailed(format!(
            "no UNSUBACK after {} attempts",
            max_retries
        )))
    }
}
