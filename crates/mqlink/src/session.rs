//! Session record.
//!
//! Everything mutable about one connection lives in [`SessionState`] behind a
//! single lock. The public API, the receive loop, the disconnect notifier and
//! the packet dispatcher (which runs inside whichever of those is pumping the
//! engine) all go through that lock.

use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::{Mutex, MutexGuard};

use crate::callback::EventHandler;
use crate::dispatch::Dispatcher;
use crate::engine::{EngineContext, ProtocolEngine};
use crate::error::EngineError;
use crate::events::{ConnectionState, DisconnectReason, MqttEvent};
use crate::options::{BrokerInfo, SecurityInfo};
use crate::publish::PublishSlots;
use crate::receive::ReceiveWorker;
use crate::registry::{Registry, SessionHandle};
use crate::subscribe::AckCorrelation;
use crate::transport::Transport;

/// One logical client connection.
pub(crate) struct Session {
    context: EngineContext,
    state: Mutex<SessionState>,
}

impl Session {
    pub(crate) fn new(context: EngineContext, state: SessionState) -> Self {
        Self {
            context,
            state: Mutex::new(state),
        }
    }

    pub(crate) fn context(&self) -> EngineContext {
        self.context
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock()
    }
}

/// Mutable per-session state.
pub(crate) struct SessionState {
    pub(crate) phase: ConnectionState,
    pub(crate) broker: BrokerInfo,
    pub(crate) security: Option<SecurityInfo>,
    pub(crate) engine: Box<dyn ProtocolEngine>,
    /// Present from a successful transport connect until disconnect or rollback.
    pub(crate) transport: Option<Box<dyn Transport>>,
    /// Broker reported a resumed session on the last CONNACK.
    pub(crate) session_present: bool,
    /// Generation of the current link, bumped by every connect. Disconnect
    /// signals raised under an older generation are stale.
    pub(crate) link: u64,
    pub(crate) handler: Box<dyn EventHandler>,
    pub(crate) slots: PublishSlots,
    pub(crate) acks: AckCorrelation,
    pub(crate) receiver: Option<ReceiveWorker>,
}

/// Result of waiting for an acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AckWait {
    Acked,
    TimedOut,
    /// The engine reported a fatal status; the session is now `LinkLost`.
    LinkLost(EngineError),
}

impl SessionState {
    pub(crate) fn new(
        broker: BrokerInfo,
        security: Option<SecurityInfo>,
        engine: Box<dyn ProtocolEngine>,
        handler: Box<dyn EventHandler>,
        max_outgoing_publishes: usize,
        max_topics_per_request: usize,
    ) -> Self {
        Self {
            phase: ConnectionState::Created,
            broker,
            security,
            engine,
            transport: None,
            session_present: false,
            link: 0,
            handler,
            slots: PublishSlots::new(max_outgoing_publishes),
            acks: AckCorrelation::new(max_topics_per_request),
            receiver: None,
        }
    }

    pub(crate) fn is_secure(&self) -> bool {
        self.security.is_some()
    }

    /// Drive one slice of incoming-packet processing.
    pub(crate) fn pump(&mut self, registry: &Registry, timeout: Duration) -> Result<(), EngineError> {
        let SessionState {
            phase,
            engine,
            transport,
            handler,
            slots,
            acks,
            ..
        } = self;
        let io = transport.as_deref_mut().ok_or(EngineError::IllegalState)?;
        let mut sink = Dispatcher::new(registry, phase, slots, acks, &mut **handler);
        engine.process_loop(io, timeout, &mut sink)
    }

    /// Pump the engine until `acked` holds or `timeout` elapses.
    pub(crate) fn wait_for_ack(
        &mut self,
        registry: &Registry,
        handle: SessionHandle,
        timeout: Duration,
        poll: Duration,
        acked: impl Fn(&AckCorrelation) -> bool,
    ) -> AckWait {
        let deadline = Instant::now() + timeout;
        loop {
            if acked(&self.acks) {
                return AckWait::Acked;
            }
            if self.phase != ConnectionState::Established {
                return AckWait::LinkLost(EngineError::IllegalState);
            }
            if Instant::now() >= deadline {
                return AckWait::TimedOut;
            }
            match self.pump(registry, poll) {
                Ok(()) | Err(EngineError::NoDataAvailable) => {}
                Err(e) if e.is_fatal() => {
                    self.link_lost(handle, reason_for(e));
                    return AckWait::LinkLost(e);
                }
                Err(e) => debug!("{}: engine processing returned {}", handle, e),
            }
        }
    }

    /// Report loss of an established session once and mark it `LinkLost`.
    pub(crate) fn link_lost(&mut self, handle: SessionHandle, reason: DisconnectReason) {
        report_link_lost(&mut self.phase, &mut *self.handler, handle, reason);
    }

    /// Release the link: optional protocol DISCONNECT, then transport teardown.
    /// Every step is best-effort.
    pub(crate) fn release_link(&mut self, handle: SessionHandle, send_disconnect: bool) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        if send_disconnect {
            if let Err(e) = self.engine.disconnect(&mut *transport) {
                warn!("{}: DISCONNECT not sent: {}", handle, e);
            }
        }
        if let Err(e) = transport.disconnect() {
            warn!("{}: transport disconnect failed: {}", handle, e);
        }
        debug!("{}: transport released", handle);
    }
}

/// Map a fatal engine status to the reason reported to the application.
pub(crate) fn reason_for(err: EngineError) -> DisconnectReason {
    match err {
        EngineError::KeepAliveTimeout => DisconnectReason::BrokerUnresponsive,
        _ => DisconnectReason::NetworkDown,
    }
}

pub(crate) fn report_link_lost(
    phase: &mut ConnectionState,
    handler: &mut dyn EventHandler,
    handle: SessionHandle,
    reason: DisconnectReason,
) {
    if !phase.is_established() {
        debug!("{}: link loss already reported", handle);
        return;
    }
    *phase = ConnectionState::LinkLost;
    warn!("{}: link lost ({:?})", handle, reason);
    handler.on_event(handle, &MqttEvent::Disconnected(reason));
}
