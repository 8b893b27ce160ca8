//! Session manager: the public entry point.
//!
//! Owns the handle registry, the disconnect queue and its notifier thread.
//! Every operation resolves its handle through the registry and then works
//! under that session's lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, info, warn};

use crate::callback::EventHandler;
use crate::config::LibraryConfig;
use crate::connect;
use crate::engine::{EngineContext, EngineFactory};
use crate::error::{ClientError, EngineError, Result};
use crate::events::ConnectionState;
use crate::message::{PublishMessage, SubscribeOutcome, SubscribeRequest};
use crate::notifier::Notifier;
use crate::options::{ConnectOptions, CreateOptions};
use crate::registry::{Registry, SessionHandle};
use crate::session::{Session, SessionState};
use crate::transport::{LinkDown, TcpTransportFactory, TransportFactory};

/// State reachable from every library thread.
pub(crate) struct Shared {
    pub(crate) config: LibraryConfig,
    pub(crate) registry: Registry,
    /// Producer side of the disconnect queue.
    pub(crate) events: Sender<LinkDown>,
}

impl Shared {
    pub(crate) fn new(config: LibraryConfig) -> (Self, Receiver<LinkDown>) {
        let capacity = config.limits.max_sessions;
        let (events, queue) = bounded(capacity);
        let shared = Self {
            config,
            registry: Registry::new(capacity),
            events,
        };
        (shared, queue)
    }
}

/// Manages a bounded set of client sessions.
///
/// Dropping the manager disconnects and deletes any sessions still alive.
pub struct SessionManager {
    shared: Arc<Shared>,
    engines: Arc<dyn EngineFactory>,
    transports: Arc<dyn TransportFactory>,
    notifier: Option<Notifier>,
    next_context: AtomicU64,
}

impl SessionManager {
    /// Validate `config` and start the disconnect notifier.
    pub fn init(
        config: LibraryConfig,
        engines: Arc<dyn EngineFactory>,
        transports: Arc<dyn TransportFactory>,
    ) -> Result<Self> {
        config.validate()?;
        let (shared, queue) = Shared::new(config);
        let shared = Arc::new(shared);
        let notifier = Notifier::spawn(Arc::clone(&shared), queue)?;
        info!(
            "Session manager ready ({} sessions, {} publishes in flight per session)",
            shared.config.limits.max_sessions, shared.config.limits.max_outgoing_publishes
        );
        Ok(Self {
            shared,
            engines,
            transports,
            notifier: Some(notifier),
            next_context: AtomicU64::new(1),
        })
    }

    /// Like [`init`](Self::init) with the built-in TCP/TLS transport.
    pub fn with_tcp(config: LibraryConfig, engines: Arc<dyn EngineFactory>) -> Result<Self> {
        Self::init(config, engines, Arc::new(TcpTransportFactory))
    }

    /// Stop the notifier. Fails while any session is still registered.
    pub fn deinit(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        let live = self.shared.registry.len();
        if live > 0 {
            return Err(ClientError::InvalidState(format!(
                "{} sessions still registered",
                live
            )));
        }
        if let Some(mut notifier) = self.notifier.take() {
            notifier.stop();
        }
        info!("Session manager shut down");
        Ok(())
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.shared.config
    }

    /// Allocate a session and its protocol engine. The session starts `Created`.
    pub fn create<H>(&self, options: CreateOptions, handler: H) -> Result<SessionHandle>
    where
        H: EventHandler + 'static,
    {
        self.ensure_initialized()?;
        let limits = &self.shared.config.limits;
        if options.network_buffer_size < limits.min_network_buffer_size {
            return Err(ClientError::InvalidArgument(format!(
                "network buffer of {} bytes, need at least {}",
                options.network_buffer_size, limits.min_network_buffer_size
            )));
        }
        if options.broker.host.is_empty() {
            return Err(ClientError::InvalidArgument("empty broker host".into()));
        }
        if let Some(security) = &options.security {
            security.validate()?;
        }

        let context = EngineContext(self.next_context.fetch_add(1, Ordering::Relaxed));
        let engine = self
            .engines
            .create(context, options.network_buffer_size)
            .map_err(|e| match e {
                EngineError::NoMemory => ClientError::OutOfMemory,
                other => ClientError::Internal(format!("protocol engine init: {}", other)),
            })?;

        let state = SessionState::new(
            options.broker,
            options.security,
            engine,
            Box::new(handler),
            limits.max_outgoing_publishes,
            limits.max_topics_per_request,
        );
        let session = Arc::new(Session::new(context, state));
        let handle = self
            .shared
            .registry
            .register(session.context(), Arc::clone(&session))?;
        info!("{}: created ({:?})", handle, session.context());
        Ok(handle)
    }

    /// Open the transport and perform the CONNECT handshake.
    ///
    /// Returns whether the broker resumed an existing session. When it did and
    /// `clean_session` is off, unacknowledged publishes are replayed before
    /// this returns; otherwise they are discarded.
    pub fn connect(&self, handle: SessionHandle, options: &ConnectOptions) -> Result<bool> {
        let session = self.session(handle)?;
        connect::connect(&self.shared, &*self.transports, handle, &session, options)
    }

    /// Publish a message. QoS 1/2 publishes block until acknowledged or the
    /// retry budget is spent.
    pub fn publish(&self, handle: SessionHandle, message: &PublishMessage) -> Result<()> {
        let session = self.session(handle)?;
        let mut state = session.lock();
        state.publish(&self.shared, handle, message)
    }

    /// Subscribe to up to `max_topics_per_request` filters. The result has one
    /// outcome per request, in order.
    pub fn subscribe(
        &self,
        handle: SessionHandle,
        requests: &[SubscribeRequest],
    ) -> Result<Vec<SubscribeOutcome>> {
        let session = self.session(handle)?;
        let mut state = session.lock();
        state.subscribe(&self.shared, handle, requests)
    }

    pub fn unsubscribe(&self, handle: SessionHandle, topics: &[String]) -> Result<()> {
        let session = self.session(handle)?;
        let mut state = session.lock();
        state.unsubscribe(&self.shared, handle, topics)
    }

    /// Stop the receive loop and close the link. The session returns to
    /// `Created` and may be connected again. Unacknowledged publishes are kept.
    pub fn disconnect(&self, handle: SessionHandle) -> Result<()> {
        let session = self.session(handle)?;
        let (previous, worker) = {
            let mut state = session.lock();
            if !state.phase.holds_link() {
                return Err(ClientError::NotConnected);
            }
            let previous = state.phase;
            state.phase = ConnectionState::Disconnecting;
            (previous, state.receiver.take())
        };

        if let Some(worker) = worker {
            worker.stop();
        }

        let mut state = session.lock();
        state.release_link(handle, previous == ConnectionState::Established);
        state.session_present = false;
        state.phase = ConnectionState::Created;
        info!("{}: disconnected", handle);
        Ok(())
    }

    /// Release a disconnected session. The handle becomes stale.
    pub fn delete(&self, handle: SessionHandle) -> Result<()> {
        let session = self.session(handle)?;
        let mut state = session.lock();
        if state.phase != ConnectionState::Created {
            return Err(ClientError::InvalidState(format!(
                "delete while {:?}, disconnect first",
                state.phase
            )));
        }
        self.shared.registry.deregister(handle)?;
        state.phase = ConnectionState::Deleted;
        let dropped = state.slots.in_flight();
        if dropped > 0 {
            warn!("{}: deleted with {} unacknowledged publishes", handle, dropped);
        }
        info!("{}: deleted", handle);
        Ok(())
    }

    pub fn state(&self, handle: SessionHandle) -> Result<ConnectionState> {
        Ok(self.session(handle)?.lock().phase)
    }

    pub fn is_connected(&self, handle: SessionHandle) -> bool {
        self.state(handle)
            .map(ConnectionState::is_established)
            .unwrap_or(false)
    }

    /// QoS 1/2 publishes of `handle` still awaiting acknowledgment.
    pub fn in_flight(&self, handle: SessionHandle) -> Result<usize> {
        Ok(self.session(handle)?.lock().slots.in_flight())
    }

    pub fn live_sessions(&self) -> usize {
        self.shared.registry.len()
    }

    fn ensure_initialized(&self) -> Result<()> {
        match self.notifier {
            Some(_) => Ok(()),
            None => Err(ClientError::ObjectNotInitialized),
        }
    }

    fn session(&self, handle: SessionHandle) -> Result<Arc<Session>> {
        self.ensure_initialized()?;
        self.shared.registry.lookup(handle)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if self.notifier.is_none() {
            return;
        }
        for handle in self.shared.registry.handles() {
            if self.state(handle).map_or(false, ConnectionState::holds_link) {
                if let Err(e) = self.disconnect(handle) {
                    warn!("{}: disconnect on shutdown failed: {}", handle, e);
                }
            }
            if let Err(e) = self.delete(handle) {
                warn!("{}: delete on shutdown failed: {}", handle, e);
            }
        }
        if let Some(mut notifier) = self.notifier.take() {
            notifier.stop();
        }
        debug!("Session manager dropped");
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::events::DisconnectReason;
    use crate::message::QoS;
    use crate::options::BrokerInfo;
    use crate::testing::{fast_config, FakeTransports, Recorder, ScriptedBroker};

    fn manager(broker: &ScriptedBroker, transports: &FakeTransports) -> SessionManager {
        SessionManager::init(
            fast_config(),
            Arc::new(broker.clone()),
            Arc::new(transports.clone()),
        )
        .unwrap()
    }

    fn create_options() -> CreateOptions {
        CreateOptions::new(BrokerInfo::new("broker.local", 1883), 1024)
    }

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    #[test]
    fn test_clean_connect_reports_no_session() {
        let broker = ScriptedBroker::new();
        let transports = FakeTransports::new();
        let mgr = manager(&broker, &transports);
        let handle = mgr.create(create_options(), Recorder::default()).unwrap();

        let present = mgr.connect(handle, &ConnectOptions::new("dev-1")).unwrap();
        assert!(!present);
        assert!(mgr.is_connected(handle));
        assert_eq!(mgr.in_flight(handle).unwrap(), 0);

        mgr.disconnect(handle).unwrap();
        assert_eq!(mgr.state(handle).unwrap(), ConnectionState::Created);
        assert_eq!(broker.disconnects(), 1);
        assert_eq!(transports.closed(), 1);
        mgr.delete(handle).unwrap();
    }

    #[test]
    fn test_acked_publish_frees_slot() {
        let broker = ScriptedBroker::new();
        broker.ack_publishes(true);
        let transports = FakeTransports::new();
        let mgr = manager(&broker, &transports);
        let handle = mgr.create(create_options(), Recorder::default()).unwrap();
        mgr.connect(handle, &ConnectOptions::new("dev-1")).unwrap();

        mgr.publish(
            handle,
            &PublishMessage::new("sensors/temp", "21.5").qos(QoS::AtLeastOnce),
        )
        .unwrap();
        assert_eq!(mgr.in_flight(handle).unwrap(), 0);
        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert!(!published[0].1.dup);
    }

    #[test]
    fn test_unacked_publish_retries_then_fails() {
        let broker = ScriptedBroker::new();
        let transports = FakeTransports::new();
        let mgr = manager(&broker, &transports);
        let retries = mgr.config().limits.max_retries as usize;
        let handle = mgr.create(create_options(), Recorder::default()).unwrap();
        mgr.connect(handle, &ConnectOptions::new("dev-1")).unwrap();

        let result = mgr.publish(
            handle,
            &PublishMessage::new("sensors/temp", "21.5").qos(QoS::AtLeastOnce),
        );
        assert!(matches!(result, Err(ClientError::PublishFailed(_))));
        assert_eq!(mgr.in_flight(handle).unwrap(), 0);

        let published = broker.published();
        assert_eq!(published.len(), retries);
        let id = published[0].0;
        assert!(published.iter().all(|(pid, _)| *pid == id));
        assert!(!published[0].1.dup);
        assert!(published[1..].iter().all(|(_, m)| m.dup));
    }

    #[test]
    fn test_partial_subscribe() {
        let broker = ScriptedBroker::new();
        broker.set_suback(vec![
            SubscribeOutcome::Granted(QoS::AtMostOnce),
            SubscribeOutcome::Granted(QoS::AtLeastOnce),
            SubscribeOutcome::Rejected,
        ]);
        let transports = FakeTransports::new();
        let mgr = manager(&broker, &transports);
        let handle = mgr.create(create_options(), Recorder::default()).unwrap();
        mgr.connect(handle, &ConnectOptions::new("dev-1")).unwrap();

        let outcomes = mgr
            .subscribe(
                handle,
                &[
                    SubscribeRequest::new("a", QoS::AtMostOnce),
                    SubscribeRequest::new("b", QoS::AtLeastOnce),
                    SubscribeRequest::new("$SYS/#", QoS::AtMostOnce),
                ],
            )
            .unwrap();
        let granted = outcomes.iter().filter(|o| o.granted().is_some()).count();
        assert_eq!(granted, 2);
        assert_eq!(outcomes[2], SubscribeOutcome::Rejected);
    }

    #[test]
    fn test_abrupt_disconnect_notifies_once() {
        let broker = ScriptedBroker::new();
        let transports = FakeTransports::new();
        let mgr = manager(&broker, &transports);
        let recorder = Recorder::default();
        let handle = mgr.create(create_options(), recorder.clone()).unwrap();
        mgr.connect(handle, &ConnectOptions::new("dev-1")).unwrap();

        let signal = transports.last_signal().unwrap();
        assert_eq!(signal.handle(), handle);
        signal.notify();
        signal.notify();

        assert!(wait_until(|| !mgr.is_connected(handle)));
        // Give the second queued event time to be processed.
        thread::sleep(Duration::from_millis(20));
        assert_eq!(recorder.disconnects(), vec![DisconnectReason::NetworkDown]);
        assert_eq!(mgr.state(handle).unwrap(), ConnectionState::LinkLost);
        assert!(matches!(
            mgr.publish(handle, &PublishMessage::new("t", "x")),
            Err(ClientError::NotConnected)
        ));

        mgr.disconnect(handle).unwrap();
        assert_eq!(broker.disconnects(), 0);
        assert_eq!(transports.closed(), 1);
    }

    #[test]
    fn test_late_signal_from_old_link_is_ignored() {
        let broker = ScriptedBroker::new();
        let transports = FakeTransports::new();
        let mgr = manager(&broker, &transports);
        let recorder = Recorder::default();
        let handle = mgr.create(create_options(), recorder.clone()).unwrap();

        mgr.connect(handle, &ConnectOptions::new("dev-1")).unwrap();
        let old_signal = transports.last_signal().unwrap();
        mgr.disconnect(handle).unwrap();
        mgr.connect(handle, &ConnectOptions::new("dev-1")).unwrap();

        old_signal.notify();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(mgr.state(handle).unwrap(), ConnectionState::Established);
        assert!(recorder.disconnects().is_empty());

        // The current link still reports its own loss.
        transports.last_signal().unwrap().notify();
        assert!(wait_until(|| !mgr.is_connected(handle)));
        assert_eq!(recorder.disconnects(), vec![DisconnectReason::NetworkDown]);
    }

    #[test]
    fn test_registry_full_then_reuse() {
        let broker = ScriptedBroker::new();
        let transports = FakeTransports::new();
        let mgr = manager(&broker, &transports);
        let max = mgr.config().limits.max_sessions;

        let handles: Vec<_> = (0..max)
            .map(|_| mgr.create(create_options(), Recorder::default()).unwrap())
            .collect();
        assert!(matches!(
            mgr.create(create_options(), Recorder::default()),
            Err(ClientError::Internal(_))
        ));

        mgr.delete(handles[0]).unwrap();
        let reused = mgr.create(create_options(), Recorder::default()).unwrap();
        assert_eq!(reused.index(), handles[0].index());
        assert!(matches!(
            mgr.state(handles[0]),
            Err(ClientError::ObjectNotInitialized)
        ));
    }

    #[test]
    fn test_connect_gives_up_after_backoff_budget() {
        let broker = ScriptedBroker::new();
        let transports = FakeTransports::failing(usize::MAX);
        let mgr = manager(&broker, &transports);
        let attempts = mgr.config().backoff.max_attempts as usize;
        let handle = mgr.create(create_options(), Recorder::default()).unwrap();

        assert!(matches!(
            mgr.connect(handle, &ConnectOptions::new("dev-1")),
            Err(ClientError::ConnectFailed(_))
        ));
        assert_eq!(transports.creates(), attempts);
        assert_eq!(mgr.state(handle).unwrap(), ConnectionState::Created);
    }

    #[test]
    fn test_connect_recovers_after_transient_failures() {
        let broker = ScriptedBroker::new();
        let transports = FakeTransports::failing(1);
        let mgr = manager(&broker, &transports);
        let handle = mgr.create(create_options(), Recorder::default()).unwrap();

        mgr.connect(handle, &ConnectOptions::new("dev-1")).unwrap();
        assert_eq!(transports.creates(), 2);
        assert!(mgr.is_connected(handle));
    }

    #[test]
    fn test_refused_handshake_rolls_back() {
        let broker = ScriptedBroker::new();
        broker.connect_error(Some(EngineError::ServerRefused));
        let transports = FakeTransports::new();
        let mgr = manager(&broker, &transports);
        let handle = mgr.create(create_options(), Recorder::default()).unwrap();

        assert!(matches!(
            mgr.connect(handle, &ConnectOptions::new("dev-1")),
            Err(ClientError::ConnectFailed(_))
        ));
        assert_eq!(mgr.state(handle).unwrap(), ConnectionState::Created);
        assert_eq!(transports.closed(), 1);
        assert_eq!(broker.disconnects(), 0);

        broker.connect_error(None);
        mgr.connect(handle, &ConnectOptions::new("dev-1")).unwrap();
    }

    #[test]
    fn test_failed_resend_rolls_back_established_link() {
        let broker = ScriptedBroker::new();
        broker.session_present(true);
        broker.set_resend_order(vec![42]);
        let transports = FakeTransports::new();
        let mgr = manager(&broker, &transports);
        let handle = mgr.create(create_options(), Recorder::default()).unwrap();

        let result = mgr.connect(handle, &ConnectOptions::new("dev-1").clean_session(false));
        assert!(matches!(result, Err(ClientError::PublishFailed(_))));
        assert_eq!(broker.disconnects(), 1);
        assert_eq!(transports.closed(), 1);
        assert_eq!(mgr.state(handle).unwrap(), ConnectionState::Created);
        mgr.delete(handle).unwrap();
    }

    #[test]
    fn test_delete_while_connected_is_rejected() {
        let broker = ScriptedBroker::new();
        let transports = FakeTransports::new();
        let mgr = manager(&broker, &transports);
        let handle = mgr.create(create_options(), Recorder::default()).unwrap();
        mgr.connect(handle, &ConnectOptions::new("dev-1")).unwrap();

        assert!(matches!(
            mgr.delete(handle),
            Err(ClientError::InvalidState(_))
        ));
        assert!(matches!(
            mgr.connect(handle, &ConnectOptions::new("dev-1")),
            Err(ClientError::InvalidState(_))
        ));
        mgr.disconnect(handle).unwrap();
        assert!(matches!(
            mgr.disconnect(handle),
            Err(ClientError::NotConnected)
        ));
        mgr.delete(handle).unwrap();
        assert_eq!(transports.closed(), 1);
    }

    #[test]
    fn test_resumed_session_replays_in_send_order() {
        let broker = ScriptedBroker::new();
        broker.session_present(true);
        let transports = FakeTransports::new();
        let mgr = manager(&broker, &transports);
        let handle = mgr.create(create_options(), Recorder::default()).unwrap();
        let options = ConnectOptions::new("dev-1").clean_session(false);

        for payload in ["one", "two"] {
            mgr.connect(handle, &options).unwrap();
            broker.set_link_failure_on_publish(true);
            assert!(mgr
                .publish(handle, &PublishMessage::new("t", payload).qos(QoS::AtLeastOnce))
                .is_err());
            broker.set_link_failure_on_publish(false);
            mgr.disconnect(handle).unwrap();
        }
        assert_eq!(mgr.in_flight(handle).unwrap(), 2);

        let before = broker.published().len();
        assert!(mgr.connect(handle, &options).unwrap());

        let published = broker.published();
        let replayed = &published[before..];
        let payloads: Vec<&[u8]> = replayed.iter().map(|(_, m)| m.payload.as_ref()).collect();
        assert_eq!(payloads, vec![&b"one"[..], b"two"]);
        assert!(replayed.iter().all(|(_, m)| m.dup));
        assert_eq!(replayed[0].0, published[0].0);
        assert_eq!(mgr.in_flight(handle).unwrap(), 2);
    }

    #[test]
    fn test_clean_reconnect_discards_in_flight() {
        let broker = ScriptedBroker::new();
        broker.set_link_failure_on_publish(true);
        let transports = FakeTransports::new();
        let mgr = manager(&broker, &transports);
        let handle = mgr.create(create_options(), Recorder::default()).unwrap();

        mgr.connect(handle, &ConnectOptions::new("dev-1")).unwrap();
        assert!(mgr
            .publish(handle, &PublishMessage::new("t", "x").qos(QoS::ExactlyOnce))
            .is_err());
        mgr.disconnect(handle).unwrap();
        assert_eq!(mgr.in_flight(handle).unwrap(), 1);

        broker.session_present(true);
        mgr.connect(handle, &ConnectOptions::new("dev-1")).unwrap();
        assert_eq!(mgr.in_flight(handle).unwrap(), 0);
    }

    #[test]
    fn test_deinit_requires_no_sessions() {
        let broker = ScriptedBroker::new();
        let transports = FakeTransports::new();
        let mut mgr = manager(&broker, &transports);
        let handle = mgr.create(create_options(), Recorder::default()).unwrap();

        assert!(matches!(mgr.deinit(), Err(ClientError::InvalidState(_))));
        mgr.delete(handle).unwrap();
        mgr.deinit().unwrap();
        assert!(matches!(mgr.deinit(), Err(ClientError::ObjectNotInitialized)));
        assert!(matches!(
            mgr.create(create_options(), Recorder::default()),
            Err(ClientError::ObjectNotInitialized)
        ));
    }

    #[test]
    fn test_create_validates_options() {
        let broker = ScriptedBroker::new();
        let transports = FakeTransports::new();
        let mgr = manager(&broker, &transports);
        let small = CreateOptions::new(BrokerInfo::new("broker.local", 1883), 16);
        assert!(matches!(
            mgr.create(small, Recorder::default()),
            Err(ClientError::InvalidArgument(_))
        ));

        broker.fail_engine_create(Some(EngineError::NoMemory));
        assert!(matches!(
            mgr.create(create_options(), Recorder::default()),
            Err(ClientError::OutOfMemory)
        ));
        assert_eq!(mgr.live_sessions(), 0);
    }

    #[test]
    fn test_incoming_publish_reaches_handler() {
        let broker = ScriptedBroker::new();
        let transports = FakeTransports::new();
        let mgr = manager(&broker, &transports);
        let recorder = Recorder::default();
        let handle = mgr.create(create_options(), recorder.clone()).unwrap();
        mgr.connect(handle, &ConnectOptions::new("dev-1")).unwrap();

        broker.inject_publish("cmd/reboot", "now");
        assert!(wait_until(|| !recorder.messages().is_empty()));
        assert_eq!(recorder.messages()[0].topic, "cmd/reboot");
    }

    #[test]
    fn test_drop_tears_down_live_sessions() {
        let broker = ScriptedBroker::new();
        let transports = FakeTransports::new();
        let mgr = manager(&broker, &transports);
        let handle = mgr.create(create_options(), Recorder::default()).unwrap();
        mgr.connect(handle, &ConnectOptions::new("dev-1")).unwrap();

        drop(mgr);
        assert_eq!(broker.disconnects(), 1);
        assert_eq!(transports.closed(), 1);
    }
}
