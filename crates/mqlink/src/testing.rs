//! Scripted collaborators for unit tests.

use std::io;
use std::ops::Deref;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use crate::callback::EventHandler;
use crate::config::{BackoffConfig, LibraryConfig, LimitsConfig, TimeoutConfig};
use crate::engine::{
    EngineContext, EngineFactory, IncomingPacket, PacketSink, ProtocolEngine, ResendCursor,
};
use crate::error::{ClientError, EngineError, Result};
use crate::events::{ConnectionState, DisconnectReason, MqttEvent, ReceivedMessage};
use crate::manager::Shared;
use crate::message::{PublishMessage, QoS, SubscribeOutcome, SubscribeRequest};
use crate::options::{BrokerInfo, ConnectOptions, SecurityInfo};
use crate::registry::SessionHandle;
use crate::session::{Session, SessionState};
use crate::transport::{DisconnectSignal, LinkDown, Transport, TransportFactory};

/// Small limits and millisecond timeouts.
pub(crate) fn fast_config() -> LibraryConfig {
    LibraryConfig {
        limits: LimitsConfig {
            max_sessions: 2,
            max_outgoing_publishes: 2,
            max_topics_per_request: 5,
            max_retries: 3,
            min_network_buffer_size: 256,
        },
        timeouts: TimeoutConfig {
            ack_timeout_ms: 30,
            ack_poll_interval_ms: 1,
            connack_timeout_ms: 50,
            send_timeout_ms: 50,
            receive_timeout_ms: 1,
            receive_poll_interval_ms: 2,
            disconnect_queue_timeout_ms: 50,
        },
        backoff: BackoffConfig {
            initial_delay_ms: 1,
            max_delay_ms: 2,
            multiplier: 2.0,
            max_attempts: 3,
        },
    }
}

/// Handler that keeps every event it sees.
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    events: Arc<Mutex<Vec<MqttEvent>>>,
}

impl Recorder {
    pub(crate) fn events(&self) -> Vec<MqttEvent> {
        self.events.lock().clone()
    }

    pub(crate) fn messages(&self) -> Vec<ReceivedMessage> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                MqttEvent::Message(message) => Some(message.clone()),
                MqttEvent::Disconnected(_) => None,
            })
            .collect()
    }

    pub(crate) fn disconnects(&self) -> Vec<DisconnectReason> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                MqttEvent::Disconnected(reason) => Some(*reason),
                MqttEvent::Message(_) => None,
            })
            .collect()
    }
}

impl EventHandler for Recorder {
    fn on_event(&mut self, _handle: SessionHandle, event: &MqttEvent) {
        self.events.lock().push(event.clone());
    }
}

#[derive(Default)]
struct Script {
    session_present: bool,
    connect_error: Option<EngineError>,
    create_error: Option<EngineError>,
    ack_publishes: bool,
    suback: Option<Vec<SubscribeOutcome>>,
    ack_unsubscribe: bool,
    process_failure: Option<EngineError>,
    link_failure_on_publish: bool,
    resend_order: Option<Vec<u16>>,
    pending: Vec<IncomingPacket>,
    published: Vec<(u16, PublishMessage)>,
    unacked: Vec<u16>,
    subscribe_ids: Vec<u16>,
    disconnects: usize,
    process_calls: usize,
}

/// Stand-in for the protocol engine and the broker behind it.
#[derive(Clone, Default)]
pub(crate) struct ScriptedBroker {
    script: Arc<Mutex<Script>>,
}

impl ScriptedBroker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn session_present(&self, present: bool) {
        self.script.lock().session_present = present;
    }

    pub(crate) fn connect_error(&self, error: Option<EngineError>) {
        self.script.lock().connect_error = error;
    }

    pub(crate) fn fail_engine_create(&self, error: Option<EngineError>) {
        self.script.lock().create_error = error;
    }

    pub(crate) fn ack_publishes(&self, ack: bool) {
        self.script.lock().ack_publishes = ack;
    }

    pub(crate) fn set_suback(&self, outcomes: Vec<SubscribeOutcome>) {
        self.script.lock().suback = Some(outcomes);
    }

    pub(crate) fn set_ack_unsubscribe(&self, ack: bool) {
        self.script.lock().ack_unsubscribe = ack;
    }

    pub(crate) fn fail_next_process(&self, error: EngineError) {
        self.script.lock().process_failure = Some(error);
    }

    /// Publishes are recorded, then fail with `SendFailed`.
    pub(crate) fn set_link_failure_on_publish(&self, fail: bool) {
        self.script.lock().link_failure_on_publish = fail;
    }

    pub(crate) fn set_resend_order(&self, order: Vec<u16>) {
        self.script.lock().resend_order = Some(order);
    }

    pub(crate) fn inject_publish(&self, topic: &str, payload: &'static str) {
        self.script.lock().pending.push(IncomingPacket::Publish {
            packet_id: None,
            topic: topic.to_string(),
            payload: Bytes::from_static(payload.as_bytes()),
            qos: QoS::AtMostOnce,
            dup: false,
            retain: false,
        });
    }

    pub(crate) fn published(&self) -> Vec<(u16, PublishMessage)> {
        self.script.lock().published.clone()
    }

    pub(crate) fn subscribe_ids(&self) -> Vec<u16> {
        self.script.lock().subscribe_ids.clone()
    }

    pub(crate) fn subscribe_attempts(&self) -> usize {
        self.script.lock().subscribe_ids.len()
    }

    pub(crate) fn disconnects(&self) -> usize {
        self.script.lock().disconnects
    }

    pub(crate) fn process_calls(&self) -> usize {
        self.script.lock().process_calls
    }

    pub(crate) fn engine(&self, context: EngineContext) -> Box<dyn ProtocolEngine> {
        Box::new(ScriptedEngine {
            context,
            script: Arc::clone(&self.script),
            next_id: 0,
        })
    }

    /// A `Created` session state driven by this broker.
    pub(crate) fn state(&self, recorder: Recorder) -> SessionState {
        self.state_for(EngineContext(0), recorder, 2, 5)
    }

    /// An `Established` session state with a live fake transport.
    pub(crate) fn connected_state(&self, recorder: Recorder) -> SessionState {
        let mut state = self.state(recorder);
        state.transport = Some(Box::new(FakeTransport::default()));
        state.phase = ConnectionState::Established;
        state
    }

    fn state_for(
        &self,
        context: EngineContext,
        recorder: Recorder,
        max_outgoing_publishes: usize,
        max_topics: usize,
    ) -> SessionState {
        SessionState::new(
            BrokerInfo::new("localhost", 1883),
            None,
            self.engine(context),
            Box::new(recorder),
            max_outgoing_publishes,
            max_topics,
        )
    }
}

impl EngineFactory for ScriptedBroker {
    fn create(
        &self,
        context: EngineContext,
        _network_buffer_size: usize,
    ) -> std::result::Result<Box<dyn ProtocolEngine>, EngineError> {
        if let Some(error) = self.script.lock().create_error {
            return Err(error);
        }
        Ok(self.engine(context))
    }
}

struct ScriptedEngine {
    context: EngineContext,
    script: Arc<Mutex<Script>>,
    next_id: u16,
}

impl ProtocolEngine for ScriptedEngine {
    fn connect(
        &mut self,
        _io: &mut dyn Transport,
        _options: &ConnectOptions,
        _timeout: Duration,
    ) -> std::result::Result<bool, EngineError> {
        let script = self.script.lock();
        match script.connect_error {
            Some(error) => Err(error),
            None => Ok(script.session_present),
        }
    }

    fn publish(
        &mut self,
        _io: &mut dyn Transport,
        message: &PublishMessage,
        packet_id: u16,
    ) -> std::result::Result<(), EngineError> {
        let mut script = self.script.lock();
        script.published.push((packet_id, message.clone()));
        if message.qos.needs_ack() && !script.unacked.contains(&packet_id) {
            script.unacked.push(packet_id);
        }
        if script.link_failure_on_publish {
            return Err(EngineError::SendFailed);
        }
        if script.ack_publishes {
            let ack = match message.qos {
                QoS::AtMostOnce => None,
                QoS::AtLeastOnce => Some(IncomingPacket::PubAck { packet_id, ok: true }),
                QoS::ExactlyOnce => Some(IncomingPacket::PubRec { packet_id, ok: true }),
            };
            script.pending.extend(ack);
        }
        Ok(())
    }

    fn subscribe(
        &mut self,
        _io: &mut dyn Transport,
        _requests: &[SubscribeRequest],
        packet_id: u16,
    ) -> std::result::Result<(), EngineError> {
        let mut script = self.script.lock();
        script.subscribe_ids.push(packet_id);
        if let Some(outcomes) = script.suback.clone() {
            script.pending.push(IncomingPacket::SubAck {
                packet_id,
                outcomes,
            });
        }
        Ok(())
    }

    fn unsubscribe(
        &mut self,
        _io: &mut dyn Transport,
        _topics: &[String],
        packet_id: u16,
    ) -> std::result::Result<(), EngineError> {
        let mut script = self.script.lock();
        if script.ack_unsubscribe {
            script.pending.push(IncomingPacket::UnsubAck { packet_id });
        }
        Ok(())
    }

    fn disconnect(&mut self, _io: &mut dyn Transport) -> std::result::Result<(), EngineError> {
        self.script.lock().disconnects += 1;
        Ok(())
    }

    fn process_loop(
        &mut self,
        _io: &mut dyn Transport,
        timeout: Duration,
        sink: &mut dyn PacketSink,
    ) -> std::result::Result<(), EngineError> {
        let packets = {
            let mut script = self.script.lock();
            script.process_calls += 1;
            if let Some(error) = script.process_failure.take() {
                return Err(error);
            }
            let packets = std::mem::take(&mut script.pending);
            for packet in &packets {
                if let IncomingPacket::PubAck { packet_id, .. }
                | IncomingPacket::PubRec { packet_id, .. } = packet
                {
                    script.unacked.retain(|id| id != packet_id);
                }
            }
            packets
        };

        if packets.is_empty() {
            thread::sleep(timeout);
        }
        for packet in packets {
            sink.deliver(self.context, packet);
        }
        Ok(())
    }

    fn allocate_packet_id(&mut self) -> Option<u16> {
        self.next_id = self.next_id.wrapping_add(1);
        if self.next_id == 0 {
            self.next_id = 1;
        }
        Some(self.next_id)
    }

    fn next_publish_to_resend(&mut self, cursor: &mut ResendCursor) -> Option<u16> {
        let script = self.script.lock();
        let order = script.resend_order.as_ref().unwrap_or(&script.unacked);
        let id = order.get(cursor.0).copied();
        cursor.0 += 1;
        id
    }
}

#[derive(Default)]
struct TransportScript {
    failures_remaining: usize,
    creates: usize,
    closed: usize,
    last_signal: Option<DisconnectSignal>,
}

/// Transport factory whose connections never touch the network.
#[derive(Clone, Default)]
pub(crate) struct FakeTransports {
    script: Arc<Mutex<TransportScript>>,
}

impl FakeTransports {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The first `count` transport connects are refused.
    pub(crate) fn failing(count: usize) -> Self {
        let transports = Self::default();
        transports.script.lock().failures_remaining = count;
        transports
    }

    pub(crate) fn creates(&self) -> usize {
        self.script.lock().creates
    }

    pub(crate) fn closed(&self) -> usize {
        self.script.lock().closed
    }

    pub(crate) fn last_signal(&self) -> Option<DisconnectSignal> {
        self.script.lock().last_signal.clone()
    }
}

impl TransportFactory for FakeTransports {
    fn create(
        &self,
        _broker: &BrokerInfo,
        _security: Option<&SecurityInfo>,
        signal: DisconnectSignal,
    ) -> Result<Box<dyn Transport>> {
        let mut script = self.script.lock();
        script.creates += 1;
        script.last_signal = Some(signal);
        Ok(Box::new(FakeTransport {
            script: Arc::clone(&self.script),
        }))
    }
}

#[derive(Default)]
struct FakeTransport {
    script: Arc<Mutex<TransportScript>>,
}

impl Transport for FakeTransport {
    fn connect(&mut self, _send_timeout: Duration, _recv_timeout: Duration) -> Result<()> {
        let mut script = self.script.lock();
        if script.failures_remaining > 0 {
            script.failures_remaining -= 1;
            return Err(ClientError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "scripted refusal",
            )));
        }
        Ok(())
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn recv(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }

    fn disconnect(&mut self) -> Result<()> {
        self.script.lock().closed += 1;
        Ok(())
    }
}

/// An idle session for registry bookkeeping tests.
pub(crate) fn test_session() -> Arc<Session> {
    let state = ScriptedBroker::new().state(Recorder::default());
    Arc::new(Session::new(EngineContext(0), state))
}

/// Shared library state with one registered session, without any threads.
pub(crate) struct TestShared {
    shared: Arc<Shared>,
    _queue: Receiver<LinkDown>,
    handle: SessionHandle,
    context: EngineContext,
}

impl TestShared {
    pub(crate) fn new(config: LibraryConfig) -> Self {
        let (shared, queue) = Shared::new(config);
        let context = EngineContext(1);
        let handle = shared
            .registry
            .register(context, test_session())
            .expect("registry has room");
        Self {
            shared: Arc::new(shared),
            _queue: queue,
            handle,
            context,
        }
    }

    /// Handle of the registered session.
    pub(crate) fn handle(&self) -> SessionHandle {
        self.handle
    }

    /// An `Established` state whose engine reports packets under the
    /// registered session's context.
    pub(crate) fn connected_state(&self, broker: &ScriptedBroker, recorder: Recorder) -> SessionState {
        self.established(broker, self.context, recorder)
    }

    /// Register a second, connected session and return it.
    pub(crate) fn register_connected(
        &self,
        broker: &ScriptedBroker,
        recorder: Recorder,
    ) -> (SessionHandle, Arc<Session>) {
        let context = EngineContext(2);
        let session = Arc::new(Session::new(
            context,
            self.established(broker, context, recorder),
        ));
        let handle = self
            .shared
            .registry
            .register(context, Arc::clone(&session))
            .expect("registry has room");
        (handle, session)
    }

    fn established(
        &self,
        broker: &ScriptedBroker,
        context: EngineContext,
        recorder: Recorder,
    ) -> SessionState {
        let limits = &self.shared.config.limits;
        let mut state = broker.state_for(
            context,
            recorder,
            limits.max_outgoing_publishes,
            limits.max_topics_per_request,
        );
        state.transport = Some(Box::new(FakeTransport::default()));
        state.phase = ConnectionState::Established;
        state
    }
}

impl Deref for TestShared {
    type Target = Shared;

    fn deref(&self) -> &Shared {
        &self.shared
    }
}
