//! Packet dispatcher.
//!
//! Handed to the protocol engine as its [`PacketSink`] while a thread holding
//! the session lock pumps it. The engine only knows its own context, so each
//! packet is first resolved to a handle through the registry.

use log::{debug, error, warn};

use crate::callback::EventHandler;
use crate::engine::{EngineContext, IncomingPacket, PacketSink};
use crate::events::{ConnectionState, DisconnectReason, MqttEvent, ReceivedMessage};
use crate::publish::PublishSlots;
use crate::registry::Registry;
use crate::session::report_link_lost;
use crate::subscribe::AckCorrelation;

pub(crate) struct Dispatcher<'a> {
    registry: &'a Registry,
    phase: &'a mut ConnectionState,
    slots: &'a mut PublishSlots,
    acks: &'a mut AckCorrelation,
    handler: &'a mut dyn EventHandler,
}

impl<'a> Dispatcher<'a> {
    pub(crate) fn new(
        registry: &'a Registry,
        phase: &'a mut ConnectionState,
        slots: &'a mut PublishSlots,
        acks: &'a mut AckCorrelation,
        handler: &'a mut dyn EventHandler,
    ) -> Self {
        Self {
            registry,
            phase,
            slots,
            acks,
            handler,
        }
    }
}

impl PacketSink for Dispatcher<'_> {
    fn deliver(&mut self, context: EngineContext, packet: IncomingPacket) {
        let Some(handle) = self.registry.lookup_by_engine_context(context) else {
            warn!("Dropping {:?} for unknown engine context {:?}", packet, context);
            return;
        };

        match packet {
            IncomingPacket::Publish {
                packet_id,
                topic,
                payload,
                qos,
                dup,
                retain,
            } => {
                let message = ReceivedMessage {
                    topic,
                    payload,
                    qos,
                    dup,
                    retain,
                    packet_id,
                };
                self.handler.on_event(handle, &MqttEvent::Message(message));
            }
            IncomingPacket::PubAck { packet_id, ok } | IncomingPacket::PubRec { packet_id, ok } => {
                self.acks.publish_acked(packet_id, ok);
                if self.slots.release(packet_id) {
                    debug!("{}: publish {} acknowledged", handle, packet_id);
                }
            }
            IncomingPacket::SubAck {
                packet_id,
                outcomes,
            } => {
                if !self.acks.subscribe_acked(packet_id, &outcomes) {
                    debug!("{}: ignoring SUBACK {}", handle, packet_id);
                }
            }
            IncomingPacket::UnsubAck { packet_id } => {
                self.acks.unsubscribe_acked(packet_id);
            }
            IncomingPacket::PingResp { ok } => {
                if !ok {
                    error!("{}: malformed PINGRESP", handle);
                    report_link_lost(
                        &mut *self.phase,
                        &mut *self.handler,
                        handle,
                        DisconnectReason::BrokerUnresponsive,
                    );
                }
            }
            IncomingPacket::PubRel { packet_id } | IncomingPacket::PubComp { packet_id } => {
                debug!("{}: QoS 2 flow packet {}", handle, packet_id);
            }
            IncomingPacket::Disconnect => {
                debug!("{}: broker sent DISCONNECT", handle);
            }
        }
    }
}
