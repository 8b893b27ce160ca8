//! Connection establishment.
//!
//! Transport setup runs without the session lock, retrying with backoff. The
//! CONNECT handshake, the resend-or-purge decision and receive loop startup
//! all happen under the lock, so no other call observes a half-built session.

use std::sync::Arc;
use std::thread;

use log::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::error::{ClientError, Result};
use crate::events::ConnectionState;
use crate::manager::Shared;
use crate::options::{BrokerInfo, ConnectOptions, SecurityInfo};
use crate::receive::ReceiveWorker;
use crate::registry::SessionHandle;
use crate::session::{Session, SessionState};
use crate::transport::{DisconnectSignal, Transport, TransportFactory};

/// Connect a session. Returns the broker's session-present flag.
pub(crate) fn connect(
    shared: &Arc<Shared>,
    transports: &dyn TransportFactory,
    handle: SessionHandle,
    session: &Arc<Session>,
    options: &ConnectOptions,
) -> Result<bool> {
    options.validate()?;

    let (broker, security, link) = {
        let mut state = session.lock();
        match state.phase {
            ConnectionState::Created => {}
            ConnectionState::Deleted => return Err(ClientError::ObjectNotInitialized),
            ConnectionState::Established | ConnectionState::LinkLost => {
                return Err(ClientError::InvalidState("already connected".into()))
            }
            other => {
                return Err(ClientError::InvalidState(format!(
                    "connect while {:?}",
                    other
                )))
            }
        }
        state.phase = ConnectionState::Connecting;
        state.link = state.link.wrapping_add(1);
        (state.broker.clone(), state.security.clone(), state.link)
    };

    let signal = DisconnectSignal::new(
        handle,
        link,
        shared.events.clone(),
        shared.config.timeouts.disconnect_queue_timeout(),
    );
    let transport = match open_transport(shared, transports, &broker, security.as_ref(), signal) {
        Ok(transport) => transport,
        Err(e) => {
            session.lock().phase = ConnectionState::Created;
            return Err(e);
        }
    };

    let mut state = session.lock();
    state.transport = Some(transport);
    let session_present = match handshake(&mut state, shared, handle, options) {
        Ok(present) => present,
        Err(e) => {
            let established = state.phase == ConnectionState::Established;
            rollback(&mut state, handle, established);
            return Err(e);
        }
    };

    match ReceiveWorker::spawn(handle, Arc::clone(session), Arc::clone(shared)) {
        Ok(worker) => state.receiver = Some(worker),
        Err(e) => {
            error!("{}: cannot start receive loop: {}", handle, e);
            rollback(&mut state, handle, true);
            return Err(ClientError::ConnectFailed(format!(
                "receive loop not started: {}",
                e
            )));
        }
    }

    info!(
        "{}: connected to {} (secure: {}, session present: {})",
        handle,
        broker.address(),
        state.is_secure(),
        session_present
    );
    Ok(session_present)
}

/// Create and connect a transport, backing off between failed attempts.
fn open_transport(
    shared: &Shared,
    transports: &dyn TransportFactory,
    broker: &BrokerInfo,
    security: Option<&SecurityInfo>,
    signal: DisconnectSignal,
) -> Result<Box<dyn Transport>> {
    let timeouts = &shared.config.timeouts;
    let mut backoff = Backoff::new(&shared.config.backoff);
    loop {
        let failure = match transports.create(broker, security, signal.clone()) {
            Ok(mut transport) => {
                match transport.connect(timeouts.send_timeout(), timeouts.receive_timeout()) {
                    Ok(()) => return Ok(transport),
                    // Dropping the half-open transport deletes it.
                    Err(e) => format!("transport connect: {}", e),
                }
            }
            Err(e) => format!("transport create: {}", e),
        };

        match backoff.next_delay() {
            Some(delay) => {
                warn!(
                    "{}: {} (attempt {}), retrying in {:?}",
                    broker.address(),
                    failure,
                    backoff.attempts(),
                    delay
                );
                thread::sleep(delay);
            }
            None => {
                error!(
                    "{}: giving up after {} attempts: {}",
                    broker.address(),
                    backoff.attempts(),
                    failure
                );
                return Err(ClientError::ConnectFailed(format!(
                    "{} after {} attempts",
                    failure,
                    backoff.attempts()
                )));
            }
        }
    }
}

/// CONNECT/CONNACK, then replay or purge outstanding publishes.
fn handshake(
    state: &mut SessionState,
    shared: &Shared,
    handle: SessionHandle,
    options: &ConnectOptions,
) -> Result<bool> {
    let timeout = shared.config.timeouts.connack_timeout();
    let session_present = {
        let SessionState {
            engine, transport, ..
        } = &mut *state;
        let io = transport
            .as_deref_mut()
            .ok_or_else(|| ClientError::Internal("transport missing after connect".into()))?;
        engine
            .connect(io, options, timeout)
            .map_err(|e| ClientError::ConnectFailed(format!("CONNECT handshake: {}", e)))?
    };

    state.phase = ConnectionState::Established;
    state.session_present = session_present;
    debug!(
        "{}: CONNACK received, session present: {}",
        handle, session_present
    );

    if !options.clean_session && session_present {
        state.resend(handle)?;
    } else {
        state.cleanup_all(handle);
    }
    Ok(session_present)
}

/// Undo a partially completed connect. Best-effort; the session ends up `Created`.
fn rollback(state: &mut SessionState, handle: SessionHandle, established: bool) {
    warn!("{}: rolling back connect", handle);
    state.release_link(handle, established);
    state.session_present = false;
    state.phase = ConnectionState::Created;
}
