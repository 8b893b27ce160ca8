//! Per-session receive loop.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error};

use crate::error::EngineError;
use crate::manager::Shared;
use crate::registry::SessionHandle;
use crate::session::{reason_for, Session, SessionState};

static THREAD_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Background thread driving incoming-packet processing for one session.
pub(crate) struct ReceiveWorker {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

impl ReceiveWorker {
    pub(crate) fn spawn(
        handle: SessionHandle,
        session: Arc<Session>,
        shared: Arc<Shared>,
    ) -> io::Result<Self> {
        let (stop, stopped) = bounded(1);
        let name = format!("mqlink-recv-{}", THREAD_SEQ.fetch_add(1, Ordering::Relaxed));
        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || run(handle, session, shared, stopped))?;
        Ok(Self { stop, thread })
    }

    /// Signal the loop and wait for it to exit.
    ///
    /// Must not be called with the session lock held.
    pub(crate) fn stop(self) {
        let _ = self.stop.send(());
        if self.thread.join().is_err() {
            error!("Receive loop panicked");
        }
    }
}

fn run(handle: SessionHandle, session: Arc<Session>, shared: Arc<Shared>, stopped: Receiver<()>) {
    debug!("{}: receive loop started", handle);
    let poll = shared.config.timeouts.receive_poll_interval();
    loop {
        receive_pass(&mut session.lock(), &shared, handle);
        match stopped.recv_timeout(poll) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("{}: receive loop stopped", handle);
}

/// One bounded pass of engine processing. Fatal statuses are reported as a
/// disconnect and leave the session `LinkLost`.
pub(crate) fn receive_pass(state: &mut SessionState, shared: &Shared, handle: SessionHandle) {
    if !state.phase.is_established() {
        return;
    }
    match state.pump(&shared.registry, Duration::ZERO) {
        Ok(()) | Err(EngineError::NoDataAvailable) => {}
        Err(e) if e.is_fatal() => {
            error!("{}: receive loop stopped processing: {}", handle, e);
            state.link_lost(handle, reason_for(e));
        }
        Err(e) => debug!("{}: engine processing returned {}", handle, e),
    }
}
