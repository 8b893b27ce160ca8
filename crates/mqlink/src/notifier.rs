//! Disconnect notifier.
//!
//! Transports raise abrupt disconnects from their own threads through a
//! [`DisconnectSignal`](crate::transport::DisconnectSignal), which only
//! enqueues the handle and the link generation it was raised under. This
//! thread drains that queue and reports each loss to the owning session's
//! handler, at most once per established link. Events from a link that has
//! since been replaced are dropped.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use log::{debug, error, info};

use crate::events::DisconnectReason;
use crate::manager::Shared;
use crate::transport::LinkDown;

pub(crate) struct Notifier {
    shutdown: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl Notifier {
    pub(crate) fn spawn(shared: Arc<Shared>, events: Receiver<LinkDown>) -> io::Result<Self> {
        let (shutdown, shutdown_rx) = bounded(1);
        let thread = thread::Builder::new()
            .name("mqlink-notifier".to_string())
            .spawn(move || run(shared, events, shutdown_rx))?;
        Ok(Self {
            shutdown,
            thread: Some(thread),
        })
    }

    pub(crate) fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.shutdown.send(());
        if thread.join().is_err() {
            error!("Disconnect notifier panicked");
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(shared: Arc<Shared>, events: Receiver<LinkDown>, shutdown: Receiver<()>) {
    info!("Disconnect notifier started");
    loop {
        select! {
            recv(events) -> msg => match msg {
                Ok(event) => notify(&shared, event),
                Err(_) => break,
            },
            recv(shutdown) -> _ => break,
        }
    }
    info!("Disconnect notifier stopped");
}

pub(crate) fn notify(shared: &Shared, event: LinkDown) {
    let LinkDown { handle, link } = event;
    let Ok(session) = shared.registry.lookup(handle) else {
        debug!("Disconnect event for stale {}", handle);
        return;
    };
    let mut state = session.lock();
    if state.link != link {
        debug!(
            "{}: ignoring disconnect from link {} (current {})",
            handle, link, state.link
        );
        return;
    }
    state.link_lost(handle, DisconnectReason::NetworkDown);
}
