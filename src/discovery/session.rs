//! Search sessions and their bookkeeping.
//!
//! A [`SearchSession`] owns one transport for its whole life: it sends the
//! search request once, collects responses until its window elapses or it is
//! told to stop, and then tears down in a fixed order:
//!
//! 1. close the transport
//! 2. release the pool worker
//! 3. leave the discoverer's active set
//! 4. run the completion callback (async handles)
//! 5. publish the [`Outcome`] to anyone waiting on the [`SessionControl`]
//!
//! Once a session has left the active set its worker already reports idle.

use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::discovery::aggregator::ResponseAggregator;
use crate::discovery::pool::WorkerLease;
use crate::discovery::Discovered;
use crate::error::KnxError;
use crate::net::transport::Transport;
use crate::protocol::services::REQUEST_SIZE;
use crate::protocol::{decode_response, Response, MAX_FRAME_SIZE};

/// How a session ended
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    /// The search window ran out
    Elapsed,
    /// Stopped by `stop_search`, a cancelled handle, or an interrupt
    Stopped,
    /// The transport failed mid-search
    Failed(KnxError),
}

/// Stop flag and completion signal of one session
#[derive(Debug)]
pub(crate) struct SessionControl {
    id: u64,
    stop: AtomicBool,
    finished: Mutex<Option<Outcome>>,
    done: Condvar,
}

impl SessionControl {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            stop: AtomicBool::new(false),
            finished: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    pub(crate) const fn id(&self) -> u64 {
        self.id
    }

    /// Ask the session to end; observed within one receive tick
    pub(crate) fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn finish(&self, outcome: Outcome) {
        *self.finished.lock() = Some(outcome);
        self.done.notify_all();
    }

    /// Block until the session has torn down
    pub(crate) fn wait_finished(&self) -> Outcome {
        let mut finished = self.finished.lock();
        loop {
            if let Some(outcome) = finished.as_ref() {
                return outcome.clone();
            }
            self.done.wait(&mut finished);
        }
    }

    /// Like [`wait_finished`](Self::wait_finished), giving up after `timeout`
    pub(crate) fn wait_finished_for(&self, timeout: Duration) -> Option<Outcome> {
        let deadline = Instant::now() + timeout;
        let mut finished = self.finished.lock();
        while finished.is_none() {
            if self.done.wait_until(&mut finished, deadline).timed_out() {
                break;
            }
        }
        finished.clone()
    }
}

/// Sessions currently running on behalf of one discoverer
#[derive(Debug, Default)]
pub(crate) struct ActiveSessions {
    sessions: Mutex<Vec<Arc<SessionControl>>>,
    emptied: Condvar,
}

impl ActiveSessions {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, control: Arc<SessionControl>) {
        self.sessions.lock().push(control);
    }

    pub(crate) fn remove(&self, id: u64) {
        let mut sessions = self.sessions.lock();
        sessions.retain(|s| s.id() != id);
        if sessions.is_empty() {
            self.emptied.notify_all();
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<SessionControl>> {
        self.sessions.lock().clone()
    }

    /// Wait until no session is active; `false` on timeout
    pub(crate) fn wait_empty_for(&self, timeout: Duration) -> bool {
        let mut sessions = self.sessions.lock();
        if sessions.is_empty() {
            return true;
        }
        self.emptied
            .wait_while_for(&mut sessions, |s| !s.is_empty(), timeout);
        sessions.is_empty()
    }
}

/// Callback run during teardown, after the session left the active set
pub(crate) type OnFinish = Box<dyn FnOnce(&Outcome) + Send + 'static>;

/// One search invocation
pub(crate) struct SearchSession {
    pub control: Arc<SessionControl>,
    pub transport: Box<dyn Transport>,
    pub local: SocketAddrV4,
    pub request: heapless::Vec<u8, REQUEST_SIZE>,
    pub target: SocketAddrV4,
    /// `None` searches until stopped
    pub window: Option<Duration>,
    pub tick: Duration,
    pub aggregator: Arc<ResponseAggregator>,
    pub active: Arc<ActiveSessions>,
}

impl SearchSession {
    /// Run the session to completion on the worker holding `lease`
    pub(crate) fn run(mut self, lease: WorkerLease, on_finish: Option<OnFinish>) {
        let id = self.control.id();
        let started = Instant::now();
        knx_log!(
            debug,
            "[Session {}] search {} from {} for {:?}",
            id,
            self.target,
            self.local,
            self.window
        );

        let outcome = match self.transport.send_to(&self.request, self.target) {
            Ok(()) => self.receive(started),
            Err(e) => {
                knx_log!(error, "[Session {}] send failed: {}", id, e);
                Outcome::Failed(e)
            }
        };

        self.transport.close();
        drop(lease);
        self.active.remove(id);
        knx_log!(
            debug,
            "[Session {}] ended {:?} after {} ms",
            id,
            outcome,
            started.elapsed().as_millis()
        );
        if let Some(on_finish) = on_finish {
            on_finish(&outcome);
        }
        self.control.finish(outcome);
    }

    fn receive(&mut self, started: Instant) -> Outcome {
        let deadline = self.window.map(|w| started + w);
        let mut buf = [0u8; MAX_FRAME_SIZE];

        loop {
            if self.control.is_stopped() {
                return Outcome::Stopped;
            }
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Outcome::Elapsed;
                    }
                    (deadline - now).min(self.tick)
                }
                None => self.tick,
            };

            match self.transport.recv_from(&mut buf, wait) {
                Ok(Some((n, from))) => self.accept(&buf[..n], from, started),
                Ok(None) => {}
                Err(e) => {
                    knx_log!(error, "[Session {}] receive failed: {}", self.control.id(), e);
                    return Outcome::Failed(e);
                }
            }
        }
    }

    fn accept(&self, data: &[u8], from: SocketAddrV4, started: Instant) {
        match decode_response(data) {
            Ok(Response::Search(response)) => {
                let discovered =
                    Discovered::new(response, from, Some(self.local), started.elapsed());
                let key = discovered.server_key();
                if self.aggregator.insert(discovered) {
                    knx_log!(debug, "[Session {}] found server {}", self.control.id(), key);
                } else {
                    knx_log!(trace, "[Session {}] duplicate response from {}", self.control.id(), key);
                }
            }
            Ok(other) => {
                knx_log!(trace, "[Session {}] discarding {:?} from {}", self.control.id(), other, from);
            }
            Err(e) => {
                knx_log!(trace, "[Session {}] discarding datagram from {}: {}", self.control.id(), from, e);
            }
        }
    }
}
