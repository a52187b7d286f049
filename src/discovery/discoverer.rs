//! The public discovery entry point.

use core::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::DiscovererConfig;
use crate::discovery::aggregator::ResponseAggregator;
use crate::discovery::handle::{HandleState, SearchHandle};
use crate::discovery::pool::WorkerPool;
use crate::discovery::session::{ActiveSessions, OnFinish, Outcome, SearchSession, SessionControl};
use crate::discovery::Discovered;
use crate::error::{KnxError, Result};
use crate::net::resolver::{self, LocalIntent, Purpose};
use crate::net::transport::Connector;
use crate::net::udp::UdpConnector;
use crate::net::NetworkInterface;
use crate::protocol::{
    decode_response, encode_description_request, encode_search_request, DescriptionResponse,
    Response, SearchResponse, MAX_FRAME_SIZE,
};

fn checked_port(port: i32) -> Result<u16> {
    u16::try_from(port).map_err(|_| KnxError::port_out_of_range(i64::from(port)))
}

fn checked_timeout(secs: i32) -> Result<u64> {
    u64::try_from(secs).map_err(|_| KnxError::negative_timeout(i64::from(secs)))
}

/// Makes a pending blocking call of a [`Discoverer`] give up
///
/// Obtained from [`Discoverer::interrupter`]; can be sent to other threads.
#[derive(Debug, Clone)]
pub struct Interrupter {
    flag: Arc<AtomicBool>,
}

impl Interrupter {
    /// Interrupt the current, or else the next, blocking search or description
    ///
    /// The interrupted call stops its session and returns
    /// [`KnxError::Interrupted`]. One interrupt is consumed by one call.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::Release);
    }
}

/// Discovers KNXnet/IP servers and requests their self-description
///
/// Every search runs as a session on a pooled worker thread with its own
/// socket. Responses of all sessions are collected in one list, one entry per
/// server, in order of first arrival; the list survives across searches
/// until [`clear_search_responses`](Self::clear_search_responses).
///
/// Timeouts are whole seconds. A search timeout of 0 searches until
/// [`stop_search`](Self::stop_search); a description timeout of 0 uses the
/// configured default.
///
/// Dropping a discoverer stops all of its sessions.
///
/// # Examples
///
/// ```rust,no_run
/// use knx_discover::Discoverer;
///
/// # fn main() -> knx_discover::Result<()> {
/// let discoverer = Discoverer::new(0, false)?;
/// discoverer.start_search(3, true)?;
///
/// for server in discoverer.search_responses() {
///     println!("{server}");
///     let description = discoverer.describe(&server, 0)?;
///     println!("  {}", description.response());
/// }
/// # Ok(())
/// # }
/// ```
pub struct Discoverer {
    config: DiscovererConfig,
    connector: Arc<dyn Connector>,
    pool: WorkerPool,
    aggregator: Arc<ResponseAggregator>,
    active: Arc<ActiveSessions>,
    interrupt: Arc<AtomicBool>,
    next_session: AtomicU64,
}

impl fmt::Debug for Discoverer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Discoverer")
            .field("config", &self.config)
            .field("pool", &self.pool.name())
            .field("responses", &self.aggregator.len())
            .field("searching", &self.is_searching())
            .finish_non_exhaustive()
    }
}

impl Discoverer {
    /// Discoverer on any interface
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `local_port` is outside `0..=65535`
    pub fn new(local_port: i32, nat: bool) -> Result<Self> {
        Self::builder().local_port(local_port).nat(nat).build()
    }

    /// Discoverer bound to `interface`, optionally asking for multicast responses
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `local_port` is outside `0..=65535`
    pub fn with_interface(
        interface: Option<NetworkInterface>,
        local_port: i32,
        nat: bool,
        multicast_responses: bool,
    ) -> Result<Self> {
        Self::builder()
            .interface(interface)
            .local_port(local_port)
            .nat(nat)
            .multicast_responses(multicast_responses)
            .build()
    }

    /// Start configuring a discoverer
    pub fn builder() -> DiscovererBuilder {
        DiscovererBuilder::default()
    }

    /// Active configuration
    pub const fn config(&self) -> &DiscovererConfig {
        &self.config
    }

    /// Pool running this discoverer's sessions
    pub const fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Search on the configured interface and port
    ///
    /// With `wait`, blocks until the search ends and returns its error, if
    /// any; otherwise returns once the request is under way.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for a negative timeout
    /// - `Transport` if the socket cannot be opened, or (with `wait`) fails
    /// - `Interrupted` if an [`Interrupter`] fired while waiting
    pub fn start_search(&self, timeout: i32, wait: bool) -> Result<()> {
        let interface = self.config.interface.as_ref().map(NetworkInterface::address);
        self.search(self.config.local_port, interface, timeout, wait)
    }

    /// Search from an explicit local port and interface
    ///
    /// Several searches may run at once, each on its own port.
    ///
    /// # Errors
    ///
    /// As [`start_search`](Self::start_search), plus `InvalidArgument` for a
    /// port outside `0..=65535`
    pub fn start_search_on(
        &self,
        local_port: i32,
        interface: Option<&NetworkInterface>,
        timeout: i32,
        wait: bool,
    ) -> Result<()> {
        let port = checked_port(local_port)?;
        self.search(port, interface.map(NetworkInterface::address), timeout, wait)
    }

    fn search(
        &self,
        port: u16,
        interface: Option<Ipv4Addr>,
        timeout: i32,
        wait: bool,
    ) -> Result<()> {
        let secs = checked_timeout(timeout)?;
        let window = (secs > 0).then(|| Duration::from_secs(secs));
        let control = self.launch(port, interface, window, None)?;

        if !wait {
            return Ok(());
        }
        match self.wait_session(&control)? {
            Outcome::Elapsed | Outcome::Stopped => Ok(()),
            Outcome::Failed(e) => Err(e),
        }
    }

    /// Start a search of length `window` and return a handle to its result
    ///
    /// A zero window searches until cancelled or stopped.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the socket cannot be opened
    pub fn search_async(&self, window: Duration) -> Result<SearchHandle> {
        let state = HandleState::new();
        let on_finish: OnFinish = {
            let state = Arc::clone(&state);
            let aggregator = Arc::clone(&self.aggregator);
            Box::new(move |outcome: &Outcome| {
                state.complete(match outcome {
                    Outcome::Elapsed => Ok(aggregator.snapshot()),
                    Outcome::Stopped => Err(KnxError::Cancelled),
                    Outcome::Failed(e) => Err(e.clone()),
                });
            })
        };

        let interface = self.config.interface.as_ref().map(NetworkInterface::address);
        let window = (!window.is_zero()).then_some(window);
        let control = self.launch(self.config.local_port, interface, window, Some(on_finish))?;
        Ok(SearchHandle::new(state, control))
    }

    fn launch(
        &self,
        port: u16,
        interface: Option<Ipv4Addr>,
        window: Option<Duration>,
        on_finish: Option<OnFinish>,
    ) -> Result<Arc<SessionControl>> {
        let resolved = resolver::resolve(
            self.connector.as_ref(),
            &self.intent(port, interface),
            Purpose::Search,
        )?;
        let request = encode_search_request(&resolved.hpai)?;

        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let control = Arc::new(SessionControl::new(id));
        self.active.register(Arc::clone(&control));

        let session = SearchSession {
            control: Arc::clone(&control),
            transport: resolved.transport,
            local: resolved.local,
            request,
            target: self.config.search_target,
            window,
            tick: self.config.receive_tick,
            aggregator: Arc::clone(&self.aggregator),
            active: Arc::clone(&self.active),
        };

        if let Err(e) = self.pool.execute(move |lease| session.run(lease, on_finish)) {
            knx_log!(error, "[Discoverer] no worker for session {}: {}", id, e);
            self.active.remove(id);
            return Err(e);
        }
        Ok(control)
    }

    fn intent(&self, port: u16, interface: Option<Ipv4Addr>) -> LocalIntent {
        LocalIntent {
            interface,
            port,
            nat: self.config.nat,
            multicast_responses: self.config.multicast_responses,
        }
    }

    /// Wait for a session while watching the interrupt flag
    fn wait_session(&self, control: &SessionControl) -> Result<Outcome> {
        loop {
            if let Some(outcome) = control.wait_finished_for(self.config.receive_tick) {
                return Ok(outcome);
            }
            if self.take_interrupt() {
                knx_log!(debug, "[Discoverer] session {} interrupted", control.id());
                control.stop();
                control.wait_finished();
                return Err(KnxError::Interrupted);
            }
        }
    }

    fn take_interrupt(&self) -> bool {
        self.interrupt.swap(false, Ordering::AcqRel)
    }

    /// Handle for interrupting blocking calls from another thread
    pub fn interrupter(&self) -> Interrupter {
        Interrupter {
            flag: Arc::clone(&self.interrupt),
        }
    }

    /// Copy of the responses collected so far
    pub fn search_responses(&self) -> Vec<Discovered<SearchResponse>> {
        self.aggregator.snapshot()
    }

    /// Forget all collected responses
    pub fn clear_search_responses(&self) {
        self.aggregator.clear();
    }

    /// Check if any search session is running
    pub fn is_searching(&self) -> bool {
        !self.active.is_empty()
    }

    /// Stop every running search and wait until all have ended
    ///
    /// Does nothing when no search runs. Once this returns, no further
    /// responses are collected.
    pub fn stop_search(&self) {
        loop {
            let sessions = self.active.snapshot();
            if sessions.is_empty() {
                return;
            }
            knx_log!(debug, "[Discoverer] stopping {} session(s)", sessions.len());
            for session in &sessions {
                session.stop();
            }
            self.active.wait_empty_for(self.config.receive_tick);
        }
    }

    /// Ask the server at `server` to describe itself
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for a negative timeout
    /// - `Transport` if the socket cannot be opened or used
    /// - `Timeout` if no datagram arrives in time
    /// - `Protocol` if the reply is malformed or not a description response
    /// - `Interrupted` if an [`Interrupter`] fired while waiting
    pub fn description(
        &self,
        server: SocketAddrV4,
        timeout: i32,
    ) -> Result<Discovered<DescriptionResponse>> {
        let secs = checked_timeout(timeout)?;
        let timeout = if secs == 0 {
            self.config.description_timeout
        } else {
            Duration::from_secs(secs)
        };

        let interface = self.config.interface.as_ref().map(NetworkInterface::address);
        let mut resolved = resolver::resolve(
            self.connector.as_ref(),
            &self.intent(self.config.local_port, interface),
            Purpose::Description,
        )?;
        let request = encode_description_request(&resolved.hpai)?;

        let started = Instant::now();
        knx_log!(debug, "[Discoverer] description request to {}", server);
        resolved.transport.send_to(&request, server)?;

        let deadline = started + timeout;
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let result = loop {
            let now = Instant::now();
            if now >= deadline {
                break Err(KnxError::Timeout);
            }
            if self.take_interrupt() {
                break Err(KnxError::Interrupted);
            }

            let wait = (deadline - now).min(self.config.receive_tick);
            match resolved.transport.recv_from(&mut buf, wait) {
                Ok(Some((n, from))) => {
                    break match decode_response(&buf[..n]) {
                        Ok(Response::Description(response)) => Ok(Discovered::new(
                            response,
                            from,
                            Some(resolved.local),
                            started.elapsed(),
                        )),
                        Ok(Response::Search(_)) => Err(KnxError::unexpected_service_type()),
                        Err(e) => Err(e),
                    };
                }
                Ok(None) => {}
                Err(e) => break Err(e),
            }
        };

        resolved.transport.close();
        if let Err(e) = &result {
            knx_log!(debug, "[Discoverer] description from {} failed: {}", server, e);
        }
        result
    }

    /// Ask a server found by a search to describe itself
    ///
    /// Uses the server's control endpoint, or the address its search response
    /// came from if the server advertised the NAT sentinel.
    ///
    /// # Errors
    ///
    /// As [`description`](Self::description)
    pub fn describe(
        &self,
        found: &Discovered<SearchResponse>,
        timeout: i32,
    ) -> Result<Discovered<DescriptionResponse>> {
        self.description(found.server_key(), timeout)
    }
}

impl Drop for Discoverer {
    fn drop(&mut self) {
        self.stop_search();
    }
}

/// Builder for [`Discoverer`]
#[derive(Default)]
pub struct DiscovererBuilder {
    config: DiscovererConfig,
    local_port: Option<i32>,
    connector: Option<Arc<dyn Connector>>,
    pool: Option<WorkerPool>,
}

impl fmt::Debug for DiscovererBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscovererBuilder")
            .field("config", &self.config)
            .field("local_port", &self.local_port)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl DiscovererBuilder {
    /// Replace the whole configuration
    #[must_use]
    pub fn config(mut self, config: DiscovererConfig) -> Self {
        self.config = config;
        self
    }

    /// Local port for searches and descriptions (checked by [`build`](Self::build))
    #[must_use]
    pub fn local_port(mut self, port: i32) -> Self {
        self.local_port = Some(port);
        self
    }

    /// Advertise the NAT sentinel instead of the local endpoint
    #[must_use]
    pub fn nat(mut self, nat: bool) -> Self {
        self.config.nat = nat;
        self
    }

    /// Ask servers to answer searches via multicast
    #[must_use]
    pub fn multicast_responses(mut self, enabled: bool) -> Self {
        self.config.multicast_responses = enabled;
        self
    }

    /// Interface to bind to
    #[must_use]
    pub fn interface(mut self, interface: Option<NetworkInterface>) -> Self {
        self.config.interface = interface;
        self
    }

    /// Send search requests to a unicast server instead of the multicast group
    #[must_use]
    pub fn search_target(mut self, target: SocketAddrV4) -> Self {
        self.config.search_target = target;
        self
    }

    /// How long a blocking receive may last before stop and interrupt are checked
    #[must_use]
    pub fn receive_tick(mut self, tick: Duration) -> Self {
        self.config.receive_tick = tick;
        self
    }

    /// Transport factory; UDP sockets by default
    #[must_use]
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Worker pool; the process-wide pool by default
    #[must_use]
    pub fn pool(mut self, pool: WorkerPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Validate and create the discoverer
    ///
    /// No socket is opened until a search or description starts.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a port outside `0..=65535` or an invalid
    /// configuration
    pub fn build(self) -> Result<Discoverer> {
        let mut config = self.config;
        if let Some(port) = self.local_port {
            config.local_port = checked_port(port)?;
        }
        config.validate()?;

        Ok(Discoverer {
            config,
            connector: self.connector.unwrap_or_else(|| Arc::new(UdpConnector)),
            pool: self.pool.unwrap_or_else(WorkerPool::global),
            aggregator: Arc::new(ResponseAggregator::new()),
            active: Arc::new(ActiveSessions::new()),
            interrupt: Arc::new(AtomicBool::new(false)),
            next_session: AtomicU64::new(0),
        })
    }
}
