//! Static DHCPv4 server engine: the protocol state machine, request
//! governance, the record-source cache wrapper, the outbound responders,
//! and the listener that ties them together over real sockets.
//!
//! This crate has no opinion on where `Definition` records come from or
//! how configuration is loaded from disk — see [`record::RecordSource`]
//! and [`config::Config`] for those seams. The `staticdhcpd` binary
//! crate wires a concrete TOML-backed record source and config loader
//! on top of this crate to produce a runnable server.

pub mod config;
pub mod engine;
pub mod governance;
pub mod hook;
pub mod listener;
pub mod record;
pub mod responder;

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

pub use config::Config;
pub use engine::{Arrival, Engine, Outcome};
pub use governance::{Governance, PollRecord};
pub use hook::PacketHook;
pub use listener::{Listener, Responders, WorkerPool};
pub use record::{Definition, RecordError, RecordSource, Source, UnknownMacHook};
pub use responder::{interface_mac, RawResponder, Responder, UdpResponder};

#[derive(Debug)]
pub enum Error {
    /// §7 `Fatal`: a listening socket failed to bind at startup.
    Bind(io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bind(e) => write!(f, "failed to bind listening socket: {e}"),
        }
    }
}

impl std::error::Error for Error {}

/// A fully wired, not-yet-running server: the engine, the governance
/// state, the listener's bound sockets, and the poll-tick thread handle.
/// `run` blocks the calling thread forever; `stats` gives the operator
/// surface (§6 "Operator outputs") an external caller can poll.
pub struct Server {
    listener: Listener,
    pool: WorkerPool,
    governance: Arc<Governance>,
    _poll_thread: std::thread::JoinHandle<()>,
}

impl Server {
    /// Binds every socket the configuration calls for and assembles the
    /// engine. Returns [`Error::Bind`] on any socket failure — per §7,
    /// this is the one error class that is fatal rather than discarded.
    pub fn build(
        config: &Config,
        record_source: Box<dyn RecordSource>,
        unknown_mac_hook: Option<UnknownMacHook>,
        hook: Option<PacketHook>,
    ) -> Result<Self, Error> {
        let governance = Arc::new(Governance::new(
            config.governance_enabled,
            config.threshold,
            config.misbehave_timeout_secs,
        ));

        let source = Source::new(
            record_source,
            config.use_cache,
            config.concurrency_limit,
            unknown_mac_hook,
        );

        let server_udp = UdpResponder::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.server_port))
            .map_err(Error::Bind)?;
        let pxe_udp = config
            .pxe_port
            .map(|port| UdpResponder::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)))
            .transpose()
            .map_err(Error::Bind)?;

        let raw = match &config.response_interface {
            Some(interface) => {
                let mac = interface_mac(interface).map_err(Error::Bind)?;
                Some(RawResponder::bind(interface, mac, config.server_ip).map_err(Error::Bind)?)
            }
            None => None,
        };
        let raw_available = raw.is_some();

        let responders = Arc::new(Responders {
            server_udp,
            server_port: config.server_port,
            pxe_udp,
            pxe_port: config.pxe_port,
            raw,
        });

        let engine = Arc::new(Engine {
            server_ip: config.server_ip,
            server_port: config.server_port,
            client_port: config.client_port,
            pxe_port: config.pxe_port,
            raw_available,
            allow_local_dhcp: config.allow_local_dhcp,
            allow_relays: config.allow_relays,
            allowed_relays: config.allowed_relays.clone(),
            authoritative: config.authoritative,
            nak_renewals: config.nak_renewals,
            unknown_timeout_secs: config.unknown_timeout_secs,
            record_source: source,
            governance: governance.clone(),
            hook,
        });

        let poll_interval = Duration::from_secs(config.polling_interval_secs.max(1));
        let listener = Listener::new(responders.clone(), config.datagram_buffer_size, poll_interval);
        let pool = WorkerPool::start(config.worker_threads, engine, responders);
        let poll_thread = governance::spawn_poll_thread(governance.clone(), poll_interval);

        Ok(Self {
            listener,
            pool,
            governance,
            _poll_thread: poll_thread,
        })
    }

    /// Runs the listener's readiness loop on the calling thread. Only
    /// returns on a fatal socket error.
    pub fn run(&self) -> io::Result<()> {
        self.listener.run(&self.pool)
    }

    /// The bounded ring of poll records (§3, §6), for an embedding
    /// binary's own operator-facing surface.
    pub fn poll_history(&self) -> Vec<PollRecord> {
        self.governance.history_snapshot()
    }
}
