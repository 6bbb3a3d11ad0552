//! The listener (L, §4.6): owns the bound UDP sockets, waits on both with
//! a timeout of one polling interval, and dispatches each datagram to a
//! bounded pool of workers that run it through the protocol engine and
//! hand the reply to a responder (§4.2/§4.3).

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::unix::io::AsRawFd;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dhcp_wire::Packet;

use crate::engine::{Arrival, Engine, Outcome, Responder as ResponderKind, SendPlan};
use crate::responder::{RawResponder, Responder, UdpResponder};

/// The sockets a fully-resolved [`SendPlan`] can be handed off to, and
/// also the sockets the listener reads datagrams from — the same
/// `UdpResponder` serves both directions on a given port. `raw` is
/// `None` when no raw-L2 responder was configured, in which case the
/// engine never selects `RawBroadcast`/`RawUnicast` (`Engine::raw_available`
/// gates that), but a defensive fallback to plain UDP is kept here too.
pub struct Responders {
    pub server_udp: UdpResponder,
    pub server_port: u16,
    pub pxe_udp: Option<UdpResponder>,
    pub pxe_port: Option<u16>,
    pub raw: Option<RawResponder>,
}

impl Responders {
    fn for_plan(&self, plan: &SendPlan) -> &dyn Responder {
        match plan.responder {
            ResponderKind::RawBroadcast | ResponderKind::RawUnicast => {
                if let Some(raw) = &self.raw {
                    return raw;
                }
                self.udp_for_port(plan.source_port)
            }
            ResponderKind::Udp => self.udp_for_port(plan.source_port),
        }
    }

    fn udp_for_port(&self, source_port: u16) -> &dyn Responder {
        if self.pxe_port == Some(source_port) {
            if let Some(pxe) = &self.pxe_udp {
                return pxe;
            }
        }
        &self.server_udp
    }
}

/// Applies the send-policy table's broadcast-bit rule (§4.5.2), encodes,
/// transmits, and restores the bit — the restoration property §8 tests
/// for. Left to the listener rather than the engine because it straddles
/// wire encoding, which the engine never touches.
pub fn send_plan_to_wire(
    reply: &mut Packet,
    plan: &SendPlan,
    responders: &Responders,
) -> io::Result<usize> {
    let original_broadcast = reply.broadcast;
    reply.broadcast = plan.dest_ip == Ipv4Addr::BROADCAST;

    let mut buf = [0u8; 2048];
    let result = reply
        .encode(&mut buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
        .and_then(|encoded| {
            let dest_mac = plan.dest_mac.unwrap_or(dhcp_wire::raw::eth::EthernetHeader::BROADCAST);
            responders
                .for_plan(plan)
                .send(encoded, dest_mac, plan.dest_ip, plan.dest_port, plan.source_port)
        });

    reply.broadcast = original_broadcast;

    result
}

struct Job {
    datagram: Vec<u8>,
    len: usize,
    arrival: Arrival,
}

/// The bounded worker pool: each worker pulls one datagram at a time off
/// the shared queue, decodes it, runs it through the engine, and
/// transmits the reply (if any). This is the "each datagram on its own
/// worker task" model from §5, bounded by `worker_threads` so an
/// abusive flood of datagrams can't fork-bomb the process.
pub struct WorkerPool {
    sender: Option<SyncSender<Job>>,
    handles: Vec<std::thread::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(worker_threads: usize, engine: Arc<Engine>, responders: Arc<Responders>) -> Self {
        let worker_threads = worker_threads.max(1);
        let (sender, receiver) = sync_channel::<Job>(worker_threads * 4);
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..worker_threads)
            .map(|id| {
                let receiver = receiver.clone();
                let engine = engine.clone();
                let responders = responders.clone();

                std::thread::Builder::new()
                    .name(format!("dhcp-worker-{id}"))
                    .spawn(move || worker_loop(receiver, engine, responders))
                    .expect("failed to spawn DHCP worker thread")
            })
            .collect();

        Self {
            sender: Some(sender),
            handles,
        }
    }

    /// A full queue applies backpressure onto the listener thread rather
    /// than spawning unboundedly; under sustained overload the listener
    /// simply stops reading for a moment (`SyncSender::send` blocks).
    fn submit(&self, job: Job) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(job);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Dropping the sender first closes the channel, which unblocks
        // every worker's `recv()` so the joins below don't hang.
        self.sender.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(receiver: Arc<Mutex<Receiver<Job>>>, engine: Arc<Engine>, responders: Arc<Responders>) {
    loop {
        let job = {
            let receiver = receiver.lock().unwrap();
            receiver.recv()
        };

        let Ok(job) = job else {
            // Sender dropped: the listener is shutting down.
            return;
        };

        process_datagram(&job.datagram[..job.len], job.arrival, &engine, &responders);
    }
}

fn process_datagram(data: &[u8], arrival: Arrival, engine: &Engine, responders: &Responders) {
    let packet = match Packet::decode(data) {
        Ok(packet) => packet,
        Err(e) => {
            log::debug!("malformed packet from {}: {e}", arrival.source);
            engine.governance.record_discarded();
            return;
        }
    };

    match engine.handle(&packet, arrival) {
        Outcome::Sent(mut reply, plan) => {
            if let Err(e) = send_plan_to_wire(&mut reply, &plan, responders) {
                log::warn!("transmit failed to {}:{}: {e}", plan.dest_ip, plan.dest_port);
            }
        }
        Outcome::Dropped(reason) => {
            log::trace!("dropped packet from {}: {reason}", arrival.source);
        }
        Outcome::RecordLookupFailed(e) => {
            log::warn!("record lookup failed for request from {}: {e}", arrival.source);
            engine.governance.record_discarded();
        }
    }
}

/// Binds the DHCP (and optional PXE) listening socket(s) and runs the
/// readiness loop on the calling thread until a fatal socket error
/// occurs. Each ready datagram is read and handed to the worker pool;
/// the listener thread itself never blocks on the engine, a record
/// lookup, or a send.
pub struct Listener {
    responders: Arc<Responders>,
    buffer_size: usize,
    poll_timeout: Duration,
}

impl Listener {
    pub fn new(responders: Arc<Responders>, buffer_size: usize, poll_timeout: Duration) -> Self {
        Self {
            responders,
            buffer_size,
            poll_timeout,
        }
    }

    /// Runs forever, dispatching each received datagram to `pool`. Only
    /// returns on a fatal socket error (§7 `Fatal`).
    pub fn run(&self, pool: &WorkerPool) -> io::Result<()> {
        loop {
            let readiness = self.poll_ready()?;

            if readiness.server_ready {
                self.read_and_dispatch(self.responders.server_udp.socket(), false, pool)?;
            }
            if readiness.pxe_ready {
                if let Some(pxe_udp) = &self.responders.pxe_udp {
                    self.read_and_dispatch(pxe_udp.socket(), true, pool)?;
                }
            }
        }
    }

    fn read_and_dispatch(
        &self,
        socket: &socket2::Socket,
        on_pxe_socket: bool,
        pool: &WorkerPool,
    ) -> io::Result<()> {
        let mut buf = vec![std::mem::MaybeUninit::new(0u8); self.buffer_size];

        match socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                let source = from
                    .as_socket_ipv4()
                    .unwrap_or_else(|| SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));

                let datagram: Vec<u8> = buf[..len]
                    .iter()
                    .map(|b| unsafe { b.assume_init() })
                    .collect();

                pool.submit(Job {
                    len,
                    datagram,
                    arrival: Arrival {
                        source,
                        on_pxe_socket,
                    },
                });

                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn poll_ready(&self) -> io::Result<Readiness> {
        let mut fds = vec![libc::pollfd {
            fd: self.responders.server_udp.socket().as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        }];

        if let Some(pxe_udp) = &self.responders.pxe_udp {
            fds.push(libc::pollfd {
                fd: pxe_udp.socket().as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            });
        }

        let timeout_ms = self.poll_timeout.as_millis().min(i32::MAX as u128) as i32;
        let ready = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };

        if ready < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Readiness {
            server_ready: fds[0].revents & libc::POLLIN != 0,
            pxe_ready: fds.get(1).is_some_and(|pollfd| pollfd.revents & libc::POLLIN != 0),
        })
    }
}

struct Readiness {
    server_ready: bool,
    pxe_ready: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Responder as ResponderKind;

    #[test]
    fn send_plan_to_wire_restores_broadcast_bit() {
        let mut chaddr = [0u8; 16];
        chaddr[..6].copy_from_slice(&[1, 2, 3, 4, 5, 6]);

        let mut reply = Packet {
            reply: true,
            hops: 0,
            xid: 1,
            secs: 0,
            broadcast: false,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            hlen: 6,
            options: {
                let mut o = Vec::new();
                dhcp_wire::options::set_message_type(&mut o, dhcp_wire::MessageType::Offer);
                o
            },
            overrides: dhcp_wire::Override::default(),
        };

        let plan = SendPlan {
            responder: ResponderKind::Udp,
            dest_mac: None,
            dest_ip: Ipv4Addr::BROADCAST,
            dest_port: 68,
            source_port: 67,
        };

        let responders = Responders {
            server_udp: UdpResponder::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).unwrap(),
            server_port: 67,
            pxe_udp: None,
            pxe_port: None,
            raw: None,
        };

        let before = reply.broadcast;
        let _ = send_plan_to_wire(&mut reply, &plan, &responders);
        assert_eq!(reply.broadcast, before);
    }
}
