//! The protocol engine (P, §4.5): pre-flight admission, per-message-type
//! handlers, packet loading, and the send-policy decision.

use std::net::Ipv4Addr;
use std::sync::Arc;

use dhcp_wire::options::{self, CODE_BROADCAST_ADDRESS, CODE_DOMAIN_NAME, CODE_DOMAIN_NAME_SERVER,
    CODE_HOST_NAME, CODE_IP_ADDRESS_LEASE_TIME, CODE_NTP_SERVERS, CODE_ROUTER,
    CODE_SERVER_IDENTIFIER, CODE_SUBNET_MASK};
use dhcp_wire::{MessageType, Packet};

use crate::governance::Governance;
use crate::hook::PacketHook;
use crate::record::{Definition, RecordError, Source};

/// Where a datagram arrived from and on which listening socket, the
/// context the engine needs beyond the decoded packet itself.
#[derive(Clone, Copy, Debug)]
pub struct Arrival {
    pub source: std::net::SocketAddrV4,
    pub on_pxe_socket: bool,
}

/// The fully-resolved instruction for where and how to emit a reply,
/// per the send-policy table (§4.5.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Responder {
    RawBroadcast,
    RawUnicast,
    Udp,
}

#[derive(Clone, Debug)]
pub struct SendPlan {
    pub responder: Responder,
    pub dest_mac: Option<[u8; 6]>,
    pub dest_ip: Ipv4Addr,
    pub dest_port: u16,
    pub source_port: u16,
}

pub struct Engine {
    pub server_ip: Ipv4Addr,
    pub server_port: u16,
    pub client_port: u16,
    pub pxe_port: Option<u16>,
    pub raw_available: bool,
    pub allow_local_dhcp: bool,
    pub allow_relays: bool,
    pub allowed_relays: Vec<Ipv4Addr>,
    pub authoritative: bool,
    pub nak_renewals: bool,
    pub unknown_timeout_secs: i64,
    pub record_source: Source,
    pub governance: Arc<Governance>,
    pub hook: Option<PacketHook>,
}

/// What the engine decided to do with a request, reported back to the
/// listener/worker for error-taxonomy bookkeeping (§7) and tests.
#[derive(Debug)]
pub enum Outcome {
    Sent(Packet, SendPlan),
    Dropped(&'static str),
    RecordLookupFailed(RecordError),
}

impl Engine {
    /// §4.5 pre-flight: relay acceptance, then governance admission.
    fn preflight(&self, packet: &Packet, arrival: &Arrival) -> Result<(), &'static str> {
        if packet.giaddr != Ipv4Addr::UNSPECIFIED {
            let accepted = self.allow_relays
                && (self.allowed_relays.is_empty() || self.allowed_relays.contains(&packet.giaddr));
            if !accepted {
                self.governance.record_discarded();
                return Err("relay not permitted");
            }
        } else if !(self.allow_local_dhcp || arrival.on_pxe_socket) {
            self.governance.record_discarded();
            return Err("local dhcp not permitted");
        }

        let mac = packet.mac();
        if !self.governance.admit(&mac) {
            return Err("governance rejected");
        }

        Ok(())
    }

    pub fn handle(&self, packet: &Packet, arrival: Arrival) -> Outcome {
        if let Err(reason) = self.preflight(packet, &arrival) {
            return Outcome::Dropped(reason);
        }

        match packet.message_type() {
            Some(MessageType::Discover) => self.handle_discover(packet, &arrival),
            Some(MessageType::Request) => self.handle_request(packet, &arrival),
            Some(MessageType::Inform) => self.handle_inform(packet, &arrival),
            Some(MessageType::Decline) => self.handle_decline(packet),
            Some(MessageType::Release) => self.handle_release(packet),
            Some(MessageType::LeaseQuery) => self.handle_lease_query(packet, &arrival),
            _ => {
                self.governance.record_discarded();
                Outcome::Dropped("unserviceable message type")
            }
        }
    }

    fn resolve(&self, mac: &[u8; 6]) -> Result<Option<Definition>, Outcome> {
        self.record_source.resolve(mac).map_err(|e| {
            log::warn!("record source lookup failed for {mac:02x?}: {e}");
            Outcome::RecordLookupFailed(e)
        })
    }

    fn handle_discover(&self, packet: &Packet, arrival: &Arrival) -> Outcome {
        let mac = packet.mac();

        let definition = match self.resolve(&mac) {
            Ok(d) => d,
            Err(outcome) => return outcome,
        };

        let Some(definition) = definition else {
            return if self.authoritative {
                let mut reply = packet.new_reply();
                options::set_message_type(&mut reply.options, MessageType::Nak);
                options::set_ipv4(&mut reply.options, CODE_SERVER_IDENTIFIER, self.server_ip);
                self.finish_send(reply, packet, arrival)
            } else {
                self.governance.quarantine(&mac, self.unknown_timeout_secs);
                Outcome::Dropped("unknown MAC on DISCOVER")
            };
        };

        let rapid_commit = options::has_rapid_commit(&packet.options);
        let response_type = if rapid_commit {
            MessageType::Ack
        } else {
            MessageType::Offer
        };

        let mut reply = packet.new_reply();
        options::set_message_type(&mut reply.options, response_type);
        if rapid_commit {
            options::set_rapid_commit(&mut reply.options);
        }
        load_definition(&mut reply, &definition, true);

        if !self.run_hook(&mut reply, &mac, &definition, packet) {
            return Outcome::Dropped("hook veto");
        }

        self.finish_send(reply, packet, arrival)
    }

    fn handle_request(&self, packet: &Packet, arrival: &Arrival) -> Outcome {
        let mac = packet.mac();
        let sid = options::server_identifier(&packet.options);
        let rip = options::requested_ip_address(&packet.options);
        let ciaddr_set = packet.ciaddr != Ipv4Addr::UNSPECIFIED;

        enum State {
            Selecting,
            InitReboot,
            Renewing,
            Rebinding,
        }

        let state = match (sid, rip, ciaddr_set) {
            (Some(_), _, false) => State::Selecting,
            (None, Some(_), false) => State::InitReboot,
            (None, None, true) => {
                if arrival.source.ip() == &packet.ciaddr {
                    State::Renewing
                } else {
                    State::Rebinding
                }
            }
            _ => return Outcome::Dropped("unrecognised REQUEST sub-state"),
        };

        if matches!(state, State::Selecting) {
            if sid != Some(self.server_ip) {
                return Outcome::Dropped("SELECTING for another server");
            }
        }

        if self.nak_renewals
            && !arrival.on_pxe_socket
            && matches!(state, State::Renewing | State::Rebinding)
        {
            return self.nak(packet, arrival);
        }

        let definition = match self.resolve(&mac) {
            Ok(d) => d,
            Err(outcome) => return outcome,
        };

        let claimed_ip = rip.or(if ciaddr_set { Some(packet.ciaddr) } else { None });

        let matches_record = definition
            .as_ref()
            .zip(claimed_ip)
            .map(|(d, claimed)| d.ip == claimed)
            .unwrap_or(false);

        if matches_record {
            let definition = definition.unwrap();
            let mut reply = packet.new_reply();
            options::set_message_type(&mut reply.options, MessageType::Ack);
            load_definition(&mut reply, &definition, true);

            if !self.run_hook(&mut reply, &mac, &definition, packet) {
                return Outcome::Dropped("hook veto");
            }

            self.finish_send(reply, packet, arrival)
        } else {
            match state {
                State::Rebinding => {
                    log::warn!(
                        "rebind_mismatch mac={mac:02x?} claimed={claimed_ip:?}: no matching record, dropping silently for operator review"
                    );
                    Outcome::Dropped("rebind_mismatch")
                }
                _ => self.nak(packet, arrival),
            }
        }
    }

    fn nak(&self, packet: &Packet, arrival: &Arrival) -> Outcome {
        let mut reply = packet.new_reply();
        options::set_message_type(&mut reply.options, MessageType::Nak);
        options::set_ipv4(&mut reply.options, CODE_SERVER_IDENTIFIER, self.server_ip);
        self.finish_send(reply, packet, arrival)
    }

    fn handle_inform(&self, packet: &Packet, arrival: &Arrival) -> Outcome {
        let mac = packet.mac();

        if packet.ciaddr == Ipv4Addr::UNSPECIFIED {
            self.governance.quarantine(&mac, self.unknown_timeout_secs);
            return Outcome::Dropped("INFORM without ciaddr");
        }

        let definition = match self.resolve(&mac) {
            Ok(d) => d,
            Err(outcome) => return outcome,
        };

        let Some(definition) = definition else {
            self.governance.quarantine(&mac, self.unknown_timeout_secs);
            return Outcome::Dropped("unknown MAC on INFORM");
        };

        let mut reply = packet.new_reply();
        options::set_message_type(&mut reply.options, MessageType::Ack);
        // INFORM carries extra parameters only: no yiaddr, no lease time.
        load_definition(&mut reply, &definition, false);

        if !self.run_hook(&mut reply, &mac, &definition, packet) {
            return Outcome::Dropped("hook veto");
        }

        reply.overrides.dest_ip = Some(packet.ciaddr);
        self.finish_send(reply, packet, arrival)
    }

    fn handle_decline(&self, packet: &Packet) -> Outcome {
        let mac = packet.mac();
        let sid = options::server_identifier(&packet.options);
        let declined = options::requested_ip_address(&packet.options);

        match self.record_source.resolve(&mac) {
            Ok(Some(definition)) if sid == Some(self.server_ip) && declined == Some(definition.ip) => {
                log::warn!("DECLINE for {declined:?} from {mac:02x?}: address conflict reported by client");
            }
            _ => {
                log::warn!("DECLINE from {mac:02x?} does not match any record we issued; possibly misconfigured client");
            }
        }

        Outcome::Dropped("DECLINE is advisory only")
    }

    fn handle_release(&self, packet: &Packet) -> Outcome {
        let mac = packet.mac();
        log::info!("RELEASE from {mac:02x?}, ciaddr={}", packet.ciaddr);
        Outcome::Dropped("RELEASE is advisory only")
    }

    fn handle_lease_query(&self, packet: &Packet, arrival: &Arrival) -> Outcome {
        let mac = packet.mac();

        let definition = match self.resolve(&mac) {
            Ok(d) => d,
            Err(outcome) => return outcome,
        };

        let mut reply = packet.new_reply();

        match definition {
            Some(definition) => {
                options::set_message_type(&mut reply.options, MessageType::LeaseActive);
                reply.yiaddr = definition.ip;
            }
            None => {
                options::set_message_type(&mut reply.options, MessageType::LeaseUnknown);
            }
        }

        self.finish_send(reply, packet, arrival)
    }

    fn run_hook(
        &self,
        reply: &mut Packet,
        mac: &[u8; 6],
        definition: &Definition,
        request: &Packet,
    ) -> bool {
        let Some(hook) = &self.hook else {
            return true;
        };

        let giaddr = (request.giaddr != Ipv4Addr::UNSPECIFIED).then_some(request.giaddr);
        let pxe_opts = options::pxe_options(&request.options);
        let vendor_opts = options::vendor_options(&request.options).ok().flatten();

        hook(
            reply,
            mac,
            definition.ip,
            giaddr,
            &definition.subnet,
            definition.serial,
            pxe_opts.as_ref(),
            vendor_opts.as_ref(),
        )
    }

    /// Applies the send-policy table (§4.5.2) and hands the reply and its
    /// destination plan back to the caller for transmission. The broadcast
    /// bit is left untouched here: it is forced to match the destination
    /// only around the encode+send step itself, and restored immediately
    /// after (§8 restoration property) — see `listener::send_plan_to_wire`.
    fn finish_send(&self, reply: Packet, request: &Packet, arrival: &Arrival) -> Outcome {
        let plan = self.send_plan(&reply, request, arrival);
        Outcome::Sent(reply, plan)
    }

    fn send_plan(&self, reply: &Packet, request: &Packet, arrival: &Arrival) -> SendPlan {
        let dest_port = if arrival.on_pxe_socket {
            self.pxe_port.unwrap_or(self.client_port)
        } else {
            self.client_port
        };

        let source_unspecified = *arrival.source.ip() == Ipv4Addr::UNSPECIFIED;

        let mut plan = if request.giaddr != Ipv4Addr::UNSPECIFIED {
            // Relayed: return to the relay, not the client (§4.5.2 row 3).
            SendPlan {
                responder: Responder::Udp,
                dest_mac: None,
                dest_ip: *arrival.source.ip(),
                dest_port: self.server_port,
                source_port: self.server_port,
            }
        } else if source_unspecified && (request.broadcast || !self.raw_available) {
            // Row 1: broadcast, raw if available else kernel UDP broadcast.
            SendPlan {
                responder: if self.raw_available {
                    Responder::RawBroadcast
                } else {
                    Responder::Udp
                },
                dest_mac: None,
                dest_ip: Ipv4Addr::BROADCAST,
                dest_port,
                source_port: self.server_port,
            }
        } else if source_unspecified {
            // Row 2: client has no IP yet but didn't ask for broadcast and
            // L2 is available — address the freshly-assigned yiaddr by MAC.
            SendPlan {
                responder: Responder::RawUnicast,
                dest_mac: Some(request.mac()),
                dest_ip: reply.yiaddr,
                dest_port,
                source_port: self.server_port,
            }
        } else {
            // Row 4: direct unicast from a client that already has an IP.
            SendPlan {
                responder: Responder::Udp,
                dest_mac: None,
                dest_ip: *arrival.source.ip(),
                dest_port,
                source_port: self.server_port,
            }
        };

        // PXE path (row 5): the reply must originate from the PXE port, not
        // the ordinary server port.
        if arrival.on_pxe_socket {
            plan.source_port = self.pxe_port.unwrap_or(self.server_port);
            if !source_unspecified {
                plan.dest_ip = *arrival.source.ip();
            } else if packet_ciaddr_is_set(request) {
                plan.dest_ip = request.ciaddr;
            }
        }

        // Hook response-override slots win over everything except the
        // broadcast destination (§4.5.2).
        let overrides = &reply.overrides;
        if plan.dest_ip != Ipv4Addr::BROADCAST {
            if let Some(ip) = overrides.dest_ip {
                plan.dest_ip = ip;
            }
        }
        if let Some(mac) = overrides.dest_mac {
            plan.dest_mac = Some(mac);
        }
        if let Some(port) = overrides.dest_port {
            plan.dest_port = port;
        }
        if let Some(port) = overrides.source_port {
            plan.source_port = port;
        }

        plan
    }
}

fn packet_ciaddr_is_set(packet: &Packet) -> bool {
    packet.ciaddr != Ipv4Addr::UNSPECIFIED
}

/// §4.5.1 packet loading: yiaddr, lease time (both omitted for INFORM),
/// and every present optional field, finished off with the server
/// identifier.
fn load_definition(reply: &mut Packet, definition: &Definition, set_lease_fields: bool) {
    if set_lease_fields {
        reply.yiaddr = definition.ip;
        options::set_u32(&mut reply.options, CODE_IP_ADDRESS_LEASE_TIME, definition.lease_time_secs);
    }

    if let Some(gateway) = definition.gateway {
        options::set_ipv4(&mut reply.options, CODE_ROUTER, gateway);
    }
    if let Some(mask) = definition.subnet_mask {
        options::set_ipv4(&mut reply.options, CODE_SUBNET_MASK, mask);
    }
    if let Some(broadcast) = definition.broadcast_address {
        options::set_ipv4(&mut reply.options, CODE_BROADCAST_ADDRESS, broadcast);
    }
    if let Some(hostname) = &definition.hostname {
        options::set_string(&mut reply.options, CODE_HOST_NAME, hostname);
    }
    if let Some(domain) = &definition.domain_name {
        options::set_string(&mut reply.options, CODE_DOMAIN_NAME, domain);
    }
    if !definition.domain_name_servers.is_empty() {
        let capped: Vec<_> = definition
            .domain_name_servers
            .iter()
            .take(Definition::MAX_DNS_SERVERS)
            .copied()
            .collect();
        options::set_ipv4_list(&mut reply.options, CODE_DOMAIN_NAME_SERVER, &capped);
    }
    if !definition.ntp_servers.is_empty() {
        let capped: Vec<_> = definition
            .ntp_servers
            .iter()
            .take(Definition::MAX_NTP_SERVERS)
            .copied()
            .collect();
        options::set_ipv4_list(&mut reply.options, CODE_NTP_SERVERS, &capped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordSource};
    use std::net::SocketAddrV4;

    struct FixedSource(Option<Definition>);

    impl RecordSource for FixedSource {
        fn lookup_mac(&self, _mac: &[u8; 6]) -> Result<Option<Definition>, RecordError> {
            Ok(self.0.clone())
        }
    }

    fn sample_definition() -> Definition {
        Definition {
            ip: Ipv4Addr::new(192, 0, 2, 50),
            lease_time_secs: 3600,
            subnet: "s".into(),
            serial: 1,
            hostname: None,
            gateway: Some(Ipv4Addr::new(192, 0, 2, 1)),
            subnet_mask: Some(Ipv4Addr::new(255, 255, 255, 0)),
            broadcast_address: None,
            domain_name: None,
            domain_name_servers: Vec::new(),
            ntp_servers: Vec::new(),
            extra: None,
        }
    }

    fn engine(definition: Option<Definition>, authoritative: bool) -> Engine {
        Engine {
            server_ip: Ipv4Addr::new(192, 0, 2, 1),
            server_port: 67,
            client_port: 68,
            pxe_port: None,
            raw_available: false,
            allow_local_dhcp: true,
            allow_relays: false,
            allowed_relays: Vec::new(),
            authoritative,
            nak_renewals: false,
            unknown_timeout_secs: 30,
            record_source: Source::new(Box::new(FixedSource(definition)), false, 4, None),
            governance: Arc::new(Governance::new(false, 10, 300)),
            hook: None,
        }
    }

    fn discover_packet(mac: [u8; 6]) -> Packet {
        let mut chaddr = [0u8; 16];
        chaddr[..6].copy_from_slice(&mac);

        Packet {
            reply: false,
            hops: 0,
            xid: 42,
            secs: 0,
            broadcast: true,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            hlen: 6,
            options: {
                let mut o = Vec::new();
                options::set_message_type(&mut o, MessageType::Discover);
                o
            },
            overrides: dhcp_wire::Override::default(),
        }
    }

    fn arrival() -> Arrival {
        Arrival {
            source: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 68),
            on_pxe_socket: false,
        }
    }

    #[test]
    fn scenario_1_discover_known_mac_offers() {
        let engine = engine(Some(sample_definition()), false);
        let packet = discover_packet([0xaa, 0xbb, 0xcc, 0, 0, 1]);

        match engine.handle(&packet, arrival()) {
            Outcome::Sent(reply, plan) => {
                assert_eq!(reply.message_type(), Some(MessageType::Offer));
                assert_eq!(reply.yiaddr, Ipv4Addr::new(192, 0, 2, 50));
                assert_eq!(plan.dest_ip, Ipv4Addr::BROADCAST);
                assert_eq!(plan.dest_port, 68);
                assert_eq!(
                    options::get_u32(&reply.options, CODE_IP_ADDRESS_LEASE_TIME),
                    Some(3600)
                );
                assert_eq!(
                    options::get_ipv4(&reply.options, CODE_ROUTER),
                    Some(Ipv4Addr::new(192, 0, 2, 1))
                );
            }
            other => panic!("expected Sent, got {other:?}"),
        }
    }

    #[test]
    fn scenario_2_discover_unknown_mac_non_authoritative_drops_and_quarantines() {
        let engine = engine(None, false);
        let packet = discover_packet([0xaa, 0xbb, 0xcc, 0xff, 0xff, 0xff]);

        let outcome = engine.handle(&packet, arrival());
        assert!(matches!(outcome, Outcome::Dropped(_)));

        // A second DISCOVER from the same MAC is now rejected at
        // pre-flight because the quarantine put it on the ignore list.
        let second = engine.handle(&packet, arrival());
        assert!(matches!(second, Outcome::Dropped("governance rejected")));
    }

    #[test]
    fn scenario_3_discover_unknown_mac_authoritative_naks() {
        let engine = engine(None, true);
        let packet = discover_packet([0xaa, 0xbb, 0xcc, 0xff, 0xff, 0xff]);

        match engine.handle(&packet, arrival()) {
            Outcome::Sent(reply, plan) => {
                assert_eq!(reply.message_type(), Some(MessageType::Nak));
                assert_eq!(plan.dest_ip, Ipv4Addr::BROADCAST);
            }
            other => panic!("expected Sent(NAK), got {other:?}"),
        }
    }

    fn request_packet(mac: [u8; 6], sid: Option<Ipv4Addr>, rip: Option<Ipv4Addr>, ciaddr: Ipv4Addr) -> Packet {
        let mut chaddr = [0u8; 16];
        chaddr[..6].copy_from_slice(&mac);

        let mut options_list = Vec::new();
        options::set_message_type(&mut options_list, MessageType::Request);
        if let Some(sid) = sid {
            options::set_ipv4(&mut options_list, CODE_SERVER_IDENTIFIER, sid);
        }
        if let Some(rip) = rip {
            options::set_ipv4(
                &mut options_list,
                dhcp_wire::options::CODE_REQUESTED_IP_ADDRESS,
                rip,
            );
        }

        Packet {
            reply: false,
            hops: 0,
            xid: 99,
            secs: 0,
            broadcast: sid.is_some(),
            ciaddr,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            hlen: 6,
            options: options_list,
            overrides: dhcp_wire::Override::default(),
        }
    }

    #[test]
    fn scenario_4_request_selecting_known_mac_acks() {
        let engine = engine(Some(sample_definition()), false);
        let packet = request_packet(
            [0xaa, 0xbb, 0xcc, 0, 0, 1],
            Some(Ipv4Addr::new(192, 0, 2, 1)),
            Some(Ipv4Addr::new(192, 0, 2, 50)),
            Ipv4Addr::UNSPECIFIED,
        );

        match engine.handle(&packet, arrival()) {
            Outcome::Sent(reply, plan) => {
                assert_eq!(reply.message_type(), Some(MessageType::Ack));
                assert_eq!(reply.yiaddr, Ipv4Addr::new(192, 0, 2, 50));
                assert_eq!(plan.dest_ip, Ipv4Addr::BROADCAST);
            }
            other => panic!("expected Sent(ACK), got {other:?}"),
        }
    }

    #[test]
    fn scenario_5_request_renewing_known_mac_unicast_acks() {
        let engine = engine(Some(sample_definition()), false);
        let packet = request_packet(
            [0xaa, 0xbb, 0xcc, 0, 0, 1],
            None,
            None,
            Ipv4Addr::new(192, 0, 2, 50),
        );

        let renew_arrival = Arrival {
            source: SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 50), 68),
            on_pxe_socket: false,
        };

        match engine.handle(&packet, renew_arrival) {
            Outcome::Sent(reply, plan) => {
                assert_eq!(reply.message_type(), Some(MessageType::Ack));
                assert_eq!(plan.dest_ip, Ipv4Addr::new(192, 0, 2, 50));
                assert_eq!(plan.dest_port, 68);
            }
            other => panic!("expected Sent(ACK), got {other:?}"),
        }
    }

    #[test]
    fn scenario_6_eleven_discovers_governance_quarantines_the_eleventh() {
        let engine = Engine {
            governance: Arc::new(Governance::new(true, 10, 300)),
            ..engine(Some(sample_definition()), false)
        };
        let mac = [1, 2, 3, 4, 5, 6];

        for _ in 0..10 {
            let packet = discover_packet(mac);
            assert!(matches!(engine.handle(&packet, arrival()), Outcome::Sent(..)));
        }

        let packet = discover_packet(mac);
        assert!(matches!(
            engine.handle(&packet, arrival()),
            Outcome::Dropped("governance rejected")
        ));
    }
}
