//! Responders (R2, R3, §4.2/§4.3): the three ways a reply datagram can
//! reach a client that may not yet have a usable IP stack (pre-lease
//! broadcast) or be reachable through the kernel's normal routing (the
//! PXE raw-L2 path).

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::unix::io::AsRawFd;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use dhcp_wire::raw::{self, eth::EthernetHeader};

/// Common contract for every responder: hand it a fully-encoded DHCP
/// datagram plus where it should go, and it worries about the framing.
pub trait Responder: Send + Sync {
    fn send(
        &self,
        datagram: &[u8],
        dest_mac: [u8; 6],
        dest_ip: Ipv4Addr,
        dest_port: u16,
        source_port: u16,
    ) -> io::Result<usize>;
}

/// R3: an ordinary UDP socket bound to the server's interface, used
/// whenever the kernel's own routing can reach the destination — either
/// because it's a genuine unicast reply, or because `SO_BROADCAST` lets
/// us hit the local segment's broadcast address.
pub struct UdpResponder {
    socket: Socket,
}

impl UdpResponder {
    /// Binds a socket suitable for both the listener's reads and this
    /// responder's sends on the same port (§4.6): `SO_REUSEADDR` (and
    /// `SO_REUSEPORT` where supported), `SO_BROADCAST`, non-blocking so
    /// the listener can drive it from its `poll` loop.
    pub fn bind(bind_addr: SocketAddrV4) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(target_os = "linux")]
        socket.set_reuse_port(true)?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&SockAddr::from(bind_addr))?;

        Ok(Self { socket })
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }
}

impl Responder for UdpResponder {
    fn send(
        &self,
        datagram: &[u8],
        _dest_mac: [u8; 6],
        dest_ip: Ipv4Addr,
        dest_port: u16,
        _source_port: u16,
    ) -> io::Result<usize> {
        let dest = SocketAddrV4::new(dest_ip, dest_port);
        self.socket.send_to(datagram, &SockAddr::from(dest))
    }
}

/// R2: a raw `AF_PACKET` socket that builds the Ethernet + IPv4 + UDP
/// frame by hand and writes it straight to the wire, bypassing ARP —
/// the only way to reach a client that has announced an address the
/// kernel doesn't yet know a route for (§4.2).
pub struct RawResponder {
    socket: Socket,
    interface_mac: [u8; 6],
    interface_index: i32,
    server_ip: Ipv4Addr,
}

impl RawResponder {
    pub fn bind(interface: &str, interface_mac: [u8; 6], server_ip: Ipv4Addr) -> io::Result<Self> {
        let socket = Socket::new(
            Domain::PACKET,
            Type::RAW,
            Some(Protocol::from((libc::ETH_P_IP as u16).to_be() as i32)),
        )?;
        socket.bind_device(Some(interface.as_bytes()))?;

        let interface_index = interface_index(interface)?;

        Ok(Self {
            socket,
            interface_mac,
            interface_index,
            server_ip,
        })
    }
}

impl Responder for RawResponder {
    fn send(
        &self,
        datagram: &[u8],
        dest_mac: [u8; 6],
        dest_ip: Ipv4Addr,
        dest_port: u16,
        source_port: u16,
    ) -> io::Result<usize> {
        let mut buf = vec![0u8; EthernetHeader::SIZE + 20 + 8 + datagram.len()];

        let frame = raw::eth_ip_udp_encode(
            &mut buf,
            self.interface_mac,
            dest_mac,
            SocketAddrV4::new(self.server_ip, source_port),
            SocketAddrV4::new(dest_ip, dest_port),
            |out| {
                out[..datagram.len()].copy_from_slice(datagram);
                Ok(datagram.len())
            },
        )
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        let dest = sockaddr_ll(self.interface_index, dest_mac);
        self.socket.send_to(frame, &dest)
    }
}

fn interface_index(name: &str) -> io::Result<i32> {
    let cname = std::ffi::CString::new(name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "interface name has an embedded NUL"))?;

    let index = unsafe { libc::if_nametoindex(cname.as_ptr()) };
    if index == 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(index as i32)
}

fn sockaddr_ll(interface_index: i32, dest_mac: [u8; 6]) -> SockAddr {
    let mut storage: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
    storage.sll_family = libc::AF_PACKET as u16;
    storage.sll_protocol = (libc::ETH_P_IP as u16).to_be();
    storage.sll_ifindex = interface_index;
    storage.sll_halen = 6;
    storage.sll_addr[..6].copy_from_slice(&dest_mac);

    unsafe {
        SockAddr::init(|addr_storage, len| {
            let addr_storage = addr_storage as *mut libc::sockaddr_ll;
            std::ptr::write(addr_storage, storage);
            *len = std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
            Ok(())
        })
        .map(|(_, addr)| addr)
        .expect("writing a sockaddr_ll into stack-sized storage cannot fail")
    }
}

/// Reads the MAC address of a named interface, used at startup to learn
/// the source MAC for the raw responder (no direct `edge-raw`/ambient-crate
/// equivalent — `socket2`/`libc` only expose this through `SIOCGIFHWADDR`).
pub fn interface_mac(interface: &str) -> io::Result<[u8; 6]> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;

    let mut ifreq: libc::ifreq = unsafe { std::mem::zeroed() };
    let name_bytes = interface.as_bytes();
    if name_bytes.len() >= ifreq.ifr_name.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "interface name too long",
        ));
    }

    for (dst, src) in ifreq.ifr_name.iter_mut().zip(name_bytes) {
        *dst = *src as libc::c_char;
    }

    let ret = unsafe { libc::ioctl(socket.as_raw_fd(), libc::SIOCGIFHWADDR, &mut ifreq) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }

    let mut mac = [0u8; 6];
    for (dst, src) in mac.iter_mut().zip(unsafe { ifreq.ifr_ifru.ifru_hwaddr.sa_data.iter() }) {
        *dst = *src as u8;
    }

    Ok(mac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CapturingResponder {
        sends: Arc<AtomicUsize>,
    }

    impl Responder for CapturingResponder {
        fn send(
            &self,
            _datagram: &[u8],
            _dest_mac: [u8; 6],
            _dest_ip: Ipv4Addr,
            _dest_port: u16,
            _source_port: u16,
        ) -> io::Result<usize> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }
    }

    #[test]
    fn responder_trait_object_is_callable() {
        let sends = Arc::new(AtomicUsize::new(0));
        let responder: Box<dyn Responder> = Box::new(CapturingResponder {
            sends: sends.clone(),
        });

        responder
            .send(&[0u8; 4], [0; 6], Ipv4Addr::BROADCAST, 68, 67)
            .unwrap();

        assert_eq!(sends.load(Ordering::SeqCst), 1);
    }
}
