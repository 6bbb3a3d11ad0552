//! The BOOTP/DHCP packet codec (§4.1): fixed 236-byte header, magic
//! cookie, then the options area handled by [`crate::options`].

use std::net::Ipv4Addr;

use crate::bytes::{BytesIn, BytesOut};
use crate::message::MessageType;
use crate::options::{self, RawOption};

#[derive(Debug)]
pub enum Error {
    Bytes(crate::bytes::Error),
    Options(options::Error),
    TooShort,
    InvalidHlen,
    MissingCookie,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Bytes(e) => write!(f, "{}", e),
            Self::Options(e) => write!(f, "{}", e),
            Self::TooShort => write!(f, "Datagram shorter than the minimum BOOTP size"),
            Self::InvalidHlen => write!(f, "Unsupported hardware address length"),
            Self::MissingCookie => write!(f, "Missing magic cookie"),
        }
    }
}

impl std::error::Error for Error {}

impl From<crate::bytes::Error> for Error {
    fn from(value: crate::bytes::Error) -> Self {
        Self::Bytes(value)
    }
}

impl From<options::Error> for Error {
    fn from(value: options::Error) -> Self {
        Self::Options(value)
    }
}

const COOKIE: [u8; 4] = [99, 130, 83, 99];

const BOOT_REQUEST: u8 = 1;
const BOOT_REPLY: u8 = 2;

/// `sname` (64 bytes) + `file` (128 bytes), always zeroed by this
/// implementation: static DHCP has no use for boot-server/filename
/// fields beyond what PXE conveys through options 93/94/97/66/67.
const SNAME_AND_FILE: usize = 64 + 128;

/// Fixed BOOTP header size, before the 4-byte magic cookie.
const HEADER_SIZE: usize = 236;

/// Minimum wire datagram the engine emits. Some clients misbehave on
/// anything shorter.
pub const MIN_DATAGRAM_SIZE: usize = 300;

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Override {
    pub dest_mac: Option<[u8; 6]>,
    pub dest_ip: Option<Ipv4Addr>,
    pub dest_port: Option<u16>,
    pub source_port: Option<u16>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Packet {
    pub reply: bool,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub broadcast: bool,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; 16],
    pub hlen: u8,
    pub options: Vec<RawOption>,
    /// Response-override slots (§3, §9): back-channel state the hook can
    /// set on an outbound packet, read only by the responder, never part
    /// of the wire encoding.
    pub overrides: Override,
}

impl Packet {
    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        if data.len() < HEADER_SIZE + 4 {
            return Err(Error::TooShort);
        }

        let mut bytes = BytesIn::new(data);

        let op = bytes.byte()?;
        let _htype = bytes.byte()?;
        let hlen = bytes.byte()?;
        if hlen > 16 {
            return Err(Error::InvalidHlen);
        }

        let hops = bytes.byte()?;
        let xid = u32::from_be_bytes(bytes.arr()?);
        let secs = u16::from_be_bytes(bytes.arr()?);
        let flags = u16::from_be_bytes(bytes.arr()?);
        let broadcast = flags & 0x8000 != 0;
        let ciaddr: Ipv4Addr = bytes.arr::<4>()?.into();
        let yiaddr: Ipv4Addr = bytes.arr::<4>()?.into();
        let siaddr: Ipv4Addr = bytes.arr::<4>()?.into();
        let giaddr: Ipv4Addr = bytes.arr::<4>()?.into();
        let chaddr: [u8; 16] = bytes.arr()?;

        for _ in 0..SNAME_AND_FILE {
            bytes.byte()?;
        }

        if bytes.arr::<4>()? != COOKIE {
            return Err(Error::MissingCookie);
        }

        let options = options::decode(bytes.remaining())?;

        Ok(Self {
            reply: op == BOOT_REPLY,
            hops,
            xid,
            secs,
            broadcast,
            ciaddr,
            yiaddr,
            siaddr,
            giaddr,
            chaddr,
            hlen,
            options,
            overrides: Override::default(),
        })
    }

    pub fn encode<'o>(&self, buf: &'o mut [u8]) -> Result<&'o [u8], Error> {
        let mut bytes = BytesOut::new(buf);

        bytes
            .byte(if self.reply { BOOT_REPLY } else { BOOT_REQUEST })?
            .byte(1)?
            .byte(self.hlen)?
            .byte(self.hops)?
            .push(&u32::to_be_bytes(self.xid))?
            .push(&u16::to_be_bytes(self.secs))?
            .push(&u16::to_be_bytes(if self.broadcast { 0x8000 } else { 0 }))?
            .push(&self.ciaddr.octets())?
            .push(&self.yiaddr.octets())?
            .push(&self.siaddr.octets())?
            .push(&self.giaddr.octets())?
            .push(&self.chaddr)?;

        for _ in 0..SNAME_AND_FILE {
            bytes.byte(0)?;
        }

        bytes.push(&COOKIE)?;

        options::encode(&self.options, &mut bytes)?;

        while bytes.len() < MIN_DATAGRAM_SIZE {
            bytes.byte(options::PAD)?;
        }

        let len = bytes.len();

        Ok(&buf[..len])
    }

    /// A decoded packet is serviceable DHCP iff option 53 carries one of
    /// the recognised message types (§4.1 Classify).
    pub fn message_type(&self) -> Option<MessageType> {
        options::message_type(&self.options)
    }

    /// Builds the reply skeleton for a request: `op=2`, same `xid`, same
    /// `chaddr`, `hops` reset, `secs` reset, broadcast flag copied from the
    /// request (overwritten again right before send, see §4.5.2).
    pub fn new_reply(&self) -> Self {
        Self {
            reply: true,
            hops: 0,
            xid: self.xid,
            secs: 0,
            broadcast: self.broadcast,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: self.giaddr,
            chaddr: self.chaddr,
            hlen: self.hlen,
            options: Vec::new(),
            overrides: Override::default(),
        }
    }

    pub fn mac(&self) -> [u8; 6] {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.chaddr[..6]);
        mac
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::RawOption;

    fn sample_request() -> Packet {
        Packet {
            reply: false,
            hops: 0,
            xid: 0xdead_beef,
            secs: 0,
            broadcast: true,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: {
                let mut c = [0u8; 16];
                c[..6].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0x00, 0x00, 0x01]);
                c
            },
            hlen: 6,
            options: vec![RawOption {
                code: options::CODE_MESSAGE_TYPE,
                data: vec![MessageType::Discover.to_wire()],
            }],
            overrides: Override::default(),
        }
    }

    #[test]
    fn decode_encode_round_trip_preserves_fixed_fields() {
        let request = sample_request();

        let mut buf = [0u8; 1024];
        let encoded = request.encode(&mut buf).unwrap();

        let decoded = Packet::decode(encoded).unwrap();

        assert_eq!(decoded.xid, request.xid);
        assert_eq!(decoded.chaddr, request.chaddr);
        assert_eq!(decoded.reply, request.reply);
        assert_eq!(decoded.broadcast, request.broadcast);
        assert_eq!(decoded.message_type(), Some(MessageType::Discover));
    }

    #[test]
    fn encode_pads_to_minimum_datagram_size() {
        let request = sample_request();
        let mut buf = [0u8; 1024];
        let encoded = request.encode(&mut buf).unwrap();

        assert!(encoded.len() >= MIN_DATAGRAM_SIZE);
    }

    #[test]
    fn decode_rejects_short_datagrams() {
        let buf = [0u8; 100];
        assert!(matches!(Packet::decode(&buf), Err(Error::TooShort)));
    }

    #[test]
    fn decode_rejects_missing_cookie() {
        let mut buf = [0u8; HEADER_SIZE + 4];
        buf[2] = 6; // hlen
        assert!(matches!(Packet::decode(&buf), Err(Error::MissingCookie)));
    }

    #[test]
    fn reply_preserves_xid_and_chaddr_and_sets_op_reply() {
        let request = sample_request();
        let reply = request.new_reply();

        assert_eq!(reply.xid, request.xid);
        assert_eq!(reply.chaddr, request.chaddr);
        assert!(reply.reply);
    }
}
