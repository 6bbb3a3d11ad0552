//! Hand-rolled Ethernet + IPv4 + UDP framing, for replies that must reach a
//! host that does not have the kernel's ARP table populated for it yet.
//!
//! Grounded on `edge-raw`'s `ip.rs`/`udp.rs`, extended with an Ethernet
//! header so the raw L2 responder can build a whole frame by hand.

use std::net::{Ipv4Addr, SocketAddrV4};

pub mod eth;
pub mod ip;
pub mod udp;

use crate::bytes::BytesIn;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Error {
    DataUnderflow,
    BufferOverflow,
    InvalidFormat,
    InvalidChecksum,
}

impl From<crate::bytes::Error> for Error {
    fn from(value: crate::bytes::Error) -> Self {
        match value {
            crate::bytes::Error::BufferOverflow => Self::BufferOverflow,
            crate::bytes::Error::DataUnderflow => Self::DataUnderflow,
            crate::bytes::Error::InvalidFormat => Self::InvalidFormat,
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let str = match self {
            Self::DataUnderflow => "Data underflow",
            Self::BufferOverflow => "Buffer overflow",
            Self::InvalidFormat => "Invalid format",
            Self::InvalidChecksum => "Invalid checksum",
        };

        write!(f, "{}", str)
    }
}

impl std::error::Error for Error {}

/// Decodes an IP packet and its UDP payload (no Ethernet header: used for
/// the ordinary UDP responder's socket reads).
#[allow(clippy::type_complexity)]
pub fn ip_udp_decode(
    packet: &[u8],
    filter_src: Option<SocketAddrV4>,
    filter_dst: Option<SocketAddrV4>,
) -> Result<Option<(SocketAddrV4, SocketAddrV4, &[u8])>, Error> {
    if let Some((src, dst, _proto, udp_packet)) = ip::decode(
        packet,
        filter_src.map(|a| *a.ip()).unwrap_or(Ipv4Addr::UNSPECIFIED),
        filter_dst.map(|a| *a.ip()).unwrap_or(Ipv4Addr::UNSPECIFIED),
        Some(udp::UdpPacketHeader::PROTO),
    )? {
        udp::decode(
            src,
            dst,
            udp_packet,
            filter_src.map(|a| a.port()),
            filter_dst.map(|a| a.port()),
        )
    } else {
        Ok(None)
    }
}

/// Encodes an IP packet and its UDP payload (no Ethernet header).
pub fn ip_udp_encode<F>(
    buf: &mut [u8],
    src: SocketAddrV4,
    dst: SocketAddrV4,
    encoder: F,
) -> Result<&[u8], Error>
where
    F: FnOnce(&mut [u8]) -> Result<usize, Error>,
{
    ip::encode(
        buf,
        *src.ip(),
        *dst.ip(),
        udp::UdpPacketHeader::PROTO,
        |buf| Ok(udp::encode(buf, src, dst, encoder)?.len()),
    )
}

/// Builds a full Ethernet + IPv4 + UDP frame in one shot, for the raw L2
/// responder.
pub fn eth_ip_udp_encode<F>(
    buf: &mut [u8],
    src_mac: [u8; 6],
    dst_mac: [u8; 6],
    src: SocketAddrV4,
    dst: SocketAddrV4,
    encoder: F,
) -> Result<&[u8], Error>
where
    F: FnOnce(&mut [u8]) -> Result<usize, Error>,
{
    let eth_hdr = eth::EthernetHeader::new(src_mac, dst_mac, eth::EthernetHeader::ETHERTYPE_IPV4);

    eth_hdr.encode_with_payload(buf, |buf| {
        Ok(ip_udp_encode(buf, src, dst, encoder)?.len())
    })
}

pub fn checksum_accumulate(bytes: &[u8], checksum_word: usize) -> u32 {
    let mut bytes = BytesIn::new(bytes);

    let mut sum: u32 = 0;
    while !bytes.is_empty() {
        let skip = (bytes.offset() >> 1) == checksum_word;
        let arr = bytes
            .arr()
            .ok()
            .unwrap_or_else(|| [bytes.byte().unwrap(), 0]);

        let word = if skip { 0 } else { u16::from_be_bytes(arr) };

        sum += word as u32;
    }

    sum
}

pub fn checksum_finish(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum >> 16) + (sum & 0xffff);
    }

    !sum as u16
}
