//! DHCPv4 wire codec: BOOTP/DHCP packet and option (de)serialization (RFC
//! 2131, 2132, 3046, 3396, 3925, 2610, 4174, 4388), and the raw Ethernet +
//! IPv4 + UDP frame assembly used by the raw L2 responder.
//!
//! This crate carries over the packet/option model of `edge-dhcp`
//! (`BytesIn`/`BytesOut` cursors, checksum math shared with `edge-raw`),
//! generalized from a zero-copy `no_std` slice view to owned, alloc-backed
//! storage: RFC 3396 reassembly of a repeated option code requires
//! concatenating bytes from multiple places in the datagram, which a
//! borrowed slice cannot represent without unsafe tricks.

pub mod bytes;
pub mod message;
pub mod options;
pub mod packet;
pub mod raw;

pub use message::MessageType;
pub use options::{RawOption, VendorOptions, PxeOptions};
pub use packet::{Override, Packet};

#[derive(Debug)]
pub enum Error {
    Packet(packet::Error),
    Raw(raw::Error),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Packet(e) => write!(f, "{}", e),
            Self::Raw(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<packet::Error> for Error {
    fn from(value: packet::Error) -> Self {
        Self::Packet(value)
    }
}

impl From<raw::Error> for Error {
    fn from(value: raw::Error) -> Self {
        Self::Raw(value)
    }
}
