//! Ethernet II framing. No checksum of its own (the frame check sequence is
//! appended by the NIC/driver) — this just prepends the 14-byte header.

use crate::bytes::{BytesIn, BytesOut};

use super::Error;

/// A parsed Ethernet II header.
#[derive(Clone, Debug)]
pub struct EthernetHeader {
    pub dst: [u8; 6],
    pub src: [u8; 6],
    pub ethertype: u16,
}

impl EthernetHeader {
    pub const SIZE: usize = 14;

    pub const ETHERTYPE_IPV4: u16 = 0x0800;

    pub const BROADCAST: [u8; 6] = [0xff; 6];

    pub fn new(src: [u8; 6], dst: [u8; 6], ethertype: u16) -> Self {
        Self { dst, src, ethertype }
    }

    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        let mut bytes = BytesIn::new(data);

        Ok(Self {
            dst: bytes.arr()?,
            src: bytes.arr()?,
            ethertype: u16::from_be_bytes(bytes.arr()?),
        })
    }

    pub fn encode<'o>(&self, buf: &'o mut [u8]) -> Result<&'o [u8], Error> {
        let mut bytes = BytesOut::new(buf);

        bytes
            .push(&self.dst)?
            .push(&self.src)?
            .push(&u16::to_be_bytes(self.ethertype))?;

        let len = bytes.len();

        Ok(&buf[..len])
    }

    pub fn decode_with_payload(packet: &[u8]) -> Result<Option<(Self, &[u8])>, Error> {
        if packet.len() < Self::SIZE {
            return Err(Error::DataUnderflow);
        }

        let hdr = Self::decode(packet)?;
        Ok(Some((hdr, &packet[Self::SIZE..])))
    }

    pub fn encode_with_payload<'o, F>(&self, buf: &'o mut [u8], encoder: F) -> Result<&'o [u8], Error>
    where
        F: FnOnce(&mut [u8]) -> Result<usize, Error>,
    {
        if buf.len() < Self::SIZE {
            Err(Error::BufferOverflow)?;
        }

        let (hdr_buf, payload_buf) = buf.split_at_mut(Self::SIZE);

        let payload_len = encoder(payload_buf)?;

        self.encode(hdr_buf)?;

        Ok(&buf[..Self::SIZE + payload_len])
    }
}
