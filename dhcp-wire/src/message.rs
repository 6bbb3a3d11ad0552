use num_enum::{IntoPrimitive, TryFromPrimitive};

/// DHCP message type (option 53). Values per RFC 2132 §9.6 and the
/// RFC 4388 LEASEQUERY extension.
#[derive(Copy, Clone, PartialEq, Eq, Debug, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum MessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
    LeaseQuery = 10,
    LeaseUnknown = 12,
    LeaseActive = 13,
}

impl MessageType {
    /// A decoded packet is a serviceable DHCP message iff option 53 carries
    /// exactly one of these values.
    pub fn from_wire(byte: u8) -> Option<Self> {
        Self::try_from(byte).ok()
    }

    pub fn to_wire(self) -> u8 {
        self.into()
    }
}
