//! The operator hook (§4.7): an optional callback invoked after a record
//! is resolved and before a reply is sent, letting the operator edit the
//! in-flight reply packet or veto it outright.

use std::net::Ipv4Addr;
use std::sync::Arc;

use dhcp_wire::{Packet, PxeOptions, VendorOptions};

/// Arguments mirror §4.7 exactly: the reply under construction, the
/// client MAC, the resolved record's assigned IP, the relay `giaddr` (if
/// relayed), the client's requesting subnet, the record's serial, and the
/// optional PXE/vendor option bundles decoded from the request. Returning
/// `false` vetoes the reply — the engine drops it as if no record had
/// been found.
pub type PacketHook = Arc<
    dyn Fn(
            &mut Packet,
            &[u8; 6],
            Ipv4Addr,
            Option<Ipv4Addr>,
            &str,
            i64,
            Option<&PxeOptions>,
            Option<&VendorOptions>,
        ) -> bool
        + Send
        + Sync,
>;

#[cfg(test)]
mod tests {
    use super::*;
    use dhcp_wire::options;

    fn sample_reply() -> Packet {
        Packet {
            reply: true,
            hops: 0,
            xid: 1,
            secs: 0,
            broadcast: false,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: [0u8; 16],
            hlen: 6,
            options: Vec::new(),
            overrides: dhcp_wire::Override::default(),
        }
    }

    #[test]
    fn hook_can_veto_and_can_edit_options() {
        let veto: PacketHook = Arc::new(|_packet, mac, _ip, _giaddr, _subnet, _serial, _pxe, _vendor| {
            mac[0] != 0xff
        });

        let mut reply = sample_reply();
        assert!(!veto(
            &mut reply,
            &[0xff, 0, 0, 0, 0, 0],
            Ipv4Addr::UNSPECIFIED,
            None,
            "subnet",
            1,
            None,
            None,
        ));

        let edit: PacketHook = Arc::new(|packet, _mac, _ip, _giaddr, _subnet, _serial, _pxe, _vendor| {
            options::set_string(&mut packet.options, options::CODE_HOST_NAME, "edited");
            true
        });

        assert!(edit(
            &mut reply,
            &[0, 0, 0, 0, 0, 1],
            Ipv4Addr::UNSPECIFIED,
            None,
            "subnet",
            1,
            None,
            None,
        ));
        assert_eq!(
            options::get_string(&reply.options, options::CODE_HOST_NAME)
                .transpose()
                .unwrap()
                .as_deref(),
            Some("edited")
        );
    }
}
