//! DHCP options: raw tagged-variant storage (per RFC 3396, repeated codes
//! concatenated on decode) plus a typed accessor/builder view over it, and
//! the composite option codecs (RFC 3046, 3397, 3361, 3925, 2610, 4174).

use std::net::Ipv4Addr;

use crate::bytes::{BytesIn, BytesOut};
use crate::message::MessageType;

#[derive(Debug)]
pub enum Error {
    DataUnderflow,
    BufferOverflow,
    InvalidUtf8,
    MissingCookie,
    TooShort,
    MissingEnd,
    LengthOverrun,
    MixedSipMode,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let str = match self {
            Self::DataUnderflow => "Data underflow",
            Self::BufferOverflow => "Buffer overflow",
            Self::InvalidUtf8 => "Invalid UTF-8 in option value",
            Self::MissingCookie => "Missing magic cookie",
            Self::TooShort => "Datagram shorter than the minimum BOOTP size",
            Self::MissingEnd => "Options area has no END marker",
            Self::LengthOverrun => "Option length overruns the buffer",
            Self::MixedSipMode => "SIP servers option mixes FQDN and IPv4 entries",
        };

        write!(f, "{}", str)
    }
}

impl std::error::Error for Error {}

impl From<crate::bytes::Error> for Error {
    fn from(value: crate::bytes::Error) -> Self {
        match value {
            crate::bytes::Error::BufferOverflow => Self::BufferOverflow,
            crate::bytes::Error::DataUnderflow => Self::DataUnderflow,
            crate::bytes::Error::InvalidFormat => Self::LengthOverrun,
        }
    }
}

pub const END: u8 = 255;
pub const PAD: u8 = 0;

// Option codes referenced throughout the protocol engine.
pub const CODE_SUBNET_MASK: u8 = 1;
pub const CODE_ROUTER: u8 = 3;
pub const CODE_DOMAIN_NAME_SERVER: u8 = 6;
pub const CODE_HOST_NAME: u8 = 12;
pub const CODE_DOMAIN_NAME: u8 = 15;
pub const CODE_BROADCAST_ADDRESS: u8 = 28;
pub const CODE_REQUESTED_IP_ADDRESS: u8 = 50;
pub const CODE_IP_ADDRESS_LEASE_TIME: u8 = 51;
pub const CODE_SERVER_IDENTIFIER: u8 = 54;
pub const CODE_PARAMETER_REQUEST_LIST: u8 = 55;
pub const CODE_MESSAGE: u8 = 56;
pub const CODE_VENDOR_CLASS_IDENTIFIER: u8 = 60;
pub const CODE_CLIENT_IDENTIFIER: u8 = 61;
pub const CODE_NTP_SERVERS: u8 = 42;
pub const CODE_MESSAGE_TYPE: u8 = 53;
pub const CODE_RELAY_AGENT_INFORMATION: u8 = 82;
pub const CODE_RAPID_COMMIT: u8 = 80;
pub const CODE_CLIENT_SYSTEM_ARCH: u8 = 93;
pub const CODE_CLIENT_NETWORK_INTERFACE: u8 = 94;
pub const CODE_CLIENT_MACHINE_IDENTIFIER: u8 = 97;
pub const CODE_VENDOR_SPECIFIC_LEGACY: u8 = 43;
pub const CODE_DOMAIN_SEARCH: u8 = 119;
pub const CODE_NDS_SERVERS: u8 = 85;
pub const CODE_NDS_TREE_NAME: u8 = 86;
pub const CODE_SIP_SERVERS: u8 = 120;
pub const CODE_VENDOR_CLASS: u8 = 124;
pub const CODE_VENDOR_SPECIFIC: u8 = 125;
pub const CODE_SLP_DIRECTORY_AGENT: u8 = 78;
pub const CODE_SLP_SERVICE_SCOPE: u8 = 79;
pub const CODE_ISNS: u8 = 83;

/// One decoded option, post RFC 3396 reassembly: all wire occurrences of
/// the same code within a message are concatenated in order into one
/// `data` buffer.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RawOption {
    pub code: u8,
    pub data: Vec<u8>,
}

/// Decodes the options area of a BOOTP/DHCP datagram (everything after the
/// magic cookie). Stops at END; PAD bytes between options are skipped.
pub fn decode(data: &[u8]) -> Result<Vec<RawOption>, Error> {
    let mut bytes = BytesIn::new(data);
    let mut options: Vec<RawOption> = Vec::new();
    let mut seen_end = false;

    while !bytes.is_empty() {
        let code = bytes.byte()?;

        if code == END {
            seen_end = true;
            break;
        }

        if code == PAD {
            continue;
        }

        let len = bytes.byte()? as usize;
        let chunk = bytes.slice(len)?;

        if let Some(existing) = options.iter_mut().find(|o| o.code == code) {
            existing.data.extend_from_slice(chunk);
        } else {
            options.push(RawOption {
                code,
                data: chunk.to_vec(),
            });
        }
    }

    if !seen_end {
        return Err(Error::MissingEnd);
    }

    Ok(options)
}

/// Encodes options in ascending code order, splitting any value longer
/// than 255 bytes into multiple same-code occurrences per RFC 3396, and
/// terminates with END. Does not apply the ≥300-byte datagram padding;
/// that is the caller's (packet codec's) job since it spans the whole
/// datagram, not just the options area.
pub fn encode(options: &[RawOption], out: &mut BytesOut) -> Result<(), Error> {
    let mut ordered: Vec<&RawOption> = options.iter().collect();
    ordered.sort_by_key(|o| o.code);

    for option in ordered {
        if option.data.is_empty() {
            out.byte(option.code)?;
            out.byte(0)?;
            continue;
        }

        for chunk in option.data.chunks(255) {
            out.byte(option.code)?;
            out.byte(chunk.len() as u8)?;
            out.push(chunk)?;
        }
    }

    out.byte(END)?;

    Ok(())
}

pub fn find(options: &[RawOption], code: u8) -> Option<&RawOption> {
    options.iter().find(|o| o.code == code)
}

pub fn set(options: &mut Vec<RawOption>, code: u8, data: Vec<u8>) {
    if let Some(existing) = options.iter_mut().find(|o| o.code == code) {
        existing.data = data;
    } else {
        options.push(RawOption { code, data });
    }
}

pub fn remove(options: &mut Vec<RawOption>, code: u8) {
    options.retain(|o| o.code != code);
}

fn ipv4(data: &[u8]) -> Option<Ipv4Addr> {
    let arr: [u8; 4] = data.try_into().ok()?;
    Some(Ipv4Addr::from(arr))
}

fn ipv4_list(data: &[u8]) -> Vec<Ipv4Addr> {
    data.chunks_exact(4)
        .map(|c| Ipv4Addr::from(<[u8; 4]>::try_from(c).unwrap()))
        .collect()
}

fn encode_ipv4_list(addrs: &[Ipv4Addr]) -> Vec<u8> {
    addrs.iter().flat_map(|a| a.octets()).collect()
}

pub fn message_type(options: &[RawOption]) -> Option<MessageType> {
    let raw = find(options, CODE_MESSAGE_TYPE)?;
    if raw.data.len() != 1 {
        return None;
    }

    MessageType::from_wire(raw.data[0])
}

pub fn set_message_type(options: &mut Vec<RawOption>, mt: MessageType) {
    set(options, CODE_MESSAGE_TYPE, vec![mt.to_wire()]);
}

pub fn server_identifier(options: &[RawOption]) -> Option<Ipv4Addr> {
    find(options, CODE_SERVER_IDENTIFIER).and_then(|o| ipv4(&o.data))
}

pub fn requested_ip_address(options: &[RawOption]) -> Option<Ipv4Addr> {
    find(options, CODE_REQUESTED_IP_ADDRESS).and_then(|o| ipv4(&o.data))
}

pub fn parameter_request_list(options: &[RawOption]) -> Option<&[u8]> {
    find(options, CODE_PARAMETER_REQUEST_LIST).map(|o| o.data.as_slice())
}

pub fn has_rapid_commit(options: &[RawOption]) -> bool {
    find(options, CODE_RAPID_COMMIT).is_some()
}

pub fn set_rapid_commit(options: &mut Vec<RawOption>) {
    set(options, CODE_RAPID_COMMIT, Vec::new());
}

pub fn client_mac_from_agent_info(_options: &[RawOption]) -> Option<[u8; 6]> {
    None
}

// --- RFC 1035 label-sequence FQDN lists (options 119, 85, 86, and the
// FQDN branch of 120) -------------------------------------------------

/// Encodes a list of dotted-name FQDNs as sequences of RFC 1035
/// length-prefixed labels, each FQDN self-terminated by a zero-length
/// label; FQDNs are concatenated with nothing else in between.
pub fn encode_fqdn_list(names: &[String]) -> Vec<u8> {
    let mut out = Vec::new();

    for name in names {
        for label in name.split('.').filter(|l| !l.is_empty()) {
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
        }
        out.push(0);
    }

    out
}

pub fn decode_fqdn_list(data: &[u8]) -> Result<Vec<String>, Error> {
    let mut bytes = BytesIn::new(data);
    let mut names = Vec::new();
    let mut current = String::new();

    while !bytes.is_empty() {
        let len = bytes.byte()? as usize;

        if len == 0 {
            names.push(std::mem::take(&mut current));
            continue;
        }

        let label = bytes.slice(len)?;
        let label = std::str::from_utf8(label).map_err(|_| Error::InvalidUtf8)?;

        if !current.is_empty() {
            current.push('.');
        }
        current.push_str(label);
    }

    if !current.is_empty() {
        names.push(current);
    }

    Ok(names)
}

// --- Option 82: relay agent information (RFC 3046) --------------------

pub fn decode_relay_agent_info(data: &[u8]) -> Result<Vec<(u8, Vec<u8>)>, Error> {
    let mut bytes = BytesIn::new(data);
    let mut sub_options = Vec::new();

    while !bytes.is_empty() {
        let sub_id = bytes.byte()?;
        let len = bytes.byte()? as usize;
        sub_options.push((sub_id, bytes.slice(len)?.to_vec()));
    }

    Ok(sub_options)
}

pub fn encode_relay_agent_info(sub_options: &[(u8, Vec<u8>)]) -> Vec<u8> {
    let mut out = Vec::new();

    for (sub_id, data) in sub_options {
        out.push(*sub_id);
        out.push(data.len() as u8);
        out.extend_from_slice(data);
    }

    out
}

// --- Option 120: SIP servers (RFC 3361) --------------------------------

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum SipServers {
    Names(Vec<String>),
    Addresses(Vec<Ipv4Addr>),
}

pub fn decode_sip_servers(data: &[u8]) -> Result<SipServers, Error> {
    if data.is_empty() {
        return Err(Error::DataUnderflow);
    }

    match data[0] {
        0 => Ok(SipServers::Names(decode_fqdn_list(&data[1..])?)),
        1 => Ok(SipServers::Addresses(ipv4_list(&data[1..]))),
        _ => Err(Error::MixedSipMode),
    }
}

pub fn encode_sip_servers(value: &SipServers) -> Vec<u8> {
    let mut out = Vec::new();

    match value {
        SipServers::Names(names) => {
            out.push(0);
            out.extend(encode_fqdn_list(names));
        }
        SipServers::Addresses(addrs) => {
            out.push(1);
            out.extend(encode_ipv4_list(addrs));
        }
    }

    out
}

// --- Options 124/125: vendor class / vendor-specific (RFC 3925) -------

pub fn decode_vendor_class(data: &[u8]) -> Result<Vec<(u32, Vec<u8>)>, Error> {
    let mut bytes = BytesIn::new(data);
    let mut entries = Vec::new();

    while !bytes.is_empty() {
        let enterprise = u32::from_be_bytes(bytes.arr()?);
        let len = bytes.byte()? as usize;
        entries.push((enterprise, bytes.slice(len)?.to_vec()));
    }

    Ok(entries)
}

pub fn encode_vendor_class(entries: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let mut out = Vec::new();

    for (enterprise, payload) in entries {
        out.extend_from_slice(&enterprise.to_be_bytes());
        out.push(payload.len() as u8);
        out.extend_from_slice(payload);
    }

    out
}

pub fn decode_vendor_specific(data: &[u8]) -> Result<Vec<(u32, Vec<(u8, Vec<u8>)>)>, Error> {
    let mut bytes = BytesIn::new(data);
    let mut entries = Vec::new();

    while !bytes.is_empty() {
        let enterprise = u32::from_be_bytes(bytes.arr()?);
        let len = bytes.byte()? as usize;
        let sub_data = bytes.slice(len)?;
        entries.push((enterprise, decode_relay_agent_info(sub_data)?));
    }

    Ok(entries)
}

pub fn encode_vendor_specific(entries: &[(u32, Vec<(u8, Vec<u8>)>)]) -> Vec<u8> {
    let mut out = Vec::new();

    for (enterprise, sub_options) in entries {
        let sub_encoded = encode_relay_agent_info(sub_options);
        out.extend_from_slice(&enterprise.to_be_bytes());
        out.push(sub_encoded.len() as u8);
        out.extend(sub_encoded);
    }

    out
}

// --- Option 78: SLP directory agent (RFC 2610) -------------------------

pub fn decode_slp_directory_agent(data: &[u8]) -> Result<(bool, Vec<Ipv4Addr>), Error> {
    if data.is_empty() {
        return Err(Error::DataUnderflow);
    }

    Ok((data[0] != 0, ipv4_list(&data[1..])))
}

pub fn encode_slp_directory_agent(mandatory: bool, agents: &[Ipv4Addr]) -> Vec<u8> {
    let mut out = vec![mandatory as u8];
    out.extend(encode_ipv4_list(agents));
    out
}

// --- Option 79: SLP service scope (RFC 2610) ---------------------------

pub fn decode_slp_service_scope(data: &[u8]) -> Result<(bool, String), Error> {
    if data.is_empty() {
        return Err(Error::DataUnderflow);
    }

    let scope = std::str::from_utf8(&data[1..])
        .map_err(|_| Error::InvalidUtf8)?
        .to_string();

    Ok((data[0] != 0, scope))
}

pub fn encode_slp_service_scope(mandatory: bool, scope: &str) -> Vec<u8> {
    let mut out = vec![mandatory as u8];
    out.extend_from_slice(scope.as_bytes());
    out
}

// --- Option 83: iSNS (RFC 4174) -----------------------------------------

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Isns {
    pub functions: u16,
    pub dd_access: u16,
    pub admin: u16,
    pub security: u32,
    pub servers: Vec<Ipv4Addr>,
}

pub fn decode_isns(data: &[u8]) -> Result<Isns, Error> {
    let mut bytes = BytesIn::new(data);

    let functions = u16::from_be_bytes(bytes.arr()?);
    let dd_access = u16::from_be_bytes(bytes.arr()?);
    let admin = u16::from_be_bytes(bytes.arr()?);
    let security = u32::from_be_bytes(bytes.arr()?);
    let servers = ipv4_list(bytes.remaining());

    Ok(Isns {
        functions,
        dd_access,
        admin,
        security,
        servers,
    })
}

pub fn encode_isns(value: &Isns) -> Vec<u8> {
    let mut out = Vec::with_capacity(10 + value.servers.len() * 4);
    out.extend_from_slice(&value.functions.to_be_bytes());
    out.extend_from_slice(&value.dd_access.to_be_bytes());
    out.extend_from_slice(&value.admin.to_be_bytes());
    out.extend_from_slice(&value.security.to_be_bytes());
    out.extend(encode_ipv4_list(&value.servers));
    out
}

// --- Convenience typed accessors used by the protocol engine's packet
// loader (§4.5.1) -------------------------------------------------------

pub fn set_ipv4(options: &mut Vec<RawOption>, code: u8, addr: Ipv4Addr) {
    set(options, code, addr.octets().to_vec());
}

pub fn get_ipv4(options: &[RawOption], code: u8) -> Option<Ipv4Addr> {
    find(options, code).and_then(|o| ipv4(&o.data))
}

pub fn set_ipv4_list(options: &mut Vec<RawOption>, code: u8, addrs: &[Ipv4Addr]) {
    set(options, code, encode_ipv4_list(addrs));
}

pub fn set_string(options: &mut Vec<RawOption>, code: u8, value: &str) {
    set(options, code, value.as_bytes().to_vec());
}

pub fn get_string(options: &[RawOption], code: u8) -> Option<Result<String, Error>> {
    find(options, code).map(|o| {
        std::str::from_utf8(&o.data)
            .map(|s| s.to_string())
            .map_err(|_| Error::InvalidUtf8)
    })
}

pub fn set_u32(options: &mut Vec<RawOption>, code: u8, value: u32) {
    set(options, code, value.to_be_bytes().to_vec());
}

pub fn get_u32(options: &[RawOption], code: u8) -> Option<u32> {
    find(options, code).and_then(|o| Some(u32::from_be_bytes(o.data.as_slice().try_into().ok()?)))
}

/// Options 93/94/97, decoded for the hook when present.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct PxeOptions {
    pub client_system_arch: Option<Vec<u16>>,
    pub client_network_interface: Option<(u8, u8, u8)>,
    pub client_machine_identifier: Option<Vec<u8>>,
}

pub fn pxe_options(options: &[RawOption]) -> Option<PxeOptions> {
    let client_system_arch = find(options, CODE_CLIENT_SYSTEM_ARCH)
        .map(|o| o.data.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect());
    let client_network_interface = find(options, CODE_CLIENT_NETWORK_INTERFACE)
        .filter(|o| o.data.len() == 3)
        .map(|o| (o.data[0], o.data[1], o.data[2]));
    let client_machine_identifier =
        find(options, CODE_CLIENT_MACHINE_IDENTIFIER).map(|o| o.data.clone());

    if client_system_arch.is_none()
        && client_network_interface.is_none()
        && client_machine_identifier.is_none()
    {
        None
    } else {
        Some(PxeOptions {
            client_system_arch,
            client_network_interface,
            client_machine_identifier,
        })
    }
}

/// Options 43/60/124/125, decoded for the hook when present.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct VendorOptions {
    pub legacy: Option<Vec<u8>>,
    pub class_identifier: Option<Vec<u8>>,
    pub vendor_class: Option<Vec<(u32, Vec<u8>)>>,
    pub vendor_specific: Option<Vec<(u32, Vec<(u8, Vec<u8>)>)>>,
}

pub fn vendor_options(options: &[RawOption]) -> Result<Option<VendorOptions>, Error> {
    let legacy = find(options, CODE_VENDOR_SPECIFIC_LEGACY).map(|o| o.data.clone());
    let class_identifier = find(options, CODE_VENDOR_CLASS_IDENTIFIER).map(|o| o.data.clone());
    let vendor_class = find(options, CODE_VENDOR_CLASS)
        .map(|o| decode_vendor_class(&o.data))
        .transpose()?;
    let vendor_specific = find(options, CODE_VENDOR_SPECIFIC)
        .map(|o| decode_vendor_specific(&o.data))
        .transpose()?;

    if legacy.is_none()
        && class_identifier.is_none()
        && vendor_class.is_none()
        && vendor_specific.is_none()
    {
        Ok(None)
    } else {
        Ok(Some(VendorOptions {
            legacy,
            class_identifier,
            vendor_class,
            vendor_specific,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_concatenates_repeated_codes() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&[CODE_DOMAIN_NAME_SERVER, 4, 1, 1, 1, 1]);
        buf.extend_from_slice(&[CODE_DOMAIN_NAME_SERVER, 4, 2, 2, 2, 2]);
        buf.push(END);

        let options = decode(&buf).unwrap();
        assert_eq!(options.len(), 1);
        assert_eq!(
            options[0].data,
            vec![1, 1, 1, 1, 2, 2, 2, 2]
        );
    }

    #[test]
    fn decode_rejects_missing_end() {
        let buf = vec![CODE_HOST_NAME, 2, b'h', b'i'];
        assert!(matches!(decode(&buf), Err(Error::MissingEnd)));
    }

    #[test]
    fn encode_splits_long_values_per_rfc_3396() {
        let data = vec![7u8; 600];
        let options = vec![RawOption {
            code: CODE_RELAY_AGENT_INFORMATION,
            data: data.clone(),
        }];

        let mut buf = [0u8; 700];
        let mut out = BytesOut::new(&mut buf);
        encode(&options, &mut out).unwrap();

        let encoded_len = out.len();
        let decoded = decode(&buf[..encoded_len]).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].data, data);
    }

    #[test]
    fn fqdn_list_round_trips() {
        let names = vec!["a.example.com".to_string(), "b.example.org".to_string()];
        let encoded = encode_fqdn_list(&names);
        let decoded = decode_fqdn_list(&encoded).unwrap();
        assert_eq!(decoded, names);
    }

    #[test]
    fn sip_servers_rejects_mixed_mode_byte() {
        let data = vec![2, 1, 2, 3, 4];
        assert!(matches!(decode_sip_servers(&data), Err(Error::MixedSipMode)));
    }

    #[test]
    fn vendor_specific_round_trips() {
        let entries = vec![(9u32, vec![(1u8, vec![1, 2, 3]), (2u8, vec![4, 5])])];
        let encoded = encode_vendor_specific(&entries);
        let decoded = decode_vendor_specific(&encoded).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn isns_round_trips() {
        let value = Isns {
            functions: 1,
            dd_access: 2,
            admin: 3,
            security: 4,
            servers: vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)],
        };

        let encoded = encode_isns(&value);
        let decoded = decode_isns(&encoded).unwrap();
        assert_eq!(decoded, value);
    }
}
