//! Reference record source (Dref, §6): a TOML file mapping MAC addresses
//! to `Definition` records, standing in for the SQL/INI/custom backends
//! `spec.md` places out of scope. No governance or caching logic lives
//! here — that belongs to `dhcp_server::record::Source`, which wraps any
//! `RecordSource` with both.

use std::collections::HashMap;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::Deserialize;

use dhcp_server::record::{Definition, RecordError, RecordSource};

#[derive(Debug, Deserialize)]
struct RecordsFile {
    #[serde(default, rename = "record")]
    records: Vec<RecordEntry>,
}

#[derive(Debug, Deserialize)]
struct RecordEntry {
    mac: String,
    ip: Ipv4Addr,
    lease_time_secs: u32,
    #[serde(default = "default_subnet")]
    subnet: String,
    #[serde(default)]
    serial: i64,
    hostname: Option<String>,
    gateway: Option<Ipv4Addr>,
    subnet_mask: Option<Ipv4Addr>,
    broadcast_address: Option<Ipv4Addr>,
    domain_name: Option<String>,
    #[serde(default)]
    domain_name_servers: Vec<Ipv4Addr>,
    #[serde(default)]
    ntp_servers: Vec<Ipv4Addr>,
    extra: Option<String>,
}

fn default_subnet() -> String {
    "default".to_string()
}

fn parse_mac(text: &str) -> Result<[u8; 6], RecordError> {
    let mut mac = [0u8; 6];
    let mut bytes = text.split(&[':', '-'][..]);

    for slot in mac.iter_mut() {
        let part = bytes
            .next()
            .ok_or_else(|| RecordError::Backend(format!("MAC address '{text}' is too short")))?;
        *slot = u8::from_str_radix(part, 16)
            .map_err(|_| RecordError::Backend(format!("MAC address '{text}' has an invalid octet")))?;
    }

    if bytes.next().is_some() {
        return Err(RecordError::Backend(format!("MAC address '{text}' is too long")));
    }

    Ok(mac)
}

impl TryFrom<RecordEntry> for ([u8; 6], Definition) {
    type Error = RecordError;

    fn try_from(entry: RecordEntry) -> Result<Self, Self::Error> {
        let mac = parse_mac(&entry.mac)?;

        Ok((
            mac,
            Definition {
                ip: entry.ip,
                lease_time_secs: entry.lease_time_secs,
                subnet: entry.subnet,
                serial: entry.serial,
                hostname: entry.hostname,
                gateway: entry.gateway,
                subnet_mask: entry.subnet_mask,
                broadcast_address: entry.broadcast_address,
                domain_name: entry.domain_name,
                domain_name_servers: entry.domain_name_servers,
                ntp_servers: entry.ntp_servers,
                extra: entry.extra,
            },
        ))
    }
}

/// Loads and holds every record in memory, keyed by MAC. `reinitialise`
/// re-reads the file from disk, giving the operator a way to push
/// updates without restarting the process.
pub struct TomlRecordSource {
    path: PathBuf,
    records: RwLock<HashMap<[u8; 6], Definition>>,
}

impl TomlRecordSource {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = load_records(&path)?;

        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }
}

fn load_records(path: &Path) -> anyhow::Result<HashMap<[u8; 6], Definition>> {
    let text = fs::read_to_string(path)?;
    let parsed: RecordsFile = toml::from_str(&text)?;

    let mut records = HashMap::with_capacity(parsed.records.len());
    for entry in parsed.records {
        let (mac, definition) = entry.try_into()?;
        records.insert(mac, definition);
    }

    Ok(records)
}

impl RecordSource for TomlRecordSource {
    fn lookup_mac(&self, mac: &[u8; 6]) -> Result<Option<Definition>, RecordError> {
        Ok(self.records.read().unwrap().get(mac).cloned())
    }

    fn reinitialise(&self) {
        match load_records(&self.path) {
            Ok(records) => {
                *self.records.write().unwrap() = records;
                log::info!("record source reloaded from {}", self.path.display());
            }
            Err(e) => {
                log::error!("record source reload failed, keeping stale data: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_colon_separated_mac() {
        assert_eq!(
            parse_mac("aa:bb:cc:00:00:01").unwrap(),
            [0xaa, 0xbb, 0xcc, 0x00, 0x00, 0x01]
        );
    }

    #[test]
    fn rejects_short_mac() {
        assert!(parse_mac("aa:bb:cc").is_err());
    }

    #[test]
    fn loads_records_and_looks_up_by_mac() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [[record]]
            mac = "aa:bb:cc:00:00:01"
            ip = "192.0.2.50"
            lease_time_secs = 3600
            subnet = "s"
            serial = 1
            gateway = "192.0.2.1"
            "#
        )
        .unwrap();

        let source = TomlRecordSource::load(file.path()).unwrap();
        let found = source
            .lookup_mac(&[0xaa, 0xbb, 0xcc, 0x00, 0x00, 0x01])
            .unwrap()
            .expect("record should be present");
        assert_eq!(found.ip, Ipv4Addr::new(192, 0, 2, 50));

        let missing = source.lookup_mac(&[0, 0, 0, 0, 0, 0]).unwrap();
        assert!(missing.is_none());
    }
}
