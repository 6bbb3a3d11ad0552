//! Server configuration (§6): every recognised key, serde-deserializable
//! from whatever format the embedding binary chooses (the reference
//! binary crate uses TOML).

use std::net::Ipv4Addr;

use serde::Deserialize;

fn default_server_port() -> u16 {
    67
}

fn default_client_port() -> u16 {
    68
}

fn default_polling_interval() -> u64 {
    10
}

fn default_concurrency_limit() -> usize {
    8
}

fn default_worker_threads() -> usize {
    16
}

fn default_datagram_buffer_size() -> usize {
    2048
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub server_ip: Ipv4Addr,

    #[serde(default = "default_server_port")]
    pub server_port: u16,

    #[serde(default = "default_client_port")]
    pub client_port: u16,

    /// `None` disables the PXE listener entirely.
    #[serde(default)]
    pub pxe_port: Option<u16>,

    /// Interface name to bind the raw L2 responder to. `None` disables
    /// raw mode; replies fall back to UDP broadcast/unicast.
    #[serde(default)]
    pub response_interface: Option<String>,

    #[serde(default)]
    pub allow_local_dhcp: bool,

    #[serde(default)]
    pub allow_relays: bool,

    /// Empty means "accept relayed requests from any `giaddr`".
    #[serde(default)]
    pub allowed_relays: Vec<Ipv4Addr>,

    #[serde(default)]
    pub authoritative: bool,

    #[serde(default)]
    pub nak_renewals: bool,

    #[serde(default)]
    pub unknown_timeout_secs: i64,

    #[serde(default)]
    pub misbehave_timeout_secs: i64,

    #[serde(default)]
    pub governance_enabled: bool,

    #[serde(default)]
    pub threshold: u32,

    #[serde(default = "default_polling_interval")]
    pub polling_interval_secs: u64,

    #[serde(default)]
    pub use_cache: bool,

    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Ambient addition: bounds the worker thread pool the listener
    /// dispatches onto, so an abusive flood of datagrams can't spawn an
    /// unbounded number of OS threads.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Ambient addition: per-read buffer size, large enough for any
    /// datagram this server can emit or is required to accept (§6).
    #[serde(default = "default_datagram_buffer_size")]
    pub datagram_buffer_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_fills_in_defaults() {
        let toml = r#"
            server_ip = "192.0.2.1"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server_port, 67);
        assert_eq!(config.client_port, 68);
        assert!(config.pxe_port.is_none());
        assert_eq!(config.concurrency_limit, 8);
        assert_eq!(config.worker_threads, 16);
    }

    #[test]
    fn full_toml_round_trips_every_field() {
        let toml = r#"
            server_ip = "192.0.2.1"
            server_port = 67
            client_port = 68
            pxe_port = 4011
            response_interface = "eth0"
            allow_local_dhcp = true
            allow_relays = true
            allowed_relays = ["198.51.100.1"]
            authoritative = true
            nak_renewals = false
            unknown_timeout_secs = 30
            misbehave_timeout_secs = 300
            governance_enabled = true
            threshold = 10
            polling_interval_secs = 10
            use_cache = true
            concurrency_limit = 4
            worker_threads = 8
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.pxe_port, Some(4011));
        assert_eq!(config.response_interface.as_deref(), Some("eth0"));
        assert_eq!(config.allowed_relays, vec![Ipv4Addr::new(198, 51, 100, 1)]);
        assert!(config.authoritative);
    }
}
