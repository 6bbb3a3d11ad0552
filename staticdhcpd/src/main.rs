//! Reference binary: wires `dhcp-server`'s engine to a TOML-file record
//! source and a TOML-file configuration, and runs the server until a
//! fatal socket error or signal.
//!
//! Grounded on `examples/dhcp_server.rs` in the teacher crate: a thin
//! `main` that installs `env_logger`, builds one concrete socket/record
//! stack, and blocks on the server's run loop.

mod toml_records;

use std::env;
use std::fs;

use anyhow::{Context, Result};

use dhcp_server::{Config, Server};

use toml_records::TomlRecordSource;

fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let config_path = env::args().nth(1).unwrap_or_else(|| "staticdhcpd.toml".to_string());

    let config_text = fs::read_to_string(&config_path)
        .with_context(|| format!("reading configuration file '{config_path}'"))?;
    let config: Config = toml::from_str(&config_text)
        .with_context(|| format!("parsing configuration file '{config_path}'"))?;

    let records = TomlRecordSource::load(&config_path)
        .with_context(|| format!("loading records from '{config_path}'"))?;

    log::info!(
        "starting staticdhcpd: server_ip={} server_port={} client_port={} pxe_port={:?} raw={:?}",
        config.server_ip,
        config.server_port,
        config.client_port,
        config.pxe_port,
        config.response_interface,
    );

    let server = Server::build(&config, Box::new(records), None, None)
        .context("binding DHCP server sockets")?;

    server.run().context("DHCP listener terminated")?;

    Ok(())
}
