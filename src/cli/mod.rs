pub mod cleanup;
pub mod config;

use anyhow::Result;
use std::{ffi::OsString, net::SocketAddr, path::PathBuf};

use clap::{Arg, ArgMatches, Command};

pub use config::GatewayBootConfig;

fn command() -> Command {
    Command::new("rtu2tcp")
        .about("Modbus RTU (RS485) to Modbus TCP gateway")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Boot configuration file (TOML)")
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("http-listen")
                .long("http-listen")
                .help("Listen address of the configuration endpoint")
                .value_name("ADDR")
                .value_parser(clap::value_parser!(SocketAddr)),
        )
        .arg(
            Arg::new("data-file")
                .long("data-file")
                .help("File holding the device configuration")
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("serial-port")
                .long("serial-port")
                .short('p')
                .help("RS485 serial device")
                .value_name("PORT"),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .help("Also write logs to this file")
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("print-default-config")
                .long("print-default-config")
                .help("Print the default boot configuration as TOML and exit")
                .action(clap::ArgAction::SetTrue),
        )
}

/// Parse command line arguments and return ArgMatches.
pub fn parse_args() -> ArgMatches {
    command().get_matches()
}

pub fn try_parse_args_from<I, T>(args: I) -> Result<ArgMatches, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    command().try_get_matches_from(args)
}

/// Builds the boot configuration: file (if given), then command line flags,
/// then environment.
pub fn boot_config_from_matches(matches: &ArgMatches) -> Result<GatewayBootConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => GatewayBootConfig::from_file(path)?,
        None => GatewayBootConfig::default(),
    };

    if let Some(addr) = matches.get_one::<SocketAddr>("http-listen") {
        config.http_listen = *addr;
    }
    if let Some(path) = matches.get_one::<PathBuf>("data-file") {
        config.data_file = path.clone();
    }
    if let Some(port) = matches.get_one::<String>("serial-port") {
        config.serial_port = port.clone();
    }
    if let Some(path) = matches.get_one::<PathBuf>("log-file") {
        config.log_file = Some(path.clone());
    }

    config.apply_env(|key| std::env::var(key).ok());
    Ok(config)
}
