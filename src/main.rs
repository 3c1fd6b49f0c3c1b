use anyhow::Result;

use rtu2tcp::{boot, cli};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli::parse_args();
    let config = cli::boot_config_from_matches(&matches)?;

    if matches.get_flag("print-default-config") {
        print!("{}", cli::GatewayBootConfig::default().to_toml()?);
        return Ok(());
    }

    if let Err(err) = boot::init_logger(config.log_file.as_deref()) {
        eprintln!("Failed to initialize logger: {err}");
        env_logger::init();
    }

    log::info!(
        "rtu2tcp {} starting: serial {}, configuration endpoint {}",
        env!("CARGO_PKG_VERSION"),
        config.serial_port,
        config.http_listen
    );
    boot::run_gateway(config).await
}
