use anyhow::{anyhow, Context, Result};
use chrono::Local;
use log::LevelFilter;
use std::{
    io::{self, Write},
    net::SocketAddr,
    path::Path,
    sync::Arc,
};

use env_logger::{Builder, Target};

use crate::{
    api::http::{spawn_http_server, HttpServerState},
    cli::{cleanup, GatewayBootConfig},
    core::{
        clients::ClientRegistry, engine::PollEngine, mirror::RegisterMirror,
        persistence::JsonFilePersistence, serial::SerialBus, store::ConfigStore, tcp_server,
    },
};

/// Multi-writer for logging to both file and stdout
struct DualWriter {
    file: std::fs::File,
    stdout: io::Stdout,
}

impl Write for DualWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf)?;
        self.stdout.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.stdout.flush()?;
        Ok(())
    }
}

/// Initializes the global logger. With a log file, output goes to both the
/// file and the terminal.
pub fn init_logger(log_file: Option<&Path>) -> io::Result<()> {
    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .filter_level(LevelFilter::Info)
        .parse_default_env();

    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        builder.target(Target::Pipe(Box::new(DualWriter {
            file,
            stdout: io::stdout(),
        })));
    }

    builder.init();
    if let Some(path) = log_file {
        log::info!("Logging to {path:?} and terminal");
    }
    Ok(())
}

enum Exit {
    Restart,
    Shutdown,
}

/// Runs the gateway until Ctrl+C, restarting every component from the
/// persisted configuration whenever a restart is requested.
pub async fn run_gateway(config: GatewayBootConfig) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = flume::bounded::<()>(1);
    cleanup::register_cleanup(move || {
        let _ = shutdown_tx.try_send(());
    });
    ctrlc::set_handler(|| {
        log::info!("Received Ctrl+C, shutting down");
        cleanup::run_cleanups();
    })
    .map_err(|err| anyhow!("Failed to install Ctrl+C handler: {err}"))?;

    let mut generation = 0u64;
    loop {
        generation += 1;
        log::info!("Starting gateway (run {generation})");
        match run_once(&config, &shutdown_rx).await? {
            Exit::Restart => log::info!("Restarting gateway"),
            Exit::Shutdown => break,
        }
    }

    log::info!("Gateway stopped");
    Ok(())
}

async fn run_once(config: &GatewayBootConfig, shutdown_rx: &flume::Receiver<()>) -> Result<Exit> {
    let store = Arc::new(
        ConfigStore::open(
            Box::new(JsonFilePersistence::new(&config.data_file)),
            config.password.clone(),
            config.max_entries,
        )
        .with_context(|| format!("Failed to open configuration {:?}", config.data_file))?,
    );
    let snapshot = store.read();
    let updates = store.subscribe();

    let bus = {
        let (port, baud, timeout) = (
            config.serial_port.clone(),
            snapshot.settings.baud,
            config.response_timeout(),
        );
        tokio::task::spawn_blocking(move || SerialBus::open(&port, baud, timeout)).await?
    };

    let mirror = Arc::new(RegisterMirror::new());
    let clients = ClientRegistry::new();
    let engine = Arc::new(PollEngine::new(
        Box::new(bus),
        Arc::clone(&mirror),
        Arc::clone(&snapshot),
        updates,
    ));

    let (engine_stop_tx, engine_stop_rx) = flume::bounded(1);
    let engine_task = {
        let engine = Arc::clone(&engine);
        let interval = config.poll_interval();
        tokio::task::spawn_blocking(move || engine.run(interval, engine_stop_rx))
    };

    // The TCP port is read once per run; a changed port takes effect on restart.
    let modbus_addr = SocketAddr::new(config.modbus_bind, snapshot.settings.port);
    let (tcp_stop_tx, tcp_stop_rx) = flume::bounded(1);
    let tcp_task = match tcp_server::bind(modbus_addr).await {
        Ok(listener) => Some(tokio::spawn(tcp_server::serve(
            listener,
            Arc::clone(&mirror),
            Arc::clone(&clients),
            tcp_stop_rx,
        ))),
        Err(err) => {
            log::error!("{err}; Modbus-TCP side disabled until restart");
            None
        }
    };

    let (restart_tx, restart_rx) = flume::bounded(1);
    let (http_stop_tx, http_stop_rx) = flume::bounded(1);
    let state = HttpServerState {
        store: Arc::clone(&store),
        engine: Arc::clone(&engine),
        clients: Arc::clone(&clients),
        restart_tx,
    };
    let (_, http_thread) = spawn_http_server(config.http_listen, state, http_stop_rx)?;

    let exit = tokio::select! {
        _ = restart_rx.recv_async() => Exit::Restart,
        _ = shutdown_rx.recv_async() => Exit::Shutdown,
    };

    // Stop order: stop accepting configuration, then TCP clients, then the bus.
    let _ = http_stop_tx.send(());
    let _ = tokio::task::spawn_blocking(move || http_thread.join()).await;

    let _ = tcp_stop_tx.send(());
    if let Some(task) = tcp_task {
        if let Ok(Err(err)) = task.await {
            log::warn!("Modbus-TCP server ended with error: {err}");
        }
    }

    let _ = engine_stop_tx.send(());
    engine_task.await?;

    Ok(exit)
}
