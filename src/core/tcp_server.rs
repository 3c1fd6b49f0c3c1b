//! Modbus-TCP slave side of the gateway.
//!
//! Every accepted connection is served from the [`RegisterMirror`]; no TCP
//! request ever reaches the serial bus.

use anyhow::Result;
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinSet,
};

use crate::{
    core::{clients::ClientRegistry, mirror::RegisterMirror},
    protocol::modbus::{respond, MbapHeader, MBAP_HEADER_LEN},
};

pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| anyhow::anyhow!("Failed to bind Modbus-TCP listener on {addr}: {err}"))?;
    log::info!("Modbus-TCP server listening on {addr}");
    Ok(listener)
}

/// Accepts connections until `shutdown_rx` fires or its sender is dropped.
///
/// Open connections are closed before returning, so no client keeps reading
/// a mirror that nobody refreshes any more.
pub async fn serve(
    listener: TcpListener,
    mirror: Arc<RegisterMirror>,
    clients: Arc<ClientRegistry>,
    shutdown_rx: flume::Receiver<()>,
) -> Result<()> {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        log::warn!("Modbus-TCP accept failed: {err}");
                        continue;
                    }
                };
                let mirror = Arc::clone(&mirror);
                let guard = clients.register(peer);
                connections.spawn(async move {
                    if let Err(err) = handle_connection(stream, &mirror).await {
                        log::debug!("Modbus-TCP connection {peer} closed: {err}");
                    }
                    drop(guard);
                });
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown_rx.recv_async() => {
                log::info!(
                    "Modbus-TCP server shutting down, closing {} connections",
                    connections.len()
                );
                // Aborted tasks drop their stream and client guard.
                connections.abort_all();
                while connections.join_next().await.is_some() {}
                return Ok(());
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, mirror: &RegisterMirror) -> Result<()> {
    let mut head = [0u8; MBAP_HEADER_LEN];
    let mut pdu = Vec::new();
    loop {
        match stream.read_exact(&mut head).await {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err.into()),
        }
        // A malformed header leaves the stream out of sync, so drop the client.
        let header = MbapHeader::parse(head)?;

        pdu.resize(header.pdu_len(), 0);
        stream.read_exact(&mut pdu).await?;

        let reply = respond(&header, &pdu, mirror);
        stream.write_all(&reply).await?;
    }
}
