//! Control-channel TCP server.
//!
//! Clients speak newline-delimited JSON envelopes over TCP. Each accepted
//! connection gets its own task; requests dispatch into the blocking
//! decoder facade on the blocking thread pool so device operations never
//! stall the accept loop.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::decoder::PcoCameraLinkFrameDecoder;
use crate::ipc::IpcMessage;

/// Bind `endpoint` and serve control clients until the task is cancelled.
pub async fn serve(decoder: Arc<PcoCameraLinkFrameDecoder>, endpoint: &str) -> Result<()> {
    let listener = TcpListener::bind(endpoint)
        .await
        .with_context(|| format!("failed to bind control endpoint {endpoint}"))?;
    serve_listener(decoder, listener).await
}

/// Serve control clients from an already-bound listener.
pub async fn serve_listener(
    decoder: Arc<PcoCameraLinkFrameDecoder>,
    listener: TcpListener,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("Control channel listening on {addr}");
    }
    loop {
        let (stream, peer) = listener.accept().await.context("accept failed")?;
        log::debug!("Control client connected from {peer}");
        let decoder = decoder.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, decoder).await {
                log::warn!("Control client {peer} error: {e}");
            }
            log::debug!("Control client {peer} disconnected");
        });
    }
}

async fn handle_client(
    stream: TcpStream,
    decoder: Arc<PcoCameraLinkFrameDecoder>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = match IpcMessage::parse(&line) {
            Ok(request) => {
                let decoder = decoder.clone();
                tokio::task::spawn_blocking(move || decoder.handle_message(&request))
                    .await
                    .context("control handler task failed")?
            }
            Err(e) => IpcMessage::parse_failure_reply(e.to_string()),
        };
        let encoded = reply.encode().context("failed to encode reply")?;
        writer.write_all(encoded.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
    Ok(())
}
