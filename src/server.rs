//! Line-delimited JSON server in front of the coordinator.
//!
//! Each accepted connection is served by its own task; a semaphore bounds
//! the number of connections served at once. Requests are decoded one per
//! line, executed on the blocking pool (coordinator operations end with a
//! synchronous file write) and answered with one JSON line.

use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::coordinator::Coordinator;
use crate::protocol::{self, Request, Response};

/// Largest accepted request line, newline included
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub max_connections: usize,
}

/// Bind the listener described by `config`
pub async fn bind(config: &ServerConfig) -> Result<TcpListener> {
    TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))
}

/// Accept connections until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    coordinator: Arc<Coordinator>,
    max_connections: usize,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let local_addr = listener.local_addr().context("Listener has no local address")?;
    info!("Listening on {} (max {} connections)", local_addr, max_connections);

    let permits = Arc::new(Semaphore::new(max_connections));
    tokio::pin!(shutdown);

    loop {
        let permit = tokio::select! {
            _ = &mut shutdown => break,
            permit = permits.clone().acquire_owned() => {
                permit.context("Connection semaphore closed")?
            }
        };

        let (stream, peer) = tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            },
        };

        let coordinator = coordinator.clone();
        let span = tracing::info_span!("connection", id = %Uuid::new_v4(), peer = %peer);
        tokio::spawn(
            async move {
                debug!("Connection opened");
                if let Err(e) = handle_connection(stream, peer, coordinator).await {
                    error!("Connection failed: {:#}", e);
                }
                debug!("Connection closed");
                drop(permit);
            }
            .instrument(span),
        );
    }

    info!("Server shutting down");
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    coordinator: Arc<Coordinator>,
) -> Result<()> {
    let identity = peer.ip().to_string();
    let (reader, writer) = stream.into_split();
    serve_lines(reader, writer, &identity, coordinator).await
}

/// Answer request lines from `reader` on `writer` until EOF
pub async fn serve_lines<R, W>(
    reader: R,
    mut writer: W,
    identity: &str,
    coordinator: Arc<Coordinator>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = (&mut reader)
            .take(MAX_REQUEST_BYTES as u64)
            .read_until(b'\n', &mut buf)
            .await
            .context("Failed to read request")?;

        if read == 0 {
            return Ok(());
        }

        if !buf.ends_with(b"\n") && read >= MAX_REQUEST_BYTES {
            warn!(identity, "Request exceeds {} bytes, closing connection", MAX_REQUEST_BYTES);
            let response = Response::bad_request(format!(
                "request exceeds {} bytes",
                MAX_REQUEST_BYTES
            ));
            write_response(&mut writer, &response).await?;
            return Ok(());
        }

        let response = match std::str::from_utf8(&buf) {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => match serde_json::from_str::<Request>(line.trim()) {
                Ok(request) => execute(&coordinator, identity, request).await,
                Err(e) => {
                    debug!(identity, "Malformed request: {}", e);
                    Response::bad_request(format!("malformed request: {}", e))
                }
            },
            Err(e) => {
                debug!(identity, "Request is not UTF-8: {}", e);
                Response::bad_request("request is not valid UTF-8")
            }
        };

        write_response(&mut writer, &response).await?;
    }
}

async fn execute(coordinator: &Arc<Coordinator>, identity: &str, request: Request) -> Response {
    let op = request.op();
    debug!(identity, op, "Handling request");

    let coordinator = coordinator.clone();
    let identity = identity.to_string();
    match tokio::task::spawn_blocking(move || protocol::dispatch(&coordinator, &identity, request))
        .await
    {
        Ok(response) => response,
        Err(e) => {
            error!(op, "Request task failed: {}", e);
            Response::Failure {
                ok: false,
                status: 500,
                code: "internal_error",
                error: "internal error".to_string(),
            }
        }
    }
}

async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &Response) -> Result<()> {
    let mut body = serde_json::to_vec(response).context("Failed to serialize response")?;
    body.push(b'\n');
    writer
        .write_all(&body)
        .await
        .context("Failed to write response")?;
    writer.flush().await.context("Failed to flush response")?;
    Ok(())
}
