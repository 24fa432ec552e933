//! Socket server: one handler task per accepted connection.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use kscale_autoscale::Coordinator;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::handler::Handler;
use crate::protocol::{Request, Response, write_message};

/// Pause after a failed accept, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A source of incoming connections.
pub trait Incoming: Send {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn accept(&mut self) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

impl Incoming for UnixListener {
    type Stream = UnixStream;

    async fn accept(&mut self) -> io::Result<UnixStream> {
        UnixListener::accept(self).await.map(|(stream, _)| stream)
    }
}

/// Accept connections until `shutdown` flips.
///
/// Every connection gets a fresh [`Handler`] sharing `coordinator`.
/// Accept errors are logged and retried. Connections still open at
/// shutdown are left to finish on their own.
pub async fn serve<L: Incoming>(
    mut listener: L,
    coordinator: Arc<Coordinator>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut next_id: u64 = 0;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let stream = match accepted {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };
                next_id += 1;
                let id = next_id;
                info!(connection = id, "accepted connection");

                let handler = Handler::new(coordinator.clone(), id);
                tokio::spawn(async move {
                    match run_connection(stream, handler).await {
                        Ok(()) => info!(connection = id, "connection finished"),
                        Err(e) => error!(connection = id, error = %e, "connection failed"),
                    }
                });
            }
            _ = shutdown.changed() => {
                info!("socket server shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Drive one connection until the peer closes it.
///
/// Each line is one request. Lines that do not decode are answered
/// with an `error` response and the connection stays open.
pub async fn run_connection<S>(stream: S, mut handler: Handler) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await.context("failed to read request")? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => handler.handle(request).await,
            Err(e) => {
                warn!(error = %e, "malformed request");
                Some(Response::Error {
                    error: format!("invalid request: {e}"),
                })
            }
        };

        if let Some(response) = response {
            write_message(&mut writer, &response)
                .await
                .context("failed to write response")?;
        }
    }

    debug!("peer closed connection");
    Ok(())
}
