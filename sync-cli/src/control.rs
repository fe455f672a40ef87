//! Daemon control socket.
//!
//! Newline-delimited JSON over a Unix socket: one [`Request`] line in, one
//! [`Response`] line out, then the connection closes.

use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;

use bufsync_client::{LocalBufferSource, RemoteStore, SchedulerHandle, SyncEngine};
use bufsync_types::{Request, Response};

/// Upper bound on a request line.
const MAX_REQUEST_LEN: u64 = 64 * 1024;

/// Serves control requests for a running daemon.
pub struct ControlServer<L: LocalBufferSource, R: RemoteStore> {
    socket_path: PathBuf,
    listener: UnixListener,
    engine: Arc<SyncEngine<L, R>>,
    shutdown: Arc<Notify>,
}

impl<L, R> ControlServer<L, R>
where
    L: LocalBufferSource + 'static,
    R: RemoteStore + 'static,
{
    /// Bind the socket, replacing a stale one left by a crashed daemon.
    ///
    /// Fails if another daemon answers on the socket.
    pub async fn bind(
        socket_path: &Path,
        engine: Arc<SyncEngine<L, R>>,
        shutdown: Arc<Notify>,
    ) -> Result<Self> {
        if UnixStream::connect(socket_path).await.is_ok() {
            anyhow::bail!(
                "A daemon is already running (socket {})",
                socket_path.display()
            );
        }
        if tokio::fs::remove_file(socket_path).await.is_ok() {
            tracing::debug!("Removed stale socket {}", socket_path.display());
        }

        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("Failed to bind {}", socket_path.display()))?;
        tracing::info!("Control socket bound to {}", socket_path.display());

        Ok(Self {
            socket_path: socket_path.to_path_buf(),
            listener,
            engine,
            shutdown,
        })
    }

    /// Accept connections until shutdown is requested, handing sync
    /// requests to `scheduler`.
    pub async fn run(self, scheduler: SchedulerHandle) {
        loop {
            tokio::select! {
                result = self.listener.accept() => match result {
                    Ok((stream, _addr)) => {
                        let engine = Arc::clone(&self.engine);
                        let scheduler = scheduler.clone();
                        let shutdown = Arc::clone(&self.shutdown);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, &engine, &scheduler, &shutdown).await {
                                tracing::debug!("Control connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!("Accept error: {}", e);
                    }
                },
                _ = self.shutdown.notified() => break,
            }
        }

        if let Err(e) = tokio::fs::remove_file(&self.socket_path).await {
            tracing::debug!("Failed to remove socket: {}", e);
        }
    }
}

async fn handle_connection<L, R>(
    stream: UnixStream,
    engine: &SyncEngine<L, R>,
    scheduler: &SchedulerHandle,
    shutdown: &Notify,
) -> std::io::Result<()>
where
    L: LocalBufferSource,
    R: RemoteStore,
{
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader).take(MAX_REQUEST_LEN);
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(());
    }

    let response = match Request::from_line(&line) {
        Ok(request) => {
            tracing::debug!("Control request: {:?}", request);
            process_request(request, engine, scheduler, shutdown).await
        }
        Err(e) => {
            tracing::warn!("Invalid control request: {}", e);
            Response::Failed {
                error: format!("invalid request: {}", e),
            }
        }
    };

    let out = response
        .to_line()
        .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
    writer.write_all(out.as_bytes()).await?;
    writer.shutdown().await
}

async fn process_request<L, R>(
    request: Request,
    engine: &SyncEngine<L, R>,
    scheduler: &SchedulerHandle,
    shutdown: &Notify,
) -> Response
where
    L: LocalBufferSource,
    R: RemoteStore,
{
    match request {
        Request::SyncNow => match scheduler.request_sync().await {
            Ok(report) => Response::Synced { report },
            Err(e) => Response::Failed {
                error: e.to_string(),
            },
        },
        Request::Status => Response::Status {
            status: engine.status().await,
        },
        Request::BufferChanged => match scheduler.buffer_changed().await {
            Ok(()) => Response::Accepted,
            Err(e) => Response::Failed {
                error: e.to_string(),
            },
        },
        Request::Shutdown => {
            shutdown.notify_one();
            Response::Accepted
        }
    }
}

/// Send one request to the daemon.
///
/// Returns `None` when no daemon is listening.
pub async fn request(socket_path: &Path, request: &Request) -> Result<Option<Response>> {
    let stream = match UnixStream::connect(socket_path).await {
        Ok(stream) => stream,
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) => {
            return Ok(None);
        }
        Err(e) => return Err(e).context("Failed to connect to daemon"),
    };

    let (reader, mut writer) = stream.into_split();
    writer
        .write_all(request.to_line()?.as_bytes())
        .await
        .context("Failed to send request to daemon")?;

    let mut line = String::new();
    BufReader::new(reader)
        .read_line(&mut line)
        .await
        .context("Failed to read daemon response")?;
    if line.is_empty() {
        anyhow::bail!("Daemon closed the connection without answering");
    }
    Ok(Some(Response::from_line(&line)?))
}
