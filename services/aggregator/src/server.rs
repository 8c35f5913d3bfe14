//! Ingestion server
//!
//! Accepts connections on a Unix socket or TCP port and reads
//! newline-terminated frames from each one concurrently. A frame is parsed
//! and admitted to the pipeline on the connection task, then committed on
//! its own task, so a slow ledger call never stalls reading. The number of
//! commits in flight is bounded; when the bound is reached the connection
//! stops reading until one finishes.
//!
//! On shutdown the server stops accepting, closes its connections and waits
//! for every in-flight commit to finish.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::{ListenAddr, ServerConfig};
use crate::metrics::PipelineMetrics;
use crate::parser::{self, ParseError};
use crate::pipeline::Pipeline;

type Stream = Box<dyn AsyncRead + Unpin + Send>;

/// Per-connection frame counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub frames: u64,
    pub dispatched: u64,
    pub dropped: u64,
}

pub enum Listener {
    Unix { listener: UnixListener, path: PathBuf },
    Tcp(TcpListener),
}

impl Listener {
    /// Bind `addr`. A stale Unix socket from a previous run is removed
    /// first; any other file at the path is left alone and fails the bind.
    pub async fn bind(addr: &ListenAddr) -> io::Result<Self> {
        match addr {
            ListenAddr::Unix(path) => {
                remove_stale_socket(path)?;
                let listener = UnixListener::bind(path)?;
                Ok(Listener::Unix {
                    listener,
                    path: path.clone(),
                })
            }
            ListenAddr::Tcp(addr) => Ok(Listener::Tcp(TcpListener::bind(addr).await?)),
        }
    }

    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        match self {
            Listener::Tcp(listener) => listener.local_addr().ok(),
            Listener::Unix { .. } => None,
        }
    }

    async fn accept(&self) -> io::Result<(Stream, String)> {
        match self {
            Listener::Unix { listener, path } => {
                let (stream, _) = listener.accept().await?;
                Ok((Box::new(stream), format!("unix:{}", path.display())))
            }
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok((Box::new(stream), peer.to_string()))
            }
        }
    }
}

fn remove_stale_socket(path: &Path) -> io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => std::fs::remove_file(path),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("{} exists and is not a socket", path.display()),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Listener::Unix { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[derive(Clone)]
pub struct IngestServer {
    pipeline: Arc<Pipeline>,
    in_flight: Arc<Semaphore>,
    config: ServerConfig,
    metrics: Arc<PipelineMetrics>,
}

impl IngestServer {
    /// Zero bounds are raised to one.
    pub fn new(pipeline: Arc<Pipeline>, config: ServerConfig) -> Self {
        let config = ServerConfig {
            max_in_flight: config.max_in_flight.max(1),
            max_frame_bytes: config.max_frame_bytes.max(1),
        };
        let metrics = pipeline.metrics().clone();
        Self {
            pipeline,
            in_flight: Arc::new(Semaphore::new(config.max_in_flight as usize)),
            config,
            metrics,
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Bind `addr` and serve until `shutdown` resolves.
    pub async fn run<F>(&self, addr: &ListenAddr, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = Listener::bind(addr).await?;
        info!(listen = %addr, "Ingestion server listening");
        self.serve(listener, shutdown).await
    }

    pub async fn serve<F>(&self, listener: Listener, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!(peer = %peer, "Connection opened");
                        let server = self.clone();
                        connections.spawn(async move {
                            let result = server.handle_connection(stream, &peer).await;
                            (peer, result)
                        });
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Ok((peer, result)) = finished {
                        log_closed(&peer, result);
                    }
                }
            }
        }

        info!(
            connections = connections.len(),
            "Shutting down ingestion, closing connections"
        );
        drop(listener);
        connections.shutdown().await;
        self.drain().await;
        info!("Drain complete");
        Ok(())
    }

    /// Read frames from one connection until EOF.
    pub async fn handle_connection<R>(&self, stream: R, peer: &str) -> io::Result<ConnectionStats>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut reader = BufReader::new(stream);
        let mut stats = ConnectionStats::default();
        let mut frame = Vec::with_capacity(256);
        let limit = self.config.max_frame_bytes as u64 + 1;

        loop {
            frame.clear();
            let n = (&mut reader).take(limit).read_until(b'\n', &mut frame).await?;
            if n == 0 {
                break;
            }

            if frame.last() != Some(&b'\n') && n as u64 == limit {
                skip_line(&mut reader, self.config.max_frame_bytes).await?;
                stats.frames += 1;
                self.metrics.record_frame();
                stats.dropped += 1;
                self.drop_malformed(
                    peer,
                    ParseError::FrameTooLong {
                        limit: self.config.max_frame_bytes,
                    },
                );
                continue;
            }

            if frame.iter().all(|b| matches!(b, b'\r' | b'\n')) {
                continue;
            }

            stats.frames += 1;
            self.metrics.record_frame();

            let record = match parser::parse(&frame) {
                Ok(record) => record,
                Err(e) => {
                    stats.dropped += 1;
                    self.drop_malformed(peer, e);
                    continue;
                }
            };

            let permit = match self.in_flight.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let admission = match self.pipeline.admit(record) {
                Ok(admission) => admission,
                Err(_) => {
                    stats.dropped += 1;
                    continue;
                }
            };

            let pipeline = self.pipeline.clone();
            let in_flight = self.in_flight.clone();
            let max_in_flight = self.config.max_in_flight;
            self.report_in_flight();
            tokio::spawn(async move {
                // Failures are logged and counted by the pipeline
                let _ = pipeline.commit(admission).await;
                drop(permit);
                let busy = max_in_flight as usize - in_flight.available_permits();
                pipeline.metrics().set_in_flight(busy as u64);
            });
            stats.dispatched += 1;
        }

        Ok(stats)
    }

    /// Wait until every dispatched commit has finished.
    pub async fn drain(&self) {
        if let Ok(all) = self.in_flight.acquire_many(self.config.max_in_flight).await {
            drop(all);
        }
        self.metrics.set_in_flight(0);
    }

    fn drop_malformed(&self, peer: &str, error: ParseError) {
        self.metrics.record_parse_error();
        warn!(peer = %peer, error = %error, "Dropping malformed frame");
    }

    fn report_in_flight(&self) {
        let busy = self.config.max_in_flight as usize - self.in_flight.available_permits();
        self.metrics.set_in_flight(busy as u64);
    }
}

fn log_closed(peer: &str, result: io::Result<ConnectionStats>) {
    match result {
        Ok(stats) => info!(
            peer = %peer,
            frames = stats.frames,
            dispatched = stats.dispatched,
            dropped = stats.dropped,
            "Connection closed"
        ),
        Err(e) => warn!(peer = %peer, error = %e, "Connection failed"),
    }
}

/// Discard the rest of an over-long line.
async fn skip_line<R>(reader: &mut R, chunk: usize) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut scratch = Vec::with_capacity(chunk);
    loop {
        scratch.clear();
        let n = (&mut *reader)
            .take(chunk as u64)
            .read_until(b'\n', &mut scratch)
            .await?;
        if n == 0 || scratch.last() == Some(&b'\n') {
            debug!(skipped_tail = n, "Over-long frame discarded");
            return Ok(());
        }
    }
}
