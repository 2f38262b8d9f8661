//! Purpose: TCP front end for the record ring: accept loop, session tracking, shutdown.
//! Exports: `run`, `build_gateway`, `ServerConfig`, `ServeReport`, and the session/injector/shutdown modules.
//! Role: Library-level server used by the `serve` command and by integration tests.
//! Invariants: Every session runs in a tracked task; none outlive `run`.
//! Invariants: Shutdown order: stop accepting, seal, drain (then abort), stop stamps, release.
//! Invariants: A failing session is logged and contained; it never ends the accept loop.
pub mod injector;
pub mod session;
pub mod shutdown;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::{JoinError, JoinSet};
use tracing::{Instrument, error, info, info_span, warn};

use crate::core::error::{Error, ErrorKind};
use crate::core::gateway::RingGateway;
use crate::core::scratch::ScratchFile;
use injector::{DEFAULT_STAMP_PERIOD, StampInjector};
use session::{SessionConfig, SessionOutcome, run_session};
use shutdown::{ShutdownHandle, ShutdownSignal};

pub const DEFAULT_CAPACITY: usize = 10;
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub capacity: usize,
    pub session: SessionConfig,
    /// `None` disables timestamp records.
    pub stamp_period: Option<Duration>,
    pub shutdown_timeout: Duration,
    pub scratch_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            session: SessionConfig::default(),
            stamp_period: Some(DEFAULT_STAMP_PERIOD),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            scratch_path: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ServeReport {
    /// Sessions that ended without error, with or without a reply.
    pub sessions: usize,
    pub failed: usize,
    /// Sessions still running at the shutdown deadline.
    pub aborted: usize,
    pub stamps: usize,
    pub released: usize,
}

impl ServeReport {
    fn record(&mut self, joined: Result<Result<SessionOutcome, Error>, JoinError>) {
        match joined {
            Ok(Ok(_)) => self.sessions += 1,
            Ok(Err(_)) => self.failed += 1,
            Err(err) if err.is_cancelled() => self.aborted += 1,
            Err(err) => {
                error!(error = %err, "session task panicked");
                self.failed += 1;
            }
        }
    }
}

/// Ring gateway for `config`, mirrored to the scratch file when one is set.
pub fn build_gateway(config: &ServerConfig) -> Result<Arc<RingGateway>, Error> {
    let mut gateway = RingGateway::new(config.capacity)?;
    if let Some(path) = &config.scratch_path {
        gateway = gateway.with_scratch(ScratchFile::create(path)?);
    }
    Ok(Arc::new(gateway))
}

pub async fn run(
    listener: TcpListener,
    gateway: Arc<RingGateway>,
    config: &ServerConfig,
    mut shutdown: ShutdownSignal,
) -> Result<ServeReport, Error> {
    if config.session.chunk_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage).with_message("chunk size must be positive"));
    }
    let stamp_stop = ShutdownHandle::new();
    let stamper = match config.stamp_period {
        Some(period) => {
            let injector = StampInjector::new(period)?;
            Some(tokio::spawn(
                injector.run(Arc::clone(&gateway), stamp_stop.subscribe()),
            ))
        }
        None => None,
    };

    let mut report = ServeReport::default();
    let mut sessions: JoinSet<Result<SessionOutcome, Error>> = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                report.record(joined);
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(%peer, "accepted connection");
                    let gateway = Arc::clone(&gateway);
                    let session_config = config.session;
                    sessions.spawn(
                        async move {
                            let outcome = run_session(stream, &gateway, session_config).await;
                            match &outcome {
                                Ok(outcome) => info!(?outcome, "closed connection"),
                                Err(err) => warn!(error = %err, "connection aborted"),
                            }
                            outcome
                        }
                        .instrument(info_span!("session", %peer)),
                    );
                }
                Err(err) => {
                    error!(error = %err, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }

    drop(listener);
    gateway.seal()?;
    info!(in_flight = sessions.len(), "shutting down");

    let drained = tokio::time::timeout(config.shutdown_timeout, async {
        while let Some(joined) = sessions.join_next().await {
            report.record(joined);
        }
    })
    .await;
    if drained.is_err() {
        sessions.abort_all();
        while let Some(joined) = sessions.join_next().await {
            report.record(joined);
        }
        warn!(aborted = report.aborted, "aborted sessions at shutdown deadline");
    }

    stamp_stop.trigger();
    if let Some(stamper) = stamper {
        match stamper.await {
            Ok(stamps) => report.stamps = stamps,
            Err(err) => error!(error = %err, "timestamp task failed"),
        }
    }

    let stats = gateway.stats()?;
    info!(
        capacity = stats.capacity,
        occupied = stats.occupied,
        resident_bytes = stats.resident_bytes,
        appended = stats.appended,
        "ring stats at shutdown"
    );
    report.released = gateway.release()?;
    info!(
        sessions = report.sessions,
        failed = report.failed,
        aborted = report.aborted,
        released = report.released,
        "server stopped"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::{ServerConfig, build_gateway, run};
    use crate::server::shutdown::ShutdownHandle;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn quiet_config() -> ServerConfig {
        ServerConfig {
            stamp_period: None,
            shutdown_timeout: Duration::from_secs(2),
            ..ServerConfig::default()
        }
    }

    async fn exchange(addr: std::net::SocketAddr, payload: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        stream.write_all(payload).await.expect("write");
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.expect("read");
        reply
    }

    #[tokio::test]
    async fn serves_sequential_clients_then_releases() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let config = ServerConfig {
            capacity: 2,
            ..quiet_config()
        };
        let gateway = build_gateway(&config).expect("gateway");
        let shutdown = ShutdownHandle::new();
        let server = tokio::spawn({
            let gateway = gateway.clone();
            let signal = shutdown.subscribe();
            async move { run(listener, gateway, &config, signal).await }
        });

        assert_eq!(exchange(addr, b"one\n").await, b"one\n");
        assert_eq!(exchange(addr, b"two\n").await, b"one\ntwo\n");
        assert_eq!(exchange(addr, b"three\n").await, b"two\nthree\n");

        shutdown.trigger();
        let report = server.await.expect("join").expect("run");
        assert_eq!(report.sessions, 3);
        assert_eq!(report.aborted, 0);
        assert_eq!(report.released, 2);
        assert!(gateway.is_sealed().expect("sealed"));
        assert!(gateway.snapshot().expect("snapshot").bytes.is_empty());
    }

    #[tokio::test]
    async fn idle_session_is_aborted_at_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let config = ServerConfig {
            shutdown_timeout: Duration::from_millis(100),
            ..quiet_config()
        };
        let gateway = build_gateway(&config).expect("gateway");
        let shutdown = ShutdownHandle::new();
        let server = tokio::spawn({
            let signal = shutdown.subscribe();
            async move { run(listener, gateway, &config, signal).await }
        });

        let mut idle = TcpStream::connect(addr).await.expect("connect");
        idle.write_all(b"never finished").await.expect("write");
        // Give the accept loop time to pick up the connection.
        tokio::time::sleep(Duration::from_millis(100)).await;

        shutdown.trigger();
        let report = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("timely")
            .expect("join")
            .expect("run");
        assert_eq!(report.aborted, 1);
        assert_eq!(report.sessions, 0);
    }

    #[tokio::test]
    async fn scratch_file_is_removed_after_shutdown() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("linepool.data");
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let config = ServerConfig {
            scratch_path: Some(path.clone()),
            ..quiet_config()
        };
        let gateway = build_gateway(&config).expect("gateway");
        let shutdown = ShutdownHandle::new();
        let server = tokio::spawn({
            let signal = shutdown.subscribe();
            async move { run(listener, gateway, &config, signal).await }
        });

        assert_eq!(exchange(addr, b"mirrored\n").await, b"mirrored\n");
        assert_eq!(std::fs::read(&path).expect("read"), b"mirrored\n");

        shutdown.trigger();
        server.await.expect("join").expect("run");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn concurrent_clients_each_see_their_record() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let config = ServerConfig {
            capacity: 32,
            ..quiet_config()
        };
        let gateway = build_gateway(&config).expect("gateway");
        let shutdown = ShutdownHandle::new();
        let server = tokio::spawn({
            let gateway = gateway.clone();
            let signal = shutdown.subscribe();
            async move { run(listener, gateway, &config, signal).await }
        });

        let mut clients = Vec::new();
        for i in 0..8 {
            clients.push(tokio::spawn(async move {
                let line = format!("client-{i}\n");
                let reply = exchange(addr, line.as_bytes()).await;
                (line, reply)
            }));
        }
        for client in clients {
            let (line, reply) = client.await.expect("join");
            let text = String::from_utf8(reply).expect("utf8");
            assert!(text.lines().any(|got| format!("{got}\n") == line));
            assert!(text.ends_with('\n'));
        }
        assert_eq!(gateway.stats().expect("stats").appended, 8);

        shutdown.trigger();
        let report = server.await.expect("join").expect("run");
        assert_eq!(report.sessions, 8);
    }
}
