//! Purpose: Run the line-record TCP server for the `serve` command.
//! Exports: `ServeConfig`, `validate_config`, `bind_listener`, `daemonize`, `serve`.
//! Role: Binary-side glue: binding, daemon fork, tracing init, signal wiring.
//! Invariants: The listener is bound before any fork so bind errors reach the caller.
//! Invariants: No async runtime exists before `daemonize` returns.
//! Invariants: SIGINT/SIGTERM handlers are installed before the first connection is accepted.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use linepool::api::{
    Error, ErrorKind, MAX_CHUNK_BYTES, RingGateway, ServeReport, ServerConfig, ShutdownHandle,
};
use linepool::server;

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub daemon: bool,
    pub server: ServerConfig,
}

pub fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    let server = &config.server;
    if server.capacity == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--capacity must be greater than zero")
            .with_hint("Use a positive value like 10."));
    }
    if server.session.chunk_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--chunk-bytes must be greater than zero")
            .with_hint("Use a positive value like 1024."));
    }
    if server.session.chunk_bytes > MAX_CHUNK_BYTES {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("--chunk-bytes must be at most {MAX_CHUNK_BYTES}"))
            .with_hint("Records longer than one chunk are reassembled; use a value like 1024."));
    }
    if server.session.max_record_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-record-bytes must be greater than zero")
            .with_hint("Use a size like 16M."));
    }
    if server.stamp_period.is_some_and(|period| period.is_zero()) {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--stamp-period must be greater than zero")
            .with_hint("Use a duration like 10s, or --no-stamp."));
    }
    if server.shutdown_timeout.is_zero() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--shutdown-timeout must be greater than zero")
            .with_hint("Use a duration like 10s."));
    }
    Ok(())
}

/// Binds synchronously so the address is known (and errors reported) before
/// daemonizing or starting the runtime.
pub fn bind_listener(bind: SocketAddr) -> Result<std::net::TcpListener, Error> {
    let listener = std::net::TcpListener::bind(bind).map_err(|err| {
        let kind = match err.kind() {
            std::io::ErrorKind::AddrInUse => ErrorKind::Busy,
            std::io::ErrorKind::PermissionDenied => ErrorKind::Permission,
            _ => ErrorKind::Io,
        };
        Error::new(kind)
            .with_message(format!("failed to bind {bind}"))
            .with_source(err)
    })?;
    listener.set_nonblocking(true).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to configure listener")
            .with_source(err)
    })?;
    Ok(listener)
}

/// Forks into the background. The parent exits 0; the child starts a new
/// session with stdio on `/dev/null`. Must run before any thread is spawned.
#[cfg(unix)]
pub fn daemonize() -> Result<(), Error> {
    use std::os::fd::AsRawFd;

    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(os_error("fork failed"));
    }
    if pid > 0 {
        std::process::exit(0);
    }

    if unsafe { libc::setsid() } < 0 {
        return Err(os_error("setsid failed"));
    }
    let devnull = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to open /dev/null")
                .with_source(err)
        })?;
    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        if unsafe { libc::dup2(devnull.as_raw_fd(), target) } < 0 {
            return Err(os_error("failed to redirect stdio"));
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn daemonize() -> Result<(), Error> {
    Err(Error::new(ErrorKind::Usage)
        .with_message("--daemon is only supported on unix")
        .with_hint("Run in the foreground under a service manager instead."))
}

#[cfg(unix)]
fn os_error(message: &str) -> Error {
    Error::new(ErrorKind::Io)
        .with_message(message)
        .with_source(std::io::Error::last_os_error())
}

pub async fn serve(
    config: ServeConfig,
    listener: std::net::TcpListener,
    gateway: Arc<RingGateway>,
) -> Result<ServeReport, Error> {
    init_tracing();

    let listener = tokio::net::TcpListener::from_std(listener).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to register listener")
            .with_source(err)
    })?;
    let local = listener.local_addr().ok();

    let shutdown = ShutdownHandle::new();
    install_shutdown_signals(shutdown.clone())?;

    info!(
        bind = ?local,
        capacity = config.server.capacity,
        stamp_period = ?config.server.stamp_period,
        data_file = ?config.server.scratch_path,
        "listening"
    );
    server::run(listener, gateway, &config.server, shutdown.subscribe()).await
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn install_shutdown_signals(shutdown: ShutdownHandle) -> Result<(), Error> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let install = |kind: SignalKind| {
            signal(kind).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to install signal handler")
                    .with_source(err)
            })
        };
        let mut interrupt = install(SignalKind::interrupt())?;
        let mut terminate = install(SignalKind::terminate())?;
        tokio::spawn(async move {
            let name = tokio::select! {
                _ = interrupt.recv() => "SIGINT",
                _ = terminate.recv() => "SIGTERM",
            };
            info!(signal = name, "caught signal, exiting");
            shutdown.trigger();
        });
    }
    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %err, "failed to wait for ctrl-c");
                return;
            }
            info!("caught ctrl-c, exiting");
            shutdown.trigger();
        });
    }
    Ok(())
}
