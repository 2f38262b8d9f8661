//! Purpose: Serve one client connection: assemble records, store them, reply with the dump.
//! Exports: `run_session`, `SessionConfig`, `SessionOutcome`, `DEFAULT_CHUNK_BYTES`.
//! Role: Per-connection task body spawned by the accept loop; generic over the byte stream.
//! Invariants: Reading stops after a chunk whose last byte is the delimiter.
//! Invariants: The reply is one complete snapshot, written only after it is fully built.
//! Invariants: End of stream before that point closes without a reply; partial bytes are dropped.
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::core::assembler::{DEFAULT_MAX_RECORD_BYTES, LineAssembler};
use crate::core::error::{Error, ErrorKind, io_error_kind};
use crate::core::gateway::RingGateway;
use crate::core::record::DELIMITER;

pub const DEFAULT_CHUNK_BYTES: usize = 1024;
/// Largest read buffer `serve` accepts for `--chunk-bytes`.
pub const MAX_CHUNK_BYTES: usize = 1024 * 1024;

#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    pub chunk_bytes: usize,
    pub max_record_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionOutcome {
    /// Snapshot sent after `records` were stored.
    Replied { records: usize, reply_bytes: usize },
    /// Client went away first; `discarded` unterminated bytes were dropped.
    Closed { records: usize, discarded: usize },
}

pub async fn run_session<S>(
    mut stream: S,
    gateway: &Arc<RingGateway>,
    config: SessionConfig,
) -> Result<SessionOutcome, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if config.chunk_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage).with_message("chunk size must be positive"));
    }
    let mut assembler = LineAssembler::new().with_max_record_bytes(config.max_record_bytes);
    let mut buf = read_buffer(config.chunk_bytes)?;
    let mut records = 0usize;

    loop {
        let read = match stream.read(&mut buf).await {
            Ok(read) => read,
            Err(err) if is_disconnect(&err) => 0,
            Err(err) => return Err(io_failure(err, "failed to read from client")),
        };
        if read == 0 {
            return Ok(SessionOutcome::Closed {
                records,
                discarded: assembler.pending().len(),
            });
        }

        let chunk = &buf[..read];
        let before = records;
        for record in assembler.feed(chunk)? {
            gateway.store(record)?;
            records += 1;
        }
        if records > before {
            refresh_scratch(gateway).await?;
        }
        if chunk.last() == Some(&DELIMITER) {
            break;
        }
    }

    let snapshot = gateway.snapshot()?;
    stream
        .write_all(&snapshot.bytes)
        .await
        .map_err(|err| io_failure(err, "failed to send snapshot"))?;
    stream
        .flush()
        .await
        .map_err(|err| io_failure(err, "failed to send snapshot"))?;
    let _ = stream.shutdown().await;

    Ok(SessionOutcome::Replied {
        records,
        reply_bytes: snapshot.bytes.len(),
    })
}

fn read_buffer(len: usize) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|err| {
        Error::new(ErrorKind::Exhausted)
            .with_message(format!("failed to allocate {len}-byte read buffer"))
            .with_source(err)
    })?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Mirrors the dump to the scratch file on a blocking thread so disk latency
/// never stalls the runtime's workers.
pub(crate) async fn refresh_scratch(gateway: &Arc<RingGateway>) -> Result<(), Error> {
    if !gateway.has_scratch() {
        return Ok(());
    }
    let gateway = Arc::clone(gateway);
    tokio::task::spawn_blocking(move || gateway.refresh_scratch())
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("scratch refresh task failed")
                .with_source(err)
        })?
}

fn is_disconnect(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::UnexpectedEof
    )
}

fn io_failure(err: std::io::Error, message: &str) -> Error {
    Error::new(io_error_kind(&err))
        .with_message(message)
        .with_source(err)
}
