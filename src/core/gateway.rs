//! Purpose: Sole owner of the record ring; serializes every mutation and read behind one lock.
//! Exports: `RingGateway`, `Appended`, `Snapshot`, `RingStats`.
//! Role: Shared by sessions, the stamp injector, and device handles (via `Arc`).
//! Invariants: The lock is held only for one insert, dump, or slot read; never across I/O.
//! Invariants: A snapshot never observes a half-inserted record and owns its bytes.
//! Invariants: Once sealed, `append` fails with `Shutdown`; reads keep working.
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, warn};

use crate::core::error::{Error, ErrorKind};
use crate::core::record::Record;
use crate::core::ring::RecordRing;
use crate::core::scratch::ScratchFile;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Appended {
    pub slot: usize,
    /// Total records appended through this gateway, including this one.
    pub seq: u64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    /// Append count the dump reflects.
    pub seq: u64,
    pub bytes: Bytes,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct RingStats {
    pub capacity: usize,
    pub occupied: usize,
    pub resident_bytes: usize,
    pub write_cursor: usize,
    pub appended: u64,
    pub sealed: bool,
}

#[derive(Debug)]
struct GatewayState {
    ring: RecordRing,
    appended: u64,
    sealed: bool,
}

#[derive(Debug)]
pub struct RingGateway {
    state: Mutex<GatewayState>,
    scratch: Option<ScratchFile>,
}

impl RingGateway {
    pub fn new(capacity: usize) -> Result<Self, Error> {
        Ok(Self {
            state: Mutex::new(GatewayState {
                ring: RecordRing::new(capacity)?,
                appended: 0,
                sealed: false,
            }),
            scratch: None,
        })
    }

    /// Mirrors the full dump into `scratch` after every append.
    pub fn with_scratch(mut self, scratch: ScratchFile) -> Self {
        self.scratch = Some(scratch);
        self
    }

    /// Stores `record` and mirrors the new dump into the scratch file.
    pub fn append(&self, record: Record) -> Result<Appended, Error> {
        let appended = self.store(record)?;
        self.refresh_scratch()?;
        Ok(appended)
    }

    /// Stores `record` without touching the scratch file. Callers on an async
    /// runtime follow up with `refresh_scratch` on a blocking thread.
    pub fn store(&self, record: Record) -> Result<Appended, Error> {
        let len = record.len();
        let appended = {
            let mut state = self.lock()?;
            if state.sealed {
                return Err(Error::new(ErrorKind::Shutdown)
                    .with_message("ring is shutting down; append rejected"));
            }
            let slot = state.ring.insert(record);
            state.appended += 1;
            Appended {
                slot,
                seq: state.appended,
            }
        };
        debug!(slot = appended.slot, seq = appended.seq, len, "stored record");
        Ok(appended)
    }

    pub fn has_scratch(&self) -> bool {
        self.scratch.is_some()
    }

    /// Rewrites the scratch file with the current dump. Write failures are
    /// logged and do not fail the caller.
    pub fn refresh_scratch(&self) -> Result<(), Error> {
        let Some(scratch) = &self.scratch else {
            return Ok(());
        };
        let snapshot = self.snapshot()?;
        if let Err(err) = scratch.refresh(&snapshot) {
            warn!(path = %scratch.path().display(), error = %err, "scratch file refresh failed");
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Result<Snapshot, Error> {
        let state = self.lock()?;
        let bytes = Bytes::from(state.ring.dump());
        Ok(Snapshot {
            seq: state.appended,
            bytes,
        })
    }

    /// Reads at most `count` bytes starting at global `position`, never
    /// crossing into the next record. Empty once `position` reaches the end.
    pub fn read_at(&self, position: u64, count: usize) -> Result<Bytes, Error> {
        let state = self.lock()?;
        let Some(located) = state.ring.locate(position) else {
            return Ok(Bytes::new());
        };
        let bytes = state.ring.slice_at(located).map_err(|err| err.with_offset(position))?;
        let take = bytes.len().min(count);
        Ok(Bytes::copy_from_slice(&bytes[..take]))
    }

    pub fn resident_bytes(&self) -> Result<usize, Error> {
        Ok(self.lock()?.ring.resident_bytes())
    }

    pub fn stats(&self) -> Result<RingStats, Error> {
        let state = self.lock()?;
        Ok(RingStats {
            capacity: state.ring.capacity(),
            occupied: state.ring.occupied(),
            resident_bytes: state.ring.resident_bytes(),
            write_cursor: state.ring.write_cursor(),
            appended: state.appended,
            sealed: state.sealed,
        })
    }

    /// Rejects all further appends.
    pub fn seal(&self) -> Result<(), Error> {
        self.lock()?.sealed = true;
        Ok(())
    }

    pub fn is_sealed(&self) -> Result<bool, Error> {
        Ok(self.lock()?.sealed)
    }

    /// Seals the ring, drops every resident record, and removes the scratch
    /// file. Returns the number of records released.
    pub fn release(&self) -> Result<usize, Error> {
        let released = {
            let mut state = self.lock()?;
            state.sealed = true;
            state.ring.clear()
        };
        if let Some(scratch) = &self.scratch {
            scratch.remove()?;
        }
        Ok(released)
    }

    fn lock(&self) -> Result<MutexGuard<'_, GatewayState>, Error> {
        self.state
            .lock()
            .map_err(|_| Error::new(ErrorKind::Internal).with_message("ring lock poisoned"))
    }
}
