//! Purpose: Reassemble arbitrarily chunked input into newline-terminated records.
//! Exports: `LineAssembler`, `Records`, `DEFAULT_MAX_RECORD_BYTES`.
//! Role: Per-connection (or per-handle) state; never shared between writers.
//! Invariants: A record is emitted only when a delimiter arrives; it includes the delimiter.
//! Invariants: Unterminated bytes persist across `feed` calls and are dropped with the assembler.
//! Invariants: No single record (terminated or pending) may exceed `max_record_bytes`.
use bstr::ByteSlice;
use bytes::Bytes;

use crate::core::error::{Error, ErrorKind};
use crate::core::record::{DELIMITER, Record};

pub const DEFAULT_MAX_RECORD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug)]
pub struct LineAssembler {
    pending: Vec<u8>,
    // pending[..consumed] was already emitted; pending[consumed..scanned] holds no delimiter.
    consumed: usize,
    scanned: usize,
    max_record_bytes: usize,
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl LineAssembler {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            consumed: 0,
            scanned: 0,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
        }
    }

    pub fn with_max_record_bytes(mut self, max_record_bytes: usize) -> Self {
        self.max_record_bytes = max_record_bytes;
        self
    }

    /// Bytes received but not yet emitted as a record.
    pub fn pending(&self) -> &[u8] {
        &self.pending[self.consumed..]
    }

    /// Appends `chunk` and returns the records it completes.
    ///
    /// The iterator is lazy: records it does not yield before being dropped
    /// are yielded by the next call instead.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Records<'_>, Error> {
        self.compact();
        self.check_record_sizes(chunk)?;
        self.pending.try_reserve(chunk.len()).map_err(|err| {
            Error::new(ErrorKind::Exhausted)
                .with_message("failed to grow pending record buffer")
                .with_source(err)
        })?;
        self.pending.extend_from_slice(chunk);
        Ok(Records { assembler: self })
    }

    fn next_record(&mut self) -> Option<Record> {
        match self.pending[self.scanned..].find_byte(DELIMITER) {
            Some(idx) => {
                let end = self.scanned + idx + 1;
                let record = Record::new(Bytes::copy_from_slice(&self.pending[self.consumed..end]));
                self.consumed = end;
                self.scanned = end;
                Some(record)
            }
            None => {
                self.scanned = self.pending.len();
                None
            }
        }
    }

    fn compact(&mut self) {
        if self.consumed == 0 {
            return;
        }
        self.pending.drain(..self.consumed);
        self.scanned -= self.consumed;
        self.consumed = 0;
    }

    fn check_record_sizes(&self, chunk: &[u8]) -> Result<(), Error> {
        let unread = self.pending();
        let mut run = match unread.rfind_byte(DELIMITER) {
            Some(idx) => unread.len() - idx - 1,
            None => unread.len(),
        };
        let mut rest = chunk;
        loop {
            match rest.find_byte(DELIMITER) {
                Some(idx) => {
                    if run + idx + 1 > self.max_record_bytes {
                        return Err(self.oversize_error());
                    }
                    run = 0;
                    rest = &rest[idx + 1..];
                }
                None => {
                    if run + rest.len() > self.max_record_bytes {
                        return Err(self.oversize_error());
                    }
                    return Ok(());
                }
            }
        }
    }

    fn oversize_error(&self) -> Error {
        Error::new(ErrorKind::Exhausted)
            .with_message(format!(
                "record exceeds max record size of {} bytes",
                self.max_record_bytes
            ))
            .with_hint("Split the input into shorter lines or raise --max-record-bytes.")
    }
}

/// Records completed by one `LineAssembler::feed` call.
#[derive(Debug)]
pub struct Records<'a> {
    assembler: &'a mut LineAssembler,
}

impl Iterator for Records<'_> {
    type Item = Record;

    fn next(&mut self) -> Option<Self::Item> {
        self.assembler.next_record()
    }
}
