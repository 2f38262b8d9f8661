//! Purpose: Positioned byte-handle view of a `RingGateway`, in the style of a character device.
//! Exports: `RecordDevice`.
//! Role: Alternative front end to the TCP server; implements `std::io::{Read, Write, Seek}`.
//! Invariants: A read returns bytes from at most one record, then advances the position.
//! Invariants: Writes are assembled per handle; unterminated bytes are dropped with the handle.
//! Invariants: Positions are global offsets into the current dump.
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use bytes::Bytes;

use crate::core::assembler::LineAssembler;
use crate::core::error::{Error, ErrorKind};
use crate::core::gateway::RingGateway;

#[derive(Debug)]
pub struct RecordDevice {
    gateway: Arc<RingGateway>,
    position: u64,
    assembler: LineAssembler,
}

impl RecordDevice {
    pub fn open(gateway: Arc<RingGateway>) -> Self {
        Self {
            gateway,
            position: 0,
            assembler: LineAssembler::new(),
        }
    }

    pub fn with_max_record_bytes(mut self, max_record_bytes: usize) -> Self {
        self.assembler = LineAssembler::new().with_max_record_bytes(max_record_bytes);
        self
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Up to `count` bytes at `position`, stopping at the end of the record
    /// that holds it. Does not move the handle.
    pub fn read_at(&self, count: usize, position: u64) -> Result<Bytes, Error> {
        self.gateway.read_at(position, count)
    }

    /// Feeds `bytes` through the handle's assembler and stores each completed
    /// record. Returns the number of bytes accepted.
    pub fn write_records(&mut self, bytes: &[u8]) -> Result<usize, Error> {
        for record in self.assembler.feed(bytes)? {
            self.gateway.append(record)?;
        }
        Ok(bytes.len())
    }
}

impl Read for RecordDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let bytes = self.read_at(buf.len(), self.position).map_err(io::Error::other)?;
        buf[..bytes.len()].copy_from_slice(&bytes);
        self.position += bytes.len() as u64;
        Ok(bytes.len())
    }
}

impl Write for RecordDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_records(buf).map_err(|err| match err.kind() {
            ErrorKind::Exhausted => io::Error::new(io::ErrorKind::OutOfMemory, err),
            _ => io::Error::other(err),
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for RecordDevice {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (base, delta) = match pos {
            SeekFrom::Start(offset) => {
                self.position = offset;
                return Ok(offset);
            }
            SeekFrom::Current(delta) => (self.position, delta),
            SeekFrom::End(delta) => {
                let end = self.gateway.resident_bytes().map_err(io::Error::other)?;
                (end as u64, delta)
            }
        };
        let target = base.checked_add_signed(delta).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )
        })?;
        self.position = target;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::RecordDevice;
    use crate::core::gateway::RingGateway;
    use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
    use std::sync::Arc;

    fn device(capacity: usize) -> RecordDevice {
        RecordDevice::open(Arc::new(RingGateway::new(capacity).expect("gateway")))
    }

    #[test]
    fn partial_writes_join_into_one_record() {
        let mut dev = device(10);
        assert_eq!(dev.write(b"hel").expect("write"), 3);
        assert!(dev.read_at(100, 0).expect("read").is_empty());
        assert_eq!(dev.write(b"lo\n").expect("write"), 3);
        assert_eq!(&dev.read_at(100, 0).expect("read")[..], b"hello\n");
    }

    #[test]
    fn reads_stop_at_record_boundaries() {
        let mut dev = device(10);
        dev.write_all(b"abc\nde\n").expect("write");

        let mut buf = [0u8; 16];
        assert_eq!(dev.read(&mut buf).expect("read"), 4);
        assert_eq!(&buf[..4], b"abc\n");
        assert_eq!(dev.read(&mut buf).expect("read"), 3);
        assert_eq!(&buf[..3], b"de\n");
        assert_eq!(dev.read(&mut buf).expect("read"), 0);
        assert_eq!(dev.position(), 7);
    }

    #[test]
    fn read_to_end_reproduces_dump_after_wrap() {
        let mut dev = device(2);
        dev.write_all(b"one\ntwo\nthree\n").expect("write");
        let mut out = Vec::new();
        dev.read_to_end(&mut out).expect("read");
        assert_eq!(out, b"two\nthree\n");
    }

    #[test]
    fn small_buffer_reads_resume_mid_record() {
        let mut dev = device(4);
        dev.write_all(b"abcdef\n").expect("write");
        let mut buf = [0u8; 4];
        assert_eq!(dev.read(&mut buf).expect("read"), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(dev.read(&mut buf).expect("read"), 3);
        assert_eq!(&buf[..3], b"ef\n");
    }

    #[test]
    fn seek_variants() {
        let mut dev = device(4);
        dev.write_all(b"abc\nde\n").expect("write");

        assert_eq!(dev.seek(SeekFrom::End(-3)).expect("seek"), 4);
        let mut out = String::new();
        dev.read_to_string(&mut out).expect("read");
        assert_eq!(out, "de\n");

        assert_eq!(dev.seek(SeekFrom::Start(1)).expect("seek"), 1);
        assert_eq!(dev.seek(SeekFrom::Current(1)).expect("seek"), 2);
        let err = dev.seek(SeekFrom::Current(-5)).expect_err("negative");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(dev.position(), 2);
    }

    #[test]
    fn handles_do_not_share_partial_writes() {
        let gateway = Arc::new(RingGateway::new(4).expect("gateway"));
        let mut first = RecordDevice::open(Arc::clone(&gateway));
        let mut second = RecordDevice::open(Arc::clone(&gateway));
        first.write_all(b"from-first").expect("write");
        second.write_all(b"second\n").expect("write");
        drop(first);
        assert_eq!(&gateway.snapshot().expect("snapshot").bytes[..], b"second\n");
    }
}
