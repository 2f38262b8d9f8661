//! Purpose: Fixed-capacity ring of record slots with mandatory overwrite.
//! Exports: `RecordRing`, `SlotPosition`.
//! Role: Leaf data structure behind `RingGateway`; owns eviction and offset translation.
//! Invariants: At most `capacity` records resident; insert always lands on `write_cursor`.
//! Invariants: `write_cursor` advances by one (mod capacity) per insert and never resets.
//! Invariants: Reads walk slots oldest-first, starting at `write_cursor` and wrapping once.
use crate::core::error::{Error, ErrorKind};
use crate::core::record::Record;

/// Physical slot index plus byte offset inside that slot's record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SlotPosition {
    pub slot: usize,
    pub intra_offset: usize,
}

#[derive(Debug)]
pub struct RecordRing {
    slots: Vec<Option<Record>>,
    write_cursor: usize,
    resident_bytes: usize,
}

impl RecordRing {
    pub fn new(capacity: usize) -> Result<Self, Error> {
        if capacity == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("ring capacity must be at least 1")
                .with_hint("Use a positive capacity like 10."));
        }
        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity).map_err(|err| {
            Error::new(ErrorKind::Exhausted)
                .with_message("failed to allocate ring slots")
                .with_source(err)
        })?;
        slots.resize(capacity, None);
        Ok(Self {
            slots,
            write_cursor: 0,
            resident_bytes: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn write_cursor(&self) -> usize {
        self.write_cursor
    }

    pub fn resident_bytes(&self) -> usize {
        self.resident_bytes
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Stores `record` at the write cursor, dropping whatever was there, and
    /// returns the slot it landed in.
    pub fn insert(&mut self, record: Record) -> usize {
        let slot = self.write_cursor;
        self.resident_bytes += record.len();
        if let Some(evicted) = self.slots[slot].replace(record) {
            self.resident_bytes -= evicted.len();
        }
        self.write_cursor = (slot + 1) % self.slots.len();
        slot
    }

    /// Occupied slots oldest-first, paired with their physical index.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Record)> + '_ {
        let capacity = self.slots.len();
        (0..capacity)
            .map(move |step| (self.write_cursor + step) % capacity)
            .filter_map(move |slot| self.slots[slot].as_ref().map(|record| (slot, record)))
    }

    /// Maps a global byte offset in the dump to the slot holding it.
    ///
    /// Offsets on a record boundary resolve to the start of the next record;
    /// empty slots and zero-length records contribute nothing. Returns `None`
    /// once `byte_offset >= resident_bytes()`.
    pub fn locate(&self, byte_offset: u64) -> Option<SlotPosition> {
        let mut start = 0u64;
        for (slot, record) in self.iter() {
            let end = start + record.len() as u64;
            if byte_offset < end {
                return Some(SlotPosition {
                    slot,
                    intra_offset: (byte_offset - start) as usize,
                });
            }
            start = end;
        }
        None
    }

    /// Bytes of the located record from `intra_offset` to its end.
    pub fn slice_at(&self, position: SlotPosition) -> Result<&[u8], Error> {
        let record = self
            .slots
            .get(position.slot)
            .and_then(Option::as_ref)
            .ok_or_else(|| {
                Error::new(ErrorKind::Internal).with_message("located slot is empty")
            })?;
        record.as_bytes().get(position.intra_offset..).ok_or_else(|| {
            Error::new(ErrorKind::Internal)
                .with_message("intra-slot offset exceeds record length")
                .with_offset(position.intra_offset as u64)
        })
    }

    pub fn dump(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.resident_bytes);
        for (_, record) in self.iter() {
            out.extend_from_slice(record.as_bytes());
        }
        out
    }

    /// Drops every resident record and returns how many were released.
    /// The cursor keeps its position.
    pub fn clear(&mut self) -> usize {
        let mut released = 0;
        for slot in &mut self.slots {
            if slot.take().is_some() {
                released += 1;
            }
        }
        self.resident_bytes = 0;
        released
    }
}
