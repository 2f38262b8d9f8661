// Immutable line record: the unit stored in and replayed from the ring.
use bytes::Bytes;

pub const DELIMITER: u8 = b'\n';

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Record {
    bytes: Bytes,
}

impl Record {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_terminated(&self) -> bool {
        self.bytes.last() == Some(&DELIMITER)
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

impl From<&'static str> for Record {
    fn from(value: &'static str) -> Self {
        Self::new(Bytes::from_static(value.as_bytes()))
    }
}

impl From<Vec<u8>> for Record {
    fn from(value: Vec<u8>) -> Self {
        Self::new(value)
    }
}
