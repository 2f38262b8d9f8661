// Timestamp record formatting for the periodic injector.
use time::format_description::BorrowedFormatItem;
use time::{OffsetDateTime, UtcOffset};

use crate::core::error::{Error, ErrorKind};
use crate::core::record::Record;

pub const STAMP_PATTERN: &str = "timestamp:[year]-[month]-[day] [hour]:[minute]:[second]";

#[derive(Debug)]
pub struct StampFormat {
    items: Vec<BorrowedFormatItem<'static>>,
}

impl StampFormat {
    pub fn new() -> Result<Self, Error> {
        let items =
            time::format_description::parse_borrowed::<2>(STAMP_PATTERN).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("invalid timestamp pattern")
                    .with_source(err)
            })?;
        Ok(Self { items })
    }

    /// `timestamp:YYYY-MM-DD HH:MM:SS\n` for `at`.
    pub fn record(&self, at: OffsetDateTime) -> Result<Record, Error> {
        let mut text = at.format(&self.items).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to format timestamp")
                .with_source(err)
        })?;
        text.push('\n');
        Ok(Record::from(text.into_bytes()))
    }

    pub fn now(&self) -> Result<Record, Error> {
        self.record(local_now())
    }
}

/// Wall-clock time in the local zone, or UTC when the offset is unknown.
pub fn local_now() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    match UtcOffset::current_local_offset() {
        Ok(offset) => now.to_offset(offset),
        Err(_) => now,
    }
}
