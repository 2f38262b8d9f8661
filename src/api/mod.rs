//! Purpose: Define the public Rust API boundary for linepool.
//! Exports: Ring, gateway, device, and server types needed by the CLI and embedders.
//! Role: Additive-only surface; internal module paths may move.
//! Invariants: Everything the binary uses from the library is reachable from here.

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::assembler::{DEFAULT_MAX_RECORD_BYTES, LineAssembler};
pub use crate::core::device::RecordDevice;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::gateway::{Appended, RingGateway, RingStats, Snapshot};
pub use crate::core::record::{DELIMITER, Record};
pub use crate::core::ring::{RecordRing, SlotPosition};
pub use crate::core::scratch::ScratchFile;
pub use crate::core::stamp::StampFormat;
pub use crate::server::injector::{DEFAULT_STAMP_PERIOD, StampInjector};
pub use crate::server::session::{
    DEFAULT_CHUNK_BYTES, MAX_CHUNK_BYTES, SessionConfig, SessionOutcome, run_session,
};
pub use crate::server::shutdown::{ShutdownHandle, ShutdownSignal};
pub use crate::server::{
    DEFAULT_CAPACITY, DEFAULT_SHUTDOWN_TIMEOUT, ServeReport, ServerConfig, build_gateway,
};
