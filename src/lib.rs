//! Purpose: Library crate behind the `linepool` CLI: record ring, line assembly, TCP server.
//! Exports: `api` (stable surface), `core` (ring, gateway, device), `server` (accept loop, shutdown).
//! Role: Used by the binary and by integration tests; embeddable in other async programs.
//! Invariants: All shared ring state goes through `core::gateway::RingGateway`.
//! Invariants: Core modules do no async I/O; the server module owns the runtime-facing code.
pub mod api;
pub mod core;
pub mod server;
