// Core modules implementing the record ring, line assembly, and error modeling.
pub mod assembler;
pub mod device;
pub mod error;
pub mod gateway;
pub mod record;
pub mod ring;
pub mod scratch;
pub mod stamp;
