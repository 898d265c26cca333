//! Request/response framing for the storage service's stream-socket protocol.
//!
//! This crate is pure wire format: opcodes, response codes, and the
//! size-prefixed framing of paths and byte blobs described in the protocol.
//! It has no notion of files, locks, or storage capacity — those live in
//! `storage-core`. Every multi-byte integer is native-endian; the protocol
//! is not meant to cross machines.

pub mod codec;
pub mod error;
pub mod message;
pub mod opcode;
pub mod response;

pub use error::{WireError, WireResult};
pub use message::{FileBlob, OkBody, Request};
pub use opcode::Opcode;
pub use response::ResponseCode;
