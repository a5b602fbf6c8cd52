//! UDP query protocol: packet layouts only, no I/O.

pub mod codec;

pub use codec::{DecodeError, HandshakeResponse};
