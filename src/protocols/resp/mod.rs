//! RESP (Redis Serialization Protocol) request handling.
//!
//! Front ends only call [`decode`]; the parser, dispatcher and encoder behind
//! it are synchronous and hold no per-connection state.

pub mod dispatch;
pub mod error;
pub mod parser;
pub mod pipeline;
pub mod response;

pub use error::ProtocolError;
pub use pipeline::{decode, ERROR_INPUT};
