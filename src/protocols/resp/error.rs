//! Malformed-frame errors raised by the RESP parser.
//!
//! Running out of bytes is not represented here: the parser reports that as
//! `ParseResult::Incomplete` and the caller simply waits for more data.

use thiserror::Error;

/// A frame that can never become valid no matter how many more bytes arrive.
///
/// Any of these is fatal to the connection that produced it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The array header did not start with `*`.
    #[error("expected array header, got {0:?}")]
    ExpectedArray(char),

    /// A command argument did not start with `$`.
    #[error("expected bulk string header, got {0:?}")]
    ExpectedBulk(char),

    /// A header line was empty.
    #[error("empty header line")]
    EmptyLine,

    /// A line ended in `\n` without the preceding `\r`.
    #[error("line not terminated by CRLF")]
    MissingCr,

    /// A count or length field was not a decimal integer.
    #[error("invalid length field: {0}")]
    InvalidLength(String),

    /// A count or length field was negative.
    #[error("negative length field: {0}")]
    NegativeLength(i64),

    /// A count or length field exceeded the protocol ceiling.
    #[error("length field {0} exceeds limit {1}")]
    LengthTooLarge(i64, i64),

    /// The array header announced zero arguments.
    #[error("empty command")]
    EmptyCommand,

    /// The bytes after a bulk payload were not `\r\n`.
    #[error("bulk string missing trailing CRLF")]
    MissingTrailer,
}
