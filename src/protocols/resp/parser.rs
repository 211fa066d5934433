//! Incremental RESP request parser.
//!
//! Requests are arrays of bulk strings:
//!
//! ```text
//! *<n>\r\n
//! $<len>\r\n<len bytes>\r\n   (n times)
//! ```
//!
//! The parser never commits anything until a whole frame is present, so it can
//! be re-run over the same buffer once more bytes have arrived.

use super::error::ProtocolError;
use bytes::Bytes;

/// Upper bound on the argument count of a single request.
pub const MAX_ARGS: i64 = 1024 * 1024;

/// Upper bound on a single bulk string, in bytes.
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// A parsed request: the verb followed by its arguments.
///
/// Always holds at least one element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    pub(crate) fn new(args: Vec<Bytes>) -> Self {
        debug_assert!(!args.is_empty(), "command must carry a verb");
        Command { args }
    }

    /// The verb, as sent on the wire.
    pub fn verb(&self) -> &[u8] {
        &self.args[0]
    }

    /// All elements including the verb.
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Number of elements including the verb.
    pub fn arity(&self) -> usize {
        self.args.len()
    }
}

/// Parse result
#[derive(Debug)]
pub enum ParseResult {
    /// A full frame with the number of bytes it occupied
    Complete(Command, usize),
    /// Need more data
    Incomplete,
    /// The frame can never be valid
    Error(ProtocolError),
}

/// Cursor over one frame.
///
/// `offset` only moves forward and only past bytes that are actually present.
#[derive(Debug, Default)]
pub struct ParseState {
    pub offset: usize,
    pub complete: bool,
}

/// Outcome of a single read step within a frame.
enum Step<T> {
    Ready(T),
    Short,
}

impl ParseState {
    /// Read the next line, excluding its `\r\n`.
    fn read_line<'a>(&mut self, buffer: &'a [u8]) -> Result<Step<&'a [u8]>, ProtocolError> {
        let rest = &buffer[self.offset..];
        let Some(newline) = rest.iter().position(|&b| b == b'\n') else {
            return Ok(Step::Short);
        };
        if newline == 0 || rest[newline - 1] != b'\r' {
            return Err(ProtocolError::MissingCr);
        }
        self.offset += newline + 1;
        Ok(Step::Ready(&rest[..newline - 1]))
    }

    /// Read a header line of the form `<sigil><decimal>`.
    fn read_header(
        &mut self,
        buffer: &[u8],
        sigil: u8,
        limit: i64,
    ) -> Result<Step<usize>, ProtocolError> {
        let line = match self.read_line(buffer)? {
            Step::Ready(line) => line,
            Step::Short => return Ok(Step::Short),
        };

        let Some((&first, digits)) = line.split_first() else {
            return Err(ProtocolError::EmptyLine);
        };
        if first != sigil {
            return Err(match sigil {
                b'*' => ProtocolError::ExpectedArray(first as char),
                _ => ProtocolError::ExpectedBulk(first as char),
            });
        }

        let text = std::str::from_utf8(digits)
            .map_err(|_| ProtocolError::InvalidLength(String::from_utf8_lossy(digits).into()))?;
        let n: i64 = text
            .parse()
            .map_err(|_| ProtocolError::InvalidLength(text.to_string()))?;
        if n < 0 {
            return Err(ProtocolError::NegativeLength(n));
        }
        if n > limit {
            return Err(ProtocolError::LengthTooLarge(n, limit));
        }
        Ok(Step::Ready(n as usize))
    }

    /// Read one `$<len>\r\n<data>\r\n` argument.
    fn read_bulk(&mut self, buffer: &[u8]) -> Result<Step<Bytes>, ProtocolError> {
        let len = match self.read_header(buffer, b'$', MAX_BULK_LEN)? {
            Step::Ready(len) => len,
            Step::Short => return Ok(Step::Short),
        };

        let data_start = self.offset;
        let data_end = data_start + len;
        if buffer.len() < data_end + 2 {
            return Ok(Step::Short);
        }
        if &buffer[data_end..data_end + 2] != b"\r\n" {
            return Err(ProtocolError::MissingTrailer);
        }

        self.offset = data_end + 2;
        Ok(Step::Ready(Bytes::copy_from_slice(&buffer[data_start..data_end])))
    }

    fn parse_command(&mut self, buffer: &[u8]) -> Result<Option<Command>, ProtocolError> {
        let count = match self.read_header(buffer, b'*', MAX_ARGS)? {
            Step::Ready(0) => return Err(ProtocolError::EmptyCommand),
            Step::Ready(count) => count,
            Step::Short => return Ok(None),
        };

        // Don't trust the announced count for the allocation
        let mut args = Vec::with_capacity(count.min(16));
        for _ in 0..count {
            match self.read_bulk(buffer)? {
                Step::Ready(arg) => args.push(arg),
                Step::Short => return Ok(None),
            }
        }

        self.complete = true;
        Ok(Some(Command::new(args)))
    }
}

/// Parse one request frame from the start of `buffer`.
pub fn parse(buffer: &[u8]) -> ParseResult {
    if buffer.is_empty() {
        return ParseResult::Incomplete;
    }

    let mut state = ParseState::default();
    match state.parse_command(buffer) {
        Ok(Some(command)) => {
            debug_assert!(state.complete);
            ParseResult::Complete(command, state.offset)
        }
        Ok(None) => ParseResult::Incomplete,
        Err(e) => ParseResult::Error(e),
    }
}
