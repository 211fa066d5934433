//! Pipelined decode loop shared by both front ends.
//!
//! A connection hands over everything it has buffered; every complete frame
//! in it is parsed, dispatched and answered, and the caller learns how many
//! bytes to drop from the front of its buffer.

use super::dispatch::dispatch;
use super::error::ProtocolError;
use super::parser::{parse, ParseResult};
use crate::storage::Store;
use bytes::BytesMut;
use tracing::trace;

/// Fixed reply written before a connection is dropped for a malformed stream.
pub const ERROR_INPUT: &[u8] = b"-Error input\r\n";

/// Answer every complete frame at the front of `input`.
///
/// Replies are appended to `output` in request order. Returns the number of
/// bytes consumed; a trailing partial frame is left untouched. On error the
/// replies for the frames before the malformed one stay in `output`.
pub fn decode(
    input: &[u8],
    store: &dyn Store,
    output: &mut BytesMut,
) -> Result<usize, ProtocolError> {
    let mut consumed = 0;

    while consumed < input.len() {
        match parse(&input[consumed..]) {
            ParseResult::Complete(command, len) => {
                trace!(len, "Processing RESP command");
                dispatch(&command, store).encode_into(output);
                consumed += len;
            }
            ParseResult::Incomplete => {
                trace!(
                    pending = input.len() - consumed,
                    "Short request, waiting for more data"
                );
                break;
            }
            ParseResult::Error(e) => return Err(e),
        }
    }

    Ok(consumed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, Value};

    const SET_FOO: &[u8] = b"*3\r\n$3\r\nset\r\n$3\r\nfoo\r\n$3\r\nbar\r\n";
    const GET_FOO: &[u8] = b"*2\r\n$3\r\nget\r\n$3\r\nfoo\r\n";
    const GET_NO_KEY: &[u8] = b"*1\r\n$3\r\nget\r\n";

    fn run(input: &[u8], store: &dyn Store) -> (Result<usize, ProtocolError>, BytesMut) {
        let mut output = BytesMut::new();
        let result = decode(input, store, &mut output);
        (result, output)
    }

    #[test]
    fn test_pipelined_set_then_get() {
        let store = MemoryStore::new();
        let input = [SET_FOO, GET_FOO].concat();

        let (result, output) = run(&input, &*store);

        assert_eq!(result, Ok(input.len()));
        assert_eq!(&output[..], b"+OK\r\n$3\r\nbar\r\n");
    }

    #[test]
    fn test_replies_follow_request_order() {
        let store = MemoryStore::new();
        let frames: Vec<&[u8]> = vec![GET_FOO, SET_FOO, GET_FOO, GET_NO_KEY, GET_FOO];
        let input = frames.concat();

        let (result, output) = run(&input, &*store);

        assert_eq!(result, Ok(frames.iter().map(|f| f.len()).sum::<usize>()));
        assert_eq!(
            &output[..],
            &b"-Error key not found\r\n+OK\r\n$3\r\nbar\r\n-Error input < 2\r\n$3\r\nbar\r\n"[..]
        );
    }

    #[test]
    fn test_truncated_tail_is_left_for_next_read() {
        let store = MemoryStore::new();
        let mut input = [SET_FOO, GET_FOO].concat();
        let complete = input.len();
        input.extend_from_slice(&GET_FOO[..GET_FOO.len() - 1]);

        let (result, output) = run(&input, &*store);

        assert_eq!(result, Ok(complete));
        assert_eq!(&output[..], b"+OK\r\n$3\r\nbar\r\n");
    }

    #[test]
    fn test_resume_after_more_bytes() {
        let store = MemoryStore::new();
        let split = 10;

        let (result, output) = run(&SET_FOO[..split], &*store);
        assert_eq!(result, Ok(0));
        assert!(output.is_empty());
        assert!(store.is_empty());

        let (result, output) = run(SET_FOO, &*store);
        assert_eq!(result, Ok(SET_FOO.len()));
        assert_eq!(&output[..], b"+OK\r\n");
    }

    #[test]
    fn test_single_byte_consumes_nothing() {
        let store = MemoryStore::new();
        let (result, output) = run(b"*", &*store);
        assert_eq!(result, Ok(0));
        assert!(output.is_empty());
    }

    #[test]
    fn test_empty_input() {
        let store = MemoryStore::new();
        let (result, output) = run(b"", &*store);
        assert_eq!(result, Ok(0));
        assert!(output.is_empty());
    }

    #[test]
    fn test_arity_error_keeps_going() {
        let store = MemoryStore::new();
        let input = [GET_NO_KEY, SET_FOO].concat();

        let (result, output) = run(&input, &*store);

        assert_eq!(result, Ok(input.len()));
        assert_eq!(&output[..], b"-Error input < 2\r\n+OK\r\n");
    }

    #[test]
    fn test_malformed_frame_aborts() {
        let store = MemoryStore::new();
        let input = [SET_FOO, &b"*-1\r\n"[..], GET_FOO].concat();

        let (result, output) = run(&input, &*store);

        assert_eq!(result, Err(ProtocolError::NegativeLength(-1)));
        // The set before the bad frame was applied and answered
        assert_eq!(&output[..], b"+OK\r\n");
        assert_eq!(store.get("foo"), Ok(Value::Str("bar".into())));
    }

    #[test]
    fn test_non_numeric_count_is_not_a_reply() {
        let store = MemoryStore::new();
        let (result, output) = run(b"*x\r\n", &*store);
        assert!(matches!(result, Err(ProtocolError::InvalidLength(_))));
        assert!(output.is_empty());
    }

    #[test]
    fn test_set_in_truncated_frame_is_not_applied() {
        let store = MemoryStore::new();
        let (result, _) = run(&SET_FOO[..SET_FOO.len() - 2], &*store);
        assert_eq!(result, Ok(0));
        assert!(store.is_empty());
    }
}
