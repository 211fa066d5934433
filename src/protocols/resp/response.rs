//! Reply envelope and its wire encoding.

use bytes::{Bytes, BytesMut};

/// Introspection reply: a two-element array naming an empty `config`.
const CONFIG_REPLY: &[u8] = b"*2\r\n$6\r\nconfig\r\n$0\r\n\r\n";

/// Result of executing one command, before framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Acknowledgment: +OK\r\n
    Status,
    /// Error: -Error <message>\r\n
    Error(String),
    /// Bulk string: $<len>\r\n<data>\r\n
    Data(Bytes),
    /// Fixed reply to the `cmd` probe
    Config,
}

impl Response {
    /// Create an error response
    pub fn error<S: Into<String>>(message: S) -> Response {
        Response::Error(message.into())
    }

    /// Create a bulk string response
    pub fn data<B: Into<Bytes>>(data: B) -> Response {
        Response::Data(data.into())
    }

    /// Encode a response to bytes
    #[cfg(test)]
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Append the encoded response to an existing buffer
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Response::Status => {
                buf.extend_from_slice(b"+OK\r\n");
            }
            Response::Error(message) => {
                buf.extend_from_slice(b"-Error ");
                buf.extend_from_slice(message.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            Response::Data(data) => {
                buf.extend_from_slice(b"$");
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
                buf.extend_from_slice(data);
                buf.extend_from_slice(b"\r\n");
            }
            Response::Config => {
                buf.extend_from_slice(CONFIG_REPLY);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_status() {
        assert_eq!(&Response::Status.encode()[..], b"+OK\r\n");
    }

    #[test]
    fn test_encode_error() {
        let response = Response::error("input < 3");
        assert_eq!(&response.encode()[..], b"-Error input < 3\r\n");
    }

    #[test]
    fn test_encode_data() {
        let response = Response::data(Bytes::from_static(b"bar"));
        assert_eq!(&response.encode()[..], b"$3\r\nbar\r\n");
    }

    #[test]
    fn test_encode_empty_data() {
        let response = Response::data(Bytes::new());
        assert_eq!(&response.encode()[..], b"$0\r\n\r\n");
    }

    #[test]
    fn test_encode_config() {
        assert_eq!(
            &Response::Config.encode()[..],
            b"*2\r\n$6\r\nconfig\r\n$0\r\n\r\n"
        );
    }

    #[test]
    fn test_encode_into_appends() {
        let mut buf = BytesMut::from(&b"+OK\r\n"[..]);
        Response::data("x").encode_into(&mut buf);
        assert_eq!(&buf[..], b"+OK\r\n$1\r\nx\r\n");
    }
}
