//! Task-per-connection front end.
//!
//! Every accepted socket gets its own tokio task. The task awaits bytes,
//! runs the shared RESP decoder over everything buffered, and writes the
//! replies back in one go.

use crate::protocols::resp::{decode, ProtocolError, ERROR_INPUT};
use crate::storage::Store;
use bytes::{Buf, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, trace, warn};

/// Read buffer size
const BUFFER_SIZE: usize = 16 * 1024;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server instance
pub struct Server {
    addr: SocketAddr,
    store: Arc<dyn Store>,
    read_buffer_cap: usize,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Create a new server instance
    pub fn new(
        addr: SocketAddr,
        store: Arc<dyn Store>,
        max_connections: usize,
        read_buffer_cap: usize,
    ) -> Self {
        Server {
            addr,
            store,
            read_buffer_cap,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
        }
    }

    /// Bind and begin accepting connections
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener).await
    }

    /// Accept connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        info!(address = %listener.local_addr()?, "Task server listening");

        loop {
            // Wait for a connection slot
            let permit = self.connection_limit.clone().acquire_owned().await?;

            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "New connection");

                    let store = Arc::clone(&self.store);
                    let read_buffer_cap = self.read_buffer_cap;

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, store, read_buffer_cap).await {
                            debug!(peer = %addr, error = %e, "Connection error");
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Buffered side of one client connection.
struct Connection<S> {
    stream: S,
    /// Most bytes taken from the socket in one read
    read_buffer_cap: usize,
    /// Received bytes not yet consumed by the decoder
    buffer: BytesMut,
    /// Encoded replies waiting to be flushed
    output: BytesMut,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn new(stream: S, read_buffer_cap: usize) -> Self {
        Connection {
            stream,
            read_buffer_cap: read_buffer_cap.max(1),
            buffer: BytesMut::with_capacity(BUFFER_SIZE),
            output: BytesMut::with_capacity(BUFFER_SIZE),
        }
    }

    /// Wait for more bytes. Returns `false` once the peer has closed.
    async fn read_more(&mut self) -> io::Result<bool> {
        if self.buffer.capacity() - self.buffer.len() < BUFFER_SIZE / 4 {
            self.buffer.reserve(BUFFER_SIZE);
        }
        let n = (&mut self.stream)
            .take(self.read_buffer_cap as u64)
            .read_buf(&mut self.buffer)
            .await?;
        Ok(n > 0)
    }

    /// Flush every pending reply.
    async fn write_replies(&mut self) -> io::Result<()> {
        if self.output.is_empty() {
            return Ok(());
        }
        self.stream.write_all(&self.output).await?;
        self.stream.flush().await?;
        self.output.clear();
        Ok(())
    }

    /// Decode everything buffered, dropping the consumed bytes.
    fn process(&mut self, store: &dyn Store) -> Result<(), ProtocolError> {
        let consumed = decode(&self.buffer, store, &mut self.output)?;
        self.buffer.advance(consumed);
        Ok(())
    }
}

/// Serve a single client until it disconnects or sends a malformed frame.
pub async fn handle_connection<S>(
    stream: S,
    store: Arc<dyn Store>,
    read_buffer_cap: usize,
) -> Result<(), BoxError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = Connection::new(stream, read_buffer_cap);

    loop {
        if !conn.read_more().await? {
            if conn.buffer.is_empty() {
                trace!("Connection closed by client");
            } else {
                warn!(
                    pending = conn.buffer.len(),
                    "Connection closed with incomplete frame"
                );
            }
            return Ok(());
        }

        if let Err(e) = conn.process(store.as_ref()) {
            warn!(error = %e, "RESP parse error, closing connection");
            conn.output.extend_from_slice(ERROR_INPUT);
            conn.write_replies().await?;
            return Err(e.into());
        }

        conn.write_replies().await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, Value};
    use tokio::net::TcpStream;
    use tokio_test::io::Builder;

    const SET_FOO: &[u8] = b"*3\r\n$3\r\nset\r\n$3\r\nfoo\r\n$3\r\nbar\r\n";
    const GET_FOO: &[u8] = b"*2\r\n$3\r\nget\r\n$3\r\nfoo\r\n";
    const GET_NO_KEY: &[u8] = b"*1\r\n$3\r\nget\r\n";

    fn store() -> Arc<dyn Store> {
        MemoryStore::new()
    }

    #[tokio::test]
    async fn test_request_response() {
        let mock = Builder::new()
            .read(SET_FOO)
            .write(b"+OK\r\n")
            .read(GET_FOO)
            .write(b"$3\r\nbar\r\n")
            .build();

        handle_connection(mock, store(), 1024).await.unwrap();
    }

    #[tokio::test]
    async fn test_pipelined_replies_flush_together() {
        let pipelined = [SET_FOO, GET_FOO, GET_FOO].concat();
        let mock = Builder::new()
            .read(&pipelined)
            .write(b"+OK\r\n$3\r\nbar\r\n$3\r\nbar\r\n")
            .build();

        handle_connection(mock, store(), 1024).await.unwrap();
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let mock = Builder::new()
            .read(&SET_FOO[..7])
            .read(&SET_FOO[7..20])
            .read(&SET_FOO[20..])
            .write(b"+OK\r\n")
            .build();

        handle_connection(mock, store(), 1024).await.unwrap();
    }

    #[tokio::test]
    async fn test_arity_error_keeps_connection_open() {
        let mock = Builder::new()
            .read(GET_NO_KEY)
            .write(b"-Error input < 2\r\n")
            .read(SET_FOO)
            .write(b"+OK\r\n")
            .build();

        handle_connection(mock, store(), 1024).await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_frame_closes_connection() {
        let input = [SET_FOO, &b"*-1\r\n"[..]].concat();
        let mock = Builder::new()
            .read(&input)
            .write(b"+OK\r\n-Error input\r\n")
            .build();

        let result = handle_connection(mock, store(), 1024).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_large_frame_in_many_reads() {
        let value = vec![b'v'; 9 * 1024 * 1024];
        let mut frame =
            format!("*3\r\n$3\r\nset\r\n$1\r\nk\r\n${}\r\n", value.len()).into_bytes();
        frame.extend_from_slice(&value);
        frame.extend_from_slice(b"\r\n");

        let mut builder = Builder::new();
        for piece in frame.chunks(64 * 1024) {
            builder.read(piece);
        }
        let mock = builder.write(b"+OK\r\n").build();

        let store = store();
        handle_connection(mock, Arc::clone(&store), 8 * 1024 * 1024)
            .await
            .unwrap();
        assert_eq!(store.get("k"), Ok(Value::Str("v".repeat(9 * 1024 * 1024))));
    }

    #[tokio::test]
    async fn test_reads_are_capped() {
        let mut conn = Connection::new(Builder::new().read(&[b'x'; 64]).build(), 16);
        assert!(conn.read_more().await.unwrap());
        assert_eq!(conn.buffer.len(), 16);
        while conn.buffer.len() < 64 {
            assert!(conn.read_more().await.unwrap());
        }
        assert!(!conn.read_more().await.unwrap());
    }

    #[tokio::test]
    async fn test_store_shared_between_connections() {
        let store = store();

        let writer = Builder::new().read(SET_FOO).write(b"+OK\r\n").build();
        handle_connection(writer, Arc::clone(&store), 1024)
            .await
            .unwrap();

        let reader = Builder::new().read(GET_FOO).write(b"$3\r\nbar\r\n").build();
        handle_connection(reader, store, 1024).await.unwrap();
    }

    #[tokio::test]
    async fn test_server_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Server::new(addr, store(), 16, 1024);
        tokio::spawn(async move { server.serve(listener).await });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(&[SET_FOO, GET_FOO].concat())
            .await
            .unwrap();

        let expected = b"+OK\r\n$3\r\nbar\r\n";
        let mut reply = vec![0u8; expected.len()];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply[..], expected);
    }
}
