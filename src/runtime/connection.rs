//! Per-connection state for the event loop.
//!
//! Each connection owns its unconsumed input and its pending output. The
//! event loop feeds it bytes on readable events and drains it on writable
//! events; the RESP work in between is synchronous.

use crate::protocols::resp::{decode, ERROR_INPUT};
use crate::storage::Store;
use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use mio::Interest;
use slab::Slab;
use std::io::{self, Read, Write};
use tracing::warn;

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Reading requests and writing replies.
    Open,
    /// Draining the remaining replies, then closing.
    Closing,
}

/// Outcome of a single read from the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes were appended to the input buffer.
    Data,
    /// Socket would block; wait for the next readable event.
    WouldBlock,
    /// Peer closed its side.
    Eof,
}

/// A single client connection.
pub struct Connection {
    pub stream: TcpStream,
    /// Current connection state.
    pub state: ConnState,
    /// Interest the socket is currently registered with.
    pub interest: Interest,
    /// Received bytes not yet consumed by the decoder.
    read_buf: BytesMut,
    /// Encoded replies not yet written.
    write_buf: BytesMut,
}

impl Connection {
    /// Create a new open connection, registered for reads.
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            state: ConnState::Open,
            interest: Interest::READABLE,
            read_buf: BytesMut::new(),
            write_buf: BytesMut::new(),
        }
    }

    /// Perform one read of at most `scratch.len()` bytes.
    pub fn read_chunk(&mut self, scratch: &mut [u8]) -> io::Result<ReadOutcome> {
        loop {
            match self.stream.read(scratch) {
                Ok(0) => return Ok(ReadOutcome::Eof),
                Ok(n) => {
                    self.read_buf.extend_from_slice(&scratch[..n]);
                    return Ok(ReadOutcome::Data);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadOutcome::WouldBlock)
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Answer every complete request buffered so far.
    ///
    /// A malformed stream queues the error line and moves to `Closing`.
    pub fn process(&mut self, store: &dyn Store) {
        match decode(&self.read_buf, store, &mut self.write_buf) {
            Ok(consumed) => self.read_buf.advance(consumed),
            Err(e) => {
                warn!(error = %e, "RESP parse error, closing connection");
                self.write_buf.extend_from_slice(ERROR_INPUT);
                self.close();
            }
        }
    }

    /// Write as much pending output as the socket accepts.
    ///
    /// Returns `true` once nothing is left to write.
    pub fn flush(&mut self) -> io::Result<bool> {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => self.write_buf.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Bytes received but not yet part of a complete request.
    pub fn pending_input(&self) -> usize {
        self.read_buf.len()
    }

    /// Encoded replies the socket has not accepted yet.
    pub fn pending_output(&self) -> usize {
        self.write_buf.len()
    }

    /// Mark connection for closing.
    pub fn close(&mut self) {
        self.state = ConnState::Closing;
    }
}

/// Registry of active connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove operations.
pub struct ConnectionRegistry {
    connections: Slab<Connection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections.min(1024)),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn insert(&mut self, conn: Connection) -> Option<usize> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        Some(self.connections.insert(conn))
    }

    /// Get a mutable reference to a connection.
    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    /// Remove a connection from the registry.
    pub fn remove(&mut self, id: usize) -> Option<Connection> {
        self.connections.try_remove(id)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }
}
