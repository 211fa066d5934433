//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! Each worker owns a listener bound with SO_REUSEPORT, so the kernel
//! spreads new connections across workers and no connection state is
//! shared between threads. Only the store is shared.

use crate::config::Config;
use crate::runtime::connection::{ConnState, Connection, ConnectionRegistry, ReadOutcome};
use crate::storage::Store;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Run the mio-based server.
pub fn run(config: Config, store: Arc<dyn Store>) -> io::Result<()> {
    let num_workers = config.worker_count();
    let addr = config.event_listen;

    info!(workers = num_workers, addr = %addr, "Starting mio runtime");

    let mut handles = Vec::with_capacity(num_workers);

    for worker_id in 0..num_workers {
        // Bind here so address errors surface before any worker starts
        let listener = create_listener_with_reuseport(addr)?;
        handles.push(spawn_worker(
            worker_id,
            listener,
            config.clone(),
            Arc::clone(&store),
        )?);
    }

    // Wait for all workers
    for handle in handles {
        let _ = handle.join();
    }

    Ok(())
}

/// Start one worker thread serving `listener`.
pub(crate) fn spawn_worker(
    worker_id: usize,
    listener: std::net::TcpListener,
    config: Config,
    store: Arc<dyn Store>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("worker-{worker_id}"))
        .spawn(move || {
            if let Err(e) = worker_loop(worker_id, listener, &config, store) {
                error!(worker = worker_id, error = %e, "Worker failed");
            }
        })
}

fn worker_loop(
    worker_id: usize,
    listener: std::net::TcpListener,
    config: &Config,
    store: Arc<dyn Store>,
) -> io::Result<()> {
    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(config.batch_size);

    listener.set_nonblocking(true)?;
    let mut listener = TcpListener::from_std(listener);
    poll.registry()
        .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

    let mut connections = ConnectionRegistry::new(config.max_connections);
    // Landing area for every read on this worker
    let mut scratch = vec![0u8; config.read_buffer_cap.max(1)];

    info!(
        worker = worker_id,
        max_connections = config.max_connections,
        read_buffer_cap = scratch.len(),
        "Worker started"
    );

    loop {
        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e);
        }

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => {
                    accept_connections(&listener, &poll, &mut connections, worker_id);
                }
                Token(conn_id) => {
                    match handle_connection_event(
                        conn_id,
                        &poll,
                        &mut connections,
                        &*store,
                        &mut scratch,
                    ) {
                        Ok(true) => {}
                        Ok(false) => close_connection(&poll, &mut connections, conn_id),
                        Err(e) => {
                            debug!(conn_id, error = %e, "Connection error");
                            close_connection(&poll, &mut connections, conn_id);
                        }
                    }
                }
            }
        }
    }
}

fn accept_connections(
    listener: &TcpListener,
    poll: &Poll,
    connections: &mut ConnectionRegistry,
    worker_id: usize,
) {
    loop {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                if let Some(conn_id) = admit(poll, connections, Connection::new(stream)) {
                    debug!(
                        worker = worker_id,
                        conn_id,
                        peer = %peer_addr,
                        "Accepted connection"
                    );
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => {
                error!("Accept error: {}", e);
                break;
            }
        }
    }
}

/// Track and register a new connection. Returns `None` if it was dropped.
fn admit(poll: &Poll, connections: &mut ConnectionRegistry, conn: Connection) -> Option<usize> {
    let Some(conn_id) = connections.insert(conn) else {
        warn!("Connection limit reached");
        return None;
    };

    // Re-borrow after insert
    let conn = connections.get_mut(conn_id)?;
    if let Err(e) = poll
        .registry()
        .register(&mut conn.stream, Token(conn_id), conn.interest)
    {
        warn!(conn_id, error = %e, "Failed to register connection");
        connections.remove(conn_id);
        return None;
    }
    Some(conn_id)
}

/// Returns `false` when the connection is finished and should be closed.
fn handle_connection_event(
    conn_id: usize,
    poll: &Poll,
    connections: &mut ConnectionRegistry,
    store: &dyn Store,
    scratch: &mut [u8],
) -> io::Result<bool> {
    let conn = match connections.get_mut(conn_id) {
        Some(conn) => conn,
        None => return Ok(true),
    };

    // Any readiness change is handled the same way
    drive(conn, store, scratch)?;
    update_interest(conn_id, conn, poll)
}

/// Alternate writes and reads until the socket blocks.
///
/// Replies are flushed before each read, and reading stops while any of them
/// is still queued. A client that never reads its replies stalls its own
/// input instead of growing the output buffer.
fn drive(conn: &mut Connection, store: &dyn Store, scratch: &mut [u8]) -> io::Result<()> {
    loop {
        if !conn.flush()? || conn.state == ConnState::Closing {
            return Ok(());
        }

        match conn.read_chunk(scratch)? {
            ReadOutcome::Data => conn.process(store),
            ReadOutcome::WouldBlock => return Ok(()),
            ReadOutcome::Eof => {
                if conn.pending_input() == 0 {
                    trace!("Connection closed by client");
                } else {
                    warn!(
                        pending = conn.pending_input(),
                        "Connection closed with incomplete frame"
                    );
                }
                conn.close();
            }
        }
    }
}

/// Register for writes while output is queued, for reads otherwise.
///
/// Returns `false` once a closing connection has nothing left to send.
fn update_interest(conn_id: usize, conn: &mut Connection, poll: &Poll) -> io::Result<bool> {
    let interest = if conn.pending_output() > 0 {
        Interest::WRITABLE
    } else if conn.state == ConnState::Closing {
        return Ok(false);
    } else {
        Interest::READABLE
    };

    if interest != conn.interest {
        poll.registry()
            .reregister(&mut conn.stream, Token(conn_id), interest)?;
        conn.interest = interest;
    }
    Ok(true)
}

fn close_connection(poll: &Poll, connections: &mut ConnectionRegistry, conn_id: usize) {
    if let Some(mut conn) = connections.remove(conn_id) {
        let _ = poll.registry().deregister(&mut conn.stream);
        debug!(conn_id, active = connections.len(), "Connection closed");
    }
}

/// Create a TCP listener with SO_REUSEPORT for kernel load balancing.
fn create_listener_with_reuseport(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_port(true)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}
