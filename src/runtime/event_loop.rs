//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking accept/read syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! Everything runs on one thread. The poll call is the only place the loop
//! blocks; accepting, draining and finalizing run to completion inside a
//! turn, which is what lets a single scratch buffer serve every connection.

use crate::runtime::buffer::ScratchBuffer;
use crate::runtime::connection::{Connection, ConnectionRegistry};
use crate::runtime::reader::{self, Drained};
use crate::runtime::report::{Report, ReportSink};
use mio::net::{TcpListener, TcpStream};
use mio::event::Source;
use mio::{Events, Interest, Poll, Registry, Token};
use std::io::{self, Read};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Listen backlog for the server socket.
const BACKLOG: i32 = 1024;

type Connections = ConnectionRegistry<TcpStream>;

/// Source of newly accepted connections.
pub trait Accept {
    fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
}

impl Accept for TcpListener {
    fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self)
    }
}

/// Why a connection is being finalized.
#[derive(Debug)]
enum Closure {
    /// Peer closed its write side; the chunk report is emitted.
    EndOfStream,
    /// Read failed in a way the connection cannot recover from.
    Fault(io::Error),
}

/// Single-threaded reactor collecting chunks from every accepted connection.
pub struct Reactor<S> {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    connections: Connections,
    scratch: ScratchBuffer,
    sink: S,
}

impl<S: ReportSink> Reactor<S> {
    /// Bind the listener and register it for pending connections.
    pub fn bind(addr: SocketAddr, events: usize, sink: S) -> io::Result<Self> {
        let poll = Poll::new()?;
        let mut listener = TcpListener::from_std(create_listener(addr)?);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(events),
            listener,
            connections: ConnectionRegistry::new(),
            scratch: ScratchBuffer::default(),
            sink,
        })
    }

    /// Address the listener is actually bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of connections currently registered.
    #[allow(dead_code)] // Introspection for callers embedding the reactor
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    #[allow(dead_code)] // Introspection for callers embedding the reactor
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Drive the loop forever.
    pub fn run(&mut self) -> ! {
        info!(
            addr = ?self.local_addr().ok(),
            scratch = self.scratch.capacity(),
            "Reactor started"
        );

        loop {
            self.turn(None);
        }
    }

    /// Wait for readiness once and dispatch the resulting batch.
    ///
    /// Returns the number of events handled. Poll faults are logged and
    /// reported as an empty turn.
    pub fn turn(&mut self, timeout: Option<Duration>) -> usize {
        let Self {
            poll,
            events,
            listener,
            connections,
            scratch,
            sink,
        } = self;

        // Poll clears the previous batch, so every event is seen exactly once
        if let Err(e) = poll.poll(events, timeout) {
            if e.kind() == io::ErrorKind::Interrupted {
                trace!("Poll interrupted");
            } else {
                error!(error = %e, "Poll failed");
            }
            return 0;
        }

        let mut handled = 0;
        for event in events.iter() {
            handled += 1;
            match event.token() {
                LISTENER_TOKEN => {
                    accept_connections(listener, poll.registry(), connections);
                }
                Token(conn_id) => {
                    if event.is_readable() || event.is_read_closed() || event.is_error() {
                        handle_readable(conn_id, poll.registry(), connections, scratch, sink);
                    }
                }
            }
        }
        handled
    }
}

/// Accept until the listener would block, registering each new socket for reads.
///
/// A hard accept fault ends the round early. The listener is re-armed so the
/// connections still queued behind it raise a fresh notification.
fn accept_connections<L: Accept + Source>(
    listener: &mut L,
    registry: &Registry,
    connections: &mut Connections,
) {
    loop {
        match listener.accept() {
            Ok((mut stream, peer)) => {
                // Register under the id the insert below will hand out
                let conn_id = connections.vacant_id();
                if let Err(e) = registry.register(&mut stream, Token(conn_id), Interest::READABLE) {
                    warn!(conn_id, peer = %peer, error = %e, "Failed to register connection");
                    continue;
                }

                let inserted = connections.insert(Connection::new(stream, peer));
                debug_assert_eq!(inserted, conn_id);

                debug!(conn_id, peer = %peer, "Accepted connection");
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if is_transient_accept(&e) => {
                warn!(error = %e, "Accept failed, retrying");
            }
            Err(e) => {
                error!(error = %e, "Accept error");
                rearm(registry, listener, LISTENER_TOKEN);
                break;
            }
        }
    }
}

/// Accept faults caused by a single peer; the backlog behind it is still usable.
fn is_transient_accept(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}

fn handle_readable<T: Read + Source, S: ReportSink>(
    conn_id: usize,
    registry: &Registry,
    connections: &mut ConnectionRegistry<T>,
    scratch: &mut ScratchBuffer,
    sink: &mut S,
) {
    // Finalized earlier in this batch
    let Some(conn) = connections.get_mut(conn_id) else {
        return;
    };

    match reader::drain(conn_id, conn, scratch) {
        Ok(Drained::Pending) => {}
        Ok(Drained::EndOfStream) => {
            finalize(conn_id, Closure::EndOfStream, registry, connections, sink);
        }
        Err(e) if reader::is_fatal(&e) => {
            finalize(conn_id, Closure::Fault(e), registry, connections, sink);
        }
        Err(e) => {
            warn!(conn_id, error = %e, "Read failed, connection kept");
            // Bytes left behind the fault would otherwise wait for the next edge
            if let Some(conn) = connections.get_mut(conn_id) {
                rearm(registry, &mut conn.stream, Token(conn_id));
            }
        }
    }
}

/// Re-register read interest so a source that is still ready fires again.
fn rearm<T: Source + ?Sized>(registry: &Registry, source: &mut T, token: Token) {
    if let Err(e) = registry.reregister(source, token, Interest::READABLE) {
        warn!(token = token.0, error = %e, "Failed to re-arm readiness");
    }
}

/// Close a connection and drop it from the registry.
///
/// This is the only place a connection becomes closed. The socket is
/// deregistered and dropped; nothing is written back to the peer.
fn finalize<T: Source, S: ReportSink>(
    conn_id: usize,
    closure: Closure,
    registry: &Registry,
    connections: &mut ConnectionRegistry<T>,
    sink: &mut S,
) {
    let Some(mut conn) = connections.remove(conn_id) else {
        return;
    };

    let _ = registry.deregister(&mut conn.stream);
    let chunks = conn.close();
    let peer = conn.peer;
    drop(conn);

    match closure {
        Closure::EndOfStream => {
            let report = Report::new(conn_id, peer, &chunks);
            info!(
                conn_id,
                peer = %peer,
                chunks = report.chunk_lens.len(),
                bytes = report.total_bytes(),
                "Stream complete"
            );
            if let Err(e) = sink.emit(&report) {
                warn!(conn_id, error = %e, "Failed to emit report");
            }
        }
        Closure::Fault(e) => {
            let lens: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
            warn!(conn_id, peer = %peer, error = %e, chunks = ?lens, "Connection dropped after read fault");
        }
    }

    debug!(conn_id, "Connection closed");
}

/// Create a non-blocking TCP listener with address reuse enabled.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}
