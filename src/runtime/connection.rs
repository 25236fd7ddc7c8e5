//! Connection state machine and registry.
//!
//! Each connection owns its socket and the chunks collected from it so far.
//! The registry is keyed by the same id that is handed to the poller as the
//! readiness token, so an event can be routed straight to its connection.

#![allow(dead_code)] // Lookup and inspection helpers serve the reactor tests

use bytes::Bytes;
use slab::Slab;
use std::net::SocketAddr;

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Accepted and registered for readability, nothing received yet.
    Registered,
    /// At least one chunk collected; more may follow.
    Reading,
    /// Terminal. No further chunks are accepted.
    Closed,
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection<S> {
    /// Socket for the connection.
    pub stream: S,
    /// Remote address, reported alongside the chunk sizes.
    pub peer: SocketAddr,
    /// Chunks in arrival order.
    chunks: Vec<Bytes>,
    state: ConnState,
}

impl<S> Connection<S> {
    /// Create a freshly accepted connection with no chunks.
    pub fn new(stream: S, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            chunks: Vec::new(),
            state: ConnState::Registered,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }

    /// Byte length of every chunk, in arrival order.
    pub fn chunk_lens(&self) -> Vec<usize> {
        self.chunks.iter().map(Bytes::len).collect()
    }

    /// Append a chunk. Returns `false` and drops the chunk once closed.
    pub fn append(&mut self, chunk: Bytes) -> bool {
        if self.state == ConnState::Closed {
            return false;
        }
        self.chunks.push(chunk);
        self.state = ConnState::Reading;
        true
    }

    /// Mark the connection closed and hand back everything it collected.
    pub fn close(&mut self) -> Vec<Bytes> {
        self.state = ConnState::Closed;
        std::mem::take(&mut self.chunks)
    }
}

/// Registry of active connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove operations. There is no
/// capacity limit and no eviction: an idle connection stays until its
/// peer closes.
#[derive(Debug)]
pub struct ConnectionRegistry<S> {
    connections: Slab<Connection<S>>,
}

impl<S> ConnectionRegistry<S> {
    pub fn new() -> Self {
        Self {
            connections: Slab::new(),
        }
    }

    /// Id the next [`insert`](Self::insert) will return.
    pub fn vacant_id(&self) -> usize {
        self.connections.vacant_key()
    }

    /// Insert a new connection, returning its id.
    pub fn insert(&mut self, conn: Connection<S>) -> usize {
        self.connections.insert(conn)
    }

    pub fn get(&self, id: usize) -> Option<&Connection<S>> {
        self.connections.get(id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection<S>> {
        self.connections.get_mut(id)
    }

    /// Remove a connection from the registry.
    pub fn remove(&mut self, id: usize) -> Option<Connection<S>> {
        self.connections.try_remove(id)
    }

    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Iterate over all connections.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Connection<S>)> {
        self.connections.iter()
    }
}

impl<S> Default for ConnectionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}
