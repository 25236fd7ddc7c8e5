//! Non-blocking reads into the shared scratch buffer.
//!
//! A readiness notification says nothing about how many bytes are waiting,
//! and the poller is edge-triggered, so every notification is drained until
//! the socket reports it would block or that the stream has ended. Each
//! individual read is capped at the scratch capacity and becomes one chunk.

use crate::runtime::buffer::ScratchBuffer;
use crate::runtime::connection::Connection;
use std::io::{self, Read};
use tracing::trace;

/// Outcome of a single read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadResult {
    /// `n > 0` bytes landed in the scratch buffer.
    Data(usize),
    /// Nothing available right now; try again on the next notification.
    Pending,
    /// Peer closed its write side.
    EndOfStream,
}

/// How a drain pass stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drained {
    /// Socket is empty for now; connection stays open.
    Pending,
    /// Peer finished sending; connection should be finalized.
    EndOfStream,
}

/// Perform one read into the unfilled part of `scratch`.
///
/// Interrupted reads are retried.
pub fn read_once<R: Read>(stream: &mut R, scratch: &mut ScratchBuffer) -> io::Result<ReadResult> {
    loop {
        match stream.read(scratch.unfilled_mut()) {
            Ok(0) => return Ok(ReadResult::EndOfStream),
            Ok(n) => {
                scratch.advance(n);
                return Ok(ReadResult::Data(n));
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadResult::Pending),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Read everything currently available on `conn`, appending one chunk per read.
///
/// The scratch buffer is empty on entry and on every exit path. Chunks
/// appended before a fault are kept.
pub fn drain<R: Read>(
    conn_id: usize,
    conn: &mut Connection<R>,
    scratch: &mut ScratchBuffer,
) -> io::Result<Drained> {
    debug_assert!(scratch.is_empty(), "scratch buffer not drained");

    loop {
        let result = read_once(&mut conn.stream, scratch);
        match result {
            Ok(ReadResult::Data(n)) => {
                let chunk = scratch.take_chunk();
                conn.append(chunk);
                trace!(conn_id, bytes = n, chunks = conn.chunks().len(), "Chunk collected");
            }
            Ok(ReadResult::Pending) => return Ok(Drained::Pending),
            Ok(ReadResult::EndOfStream) => return Ok(Drained::EndOfStream),
            Err(e) => {
                scratch.clear();
                return Err(e);
            }
        }
    }
}

/// Whether a read fault means the peer is gone for good.
pub fn is_fatal(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::buffer::SCRATCH_CAPACITY;
    use crate::runtime::connection::ConnState;
    use std::collections::VecDeque;

    /// What the scripted socket does on the next read.
    enum Step {
        Data(Vec<u8>),
        Eof,
        Fail(io::ErrorKind),
    }

    /// In-memory socket that replays a script, then reports `WouldBlock`.
    struct Script(VecDeque<Step>);

    impl Script {
        fn new(steps: impl IntoIterator<Item = Step>) -> Self {
            Self(steps.into_iter().collect())
        }

        fn push(&mut self, step: Step) {
            self.0.push_back(step);
        }
    }

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                None => Err(io::ErrorKind::WouldBlock.into()),
                Some(Step::Eof) => Ok(0),
                Some(Step::Fail(kind)) => Err(kind.into()),
                Some(Step::Data(mut data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    if n < data.len() {
                        self.0.push_front(Step::Data(data.split_off(n)));
                    }
                    Ok(n)
                }
            }
        }
    }

    fn conn(steps: impl IntoIterator<Item = Step>) -> Connection<Script> {
        Connection::new(Script::new(steps), "127.0.0.1:40000".parse().unwrap())
    }

    #[test]
    fn test_read_once_outcomes() {
        let mut scratch = ScratchBuffer::default();
        let mut stream = Script::new([
            Step::Data(b"hi".to_vec()),
            Step::Fail(io::ErrorKind::Interrupted),
            Step::Data(b"!".to_vec()),
            Step::Eof,
        ]);

        assert_eq!(read_once(&mut stream, &mut scratch).unwrap(), ReadResult::Data(2));
        assert_eq!(scratch.take_chunk(), &b"hi"[..]);

        // Interrupted is retried within the same call
        assert_eq!(read_once(&mut stream, &mut scratch).unwrap(), ReadResult::Data(1));
        scratch.clear();

        assert_eq!(read_once(&mut stream, &mut scratch).unwrap(), ReadResult::EndOfStream);
        assert_eq!(read_once(&mut stream, &mut scratch).unwrap(), ReadResult::Pending);
        assert!(scratch.is_empty());
    }

    #[test]
    fn test_large_write_split_by_capacity() {
        let mut scratch = ScratchBuffer::default();
        let mut conn = conn([Step::Data(vec![7u8; 250])]);

        assert_eq!(drain(0, &mut conn, &mut scratch).unwrap(), Drained::Pending);
        assert_eq!(conn.chunk_lens(), vec![100, 100, 50]);
        assert!(conn.chunk_lens().iter().all(|&n| n <= SCRATCH_CAPACITY));
        assert!(scratch.is_empty());
    }

    #[test]
    fn test_chunks_preserve_arrival_order() {
        let mut scratch = ScratchBuffer::default();
        let mut conn = conn([Step::Data(b"first".to_vec())]);

        assert_eq!(drain(0, &mut conn, &mut scratch).unwrap(), Drained::Pending);
        assert_eq!(conn.state(), ConnState::Reading);

        // A later notification picks up where the previous one stopped
        conn.stream.push(Step::Data(b"second".to_vec()));
        conn.stream.push(Step::Data(b"third".to_vec()));
        conn.stream.push(Step::Eof);
        assert_eq!(drain(0, &mut conn, &mut scratch).unwrap(), Drained::EndOfStream);

        let joined: Vec<u8> = conn.chunks().iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(joined, b"firstsecondthird");
        assert_eq!(conn.chunk_lens(), vec![5, 6, 5]);
    }

    #[test]
    fn test_immediate_end_of_stream() {
        let mut scratch = ScratchBuffer::default();
        let mut conn = conn([Step::Eof]);

        assert_eq!(drain(0, &mut conn, &mut scratch).unwrap(), Drained::EndOfStream);
        assert!(conn.chunks().is_empty());
        assert_eq!(conn.state(), ConnState::Registered);
    }

    #[test]
    fn test_nothing_available() {
        let mut scratch = ScratchBuffer::default();
        let mut conn = conn([]);

        assert_eq!(drain(0, &mut conn, &mut scratch).unwrap(), Drained::Pending);
        assert!(conn.chunks().is_empty());
    }

    #[test]
    fn test_fault_keeps_collected_chunks() {
        let mut scratch = ScratchBuffer::default();
        let mut conn = conn([
            Step::Data(vec![1u8; 30]),
            Step::Fail(io::ErrorKind::Other),
        ]);

        let err = drain(0, &mut conn, &mut scratch).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert!(!is_fatal(&err));
        assert_eq!(conn.chunk_lens(), vec![30]);
        assert!(scratch.is_empty());

        // The connection can still be serviced afterwards
        conn.stream.push(Step::Data(vec![2u8; 10]));
        conn.stream.push(Step::Eof);
        assert_eq!(drain(0, &mut conn, &mut scratch).unwrap(), Drained::EndOfStream);
        assert_eq!(conn.chunk_lens(), vec![30, 10]);
    }

    #[test]
    fn test_shared_scratch_does_not_mix_connections() {
        let mut scratch = ScratchBuffer::default();
        let mut a = conn([Step::Data(vec![b'a'; 10]), Step::Data(vec![b'a'; 20]), Step::Eof]);
        let mut b = conn([Step::Data(vec![b'b'; 5]), Step::Eof]);

        drain(0, &mut a, &mut scratch).unwrap();
        drain(1, &mut b, &mut scratch).unwrap();

        assert_eq!(a.chunk_lens(), vec![10, 20]);
        assert_eq!(b.chunk_lens(), vec![5]);
        assert!(a.chunks().iter().all(|c| c.iter().all(|&x| x == b'a')));
        assert!(b.chunks().iter().all(|c| c.iter().all(|&x| x == b'b')));
    }

    #[test]
    fn test_fatal_kinds() {
        assert!(is_fatal(&io::ErrorKind::ConnectionReset.into()));
        assert!(is_fatal(&io::ErrorKind::BrokenPipe.into()));
        assert!(!is_fatal(&io::ErrorKind::TimedOut.into()));
    }
}
