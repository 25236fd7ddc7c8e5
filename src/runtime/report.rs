//! Per-connection chunk reports.
//!
//! When a peer finishes sending, the sizes of the chunks collected from it
//! are written as a single line, lengths separated by spaces, in arrival
//! order. A connection that closed without sending produces an empty line.

use bytes::Bytes;
use std::fmt;
use std::io::{self, Write};
use std::net::SocketAddr;

/// Chunk sizes collected from one finished connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub conn_id: usize,
    pub peer: SocketAddr,
    pub chunk_lens: Vec<usize>,
}

impl Report {
    pub fn new(conn_id: usize, peer: SocketAddr, chunks: &[Bytes]) -> Self {
        Self {
            conn_id,
            peer,
            chunk_lens: chunks.iter().map(Bytes::len).collect(),
        }
    }

    pub fn total_bytes(&self) -> usize {
        self.chunk_lens.iter().sum()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, len) in self.chunk_lens.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{len}")?;
        }
        Ok(())
    }
}

/// Destination for finished reports.
pub trait ReportSink {
    fn emit(&mut self, report: &Report) -> io::Result<()>;
}

/// Writes each report as one line and flushes.
pub struct LineSink<W> {
    out: W,
}

impl<W: Write> LineSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl LineSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ReportSink for LineSink<W> {
    fn emit(&mut self, report: &Report) -> io::Result<()> {
        writeln!(self.out, "{report}")?;
        self.out.flush()
    }
}

/// Collects reports in memory.
impl ReportSink for Vec<Report> {
    fn emit(&mut self, report: &Report) -> io::Result<()> {
        self.push(report.clone());
        Ok(())
    }
}
