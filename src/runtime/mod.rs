//! Single-threaded readiness runtime.
//!
//! Components, leaf-first:
//! - `ScratchBuffer`: the one staging buffer every read goes through
//! - `ConnectionRegistry`: id -> connection state and collected chunks
//! - `reader`: drains a ready socket into owned chunks
//! - `report`: chunk-size report emitted when a peer finishes
//! - `Reactor`: mio poll loop tying accept, read and finalize together

mod buffer;
mod connection;
mod event_loop;
mod reader;
mod report;

pub(crate) use event_loop::Reactor;
pub(crate) use report::LineSink;

use crate::config::Config;
use tracing::error;

/// Bind the listener and run the reactor forever.
///
/// Only returns if the listener cannot be set up.
pub fn run(config: Config) -> std::io::Result<()> {
    let mut reactor = match Reactor::bind(config.listen, config.events, LineSink::stdout()) {
        Ok(reactor) => reactor,
        Err(e) => {
            error!(addr = %config.listen, error = %e, "Failed to set up listener");
            return Err(e);
        }
    };

    reactor.run()
}
