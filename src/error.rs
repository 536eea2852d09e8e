//! Error types for fleetmon.
//!
//! None of these are fatal to the process: transport errors make a session
//! reconnect, dump errors are logged by the renderer.

use std::io;

/// Failure of one remote stream.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport process could not be started
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    /// The transport process was started without a stdout pipe
    #[error("remote process has no stdout pipe")]
    MissingStdout,
    /// Reading the stream failed
    #[error("read error on remote stream: {0}")]
    Read(#[from] io::Error),
    /// The stream reached end of input
    #[error("remote stream closed")]
    Closed,
}

/// Failure while writing the CSV dump.
#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("dump file I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("dump CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<DumpError> for io::Error {
    fn from(err: DumpError) -> Self {
        match err {
            DumpError::Io(e) => e,
            DumpError::Csv(e) => io::Error::other(e),
        }
    }
}
