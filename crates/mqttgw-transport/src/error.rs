//! Error types for the transport boundary.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport binary not found: {0}")]
    NotFound(String),

    #[error("failed to launch {bin}: {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("subscriber session has no output stream")]
    MissingOutput,

    #[error("publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to signal process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),
}
