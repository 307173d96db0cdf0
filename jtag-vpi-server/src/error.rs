use std::io;

/// Reasons a connection is torn down. Transient I/O never shows up here.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Client closed the connection")]
    Closed,
    #[error("Client requested stop")]
    Stopped,
}
