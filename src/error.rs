use std::path::PathBuf;

use thiserror::Error;

use crate::protocol::response::ErrPayload;

pub use color_eyre::eyre::eyre;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Server Error: {0}")]
    ServerError(#[from] ErrPayload),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Spool error at {path:?}: {source}")]
    SpoolError {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    #[error("Bad config error: {0}")]
    BadConfigError(String),

    #[error("Bad usage error: {0}")]
    BadUsageError(String),

    #[error("Invalid packet")]
    InvalidPacket,

    #[error("Unexpected end of payload")]
    UnexpectedEof,

    #[error("Packet sequence mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u8, actual: u8 },

    #[error("Zero date value in column `{0}`")]
    ZeroDateTime(String),

    #[error("Library bug: {0}")]
    LibraryBug(color_eyre::Report),
}

/// Coarse classification used by callers to decide whether a connection survives an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The byte stream is desynchronized. The connection must be torn down.
    Framing,
    /// The server answered with an ERR packet.
    Server,
    /// A local temp file could not be created or written.
    Resource,
    /// A value did not fit its declared representation.
    Decode,
    /// Invalid configuration.
    Config,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ServerError(_) => ErrorKind::Server,
            Error::IoError(_)
            | Error::InvalidPacket
            | Error::UnexpectedEof
            | Error::SequenceMismatch { .. } => ErrorKind::Framing,
            Error::SpoolError { .. } => ErrorKind::Resource,
            Error::ZeroDateTime(_) | Error::BadUsageError(_) | Error::LibraryBug(_) => {
                ErrorKind::Decode
            }
            Error::BadConfigError(_) => ErrorKind::Config,
        }
    }

    /// Framing errors leave the connection unusable.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Framing
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}

pub type Result<T> = std::result::Result<T, Error>;
