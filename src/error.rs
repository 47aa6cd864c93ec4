use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub(crate) type AnyStdError = Box<dyn StdError + Send + Sync + 'static>;

/// Convenience alias used throughout the crate
pub type Result<T, E = UploadError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
/// The Standard Error Type
pub enum UploadError {
    /// Given if the chunk size used for copying files is zero
    #[error("Invalid chunk size {0}, must be positive")]
    InvalidChunkSize(usize),
    /// Given if a file path could not be made absolute
    #[error("Could not resolve absolute path for {path:?}")]
    AbsolutePath {
        /// The path as supplied
        path: PathBuf,
        /// The underlying io error
        source: io::Error,
    },
    /// Given if a file path has no final component to use as a filename
    #[error("Path {0:?} has no file name")]
    NoFileName(PathBuf),
    /// Given if every deduplicated filename candidate is already taken
    #[error("Too many files named `{0}` in one batch")]
    NameCollision(String),
    /// Given if a file could not be opened during the size probe
    #[error("Could not open {path:?}")]
    Open {
        /// The absolute path of the file
        path: PathBuf,
        /// The underlying io error
        source: io::Error,
    },
    /// Given if a file's metadata could not be read during the size probe
    #[error("Could not stat {path:?}")]
    Metadata {
        /// The absolute path of the file
        path: PathBuf,
        /// The underlying io error
        source: io::Error,
    },
    /// Given if a part is framed after the closing boundary has been written
    #[error("Multipart encoder has already written the closing boundary")]
    EncoderFinished,
    /// Given if a file produced a different number of bytes than it reported when probed
    #[error("File size of {path:?} changed (expected {expected} bytes, found {actual})")]
    SizeMismatch {
        /// The absolute path of the file
        path: PathBuf,
        /// The size recorded during the probe
        expected: u64,
        /// The number of bytes actually available
        actual: u64,
    },
    /// Given if reading file content fails while streaming
    #[error("Could not read {path:?}")]
    Read {
        /// The absolute path of the file
        path: PathBuf,
        /// The underlying io error
        source: io::Error,
    },
    /// Given if the body reader went away before the producer finished writing
    #[error("Write on closed pipe")]
    PipeClosed,
    /// Given if the producer task panicked or was aborted
    #[error(transparent)]
    Producer(#[from] tokio::task::JoinError),
    /// Given if the outbound request could not be built
    #[error(transparent)]
    Request(#[from] http::Error),
    /// Given if the transport failed to complete the request
    #[error(transparent)]
    Transport(AnyStdError),
}

impl UploadError {
    pub(crate) fn transport<E: Into<AnyStdError>>(err: E) -> Self {
        UploadError::Transport(err.into())
    }

    /// Returns true for errors raised before any network I/O was attempted
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            UploadError::InvalidChunkSize(_)
                | UploadError::AbsolutePath { .. }
                | UploadError::NoFileName(_)
                | UploadError::NameCollision(_)
        )
    }
}
