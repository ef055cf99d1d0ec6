use std::io;

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("stream not found: {0}")]
    NotFound(String),

    #[error("lock is held by another owner: {0}")]
    LockUnavailable(String),

    #[error("chunk {index} of stream {name} is missing from the backend")]
    MissingChunk { name: String, index: u64 },

    #[error("chunk {index} of stream {name} holds {actual} bytes, expected at least {expected}")]
    ShortChunk {
        name: String,
        index: u64,
        expected: usize,
        actual: usize,
    },

    #[error("metadata for stream {name} is corrupt: {reason}")]
    CorruptMetadata { name: String, reason: String },

    #[error("unexpected end of stream {name} at position {position}")]
    UnexpectedEof { name: String, position: u64 },

    #[error("slice [{offset}, +{length}) exceeds stream {name} of {available} bytes")]
    InvalidSlice {
        name: String,
        offset: u64,
        length: u64,
        available: u64,
    },

    #[error("writer for stream {0} is already closed")]
    WriterClosed(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error("backend failure: {0}")]
    Backend(#[source] BoxError),
}

impl Error {
    pub fn backend<E: Into<BoxError>>(err: E) -> Self {
        Error::Backend(err.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

#[cfg(feature = "etcd")]
impl From<etcd_client::Error> for Error {
    fn from(e: etcd_client::Error) -> Self {
        Error::Backend(Box::new(e))
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(inner) => inner,
            Error::NotFound(_) => io::Error::new(io::ErrorKind::NotFound, e),
            Error::UnexpectedEof { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, e),
            Error::LockUnavailable(_) => io::Error::new(io::ErrorKind::WouldBlock, e),
            Error::InvalidSlice { .. } | Error::InvalidConfig(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, e)
            }
            Error::MissingChunk { .. }
            | Error::ShortChunk { .. }
            | Error::CorruptMetadata { .. } => io::Error::new(io::ErrorKind::InvalidData, e),
            other => io::Error::other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_kinds() {
        let e: io::Error = Error::NotFound("a".into()).into();
        assert_eq!(e.kind(), io::ErrorKind::NotFound);

        let e: io::Error = Error::MissingChunk {
            name: "a".into(),
            index: 3,
        }
        .into();
        assert_eq!(e.kind(), io::ErrorKind::InvalidData);

        let inner = io::Error::new(io::ErrorKind::BrokenPipe, "gone");
        let e: io::Error = Error::Io(inner).into();
        assert_eq!(e.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_backend_error_keeps_source() {
        let e = Error::backend(io::Error::other("connection reset"));
        assert!(e.to_string().contains("connection reset"));
        assert!(std::error::Error::source(&e).is_some());
        assert!(!e.is_not_found());
    }
}
