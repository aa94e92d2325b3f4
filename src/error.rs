use std::fmt;

/// Crate-local error taxonomy. Caller-facing logical errors and resource
/// exhaustion are returned through this type; invariant violations are
/// assertions and panic instead (see module docs on `tree`).
#[derive(Debug)]
pub enum Error {
    DuplicateKey,
    KeyNotFound,
    BufferFull,
    ShortRead { expected: usize, actual: usize },
    ShortWrite { expected: usize, actual: usize },
    EndOfFile,
    InvalidNodeSize { node_size: u32 },
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DuplicateKey => write!(f, "key already exists"),
            Error::KeyNotFound => write!(f, "key not found"),
            Error::BufferFull => write!(f, "no free frames available in buffer pool"),
            Error::ShortRead { expected, actual } => {
                write!(f, "short read: expected {expected} bytes, got {actual}")
            }
            Error::ShortWrite { expected, actual } => {
                write!(f, "short write: expected {expected} bytes, wrote {actual}")
            }
            Error::EndOfFile => write!(f, "page offset is past end of file"),
            Error::InvalidNodeSize { node_size } => {
                write!(f, "node_size {node_size} does not fit in a page")
            }
            Error::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
