/// A quorumkv error. All variants carry a rendered message, since errors are
/// only ever logged or surfaced to the operator, never matched structurally
/// beyond the variant.
#[derive(Clone, PartialEq)]
pub enum Error {
    /// Invalid data, e.g. an undecodable datagram.
    InvalidData(String),
    /// Invalid user input or configuration.
    InvalidInput(String),
    /// An IO error, e.g. on the cluster socket. Fatal.
    IO(String),
    /// An internal error, i.e. a bug.
    Internal(String),
}

/// A quorumkv result.
pub type Result<T> = std::result::Result<T, Error>;

impl std::error::Error for Error {}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::InvalidData(s) => write!(f, "invalid data: {}", s),
            Error::InvalidInput(s) => write!(f, "invalid input: {}", s),
            Error::IO(s) => write!(f, "io error: {}", s),
            Error::Internal(s) => write!(f, "internal error: {}", s),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidData(err.to_string())
    }
}

impl From<log::ParseLevelError> for Error {
    fn from(err: log::ParseLevelError) -> Self {
        Error::InvalidInput(err.to_string())
    }
}

impl From<log::SetLoggerError> for Error {
    fn from(err: log::SetLoggerError) -> Self {
        Error::Internal(err.to_string())
    }
}

impl<T> From<crossbeam::channel::SendError<T>> for Error {
    fn from(err: crossbeam::channel::SendError<T>) -> Self {
        Error::Internal(err.to_string())
    }
}
