//! Library-wide error and result types.

use std::fmt;
use std::io;

/// Result alias used throughout retrokit.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors the library can produce.
///
/// Error messages are kept intentionally terse; callers that need richer
/// context should wrap `Error` in their own type.
///
/// [`Error::BadMagic`] deserves special mention: it means "this is not the
/// format you asked for", not "this file is corrupt". Callers probing a file
/// against several formats should try the next parser on `BadMagic` and treat
/// the other variants as terminal for that input.
#[derive(Debug)]
pub enum Error {
    /// A magic/signature field did not match the expected value.
    BadMagic,
    /// The signature matched but the format version is not supported by this
    /// parser (likely a newer or older format revision).
    UnsupportedVersion(i64),
    /// The stream ended before all expected bytes could be read.
    UnexpectedEof,
    /// An offset or count field would read outside the valid region.
    InvalidRange,
    /// A structural constraint was violated (message describes which one).
    Structure(&'static str),
    /// An underlying I/O operation failed.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadMagic => write!(f, "bad magic value"),
            Error::UnsupportedVersion(v) => write!(f, "unsupported version: {v}"),
            Error::UnexpectedEof => write!(f, "unexpected end of file"),
            Error::InvalidRange => write!(f, "invalid offset or size"),
            Error::Structure(s) => write!(f, "structure error: {s}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let Error::Io(e) = self {
            Some(e)
        } else {
            None
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
