//! Error types for the tiletree crate.

use std::fmt;

/// Result type for tiletree operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading and decoding subtrees.
///
/// `Clone` matters here: one fetch failure may be delivered to every
/// subtree waiting on the same shared buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The tileset configuration is unusable.
    Config {
        /// Context for where the error occurred.
        context: &'static str,
        /// Description of what was invalid.
        detail: String,
    },
    /// The subtree binary or its descriptor is malformed.
    Decode(tiletree_decode::DecodeError),
    /// An external buffer fetch failed.
    Fetch {
        /// The URI that failed.
        uri: String,
        /// The error message.
        message: String,
    },
    /// An external buffer fetch returned a non-success status code.
    HttpStatus {
        /// The URI that returned the error.
        uri: String,
        /// The HTTP status code.
        status: u16,
    },
    /// The resolver was cancelled before resolution completed.
    Cancelled,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config { context, detail } => {
                write!(f, "invalid {context}: {detail}")
            }
            Error::Decode(e) => write!(f, "decode error: {e}"),
            Error::Fetch { uri, message } => {
                write!(f, "fetch of {uri} failed: {message}")
            }
            Error::HttpStatus { uri, status } => {
                write!(f, "fetch of {uri} returned status {status}")
            }
            Error::Cancelled => write!(f, "resolution cancelled"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<tiletree_decode::DecodeError> for Error {
    fn from(e: tiletree_decode::DecodeError) -> Self {
        Error::Decode(e)
    }
}
