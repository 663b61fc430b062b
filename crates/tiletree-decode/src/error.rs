//! Error types for decoding operations.

use std::fmt;

/// Errors that can occur while decoding a subtree binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The envelope does not start with the `subt` magic.
    BadMagic { found: [u8; 4] },
    /// The envelope declares a version this decoder does not understand.
    UnsupportedVersion { version: u32 },
    /// Input buffer ends before the declared data does.
    Truncated { expected: usize, actual: usize },
    /// The JSON descriptor failed to parse.
    Descriptor { message: String },
    /// The descriptor is structurally invalid.
    InvalidDescriptor {
        context: &'static str,
        detail: String,
    },
    /// A declared bitstream length does not match the value derived from
    /// the tree shape.
    LengthMismatch {
        context: &'static str,
        declared: u64,
        derived: u64,
    },
    /// A byte range falls outside the buffer it references.
    OutOfRange {
        context: &'static str,
        offset: u64,
        length: u64,
        available: u64,
    },
    /// A string property holds bytes that are not valid UTF-8.
    InvalidString { property: String, row: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic { found } => {
                write!(f, "bad magic: expected \"subt\", found {found:?}")
            }
            Self::UnsupportedVersion { version } => {
                write!(f, "unsupported subtree version {version}")
            }
            Self::Truncated { expected, actual } => {
                write!(f, "truncated input: expected {expected} bytes, got {actual}")
            }
            Self::Descriptor { message } => {
                write!(f, "failed to parse descriptor: {message}")
            }
            Self::InvalidDescriptor { context, detail } => {
                write!(f, "invalid descriptor in {context}: {detail}")
            }
            Self::LengthMismatch {
                context,
                declared,
                derived,
            } => {
                write!(
                    f,
                    "{context} declares {declared} bits but the tree shape requires {derived}"
                )
            }
            Self::OutOfRange {
                context,
                offset,
                length,
                available,
            } => {
                write!(
                    f,
                    "{context} range {offset}+{length} exceeds {available} available bytes"
                )
            }
            Self::InvalidString { property, row } => {
                write!(f, "property {property:?} row {row} is not valid UTF-8")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Result type for decoding operations.
pub type DecodeResult<T> = Result<T, DecodeError>;
