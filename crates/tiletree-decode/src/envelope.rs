//! Binary subtree envelope.
//!
//! A subtree file is a fixed 24-byte little-endian header followed by a
//! JSON descriptor chunk and an optional internal binary chunk:
//!
//! ```text
//! offset  size  field
//! 0       4     magic, the ASCII bytes "subt"
//! 4       4     version, u32, must be 1
//! 8       8     descriptor byte length, u64
//! 16      8     binary chunk byte length, u64
//! ```

use std::sync::Arc;

use crate::descriptor::SubtreeDescriptor;
use crate::error::{DecodeError, DecodeResult};

/// The four magic bytes at the start of every subtree binary.
pub const SUBTREE_MAGIC: [u8; 4] = *b"subt";

/// The only envelope version this decoder understands.
pub const SUBTREE_VERSION: u32 = 1;

const HEADER_LEN: usize = 24;

/// A parsed envelope: the descriptor plus the internal binary chunk.
#[derive(Debug, Clone)]
pub struct SubtreeEnvelope {
    pub descriptor: SubtreeDescriptor,
    /// The internal binary chunk. Empty when the envelope declares none.
    pub binary: Arc<[u8]>,
}

/// Parse a subtree binary into its descriptor and internal chunk.
///
/// Trailing bytes beyond the declared chunks are ignored, matching
/// producers that pad files to an alignment.
///
/// # Errors
///
/// Returns [`DecodeError::BadMagic`], [`DecodeError::UnsupportedVersion`],
/// [`DecodeError::Truncated`] if the buffer ends before the declared
/// chunks do, or [`DecodeError::Descriptor`] if the JSON chunk fails to
/// parse.
pub fn parse_envelope(bytes: &[u8]) -> DecodeResult<SubtreeEnvelope> {
    if bytes.len() < HEADER_LEN {
        return Err(DecodeError::Truncated {
            expected: HEADER_LEN,
            actual: bytes.len(),
        });
    }

    let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
    if magic != SUBTREE_MAGIC {
        return Err(DecodeError::BadMagic { found: magic });
    }

    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != SUBTREE_VERSION {
        return Err(DecodeError::UnsupportedVersion { version });
    }

    let descriptor_len = read_u64_le(bytes, 8);
    let binary_len = read_u64_le(bytes, 16);

    let descriptor_len = checked_len(descriptor_len, bytes.len())?;
    let binary_len = checked_len(binary_len, bytes.len())?;

    let total = HEADER_LEN
        .checked_add(descriptor_len)
        .and_then(|n| n.checked_add(binary_len))
        .ok_or(DecodeError::Truncated {
            expected: usize::MAX,
            actual: bytes.len(),
        })?;
    if bytes.len() < total {
        return Err(DecodeError::Truncated {
            expected: total,
            actual: bytes.len(),
        });
    }

    let descriptor_bytes = &bytes[HEADER_LEN..HEADER_LEN + descriptor_len];
    let descriptor = SubtreeDescriptor::from_json(descriptor_bytes)?;

    let binary_start = HEADER_LEN + descriptor_len;
    let binary: Arc<[u8]> = bytes[binary_start..binary_start + binary_len].into();

    Ok(SubtreeEnvelope { descriptor, binary })
}

fn read_u64_le(bytes: &[u8], at: usize) -> u64 {
    u64::from_le_bytes([
        bytes[at],
        bytes[at + 1],
        bytes[at + 2],
        bytes[at + 3],
        bytes[at + 4],
        bytes[at + 5],
        bytes[at + 6],
        bytes[at + 7],
    ])
}

/// Convert a declared u64 chunk length to usize, treating overflow as
/// truncation since no real buffer could satisfy it.
fn checked_len(declared: u64, available: usize) -> DecodeResult<usize> {
    usize::try_from(declared).map_err(|_| DecodeError::Truncated {
        expected: usize::MAX,
        actual: available,
    })
}
