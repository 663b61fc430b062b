//! Decode implicit-tiling subtree binaries.
//!
//! This crate provides pure synchronous decoding for the binary subtree
//! format of implicitly-tiled quadtree and octree tilesets: the envelope
//! and JSON descriptor, packed availability bitstreams, Morton and level
//! index arithmetic, and columnar per-tile metadata tables. All I/O and
//! buffer resolution lives in the companion `tiletree` crate.
//!
//! # Design principles
//!
//! - **Synchronous**: No async, no threading primitives
//! - **Zero-copy where it matters**: Bitstreams and columns hold
//!   `Arc<[u8]>` views into shared buffers
//! - **Strict**: Declared lengths are validated against the tree shape;
//!   malformed input is an error, never silently truncated

mod bitstream;
mod descriptor;
mod envelope;
mod error;
mod index;
mod metadata;

pub use bitstream::AvailabilityBitstream;
pub use descriptor::{
    AvailabilityHeader, AvailabilitySource, BufferHeader, BufferViewHeader, ContentAvailability,
    MetadataHeader, OffsetType, PropertyHeader, SubtreeDescriptor,
};
pub use envelope::{SUBTREE_MAGIC, SUBTREE_VERSION, SubtreeEnvelope, parse_envelope};
pub use error::{DecodeError, DecodeResult};
pub use index::{
    Subdivision, morton_decode_2d, morton_decode_3d, morton_encode_2d, morton_encode_3d,
};
pub use metadata::{
    ComponentType, MetadataClass, MetadataSchema, MetadataTable, PropertyBuffers,
    PropertyDefinition, PropertyKind, PropertyValue, ScalarValue,
};
