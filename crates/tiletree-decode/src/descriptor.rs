//! JSON descriptor types for the subtree envelope.
//!
//! These mirror the wire schema exactly; semantic validation (lengths
//! against the tree shape, ranges against buffers) happens when the
//! descriptor is turned into bitstreams and tables, not here.

use serde::Deserialize;

use crate::error::{DecodeError, DecodeResult};

/// The parsed JSON descriptor of a subtree binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SubtreeDescriptor {
    /// Backing byte buffers. A buffer without a `uri` is the envelope's
    /// internal binary chunk; at most one such buffer may exist.
    #[serde(default)]
    pub buffers: Vec<BufferHeader>,
    /// Contiguous slices into `buffers`.
    #[serde(default)]
    pub buffer_views: Vec<BufferViewHeader>,
    /// Availability of tiles within the subtree.
    pub tile_availability: AvailabilityHeader,
    /// Availability per content slot. Absent means no tile in this
    /// subtree carries content.
    #[serde(default)]
    pub content_availability: ContentAvailability,
    /// Availability of the child subtrees hanging off the deepest level.
    pub child_subtree_availability: AvailabilityHeader,
    /// Optional per-tile property table.
    #[serde(default)]
    pub metadata: Option<MetadataHeader>,
}

impl SubtreeDescriptor {
    /// Parse a descriptor from its JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Descriptor`] if the bytes are not valid
    /// JSON for this schema.
    pub fn from_json(bytes: &[u8]) -> DecodeResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Descriptor {
            message: e.to_string(),
        })
    }

    /// Index of the internal buffer (no `uri`), if any.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::InvalidDescriptor`] if more than one
    /// buffer claims to be internal.
    pub fn internal_buffer_index(&self) -> DecodeResult<Option<usize>> {
        let mut found = None;
        for (i, buffer) in self.buffers.iter().enumerate() {
            if buffer.uri.is_none() {
                if let Some(first) = found {
                    return Err(DecodeError::InvalidDescriptor {
                        context: "buffers",
                        detail: format!("buffers {first} and {i} both lack a uri"),
                    });
                }
                found = Some(i);
            }
        }
        Ok(found)
    }
}

/// A backing byte buffer: either the internal binary chunk or an
/// external resource named by `uri`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BufferHeader {
    pub byte_length: u64,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// A contiguous slice into one buffer.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BufferViewHeader {
    pub buffer: usize,
    #[serde(default)]
    pub byte_offset: u64,
    pub byte_length: u64,
}

/// One availability declaration: either a constant that applies to
/// every position or a reference to a packed bitstream.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AvailabilityHeader {
    #[serde(default)]
    pub buffer_view: Option<usize>,
    #[serde(default)]
    pub constant: Option<u8>,
    /// Number of queryable bit positions this stream declares. Must
    /// match the value derived from the tree shape.
    pub length_bits: u64,
    /// Declared length of the backing bitstream, when it is padded
    /// beyond `length_bits`.
    #[serde(default)]
    pub bitstream_length_bits: Option<u64>,
}

impl AvailabilityHeader {
    /// Interpret the header as a constant or a bitstream reference.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::InvalidDescriptor`] if the header carries
    /// both forms, neither form, or a constant other than 0 or 1.
    pub fn source(&self, context: &'static str) -> DecodeResult<AvailabilitySource> {
        match (self.buffer_view, self.constant) {
            (Some(view), None) => Ok(AvailabilitySource::BufferView(view)),
            (None, Some(0)) => Ok(AvailabilitySource::Constant(false)),
            (None, Some(1)) => Ok(AvailabilitySource::Constant(true)),
            (None, Some(other)) => Err(DecodeError::InvalidDescriptor {
                context,
                detail: format!("constant must be 0 or 1, found {other}"),
            }),
            (Some(_), Some(_)) => Err(DecodeError::InvalidDescriptor {
                context,
                detail: "both constant and bufferView declared".to_owned(),
            }),
            (None, None) => Err(DecodeError::InvalidDescriptor {
                context,
                detail: "neither constant nor bufferView declared".to_owned(),
            }),
        }
    }
}

/// The resolved form of an [`AvailabilityHeader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilitySource {
    Constant(bool),
    BufferView(usize),
}

/// Content availability appears on the wire as a single object or an
/// array of objects, one per content slot.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ContentAvailability {
    Single(AvailabilityHeader),
    Multiple(Vec<AvailabilityHeader>),
}

impl ContentAvailability {
    /// View the declaration as a uniform slice of headers.
    #[must_use]
    pub fn slots(&self) -> &[AvailabilityHeader] {
        match self {
            Self::Single(header) => std::slice::from_ref(header),
            Self::Multiple(headers) => headers,
        }
    }
}

impl Default for ContentAvailability {
    fn default() -> Self {
        Self::Multiple(Vec::new())
    }
}

/// The per-tile property table declaration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MetadataHeader {
    /// Name of the schema class the rows conform to.
    pub class: String,
    /// Column declarations keyed by property name.
    pub properties: std::collections::HashMap<String, PropertyHeader>,
}

/// One metadata column: a values buffer view and, for variable-length
/// kinds, an offset buffer view.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PropertyHeader {
    pub buffer_view: usize,
    #[serde(default)]
    pub offset_buffer_view: Option<usize>,
    /// Integer width of the offsets; defaults to 32-bit.
    #[serde(default)]
    pub offset_type: Option<OffsetType>,
}

/// Width of entries in an offset buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OffsetType {
    Uint8,
    Uint16,
    #[default]
    Uint32,
    Uint64,
}

impl OffsetType {
    /// Size of one offset entry in bytes.
    #[must_use]
    pub fn byte_size(self) -> usize {
        match self {
            Self::Uint8 => 1,
            Self::Uint16 => 2,
            Self::Uint32 => 4,
            Self::Uint64 => 8,
        }
    }
}
