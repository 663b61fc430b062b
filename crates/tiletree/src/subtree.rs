//! Subtree construction and availability queries.
//!
//! [`Subtree::decode`] takes the raw subtree binary, resolves every
//! buffer it references (internal slices directly, external ones through
//! the [`BufferResolver`]) and produces an immutable, query-only value.
//! Construction either fully succeeds or fails with the first error; a
//! partially-resolved subtree is never observable.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tiletree_decode::{
    AvailabilityBitstream, AvailabilitySource, DecodeError, MetadataTable, PropertyBuffers,
    Subdivision, SubtreeDescriptor, parse_envelope,
};

use crate::config::TilesetConfig;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::resolver::{BufferKey, BufferResolver};

/// A fully-resolved subtree: three availability aspects plus optional
/// per-tile metadata.
///
/// All queries are O(1) reads on immutable data; a `Subtree` is freely
/// shared across threads.
#[derive(Debug, Clone)]
pub struct Subtree {
    subdivision: Subdivision,
    levels: u32,
    tile_availability: AvailabilityBitstream,
    content_availability: Vec<AvailabilityBitstream>,
    child_subtree_availability: AvailabilityBitstream,
    metadata_table: Option<MetadataTable>,
}

impl Subtree {
    /// Decode a subtree binary, fetching any external buffers through
    /// the resolver.
    ///
    /// All external fetches are issued concurrently and joined; the
    /// first failure wins and fails the whole construction. Buffers the
    /// descriptor declares but never references are not fetched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] for a malformed envelope, descriptor,
    /// or buffer layout, [`Error::Fetch`] / [`Error::HttpStatus`] for
    /// external buffer failures, and [`Error::Cancelled`] if the
    /// resolver was cancelled.
    pub async fn decode<F: Fetcher>(
        bytes: &[u8],
        config: &TilesetConfig,
        resolver: &BufferResolver<F>,
    ) -> Result<Self> {
        if resolver.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let envelope = parse_envelope(bytes)?;
        let descriptor = &envelope.descriptor;

        let levels = config.subtree_levels;
        let tile_bits = config.subdivision.node_count(levels);
        let child_bits = config.subdivision.child_subtree_count(levels);

        let tile_source = availability_source(
            &descriptor.tile_availability,
            "tileAvailability",
            tile_bits,
        )?;
        let child_source = availability_source(
            &descriptor.child_subtree_availability,
            "childSubtreeAvailability",
            child_bits,
        )?;
        let content_sources: Vec<AvailabilitySource> = descriptor
            .content_availability
            .slots()
            .iter()
            .map(|header| availability_source(header, "contentAvailability", tile_bits))
            .collect::<Result<_>>()?;

        let views = ViewTable::resolve(descriptor, &envelope.binary, resolver, |needed| {
            collect_needed_views(&[tile_source, child_source], &content_sources, descriptor, needed)
        })
        .await?;

        let tile_availability = views.bitstream(tile_source, tile_bits)?;
        let child_subtree_availability = views.bitstream(child_source, child_bits)?;
        let content_availability = if content_sources.is_empty() {
            // Declared no content: every configured slot reads as
            // all-unavailable, and at least one slot always exists.
            let slots = config.content_uri_templates.len().max(1);
            vec![AvailabilityBitstream::constant(false, tile_bits); slots]
        } else {
            content_sources
                .iter()
                .map(|&source| views.bitstream(source, tile_bits))
                .collect::<Result<_>>()?
        };

        let metadata_table = match &descriptor.metadata {
            None => None,
            Some(header) => Some(build_metadata_table(
                header,
                config,
                &tile_availability,
                &views,
            )?),
        };

        Ok(Self {
            subdivision: config.subdivision,
            levels,
            tile_availability,
            content_availability,
            child_subtree_availability,
            metadata_table,
        })
    }

    /// The subdivision scheme this subtree was decoded under.
    #[must_use]
    pub fn subdivision(&self) -> Subdivision {
        self.subdivision
    }

    /// Number of levels in this subtree.
    #[must_use]
    pub fn levels(&self) -> u32 {
        self.levels
    }

    /// Whether the tile at `linear_bit_index` exists.
    ///
    /// # Panics
    ///
    /// Panics if the index is outside the subtree's tile range.
    #[must_use]
    pub fn tile_is_available(&self, linear_bit_index: u64) -> bool {
        self.tile_availability.is_available(linear_bit_index)
    }

    /// Whether the tile at `linear_bit_index` carries content in slot
    /// `content_index`.
    ///
    /// # Panics
    ///
    /// Panics if `content_index` is not a declared slot or the bit
    /// index is out of range.
    #[must_use]
    pub fn content_is_available(&self, linear_bit_index: u64, content_index: usize) -> bool {
        assert!(
            content_index < self.content_availability.len(),
            "content index {content_index} out of range for {} slots",
            self.content_availability.len()
        );
        self.content_availability[content_index].is_available(linear_bit_index)
    }

    /// Number of content slots this subtree answers for.
    #[must_use]
    pub fn content_slot_count(&self) -> usize {
        self.content_availability.len()
    }

    /// Whether the child subtree at `child_bit_index` exists.
    ///
    /// Child indices are plain Morton codes at the subtree's deepest
    /// level and carry no level offset.
    ///
    /// # Panics
    ///
    /// Panics if the index is outside the child range.
    #[must_use]
    pub fn child_subtree_is_available(&self, child_bit_index: u64) -> bool {
        self.child_subtree_availability.is_available(child_bit_index)
    }

    /// First linear bit index of `level` within the subtree.
    #[must_use]
    pub fn level_offset(&self, level: u32) -> u64 {
        self.subdivision.level_offset(level)
    }

    /// Morton index of the parent of `morton_index` one level up.
    #[must_use]
    pub fn parent_morton_index(&self, morton_index: u64) -> u64 {
        self.subdivision.parent_morton_index(morton_index)
    }

    /// The tile availability stream.
    #[must_use]
    pub fn tile_availability(&self) -> &AvailabilityBitstream {
        &self.tile_availability
    }

    /// The per-tile metadata table, when the subtree carries one.
    #[must_use]
    pub fn metadata_table(&self) -> Option<&MetadataTable> {
        self.metadata_table.as_ref()
    }
}

/// Interpret and length-check one availability header.
fn availability_source(
    header: &tiletree_decode::AvailabilityHeader,
    context: &'static str,
    derived_bits: u64,
) -> Result<AvailabilitySource> {
    let source = header.source(context)?;
    if header.length_bits != derived_bits {
        return Err(Error::Decode(DecodeError::LengthMismatch {
            context,
            declared: header.length_bits,
            derived: derived_bits,
        }));
    }
    if let Some(bitstream_bits) = header.bitstream_length_bits
        && bitstream_bits < derived_bits
    {
        return Err(Error::Decode(DecodeError::LengthMismatch {
            context,
            declared: bitstream_bits,
            derived: derived_bits,
        }));
    }
    Ok(source)
}

/// Record every buffer view the decoded subtree will actually read.
fn collect_needed_views(
    availability: &[AvailabilitySource],
    content: &[AvailabilitySource],
    descriptor: &SubtreeDescriptor,
    needed: &mut BTreeSet<usize>,
) {
    for source in availability.iter().chain(content) {
        if let AvailabilitySource::BufferView(view) = *source {
            needed.insert(view);
        }
    }
    if let Some(metadata) = &descriptor.metadata {
        for property in metadata.properties.values() {
            needed.insert(property.buffer_view);
            if let Some(offsets) = property.offset_buffer_view {
                needed.insert(offsets);
            }
        }
    }
}

/// Resolved bytes for every referenced buffer view.
struct ViewTable {
    bytes: HashMap<usize, Arc<[u8]>>,
}

impl ViewTable {
    /// Resolve the views selected by `select`: internal views slice the
    /// envelope's binary chunk, external views are fetched through the
    /// resolver behind a single join.
    async fn resolve<F: Fetcher>(
        descriptor: &SubtreeDescriptor,
        binary: &Arc<[u8]>,
        resolver: &BufferResolver<F>,
        select: impl FnOnce(&mut BTreeSet<usize>),
    ) -> Result<Self> {
        let mut needed = BTreeSet::new();
        select(&mut needed);

        let internal_index = descriptor.internal_buffer_index()?;

        // Work out which buffers the needed views touch; everything
        // else is left untouched, external fetches included.
        let mut needed_buffers = BTreeSet::new();
        for &view_index in &needed {
            let view = view_header(descriptor, view_index)?;
            if view.buffer >= descriptor.buffers.len() {
                return Err(Error::Decode(DecodeError::InvalidDescriptor {
                    context: "bufferViews",
                    detail: format!(
                        "view {view_index} references buffer {} of {}",
                        view.buffer,
                        descriptor.buffers.len()
                    ),
                }));
            }
            needed_buffers.insert(view.buffer);
        }

        let mut buffer_bytes: HashMap<usize, Arc<[u8]>> = HashMap::new();
        let mut external: Vec<(usize, BufferKey)> = Vec::new();
        for &buffer_index in &needed_buffers {
            let buffer = &descriptor.buffers[buffer_index];
            match &buffer.uri {
                None => {
                    if Some(buffer_index) != internal_index {
                        return Err(Error::Decode(DecodeError::InvalidDescriptor {
                            context: "buffers",
                            detail: format!("buffer {buffer_index} has neither uri nor binary chunk"),
                        }));
                    }
                    if (binary.len() as u64) < buffer.byte_length {
                        return Err(Error::Decode(DecodeError::Truncated {
                            expected: usize::try_from(buffer.byte_length).unwrap_or(usize::MAX),
                            actual: binary.len(),
                        }));
                    }
                    buffer_bytes.insert(buffer_index, Arc::clone(binary));
                }
                Some(uri) => external.push((
                    buffer_index,
                    BufferKey {
                        uri: uri.clone(),
                        byte_offset: 0,
                        byte_length: buffer.byte_length,
                    },
                )),
            }
        }

        let keys = external.iter().map(|(_, key)| key.clone()).collect();
        let fetched = resolver.fetch_all(keys).await?;
        for ((buffer_index, _), bytes) in external.into_iter().zip(fetched) {
            buffer_bytes.insert(buffer_index, bytes);
        }

        let mut bytes = HashMap::with_capacity(needed.len());
        for &view_index in &needed {
            let view = view_header(descriptor, view_index)?;
            let buffer = &descriptor.buffers[view.buffer];
            let end = view.byte_offset.checked_add(view.byte_length);
            let within_declared = end.is_some_and(|end| end <= buffer.byte_length);
            let backing = &buffer_bytes[&view.buffer];
            let within_backing = end.is_some_and(|end| end <= backing.len() as u64);
            if !within_declared || !within_backing {
                return Err(Error::Decode(DecodeError::OutOfRange {
                    context: "bufferView",
                    offset: view.byte_offset,
                    length: view.byte_length,
                    available: buffer.byte_length.min(backing.len() as u64),
                }));
            }
            #[allow(clippy::cast_possible_truncation)]
            let start = view.byte_offset as usize;
            #[allow(clippy::cast_possible_truncation)]
            let len = view.byte_length as usize;
            bytes.insert(view_index, Arc::from(&backing[start..start + len]));
        }

        Ok(Self { bytes })
    }

    /// Bytes of a resolved view.
    fn view(&self, view_index: usize) -> Result<Arc<[u8]>> {
        self.bytes
            .get(&view_index)
            .cloned()
            .ok_or_else(|| {
                Error::Decode(DecodeError::InvalidDescriptor {
                    context: "bufferViews",
                    detail: format!("view {view_index} was not resolved"),
                })
            })
    }

    /// Build one availability bitstream from its source.
    fn bitstream(&self, source: AvailabilitySource, length_bits: u64) -> Result<AvailabilityBitstream> {
        match source {
            AvailabilitySource::Constant(value) => {
                Ok(AvailabilityBitstream::constant(value, length_bits))
            }
            AvailabilitySource::BufferView(view) => {
                Ok(AvailabilityBitstream::from_bytes(self.view(view)?, length_bits)?)
            }
        }
    }
}

fn view_header(
    descriptor: &SubtreeDescriptor,
    view_index: usize,
) -> Result<tiletree_decode::BufferViewHeader> {
    descriptor.buffer_views.get(view_index).copied().ok_or_else(|| {
        Error::Decode(DecodeError::InvalidDescriptor {
            context: "bufferViews",
            detail: format!(
                "view {view_index} out of range for {} views",
                descriptor.buffer_views.len()
            ),
        })
    })
}

fn build_metadata_table(
    header: &tiletree_decode::MetadataHeader,
    config: &TilesetConfig,
    tile_availability: &AvailabilityBitstream,
    views: &ViewTable,
) -> Result<MetadataTable> {
    let schema = config.metadata_schema.as_ref().ok_or_else(|| {
        Error::Decode(DecodeError::InvalidDescriptor {
            context: "metadata",
            detail: "subtree declares metadata but the tileset has no schema".to_owned(),
        })
    })?;
    let class = schema.classes.get(&header.class).ok_or_else(|| {
        Error::Decode(DecodeError::InvalidDescriptor {
            context: "metadata",
            detail: format!("schema has no class {:?}", header.class),
        })
    })?;

    let mut buffers = HashMap::new();
    for definition in &class.properties {
        let Some(property) = header.properties.get(&definition.name) else {
            // MetadataTable reports the missing buffer with context.
            continue;
        };
        let values = views.view(property.buffer_view)?;
        let offsets = match property.offset_buffer_view {
            Some(view) => Some(views.view(view)?),
            None => None,
        };
        buffers.insert(
            definition.name.clone(),
            PropertyBuffers {
                values,
                offsets,
                offset_type: property.offset_type.unwrap_or_default(),
            },
        );
    }

    Ok(MetadataTable::new(class.clone(), tile_availability, buffers)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MemoryFetcher;

    fn envelope(descriptor: &str, binary: &[u8]) -> Vec<u8> {
        let descriptor = descriptor.as_bytes();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"subt");
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&(descriptor.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&(binary.len() as u64).to_le_bytes());
        bytes.extend_from_slice(descriptor);
        bytes.extend_from_slice(binary);
        bytes
    }

    fn quadtree_config() -> TilesetConfig {
        TilesetConfig::from_tile_json(
            br#"{
                "boundingVolume": { "region": [0, 0, 1, 1, 0, 10] },
                "geometricError": 500.0,
                "content": { "uri": "content/{level}/{x}/{y}.b3dm" },
                "implicitTiling": {
                    "subdivisionScheme": "QUADTREE",
                    "subtreeLevels": 2,
                    "availableLevels": 4,
                    "subtrees": { "uri": "subtrees/{level}/{x}/{y}.subtree" }
                }
            }"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_decodes_constant_availability() {
        let bytes = envelope(
            r#"{
                "tileAvailability": { "constant": 1, "lengthBits": 5 },
                "contentAvailability": { "constant": 0, "lengthBits": 5 },
                "childSubtreeAvailability": { "constant": 1, "lengthBits": 16 }
            }"#,
            &[],
        );
        let resolver = BufferResolver::new(MemoryFetcher::new());
        let subtree = Subtree::decode(&bytes, &quadtree_config(), &resolver)
            .await
            .unwrap();

        for i in 0..5 {
            assert!(subtree.tile_is_available(i));
            assert!(!subtree.content_is_available(i, 0));
        }
        for i in 0..16 {
            assert!(subtree.child_subtree_is_available(i));
        }
        assert_eq!(subtree.level_offset(1), 1);
        assert!(subtree.metadata_table().is_none());
    }

    #[tokio::test]
    async fn test_missing_content_availability_reads_unavailable() {
        let bytes = envelope(
            r#"{
                "tileAvailability": { "constant": 1, "lengthBits": 5 },
                "childSubtreeAvailability": { "constant": 0, "lengthBits": 16 }
            }"#,
            &[],
        );
        let resolver = BufferResolver::new(MemoryFetcher::new());
        let subtree = Subtree::decode(&bytes, &quadtree_config(), &resolver)
            .await
            .unwrap();

        assert_eq!(subtree.content_slot_count(), 1);
        for i in 0..5 {
            assert!(!subtree.content_is_available(i, 0));
        }
    }

    #[tokio::test]
    async fn test_rejects_declared_length_mismatch() {
        let bytes = envelope(
            r#"{
                "tileAvailability": { "constant": 1, "lengthBits": 9 },
                "childSubtreeAvailability": { "constant": 0, "lengthBits": 16 }
            }"#,
            &[],
        );
        let resolver = BufferResolver::new(MemoryFetcher::new());
        let result = Subtree::decode(&bytes, &quadtree_config(), &resolver).await;
        assert_eq!(
            result.unwrap_err(),
            Error::Decode(DecodeError::LengthMismatch {
                context: "tileAvailability",
                declared: 9,
                derived: 5,
            })
        );
    }

    #[tokio::test]
    #[should_panic(expected = "content index")]
    async fn test_out_of_range_content_index_panics() {
        let bytes = envelope(
            r#"{
                "tileAvailability": { "constant": 1, "lengthBits": 5 },
                "childSubtreeAvailability": { "constant": 0, "lengthBits": 16 }
            }"#,
            &[],
        );
        let resolver = BufferResolver::new(MemoryFetcher::new());
        let subtree = Subtree::decode(&bytes, &quadtree_config(), &resolver)
            .await
            .unwrap();
        let _ = subtree.content_is_available(0, 1);
    }

    #[tokio::test]
    async fn test_cancelled_resolver_fails_decode() {
        let bytes = envelope(
            r#"{
                "tileAvailability": { "constant": 1, "lengthBits": 5 },
                "childSubtreeAvailability": { "constant": 0, "lengthBits": 16 }
            }"#,
            &[],
        );
        let resolver = BufferResolver::new(MemoryFetcher::new());
        resolver.cancel();
        let result = Subtree::decode(&bytes, &quadtree_config(), &resolver).await;
        assert_eq!(result.unwrap_err(), Error::Cancelled);
    }
}
