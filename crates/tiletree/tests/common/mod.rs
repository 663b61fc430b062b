//! Synthetic subtree envelopes for integration tests.
//!
//! The builder assembles a descriptor JSON, an internal binary chunk,
//! and the byte content of any external buffers, from bit-string
//! availability descriptors like `"11010"` (bit 0 first).

use serde_json::{Value, json};
use tiletree::MemoryFetcher;

/// Route fetch traces to the test writer; safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Pack a bit string like `"11010"` (bit 0 first) into bytes.
pub fn pack_bits(bits: &str) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, c) in bits.chars().enumerate() {
        if c == '1' {
            bytes[i >> 3] |= 1 << (i & 7);
        }
    }
    bytes
}

enum BufferData {
    Internal,
    External { uri: String, bytes: Vec<u8> },
}

/// Builds subtree binaries piece by piece.
#[derive(Default)]
pub struct SubtreeBuilder {
    buffers: Vec<BufferData>,
    views: Vec<(usize, u64, u64)>,
    internal: Vec<u8>,
    internal_index: Option<usize>,
    tile: Option<Value>,
    contents: Vec<Value>,
    child: Option<Value>,
    metadata: Option<Value>,
}

#[allow(dead_code)]
impl SubtreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the internal buffer, creating it on first use.
    pub fn internal_buffer(&mut self) -> usize {
        if let Some(index) = self.internal_index {
            return index;
        }
        let index = self.buffers.len();
        self.buffers.push(BufferData::Internal);
        self.internal_index = Some(index);
        index
    }

    /// Declare an external buffer served under `uri`.
    pub fn external_buffer(&mut self, uri: &str) -> usize {
        let index = self.buffers.len();
        self.buffers.push(BufferData::External {
            uri: uri.to_string(),
            bytes: Vec::new(),
        });
        index
    }

    /// Append bytes to a buffer and declare a view over them.
    pub fn view(&mut self, buffer: usize, bytes: &[u8]) -> usize {
        let offset = self.append(buffer, bytes);
        self.view_at(buffer, offset, bytes.len() as u64)
    }

    /// Declare a view over an arbitrary range of a buffer.
    pub fn view_at(&mut self, buffer: usize, byte_offset: u64, byte_length: u64) -> usize {
        let index = self.views.len();
        self.views.push((buffer, byte_offset, byte_length));
        index
    }

    /// Append raw bytes to a buffer, returning their offset.
    pub fn append(&mut self, buffer: usize, bytes: &[u8]) -> u64 {
        let data = match &mut self.buffers[buffer] {
            BufferData::Internal => &mut self.internal,
            BufferData::External { bytes, .. } => bytes,
        };
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        offset
    }

    pub fn tile_constant(&mut self, value: bool, length_bits: u64) -> &mut Self {
        self.tile = Some(json!({ "constant": u8::from(value), "lengthBits": length_bits }));
        self
    }

    pub fn tile_view(&mut self, view: usize, length_bits: u64) -> &mut Self {
        self.tile = Some(json!({ "bufferView": view, "lengthBits": length_bits }));
        self
    }

    pub fn content_constant(&mut self, value: bool, length_bits: u64) -> &mut Self {
        self.contents
            .push(json!({ "constant": u8::from(value), "lengthBits": length_bits }));
        self
    }

    pub fn content_view(&mut self, view: usize, length_bits: u64) -> &mut Self {
        self.contents
            .push(json!({ "bufferView": view, "lengthBits": length_bits }));
        self
    }

    pub fn child_constant(&mut self, value: bool, length_bits: u64) -> &mut Self {
        self.child = Some(json!({ "constant": u8::from(value), "lengthBits": length_bits }));
        self
    }

    pub fn child_view(&mut self, view: usize, length_bits: u64) -> &mut Self {
        self.child = Some(json!({ "bufferView": view, "lengthBits": length_bits }));
        self
    }

    /// Attach a metadata declaration; `properties` maps property names
    /// to `{ "bufferView": .., "offsetBufferView": .., "offsetType": .. }`.
    pub fn metadata(&mut self, class: &str, properties: Value) -> &mut Self {
        self.metadata = Some(json!({ "class": class, "properties": properties }));
        self
    }

    /// Register every external buffer's bytes with a fetcher.
    pub fn register(&self, fetcher: &MemoryFetcher) {
        for buffer in &self.buffers {
            if let BufferData::External { uri, bytes } = buffer {
                fetcher.insert(uri.clone(), bytes.clone());
            }
        }
    }

    /// Assemble the subtree binary.
    pub fn build(&self) -> Vec<u8> {
        let buffers: Vec<Value> = self
            .buffers
            .iter()
            .map(|buffer| match buffer {
                BufferData::Internal => json!({ "byteLength": self.internal.len() }),
                BufferData::External { uri, bytes } => {
                    json!({ "byteLength": bytes.len(), "uri": uri })
                }
            })
            .collect();
        let views: Vec<Value> = self
            .views
            .iter()
            .map(|&(buffer, byte_offset, byte_length)| {
                json!({
                    "buffer": buffer,
                    "byteOffset": byte_offset,
                    "byteLength": byte_length,
                })
            })
            .collect();

        let mut descriptor = json!({
            "tileAvailability": self.tile.clone().expect("tile availability not set"),
            "childSubtreeAvailability": self.child.clone().expect("child availability not set"),
        });
        let root = descriptor.as_object_mut().expect("descriptor is an object");
        if !buffers.is_empty() {
            root.insert("buffers".to_string(), Value::from(buffers));
            root.insert("bufferViews".to_string(), Value::from(views));
        }
        if !self.contents.is_empty() {
            root.insert(
                "contentAvailability".to_string(),
                Value::from(self.contents.clone()),
            );
        }
        if let Some(metadata) = &self.metadata {
            root.insert("metadata".to_string(), metadata.clone());
        }

        let descriptor = serde_json::to_vec(&descriptor).expect("descriptor serializes");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"subt");
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&(descriptor.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&(self.internal.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&descriptor);
        bytes.extend_from_slice(&self.internal);
        bytes
    }
}

/// A quadtree configuration with the given subtree depth and one
/// content slot.
pub fn quadtree_config(subtree_levels: u32) -> tiletree::TilesetConfig {
    config_json("QUADTREE", subtree_levels, None)
}

/// An octree configuration with the given subtree depth.
pub fn octree_config(subtree_levels: u32) -> tiletree::TilesetConfig {
    config_json("OCTREE", subtree_levels, None)
}

/// A quadtree configuration carrying a metadata schema.
pub fn quadtree_config_with_schema(subtree_levels: u32, schema: Value) -> tiletree::TilesetConfig {
    config_json("QUADTREE", subtree_levels, Some(schema))
}

fn config_json(
    scheme: &str,
    subtree_levels: u32,
    schema: Option<Value>,
) -> tiletree::TilesetConfig {
    let mut tile = json!({
        "boundingVolume": { "region": [-1.57, -0.78, 1.57, 0.78, 0.0, 100.0] },
        "geometricError": 500.0,
        "content": { "uri": "content/{level}/{x}/{y}.b3dm" },
        "implicitTiling": {
            "subdivisionScheme": scheme,
            "subtreeLevels": subtree_levels,
            "availableLevels": subtree_levels * 2,
            "subtrees": { "uri": "subtrees/{level}/{x}/{y}.subtree" }
        }
    });
    if let Some(schema) = schema {
        tile.as_object_mut()
            .expect("tile is an object")
            .insert("schema".to_string(), schema);
    }
    let bytes = serde_json::to_vec(&tile).expect("tile serializes");
    tiletree::TilesetConfig::from_tile_json(&bytes).expect("config parses")
}
