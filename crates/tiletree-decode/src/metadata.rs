//! Per-tile metadata property tables.
//!
//! A metadata table stores one row per *available* tile, in ascending
//! linear-bit-index order. Columns are flat little-endian component
//! arrays; variable-length columns (arrays, strings) pair a values
//! buffer with an offset buffer of `count + 1` entries.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::bitstream::AvailabilityBitstream;
use crate::descriptor::OffsetType;
use crate::error::{DecodeError, DecodeResult};

/// Scalar component type of a metadata property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComponentType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
}

impl ComponentType {
    /// Size of one component in bytes.
    #[must_use]
    pub fn byte_size(self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Int64 | Self::Uint64 | Self::Float64 => 8,
        }
    }
}

/// Shape of a metadata property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// One component per row.
    Scalar,
    /// A fixed number of components per row.
    FixedArray { count: usize },
    /// A per-row component slice described by an offset buffer.
    VariableArray,
    /// A per-row UTF-8 byte slice described by an offset buffer.
    String,
}

/// One property definition within a schema class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDefinition {
    pub name: String,
    pub kind: PropertyKind,
    /// Component type of the values buffer. Strings are raw UTF-8 bytes
    /// and ignore this, keeping `Uint8` by convention.
    pub component_type: ComponentType,
}

/// A named class: the ordered property definitions rows conform to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataClass {
    pub name: String,
    pub properties: Vec<PropertyDefinition>,
}

impl MetadataClass {
    /// Look up a property definition by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyDefinition> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// The schema carried by the tileset: a set of classes keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataSchema {
    pub classes: HashMap<String, MetadataClass>,
}

impl MetadataSchema {
    /// Parse a schema from its tileset JSON form.
    ///
    /// The JSON shape is `{"classes": {name: {"properties": {name:
    /// {"type", "componentType", "count"}}}}}` where `type` is one of
    /// `SCALAR`, `ARRAY`, or `STRING` and `count` marks an `ARRAY` as
    /// fixed-length.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Descriptor`] on malformed JSON and
    /// [`DecodeError::InvalidDescriptor`] on contradictory shapes, such
    /// as a scalar with a `count` or an array without a component type.
    pub fn from_json(bytes: &[u8]) -> DecodeResult<Self> {
        #[derive(Deserialize)]
        struct SchemaJson {
            #[serde(default)]
            classes: HashMap<String, ClassJson>,
        }

        #[derive(Deserialize)]
        struct ClassJson {
            #[serde(default)]
            properties: HashMap<String, PropertyJson>,
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct PropertyJson {
            r#type: String,
            #[serde(default)]
            component_type: Option<ComponentType>,
            #[serde(default)]
            count: Option<usize>,
        }

        let parsed: SchemaJson =
            serde_json::from_slice(bytes).map_err(|e| DecodeError::Descriptor {
                message: e.to_string(),
            })?;

        let mut classes = HashMap::new();
        for (class_name, class) in parsed.classes {
            let mut properties: Vec<PropertyDefinition> = Vec::new();
            for (name, property) in class.properties {
                properties.push(property_definition(
                    &name,
                    &property.r#type,
                    property.component_type,
                    property.count,
                )?);
            }
            // Deterministic column order regardless of JSON map order.
            properties.sort_by(|a, b| a.name.cmp(&b.name));
            classes.insert(
                class_name.clone(),
                MetadataClass {
                    name: class_name,
                    properties,
                },
            );
        }
        Ok(Self { classes })
    }
}

fn property_definition(
    name: &str,
    kind: &str,
    component_type: Option<ComponentType>,
    count: Option<usize>,
) -> DecodeResult<PropertyDefinition> {
    let invalid = |detail: String| DecodeError::InvalidDescriptor {
        context: "schema property",
        detail,
    };
    let require_component = || {
        component_type.ok_or_else(|| invalid(format!("property {name:?} is missing componentType")))
    };
    let kind = match kind {
        "SCALAR" => {
            if count.is_some() {
                return Err(invalid(format!("scalar property {name:?} declares a count")));
            }
            PropertyKind::Scalar
        }
        "ARRAY" => match count {
            Some(0) => {
                return Err(invalid(format!("array property {name:?} has count 0")));
            }
            Some(count) => PropertyKind::FixedArray { count },
            None => PropertyKind::VariableArray,
        },
        "STRING" => PropertyKind::String,
        other => {
            return Err(invalid(format!("property {name:?} has unknown type {other:?}")));
        }
    };
    let component_type = if kind == PropertyKind::String {
        component_type.unwrap_or(ComponentType::Uint8)
    } else {
        require_component()?
    };
    Ok(PropertyDefinition {
        name: name.to_owned(),
        kind,
        component_type,
    })
}

/// One decoded component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
}

/// One decoded property value for a row.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Scalar(ScalarValue),
    Array(Vec<ScalarValue>),
    String(String),
}

/// The resolved byte columns for one property.
#[derive(Debug, Clone)]
pub struct PropertyBuffers {
    pub values: Arc<[u8]>,
    /// Required for variable-length kinds, ignored otherwise.
    pub offsets: Option<Arc<[u8]>>,
    pub offset_type: OffsetType,
}

/// A columnar table with one row per available tile.
#[derive(Debug, Clone)]
pub struct MetadataTable {
    class: MetadataClass,
    count: usize,
    row_for_bit: HashMap<u64, usize>,
    columns: HashMap<String, Column>,
}

#[derive(Debug, Clone)]
struct Column {
    kind: PropertyKind,
    component_type: ComponentType,
    values: Arc<[u8]>,
    offsets: Option<OffsetColumn>,
}

#[derive(Debug, Clone)]
struct OffsetColumn {
    bytes: Arc<[u8]>,
    offset_type: OffsetType,
}

impl OffsetColumn {
    fn entry(&self, index: usize) -> u64 {
        let size = self.offset_type.byte_size();
        let at = index * size;
        let bytes = &self.bytes[at..at + size];
        match self.offset_type {
            OffsetType::Uint8 => u64::from(bytes[0]),
            OffsetType::Uint16 => u64::from(u16::from_le_bytes([bytes[0], bytes[1]])),
            OffsetType::Uint32 => {
                u64::from(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            OffsetType::Uint64 => u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]),
        }
    }
}

impl MetadataTable {
    /// Build a table from a schema class, the tile availability stream,
    /// and the resolved column buffers keyed by property name.
    ///
    /// Row `r` belongs to the `r`-th available tile in ascending
    /// linear-bit-index order. Every declared property must have a
    /// buffer entry, and every buffer must be large enough for `count`
    /// rows; layout problems are reported here so that row access never
    /// fails on bounds.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::InvalidDescriptor`] for a property with
    /// missing buffers, [`DecodeError::OutOfRange`] for a buffer
    /// shorter than the layout requires or offsets that escape the
    /// values buffer, and [`DecodeError::InvalidString`] for string
    /// bytes that are not UTF-8.
    pub fn new(
        class: MetadataClass,
        tile_availability: &AvailabilityBitstream,
        mut buffers: HashMap<String, PropertyBuffers>,
    ) -> DecodeResult<Self> {
        let count = usize::try_from(tile_availability.count_ones()).map_err(|_| {
            DecodeError::InvalidDescriptor {
                context: "metadata",
                detail: "available tile count exceeds addressable memory".to_owned(),
            }
        })?;

        let mut row_for_bit = HashMap::with_capacity(count);
        let mut row = 0usize;
        for bit in 0..tile_availability.length_bits() {
            if tile_availability.is_available(bit) {
                row_for_bit.insert(bit, row);
                row += 1;
            }
        }

        let mut columns = HashMap::with_capacity(class.properties.len());
        for definition in &class.properties {
            let property = buffers.remove(&definition.name).ok_or_else(|| {
                DecodeError::InvalidDescriptor {
                    context: "metadata",
                    detail: format!("property {:?} has no buffer", definition.name),
                }
            })?;
            let column = build_column(definition, property, count)?;
            columns.insert(definition.name.clone(), column);
        }

        Ok(Self {
            class,
            count,
            row_for_bit,
            columns,
        })
    }

    /// The schema class this table conforms to.
    #[must_use]
    pub fn class(&self) -> &MetadataClass {
        &self.class
    }

    /// Number of rows, equal to the number of available tiles.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Row index for an available tile's linear bit index, or `None`
    /// when the tile is unavailable.
    #[must_use]
    pub fn row_for_bit_index(&self, bit_index: u64) -> Option<usize> {
        self.row_for_bit.get(&bit_index).copied()
    }

    /// Decode one property value for one row.
    ///
    /// # Panics
    ///
    /// Panics if `row >= count()` or `name` is not a property of the
    /// class. Both indicate caller bugs against an already-validated
    /// table, not data errors.
    #[must_use]
    pub fn get_property(&self, row: usize, name: &str) -> PropertyValue {
        assert!(row < self.count, "row {row} out of range for {} rows", self.count);
        let column = self
            .columns
            .get(name)
            .unwrap_or_else(|| panic!("unknown property {name:?}"));
        match column.kind {
            PropertyKind::Scalar => {
                PropertyValue::Scalar(read_component(&column.values, column.component_type, row))
            }
            PropertyKind::FixedArray { count } => {
                let start = row * count;
                let components = (start..start + count)
                    .map(|i| read_component(&column.values, column.component_type, i))
                    .collect();
                PropertyValue::Array(components)
            }
            PropertyKind::VariableArray => {
                let (start, end) = column_slice(column, row);
                let size = column.component_type.byte_size();
                let components = (start / size..end / size)
                    .map(|i| read_component(&column.values, column.component_type, i))
                    .collect();
                PropertyValue::Array(components)
            }
            PropertyKind::String => {
                let (start, end) = column_slice(column, row);
                // UTF-8 was validated at construction.
                let text = String::from_utf8_lossy(&column.values[start..end]).into_owned();
                PropertyValue::String(text)
            }
        }
    }
}

/// Byte range of `row` in a variable-length column.
fn column_slice(column: &Column, row: usize) -> (usize, usize) {
    let offsets = column
        .offsets
        .as_ref()
        .unwrap_or_else(|| panic!("variable-length column without offsets"));
    #[allow(clippy::cast_possible_truncation)]
    let start = offsets.entry(row) as usize;
    #[allow(clippy::cast_possible_truncation)]
    let end = offsets.entry(row + 1) as usize;
    (start, end)
}

fn build_column(
    definition: &PropertyDefinition,
    property: PropertyBuffers,
    count: usize,
) -> DecodeResult<Column> {
    let component_size = definition.component_type.byte_size();
    let values_len = property.values.len() as u64;

    let offsets = match definition.kind {
        PropertyKind::Scalar => {
            require_values(&property.values, count * component_size)?;
            None
        }
        PropertyKind::FixedArray { count: per_row } => {
            require_values(&property.values, count * per_row * component_size)?;
            None
        }
        PropertyKind::VariableArray | PropertyKind::String => {
            let bytes = property.offsets.ok_or_else(|| DecodeError::InvalidDescriptor {
                context: "metadata",
                detail: format!("property {:?} has no offset buffer", definition.name),
            })?;
            let offset_column = OffsetColumn {
                bytes,
                offset_type: property.offset_type,
            };
            let needed = (count + 1) * property.offset_type.byte_size();
            if offset_column.bytes.len() < needed {
                return Err(DecodeError::OutOfRange {
                    context: "metadata offset buffer",
                    offset: 0,
                    length: needed as u64,
                    available: offset_column.bytes.len() as u64,
                });
            }
            // Offsets must be monotone and stay inside the values buffer
            // so that row access is pure indexing.
            let mut previous = 0u64;
            for i in 0..=count {
                let offset = offset_column.entry(i);
                if offset < previous || offset > values_len {
                    return Err(DecodeError::OutOfRange {
                        context: "metadata offsets",
                        offset,
                        length: 0,
                        available: values_len,
                    });
                }
                if definition.kind == PropertyKind::VariableArray
                    && offset % component_size as u64 != 0
                {
                    return Err(DecodeError::InvalidDescriptor {
                        context: "metadata offsets",
                        detail: format!(
                            "offset {offset} is not a multiple of the {component_size}-byte component"
                        ),
                    });
                }
                previous = offset;
            }
            if definition.kind == PropertyKind::String {
                for row in 0..count {
                    #[allow(clippy::cast_possible_truncation)]
                    let start = offset_column.entry(row) as usize;
                    #[allow(clippy::cast_possible_truncation)]
                    let end = offset_column.entry(row + 1) as usize;
                    if std::str::from_utf8(&property.values[start..end]).is_err() {
                        return Err(DecodeError::InvalidString {
                            property: definition.name.clone(),
                            row,
                        });
                    }
                }
            }
            Some(offset_column)
        }
    };

    Ok(Column {
        kind: definition.kind,
        component_type: definition.component_type,
        values: property.values,
        offsets,
    })
}

fn require_values(values: &Arc<[u8]>, needed: usize) -> DecodeResult<()> {
    if values.len() < needed {
        return Err(DecodeError::OutOfRange {
            context: "metadata values buffer",
            offset: 0,
            length: needed as u64,
            available: values.len() as u64,
        });
    }
    Ok(())
}

/// Read component `index` from a flat little-endian component array.
fn read_component(bytes: &[u8], component_type: ComponentType, index: usize) -> ScalarValue {
    let size = component_type.byte_size();
    let at = index * size;
    let b = &bytes[at..at + size];
    match component_type {
        ComponentType::Int8 => ScalarValue::I8(b[0] as i8),
        ComponentType::Uint8 => ScalarValue::U8(b[0]),
        ComponentType::Int16 => ScalarValue::I16(i16::from_le_bytes([b[0], b[1]])),
        ComponentType::Uint16 => ScalarValue::U16(u16::from_le_bytes([b[0], b[1]])),
        ComponentType::Int32 => ScalarValue::I32(i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        ComponentType::Uint32 => ScalarValue::U32(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        ComponentType::Int64 => ScalarValue::I64(i64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ])),
        ComponentType::Uint64 => ScalarValue::U64(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ])),
        ComponentType::Float32 => {
            ScalarValue::F32(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        }
        ComponentType::Float64 => ScalarValue::F64(f64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ])),
    }
}
