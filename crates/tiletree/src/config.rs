//! Static tileset configuration for implicit tiling.
//!
//! A [`TilesetConfig`] captures everything about the implicit root tile
//! that subtree decoding depends on: the subdivision scheme, the subtree
//! depth, URI templates, and the optional metadata schema. It is parsed
//! once from the tileset JSON and shared read-only.

use glam::{DMat3, DVec3};
use serde::Deserialize;

use tiletree_decode::{MetadataSchema, Subdivision};

use crate::error::{Error, Result};

/// How a tile's content relates to its children's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Refine {
    Add,
    #[default]
    Replace,
}

/// An oriented bounding box: a center plus three half-axis columns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientedBox {
    pub center: DVec3,
    pub half_axes: DMat3,
}

/// A geographic region in radians plus a height range in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
    pub min_height: f64,
    pub max_height: f64,
}

/// The root bounding volume of the implicit tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundingVolume {
    Box(OrientedBox),
    Region(Region),
}

/// A URI template with `{level}`, `{x}`, `{y}` and `{z}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriTemplate(String);

impl UriTemplate {
    #[must_use]
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    /// The raw template string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Substitute tile coordinates into the template.
    #[must_use]
    pub fn resolve(&self, level: u32, x: u64, y: u64, z: u64) -> String {
        self.0
            .replace("{level}", &level.to_string())
            .replace("{x}", &x.to_string())
            .replace("{y}", &y.to_string())
            .replace("{z}", &z.to_string())
    }
}

/// Static parameters of one implicitly-tiled tileset.
#[derive(Debug, Clone)]
pub struct TilesetConfig {
    pub subdivision: Subdivision,
    /// Number of levels in each subtree, at least 1.
    pub subtree_levels: u32,
    /// Deepest level of the whole tree, with the root at level 0.
    pub maximum_level: u32,
    /// Geometric error of the implicit root, carried for traversal.
    pub geometric_error: f64,
    pub refine: Refine,
    pub bounding_volume: BoundingVolume,
    pub subtree_uri_template: UriTemplate,
    /// One template per content slot; empty when tiles carry no content.
    pub content_uri_templates: Vec<UriTemplate>,
    pub metadata_schema: Option<MetadataSchema>,
}

impl TilesetConfig {
    /// Parse the configuration from the implicit root tile's JSON.
    ///
    /// The expected shape is a tile object with `boundingVolume`,
    /// `geometricError`, optional `refine`, `content` or `contents`,
    /// an `implicitTiling` object, and an optional sibling `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the JSON is malformed, the bounding
    /// volume is neither a box nor a region, `subtreeLevels` is zero,
    /// or `availableLevels` is smaller than `subtreeLevels`.
    pub fn from_tile_json(bytes: &[u8]) -> Result<Self> {
        let tile: TileJson = serde_json::from_slice(bytes).map_err(|e| Error::Config {
            context: "tile json",
            detail: e.to_string(),
        })?;
        Self::from_parsed(tile)
    }

    fn from_parsed(tile: TileJson) -> Result<Self> {
        let bounding_volume = bounding_volume(&tile.bounding_volume)?;

        let tiling = tile.implicit_tiling;
        if tiling.subtree_levels == 0 {
            return Err(Error::Config {
                context: "implicitTiling",
                detail: "subtreeLevels must be at least 1".to_owned(),
            });
        }
        if tiling.available_levels < tiling.subtree_levels {
            return Err(Error::Config {
                context: "implicitTiling",
                detail: format!(
                    "availableLevels {} is smaller than subtreeLevels {}",
                    tiling.available_levels, tiling.subtree_levels
                ),
            });
        }

        let mut content_uri_templates = Vec::new();
        if let Some(content) = tile.content {
            content_uri_templates.push(UriTemplate::new(content.uri));
        }
        for content in tile.contents {
            content_uri_templates.push(UriTemplate::new(content.uri));
        }

        let metadata_schema = match tile.schema {
            Some(value) => {
                let bytes = serde_json::to_vec(&value).map_err(|e| Error::Config {
                    context: "schema",
                    detail: e.to_string(),
                })?;
                Some(MetadataSchema::from_json(&bytes)?)
            }
            None => None,
        };

        Ok(Self {
            subdivision: tiling.subdivision_scheme,
            subtree_levels: tiling.subtree_levels,
            maximum_level: tiling.available_levels - 1,
            geometric_error: tile.geometric_error,
            refine: tile.refine,
            bounding_volume,
            subtree_uri_template: UriTemplate::new(tiling.subtrees.uri),
            content_uri_templates,
            metadata_schema,
        })
    }

    /// Branching factor of the tree, 4 for quadtrees and 8 for octrees.
    #[must_use]
    pub fn branching_factor(&self) -> u64 {
        self.subdivision.branching_factor()
    }
}

fn bounding_volume(json: &BoundingVolumeJson) -> Result<BoundingVolume> {
    match (&json.r#box, &json.region) {
        (Some(values), None) => Ok(BoundingVolume::Box(OrientedBox {
            center: DVec3::new(values[0], values[1], values[2]),
            half_axes: DMat3::from_cols(
                DVec3::new(values[3], values[4], values[5]),
                DVec3::new(values[6], values[7], values[8]),
                DVec3::new(values[9], values[10], values[11]),
            ),
        })),
        (None, Some(values)) => Ok(BoundingVolume::Region(Region {
            west: values[0],
            south: values[1],
            east: values[2],
            north: values[3],
            min_height: values[4],
            max_height: values[5],
        })),
        (Some(_), Some(_)) => Err(Error::Config {
            context: "boundingVolume",
            detail: "both box and region declared".to_owned(),
        }),
        (None, None) => Err(Error::Config {
            context: "boundingVolume",
            detail: "expected a box or region bounding volume".to_owned(),
        }),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TileJson {
    bounding_volume: BoundingVolumeJson,
    geometric_error: f64,
    #[serde(default)]
    refine: Refine,
    #[serde(default)]
    content: Option<ContentJson>,
    #[serde(default)]
    contents: Vec<ContentJson>,
    implicit_tiling: ImplicitTilingJson,
    #[serde(default)]
    schema: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct BoundingVolumeJson {
    #[serde(default)]
    r#box: Option<[f64; 12]>,
    #[serde(default)]
    region: Option<[f64; 6]>,
}

#[derive(Deserialize)]
struct ContentJson {
    uri: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImplicitTilingJson {
    subdivision_scheme: Subdivision,
    subtree_levels: u32,
    available_levels: u32,
    subtrees: SubtreesJson,
}

#[derive(Deserialize)]
struct SubtreesJson {
    uri: String,
}
